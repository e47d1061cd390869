//! Shared row-number sequence.
//!
//! One sequence numbers the rows of every table, so a row id is unique
//! across the whole store and an object id (its first row id) never
//! collides with another object of a different kind.

use diesel::prelude::*;
use diesel::SqliteConnection;

use super::schema::master_sequence;
use crate::error::{Error, Result};

const SEQUENCE: &str = "master";

/// Reserve `count` consecutive ids and return the first.
///
/// Must run inside a write transaction.
///
/// # Errors
/// Returns an error if the sequence row is missing or the update fails.
pub fn allocate(conn: &mut SqliteConnection, count: i64) -> Result<i64> {
    let next: i64 = master_sequence::table
        .find(SEQUENCE)
        .select(master_sequence::next_value)
        .first(conn)
        .optional()?
        .ok_or_else(|| Error::Database("master sequence is not initialised".into()))?;
    diesel::update(master_sequence::table.find(SEQUENCE))
        .set(master_sequence::next_value.eq(next + count))
        .execute(conn)?;
    Ok(next)
}

/// Reserve a single id.
///
/// # Errors
/// See [`allocate`].
pub fn next_id(conn: &mut SqliteConnection) -> Result<i64> {
    allocate(conn, 1)
}
