//! SQLite persistence adapter.
//!
//! Stores the bitemporal history of portfolios, nodes, positions and trades
//! with Diesel ORM and serves it through [`SqlitePositionMaster`].

pub mod database;
mod reader;
mod search;
pub mod store;
mod writer;

pub use store::SqlitePositionMaster;
