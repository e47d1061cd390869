//! Database model types for Diesel ORM.

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Nullable, Text};

use super::schema::{portfolio, portfolio_node, position, position_security_key, trade};
use crate::domain::version::END_OF_TIME;

/// The two half-open intervals every versioned row carries, in micros.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    pub ver_from: i64,
    pub ver_to: i64,
    pub corr_from: i64,
    pub corr_to: i64,
}

impl Intervals {
    /// Fresh row valid from `now` on both axes.
    #[must_use]
    pub fn open(now: i64) -> Self {
        Self {
            ver_from: now,
            ver_to: END_OF_TIME,
            corr_from: now,
            corr_to: END_OF_TIME,
        }
    }

    /// Replacement row for a correction: same version interval, new
    /// correction interval starting at `now`.
    #[must_use]
    pub fn corrected(&self, now: i64) -> Self {
        Self {
            corr_from: now,
            corr_to: END_OF_TIME,
            ..*self
        }
    }

    #[must_use]
    pub fn is_version_current(&self) -> bool {
        self.ver_to == END_OF_TIME
    }

    #[must_use]
    pub fn is_correction_current(&self) -> bool {
        self.corr_to == END_OF_TIME
    }

    #[must_use]
    pub fn valid_at(&self, version: i64, correction: i64) -> bool {
        self.ver_from <= version
            && version < self.ver_to
            && self.corr_from <= correction
            && correction < self.corr_to
    }

    /// Move `(version, correction)` to the nearest point inside this row's
    /// intervals.
    #[must_use]
    pub fn clamp(&self, version: i64, correction: i64) -> (i64, i64) {
        (
            version.clamp(self.ver_from, (self.ver_to - 1).max(self.ver_from)),
            correction.clamp(self.corr_from, (self.corr_to - 1).max(self.corr_from)),
        )
    }
}

/// Rows carrying bitemporal intervals.
pub trait Versioned {
    fn row_id(&self) -> i64;
    fn object_id(&self) -> i64;
    fn intervals(&self) -> Intervals;
}

macro_rules! versioned_row {
    ($row:ty) => {
        impl Versioned for $row {
            fn row_id(&self) -> i64 {
                self.id
            }

            fn object_id(&self) -> i64 {
                self.oid
            }

            fn intervals(&self) -> Intervals {
                Intervals {
                    ver_from: self.ver_from,
                    ver_to: self.ver_to,
                    corr_from: self.corr_from,
                    corr_to: self.corr_to,
                }
            }
        }
    };
}

/// Database row for a portfolio version.
#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = portfolio)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PortfolioRow {
    pub id: i64,
    pub oid: i64,
    pub ver_from: i64,
    pub ver_to: i64,
    pub corr_from: i64,
    pub corr_to: i64,
    pub name: String,
    /// JSON object of string attributes.
    pub attributes: String,
}

/// Database row for a node. Node rows belong to exactly one portfolio row
/// and mirror its intervals.
#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = portfolio_node)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct NodeRow {
    pub id: i64,
    pub oid: i64,
    pub portfolio_id: i64,
    pub portfolio_oid: i64,
    pub parent_node_id: Option<i64>,
    pub parent_node_oid: Option<i64>,
    pub depth: i32,
    pub tree_left: i64,
    pub tree_right: i64,
    pub name: String,
    pub ver_from: i64,
    pub ver_to: i64,
    pub corr_from: i64,
    pub corr_to: i64,
}

/// Database row for a position version.
#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = position)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PositionRow {
    pub id: i64,
    pub oid: i64,
    pub node_oid: i64,
    /// Decimal text.
    pub quantity: String,
    pub security_oid: Option<String>,
    pub provider_scheme: Option<String>,
    pub provider_value: Option<String>,
    pub attributes: String,
    pub ver_from: i64,
    pub ver_to: i64,
    pub corr_from: i64,
    pub corr_to: i64,
}

/// One external key of a position's security link.
#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = position_security_key)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SecurityKeyRow {
    pub position_id: i64,
    pub key_scheme: String,
    pub key_value: String,
}

/// Database row for a trade. Trade rows belong to exactly one position row
/// and mirror its intervals.
#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = trade)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TradeRow {
    pub id: i64,
    pub oid: i64,
    pub position_id: i64,
    pub position_oid: i64,
    pub quantity: String,
    pub counterparty_scheme: String,
    pub counterparty_value: String,
    pub traded_at: i64,
    pub premium: Option<String>,
    pub premium_currency: Option<String>,
    pub provider_scheme: Option<String>,
    pub provider_value: Option<String>,
    /// JSON security link.
    pub security_link: String,
    pub attributes: String,
    pub ver_from: i64,
    pub ver_to: i64,
    pub corr_from: i64,
    pub corr_to: i64,
}

versioned_row!(PortfolioRow);
versioned_row!(NodeRow);
versioned_row!(PositionRow);
versioned_row!(TradeRow);

/// One row of the joined subtree query: a node, optionally one of its
/// positions, and optionally one key or trade of that position.
#[derive(QueryableByName, Debug, Clone)]
pub struct TreeRow {
    #[diesel(sql_type = BigInt)]
    pub node_id: i64,
    #[diesel(sql_type = BigInt)]
    pub node_oid: i64,
    #[diesel(sql_type = BigInt)]
    pub portfolio_id: i64,
    #[diesel(sql_type = BigInt)]
    pub portfolio_oid: i64,
    #[diesel(sql_type = Nullable<BigInt>)]
    pub parent_node_id: Option<i64>,
    #[diesel(sql_type = Nullable<BigInt>)]
    pub parent_node_oid: Option<i64>,
    #[diesel(sql_type = BigInt)]
    pub tree_left: i64,
    #[diesel(sql_type = BigInt)]
    pub tree_right: i64,
    #[diesel(sql_type = Text)]
    pub node_name: String,
    #[diesel(sql_type = BigInt)]
    pub node_ver_from: i64,
    #[diesel(sql_type = BigInt)]
    pub node_corr_from: i64,

    #[diesel(sql_type = Nullable<BigInt>)]
    pub pos_id: Option<i64>,
    #[diesel(sql_type = Nullable<BigInt>)]
    pub pos_oid: Option<i64>,
    #[diesel(sql_type = Nullable<Text>)]
    pub pos_quantity: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub pos_security_oid: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub pos_provider_scheme: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub pos_provider_value: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub pos_attributes: Option<String>,
    #[diesel(sql_type = Nullable<BigInt>)]
    pub pos_ver_from: Option<i64>,
    #[diesel(sql_type = Nullable<BigInt>)]
    pub pos_corr_from: Option<i64>,

    #[diesel(sql_type = Nullable<Text>)]
    pub key_scheme: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub key_value: Option<String>,

    #[diesel(sql_type = Nullable<BigInt>)]
    pub trade_id: Option<i64>,
    #[diesel(sql_type = Nullable<BigInt>)]
    pub trade_oid: Option<i64>,
    #[diesel(sql_type = Nullable<Text>)]
    pub trade_quantity: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub trade_cpty_scheme: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub trade_cpty_value: Option<String>,
    #[diesel(sql_type = Nullable<BigInt>)]
    pub trade_traded_at: Option<i64>,
    #[diesel(sql_type = Nullable<Text>)]
    pub trade_premium: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub trade_premium_currency: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub trade_provider_scheme: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub trade_provider_value: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub trade_security_link: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub trade_attributes: Option<String>,
}

impl TreeRow {
    /// The trade columns as a stored trade row, when this row carries one.
    #[must_use]
    pub fn trade_row(&self) -> Option<TradeRow> {
        let pos_id = self.pos_id?;
        let pos_oid = self.pos_oid?;
        Some(TradeRow {
            id: self.trade_id?,
            oid: self.trade_oid?,
            position_id: pos_id,
            position_oid: pos_oid,
            quantity: self.trade_quantity.clone()?,
            counterparty_scheme: self.trade_cpty_scheme.clone()?,
            counterparty_value: self.trade_cpty_value.clone()?,
            traded_at: self.trade_traded_at?,
            premium: self.trade_premium.clone(),
            premium_currency: self.trade_premium_currency.clone(),
            provider_scheme: self.trade_provider_scheme.clone(),
            provider_value: self.trade_provider_value.clone(),
            security_link: self.trade_security_link.clone()?,
            attributes: self.trade_attributes.clone()?,
            // Trade rows mirror their position row; the subtree decoder does
            // not look at them.
            ver_from: self.pos_ver_from?,
            ver_to: END_OF_TIME,
            corr_from: self.pos_corr_from?,
            corr_to: END_OF_TIME,
        })
    }
}

/// Single nullable aggregate.
#[derive(QueryableByName, Debug, Clone, Copy)]
pub struct MaxRow {
    #[diesel(sql_type = Nullable<BigInt>)]
    pub value: Option<i64>,
}

/// Single count.
#[derive(QueryableByName, Debug, Clone, Copy)]
pub struct CountRow {
    #[diesel(sql_type = BigInt)]
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_intervals_are_current() {
        let iv = Intervals::open(100);
        assert!(iv.is_version_current());
        assert!(iv.is_correction_current());
        assert!(iv.valid_at(100, 100));
        assert!(!iv.valid_at(99, 100));
    }

    #[test]
    fn corrected_keeps_version_interval() {
        let iv = Intervals {
            ver_from: 10,
            ver_to: 20,
            corr_from: 10,
            corr_to: END_OF_TIME,
        };
        let next = iv.corrected(30);
        assert_eq!((next.ver_from, next.ver_to), (10, 20));
        assert_eq!(next.corr_from, 30);
        assert!(next.is_correction_current());
    }

    #[test]
    fn clamp_moves_into_row() {
        let iv = Intervals {
            ver_from: 10,
            ver_to: 20,
            corr_from: 10,
            corr_to: 15,
        };
        assert_eq!(iv.clamp(5, 50), (10, 14));
        assert_eq!(iv.clamp(12, 12), (12, 12));
        assert_eq!(iv.clamp(40, 40), (19, 14));
    }
}
