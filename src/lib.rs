//! Folio - a bitemporal, hierarchical portfolio and position store.
//!
//! Every row carries a version interval (when the fact held) and a
//! correction interval (when the record was believed). History is
//! insert-only: updates close the current row and insert a successor,
//! corrections insert a sibling with the same version interval.
//!
//! # Architecture
//!
//! - **`domain`** - Identifiers, instants, entities and the nested-set tree codec
//! - **`port`** - `PositionSource` (reads), `PositionMaster` (writes, history,
//!   search) and change notifications
//! - **`adapter::outbound::sqlite`** - Bitemporal reader and writer over SQLite
//! - **`application::cache`** - Two-tier cache in front of any `PositionSource`
//! - **`application::traversal`** - Parallel pre/post-order tree traversal
//! - **`adapter::inbound::cli`** - The `folio` command line
//!
//! # Example
//!
//! ```no_run
//! use folio_store::adapter::outbound::sqlite::SqlitePositionMaster;
//! use folio_store::domain::{Portfolio, PortfolioNode, VersionCorrection};
//! use folio_store::infrastructure::config::Config;
//! use folio_store::port::{PositionMaster, PositionSource};
//!
//! fn main() -> folio_store::Result<()> {
//!     let master = SqlitePositionMaster::open(&Config::load_or_default("config.toml")?)?;
//!     let receipt = master.add(Portfolio::new("Growth", PortfolioNode::new("Growth")))?;
//!     let tree = master.portfolio(&receipt.unique_id, VersionCorrection::LATEST)?;
//!     println!("{}", tree.root.name);
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod port;

pub use error::{Error, Result};
