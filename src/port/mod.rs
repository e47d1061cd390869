//! Ports between the domain and its adapters.

pub mod change;
pub mod master;
pub mod source;

pub use change::{ChangeEvent, ChangeListener, ChangeManager, ChangeType};
pub use master::PositionMaster;
pub use source::{get_entity, PositionSource};
