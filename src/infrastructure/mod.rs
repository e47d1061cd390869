//! Infrastructure layer.
//!
//! Technical concerns that support the store without holding domain logic:
//! configuration loading and logging set-up.

pub mod config;
