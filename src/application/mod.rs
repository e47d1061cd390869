//! Application services layered over the store ports.

pub mod cache;
pub mod traversal;
