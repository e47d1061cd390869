//! Parallel pre/post-order traversal of materialized trees.

mod pool;
mod traverser;

pub use pool::{Job, Rejected, WorkerPool};
pub use traverser::{ParallelTraverser, TraversalCallback, TraversalStats, TreeItem};
