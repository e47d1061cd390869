//! Parallel traversal configuration.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct TraversalConfig {
    /// Worker threads in the shared pool. Defaults to the number of CPUs.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Pending units the pool queues before submitters run work inline.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_worker_threads() -> usize {
    num_cpus::get()
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            queue_capacity: default_queue_capacity(),
        }
    }
}
