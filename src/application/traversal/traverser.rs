//! Concurrent pre/post-order walk of a materialized tree.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::channel::{self, Sender};
use tracing::{debug, error};

use super::pool::{Rejected, WorkerPool};
use crate::domain::{PortfolioNode, Position};
use crate::error::{Error, Result};
use crate::infrastructure::config::TraversalConfig;

/// What a callback is being told about.
#[derive(Debug, Clone, Copy)]
pub enum TreeItem<'a> {
    Node(&'a Arc<PortfolioNode>),
    Position {
        node: &'a Arc<PortfolioNode>,
        position: &'a Arc<Position>,
    },
}

/// Hooks invoked for every node and position.
///
/// Calls arrive concurrently from pool threads. Sibling subtrees are
/// visited in no particular order.
pub trait TraversalCallback: Send + Sync {
    fn pre_order(&self, item: TreeItem<'_>);

    /// For a node, runs after every child node and direct position has
    /// had its own post-order call.
    fn post_order(&self, item: TreeItem<'_>);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraversalStats {
    pub nodes: usize,
    pub positions: usize,
}

enum Signal {
    Done,
    Failed(String),
}

/// A node whose post-order call waits on `remaining` children and positions.
struct NodeUnit {
    node: Arc<PortfolioNode>,
    parent: Option<Arc<NodeUnit>>,
    remaining: AtomicUsize,
}

#[derive(Default)]
struct Tally {
    nodes: AtomicUsize,
    positions: AtomicUsize,
}

struct Walk {
    callback: Arc<dyn TraversalCallback>,
    pool: Arc<WorkerPool>,
    failed: AtomicBool,
    tally: Arc<Tally>,
    signal: Sender<Signal>,
}

impl Walk {
    fn fail(&self, reason: String) {
        if !self.failed.swap(true, Ordering::SeqCst) {
            error!(%reason, "Traversal failed");
            let _ = self.signal.try_send(Signal::Failed(reason));
        }
    }

    /// Run `f`, turning a panic into a traversal failure.
    fn guarded(&self, f: impl FnOnce()) {
        if self.failed.load(Ordering::Acquire) {
            return;
        }
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(f)) {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "callback panicked".into());
            self.fail(reason);
        }
    }

    fn visit(self: &Arc<Self>, unit: Arc<NodeUnit>) {
        self.guarded(|| self.visit_unguarded(unit));
    }

    fn visit_unguarded(self: &Arc<Self>, unit: Arc<NodeUnit>) {
        let node = Arc::clone(&unit.node);
        self.callback.pre_order(TreeItem::Node(&node));
        if unit.remaining.load(Ordering::Acquire) == 0 {
            self.complete(unit);
            return;
        }

        let mut children = node.child_nodes.iter().map(|child| {
            Arc::new(NodeUnit {
                node: Arc::clone(child),
                parent: Some(Arc::clone(&unit)),
                remaining: AtomicUsize::new(child.child_nodes.len() + child.positions.len()),
            })
        });
        let first = children.next();
        for child in children {
            self.hand_off(child);
        }
        for position in &node.positions {
            if self.failed.load(Ordering::Acquire) {
                return;
            }
            let item = TreeItem::Position {
                node: &node,
                position,
            };
            self.callback.pre_order(item);
            self.callback.post_order(item);
            self.tally.positions.fetch_add(1, Ordering::Relaxed);
            self.finished_one(&unit);
        }
        if let Some(first) = first {
            self.visit_unguarded(first);
        }
    }

    /// Give a sibling subtree to the pool, or run it here if the queue is
    /// full.
    fn hand_off(self: &Arc<Self>, unit: Arc<NodeUnit>) {
        let walk = Arc::clone(self);
        let job_unit = Arc::clone(&unit);
        match self.pool.try_submit(Box::new(move || walk.visit(job_unit))) {
            Ok(()) => {}
            Err(Rejected::Full(_)) => self.visit_unguarded(unit),
            Err(Rejected::Closed(_)) => self.fail("worker pool is shut down".into()),
        }
    }

    fn finished_one(self: &Arc<Self>, unit: &Arc<NodeUnit>) {
        if unit.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.complete(Arc::clone(unit));
        }
    }

    /// Post-order for `unit`, then propagate completion upward.
    fn complete(self: &Arc<Self>, unit: Arc<NodeUnit>) {
        if self.failed.load(Ordering::Acquire) {
            return;
        }
        self.callback.post_order(TreeItem::Node(&unit.node));
        self.tally.nodes.fetch_add(1, Ordering::Relaxed);
        match &unit.parent {
            Some(parent) => self.finished_one(parent),
            None => {
                let _ = self.signal.try_send(Signal::Done);
            }
        }
    }
}

/// Walks trees on a shared [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct ParallelTraverser {
    pool: Arc<WorkerPool>,
}

impl ParallelTraverser {
    #[must_use]
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self { pool }
    }

    /// # Errors
    /// Returns an error if the pool cannot be started.
    pub fn from_config(config: &TraversalConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(WorkerPool::from_config(config)?)))
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Visit `root` and everything below it, returning once every
    /// post-order call has been made.
    ///
    /// The root is visited on the calling thread; sibling subtrees are
    /// handed to the pool.
    ///
    /// # Errors
    /// Returns [`Error::TraversalFailure`] if a callback panics or the pool
    /// stops before the walk finishes. Partial progress is discarded.
    pub fn traverse(
        &self,
        root: &Arc<PortfolioNode>,
        callback: Arc<dyn TraversalCallback>,
    ) -> Result<TraversalStats> {
        let (tx, rx) = channel::bounded(1);
        let tally = Arc::new(Tally::default());
        let walk = Arc::new(Walk {
            callback,
            pool: Arc::clone(&self.pool),
            failed: AtomicBool::new(false),
            tally: Arc::clone(&tally),
            signal: tx,
        });
        let unit = Arc::new(NodeUnit {
            node: Arc::clone(root),
            parent: None,
            remaining: AtomicUsize::new(root.child_nodes.len() + root.positions.len()),
        });
        walk.visit(unit);
        // Pool jobs own the remaining handles; once they are all gone
        // without a signal the receive reports a disconnect.
        drop(walk);

        match rx.recv() {
            Ok(Signal::Done) => {
                let stats = TraversalStats {
                    nodes: tally.nodes.load(Ordering::Acquire),
                    positions: tally.positions.load(Ordering::Acquire),
                };
                debug!(nodes = stats.nodes, positions = stats.positions, "Traversal complete");
                Ok(stats)
            }
            Ok(Signal::Failed(reason)) => Err(Error::TraversalFailure(reason)),
            Err(_) => Err(Error::TraversalFailure(
                "traversal abandoned before completion".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExternalId;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    /// Records a global sequence number for every call, keyed by name.
    #[derive(Default)]
    struct Recorder {
        clock: AtomicUsize,
        pre: Mutex<HashMap<String, usize>>,
        post: Mutex<HashMap<String, usize>>,
    }

    fn position_name(position: &Position) -> String {
        position
            .security_link
            .external_ids
            .iter()
            .map(ExternalId::value)
            .collect()
    }

    fn name(item: TreeItem<'_>) -> String {
        match item {
            TreeItem::Node(node) => node.name.clone(),
            TreeItem::Position { position, .. } => position_name(position),
        }
    }

    impl TraversalCallback for Recorder {
        fn pre_order(&self, item: TreeItem<'_>) {
            let at = self.clock.fetch_add(1, Ordering::SeqCst);
            assert!(self.pre.lock().insert(name(item), at).is_none());
        }

        fn post_order(&self, item: TreeItem<'_>) {
            let at = self.clock.fetch_add(1, Ordering::SeqCst);
            assert!(self.post.lock().insert(name(item), at).is_none());
        }
    }

    fn position(label: &str) -> Position {
        Position::new(dec!(1), ExternalId::new("T", label))
    }

    /// `fanout` children per node down to `depth`, two positions per node.
    fn tree(label: &str, depth: usize, fanout: usize) -> PortfolioNode {
        let mut node = PortfolioNode::new(label)
            .with_position(position(&format!("{label}.p0")))
            .with_position(position(&format!("{label}.p1")));
        if depth > 0 {
            for i in 0..fanout {
                node = node.with_child(tree(&format!("{label}.{i}"), depth - 1, fanout));
            }
        }
        node
    }

    fn check_order(node: &PortfolioNode, recorder: &Recorder) {
        let post = recorder.post.lock();
        let pre = recorder.pre.lock();
        let own = post[&node.name];
        assert!(pre[&node.name] < own);
        for child in &node.child_nodes {
            assert!(post[&child.name] < own, "{} finished before {}", node.name, child.name);
        }
        for position in &node.positions {
            assert!(post[&position_name(position)] < own);
        }
        drop(post);
        drop(pre);
        for child in &node.child_nodes {
            check_order(child, recorder);
        }
    }

    fn run(
        root: &Arc<PortfolioNode>,
        threads: usize,
        capacity: usize,
    ) -> (TraversalStats, Arc<Recorder>) {
        let pool = WorkerPool::new(threads, capacity).unwrap();
        let traverser = ParallelTraverser::new(Arc::new(pool));
        let recorder = Arc::new(Recorder::default());
        let stats = traverser.traverse(root, recorder.clone()).unwrap();
        (stats, recorder)
    }

    #[test]
    fn every_item_is_visited_once_in_order() {
        let root = Arc::new(tree("r", 3, 3));
        let (stats, recorder) = run(&root, 4, 64);
        assert_eq!(stats.nodes, root.node_count());
        assert_eq!(stats.positions, root.position_count());
        let total = root.node_count() + root.position_count();
        assert_eq!(recorder.pre.lock().len(), total);
        assert_eq!(recorder.post.lock().len(), total);
        check_order(&root, &recorder);
    }

    #[test]
    fn full_queue_runs_work_inline() {
        let root = Arc::new(tree("r", 4, 4));
        let (stats, recorder) = run(&root, 1, 1);
        assert_eq!(stats.nodes, root.node_count());
        check_order(&root, &recorder);
    }

    #[test]
    fn single_node_completes() {
        let root = Arc::new(PortfolioNode::new("alone"));
        let (stats, _) = run(&root, 2, 4);
        assert_eq!(stats, TraversalStats { nodes: 1, positions: 0 });
    }

    struct Exploding;

    impl TraversalCallback for Exploding {
        fn pre_order(&self, item: TreeItem<'_>) {
            if let TreeItem::Node(node) = item {
                if node.name == "r.1.0" {
                    panic!("bad node");
                }
            }
        }

        fn post_order(&self, _: TreeItem<'_>) {}
    }

    #[test]
    fn panicking_callback_fails_the_walk() {
        let root = Arc::new(tree("r", 2, 2));
        let traverser = ParallelTraverser::new(Arc::new(WorkerPool::new(2, 8).unwrap()));
        let err = traverser.traverse(&root, Arc::new(Exploding)).unwrap_err();
        assert!(matches!(err, Error::TraversalFailure(ref reason) if reason == "bad node"));
    }

    #[test]
    fn closed_pool_fails_the_walk() {
        let pool = Arc::new(WorkerPool::new(1, 4).unwrap());
        pool.shutdown();
        let traverser = ParallelTraverser::new(pool);
        let root = Arc::new(tree("r", 1, 2));
        let err = traverser
            .traverse(&root, Arc::new(Recorder::default()))
            .unwrap_err();
        assert!(matches!(err, Error::TraversalFailure(_)));
    }
}
