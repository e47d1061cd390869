//! Nested-set encoding of node hierarchies.
//!
//! A tree is held in an index-addressed arena while it is being built or
//! edited. [`TreeArena::encode`] assigns pre-order `(left, right)` bounds;
//! [`NestedSetDecoder`] rebuilds the arena from rows ordered by `left`.

use crate::error::{Error, Result};

/// Pre-order bounds of one node. Every descendant's bounds lie strictly
/// inside its ancestors' bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bounds {
    pub left: i64,
    pub right: i64,
}

impl Bounds {
    #[must_use]
    pub fn new(left: i64, right: i64) -> Self {
        Self { left, right }
    }

    #[must_use]
    pub fn contains(&self, other: &Bounds) -> bool {
        self.left < other.left && other.right < self.right
    }

    /// Number of nodes in the subtree these bounds describe.
    #[must_use]
    pub fn subtree_size(&self) -> i64 {
        (self.right - self.left + 1) / 2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIdx(usize);

impl NodeIdx {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
struct Slot<T> {
    value: T,
    parent: Option<NodeIdx>,
    children: Vec<NodeIdx>,
    attached: bool,
}

/// Arena-backed ordered tree. Parent links are indices.
#[derive(Debug, Clone)]
pub struct TreeArena<T> {
    slots: Vec<Slot<T>>,
}

/// One node of an encoded tree, in pre-order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedNode {
    pub idx: NodeIdx,
    pub parent: Option<NodeIdx>,
    pub depth: usize,
    pub bounds: Bounds,
}

impl<T> TreeArena<T> {
    pub fn with_root(value: T) -> Self {
        Self {
            slots: vec![Slot {
                value,
                parent: None,
                children: Vec::new(),
                attached: true,
            }],
        }
    }

    #[must_use]
    pub fn root(&self) -> NodeIdx {
        NodeIdx(0)
    }

    /// # Errors
    /// Returns [`Error::InvalidArgument`] if `parent` is not attached.
    pub fn push_child(&mut self, parent: NodeIdx, value: T) -> Result<NodeIdx> {
        self.check_attached(parent)?;
        let idx = NodeIdx(self.slots.len());
        self.slots.push(Slot {
            value,
            parent: Some(parent),
            children: Vec::new(),
            attached: true,
        });
        self.slots[parent.0].children.push(idx);
        Ok(idx)
    }

    /// Unlink a subtree. Its slots stay allocated but are skipped by every
    /// traversal.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] for the root or a detached node.
    pub fn detach(&mut self, idx: NodeIdx) -> Result<()> {
        self.check_attached(idx)?;
        let parent = self.slots[idx.0]
            .parent
            .ok_or_else(|| Error::InvalidArgument("cannot detach the root node".into()))?;
        self.slots[parent.0].children.retain(|child| *child != idx);
        let mut stack = vec![idx];
        while let Some(next) = stack.pop() {
            let slot = &mut self.slots[next.0];
            slot.attached = false;
            stack.extend(slot.children.iter().copied());
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, idx: NodeIdx) -> Option<&T> {
        self.slots
            .get(idx.0)
            .filter(|slot| slot.attached)
            .map(|slot| &slot.value)
    }

    pub fn get_mut(&mut self, idx: NodeIdx) -> Option<&mut T> {
        self.slots
            .get_mut(idx.0)
            .filter(|slot| slot.attached)
            .map(|slot| &mut slot.value)
    }

    #[must_use]
    pub fn parent(&self, idx: NodeIdx) -> Option<NodeIdx> {
        self.slots.get(idx.0).and_then(|slot| slot.parent)
    }

    #[must_use]
    pub fn children(&self, idx: NodeIdx) -> &[NodeIdx] {
        match self.slots.get(idx.0) {
            Some(slot) => &slot.children,
            None => &[],
        }
    }

    /// First attached node, in pre-order, matching `pred`.
    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<NodeIdx> {
        self.pre_order()
            .into_iter()
            .find(|idx| pred(&self.slots[idx.0].value))
    }

    /// Attached nodes in pre-order.
    #[must_use]
    pub fn pre_order(&self) -> Vec<NodeIdx> {
        let mut out = Vec::with_capacity(self.slots.len());
        let mut stack = vec![self.root()];
        while let Some(idx) = stack.pop() {
            out.push(idx);
            stack.extend(self.slots[idx.0].children.iter().rev().copied());
        }
        out
    }

    /// Assign nested-set bounds by a depth-first walk.
    ///
    /// The counter starts at 1 and is consumed once on entry (`left`) and
    /// once after all descendants (`right`). Output is in pre-order.
    #[must_use]
    pub fn encode(&self) -> Vec<EncodedNode> {
        enum Step {
            Enter(NodeIdx, usize),
            Exit(usize),
        }

        let mut out: Vec<EncodedNode> = Vec::with_capacity(self.slots.len());
        let mut counter = 1_i64;
        let mut stack = vec![Step::Enter(self.root(), 0)];
        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(idx, depth) => {
                    let position = out.len();
                    out.push(EncodedNode {
                        idx,
                        parent: self.slots[idx.0].parent,
                        depth,
                        bounds: Bounds::new(counter, 0),
                    });
                    counter += 1;
                    stack.push(Step::Exit(position));
                    for child in self.slots[idx.0].children.iter().rev() {
                        stack.push(Step::Enter(*child, depth + 1));
                    }
                }
                Step::Exit(position) => {
                    out[position].bounds.right = counter;
                    counter += 1;
                }
            }
        }
        out
    }

    /// Fold the tree bottom-up into another representation.
    ///
    /// `build` receives each node's value with its already-built children in
    /// order. Detached subtrees are dropped. Children always sit at higher
    /// indices than their parents, so one reverse sweep suffices.
    ///
    /// # Errors
    /// Returns [`Error::InvariantViolation`] if the arena has no root.
    pub fn fold<R>(self, mut build: impl FnMut(T, Vec<R>) -> R) -> Result<R> {
        let mut built: Vec<Option<R>> = (0..self.slots.len()).map(|_| None).collect();
        for (idx, slot) in self.slots.into_iter().enumerate().rev() {
            if !slot.attached {
                continue;
            }
            let kids = slot
                .children
                .iter()
                .filter_map(|child| built[child.0].take())
                .collect();
            built[idx] = Some(build(slot.value, kids));
        }
        built
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| Error::InvariantViolation("tree has no root".into()))
    }

    fn check_attached(&self, idx: NodeIdx) -> Result<()> {
        match self.slots.get(idx.0) {
            Some(slot) if slot.attached => Ok(()),
            _ => Err(Error::InvalidArgument(format!(
                "node {} is not part of the tree",
                idx.0
            ))),
        }
    }
}

/// Streaming decoder for rows ordered by `left` ascending.
///
/// Keeps a stack of `(right, node)` for the current root-to-leaf path, so
/// memory is proportional to depth rather than size.
#[derive(Debug)]
pub struct NestedSetDecoder<T> {
    arena: Option<TreeArena<T>>,
    stack: Vec<(i64, NodeIdx)>,
    last_left: i64,
}

impl<T> Default for NestedSetDecoder<T> {
    fn default() -> Self {
        Self {
            arena: None,
            stack: Vec::new(),
            last_left: i64::MIN,
        }
    }
}

impl<T> NestedSetDecoder<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the next row. The first row becomes the root.
    ///
    /// # Errors
    /// Returns [`Error::InvariantViolation`] if rows arrive out of order, if
    /// bounds are inverted, if a row escapes its parent's bounds, or if a
    /// second root appears.
    pub fn push(&mut self, bounds: Bounds, value: T) -> Result<NodeIdx> {
        if bounds.left <= self.last_left {
            return Err(Error::InvariantViolation(format!(
                "tree rows out of order: left {} after {}",
                bounds.left, self.last_left
            )));
        }
        if bounds.right <= bounds.left {
            return Err(Error::InvariantViolation(format!(
                "inverted tree bounds ({}, {})",
                bounds.left, bounds.right
            )));
        }
        self.last_left = bounds.left;

        while matches!(self.stack.last(), Some((right, _)) if *right < bounds.left) {
            self.stack.pop();
        }

        let idx = match (self.stack.last().copied(), self.arena.as_mut()) {
            (None, None) => {
                self.arena = Some(TreeArena::with_root(value));
                NodeIdx(0)
            }
            (Some((parent_right, parent)), Some(arena)) => {
                if bounds.right >= parent_right {
                    return Err(Error::InvariantViolation(format!(
                        "tree bounds ({}, {}) overlap their parent",
                        bounds.left, bounds.right
                    )));
                }
                arena.push_child(parent, value)?
            }
            _ => {
                return Err(Error::InvariantViolation(format!(
                    "tree row ({}, {}) lies outside the root",
                    bounds.left, bounds.right
                )))
            }
        };
        self.stack.push((bounds.right, idx));
        Ok(idx)
    }

    /// # Errors
    /// Returns [`Error::InvariantViolation`] if no rows were pushed.
    pub fn finish(self) -> Result<TreeArena<T>> {
        self.arena
            .ok_or_else(|| Error::InvariantViolation("tree has no nodes".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sample() -> TreeArena<&'static str> {
        let mut tree = TreeArena::with_root("root");
        let a = tree.push_child(tree.root(), "a").unwrap();
        tree.push_child(a, "a1").unwrap();
        tree.push_child(a, "a2").unwrap();
        tree.push_child(tree.root(), "b").unwrap();
        tree
    }

    #[test]
    fn encode_assigns_pre_order_bounds() {
        let tree = sample();
        let encoded = tree.encode();
        let rows: Vec<_> = encoded
            .iter()
            .map(|n| (*tree.get(n.idx).unwrap(), n.bounds.left, n.bounds.right, n.depth))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("root", 1, 10, 0),
                ("a", 2, 7, 1),
                ("a1", 3, 4, 2),
                ("a2", 5, 6, 2),
                ("b", 8, 9, 1),
            ]
        );
        assert_eq!(encoded[0].bounds.subtree_size(), 5);
    }

    #[test]
    fn detach_removes_subtree_from_encoding() {
        let mut tree = sample();
        let a = tree.find(|v| *v == "a").unwrap();
        tree.detach(a).unwrap();
        let names: Vec<_> = tree
            .encode()
            .iter()
            .map(|n| *tree.get(n.idx).unwrap())
            .collect();
        assert_eq!(names, vec!["root", "b"]);
        assert!(tree.get(a).is_none());
        assert!(tree.detach(tree.root()).is_err());
        assert!(tree.push_child(a, "orphan").is_err());
    }

    #[test]
    fn decoder_rebuilds_parent_links() {
        let tree = sample();
        let mut decoder = NestedSetDecoder::new();
        for node in tree.encode() {
            decoder.push(node.bounds, *tree.get(node.idx).unwrap()).unwrap();
        }
        let decoded = decoder.finish().unwrap();
        let a = decoded.find(|v| *v == "a").unwrap();
        let names: Vec<_> = decoded
            .children(a)
            .iter()
            .map(|c| *decoded.get(*c).unwrap())
            .collect();
        assert_eq!(names, vec!["a1", "a2"]);
        assert_eq!(decoded.parent(a), Some(decoded.root()));
    }

    #[test]
    fn decoder_rejects_malformed_streams() {
        let mut out_of_order = NestedSetDecoder::new();
        out_of_order.push(Bounds::new(1, 4), ()).unwrap();
        out_of_order.push(Bounds::new(2, 3), ()).unwrap();
        assert!(out_of_order.push(Bounds::new(2, 3), ()).is_err());

        let mut two_roots = NestedSetDecoder::new();
        two_roots.push(Bounds::new(1, 2), ()).unwrap();
        assert!(two_roots.push(Bounds::new(3, 4), ()).is_err());

        let mut overlapping = NestedSetDecoder::new();
        overlapping.push(Bounds::new(1, 4), ()).unwrap();
        assert!(overlapping.push(Bounds::new(2, 6), ()).is_err());

        assert!(NestedSetDecoder::<()>::new().finish().is_err());
    }

    #[derive(Debug, PartialEq)]
    struct Shape(Vec<Shape>);

    fn random_tree(rng: &mut StdRng) -> TreeArena<u32> {
        let mut tree = TreeArena::with_root(0);
        let mut frontier = vec![(tree.root(), 0)];
        let mut label = 1;
        while let Some((idx, depth)) = frontier.pop() {
            if depth >= 10 {
                continue;
            }
            let width = if depth < 3 { rng.gen_range(0..=8) } else { rng.gen_range(0..=2) };
            for _ in 0..width {
                if label > 2_000 {
                    break;
                }
                let child = tree.push_child(idx, label).unwrap();
                label += 1;
                frontier.push((child, depth + 1));
            }
        }
        tree
    }

    fn shape(tree: TreeArena<u32>) -> (Vec<u32>, Shape) {
        let labels = tree.pre_order().iter().map(|i| *tree.get(*i).unwrap()).collect();
        (labels, tree.fold(|_, kids| Shape(kids)).unwrap())
    }

    #[test]
    fn random_trees_survive_encode_and_decode() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let tree = random_tree(&mut rng);
            let encoded = tree.encode();
            for node in &encoded {
                if let Some(parent) = node.parent {
                    let parent_bounds = encoded.iter().find(|n| n.idx == parent).unwrap().bounds;
                    assert!(parent_bounds.contains(&node.bounds));
                }
            }

            let mut decoder = NestedSetDecoder::new();
            for node in &encoded {
                decoder.push(node.bounds, *tree.get(node.idx).unwrap()).unwrap();
            }
            let decoded = decoder.finish().unwrap();
            assert_eq!(shape(decoded), shape(tree));
        }
    }
}
