//! Identifier interning for a single materialization.

use std::collections::HashMap;

use super::id::{ObjectId, UniqueId};

/// Returns one shared instance for every structurally equal id it sees.
///
/// A large tree repeats the same portfolio and parent ids on every node and
/// position; threading one deduplicator through the read keeps a single
/// allocation per distinct id.
#[derive(Debug, Default)]
pub struct IdDeduplicator {
    objects: HashMap<ObjectId, ObjectId>,
    uniques: HashMap<UniqueId, UniqueId>,
}

impl IdDeduplicator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&mut self, id: ObjectId) -> ObjectId {
        self.objects.entry(id.clone()).or_insert(id).clone()
    }

    pub fn unique(&mut self, id: UniqueId) -> UniqueId {
        self.uniques.entry(id.clone()).or_insert(id).clone()
    }

    /// Number of distinct ids seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len() + self.uniques.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_ids_become_pointer_identical() {
        let mut dedup = IdDeduplicator::new();
        let a: UniqueId = "DbPrt~1~0".parse().unwrap();
        let b: UniqueId = "DbPrt~1~0".parse().unwrap();
        assert!(!a.ptr_eq(&b));

        let first = dedup.unique(a);
        let second = dedup.unique(b);
        assert!(first.ptr_eq(&second));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn distinct_ids_are_kept_apart() {
        let mut dedup = IdDeduplicator::new();
        let a = dedup.object("DbNod~1".parse().unwrap());
        let b = dedup.object("DbNod~2".parse().unwrap());
        assert_ne!(a, b);
        assert_eq!(dedup.len(), 2);
    }
}
