//! Change notifications published by the store after each committed write.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::domain::{Instant, ObjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Changed,
    Removed,
}

/// One object's history moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub change_type: ChangeType,
    pub object_id: ObjectId,
    /// Start of the version interval now current, if any.
    pub version_from: Option<Instant>,
    /// End of the version interval that was closed, if any.
    pub version_to: Option<Instant>,
    /// When the write happened.
    pub version_instant: Instant,
}

/// Synchronous receiver of change events.
///
/// Called on the writer's thread after commit, so implementations must be
/// quick and must not call back into the store's write path.
pub trait ChangeListener: Send + Sync {
    fn entity_changed(&self, event: &ChangeEvent);
}

/// Fan-out point for change events: registered listeners plus a broadcast
/// stream for async subscribers.
pub struct ChangeManager {
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
    tx: broadcast::Sender<ChangeEvent>,
}

impl std::fmt::Debug for ChangeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeManager")
            .field("listeners", &self.listeners.read().len())
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

impl ChangeManager {
    pub const DEFAULT_CAPACITY: usize = 1024;

    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Broadcast buffer of `capacity` events; slow subscribers observe a lag
    /// error rather than blocking writers.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            listeners: RwLock::new(Vec::new()),
            tx,
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners.write().push(listener);
    }

    /// Returns true if the listener was registered.
    pub fn remove_listener(&self, listener: &Arc<dyn ChangeListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ChangeEvent) {
        trace!(object_id = %event.object_id, change = ?event.change_type, "Publishing change");
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener.entity_changed(&event);
        }
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

impl Default for ChangeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ChangeEvent>>);

    impl ChangeListener for Recorder {
        fn entity_changed(&self, event: &ChangeEvent) {
            self.0.lock().push(event.clone());
        }
    }

    fn event(change_type: ChangeType) -> ChangeEvent {
        ChangeEvent {
            change_type,
            object_id: "DbPrt~1".parse().unwrap(),
            version_from: None,
            version_to: None,
            version_instant: Utc::now(),
        }
    }

    #[test]
    fn listeners_receive_events_until_removed() {
        let manager = ChangeManager::new();
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn ChangeListener> = recorder.clone();
        manager.add_listener(listener.clone());

        manager.publish(event(ChangeType::Added));
        assert!(manager.remove_listener(&listener));
        manager.publish(event(ChangeType::Removed));

        let seen = recorder.0.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].change_type, ChangeType::Added);
        assert!(!manager.remove_listener(&listener));
    }

    #[tokio::test]
    async fn subscribers_receive_broadcast() {
        let manager = ChangeManager::with_capacity(4);
        let mut rx = manager.subscribe();
        manager.publish(event(ChangeType::Changed));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.change_type, ChangeType::Changed);
    }

    #[test]
    fn publish_without_subscribers_is_harmless() {
        ChangeManager::new().publish(event(ChangeType::Added));
    }
}
