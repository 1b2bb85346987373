//! Latest known instance list for one service path, plus its subscribers.
//!
//! Delivery is push-to-wake: `update` bumps the generation and wakes every
//! subscriber that is behind; the subscriber then reads whatever snapshot is
//! current. A slow watcher therefore skips intermediate generations instead
//! of building a backlog.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::error::DiscoveryError;
use crate::instance::ServiceInstance;

/// Immutable, shared instance list.
pub type Snapshot = Arc<[ServiceInstance]>;

/// Outcome of a subscriber checking for a new delivery.
#[derive(Debug)]
pub(crate) enum Delivery {
    /// A generation newer than the last delivered one.
    Ready(u64, Snapshot),
    /// Nothing new; wait for a wake-up.
    Pending,
    /// The set failed or was closed; no more updates will come.
    Failed(DiscoveryError),
    /// The subscriber is no longer attached.
    Detached,
}

struct Subscription {
    last_delivered: u64,
    wake: Arc<Notify>,
}

struct SetState {
    instances: Snapshot,
    generation: u64,
    subscribers: HashMap<u64, Subscription>,
    next_id: u64,
    failure: Option<DiscoveryError>,
}

/// Latest instance list of one service path, shared by every watcher of it.
///
/// Each published list gets the next generation. Subscribers are woken
/// through their own `Notify` and pull the newest snapshot, so a slow
/// subscriber skips intermediate generations instead of queueing them.
pub struct ServiceSet {
    path: String,
    state: Mutex<SetState>,
    /// Pending "re-check now" signal for the watch loop. `Notify` keeps at
    /// most one permit, so repeated marks collapse into one.
    dirty: Notify,
}

impl ServiceSet {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(SetState {
                instances: Arc::from(Vec::new()),
                generation: 0,
                subscribers: HashMap::new(),
                next_id: 1,
                failure: None,
            }),
            dirty: Notify::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current generation; 0 until the first snapshot is published.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn snapshot(&self) -> (u64, Snapshot) {
        let state = self.state.lock();
        (state.generation, state.instances.clone())
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// True once a terminal failure was recorded.
    pub fn is_failed(&self) -> bool {
        self.state.lock().failure.is_some()
    }

    /// Replace the snapshot and wake every subscriber that is behind.
    ///
    /// After the first publish, an update equal to the current set (ignoring
    /// order) is dropped and returns `None`. Otherwise returns the new
    /// generation.
    pub fn update(&self, instances: Vec<ServiceInstance>) -> Option<u64> {
        let mut state = self.state.lock();
        if state.failure.is_some() {
            return None;
        }
        if state.generation > 0 && same_set(&state.instances, &instances) {
            trace!(path = %self.path, generation = state.generation, "snapshot unchanged");
            return None;
        }

        state.instances = Arc::from(instances);
        state.generation += 1;
        let generation = state.generation;
        for sub in state.subscribers.values() {
            if sub.last_delivered < generation {
                sub.wake.notify_one();
            }
        }
        debug!(
            path = %self.path,
            generation,
            instances = state.instances.len(),
            subscribers = state.subscribers.len(),
            "published snapshot"
        );
        Some(generation)
    }

    /// Record a terminal failure and wake every subscriber so it sees it.
    ///
    /// The first failure wins.
    pub fn fail(&self, err: DiscoveryError) {
        let mut state = self.state.lock();
        if state.failure.is_some() {
            return;
        }
        debug!(path = %self.path, error = %err, "service set failed");
        state.failure = Some(err);
        for sub in state.subscribers.values() {
            sub.wake.notify_one();
        }
    }

    /// Ask the watch loop to re-read the snapshot.
    pub fn mark_dirty(&self) {
        self.dirty.notify_one();
    }

    pub(crate) async fn dirtied(&self) {
        self.dirty.notified().await
    }

    pub(crate) fn attach(&self) -> (u64, Arc<Notify>) {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        let wake = Arc::new(Notify::new());
        state.subscribers.insert(
            id,
            Subscription {
                last_delivered: 0,
                wake: wake.clone(),
            },
        );
        trace!(path = %self.path, subscriber = id, "attached");
        (id, wake)
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub(crate) fn detach(&self, id: u64) -> bool {
        let removed = self.state.lock().subscribers.remove(&id);
        if let Some(sub) = &removed {
            // Release a pending `next` so it observes the detach.
            sub.wake.notify_one();
            trace!(path = %self.path, subscriber = id, "detached");
        }
        removed.is_some()
    }

    pub(crate) fn poll(&self, id: u64) -> Delivery {
        let mut state = self.state.lock();
        let generation = state.generation;
        let instances = state.instances.clone();
        let Some(sub) = state.subscribers.get_mut(&id) else {
            return Delivery::Detached;
        };
        if sub.last_delivered < generation {
            sub.last_delivered = generation;
            return Delivery::Ready(generation, instances);
        }
        match &state.failure {
            Some(err) => Delivery::Failed(err.clone()),
            None => Delivery::Pending,
        }
    }
}

/// Equal as sets of records, ignoring order. IDs are unique within a service.
fn same_set(current: &[ServiceInstance], next: &[ServiceInstance]) -> bool {
    if current.len() != next.len() {
        return false;
    }
    let by_id: BTreeMap<&str, &ServiceInstance> =
        current.iter().map(|inst| (inst.id.as_str(), inst)).collect();
    by_id.len() == next.len()
        && next
            .iter()
            .all(|inst| by_id.get(inst.id.as_str()) == Some(&inst))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(id: &str) -> ServiceInstance {
        ServiceInstance::new(id, "svc")
    }

    #[test]
    fn test_first_update_always_publishes() {
        let set = ServiceSet::new("/microservices/svc");
        assert_eq!(set.generation(), 0);
        assert_eq!(set.update(Vec::new()), Some(1));
        assert_eq!(set.update(Vec::new()), None);
        assert_eq!(set.generation(), 1);
    }

    #[test]
    fn test_reordered_update_is_unchanged() {
        let set = ServiceSet::new("/p");
        set.update(vec![inst("a"), inst("b")]);
        assert_eq!(set.update(vec![inst("b"), inst("a")]), None);
        assert_eq!(set.update(vec![inst("a")]), Some(2));
        assert_eq!(
            set.update(vec![inst("a").with_version("v2")]),
            Some(3),
            "changed record data is a new generation"
        );
    }

    #[test]
    fn test_poll_delivers_each_generation_once() {
        let set = ServiceSet::new("/p");
        let (id, _wake) = set.attach();
        assert!(matches!(set.poll(id), Delivery::Pending));

        set.update(vec![inst("a")]);
        assert!(matches!(set.poll(id), Delivery::Ready(1, ref s) if s.len() == 1));
        assert!(matches!(set.poll(id), Delivery::Pending));
    }

    #[test]
    fn test_slow_subscriber_skips_to_latest() {
        let set = ServiceSet::new("/p");
        let (id, _wake) = set.attach();
        set.update(vec![inst("a")]);
        set.update(vec![inst("a"), inst("b")]);
        set.update(vec![inst("b")]);

        match set.poll(id) {
            Delivery::Ready(generation, snapshot) => {
                assert_eq!(generation, 3);
                assert_eq!(snapshot[0].id, "b");
            }
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[test]
    fn test_late_subscriber_gets_current_snapshot() {
        let set = ServiceSet::new("/p");
        set.update(vec![inst("a")]);
        set.update(vec![inst("b")]);
        let (id, _wake) = set.attach();
        assert!(matches!(set.poll(id), Delivery::Ready(2, _)));
    }

    #[test]
    fn test_detach() {
        let set = ServiceSet::new("/p");
        let (id, _wake) = set.attach();
        assert_eq!(set.subscriber_count(), 1);
        assert!(set.detach(id));
        assert!(!set.detach(id));
        set.update(vec![inst("a")]);
        assert!(matches!(set.poll(id), Delivery::Detached));
    }

    #[test]
    fn test_failure_after_pending_delivery() {
        let set = ServiceSet::new("/p");
        let (id, _wake) = set.attach();
        set.update(vec![inst("a")]);
        set.fail(DiscoveryError::Cancelled);
        set.fail(DiscoveryError::ServiceUnavailable("ignored".to_string()));

        assert!(matches!(set.poll(id), Delivery::Ready(1, _)));
        assert!(matches!(
            set.poll(id),
            Delivery::Failed(DiscoveryError::Cancelled)
        ));
        assert_eq!(set.update(vec![inst("b")]), None);
    }

    #[tokio::test]
    async fn test_update_wakes_subscriber() {
        let set = ServiceSet::new("/p");
        let (_id, wake) = set.attach();
        set.update(vec![inst("a")]);
        // The permit stored by `update` releases the wait immediately.
        tokio::time::timeout(std::time::Duration::from_secs(1), wake.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dirty_marks_coalesce() {
        let set = ServiceSet::new("/p");
        set.mark_dirty();
        set.mark_dirty();
        set.mark_dirty();
        tokio::time::timeout(std::time::Duration::from_millis(100), set.dirtied())
            .await
            .unwrap();
        let second =
            tokio::time::timeout(std::time::Duration::from_millis(50), set.dirtied()).await;
        assert!(second.is_err(), "three marks must collapse into one signal");
    }
}
