//! In-memory store implementation.
//!
//! Node tree semantics follow ZooKeeper: parents must exist, creates are not
//! upserts, deletes of missing or non-empty nodes fail, and child watches fire
//! once. A child watch also fires when a child's data is overwritten. Not
//! durable; for tests and single-process development.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::store::{parent_path, validate_path, StoreClient};
use crate::watch::{ChildWatch, EventType, WatchSender};

/// In-memory implementation of StoreClient.
///
/// The root node `/` always exists. Cloning yields a handle to the same tree.
#[derive(Clone)]
pub struct MemoryStore {
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    watches: WatchSender,
    offline: Arc<AtomicBool>,
    watches_suppressed: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create a store holding only the root node.
    pub fn new() -> Self {
        let mut data = BTreeMap::new();
        data.insert("/".to_string(), Vec::new());
        Self {
            data: Arc::new(RwLock::new(data)),
            watches: WatchSender::new(),
            offline: Arc::new(AtomicBool::new(false)),
            watches_suppressed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of nodes, including the root.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Make every call fail with `StoreError::Connection` while `offline`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// While suppressed, changes do not fire armed watches (they stay armed).
    pub fn set_watches_suppressed(&self, suppressed: bool) {
        self.watches_suppressed.store(suppressed, Ordering::SeqCst);
    }

    /// Armed, not yet fired child watches on `path`.
    pub fn active_watches(&self, path: &str) -> usize {
        self.watches.active(path)
    }

    /// Drop every armed watch, as a store session loss would.
    pub fn expire_watches(&self) {
        self.watches.close_all();
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("store is offline".to_string()));
        }
        Ok(())
    }

    fn fire(&self, path: &str, event_type: EventType) {
        if self.watches_suppressed.load(Ordering::SeqCst) {
            trace!(path = %path, ?event_type, "watch firing suppressed");
            return;
        }
        let fired = self.watches.fire(path, event_type);
        trace!(path = %path, ?event_type, fired, "fired child watches");
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn child_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{path}/")
    }
}

fn direct_children(data: &BTreeMap<String, Vec<u8>>, path: &str) -> Vec<String> {
    let prefix = child_prefix(path);
    data.range(prefix.clone()..)
        .map(|(k, _)| k)
        .take_while(|k| k.starts_with(&prefix))
        .filter_map(|k| {
            let rest = &k[prefix.len()..];
            (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
        })
        .collect()
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn exists(&self, path: &str) -> StoreResult<bool> {
        self.check_online()?;
        validate_path(path)?;
        Ok(self.data.read().contains_key(path))
    }

    async fn create(&self, path: &str, data: Vec<u8>) -> StoreResult<()> {
        self.check_online()?;
        validate_path(path)?;
        let parent = parent_path(path)
            .ok_or_else(|| StoreError::NodeExists(path.to_string()))?;

        {
            let mut nodes = self.data.write();
            if nodes.contains_key(path) {
                return Err(StoreError::NodeExists(path.to_string()));
            }
            if !nodes.contains_key(parent) {
                return Err(StoreError::NoNode(parent.to_string()));
            }
            nodes.insert(path.to_string(), data);
        }

        self.fire(parent, EventType::ChildrenChanged);
        Ok(())
    }

    async fn set(&self, path: &str, data: Vec<u8>) -> StoreResult<()> {
        self.check_online()?;
        validate_path(path)?;
        {
            let mut nodes = self.data.write();
            match nodes.get_mut(path) {
                Some(existing) => *existing = data,
                None => return Err(StoreError::NoNode(path.to_string())),
            }
        }

        if let Some(parent) = parent_path(path) {
            self.fire(parent, EventType::ChildrenChanged);
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.check_online()?;
        validate_path(path)?;
        let parent = parent_path(path)
            .ok_or_else(|| StoreError::NotEmpty(path.to_string()))?;

        {
            let mut nodes = self.data.write();
            if !nodes.contains_key(path) {
                return Err(StoreError::NoNode(path.to_string()));
            }
            if !direct_children(&nodes, path).is_empty() {
                return Err(StoreError::NotEmpty(path.to_string()));
            }
            nodes.remove(path);
        }

        self.fire(path, EventType::NodeDeleted);
        self.fire(parent, EventType::ChildrenChanged);
        Ok(())
    }

    async fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        self.check_online()?;
        validate_path(path)?;
        self.data
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NoNode(path.to_string()))
    }

    async fn children(&self, path: &str) -> StoreResult<Vec<String>> {
        self.check_online()?;
        validate_path(path)?;
        let nodes = self.data.read();
        if !nodes.contains_key(path) {
            return Err(StoreError::NoNode(path.to_string()));
        }
        Ok(direct_children(&nodes, path))
    }

    async fn watch_children(&self, path: &str) -> StoreResult<ChildWatch> {
        self.check_online()?;
        validate_path(path)?;
        // Hold the read lock while arming so no create/delete slips between
        // the existence check and the registration.
        let nodes = self.data.read();
        if !nodes.contains_key(path) {
            return Err(StoreError::NoNode(path.to_string()));
        }
        Ok(self.watches.arm(path))
    }
}
