//! Registry facade: registration, one-off lookups, and watches.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::error::{DiscoveryError, Result, StoreError};
use crate::instance::{instance_path, service_path, ServiceInstance};
use crate::service_set::ServiceSet;
use crate::snapshot::SnapshotReader;
use crate::store::{ensure_path, ensure_path_all, validate_path, StoreClient};
use crate::watch_loop::WatchLoop;
use crate::watcher::Watcher;

/// Service registry over a hierarchical store.
///
/// Instances live at `root/<service>/<instance id>` with their JSON record as
/// node data. Watches are shared per service: every `watch` call for the same
/// name attaches to one [`ServiceSet`] fed by one background watch loop.
pub struct Registry {
    store: Arc<dyn StoreClient>,
    config: RegistryConfig,
    reader: SnapshotReader,
    sets: Mutex<HashMap<String, Arc<ServiceSet>>>,
    cancel: CancellationToken,
}

impl Registry {
    pub fn new(store: Arc<dyn StoreClient>, config: RegistryConfig) -> Result<Self> {
        validate_path(&config.root_path)?;
        Ok(Self {
            reader: SnapshotReader::new(store.clone()),
            store,
            config,
            sets: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Write `instance` under its service, creating the root and service
    /// nodes as needed. Registering the same ID again overwrites the record.
    pub async fn register(&self, instance: &ServiceInstance) -> Result<()> {
        let service = service_path(&self.config.root_path, &instance.name)?;
        let path = instance_path(&self.config.root_path, instance)?;
        let data = instance.encode()?;

        ensure_path_all(self.store.as_ref(), &self.config.root_path).await?;
        ensure_path(self.store.as_ref(), &service, Vec::new()).await?;
        match self.store.create(&path, data.clone()).await {
            Ok(()) => {}
            Err(err) if err.is_node_exists() => self.store.set(&path, data).await?,
            Err(err) => return Err(err.into()),
        }

        info!(service = %instance.name, id = %instance.id, "registered instance");
        self.mark_dirty(&instance.name);
        Ok(())
    }

    /// Delete `instance`, giving up with `Cancelled` after the configured
    /// timeout. Deleting an instance that is not registered succeeds.
    pub async fn deregister(&self, instance: &ServiceInstance) -> Result<()> {
        self.deregister_until(instance, tokio::time::sleep(self.config.timeout))
            .await
    }

    /// Like [`deregister`](Self::deregister), but bounded by the caller's
    /// `cancel` token instead of the configured timeout.
    pub async fn deregister_with_cancel(
        &self,
        instance: &ServiceInstance,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.deregister_until(instance, cancel.cancelled()).await
    }

    /// The delete runs as its own task: when `abandon` wins, the caller gets
    /// `Cancelled` but the delete still completes in the background.
    async fn deregister_until(
        &self,
        instance: &ServiceInstance,
        abandon: impl Future<Output = ()>,
    ) -> Result<()> {
        let path = instance_path(&self.config.root_path, instance)?;
        let store = self.store.clone();
        let delete = {
            let path = path.clone();
            tokio::spawn(async move {
                let result = store.delete(&path).await;
                if let Err(err) = &result {
                    if !err.is_no_node() {
                        warn!(path = %path, error = %err, "delete instance node failed");
                    }
                }
                result
            })
        };

        let result = tokio::select! {
            joined = delete => joined
                .unwrap_or_else(|e| Err(StoreError::Connection(format!("delete task failed: {e}")))),
            _ = abandon => {
                debug!(path = %path, "deregister abandoned by caller");
                return Err(DiscoveryError::Cancelled);
            }
        };

        match result {
            Ok(()) => info!(service = %instance.name, id = %instance.id, "deregistered instance"),
            Err(err) if err.is_no_node() => {
                debug!(path = %path, "instance already deregistered");
            }
            Err(err) => return Err(err.into()),
        }
        self.mark_dirty(&instance.name);
        Ok(())
    }

    /// Current instances of `name`, read straight from the store.
    ///
    /// `ServiceUnavailable` if nothing was ever registered under `name`.
    pub async fn get_service(&self, name: &str) -> Result<Vec<ServiceInstance>> {
        let path = service_path(&self.config.root_path, name)?;
        self.reader.read(&path).await
    }

    /// Watch `name`. The first watch of a name spawns its watch loop on the
    /// calling Tokio runtime; later ones share it. A loop that died because
    /// its watch could not be armed is replaced.
    ///
    /// Nothing is written to the store: until `name` has a service node the
    /// watcher sees an empty list.
    pub async fn watch(&self, name: &str) -> Result<Watcher> {
        if self.cancel.is_cancelled() {
            return Err(DiscoveryError::Cancelled);
        }
        let path = service_path(&self.config.root_path, name)?;

        let mut sets = self.sets.lock();
        if let Some(set) = sets.get(name).filter(|set| !set.is_failed()) {
            return Ok(Watcher::attach(name, set));
        }

        let set = Arc::new(ServiceSet::new(path));
        WatchLoop::new(
            self.store.clone(),
            set.clone(),
            self.config.resync_interval,
            self.cancel.child_token(),
        )
        .spawn();
        debug!(service = %name, "started watch loop");
        // Attach before releasing the lock so the set is never observed
        // without its first subscriber.
        let watcher = Watcher::attach(name, &set);
        sets.insert(name.to_string(), set);
        Ok(watcher)
    }

    /// Number of services with a watch loop.
    pub fn watched_services(&self) -> usize {
        self.sets.lock().len()
    }

    /// Stop every watch loop; pending and future `next` calls get `Cancelled`.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        for (_, set) in self.sets.lock().drain() {
            set.fail(DiscoveryError::Cancelled);
        }
    }

    fn mark_dirty(&self, name: &str) {
        if let Some(set) = self.sets.lock().get(name) {
            set.mark_dirty();
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
