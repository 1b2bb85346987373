//! Resolves a service path to its current instance list.

use std::sync::Arc;
use tracing::debug;

use crate::error::{DiscoveryError, Result};
use crate::instance::{join, ServiceInstance};
use crate::store::StoreClient;

#[derive(Clone)]
pub struct SnapshotReader {
    store: Arc<dyn StoreClient>,
}

impl SnapshotReader {
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        Self { store }
    }

    /// List the children of `service_path` and decode each one, in listing order.
    ///
    /// A missing service path is `ServiceUnavailable`. A record that fails to
    /// decode aborts the whole read. A child deleted between the listing and
    /// its read is left out, since the listing already raced with its removal.
    pub async fn read(&self, service_path: &str) -> Result<Vec<ServiceInstance>> {
        let ids = match self.store.children(service_path).await {
            Ok(ids) => ids,
            Err(err) if err.is_no_node() => {
                return Err(DiscoveryError::ServiceUnavailable(service_path.to_string()))
            }
            Err(err) => return Err(err.into()),
        };

        let mut instances = Vec::with_capacity(ids.len());
        for id in ids {
            let path = join(service_path, &id);
            let bytes = match self.store.get(&path).await {
                Ok(bytes) => bytes,
                Err(err) if err.is_no_node() => {
                    debug!(path = %path, "instance vanished during snapshot read");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            instances.push(ServiceInstance::decode(&path, &bytes)?);
        }
        Ok(instances)
    }
}
