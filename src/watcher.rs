//! Subscriber handle returned by `Registry::watch`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;

use crate::error::{DiscoveryError, Result};
use crate::instance::ServiceInstance;
use crate::service_set::{Delivery, ServiceSet};

/// Blocking view of one service's instance list.
///
/// The first `next` returns the snapshot current at attach time (waiting for
/// the initial read if there is none yet); each later call waits for a newer
/// generation. `next` and `stop` take `&self`, so a watcher shared behind an
/// `Arc` can be stopped while another task is waiting in `next`.
pub struct Watcher {
    id: u64,
    service: String,
    set: Weak<ServiceSet>,
    wake: Arc<Notify>,
    stopped: AtomicBool,
    generation: AtomicU64,
}

impl Watcher {
    pub(crate) fn attach(service: impl Into<String>, set: &Arc<ServiceSet>) -> Self {
        let (id, wake) = set.attach();
        Self {
            id,
            service: service.into(),
            set: Arc::downgrade(set),
            wake,
            stopped: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Generation of the last snapshot returned by `next` (0 before the first).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Wait for the next snapshot newer than the last one returned.
    ///
    /// Fails with `Cancelled` once stopped or after the registry shut down,
    /// and with the loop's error if the watch could not be armed.
    pub async fn next(&self) -> Result<Vec<ServiceInstance>> {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return Err(DiscoveryError::Cancelled);
            }
            let set = self.set.upgrade().ok_or(DiscoveryError::Cancelled)?;
            match set.poll(self.id) {
                Delivery::Ready(generation, snapshot) => {
                    self.generation.store(generation, Ordering::SeqCst);
                    return Ok(snapshot.to_vec());
                }
                Delivery::Failed(err) => return Err(err),
                Delivery::Detached => return Err(DiscoveryError::Cancelled),
                Delivery::Pending => {}
            }
            drop(set);
            self.wake.notified().await;
        }
    }

    /// `next` bounded by `timeout`; an elapsed deadline is `Cancelled`.
    pub async fn next_timeout(&self, timeout: Duration) -> Result<Vec<ServiceInstance>> {
        tokio::time::timeout(timeout, self.next())
            .await
            .map_err(|_| DiscoveryError::Cancelled)?
    }

    /// Detach from the service. Idempotent.
    pub fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(set) = self.set.upgrade() {
            set.detach(self.id);
        }
        // Also release a `next` waiting on a set that is already gone.
        self.wake.notify_one();
        Ok(())
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id)
            .field("service", &self.service)
            .field("generation", &self.generation())
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish()
    }
}
