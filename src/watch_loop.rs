//! Re-arm / resolve cycle for one service path.
//!
//! ```text
//!   Idle ──arm──▶ Armed ──fired──▶ Firing ──▶ Resolving ──re-arm──▶ Armed ...
//!                   │  ▲                          ▲
//!                   │  └──────── read ────────────┘  (poke / resync: watch
//!                   │                                 still armed, read only)
//!                   └──cancel──▶ Cancelled
//! ```
//!
//! The watch is always armed *before* the snapshot is read, so a change that
//! lands after the read fires the armed watch and is picked up on the next
//! turn. A watch that has not fired is never re-registered, which keeps one
//! outstanding registration per path.
//!
//! Until the service node exists the watch sits on its nearest existing
//! ancestor and an empty list is published; the loop never writes to the
//! store.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::error::{DiscoveryError, StoreError, StoreResult};
use crate::service_set::ServiceSet;
use crate::snapshot::SnapshotReader;
use crate::store::{parent_path, StoreClient};
use crate::watch::{ChildWatch, WatchEvent};

/// Delay between re-arm attempts after a retryable store failure, used when
/// no resync interval is configured.
pub const REARM_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Phase of a [`WatchLoop`], reported in `trace!` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Started, no watch registered yet.
    Idle,
    /// A one-shot watch is registered and has not fired.
    Armed,
    /// The watch fired and must be registered again.
    Firing,
    /// Reading the snapshot.
    Resolving,
    /// Terminal; the loop has exited.
    Cancelled,
}

/// Why the loop woke up.
#[derive(Debug)]
enum Trigger {
    Fired(WatchEvent),
    Dirty,
    Resync,
    Cancelled,
}

/// A registered watch and whether it sits on the service path itself or on
/// an ancestor waiting for the service node to appear.
struct ArmedWatch {
    watch: ChildWatch,
    on_service: bool,
}

/// Background task keeping one [`ServiceSet`] in step with the store.
///
/// Only the first watch registration is fatal when it fails. Later re-arms
/// that fail with a retryable error are retried on the resync tick (or every
/// [`REARM_RETRY_DELAY`]).
pub struct WatchLoop {
    store: Arc<dyn StoreClient>,
    reader: SnapshotReader,
    set: Arc<ServiceSet>,
    resync_interval: Option<Duration>,
    cancel: CancellationToken,
}

impl WatchLoop {
    pub fn new(
        store: Arc<dyn StoreClient>,
        set: Arc<ServiceSet>,
        resync_interval: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reader: SnapshotReader::new(store.clone()),
            store,
            set,
            resync_interval,
            cancel,
        }
    }

    /// Run the loop on the current Tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let path = self.set.path().to_string();
        let mut state = LoopState::Idle;
        let mut armed: Option<ArmedWatch> = None;
        let mut ever_armed = false;
        debug!(path = %path, "watch loop started");

        loop {
            if armed.is_none() {
                let arm = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    arm = self.arm(&path) => arm,
                };
                match arm {
                    Ok(current) => {
                        if !current.on_service {
                            debug!(path = %path, watching = %current.watch.path(), "service path missing; watching ancestor");
                        }
                        armed = Some(current);
                        ever_armed = true;
                        state = self.transition(&path, state, LoopState::Armed);
                    }
                    Err(err) if ever_armed && err.is_retryable() => {
                        warn!(path = %path, error = %err, "re-arm failed; will retry");
                    }
                    Err(err) => {
                        error!(path = %path, error = %err, "cannot arm watch; loop stopped");
                        self.set.fail(watch_failed(&path, err));
                        return;
                    }
                }
            }

            if let Some(on_service) = armed.as_ref().map(|a| a.on_service) {
                state = self.transition(&path, state, LoopState::Resolving);
                let appeared = self.resolve(&path, on_service).await;
                state = self.transition(&path, state, LoopState::Armed);
                if appeared {
                    // Move the watch from the ancestor onto the service node.
                    armed = None;
                    continue;
                }
            }

            let retrying = armed.is_none();
            match self.wait(armed.as_mut().map(|a| &mut a.watch), retrying).await {
                Trigger::Fired(event) => {
                    trace!(path = %path, event_type = ?event.event_type, "watch fired");
                    armed = None;
                    state = self.transition(&path, state, LoopState::Firing);
                }
                Trigger::Dirty => trace!(path = %path, "local change signalled"),
                Trigger::Resync => trace!(path = %path, "periodic resync"),
                Trigger::Cancelled => break,
            }
        }

        self.transition(&path, state, LoopState::Cancelled);
        self.set.fail(DiscoveryError::Cancelled);
        debug!(path = %path, "watch loop stopped");
    }

    fn transition(&self, path: &str, from: LoopState, to: LoopState) -> LoopState {
        if from != to {
            trace!(path = %path, ?from, ?to, "watch loop state");
        }
        to
    }

    /// Register the one-shot watch on `path`, or on its nearest existing
    /// ancestor if `path` is missing.
    async fn arm(&self, path: &str) -> StoreResult<ArmedWatch> {
        let mut target = path;
        loop {
            match self.store.watch_children(target).await {
                Ok(watch) => {
                    return Ok(ArmedWatch {
                        watch,
                        on_service: target == path,
                    })
                }
                Err(err) if err.is_no_node() => match parent_path(target) {
                    Some(parent) => target = parent,
                    None => return Err(err),
                },
                Err(err) => return Err(err),
            }
        }
    }

    /// Read and publish. A missing service node publishes an empty list; any
    /// other failed read leaves the published snapshot as is.
    ///
    /// Returns true when the service node exists but the watch is still on an
    /// ancestor, so the caller must re-arm before trusting the read.
    async fn resolve(&self, path: &str, on_service: bool) -> bool {
        match self.reader.read(path).await {
            Ok(_) if !on_service => true,
            Ok(instances) => {
                self.set.update(instances);
                false
            }
            Err(DiscoveryError::ServiceUnavailable(_)) => {
                self.set.update(Vec::new());
                false
            }
            Err(err) => {
                warn!(path = %path, error = %err, "snapshot read failed; keeping previous snapshot");
                false
            }
        }
    }

    /// Wait for the first of: the armed watch firing, a local dirty mark,
    /// the resync tick, or cancellation. Concurrent sources collapse into one
    /// trigger. With no watch armed (`retrying`), the tick falls back to
    /// [`REARM_RETRY_DELAY`].
    async fn wait(&self, watch: Option<&mut ChildWatch>, retrying: bool) -> Trigger {
        let tick = if retrying {
            Some(self.resync_interval.unwrap_or(REARM_RETRY_DELAY))
        } else {
            self.resync_interval
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Trigger::Cancelled,
            event = fired(watch) => Trigger::Fired(event),
            _ = self.set.dirtied() => Trigger::Dirty,
            _ = resync_tick(tick) => Trigger::Resync,
        }
    }
}

async fn fired(watch: Option<&mut ChildWatch>) -> WatchEvent {
    match watch {
        Some(watch) => watch.await,
        None => std::future::pending().await,
    }
}

async fn resync_tick(interval: Option<Duration>) {
    match interval {
        Some(interval) => tokio::time::sleep(interval).await,
        None => std::future::pending().await,
    }
}

fn watch_failed(path: &str, err: StoreError) -> DiscoveryError {
    DiscoveryError::WatchFailed {
        path: path.to_string(),
        reason: err.to_string(),
    }
}
