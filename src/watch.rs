//! One-shot child watches.
//!
//! A [`ChildWatch`] resolves at most once. It says only that something under
//! a path changed, never what changed; the holder must re-read and re-arm.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// What made a watch fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// A child was added to or removed from the watched node.
    ChildrenChanged,
    /// The watched node itself was deleted.
    NodeDeleted,
    /// The store dropped the registration (session loss, store shut down).
    Closed,
}

/// Payload-less notification delivered by a fired watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// The watched path.
    pub path: String,
    pub event_type: EventType,
}

impl WatchEvent {
    pub fn new(path: impl Into<String>, event_type: EventType) -> Self {
        Self {
            path: path.into(),
            event_type,
        }
    }
}

/// Handle for a single armed child watch.
///
/// Await it to wait for the firing. Polling after completion is not
/// supported; arm a new watch instead.
#[derive(Debug)]
pub struct ChildWatch {
    path: String,
    receiver: oneshot::Receiver<WatchEvent>,
}

impl ChildWatch {
    pub fn new(path: impl Into<String>, receiver: oneshot::Receiver<WatchEvent>) -> Self {
        Self {
            path: path.into(),
            receiver,
        }
    }

    /// Node whose children this watch observes.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Future for ChildWatch {
    type Output = WatchEvent;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(event)) => Poll::Ready(event),
            Poll::Ready(Err(_)) => Poll::Ready(WatchEvent::new(this.path.clone(), EventType::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Table of armed watches, for store implementations.
///
/// `arm` registers a watch on a path; `fire` completes and removes every
/// watch armed on that path.
#[derive(Clone, Default)]
pub struct WatchSender {
    armed: Arc<Mutex<HashMap<String, Vec<oneshot::Sender<WatchEvent>>>>>,
}

impl WatchSender {
    /// Empty table with no armed watches.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a one-shot watch on `path`.
    pub fn arm(&self, path: &str) -> ChildWatch {
        let (tx, rx) = oneshot::channel();
        let mut armed = self.armed.lock();
        let slot = armed.entry(path.to_string()).or_default();
        // Drop registrations whose handle is gone.
        slot.retain(|tx| !tx.is_closed());
        slot.push(tx);
        ChildWatch::new(path, rx)
    }

    /// Fire every watch armed on `path`. Returns how many were delivered.
    pub fn fire(&self, path: &str, event_type: EventType) -> usize {
        let senders = self.armed.lock().remove(path).unwrap_or_default();
        senders
            .into_iter()
            .filter_map(|tx| tx.send(WatchEvent::new(path, event_type)).ok())
            .count()
    }

    /// Number of armed, not yet fired watches on `path` whose handle is alive.
    pub fn active(&self, path: &str) -> usize {
        self.armed
            .lock()
            .get(path)
            .map(|slot| slot.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Drop every armed watch; their handles resolve with [`EventType::Closed`].
    pub fn close_all(&self) {
        self.armed.lock().clear();
    }
}
