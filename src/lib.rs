//! # univrs-discovery
//!
//! Client-side service discovery cache over a hierarchical store whose
//! watches fire once and carry no payload (ZooKeeper-style child watches).
//!
//! - **Registration**: instances are JSON records at `root/<service>/<id>`
//! - **Lookups**: [`Registry::get_service`] reads the current instance list
//! - **Watches**: [`Registry::watch`] returns a [`Watcher`] fed by one shared
//!   background loop per service, which re-arms the store watch before every
//!   snapshot read so no change is missed
//!
//! ## Backends
//!
//! Anything implementing [`StoreClient`]. [`MemoryStore`] is an in-process
//! implementation for tests and development.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use univrs_discovery::{MemoryStore, Registry, RegistryConfig, ServiceInstance};
//!
//! #[tokio::main]
//! async fn main() -> univrs_discovery::Result<()> {
//!     let registry = Registry::new(Arc::new(MemoryStore::new()), RegistryConfig::default())?;
//!
//!     let watcher = registry.watch("billing").await?;
//!     println!("initial: {:?}", watcher.next().await?);
//!
//!     let instance = ServiceInstance::new("billing-1", "billing")
//!         .with_endpoint("grpc://10.0.0.7:9000");
//!     registry.register(&instance).await?;
//!
//!     // Every later `next` waits for a newer snapshot.
//!     println!("after register: {:?}", watcher.next().await?);
//!
//!     registry.deregister(&instance).await?;
//!     watcher.stop()?;
//!     registry.shutdown();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod instance;
pub mod memory;
pub mod registry;
pub mod service_set;
pub mod snapshot;
pub mod store;
pub mod watch;
pub mod watch_loop;
pub mod watcher;

// Re-export main types
pub use config::RegistryConfig;
pub use error::{DiscoveryError, Result, StoreError, StoreResult};
pub use instance::ServiceInstance;
pub use memory::MemoryStore;
pub use registry::Registry;
pub use service_set::{ServiceSet, Snapshot};
pub use snapshot::SnapshotReader;
pub use store::{StoreClient, MAX_PATH_LENGTH};
pub use watch::{ChildWatch, EventType, WatchEvent};
pub use watch_loop::{LoopState, WatchLoop};
pub use watcher::Watcher;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::RegistryConfig;
    pub use crate::error::{DiscoveryError, Result, StoreError};
    pub use crate::instance::ServiceInstance;
    pub use crate::memory::MemoryStore;
    pub use crate::registry::Registry;
    pub use crate::store::StoreClient;
    pub use crate::watcher::Watcher;
}
