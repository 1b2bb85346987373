//! StoreClient trait - the interface the discovery layer consumes from a
//! hierarchical store.
//!
//! Paths are `/`-separated, absolute, and without a trailing slash (except
//! the root `/` itself). A node's parent must exist before it is created.

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::watch::ChildWatch;

/// Maximum path length in bytes.
pub const MAX_PATH_LENGTH: usize = 1024;

/// Validate that a path is well-formed.
pub fn validate_path(path: &str) -> StoreResult<()> {
    if path.is_empty() {
        return Err(StoreError::InvalidPath("path cannot be empty".to_string()));
    }
    if path.len() > MAX_PATH_LENGTH {
        return Err(StoreError::InvalidPath(format!(
            "path exceeds maximum length of {} bytes",
            MAX_PATH_LENGTH
        )));
    }
    if !path.starts_with('/') {
        return Err(StoreError::InvalidPath(
            "path must start with '/'".to_string(),
        ));
    }
    if path != "/" && (path.ends_with('/') || path.contains("//")) {
        return Err(StoreError::InvalidPath(format!(
            "path has an empty segment: {path}"
        )));
    }
    Ok(())
}

/// Parent of `path`, or `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Hierarchical store with one-shot child watches.
///
/// Object safe, so the registry can hold an `Arc<dyn StoreClient>`.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Check if a node exists.
    async fn exists(&self, path: &str) -> StoreResult<bool>;

    /// Create a node. Fails with `NodeExists` if it is already there and
    /// `NoNode` if its parent is missing.
    async fn create(&self, path: &str, data: Vec<u8>) -> StoreResult<()>;

    /// Overwrite the data of an existing node. Fires child watches armed on
    /// its parent, like a child add or remove.
    async fn set(&self, path: &str, data: Vec<u8>) -> StoreResult<()>;

    /// Delete a node. Fails with `NoNode` if it is missing.
    async fn delete(&self, path: &str) -> StoreResult<()>;

    /// Read a node's data.
    async fn get(&self, path: &str) -> StoreResult<Vec<u8>>;

    /// Names (not full paths) of a node's direct children.
    async fn children(&self, path: &str) -> StoreResult<Vec<String>>;

    /// Arm a one-shot watch on the children of `path`.
    ///
    /// The returned handle fires at most once: when a child is added,
    /// removed or overwritten, or when the node itself is deleted. It must be
    /// re-armed to observe later changes. Fails with `NoNode` if `path` is missing.
    async fn watch_children(&self, path: &str) -> StoreResult<ChildWatch>;
}

/// Create `path` with `data` unless it already exists.
///
/// Losing a creation race to another client is not an error.
pub async fn ensure_path(store: &dyn StoreClient, path: &str, data: Vec<u8>) -> StoreResult<()> {
    if store.exists(path).await? {
        return Ok(());
    }
    match store.create(path, data).await {
        Err(err) if err.is_node_exists() => Ok(()),
        other => other,
    }
}

/// [`ensure_path`] for `path` and every ancestor, with empty data.
pub async fn ensure_path_all(store: &dyn StoreClient, path: &str) -> StoreResult<()> {
    validate_path(path)?;
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        ensure_path(store, &current, Vec::new()).await?;
    }
    Ok(())
}
