use std::fmt::Debug;
use std::sync::Arc;

use crate::node::{Node, NodeId};
use crate::path::RepoPath;

mod memory;

pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("node not found: {0}")]
    NotFound(NodeId),
    #[error("node already exists: {0}")]
    AlreadyExists(NodeId),
    /// Opaque failure of the underlying storage. Never retried here.
    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Durable storage for node records.
///
/// The cache and accessor layers assume no transactional guarantee across
/// nodes; callers serialize multi-node updates with path locks.
pub trait BackingStore: Send + Sync + Debug {
    /// Id of the root node. The root always exists.
    fn root_id(&self) -> NodeId;

    /// Resolve a path to its node by walking child maps from the root.
    fn load(&self, path: &RepoPath) -> Result<Option<Node>, StoreError>;

    /// Fetch several nodes in one call. Missing ids are skipped; the result
    /// keeps the request order.
    fn load_many(&self, ids: &[NodeId]) -> Result<Vec<Node>, StoreError>;

    /// Persist a new node. Fails with `AlreadyExists` for a known id.
    fn create(&self, node: &Node) -> Result<(), StoreError>;

    /// Supersede the stored snapshot of an existing node.
    fn update(&self, node: &Node) -> Result<(), StoreError>;

    fn delete(&self, id: &NodeId) -> Result<(), StoreError>;
}

impl<S: BackingStore + ?Sized> BackingStore for Arc<S> {
    fn root_id(&self) -> NodeId {
        (**self).root_id()
    }

    fn load(&self, path: &RepoPath) -> Result<Option<Node>, StoreError> {
        (**self).load(path)
    }

    fn load_many(&self, ids: &[NodeId]) -> Result<Vec<Node>, StoreError> {
        (**self).load_many(ids)
    }

    fn create(&self, node: &Node) -> Result<(), StoreError> {
        (**self).create(node)
    }

    fn update(&self, node: &Node) -> Result<(), StoreError> {
        (**self).update(node)
    }

    fn delete(&self, id: &NodeId) -> Result<(), StoreError> {
        (**self).delete(id)
    }
}
