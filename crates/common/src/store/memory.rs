use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{BackingStore, StoreError};
use crate::node::{Node, NodeData, NodeId};
use crate::path::RepoPath;

/// In-memory backing store using a HashMap of node snapshots
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
}

#[derive(Debug)]
struct MemoryStoreInner {
    root: NodeId,
    nodes: RwLock<HashMap<NodeId, Node>>,
    /// Simulated outage: every call fails with a backend error
    offline: AtomicBool,
    /// Number of calls served, for tests measuring request amplification
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new(root: NodeData) -> Self {
        let root = Node::root(root);
        let root_id = root.id();
        let mut nodes = HashMap::new();
        nodes.insert(root_id, root);

        Self {
            inner: Arc::new(MemoryStoreInner {
                root: root_id,
                nodes: RwLock::new(nodes),
                offline: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    pub fn node_count(&self) -> usize {
        self.inner.nodes.read().len()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.inner.nodes.read().contains_key(id)
    }

    fn enter(&self) -> Result<(), StoreError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "memory store is offline"
            )));
        }
        Ok(())
    }
}

impl BackingStore for MemoryStore {
    fn root_id(&self) -> NodeId {
        self.inner.root
    }

    fn load(&self, path: &RepoPath) -> Result<Option<Node>, StoreError> {
        self.enter()?;
        let nodes = self.inner.nodes.read();

        let mut current = match nodes.get(&self.inner.root) {
            Some(root) => root,
            None => return Ok(None),
        };
        for segment in path.segments() {
            let next = current.child(segment).and_then(|id| nodes.get(&id));
            match next {
                Some(node) => current = node,
                None => return Ok(None),
            }
        }
        Ok(Some(current.clone()))
    }

    fn load_many(&self, ids: &[NodeId]) -> Result<Vec<Node>, StoreError> {
        self.enter()?;
        let nodes = self.inner.nodes.read();
        Ok(ids.iter().filter_map(|id| nodes.get(id).cloned()).collect())
    }

    fn create(&self, node: &Node) -> Result<(), StoreError> {
        self.enter()?;
        let mut nodes = self.inner.nodes.write();
        if nodes.contains_key(&node.id()) {
            return Err(StoreError::AlreadyExists(node.id()));
        }
        nodes.insert(node.id(), node.clone());
        Ok(())
    }

    fn update(&self, node: &Node) -> Result<(), StoreError> {
        self.enter()?;
        let mut nodes = self.inner.nodes.write();
        match nodes.get_mut(&node.id()) {
            Some(existing) => {
                *existing = node.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(node.id())),
        }
    }

    fn delete(&self, id: &NodeId) -> Result<(), StoreError> {
        self.enter()?;
        self.inner
            .nodes
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(*id))
    }
}
