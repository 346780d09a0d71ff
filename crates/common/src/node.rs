use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::acl::Acl;
use crate::resource::LockInfo;

/**
 * Nodes
 * =====
 * Nodes are the records the backing store persists for every resource
 *  in the tree. A node knows its own id, its parent's id, and a
 *  bidirectional name <-> id map of its children. Everything else
 *  (owner, properties, acl, lock) lives in an opaque data payload.
 * Nodes are immutable snapshots: every change builds a new node value
 *  and the store supersedes the old one. Nothing is mutated in place.
 */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn generate() -> Self {
        NodeId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Collection,
    Document,
}

// The payload of a node. The store never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    pub kind: NodeKind,
    pub resource_type: String,
    pub owner: String,
    pub properties: BTreeMap<String, String>,
    // None means "inherit from the nearest ancestor that has one"
    pub acl: Option<Acl>,
    pub lock: Option<LockInfo>,
}

impl NodeData {
    pub fn new(kind: NodeKind, owner: impl Into<String>) -> Self {
        let resource_type = match kind {
            NodeKind::Collection => "collection",
            NodeKind::Document => "document",
        };
        Self {
            kind,
            resource_type: resource_type.to_string(),
            owner: owner.into(),
            properties: BTreeMap::new(),
            acl: None,
            lock: None,
        }
    }

    pub fn collection(owner: impl Into<String>) -> Self {
        Self::new(NodeKind::Collection, owner)
    }

    pub fn document(owner: impl Into<String>) -> Self {
        Self::new(NodeKind::Document, owner)
    }

    pub fn with_acl(mut self, acl: Option<Acl>) -> Self {
        self.acl = acl;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = resource_type.into();
        self
    }
}

/// A violated tree invariant. These are programming errors, never
/// conditions to retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    #[error("child name already present: {0}")]
    DuplicateName(String),
    #[error("child id already present: {0}")]
    DuplicateChild(NodeId),
    #[error("child not found: {0}")]
    ChildNotFound(String),
    #[error("node is not a collection: {0}")]
    NotCollection(NodeId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    parent: Option<NodeId>,
    children: BTreeMap<String, NodeId>,
    names: HashMap<NodeId, String>,
    data: NodeData,
}

impl Node {
    /// A parentless node. Only the store's root should be built this way.
    pub fn root(data: NodeData) -> Self {
        Self::build(NodeId::generate(), None, data)
    }

    pub fn new(parent: NodeId, data: NodeData) -> Self {
        Self::build(NodeId::generate(), Some(parent), data)
    }

    fn build(id: NodeId, parent: Option<NodeId>, data: NodeData) -> Self {
        Node {
            id,
            parent,
            children: BTreeMap::new(),
            names: HashMap::new(),
            data,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn data(&self) -> &NodeData {
        &self.data
    }

    pub fn is_collection(&self) -> bool {
        self.data.kind == NodeKind::Collection
    }

    pub fn child(&self, name: &str) -> Option<NodeId> {
        self.children.get(name).copied()
    }

    pub fn child_name(&self, id: &NodeId) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    /// Children in name order.
    pub fn children(&self) -> impl Iterator<Item = (&str, NodeId)> + '_ {
        self.children.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn child_ids(&self) -> Vec<NodeId> {
        self.children.values().copied().collect()
    }

    pub fn size(&self) -> usize {
        self.children.len()
    }

    pub fn with_child(&self, name: &str, id: NodeId) -> Result<Node, NodeError> {
        if !self.is_collection() {
            return Err(NodeError::NotCollection(self.id));
        }
        if self.children.contains_key(name) {
            return Err(NodeError::DuplicateName(name.to_string()));
        }
        if self.names.contains_key(&id) {
            return Err(NodeError::DuplicateChild(id));
        }
        let mut next = self.clone();
        next.children.insert(name.to_string(), id);
        next.names.insert(id, name.to_string());
        Ok(next)
    }

    pub fn without_child(&self, name: &str) -> Result<Node, NodeError> {
        let mut next = self.clone();
        let id = next
            .children
            .remove(name)
            .ok_or_else(|| NodeError::ChildNotFound(name.to_string()))?;
        next.names.remove(&id);
        Ok(next)
    }

    /// Same node, renamed child. The child id is untouched.
    pub fn with_renamed_child(&self, from: &str, to: &str) -> Result<Node, NodeError> {
        let id = self
            .child(from)
            .ok_or_else(|| NodeError::ChildNotFound(from.to_string()))?;
        self.without_child(from)?.with_child(to, id)
    }

    pub fn with_data(&self, data: NodeData) -> Node {
        let mut next = self.clone();
        next.data = data;
        next
    }

    pub fn with_parent(&self, parent: NodeId) -> Node {
        let mut next = self.clone();
        next.parent = Some(parent);
        next
    }

    /// A childless duplicate with a fresh id under `parent`. Locks are not
    /// carried over to copies.
    pub fn duplicate_under(&self, parent: NodeId) -> Node {
        let mut data = self.data.clone();
        data.lock = None;
        Self::build(NodeId::generate(), Some(parent), data)
    }
}
