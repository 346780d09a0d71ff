//! Materialized resources
//!
//! A [`Resource`] is what the cache holds and what authorization runs against:
//! a node's payload plus everything derived from its position in the tree
//! (path, effective ACL, child paths). Resources are immutable and shared as
//! `Arc<Resource>`; writers build an updated copy with the `with_*` methods
//! and hand it to an accessor.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::acl::Acl;
use crate::node::{Node, NodeData, NodeId, NodeKind};
use crate::path::RepoPath;

/// An exclusive write lock held by a principal until `expires`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub owner: String,
    pub expires: DateTime<Utc>,
}

impl LockInfo {
    pub fn new(owner: impl Into<String>, timeout: Duration) -> Self {
        let now = Utc::now();
        let expires = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            owner: owner.into(),
            expires,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    path: RepoPath,
    id: NodeId,
    kind: NodeKind,
    resource_type: String,
    owner: String,
    properties: BTreeMap<String, String>,
    acl: Acl,
    acl_inherited: bool,
    lock: Option<LockInfo>,
    children: Vec<RepoPath>,
}

impl Resource {
    /// Build the resource for `node` living at `path`. `inherited` is the
    /// effective ACL of the parent, used when the node has none of its own.
    /// Locks that already expired are dropped.
    pub fn materialize(path: RepoPath, node: &Node, inherited: Option<&Acl>) -> Self {
        let data = node.data();
        let (acl, acl_inherited) = match (&data.acl, inherited) {
            (Some(own), _) => (own.clone(), false),
            (None, Some(parent)) => (parent.clone(), true),
            (None, None) => (Acl::default(), true),
        };
        let children = node
            .children()
            .filter_map(|(name, _)| path.join(name).ok())
            .collect();

        Self {
            id: node.id(),
            kind: data.kind,
            resource_type: data.resource_type.clone(),
            owner: data.owner.clone(),
            properties: data.properties.clone(),
            acl,
            acl_inherited,
            lock: data.lock.clone().filter(|lock| !lock.is_expired()),
            children,
            path,
        }
    }

    pub fn path(&self) -> &RepoPath {
        &self.path
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_collection(&self) -> bool {
        self.kind == NodeKind::Collection
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// The effective ACL, own or inherited.
    pub fn acl(&self) -> &Acl {
        &self.acl
    }

    pub fn is_acl_inherited(&self) -> bool {
        self.acl_inherited
    }

    /// The lock as recorded, even if it expired since materialization.
    pub fn lock(&self) -> Option<&LockInfo> {
        self.lock.as_ref()
    }

    pub fn active_lock(&self) -> Option<&LockInfo> {
        self.lock.as_ref().filter(|lock| !lock.is_expired())
    }

    /// True once a recorded lock has passed its expiry. Cached copies in
    /// this state are stale.
    pub fn is_lock_expired(&self) -> bool {
        self.lock.as_ref().map(LockInfo::is_expired).unwrap_or(false)
    }

    pub fn children(&self) -> &[RepoPath] {
        &self.children
    }

    pub fn with_properties(&self, properties: BTreeMap<String, String>) -> Self {
        Self {
            properties,
            ..self.clone()
        }
    }

    pub fn with_acl(&self, acl: Acl) -> Self {
        Self {
            acl,
            acl_inherited: false,
            ..self.clone()
        }
    }

    /// Drop the own ACL; the effective one is resolved again on persist.
    pub fn with_inherited_acl(&self) -> Self {
        Self {
            acl_inherited: true,
            ..self.clone()
        }
    }

    pub fn with_lock(&self, lock: Option<LockInfo>) -> Self {
        Self {
            lock,
            ..self.clone()
        }
    }

    /// The payload to persist for this resource.
    pub fn to_node_data(&self) -> NodeData {
        NodeData {
            kind: self.kind,
            resource_type: self.resource_type.clone(),
            owner: self.owner.clone(),
            properties: self.properties.clone(),
            acl: (!self.acl_inherited).then(|| self.acl.clone()),
            lock: self.lock.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::acl::{Principal, Privilege};

    #[test]
    fn test_materialize_inherits_acl() {
        let parent_acl = Acl::new().with_grant(Privilege::Read, Principal::Everyone);
        let root = Node::root(NodeData::collection("root"));
        let doc = Node::new(root.id(), NodeData::document("alice"));
        let path = RepoPath::parse("/doc").unwrap();

        let resource = Resource::materialize(path.clone(), &doc, Some(&parent_acl));
        assert!(resource.is_acl_inherited());
        assert_eq!(resource.acl(), &parent_acl);
        assert_eq!(resource.owner(), "alice");
        assert!(resource.to_node_data().acl.is_none());

        let own = Acl::new().with_grant(Privilege::All, Principal::user("alice"));
        let doc = doc.with_data(NodeData::document("alice").with_acl(Some(own.clone())));
        let resource = Resource::materialize(path, &doc, Some(&parent_acl));
        assert!(!resource.is_acl_inherited());
        assert_eq!(resource.acl(), &own);
        assert_eq!(resource.to_node_data().acl, Some(own));
    }

    #[test]
    fn test_expired_locks_are_dropped_on_materialize() {
        let mut data = NodeData::document("alice");
        data.lock = Some(LockInfo {
            owner: "alice".to_string(),
            expires: Utc::now() - chrono::Duration::seconds(5),
        });
        let node = Node::root(data);
        let resource = Resource::materialize(RepoPath::root(), &node, None);
        assert!(resource.lock().is_none());
        assert!(!resource.is_lock_expired());
    }

    #[test]
    fn test_lock_expiry() {
        let lock = LockInfo::new("alice", Duration::from_secs(60));
        assert!(!lock.is_expired());
        assert!(lock.is_expired_at(lock.expires));

        let forever = LockInfo::new("alice", Duration::MAX);
        assert_eq!(forever.expires, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_children_paths() {
        let root = Node::root(NodeData::collection("root"))
            .with_child("b", NodeId::generate())
            .unwrap()
            .with_child("a", NodeId::generate())
            .unwrap();
        let resource = Resource::materialize(RepoPath::root(), &root, None);
        assert_eq!(
            resource.children(),
            &[RepoPath::parse("/a").unwrap(), RepoPath::parse("/b").unwrap()]
        );
    }
}
