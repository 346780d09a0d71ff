//! Resource accessors
//!
//! [`ResourceAccessor`] is the seam between the repository facade and
//! storage. [`TreeAccessor`] implements it directly on a [`BackingStore`],
//! materializing [`Resource`]s from node chains and applying every mutation
//! as a set of brand-new node snapshots. The caches in [`crate::cache`]
//! implement the same trait around another accessor.

use std::sync::Arc;

use crate::acl::Acl;
use crate::cache::CacheStats;
use crate::lock::LockError;
use crate::node::{Node, NodeData, NodeError, NodeId};
use crate::path::{PathError, RepoPath};
use crate::resource::Resource;
use crate::store::{BackingStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("invariant violation: {0}")]
    Node(#[from] NodeError),
    #[error("lock error: {0}")]
    Lock(#[from] LockError),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("resource not found: {0}")]
    NotFound(RepoPath),
    #[error("resource already exists: {0}")]
    AlreadyExists(RepoPath),
    #[error("resource is not a collection: {0}")]
    NotCollection(RepoPath),
    #[error("operation not permitted on the root")]
    Root,
    #[error("cannot move or copy '{from}' to '{to}': destination is inside source")]
    IntoSelf { from: RepoPath, to: RepoPath },
    #[error("tree is inconsistent at {0}")]
    CorruptTree(RepoPath),
}

/// Load and mutate resources by path.
///
/// Mutations take the last-loaded resource the caller authorized against
/// and return the persisted result where there is one.
pub trait ResourceAccessor: Send + Sync {
    fn load(&self, path: &RepoPath) -> Result<Option<Arc<Resource>>, AccessError>;

    /// All children of `parent`, in child-name order.
    fn load_children(&self, parent: &Resource) -> Result<Vec<Arc<Resource>>, AccessError>;

    fn create(
        &self,
        parent: &Resource,
        name: &str,
        data: NodeData,
    ) -> Result<Arc<Resource>, AccessError>;

    /// Persist properties, resource type, owner and lock. The ACL is left alone.
    fn store(&self, resource: &Resource) -> Result<Arc<Resource>, AccessError>;

    /// Persist the ACL (own, or inherited when `is_acl_inherited`).
    fn store_acl(&self, resource: &Resource) -> Result<Arc<Resource>, AccessError>;

    /// Remove the resource and its whole subtree.
    fn delete(&self, resource: &Resource) -> Result<(), AccessError>;

    fn move_to(&self, source: &Resource, dest: &RepoPath) -> Result<(), AccessError>;

    fn copy_to(&self, source: &Resource, dest: &RepoPath) -> Result<(), AccessError>;

    /// Statistics of the cache in front of the store, if there is one.
    fn cache_stats(&self) -> Option<CacheStats> {
        None
    }
}

impl<A: ResourceAccessor + ?Sized> ResourceAccessor for Arc<A> {
    fn load(&self, path: &RepoPath) -> Result<Option<Arc<Resource>>, AccessError> {
        (**self).load(path)
    }

    fn load_children(&self, parent: &Resource) -> Result<Vec<Arc<Resource>>, AccessError> {
        (**self).load_children(parent)
    }

    fn create(
        &self,
        parent: &Resource,
        name: &str,
        data: NodeData,
    ) -> Result<Arc<Resource>, AccessError> {
        (**self).create(parent, name, data)
    }

    fn store(&self, resource: &Resource) -> Result<Arc<Resource>, AccessError> {
        (**self).store(resource)
    }

    fn store_acl(&self, resource: &Resource) -> Result<Arc<Resource>, AccessError> {
        (**self).store_acl(resource)
    }

    fn delete(&self, resource: &Resource) -> Result<(), AccessError> {
        (**self).delete(resource)
    }

    fn move_to(&self, source: &Resource, dest: &RepoPath) -> Result<(), AccessError> {
        (**self).move_to(source, dest)
    }

    fn copy_to(&self, source: &Resource, dest: &RepoPath) -> Result<(), AccessError> {
        (**self).copy_to(source, dest)
    }

    fn cache_stats(&self) -> Option<CacheStats> {
        (**self).cache_stats()
    }
}

/// The nodes from the root down to some target, root first.
struct Chain {
    path: RepoPath,
    nodes: Vec<Node>,
}

impl Chain {
    fn target(&self) -> &Node {
        // a chain always holds at least the root
        &self.nodes[self.nodes.len() - 1]
    }

    fn parent(&self) -> Option<&Node> {
        let len = self.nodes.len();
        (len >= 2).then(|| &self.nodes[len - 2])
    }

    /// Effective ACL of the target's parent, if any ancestor has one.
    fn inherited_acl(&self) -> Option<&Acl> {
        let len = self.nodes.len();
        self.nodes[..len - 1]
            .iter()
            .rev()
            .find_map(|node| node.data().acl.as_ref())
    }

    /// Effective ACL of the target itself.
    fn effective_acl(&self) -> Option<&Acl> {
        self.nodes.iter().rev().find_map(|node| node.data().acl.as_ref())
    }

    fn materialize(&self) -> Resource {
        Resource::materialize(self.path.clone(), self.target(), self.inherited_acl())
    }

    /// Replace the target with a newer snapshot of it.
    fn with_target(mut self, node: Node) -> Self {
        let len = self.nodes.len();
        self.nodes[len - 1] = node;
        self
    }
}

/// Uncached accessor straight on top of a backing store.
#[derive(Debug, Clone)]
pub struct TreeAccessor<S> {
    store: S,
}

impl<S: BackingStore> TreeAccessor<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn backing(&self) -> &S {
        &self.store
    }

    fn load_node(&self, id: NodeId, path: &RepoPath) -> Result<Node, AccessError> {
        self.store
            .load_many(&[id])?
            .pop()
            .ok_or_else(|| AccessError::CorruptTree(path.clone()))
    }

    fn resolve(&self, path: &RepoPath) -> Result<Option<Chain>, AccessError> {
        let root = self
            .store
            .load(&RepoPath::root())?
            .ok_or_else(|| AccessError::CorruptTree(RepoPath::root()))?;

        let mut nodes = Vec::with_capacity(path.depth() + 1);
        nodes.push(root);
        for (depth, segment) in path.segments().iter().enumerate() {
            let Some(child) = nodes[depth].child(segment) else {
                return Ok(None);
            };
            nodes.push(self.load_node(child, path)?);
        }
        Ok(Some(Chain {
            path: path.clone(),
            nodes,
        }))
    }

    fn require(&self, path: &RepoPath) -> Result<Chain, AccessError> {
        self.resolve(path)?
            .ok_or_else(|| AccessError::NotFound(path.clone()))
    }

    fn require_collection(&self, path: &RepoPath) -> Result<Chain, AccessError> {
        let chain = self.require(path)?;
        if !chain.target().is_collection() {
            return Err(AccessError::NotCollection(path.clone()));
        }
        Ok(chain)
    }

    fn check_not_into_self(source: &RepoPath, dest: &RepoPath) -> Result<(), AccessError> {
        if dest == source || dest.is_descendant_of(source) {
            return Err(AccessError::IntoSelf {
                from: source.clone(),
                to: dest.clone(),
            });
        }
        Ok(())
    }

    fn split(path: &RepoPath) -> Result<(RepoPath, &str), AccessError> {
        match (path.parent(), path.name()) {
            (Some(parent), Some(name)) => Ok((parent, name)),
            _ => Err(AccessError::Root),
        }
    }

    fn persist_data(&self, chain: Chain, data: NodeData) -> Result<Arc<Resource>, AccessError> {
        let updated = chain.target().with_data(data);
        self.store.update(&updated)?;
        Ok(Arc::new(chain.with_target(updated).materialize()))
    }

    /// Ids of every node below `node`, deepest last.
    fn subtree_ids(&self, node: &Node, path: &RepoPath) -> Result<Vec<NodeId>, AccessError> {
        let mut ids = Vec::new();
        let mut frontier = node.child_ids();
        while !frontier.is_empty() {
            let nodes = self.store.load_many(&frontier)?;
            if nodes.len() != frontier.len() {
                return Err(AccessError::CorruptTree(path.clone()));
            }
            ids.extend(frontier.drain(..));
            for child in &nodes {
                frontier.extend(child.child_ids());
            }
        }
        Ok(ids)
    }

    /// Persist a fresh copy of `node` and everything below it under `parent`.
    fn copy_subtree(
        &self,
        node: &Node,
        parent: NodeId,
        path: &RepoPath,
    ) -> Result<NodeId, AccessError> {
        let mut copy = node.duplicate_under(parent);
        for (name, child_id) in node.children() {
            let child = self.load_node(child_id, path)?;
            let child_copy = self.copy_subtree(&child, copy.id(), path)?;
            copy = copy.with_child(name, child_copy)?;
        }
        self.store.create(&copy)?;
        Ok(copy.id())
    }
}

impl<S: BackingStore> ResourceAccessor for TreeAccessor<S> {
    fn load(&self, path: &RepoPath) -> Result<Option<Arc<Resource>>, AccessError> {
        Ok(self.resolve(path)?.map(|chain| Arc::new(chain.materialize())))
    }

    fn load_children(&self, parent: &Resource) -> Result<Vec<Arc<Resource>>, AccessError> {
        let chain = self.require(parent.path())?;
        let node = chain.target();
        let children = self.store.load_many(&node.child_ids())?;
        let inherited = chain.effective_acl();

        children
            .iter()
            .map(|child| {
                let name = node
                    .child_name(&child.id())
                    .ok_or_else(|| AccessError::CorruptTree(parent.path().clone()))?;
                let path = parent
                    .path()
                    .join(name)
                    .map_err(|_| AccessError::CorruptTree(parent.path().clone()))?;
                Ok(Arc::new(Resource::materialize(path, child, inherited)))
            })
            .collect()
    }

    fn create(
        &self,
        parent: &Resource,
        name: &str,
        data: NodeData,
    ) -> Result<Arc<Resource>, AccessError> {
        let path = parent.path().join(name)?;
        let chain = self.require_collection(parent.path())?;
        let parent_node = chain.target();
        if parent_node.child(name).is_some() {
            return Err(AccessError::AlreadyExists(path));
        }

        let node = Node::new(parent_node.id(), data);
        let updated_parent = parent_node.with_child(name, node.id())?;
        // the child exists before anything references it
        self.store.create(&node)?;
        self.store.update(&updated_parent)?;

        let mut nodes = chain.with_target(updated_parent).nodes;
        nodes.push(node);
        Ok(Arc::new(Chain { path, nodes }.materialize()))
    }

    fn store(&self, resource: &Resource) -> Result<Arc<Resource>, AccessError> {
        let chain = self.require(resource.path())?;
        let mut data = resource.to_node_data();
        data.kind = chain.target().data().kind;
        data.acl = chain.target().data().acl.clone();
        self.persist_data(chain, data)
    }

    fn store_acl(&self, resource: &Resource) -> Result<Arc<Resource>, AccessError> {
        let chain = self.require(resource.path())?;
        let mut data = chain.target().data().clone();
        data.acl = resource.to_node_data().acl;
        self.persist_data(chain, data)
    }

    fn delete(&self, resource: &Resource) -> Result<(), AccessError> {
        let (_, name) = Self::split(resource.path())?;
        let chain = self.require(resource.path())?;
        let parent = chain.parent().ok_or(AccessError::Root)?;
        let target = chain.target();

        let descendants = self.subtree_ids(target, resource.path())?;
        // unlink first; nothing may reference a deleted node
        self.store.update(&parent.without_child(name)?)?;
        for id in descendants.iter().rev() {
            self.store.delete(id)?;
        }
        self.store.delete(&target.id())?;
        Ok(())
    }

    fn move_to(&self, source: &Resource, dest: &RepoPath) -> Result<(), AccessError> {
        let (_, source_name) = Self::split(source.path())?;
        let (dest_parent_path, dest_name) = Self::split(dest)?;
        Self::check_not_into_self(source.path(), dest)?;

        let chain = self.require(source.path())?;
        let source_parent = chain.parent().ok_or(AccessError::Root)?;
        let node = chain.target();

        let dest_parent = self.require_collection(&dest_parent_path)?;
        let dest_parent = dest_parent.target();
        if dest_parent.child(dest_name).is_some() {
            return Err(AccessError::AlreadyExists(dest.clone()));
        }

        if dest_parent.id() == source_parent.id() {
            self.store
                .update(&source_parent.with_renamed_child(source_name, dest_name)?)?;
            return Ok(());
        }

        self.store.update(&source_parent.without_child(source_name)?)?;
        self.store
            .update(&dest_parent.with_child(dest_name, node.id())?)?;
        self.store.update(&node.with_parent(dest_parent.id()))?;
        Ok(())
    }

    fn copy_to(&self, source: &Resource, dest: &RepoPath) -> Result<(), AccessError> {
        let (dest_parent_path, dest_name) = Self::split(dest)?;
        Self::check_not_into_self(source.path(), dest)?;
        let chain = self.require(source.path())?;

        let dest_parent = self.require_collection(&dest_parent_path)?;
        let dest_parent = dest_parent.target();
        if dest_parent.child(dest_name).is_some() {
            return Err(AccessError::AlreadyExists(dest.clone()));
        }

        let copy = self.copy_subtree(chain.target(), dest_parent.id(), source.path())?;
        self.store.update(&dest_parent.with_child(dest_name, copy)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{Principal, Privilege};
    use crate::store::MemoryStore;

    fn p(raw: &str) -> RepoPath {
        RepoPath::parse(raw).unwrap()
    }

    fn accessor() -> TreeAccessor<MemoryStore> {
        let acl = Acl::new().with_grant(Privilege::Read, Principal::Everyone);
        TreeAccessor::new(MemoryStore::new(
            NodeData::collection("root").with_acl(Some(acl)),
        ))
    }

    fn create(
        accessor: &TreeAccessor<MemoryStore>,
        path: &str,
        data: NodeData,
    ) -> Arc<Resource> {
        let path = p(path);
        let parent = accessor.load(&path.parent().unwrap()).unwrap().unwrap();
        accessor
            .create(&parent, path.name().unwrap(), data)
            .unwrap()
    }

    #[test]
    fn test_create_and_load() {
        let accessor = accessor();
        let created = create(&accessor, "/a", NodeData::collection("alice"));
        assert_eq!(created.path(), &p("/a"));
        assert!(created.is_acl_inherited());

        let root = accessor.load(&RepoPath::root()).unwrap().unwrap();
        assert_eq!(root.children(), &[p("/a")]);
        assert!(!root.is_acl_inherited());

        let loaded = accessor.load(&p("/a")).unwrap().unwrap();
        assert_eq!(loaded.id(), created.id());
        assert_eq!(loaded.owner(), "alice");
        assert!(accessor.load(&p("/a/missing")).unwrap().is_none());
    }

    #[test]
    fn test_create_duplicate_and_under_document() {
        let accessor = accessor();
        create(&accessor, "/doc", NodeData::document("alice"));
        let root = accessor.load(&RepoPath::root()).unwrap().unwrap();
        assert!(matches!(
            accessor.create(&root, "doc", NodeData::document("bob")),
            Err(AccessError::AlreadyExists(_))
        ));

        let doc = accessor.load(&p("/doc")).unwrap().unwrap();
        assert!(matches!(
            accessor.create(&doc, "child", NodeData::document("bob")),
            Err(AccessError::NotCollection(_))
        ));
    }

    #[test]
    fn test_store_acl_changes_inheritance_below() {
        let accessor = accessor();
        let a = create(&accessor, "/a", NodeData::collection("alice"));
        create(&accessor, "/a/b", NodeData::document("alice"));

        let acl = Acl::new().with_grant(Privilege::All, Principal::user("alice"));
        let stored = accessor.store_acl(&a.with_acl(acl.clone())).unwrap();
        assert!(!stored.is_acl_inherited());

        let b = accessor.load(&p("/a/b")).unwrap().unwrap();
        assert_eq!(b.acl(), &acl);

        accessor.store_acl(&stored.with_inherited_acl()).unwrap();
        let b = accessor.load(&p("/a/b")).unwrap().unwrap();
        assert!(b.acl().has_grant(Privilege::Read, &Principal::Everyone));
    }

    #[test]
    fn test_store_keeps_acl() {
        let accessor = accessor();
        let doc = create(&accessor, "/doc", NodeData::document("alice"));
        let mut properties = doc.properties().clone();
        properties.insert("title".into(), "Hello".into());

        // an ACL change smuggled through store() is ignored
        let edited = doc
            .with_properties(properties)
            .with_acl(Acl::new());
        let stored = accessor.store(&edited).unwrap();
        assert_eq!(stored.property("title"), Some("Hello"));
        assert!(stored.is_acl_inherited());
    }

    #[test]
    fn test_delete_removes_subtree() {
        let accessor = accessor();
        create(&accessor, "/a", NodeData::collection("alice"));
        create(&accessor, "/a/b", NodeData::collection("alice"));
        create(&accessor, "/a/b/c", NodeData::document("alice"));
        assert_eq!(accessor.backing().node_count(), 4);

        let a = accessor.load(&p("/a")).unwrap().unwrap();
        accessor.delete(&a).unwrap();
        assert_eq!(accessor.backing().node_count(), 1);
        assert!(accessor.load(&p("/a")).unwrap().is_none());

        let root = accessor.load(&RepoPath::root()).unwrap().unwrap();
        assert!(matches!(accessor.delete(&root), Err(AccessError::Root)));
    }

    #[test]
    fn test_move_between_parents_and_rename() {
        let accessor = accessor();
        create(&accessor, "/a", NodeData::collection("alice"));
        create(&accessor, "/b", NodeData::collection("alice"));
        let doc = create(&accessor, "/a/doc", NodeData::document("alice"));

        accessor.move_to(&doc, &p("/b/moved")).unwrap();
        assert!(accessor.load(&p("/a/doc")).unwrap().is_none());
        let moved = accessor.load(&p("/b/moved")).unwrap().unwrap();
        assert_eq!(moved.id(), doc.id());

        accessor.move_to(&moved, &p("/b/renamed")).unwrap();
        let renamed = accessor.load(&p("/b/renamed")).unwrap().unwrap();
        assert_eq!(renamed.id(), doc.id());
        assert_eq!(accessor.backing().node_count(), 4);

        let a = accessor.load(&p("/a")).unwrap().unwrap();
        assert!(matches!(
            accessor.move_to(&a, &p("/a/inner")),
            Err(AccessError::IntoSelf { .. })
        ));
    }

    #[test]
    fn test_copy_duplicates_subtree() {
        let accessor = accessor();
        let a = create(&accessor, "/a", NodeData::collection("alice"));
        create(&accessor, "/a/doc", NodeData::document("alice").with_property("k", "v"));

        accessor.copy_to(&a, &p("/copy")).unwrap();
        let copy = accessor.load(&p("/copy/doc")).unwrap().unwrap();
        let original = accessor.load(&p("/a/doc")).unwrap().unwrap();
        assert_ne!(copy.id(), original.id());
        assert_eq!(copy.property("k"), Some("v"));
        assert_eq!(accessor.backing().node_count(), 5);

        assert!(matches!(
            accessor.copy_to(&a, &p("/copy")),
            Err(AccessError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_load_children_in_name_order() {
        let accessor = accessor();
        let a = create(&accessor, "/a", NodeData::collection("alice"));
        create(&accessor, "/a/z", NodeData::document("alice"));
        create(&accessor, "/a/m", NodeData::document("alice"));

        let a = accessor.load(a.path()).unwrap().unwrap();
        let children = accessor.load_children(&a).unwrap();
        let paths: Vec<_> = children.iter().map(|child| child.path().clone()).collect();
        assert_eq!(paths, vec![p("/a/m"), p("/a/z")]);
        assert!(children.iter().all(|child| child.is_acl_inherited()));
    }
}
