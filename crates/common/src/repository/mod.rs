//! Repository facade
//!
//! [`Repository`] is the principal-aware entry point. Every mutation follows
//! the same protocol:
//!
//! 1. lock the affected paths (target, parent, and both endpoints and parents
//!    for move and copy) on the repository's own [`PathLockManager`]
//! 2. load the affected resources through the accessor
//! 3. authorize against what was just loaded
//! 4. hand the change to the accessor, which persists new node snapshots and,
//!    when it is a cache, invalidates what the change touched
//!
//! The locks are held until the call returns. A locking cache in front of the
//! store has its own lock manager; repository locks are always taken first.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::accessor::{AccessError, ResourceAccessor};
use crate::acl::{Acl, Principal, Privilege};
use crate::auth::{AuthError, Authorizer};
use crate::cache::CacheStats;
use crate::config::{ConfigError, RepositoryConfig};
use crate::lock::{LockError, PathLockManager};
use crate::node::{NodeData, NodeKind};
use crate::path::{PathError, RepoPath};
use crate::resource::{LockInfo, Resource};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("access error: {0}")]
    Access(AccessError),
    #[error("resource not found: {0}")]
    NotFound(RepoPath),
    #[error("resource already exists: {0}")]
    AlreadyExists(RepoPath),
    #[error("resource is not a collection: {0}")]
    NotCollection(RepoPath),
    #[error("{path} is locked by {owner}")]
    ResourceLocked { path: RepoPath, owner: String },
    #[error("illegal operation: {0}")]
    IllegalOperation(String),
}

impl From<AccessError> for RepositoryError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::NotFound(path) => RepositoryError::NotFound(path),
            AccessError::AlreadyExists(path) => RepositoryError::AlreadyExists(path),
            AccessError::NotCollection(path) => RepositoryError::NotCollection(path),
            AccessError::Lock(err) => RepositoryError::Lock(err),
            AccessError::Path(err) => RepositoryError::Path(err),
            AccessError::Root => {
                RepositoryError::IllegalOperation("operation not permitted on the root".to_string())
            }
            AccessError::IntoSelf { from, to } => RepositoryError::IllegalOperation(format!(
                "cannot move or copy {} into {}",
                from, to
            )),
            other => RepositoryError::Access(other),
        }
    }
}

#[derive(Debug)]
pub struct Repository<A> {
    accessor: A,
    authorizer: Authorizer,
    locks: PathLockManager,
}

impl<A: ResourceAccessor> Repository<A> {
    pub fn new(accessor: A, authorizer: Authorizer, locks: PathLockManager) -> Self {
        Self {
            accessor,
            authorizer,
            locks,
        }
    }

    pub fn from_config(accessor: A, config: &RepositoryConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            accessor,
            config.authorizer()?,
            config.lock_manager(),
        ))
    }

    pub fn accessor(&self) -> &A {
        &self.accessor
    }

    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    pub fn locks(&self) -> &PathLockManager {
        &self.locks
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.accessor.cache_stats()
    }

    pub fn retrieve(
        &self,
        principal: Option<&Principal>,
        path: &RepoPath,
        for_processing: bool,
    ) -> Result<Arc<Resource>, RepositoryError> {
        let resource = self.require(path)?;
        if for_processing {
            self.authorizer
                .authorize_read_processed(principal, &resource)?;
        } else {
            self.authorizer.authorize_read(principal, &resource)?;
        }
        Ok(resource)
    }

    /// Children of a collection the caller may read.
    pub fn list_children(
        &self,
        principal: Option<&Principal>,
        path: &RepoPath,
    ) -> Result<Vec<Arc<Resource>>, RepositoryError> {
        let parent = self.retrieve(principal, path, false)?;
        if !parent.is_collection() {
            return Err(RepositoryError::NotCollection(path.clone()));
        }
        let children = self.accessor.load_children(&parent)?;
        Ok(children
            .into_iter()
            .filter(|child| self.authorizer.authorize_read(principal, child).is_ok())
            .collect())
    }

    pub fn create_document(
        &self,
        principal: Option<&Principal>,
        path: &RepoPath,
    ) -> Result<Arc<Resource>, RepositoryError> {
        self.create(principal, path, NodeKind::Document)
    }

    pub fn create_collection(
        &self,
        principal: Option<&Principal>,
        path: &RepoPath,
    ) -> Result<Arc<Resource>, RepositoryError> {
        self.create(principal, path, NodeKind::Collection)
    }

    pub fn store_properties(
        &self,
        principal: Option<&Principal>,
        path: &RepoPath,
        properties: BTreeMap<String, String>,
    ) -> Result<Arc<Resource>, RepositoryError> {
        let _held = self.locks.lock([path.clone()])?;
        let resource = self.require(path)?;
        self.authorizer.authorize_write(principal, &resource)?;
        Self::check_unlocked(principal, &resource)?;

        let stored = self.accessor.store(&resource.with_properties(properties))?;
        tracing::info!(%path, "stored properties");
        Ok(stored)
    }

    /// Set the resource's own ACL, or with `None` make it inherit again.
    pub fn store_acl(
        &self,
        principal: Option<&Principal>,
        path: &RepoPath,
        acl: Option<Acl>,
    ) -> Result<Arc<Resource>, RepositoryError> {
        let parent_path = path.parent();
        let _held = self
            .locks
            .lock(std::iter::once(path.clone()).chain(parent_path.clone()))?;
        let resource = self.require(path)?;
        self.authorizer.authorize_write_acl(principal, &resource)?;
        Self::check_unlocked(principal, &resource)?;

        let (updated, next_acl) = match acl {
            Some(acl) => (resource.with_acl(acl.clone()), acl),
            None => {
                let Some(parent_path) = parent_path else {
                    return Err(RepositoryError::IllegalOperation(
                        "the root ACL cannot be inherited".to_string(),
                    ));
                };
                let parent = self.require(&parent_path)?;
                (resource.with_inherited_acl(), parent.acl().clone())
            }
        };
        if resource.acl().principals(Privilege::Admin) != next_acl.principals(Privilege::Admin) {
            self.authorizer
                .authorize_admin_role_edit(principal, &resource)?;
        }

        let stored = self.accessor.store_acl(&updated)?;
        tracing::info!(%path, inherited = stored.is_acl_inherited(), "stored acl");
        Ok(stored)
    }

    pub fn delete(
        &self,
        principal: Option<&Principal>,
        path: &RepoPath,
    ) -> Result<(), RepositoryError> {
        let Some(parent_path) = path.parent() else {
            return Err(RepositoryError::IllegalOperation(
                "the root cannot be deleted".to_string(),
            ));
        };
        let _held = self.locks.lock([path.clone(), parent_path.clone()])?;
        let resource = self.require(path)?;
        let parent = self.require(&parent_path)?;
        self.authorizer
            .authorize_delete(principal, &resource, &parent)?;
        Self::check_unlocked(principal, &resource)?;

        self.accessor.delete(&resource)?;
        tracing::info!(%path, "deleted resource");
        Ok(())
    }

    pub fn move_resource(
        &self,
        principal: Option<&Principal>,
        from: &RepoPath,
        to: &RepoPath,
    ) -> Result<Arc<Resource>, RepositoryError> {
        let (source_parent_path, dest_parent_path) = Self::transfer_parents(from, to, "moved")?;
        let _held = self.locks.lock([
            from.clone(),
            to.clone(),
            source_parent_path.clone(),
            dest_parent_path.clone(),
        ])?;

        let source = self.require(from)?;
        let source_parent = self.require(&source_parent_path)?;
        let dest_parent = self.require_collection(&dest_parent_path)?;
        self.authorizer
            .authorize_move(principal, &source, &source_parent, &dest_parent)?;
        Self::check_unlocked(principal, &source)?;
        self.check_absent(to)?;

        self.accessor.move_to(&source, to)?;
        tracing::info!(%from, %to, "moved resource");
        self.require(to)
    }

    pub fn copy_resource(
        &self,
        principal: Option<&Principal>,
        from: &RepoPath,
        to: &RepoPath,
    ) -> Result<Arc<Resource>, RepositoryError> {
        let (_, dest_parent_path) = Self::transfer_parents(from, to, "copied")?;
        let _held = self
            .locks
            .lock([from.clone(), to.clone(), dest_parent_path.clone()])?;

        let source = self.require(from)?;
        let dest_parent = self.require_collection(&dest_parent_path)?;
        self.authorizer
            .authorize_copy(principal, &source, &dest_parent)?;
        self.check_absent(to)?;

        self.accessor.copy_to(&source, to)?;
        tracing::info!(%from, %to, "copied resource");
        self.require(to)
    }

    /// Take (or refresh) the caller's lock on a resource for `timeout`.
    pub fn lock_resource(
        &self,
        principal: Option<&Principal>,
        path: &RepoPath,
        timeout: Duration,
    ) -> Result<Arc<Resource>, RepositoryError> {
        let Some(owner) = principal else {
            return Err(AuthError::AuthenticationRequired { path: path.clone() }.into());
        };
        let _held = self.locks.lock([path.clone()])?;
        let resource = self.require(path)?;
        self.authorizer.authorize_write(principal, &resource)?;
        Self::check_unlocked(principal, &resource)?;

        let lock = LockInfo::new(owner.name(), timeout);
        let stored = self.accessor.store(&resource.with_lock(Some(lock)))?;
        tracing::info!(%path, owner = %owner, ?timeout, "locked resource");
        Ok(stored)
    }

    pub fn unlock_resource(
        &self,
        principal: Option<&Principal>,
        path: &RepoPath,
    ) -> Result<Arc<Resource>, RepositoryError> {
        let _held = self.locks.lock([path.clone()])?;
        let resource = self.require(path)?;
        self.authorizer.authorize_unlock(principal, &resource)?;
        if resource.lock().is_none() {
            return Ok(resource);
        }

        let stored = self.accessor.store(&resource.with_lock(None))?;
        tracing::info!(%path, "unlocked resource");
        Ok(stored)
    }

    /// Toggle read-only mode. Only a Root principal may do this.
    pub fn set_read_only(
        &self,
        principal: Option<&Principal>,
        read_only: bool,
    ) -> Result<(), RepositoryError> {
        let root = self.require(&RepoPath::root())?;
        self.authorizer.authorize_root_role_edit(principal, &root)?;
        self.authorizer.set_read_only(read_only);
        Ok(())
    }

    pub fn is_read_only(&self) -> bool {
        self.authorizer.is_read_only()
    }

    fn create(
        &self,
        principal: Option<&Principal>,
        path: &RepoPath,
        kind: NodeKind,
    ) -> Result<Arc<Resource>, RepositoryError> {
        let (Some(parent_path), Some(name)) = (path.parent(), path.name()) else {
            return Err(RepositoryError::AlreadyExists(path.clone()));
        };
        // resources are owned by their creator
        let Some(owner) = principal else {
            return Err(AuthError::AuthenticationRequired { path: path.clone() }.into());
        };

        let _held = self.locks.lock([parent_path.clone(), path.clone()])?;
        let parent = self.require_collection(&parent_path)?;
        self.authorizer.authorize_create(principal, &parent)?;
        self.check_absent(path)?;

        let created = self
            .accessor
            .create(&parent, name, NodeData::new(kind, owner.name()))?;
        tracing::info!(%path, ?kind, owner = %owner, "created resource");
        Ok(created)
    }

    fn require(&self, path: &RepoPath) -> Result<Arc<Resource>, RepositoryError> {
        self.accessor
            .load(path)?
            .ok_or_else(|| RepositoryError::NotFound(path.clone()))
    }

    fn require_collection(&self, path: &RepoPath) -> Result<Arc<Resource>, RepositoryError> {
        let resource = self.require(path)?;
        if !resource.is_collection() {
            return Err(RepositoryError::NotCollection(path.clone()));
        }
        Ok(resource)
    }

    fn check_absent(&self, path: &RepoPath) -> Result<(), RepositoryError> {
        if self.accessor.load(path)?.is_some() {
            return Err(RepositoryError::AlreadyExists(path.clone()));
        }
        Ok(())
    }

    /// Fails if someone other than `principal` holds an unexpired lock.
    fn check_unlocked(
        principal: Option<&Principal>,
        resource: &Resource,
    ) -> Result<(), RepositoryError> {
        match resource.active_lock() {
            Some(lock) if principal.map(Principal::name) != Some(lock.owner.as_str()) => {
                Err(RepositoryError::ResourceLocked {
                    path: resource.path().clone(),
                    owner: lock.owner.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Parents of both endpoints of a move or copy.
    fn transfer_parents(
        from: &RepoPath,
        to: &RepoPath,
        verb: &str,
    ) -> Result<(RepoPath, RepoPath), RepositoryError> {
        if to == from || to.is_descendant_of(from) {
            return Err(RepositoryError::IllegalOperation(format!(
                "{} cannot be {} into itself",
                from, verb
            )));
        }
        match (from.parent(), to.parent()) {
            (Some(source_parent), Some(dest_parent)) => Ok((source_parent, dest_parent)),
            (None, _) => Err(RepositoryError::IllegalOperation(format!(
                "the root cannot be {}",
                verb
            ))),
            (_, None) => Err(RepositoryError::AlreadyExists(to.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::TreeAccessor;
    use crate::store::MemoryStore;

    fn p(raw: &str) -> RepoPath {
        RepoPath::parse(raw).unwrap()
    }

    fn repository() -> Repository<TreeAccessor<MemoryStore>> {
        let acl = Acl::new()
            .with_grant(Privilege::Read, Principal::Everyone)
            .with_grant(Privilege::Bind, Principal::Authenticated)
            .with_grant(Privilege::ReadWrite, Principal::Owner);
        let store = MemoryStore::new(NodeData::collection("root").with_acl(Some(acl)));
        Repository::new(
            TreeAccessor::new(store),
            Authorizer::default(),
            PathLockManager::default(),
        )
    }

    #[test]
    fn test_root_rules() {
        let repo = repository();
        let alice = Principal::user("alice");
        assert!(matches!(
            repo.delete(Some(&alice), &RepoPath::root()),
            Err(RepositoryError::IllegalOperation(_))
        ));
        assert!(matches!(
            repo.create_document(Some(&alice), &RepoPath::root()),
            Err(RepositoryError::AlreadyExists(_))
        ));
        assert!(matches!(
            repo.move_resource(Some(&alice), &RepoPath::root(), &p("/x")),
            Err(RepositoryError::IllegalOperation(_))
        ));
    }

    #[test]
    fn test_anonymous_create_requires_authentication() {
        let repo = repository();
        assert!(matches!(
            repo.create_document(None, &p("/doc")),
            Err(RepositoryError::Auth(AuthError::AuthenticationRequired { .. }))
        ));
    }

    #[test]
    fn test_access_errors_are_normalized() {
        let err: RepositoryError = AccessError::NotFound(p("/x")).into();
        assert!(matches!(err, RepositoryError::NotFound(_)));
        let err: RepositoryError = AccessError::IntoSelf {
            from: p("/a"),
            to: p("/a/b"),
        }
        .into();
        assert!(matches!(err, RepositoryError::IllegalOperation(_)));
    }

    #[test]
    fn test_lock_blocks_other_writers() {
        let repo = repository();
        let alice = Principal::user("alice");
        let bob = Principal::user("bob");
        repo.create_document(Some(&alice), &p("/doc")).unwrap();
        // let any authenticated user write /doc
        let acl = Acl::new()
            .with_grant(Privilege::Read, Principal::Everyone)
            .with_grant(Privilege::ReadWrite, Principal::Authenticated);
        let doc = repo.retrieve(None, &p("/doc"), false).unwrap();
        repo.accessor().store_acl(&doc.with_acl(acl)).unwrap();

        repo.lock_resource(Some(&alice), &p("/doc"), Duration::from_secs(60))
            .unwrap();
        let mut properties = BTreeMap::new();
        properties.insert("title".to_string(), "draft".to_string());
        let stored = repo
            .store_properties(Some(&alice), &p("/doc"), properties.clone())
            .unwrap();
        assert_eq!(stored.property("title"), Some("draft"));
        assert_eq!(
            stored.active_lock().map(|lock| lock.owner.as_str()),
            Some("alice")
        );

        match repo.store_properties(Some(&bob), &p("/doc"), properties) {
            Err(RepositoryError::ResourceLocked { path, owner }) => {
                assert_eq!(path, p("/doc"));
                assert_eq!(owner, "alice");
            }
            other => panic!("expected ResourceLocked, got {:?}", other),
        }
        assert!(matches!(
            repo.unlock_resource(Some(&bob), &p("/doc")),
            Err(RepositoryError::Auth(AuthError::AuthorizationDenied { .. }))
        ));

        repo.unlock_resource(Some(&alice), &p("/doc")).unwrap();
        assert!(repo
            .retrieve(None, &p("/doc"), false)
            .unwrap()
            .lock()
            .is_none());
    }
}
