//! Shared test utilities for repository integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::accessor::{AccessError, ResourceAccessor, TreeAccessor};
use common::acl::{Acl, Principal, Privilege, Role};
use common::auth::{Authorizer, RoleRegistry, StaticGroups};
use common::cache::{CacheConfig, CacheMode, CacheStats, ConcurrentCache};
use common::lock::PathLockManager;
use common::node::NodeData;
use common::path::RepoPath;
use common::repository::Repository;
use common::resource::Resource;
use common::store::MemoryStore;

pub const ROOT_USER: &str = "root@localhost";

pub type DynRepository = Repository<Arc<dyn ResourceAccessor>>;

pub fn p(raw: &str) -> RepoPath {
    RepoPath::parse(raw).unwrap()
}

pub fn user(name: &str) -> Principal {
    Principal::user(name)
}

/// Route test logs through `RUST_LOG` when set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Everyone reads, authenticated users create, owners write.
pub fn root_acl() -> Acl {
    Acl::new()
        .with_grant(Privilege::Read, Principal::Everyone)
        .with_grant(Privilege::Bind, Principal::Authenticated)
        .with_grant(Privilege::ReadWrite, Principal::Owner)
}

pub fn memory_store() -> MemoryStore {
    MemoryStore::new(NodeData::collection(ROOT_USER).with_acl(Some(root_acl())))
}

pub fn authorizer(groups: StaticGroups) -> Authorizer {
    let mut roles = RoleRegistry::new();
    roles.assign(Role::Root, user(ROOT_USER));
    Authorizer::new(roles, Arc::new(groups), false)
}

/// Set up a repository over a fresh in-memory store, cached per `mode`.
/// Returns the store too so tests can look underneath the cache.
pub fn setup_with_mode(mode: CacheMode) -> (DynRepository, MemoryStore) {
    init_tracing();
    let store = memory_store();
    let config = CacheConfig {
        mode,
        ..CacheConfig::default()
    };
    let accessor: Arc<dyn ResourceAccessor> = match mode {
        CacheMode::None => Arc::new(TreeAccessor::new(store.clone())),
        CacheMode::Locking => Arc::new(common::cache::LockingCache::new(
            TreeAccessor::new(store.clone()),
            config,
            PathLockManager::default(),
        )),
        CacheMode::Concurrent => Arc::new(ConcurrentCache::new(
            TreeAccessor::new(store.clone()),
            config,
        )),
    };
    let repository = Repository::new(
        accessor,
        authorizer(StaticGroups::new()),
        PathLockManager::default(),
    );
    (repository, store)
}

/// Set up a repository with the default (concurrent) cache.
pub fn setup_test_env() -> DynRepository {
    setup_with_mode(CacheMode::Concurrent).0
}

pub const ALL_MODES: [CacheMode; 3] = [CacheMode::None, CacheMode::Locking, CacheMode::Concurrent];

/// Accessor wrapper counting single and batched loads.
#[derive(Debug)]
pub struct CountingAccessor<A> {
    inner: A,
    loads: AtomicUsize,
    batch_loads: AtomicUsize,
}

impl<A: ResourceAccessor> CountingAccessor<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            loads: AtomicUsize::new(0),
            batch_loads: AtomicUsize::new(0),
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn batch_loads(&self) -> usize {
        self.batch_loads.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.loads.store(0, Ordering::SeqCst);
        self.batch_loads.store(0, Ordering::SeqCst);
    }
}

impl<A: ResourceAccessor> ResourceAccessor for CountingAccessor<A> {
    fn load(&self, path: &RepoPath) -> Result<Option<Arc<Resource>>, AccessError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(path)
    }

    fn load_children(&self, parent: &Resource) -> Result<Vec<Arc<Resource>>, AccessError> {
        self.batch_loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load_children(parent)
    }

    fn create(
        &self,
        parent: &Resource,
        name: &str,
        data: NodeData,
    ) -> Result<Arc<Resource>, AccessError> {
        self.inner.create(parent, name, data)
    }

    fn store(&self, resource: &Resource) -> Result<Arc<Resource>, AccessError> {
        self.inner.store(resource)
    }

    fn store_acl(&self, resource: &Resource) -> Result<Arc<Resource>, AccessError> {
        self.inner.store_acl(resource)
    }

    fn delete(&self, resource: &Resource) -> Result<(), AccessError> {
        self.inner.delete(resource)
    }

    fn move_to(&self, source: &Resource, dest: &RepoPath) -> Result<(), AccessError> {
        self.inner.move_to(source, dest)
    }

    fn copy_to(&self, source: &Resource, dest: &RepoPath) -> Result<(), AccessError> {
        self.inner.copy_to(source, dest)
    }

    fn cache_stats(&self) -> Option<CacheStats> {
        self.inner.cache_stats()
    }
}

/// Create `path` straight through an accessor, bypassing authorization.
pub fn create_raw<A: ResourceAccessor>(accessor: &A, path: &str, data: NodeData) -> Arc<Resource> {
    let path = p(path);
    let parent = accessor
        .load(&path.parent().unwrap())
        .unwrap()
        .unwrap();
    accessor
        .create(&parent, path.name().unwrap(), data)
        .unwrap()
}
