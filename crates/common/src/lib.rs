/**
 * Hierarchical repository paths.
 *  Canonical segment-wise ordering, so a subtree
 *  is a contiguous range after its root.
 */
pub mod path;
/**
 * Immutable tree node snapshots.
 *  Every change produces a new node value.
 */
pub mod node;
/**
 * Access control lists, privileges and principals.
 */
pub mod acl;
/**
 * Materialized resources: what the cache holds
 *  and what authorization runs against.
 */
pub mod resource;
/**
 * Backing store contract and the in-memory store.
 */
pub mod store;
/**
 * Resource accessors. The seam between the
 *  repository and storage, and what the caches wrap.
 */
pub mod accessor;
/**
 * Per-path mutual exclusion with bounded waits.
 */
pub mod lock;
/**
 * Resource caches with insertion-order eviction.
 *  Locking and concurrent variants.
 */
pub mod cache;
/**
 * Authorization: roles, groups, read-only mode
 *  and ACL evaluation.
 */
pub mod auth;
/**
 * Principal-aware repository facade.
 */
pub mod repository;
/**
 * TOML configuration for all of the above.
 */
pub mod config;

pub mod prelude {
    pub use crate::accessor::{AccessError, ResourceAccessor, TreeAccessor};
    pub use crate::acl::{Acl, Principal, Privilege, Role};
    pub use crate::auth::{AuthError, Authorizer, Operation, RoleRegistry, StaticGroups};
    pub use crate::cache::{CacheConfig, CacheMode, CacheStats, ConcurrentCache, LockingCache};
    pub use crate::config::{ConfigError, RepositoryConfig};
    pub use crate::lock::{LockConfig, LockError, LockSet, PathLockManager};
    pub use crate::node::{NodeData, NodeKind};
    pub use crate::path::{PathError, RepoPath};
    pub use crate::repository::{Repository, RepositoryError};
    pub use crate::resource::{LockInfo, Resource};
    pub use crate::store::{BackingStore, MemoryStore, StoreError};
}
