//! Resource cache
//!
//! [`Cache`] decorates any [`ResourceAccessor`] with a path → [`Resource`]
//! cache bounded by an insertion-order eviction list. Two bookkeeping
//! backends give the two operating modes:
//!
//! - [`LockingCache`]: entries behind one mutex, and every read-miss and write
//!   span held under the cache's own [`PathLockManager`], so a read of a path
//!   being written blocks until the write is done.
//! - [`ConcurrentCache`]: reads are plain lookups on a concurrent map; only
//!   the eviction bookkeeping is serialized. Writes persist first, then swap
//!   the entry.
//!
//! In both modes the internal mutex is never held across a call into the
//! wrapped accessor. Loads snapshot the invalidation [`Epochs`] before
//! fetching and skip inserting any path invalidated meanwhile, so a slow read
//! can never re-insert a value a concurrent write already superseded.

mod concurrent;
mod eviction;
mod synchronized;

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::accessor::{AccessError, ResourceAccessor};
use crate::lock::{LockError, LockSet, PathLockManager};
use crate::node::NodeData;
use crate::path::RepoPath;
use crate::resource::Resource;

pub use concurrent::ConcurrentEntries;
pub use eviction::{EvictionList, SlotKey};
pub use synchronized::SynchronizedEntries;

/// Which cache, if any, sits in front of the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    None,
    Locking,
    #[default]
    Concurrent,
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheMode::None => write!(f, "none"),
            CacheMode::Locking => write!(f, "locking"),
            CacheMode::Concurrent => write!(f, "concurrent"),
        }
    }
}

impl FromStr for CacheMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(CacheMode::None),
            "locking" => Ok(CacheMode::Locking),
            "concurrent" => Ok(CacheMode::Concurrent),
            other => Err(format!("unknown cache mode: {}", other)),
        }
    }
}

/// Configuration for the resource cache
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub mode: CacheMode,
    /// Maximum number of cached resources (default: 1000)
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    /// Share of entries dropped when the cache is full (default: 0.1)
    #[serde(default = "default_evict_ratio")]
    pub evict_ratio: f64,
    /// Largest missing share of a child list that is still fetched child by
    /// child instead of in one batch (default: 0.05)
    #[serde(default = "default_children_load_threshold")]
    pub children_load_threshold: f64,
}

fn default_max_items() -> usize {
    1000
}

fn default_evict_ratio() -> f64 {
    0.1
}

fn default_children_load_threshold() -> f64 {
    0.05
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::default(),
            max_items: default_max_items(),
            evict_ratio: default_evict_ratio(),
            children_load_threshold: default_children_load_threshold(),
        }
    }
}

impl CacheConfig {
    /// Entries to drop when `occupancy` entries fill the cache.
    pub fn eviction_batch(&self, occupancy: usize) -> usize {
        ((occupancy as f64 * self.evict_ratio).floor() as usize).max(1)
    }
}

/// Cache statistics for debugging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub selective_loads: u64,
    pub full_loads: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    selective_loads: AtomicU64,
    full_loads: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// What a cache entry holds: the value and its place in the eviction list.
#[derive(Debug, Clone)]
pub struct Entry {
    pub resource: Arc<Resource>,
    pub slot: SlotKey,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Resources actually inserted. Paths invalidated since the snapshot are
    /// skipped.
    pub inserted: usize,
    pub evicted: usize,
}

const EPOCH_STRIPES: usize = 32;

/// Invalidation counters, striped by path hash.
///
/// Removing a single path bumps its stripe only. Removing a subtree or
/// clearing bumps the global counter, since the affected paths are unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Epochs {
    global: u64,
    stripes: [u64; EPOCH_STRIPES],
}

impl Epochs {
    fn stripe(path: &RepoPath) -> usize {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        (hasher.finish() % EPOCH_STRIPES as u64) as usize
    }

    pub fn invalidate(&mut self, path: &RepoPath, include_descendants: bool) {
        if include_descendants {
            self.global += 1;
        } else {
            self.stripes[Self::stripe(path)] += 1;
        }
    }

    pub fn invalidate_all(&mut self) {
        self.global += 1;
    }

    /// True if nothing that could cover `path` was invalidated since `since`.
    pub fn unchanged_since(&self, since: &Epochs, path: &RepoPath) -> bool {
        let stripe = Self::stripe(path);
        self.global == since.global && self.stripes[stripe] == since.stripes[stripe]
    }
}

/// Map + eviction-list bookkeeping behind a [`Cache`].
///
/// Every method leaves the map and the list agreeing on membership.
pub trait EntryStore: Send + Sync + Default {
    fn lookup(&self, path: &RepoPath) -> Option<Arc<Resource>>;

    /// Current invalidation counters. Bumped by every removal and clear.
    fn snapshot(&self) -> Epochs;

    /// Insert or replace `resources` in order, each becoming the newest
    /// entry. With `since`, resources whose path was invalidated after that
    /// snapshot are skipped.
    fn insert(
        &self,
        resources: &[Arc<Resource>],
        config: &CacheConfig,
        since: Option<&Epochs>,
    ) -> InsertOutcome;

    /// Returns the number of entries removed.
    fn remove(&self, path: &RepoPath, include_descendants: bool) -> usize;

    /// Remove the entry for `resource`'s path only if it still holds this
    /// exact value.
    fn discard(&self, resource: &Arc<Resource>) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self);

    /// Paths from newest to oldest.
    fn eviction_order(&self) -> Vec<RepoPath>;

    fn is_consistent(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildrenLoad {
    Cached,
    Selective,
    Full,
}

fn plan_children_load(total: usize, missing: usize, threshold: f64) -> ChildrenLoad {
    if missing == 0 {
        ChildrenLoad::Cached
    } else if missing as f64 / total as f64 <= threshold {
        ChildrenLoad::Selective
    } else {
        ChildrenLoad::Full
    }
}

pub struct Cache<A, E> {
    accessor: A,
    entries: E,
    config: CacheConfig,
    // Held across read-miss and write spans in locking mode only
    span_locks: Option<PathLockManager>,
    counters: Counters,
}

/// Cache whose read misses and writes are serialized per path.
pub type LockingCache<A> = Cache<A, SynchronizedEntries>;

/// Cache with non-blocking reads.
pub type ConcurrentCache<A> = Cache<A, ConcurrentEntries>;

impl<A: ResourceAccessor> Cache<A, SynchronizedEntries> {
    pub fn new(accessor: A, config: CacheConfig, locks: PathLockManager) -> Self {
        Self::build(accessor, config, Some(locks))
    }
}

impl<A: ResourceAccessor> Cache<A, ConcurrentEntries> {
    pub fn new(accessor: A, config: CacheConfig) -> Self {
        Self::build(accessor, config, None)
    }
}

impl<A, E> fmt::Debug for Cache<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.config)
            .field("locking", &self.span_locks.is_some())
            .finish()
    }
}

impl<A: ResourceAccessor, E: EntryStore> Cache<A, E> {
    fn build(accessor: A, config: CacheConfig, span_locks: Option<PathLockManager>) -> Self {
        Self {
            accessor,
            entries: E::default(),
            config,
            span_locks,
            counters: Counters::default(),
        }
    }

    pub fn accessor(&self) -> &A {
        &self.accessor
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Cached value for `path`. An entry whose lock expired is dropped and
    /// reported as a miss.
    pub fn get(&self, path: &RepoPath) -> Option<Arc<Resource>> {
        match self.entries.lookup(path) {
            Some(resource) if resource.is_lock_expired() => {
                self.entries.discard(&resource);
                tracing::debug!(%path, "dropping cached resource with expired lock");
                Counters::bump(&self.counters.misses, 1);
                None
            }
            Some(resource) => {
                Counters::bump(&self.counters.hits, 1);
                Some(resource)
            }
            None => {
                Counters::bump(&self.counters.misses, 1);
                None
            }
        }
    }

    pub fn put(&self, resource: Arc<Resource>) {
        self.insert(&[resource], None);
    }

    pub fn remove(&self, path: &RepoPath, include_descendants: bool) -> usize {
        let removed = self.entries.remove(path, include_descendants);
        if removed > 0 {
            tracing::debug!(%path, include_descendants, removed, "invalidated cache entries");
        }
        removed
    }

    pub fn contains(&self, path: &RepoPath) -> bool {
        self.entries.lookup(path).is_some()
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let read = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CacheStats {
            entries: self.entries.len(),
            hits: read(&self.counters.hits),
            misses: read(&self.counters.misses),
            evictions: read(&self.counters.evictions),
            selective_loads: read(&self.counters.selective_loads),
            full_loads: read(&self.counters.full_loads),
        }
    }

    /// Paths from newest to oldest.
    pub fn eviction_order(&self) -> Vec<RepoPath> {
        self.entries.eviction_order()
    }

    pub fn is_consistent(&self) -> bool {
        self.entries.is_consistent()
    }

    fn insert(&self, resources: &[Arc<Resource>], since: Option<&Epochs>) -> InsertOutcome {
        let outcome = self.entries.insert(resources, &self.config, since);
        if outcome.evicted > 0 {
            tracing::debug!(evicted = outcome.evicted, "evicted oldest cache entries");
            Counters::bump(&self.counters.evictions, outcome.evicted as u64);
        }
        outcome
    }

    fn span<I>(&self, paths: I) -> Result<Option<LockSet>, LockError>
    where
        I: IntoIterator<Item = RepoPath>,
    {
        match &self.span_locks {
            Some(locks) => locks.lock(paths).map(Some),
            None => Ok(None),
        }
    }

    fn fetch(&self, path: &RepoPath) -> Result<Option<Arc<Resource>>, AccessError> {
        let snapshot = self.entries.snapshot();
        let loaded = self.accessor.load(path)?;
        if let Some(resource) = &loaded {
            self.insert(std::slice::from_ref(resource), Some(&snapshot));
        }
        Ok(loaded)
    }

    /// Re-insert the persisted result of a write.
    fn replace(&self, resource: &Arc<Resource>, include_descendants: bool) {
        self.remove(resource.path(), include_descendants);
        self.put(resource.clone());
    }
}

impl<A: ResourceAccessor, E: EntryStore> ResourceAccessor for Cache<A, E> {
    fn load(&self, path: &RepoPath) -> Result<Option<Arc<Resource>>, AccessError> {
        let _span = self.span([path.clone()])?;
        if let Some(hit) = self.get(path) {
            return Ok(Some(hit));
        }
        self.fetch(path)
    }

    fn load_children(&self, parent: &Resource) -> Result<Vec<Arc<Resource>>, AccessError> {
        let children = parent.children();
        if children.is_empty() {
            return Ok(Vec::new());
        }

        let mut found: Vec<Option<Arc<Resource>>> =
            children.iter().map(|child| self.get(child)).collect();
        let missing: Vec<usize> = found
            .iter()
            .enumerate()
            .filter_map(|(index, hit)| hit.is_none().then_some(index))
            .collect();

        match plan_children_load(
            children.len(),
            missing.len(),
            self.config.children_load_threshold,
        ) {
            ChildrenLoad::Cached => {}
            ChildrenLoad::Selective => {
                Counters::bump(&self.counters.selective_loads, 1);
                for index in missing {
                    let path = &children[index];
                    let _span = self.span([path.clone()])?;
                    found[index] = self.fetch(path)?;
                }
            }
            ChildrenLoad::Full => {
                Counters::bump(&self.counters.full_loads, 1);
                tracing::debug!(
                    parent = %parent.path(),
                    missing = missing.len(),
                    total = children.len(),
                    "reloading full child list"
                );
                let mut paths = children.to_vec();
                paths.push(parent.path().clone());
                let _span = self.span(paths)?;

                let snapshot = self.entries.snapshot();
                let batch = self.accessor.load_children(parent)?;
                self.insert(&batch, Some(&snapshot));
                return Ok(batch);
            }
        }

        Ok(found.into_iter().flatten().collect())
    }

    fn create(
        &self,
        parent: &Resource,
        name: &str,
        data: NodeData,
    ) -> Result<Arc<Resource>, AccessError> {
        let path = parent.path().join(name)?;
        let _span = self.span([parent.path().clone(), path])?;
        let created = self.accessor.create(parent, name, data)?;
        self.remove(parent.path(), false);
        Ok(created)
    }

    fn store(&self, resource: &Resource) -> Result<Arc<Resource>, AccessError> {
        let _span = self.span([resource.path().clone()])?;
        let stored = self.accessor.store(resource)?;
        self.replace(&stored, false);
        Ok(stored)
    }

    fn store_acl(&self, resource: &Resource) -> Result<Arc<Resource>, AccessError> {
        let _span = self.span([resource.path().clone()])?;
        let stored = self.accessor.store_acl(resource)?;
        // descendants may inherit from this ACL
        self.replace(&stored, resource.is_collection());
        Ok(stored)
    }

    fn delete(&self, resource: &Resource) -> Result<(), AccessError> {
        let path = resource.path();
        let parent = path.parent();
        let _span = self.span(std::iter::once(path.clone()).chain(parent.clone()))?;

        self.accessor.delete(resource)?;
        self.remove(path, resource.is_collection());
        if let Some(parent) = &parent {
            self.remove(parent, false);
        }
        Ok(())
    }

    fn move_to(&self, source: &Resource, dest: &RepoPath) -> Result<(), AccessError> {
        let source_path = source.path();
        let parents: Vec<RepoPath> = [source_path.parent(), dest.parent()]
            .into_iter()
            .flatten()
            .collect();
        let _span = self.span(
            [source_path.clone(), dest.clone()]
                .into_iter()
                .chain(parents.iter().cloned()),
        )?;

        self.accessor.move_to(source, dest)?;
        self.remove(source_path, true);
        self.remove(dest, true);
        for parent in &parents {
            self.remove(parent, false);
        }
        Ok(())
    }

    fn copy_to(&self, source: &Resource, dest: &RepoPath) -> Result<(), AccessError> {
        let dest_parent = dest.parent();
        let _span = self.span(std::iter::once(dest.clone()).chain(dest_parent.clone()))?;

        self.accessor.copy_to(source, dest)?;
        self.remove(dest, true);
        if let Some(parent) = &dest_parent {
            self.remove(parent, false);
        }
        Ok(())
    }

    fn cache_stats(&self) -> Option<CacheStats> {
        Some(self.stats())
    }
}
