use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{CacheConfig, Entry, EntryStore, Epochs, EvictionList, InsertOutcome};
use crate::path::RepoPath;
use crate::resource::Resource;

/// Map and eviction list behind a single mutex.
///
/// The map is ordered by [`RepoPath`], so a subtree is one contiguous range
/// starting at its root.
#[derive(Debug, Default)]
pub struct SynchronizedEntries {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    map: BTreeMap<RepoPath, Entry>,
    order: EvictionList,
    epochs: Epochs,
}

impl State {
    fn insert_one(&mut self, resource: &Arc<Resource>, config: &CacheConfig) -> usize {
        let path = resource.path().clone();
        let mut evicted = 0;

        if let Some(previous) = self.map.remove(&path) {
            self.order.unlink(previous.slot);
        } else if self.map.len() >= config.max_items {
            for _ in 0..config.eviction_batch(self.map.len()) {
                match self.order.pop_oldest() {
                    Some(oldest) => {
                        self.map.remove(&oldest);
                        evicted += 1;
                    }
                    None => break,
                }
            }
        }

        let slot = self.order.push_front(path.clone());
        self.map.insert(
            path,
            Entry {
                resource: resource.clone(),
                slot,
            },
        );
        evicted
    }

    fn subtree(&self, root: &RepoPath) -> Vec<RepoPath> {
        self.map
            .range(root.clone()..)
            .map(|(path, _)| path)
            .take_while(|path| *path == root || path.is_descendant_of(root))
            .cloned()
            .collect()
    }
}

impl EntryStore for SynchronizedEntries {
    fn lookup(&self, path: &RepoPath) -> Option<Arc<Resource>> {
        self.state
            .lock()
            .map
            .get(path)
            .map(|entry| entry.resource.clone())
    }

    fn snapshot(&self) -> Epochs {
        self.state.lock().epochs.clone()
    }

    fn insert(
        &self,
        resources: &[Arc<Resource>],
        config: &CacheConfig,
        since: Option<&Epochs>,
    ) -> InsertOutcome {
        let mut state = self.state.lock();
        let mut outcome = InsertOutcome::default();
        for resource in resources {
            if since.is_some_and(|since| !state.epochs.unchanged_since(since, resource.path())) {
                continue;
            }
            outcome.evicted += state.insert_one(resource, config);
            outcome.inserted += 1;
        }
        outcome
    }

    fn remove(&self, path: &RepoPath, include_descendants: bool) -> usize {
        let mut state = self.state.lock();
        state.epochs.invalidate(path, include_descendants);

        let doomed = if include_descendants {
            state.subtree(path)
        } else {
            vec![path.clone()]
        };
        let mut removed = 0;
        for path in doomed {
            if let Some(entry) = state.map.remove(&path) {
                state.order.unlink(entry.slot);
                removed += 1;
            }
        }
        removed
    }

    fn discard(&self, resource: &Arc<Resource>) -> bool {
        let mut state = self.state.lock();
        let same = state
            .map
            .get(resource.path())
            .is_some_and(|entry| Arc::ptr_eq(&entry.resource, resource));
        if !same {
            return false;
        }
        if let Some(entry) = state.map.remove(resource.path()) {
            state.order.unlink(entry.slot);
        }
        true
    }

    fn len(&self) -> usize {
        self.state.lock().map.len()
    }

    fn clear(&self) {
        let mut state = self.state.lock();
        state.epochs.invalidate_all();
        state.map.clear();
        state.order.clear();
    }

    fn eviction_order(&self) -> Vec<RepoPath> {
        self.state.lock().order.iter().cloned().collect()
    }

    fn is_consistent(&self) -> bool {
        let state = self.state.lock();
        state.order.is_well_formed()
            && state.order.len() == state.map.len()
            && state
                .map
                .values()
                .all(|entry| state.order.contains(entry.slot))
            && state.order.iter().all(|path| state.map.contains_key(path))
    }
}
