use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::{CacheConfig, Entry, EntryStore, Epochs, EvictionList, InsertOutcome};
use crate::path::RepoPath;
use crate::resource::Resource;

/// Concurrent map for lookups, with the eviction bookkeeping behind a mutex.
///
/// Lookups only touch the map. Every map mutation happens while holding
/// `books`, so membership in the map and in the list change together.
#[derive(Debug, Default)]
pub struct ConcurrentEntries {
    map: DashMap<RepoPath, Entry>,
    books: Mutex<Books>,
}

#[derive(Debug, Default)]
struct Books {
    order: EvictionList,
    epochs: Epochs,
}

impl ConcurrentEntries {
    fn insert_one(
        &self,
        books: &mut Books,
        resource: &Arc<Resource>,
        config: &CacheConfig,
    ) -> usize {
        let path = resource.path().clone();
        let mut evicted = 0;

        if let Some((_, previous)) = self.map.remove(&path) {
            books.order.unlink(previous.slot);
        } else if self.map.len() >= config.max_items {
            for _ in 0..config.eviction_batch(self.map.len()) {
                match books.order.pop_oldest() {
                    Some(oldest) => {
                        self.map.remove(&oldest);
                        evicted += 1;
                    }
                    None => break,
                }
            }
        }

        let slot = books.order.push_front(path.clone());
        self.map.insert(
            path,
            Entry {
                resource: resource.clone(),
                slot,
            },
        );
        evicted
    }

    fn unlink(&self, books: &mut Books, path: &RepoPath) -> bool {
        match self.map.remove(path) {
            Some((_, entry)) => {
                books.order.unlink(entry.slot);
                true
            }
            None => false,
        }
    }
}

impl EntryStore for ConcurrentEntries {
    fn lookup(&self, path: &RepoPath) -> Option<Arc<Resource>> {
        self.map.get(path).map(|entry| entry.resource.clone())
    }

    fn snapshot(&self) -> Epochs {
        self.books.lock().epochs.clone()
    }

    fn insert(
        &self,
        resources: &[Arc<Resource>],
        config: &CacheConfig,
        since: Option<&Epochs>,
    ) -> InsertOutcome {
        let mut books = self.books.lock();
        let mut outcome = InsertOutcome::default();
        for resource in resources {
            if since.is_some_and(|since| !books.epochs.unchanged_since(since, resource.path())) {
                continue;
            }
            outcome.evicted += self.insert_one(&mut books, resource, config);
            outcome.inserted += 1;
        }
        outcome
    }

    fn remove(&self, path: &RepoPath, include_descendants: bool) -> usize {
        let mut books = self.books.lock();
        books.epochs.invalidate(path, include_descendants);

        if !include_descendants {
            return usize::from(self.unlink(&mut books, path));
        }

        // collect first: removing while iterating would deadlock on the shard
        let doomed: Vec<RepoPath> = self
            .map
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| key == path || key.is_descendant_of(path))
            .collect();
        doomed
            .iter()
            .filter(|key| self.unlink(&mut books, key))
            .count()
    }

    fn discard(&self, resource: &Arc<Resource>) -> bool {
        let mut books = self.books.lock();
        let removed = self.map.remove_if(resource.path(), |_, entry| {
            Arc::ptr_eq(&entry.resource, resource)
        });
        match removed {
            Some((_, entry)) => {
                books.order.unlink(entry.slot);
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn clear(&self) {
        let mut books = self.books.lock();
        books.epochs.invalidate_all();
        self.map.clear();
        books.order.clear();
    }

    fn eviction_order(&self) -> Vec<RepoPath> {
        self.books.lock().order.iter().cloned().collect()
    }

    fn is_consistent(&self) -> bool {
        let books = self.books.lock();
        books.order.is_well_formed()
            && books.order.len() == self.map.len()
            && self
                .map
                .iter()
                .all(|entry| books.order.contains(entry.value().slot))
            && books.order.iter().all(|path| self.map.contains_key(path))
    }
}
