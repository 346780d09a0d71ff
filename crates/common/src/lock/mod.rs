//! Per-path mutual exclusion
//!
//! Every locked path owns a disposable token in a shared table. A caller wins
//! a path only by creating its token; a caller that finds a token waits
//! (bounded) for it to be released and then competes again for a *new* token.
//! Released tokens are never reused.
//!
//! Multi-path requests are sorted into the canonical [`RepoPath`] order before
//! any claim, so overlapping requests cannot deadlock. One `lock` call waits
//! at most `max_retries` times across all of its paths. On failure every path
//! already claimed by the request is released before the error is returned.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::path::RepoPath;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("could not lock {path} after {attempts} attempts")]
    AcquisitionFailed { path: RepoPath, attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Contended waits allowed per `lock` call before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Upper bound on a single wait for a contended token
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    20
}

fn default_wait_timeout_ms() -> u64 {
    500
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            wait_timeout_ms: default_wait_timeout_ms(),
        }
    }
}

impl LockConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

#[derive(Debug, Default)]
struct LockToken {
    released: Mutex<bool>,
    cond: Condvar,
}

impl LockToken {
    fn wait_released(&self, timeout: Duration) {
        let mut released = self.released.lock();
        self.cond
            .wait_while_for(&mut released, |released| !*released, timeout);
    }

    fn release(&self) {
        *self.released.lock() = true;
        self.cond.notify_all();
    }
}

#[derive(Debug)]
struct LockTable {
    tokens: Mutex<HashMap<RepoPath, Arc<LockToken>>>,
    config: LockConfig,
}

#[derive(Debug, Clone)]
pub struct PathLockManager(Arc<LockTable>);

impl Default for PathLockManager {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}

impl PathLockManager {
    pub fn new(config: LockConfig) -> Self {
        PathLockManager(Arc::new(LockTable {
            tokens: Mutex::new(HashMap::new()),
            config,
        }))
    }

    pub fn config(&self) -> &LockConfig {
        &self.0.config
    }

    /// Lock every path in `paths`, in canonical order. The returned set
    /// releases its paths when dropped.
    pub fn lock<I>(&self, paths: I) -> Result<LockSet, LockError>
    where
        I: IntoIterator<Item = RepoPath>,
    {
        let mut paths: Vec<RepoPath> = paths.into_iter().collect();
        paths.sort();
        paths.dedup();

        let mut held = LockSet {
            manager: self.clone(),
            paths: Vec::with_capacity(paths.len()),
        };
        // one retry budget for the whole set
        let mut retries = self.0.config.max_retries;
        for path in paths {
            // on error `held` drops here and releases the partial set
            self.claim(&path, &mut retries)?;
            held.paths.push(path);
        }
        Ok(held)
    }

    /// Release a set explicitly. Same as dropping it.
    pub fn unlock(&self, set: LockSet) {
        drop(set);
    }

    pub fn is_locked(&self, path: &RepoPath) -> bool {
        self.0.tokens.lock().contains_key(path)
    }

    pub fn locked_count(&self) -> usize {
        self.0.tokens.lock().len()
    }

    /// Claim `path`, spending one retry from `retries` per contended wait.
    /// A claim always follows a wait, so a release during the last wait
    /// still wins the path.
    fn claim(&self, path: &RepoPath, retries: &mut u32) -> Result<(), LockError> {
        let max_retries = self.0.config.max_retries;
        let timeout = self.0.config.wait_timeout();

        loop {
            let contended = {
                let mut tokens = self.0.tokens.lock();
                match tokens.get(path) {
                    Some(token) => token.clone(),
                    None => {
                        tokens.insert(path.clone(), Arc::new(LockToken::default()));
                        return Ok(());
                    }
                }
            };
            if *retries == 0 {
                tracing::warn!(%path, max_retries, "giving up on path lock");
                return Err(LockError::AcquisitionFailed {
                    path: path.clone(),
                    attempts: max_retries,
                });
            }
            *retries -= 1;
            tracing::debug!(%path, retries_left = *retries, "path lock contended, waiting");
            contended.wait_released(timeout);
        }
    }

    fn release(&self, path: &RepoPath) {
        let token = self.0.tokens.lock().remove(path);
        if let Some(token) = token {
            token.release();
        }
    }
}

/// Paths held by one `lock` call.
#[derive(Debug)]
pub struct LockSet {
    manager: PathLockManager,
    paths: Vec<RepoPath>,
}

impl LockSet {
    /// Held paths in acquisition order.
    pub fn paths(&self) -> &[RepoPath] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        for path in self.paths.iter().rev() {
            self.manager.release(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn p(raw: &str) -> RepoPath {
        RepoPath::parse(raw).unwrap()
    }

    fn fast() -> LockConfig {
        LockConfig {
            max_retries: 3,
            wait_timeout_ms: 20,
        }
    }

    #[test]
    fn test_lock_sorts_and_dedups() {
        let manager = PathLockManager::new(fast());
        let set = manager
            .lock(vec![p("/b"), p("/a/c"), p("/a"), p("/b")])
            .unwrap();
        assert_eq!(set.paths(), &[p("/a"), p("/a/c"), p("/b")]);
        assert_eq!(manager.locked_count(), 3);

        manager.unlock(set);
        assert_eq!(manager.locked_count(), 0);
    }

    #[test]
    fn test_contended_lock_fails_after_retries() {
        let manager = PathLockManager::new(fast());
        let _held = manager.lock(vec![p("/b")]).unwrap();

        let started = Instant::now();
        let err = manager.lock(vec![p("/a"), p("/b")]).unwrap_err();
        assert_eq!(
            err,
            LockError::AcquisitionFailed {
                path: p("/b"),
                attempts: 3
            }
        );
        // the partially acquired /a was released on failure
        assert!(!manager.is_locked(&p("/a")));
        assert!(manager.is_locked(&p("/b")));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_waiter_gets_fresh_token_after_release() {
        let manager = PathLockManager::new(LockConfig {
            max_retries: 50,
            wait_timeout_ms: 100,
        });
        let held = manager.lock(vec![p("/a")]).unwrap();

        std::thread::scope(|scope| {
            let waiter = scope.spawn(|| manager.lock(vec![p("/a")]).map(|set| set.len()));
            std::thread::sleep(Duration::from_millis(30));
            drop(held);
            assert_eq!(waiter.join().unwrap(), Ok(1));
        });
        assert_eq!(manager.locked_count(), 0);
    }

    #[test]
    fn test_release_during_last_wait_wins() {
        let manager = PathLockManager::new(LockConfig {
            max_retries: 1,
            wait_timeout_ms: 500,
        });
        let held = manager.lock(vec![p("/a")]).unwrap();

        std::thread::scope(|scope| {
            let waiter = scope.spawn(|| {
                let started = Instant::now();
                let result = manager.lock(vec![p("/a")]).map(|set| set.len());
                (result, started.elapsed())
            });
            std::thread::sleep(Duration::from_millis(20));
            drop(held);
            let (result, elapsed) = waiter.join().unwrap();
            assert_eq!(result, Ok(1));
            assert!(elapsed < Duration::from_millis(500));
        });
        assert_eq!(manager.locked_count(), 0);
    }

    #[test]
    fn test_retry_budget_covers_the_whole_set() {
        let config = LockConfig {
            max_retries: 3,
            wait_timeout_ms: 50,
        };
        let manager = PathLockManager::new(config);
        let first = manager.lock(vec![p("/a")]).unwrap();
        let _second = manager.lock(vec![p("/b")]).unwrap();

        std::thread::scope(|scope| {
            let waiter = scope.spawn(|| {
                let started = Instant::now();
                let result = manager.lock(vec![p("/a"), p("/b")]).map(|set| set.len());
                (result, started.elapsed())
            });
            // /a frees up after two waits, /b never does
            std::thread::sleep(Duration::from_millis(90));
            drop(first);
            let (result, elapsed) = waiter.join().unwrap();
            assert_eq!(
                result,
                Err(LockError::AcquisitionFailed {
                    path: p("/b"),
                    attempts: 3
                })
            );
            let bound = config.wait_timeout() * config.max_retries + Duration::from_millis(100);
            assert!(elapsed < bound);
        });
        assert!(!manager.is_locked(&p("/a")));
        assert!(manager.is_locked(&p("/b")));
    }

    #[test]
    fn test_mutual_exclusion() {
        let manager = PathLockManager::new(LockConfig {
            max_retries: 1000,
            wait_timeout_ms: 50,
        });
        let inside = AtomicUsize::new(0);
        let violations = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        let _set = manager.lock(vec![p("/shared")]).unwrap();
                        if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }
        });
        assert_eq!(violations.load(Ordering::SeqCst), 0);
        assert_eq!(manager.locked_count(), 0);
    }
}
