use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use common::prelude::*;

pub const ROOT_USER: &str = "root@localhost";

pub type SharedRepository = Arc<Repository<Arc<dyn ResourceAccessor>>>;

/// Outcome counts for one worker.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WorkerReport {
    pub ok: u64,
    pub denied: u64,
    pub conflicts: u64,
    pub failed: u64,
}

impl WorkerReport {
    fn record(&mut self, outcome: Result<(), RepositoryError>) {
        match outcome {
            Ok(()) => self.ok += 1,
            Err(RepositoryError::Auth(_)) => self.denied += 1,
            Err(
                RepositoryError::ResourceLocked { .. }
                | RepositoryError::Lock(_)
                | RepositoryError::AlreadyExists(_)
                | RepositoryError::NotFound(_),
            ) => self.conflicts += 1,
            Err(err) => {
                tracing::warn!(error = %err, "operation failed");
                self.failed += 1;
            }
        }
    }

    pub fn merge(mut self, other: WorkerReport) -> Self {
        self.ok += other.ok;
        self.denied += other.denied;
        self.conflicts += other.conflicts;
        self.failed += other.failed;
        self
    }
}

/// Root ACL for a fresh repository: everyone reads, authenticated users
/// create, owners write.
pub fn root_acl() -> Acl {
    Acl::new()
        .with_grant(Privilege::All, Principal::user(ROOT_USER))
        .with_grant(Privilege::Read, Principal::Everyone)
        .with_grant(Privilege::Bind, Principal::Authenticated)
        .with_grant(Privilege::ReadWrite, Principal::Owner)
}

pub fn shared_path() -> Result<RepoPath, PathError> {
    RepoPath::parse("/shared")
}

fn worker_path(worker: usize) -> Result<RepoPath, PathError> {
    RepoPath::root().join(&format!("w{}", worker))
}

/// Create the shared collection, writable by any authenticated user, and
/// fill it with `documents` documents.
pub fn seed(repository: &SharedRepository, documents: usize) -> Result<(), RepositoryError> {
    let root = Principal::user(ROOT_USER);
    let shared = shared_path()?;
    repository.create_collection(Some(&root), &shared)?;
    let acl = Acl::new()
        .with_grant(Privilege::Read, Principal::Everyone)
        .with_grant(Privilege::ReadWrite, Principal::Authenticated);
    repository.store_acl(Some(&root), &shared, Some(acl))?;

    for index in 0..documents {
        repository.create_document(Some(&root), &shared.join(&format!("doc-{}", index))?)?;
    }
    tracing::info!(documents, "seeded shared collection");
    Ok(())
}

/// Deterministic xorshift so runs are repeatable per worker.
struct Steps(u64);

impl Steps {
    fn next(&mut self, bound: usize) -> usize {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        (x % bound.max(1) as u64) as usize
    }
}

pub fn run_worker(
    repository: &SharedRepository,
    worker: usize,
    operations: usize,
    documents: usize,
) -> Result<WorkerReport, RepositoryError> {
    let me = Principal::user(format!("worker-{}", worker));
    let home = worker_path(worker)?;
    let shared = shared_path()?;
    let mut steps = Steps(0x9e37_79b9_7f4a_7c15 ^ (worker as u64 + 1));
    let mut report = WorkerReport::default();

    report.record(repository.create_collection(Some(&me), &home).map(|_| ()));

    for op in 0..operations {
        let shared_doc = shared.join(&format!("doc-{}", steps.next(documents)))?;
        let own_doc = home.join(&format!("doc-{}", steps.next(documents)))?;

        let outcome = match steps.next(100) {
            0..=39 => repository
                .retrieve(Some(&me), &shared_doc, false)
                .map(|_| ()),
            40..=44 => repository
                .retrieve(Some(&me), &shared_doc, true)
                .map(|_| ()),
            45..=52 => repository.list_children(None, &shared).map(|_| ()),
            53..=64 => {
                let mut properties = BTreeMap::new();
                properties.insert("writer".to_string(), me.to_string());
                properties.insert("op".to_string(), op.to_string());
                repository
                    .store_properties(Some(&me), &shared_doc, properties)
                    .map(|_| ())
            }
            65..=71 => repository
                .lock_resource(Some(&me), &shared_doc, Duration::from_millis(50))
                .and_then(|_| repository.unlock_resource(Some(&me), &shared_doc))
                .map(|_| ()),
            72..=81 => repository.create_document(Some(&me), &own_doc).map(|_| ()),
            82..=87 => repository.delete(Some(&me), &own_doc),
            88..=93 => {
                let target = home.join(&format!("moved-{}", op))?;
                repository
                    .move_resource(Some(&me), &own_doc, &target)
                    .map(|_| ())
            }
            _ => {
                let target = home.join(&format!("copy-{}", op))?;
                repository
                    .copy_resource(Some(&me), &shared_doc, &target)
                    .map(|_| ())
            }
        };
        report.record(outcome);
    }

    tracing::debug!(worker, ?report, "worker finished");
    Ok(report)
}
