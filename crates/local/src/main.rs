//! Arbor local driver
//!
//! Builds a repository over an in-memory store from a TOML config, seeds it,
//! and runs a mixed workload from several worker threads. Prints outcome
//! counts and cache statistics when done.

mod workload;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use common::prelude::*;

use workload::{SharedRepository, WorkerReport, ROOT_USER};

/// Arbor local driver - run a concurrent workload against a repository
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML repository config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cache mode override (none, locking, concurrent)
    #[arg(long)]
    mode: Option<CacheMode>,

    /// Number of worker threads
    #[arg(short, long, default_value = "4")]
    workers: usize,

    /// Operations per worker
    #[arg(short, long, default_value = "1000")]
    operations: usize,

    /// Documents seeded in the shared collection
    #[arg(long, default_value = "32")]
    documents: usize,

    /// Start the repository in read-only mode
    #[arg(long)]
    read_only: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(std::io::stdout());
    let log_level: tracing::Level = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    let env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry().with(stdout_layer).init();

    let mut config = match &args.config {
        Some(path) => RepositoryConfig::from_file(path)?,
        None => RepositoryConfig::default(),
    };
    if let Some(mode) = args.mode {
        config.cache.mode = mode;
    }
    config.read_only |= args.read_only;
    if !config.roles.root.iter().any(|name| name == ROOT_USER) {
        config.roles.root.push(ROOT_USER.to_string());
    }
    config.validate()?;

    tracing::info!(
        mode = %config.cache.mode,
        workers = args.workers,
        operations = args.operations,
        "Starting Arbor local driver"
    );

    let store =
        MemoryStore::new(NodeData::collection(ROOT_USER).with_acl(Some(workload::root_acl())));
    let accessor = config.layer(TreeAccessor::new(store.clone()));
    let repository: SharedRepository = Arc::new(Repository::from_config(accessor, &config)?);
    workload::seed(&repository, args.documents)?;

    let mut handles = Vec::with_capacity(args.workers);
    for worker in 0..args.workers {
        let repository = repository.clone();
        let operations = args.operations;
        let documents = args.documents;
        handles.push(tokio::task::spawn_blocking(move || {
            workload::run_worker(&repository, worker, operations, documents)
        }));
    }

    let results = tokio::select! {
        results = futures::future::join_all(handles) => results,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            return Ok(());
        }
    };

    let mut total = WorkerReport::default();
    for result in results {
        match result {
            Ok(Ok(report)) => total = total.merge(report),
            Ok(Err(e)) => tracing::error!("Worker error: {}", e),
            Err(e) => tracing::error!("Worker panicked: {}", e),
        }
    }

    tracing::info!(
        nodes = store.node_count(),
        store_calls = store.calls(),
        "Workload complete"
    );
    println!("{}", serde_json::to_string_pretty(&total)?);
    if let Some(stats) = repository.cache_stats() {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Ok(())
}
