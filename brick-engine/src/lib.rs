//! Brick Engine
//!
//! Dependency graph construction and incremental execution.
//!
//! This crate contains:
//! - Patterns: lexical resolution and intersection of input/output globs
//! - Graph: the inferred DAG of steps, cycle detection, topological order
//! - Fingerprint: content and command digests deciding staleness
//! - Cache: last successful fingerprint per step
//! - Container: running step commands through podman/docker
//! - Scheduler: dependency-count gated, bounded parallel dispatch

pub mod cache;
pub mod config;
pub mod container;
pub mod fingerprint;
pub mod graph;
pub mod patterns;
pub mod scheduler;
pub mod service;

pub use cache::{CacheRecord, CacheStore, FileCache, MemoryCache};
pub use config::EngineConfig;
pub use container::{CliContainerExecutor, ContainerExecutor, ExecOutput, ExecRequest};
pub use fingerprint::{FileHasher, Fingerprinter, Sha256FileHasher};
pub use graph::{BuildGraph, Edge, EdgeKind, Selection, StepNode};
pub use scheduler::{ScheduleRequest, Scheduler};
pub use service::{StandardStepService, StepRun, StepService};

use brick_core::{Result, RunReport, StepId, Target};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Wires the engine's collaborators for one workspace
pub struct Engine {
    root: PathBuf,
    config: EngineConfig,
    cache: Arc<dyn CacheStore>,
    executor: Arc<dyn ContainerExecutor>,
    hasher: Arc<dyn FileHasher>,
}

impl Engine {
    /// Creates an engine with the production collaborators: a file cache
    /// under the workspace, the configured container CLI and SHA-256 hashing
    pub fn new(root: impl Into<PathBuf>, config: EngineConfig) -> Self {
        let root = root.into();
        let cache = Arc::new(FileCache::open(config.cache_path(&root)));
        let executor = Arc::new(CliContainerExecutor::new(config.container_engine.clone()));
        Self::with_parts(root, config, cache, executor, Arc::new(Sha256FileHasher))
    }

    /// Creates an engine from explicit collaborators
    pub fn with_parts(
        root: impl Into<PathBuf>,
        config: EngineConfig,
        cache: Arc<dyn CacheStore>,
        executor: Arc<dyn ContainerExecutor>,
        hasher: Arc<dyn FileHasher>,
    ) -> Self {
        Self {
            root: root.into(),
            config,
            cache,
            executor,
            hasher,
        }
    }

    /// Builds the dependency graph of the whole workspace
    pub fn plan(&self, targets: &[Target]) -> Result<BuildGraph> {
        BuildGraph::build(targets)
    }

    /// Brings the request's entry steps up to date
    pub async fn run(&self, graph: &BuildGraph, request: &ScheduleRequest) -> Result<RunReport> {
        let mut request = request.clone();
        request.continue_on_error |= self.config.continue_on_error;

        let service = StandardStepService::new(
            Fingerprinter::new(&self.root, Arc::clone(&self.hasher))
                .excluding(self.config.state_paths(&self.root)),
            Arc::clone(&self.cache),
            Arc::clone(&self.executor),
        );
        let scheduler = Scheduler::new(Arc::new(service), self.config.max_parallel_steps);
        scheduler.run(graph, &request).await
    }

    /// Drops cache records of steps no longer in `graph`, and records older
    /// than `older_than` when given
    ///
    /// Returns the identifiers of the removed records.
    pub fn prune(
        &self,
        graph: &BuildGraph,
        older_than: Option<chrono::Duration>,
    ) -> Result<Vec<StepId>> {
        let cutoff = older_than.map(|age| Utc::now() - age);
        let mut removed = Vec::new();

        for (id, record) in self.cache.entries() {
            let stale = !graph.contains(&id);
            let expired = cutoff.is_some_and(|cutoff| record.recorded_at < cutoff);
            if (stale || expired) && self.cache.remove(&id)? {
                removed.push(id);
            }
        }

        info!("Pruned {} cache record(s)", removed.len());
        Ok(removed)
    }
}
