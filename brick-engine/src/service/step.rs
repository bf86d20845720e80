//! Step service
//!
//! Runs a single step once all its predecessors are done: computes its
//! fingerprint, compares it with the cache, executes it when stale and
//! records the new fingerprint on success.

use async_trait::async_trait;
use brick_core::{BrickError, LogEntry, LogLevel, StepId, StepOutcome, StepStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cache::CacheStore;
use crate::container::{ContainerExecutor, ExecRequest};
use crate::fingerprint::Fingerprinter;
use crate::graph::StepNode;

/// What the scheduler hands over for one step
#[derive(Debug, Clone)]
pub struct StepRun {
    pub node: StepNode,
    /// Fingerprints of the step's scheduled predecessors
    pub upstream: Vec<(StepId, String)>,
    /// Predecessors left out of this run; their cached fingerprint stands in
    pub recorded_upstream: Vec<StepId>,
    /// Run even when the fingerprint matches the cache
    pub force: bool,
    /// Publish the step's declared ports to the host
    pub publish_ports: bool,
}

/// Service trait for running one step
#[async_trait]
pub trait StepService: Send + Sync {
    /// Brings one step up to date
    ///
    /// Always returns a terminal outcome: `Skipped`, `Succeeded` or `Failed`.
    async fn run_step(&self, run: StepRun) -> StepOutcome;
}

/// Standard implementation of StepService
pub struct StandardStepService {
    root: PathBuf,
    fingerprinter: Fingerprinter,
    cache: Arc<dyn CacheStore>,
    executor: Arc<dyn ContainerExecutor>,
}

impl StandardStepService {
    pub fn new(
        fingerprinter: Fingerprinter,
        cache: Arc<dyn CacheStore>,
        executor: Arc<dyn ContainerExecutor>,
    ) -> Self {
        Self {
            root: fingerprinter.root().to_path_buf(),
            fingerprinter,
            cache,
            executor,
        }
    }

    fn failed(
        id: StepId,
        fingerprint: Option<String>,
        started: Instant,
        output: Vec<LogEntry>,
        err: BrickError,
    ) -> StepOutcome {
        error!("{}", err);
        StepOutcome {
            id,
            status: StepStatus::Failed,
            fingerprint,
            duration: started.elapsed(),
            output,
            error_message: Some(err.to_string()),
        }
    }
}

#[async_trait]
impl StepService for StandardStepService {
    async fn run_step(&self, run: StepRun) -> StepOutcome {
        let started = Instant::now();
        let id = run.node.id.clone();
        let step = run.node.step.clone();
        let rel_dir = run.node.rel_dir.clone();

        let mut upstream = run.upstream;
        for pred in run.recorded_upstream {
            let recorded = self.cache.get(&pred).unwrap_or_default();
            debug!("{} uses the recorded fingerprint of {}", id, pred);
            upstream.push((pred, recorded));
        }

        let fingerprint = match self
            .fingerprinter
            .fingerprint_blocking(run.node, upstream)
            .await
        {
            Ok(fingerprint) => fingerprint,
            Err(e) => return Self::failed(id, None, started, Vec::new(), e),
        };

        if !run.force && self.cache.get(&id).as_deref() == Some(fingerprint.as_str()) {
            info!("{} is up to date, skipping", id);
            return StepOutcome::skipped(id, fingerprint);
        }

        info!("Running {}", id);
        debug!("{} fingerprint {}", id, fingerprint);

        let request = ExecRequest {
            id: id.clone(),
            image: step.image.clone(),
            workspace_root: self.root.clone(),
            rel_dir,
            commands: step.commands.clone(),
            pass_ssh: step.pass_ssh,
            ports: if run.publish_ports {
                step.ports.clone()
            } else {
                Vec::new()
            },
        };

        let output = match self.executor.execute(&request).await {
            Ok(output) => output,
            Err(e) => {
                let message = format!("{:#}", e);
                let log = vec![LogEntry::new(LogLevel::Error, message.clone())];
                let err = BrickError::StepExecution {
                    id: id.clone(),
                    message,
                    exit_code: None,
                };
                return Self::failed(id, Some(fingerprint), started, log, err);
            }
        };

        if !output.success() {
            let err = BrickError::StepExecution {
                id: id.clone(),
                message: format!("exited with code {}", output.exit_code),
                exit_code: Some(output.exit_code),
            };
            return Self::failed(id, Some(fingerprint), started, output.output, err);
        }

        if let Err(e) = self.cache.put(&id, &fingerprint) {
            warn!("Failed to record fingerprint of {}: {}", id, e);
        }

        info!("{} succeeded in {:.2?}", id, started.elapsed());
        StepOutcome {
            id,
            status: StepStatus::Succeeded,
            fingerprint: Some(fingerprint),
            duration: started.elapsed(),
            output: output.output,
            error_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::container::ExecOutput;
    use crate::fingerprint::Sha256FileHasher;
    use brick_core::Step;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeExecutor {
        exit_code: i32,
        calls: AtomicUsize,
        last: Mutex<Option<ExecRequest>>,
    }

    impl FakeExecutor {
        fn new(exit_code: i32) -> Self {
            Self {
                exit_code,
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ContainerExecutor for FakeExecutor {
        async fn execute(&self, request: &ExecRequest) -> anyhow::Result<ExecOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(request.clone());
            Ok(ExecOutput {
                exit_code: self.exit_code,
                output: vec![LogEntry::new(LogLevel::Info, "done")],
            })
        }
    }

    struct BrokenCache;

    impl CacheStore for BrokenCache {
        fn get(&self, _id: &StepId) -> Option<String> {
            None
        }
        fn put(&self, _id: &StepId, _fingerprint: &str) -> brick_core::Result<()> {
            Err(BrickError::Cache("disk full".to_string()))
        }
        fn entries(&self) -> Vec<(StepId, crate::cache::CacheRecord)> {
            Vec::new()
        }
        fn remove(&self, _id: &StepId) -> brick_core::Result<bool> {
            Ok(false)
        }
    }

    fn run(root: &std::path::Path) -> StepRun {
        let step = Step::new("build", vec!["make".to_string()])
            .with_image("rust:1")
            .with_inputs(["src"]);
        StepRun {
            node: StepNode {
                id: StepId::new("app", "build"),
                rel_dir: "app".to_string(),
                dir: root.join("app"),
                step,
                index: 0,
            },
            upstream: Vec::new(),
            recorded_upstream: Vec::new(),
            force: false,
            publish_ports: false,
        }
    }

    fn fixture() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("app/src")).unwrap();
        std::fs::write(root.path().join("app/src/main.rs"), "fn main() {}").unwrap();
        root
    }

    fn service(
        root: &std::path::Path,
        cache: Arc<dyn CacheStore>,
        executor: Arc<FakeExecutor>,
    ) -> StandardStepService {
        StandardStepService::new(
            Fingerprinter::new(root, Arc::new(Sha256FileHasher)),
            cache,
            executor,
        )
    }

    #[tokio::test]
    async fn test_runs_then_skips() {
        let root = fixture();
        let cache = Arc::new(MemoryCache::new());
        let executor = Arc::new(FakeExecutor::new(0));
        let service = service(root.path(), cache.clone(), executor.clone());

        let first = service.run_step(run(root.path())).await;
        assert_eq!(first.status, StepStatus::Succeeded);
        assert_eq!(cache.get(&first.id), first.fingerprint);

        let request = executor.last.lock().unwrap().clone().unwrap();
        assert_eq!(request.image.as_deref(), Some("rust:1"));
        assert_eq!(request.rel_dir, "app");

        let second = service.run_step(run(root.path())).await;
        assert_eq!(second.status, StepStatus::Skipped);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

        let mut forced = run(root.path());
        forced.force = true;
        let third = service.run_step(forced).await;
        assert_eq!(third.status, StepStatus::Succeeded);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unscheduled_predecessor_uses_cached_fingerprint() {
        let root = fixture();
        let cache = Arc::new(MemoryCache::new());
        let executor = Arc::new(FakeExecutor::new(0));
        let service = service(root.path(), cache.clone(), executor.clone());
        let prepare = StepId::new("app", "prepare");
        cache.put(&prepare, "prepared").unwrap();

        let mut scheduled = run(root.path());
        scheduled.upstream = vec![(prepare.clone(), "prepared".to_string())];
        let first = service.run_step(scheduled).await;
        assert_eq!(first.status, StepStatus::Succeeded);

        let mut skipping_previous = run(root.path());
        skipping_previous.recorded_upstream = vec![prepare.clone()];
        let second = service.run_step(skipping_previous.clone()).await;
        assert_eq!(second.status, StepStatus::Skipped);
        assert_eq!(second.fingerprint, first.fingerprint);

        cache.put(&prepare, "prepared again").unwrap();
        let third = service.run_step(skipping_previous).await;
        assert_eq!(third.status, StepStatus::Succeeded);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_not_recorded() {
        let root = fixture();
        let cache = Arc::new(MemoryCache::new());
        let executor = Arc::new(FakeExecutor::new(2));
        let service = service(root.path(), cache.clone(), executor);

        let outcome = service.run_step(run(root.path())).await;
        assert_eq!(outcome.status, StepStatus::Failed);
        assert!(outcome.error_message.unwrap().contains("exited with code 2"));
        assert_eq!(outcome.output.len(), 1);
        assert_eq!(cache.get(&StepId::new("app", "build")), None);
    }

    #[tokio::test]
    async fn test_unreadable_input_fails_without_executing() {
        let root = tempfile::tempdir().unwrap();
        let executor = Arc::new(FakeExecutor::new(0));
        let service = service(root.path(), Arc::new(MemoryCache::new()), executor.clone());

        let outcome = service.run_step(run(root.path())).await;
        assert_eq!(outcome.status, StepStatus::Failed);
        assert!(outcome.fingerprint.is_none());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cache_write_failure_still_succeeds() {
        let root = fixture();
        let executor = Arc::new(FakeExecutor::new(0));
        let service = service(root.path(), Arc::new(BrokenCache), executor);

        let outcome = service.run_step(run(root.path())).await;
        assert_eq!(outcome.status, StepStatus::Succeeded);
    }
}
