//! Shared fixtures for the engine scenario tests
//!
//! A [`TestWorkspace`] is a temporary directory with a `WORKSPACE` marker
//! and `BUILD.yaml` files written by the test. Steps are executed by a
//! [`RecordingExecutor`] which never starts containers and only records
//! what it was asked to run.

#![allow(dead_code)]

use async_trait::async_trait;
use brick_core::{LogEntry, LogLevel, RunReport, StepId, StepStatus, Target};
use brick_descriptor::Workspace;
use brick_engine::{
    BuildGraph, CacheStore, ContainerExecutor, Engine, EngineConfig, ExecOutput, ExecRequest,
    MemoryCache, ScheduleRequest, Sha256FileHasher,
};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start(StepId),
    End(StepId),
}

/// Fake container collaborator
#[derive(Default)]
pub struct RecordingExecutor {
    events: Mutex<Vec<Event>>,
    requests: Mutex<Vec<ExecRequest>>,
    failing: Mutex<HashSet<StepId>>,
    delay: Duration,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every execution sleeps for `delay`, letting independent steps overlap
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Makes the given step exit with code 1
    pub fn fail(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.parse().unwrap());
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Steps executed so far, in start order
    pub fn executed(&self) -> Vec<StepId> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Start(id) => Some(id),
                Event::End(_) => None,
            })
            .collect()
    }

    pub fn requests(&self) -> Vec<ExecRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.events.lock().unwrap().clear();
        self.requests.lock().unwrap().clear();
    }
}

#[async_trait]
impl ContainerExecutor for RecordingExecutor {
    async fn execute(&self, request: &ExecRequest) -> anyhow::Result<ExecOutput> {
        self.events
            .lock()
            .unwrap()
            .push(Event::Start(request.id.clone()));
        self.requests.lock().unwrap().push(request.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failing = self.failing.lock().unwrap().contains(&request.id);
        self.events
            .lock()
            .unwrap()
            .push(Event::End(request.id.clone()));

        Ok(ExecOutput {
            exit_code: if failing { 1 } else { 0 },
            output: vec![LogEntry::new(
                LogLevel::Info,
                format!("ran {} command(s)", request.commands.len()),
            )],
        })
    }
}

/// A throw-away workspace on disk
pub struct TestWorkspace {
    dir: tempfile::TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("WORKSPACE"), "").unwrap();
        Self { dir }
    }

    pub fn root(&self) -> PathBuf {
        fs::canonicalize(self.dir.path()).unwrap()
    }

    /// Writes a file relative to the workspace root, creating parents
    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    pub fn remove(&self, rel: &str) {
        fs::remove_file(self.dir.path().join(rel)).unwrap();
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn targets(&self) -> Vec<Target> {
        Workspace::at(self.dir.path()).unwrap().load_all().unwrap()
    }

    pub fn graph(&self) -> BuildGraph {
        BuildGraph::build(&self.targets()).unwrap()
    }
}

/// Engine wired with a recording executor, an in-memory cache and real hashing
pub struct Harness {
    pub workspace: TestWorkspace,
    pub executor: Arc<RecordingExecutor>,
    pub cache: Arc<MemoryCache>,
    pub config: EngineConfig,
}

impl Harness {
    pub fn new(workspace: TestWorkspace) -> Self {
        Self::with_executor(workspace, RecordingExecutor::new())
    }

    pub fn with_executor(workspace: TestWorkspace, executor: RecordingExecutor) -> Self {
        Self {
            workspace,
            executor: Arc::new(executor),
            cache: Arc::new(MemoryCache::new()),
            config: EngineConfig::default(),
        }
    }

    pub fn engine(&self) -> Engine {
        let cache: Arc<dyn CacheStore> = self.cache.clone();
        Engine::with_parts(
            self.workspace.root(),
            self.config.clone(),
            cache,
            self.executor.clone(),
            Arc::new(Sha256FileHasher),
        )
    }

    /// Reloads the workspace and runs `request`, clearing previous records
    pub async fn run(&self, request: ScheduleRequest) -> RunReport {
        self.executor.reset();
        let graph = self.workspace.graph();
        self.engine().run(&graph, &request).await.unwrap()
    }

    /// Runs the given entries with default options
    pub async fn run_entries(&self, entries: &[&str]) -> RunReport {
        self.run(ScheduleRequest::new(ids(entries))).await
    }
}

pub fn id(s: &str) -> StepId {
    s.parse().unwrap()
}

pub fn ids(list: &[&str]) -> Vec<StepId> {
    list.iter().map(|s| id(s)).collect()
}

pub fn status(report: &RunReport, step: &str) -> StepStatus {
    report
        .status(&id(step))
        .unwrap_or_else(|| panic!("{} missing from report", step))
}

/// `www`: prepare → build → deploy
pub fn www_workspace() -> TestWorkspace {
    let ws = TestWorkspace::new();
    ws.write(
        "www/BUILD.yaml",
        r#"
steps:
  prepare:
    image: node:20
    commands: ["yarn install"]
    inputs: [package.json, yarn.lock]
  build:
    image: node:20
    commands: ["yarn build"]
    inputs: [src, static]
    outputs: [public]
  deploy:
    image: alpine:3
    commands: ["./deploy.sh"]
"#,
    );
    ws.write("www/package.json", r#"{"name": "www"}"#);
    ws.write("www/yarn.lock", "# lock");
    ws.write("www/src/index.js", "console.log('hello')");
    ws.write("www/static/logo.svg", "<svg/>");
    ws
}

/// `node` produces `dist`, `python` consumes it
pub fn node_python_workspace() -> TestWorkspace {
    let ws = TestWorkspace::new();
    ws.write(
        "node/BUILD.yaml",
        r#"
steps:
  build:
    image: node:20
    commands: ["yarn build"]
    inputs: [src]
    outputs: [dist]
"#,
    );
    ws.write("node/src/lib.js", "export const x = 1");
    ws.write("node/dist/bundle.js", "bundle");
    ws.write(
        "python/BUILD.yaml",
        r#"
steps:
  prepare:
    image: python:3.12
    commands: ["pip install -r requirements.txt"]
    inputs: [requirements.txt]
  build:
    image: python:3.12
    commands: ["python build.py"]
    inputs: [main.py, ../node/dist]
  test:
    image: python:3.12
    commands: ["pytest"]
    inputs: [tests]
"#,
    );
    ws.write("python/requirements.txt", "requests");
    ws.write("python/main.py", "print('hi')");
    ws.write("python/tests/test_main.py", "def test(): pass");
    ws
}
