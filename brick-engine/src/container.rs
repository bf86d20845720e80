//! Container execution
//!
//! Runs a step's commands inside a throw-away container:
//! - Checking the container engine is available
//! - Starting one detached container per step with the workspace mounted
//! - Executing each command through `sh -c` until one fails
//! - Removing the container whatever the outcome
//!
//! Steps without an image run their commands on the host instead.

use anyhow::{Context, Result};
use async_trait::async_trait;
use brick_core::{LogEntry, LogLevel, StepId};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Mount point of the workspace root inside step containers
pub const CONTAINER_WORKSPACE: &str = "/workspace";

/// Where the host SSH agent socket is mounted inside step containers
pub const CONTAINER_SSH_SOCK: &str = "/run/brick/ssh-agent.sock";

/// Everything needed to run one step
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub id: StepId,
    /// `None` runs on the host
    pub image: Option<String>,
    pub workspace_root: PathBuf,
    /// Working directory relative to the workspace root
    pub rel_dir: String,
    pub commands: Vec<String>,
    pub pass_ssh: bool,
    pub ports: Vec<u16>,
}

impl ExecRequest {
    /// Working directory on the host
    pub fn host_dir(&self) -> PathBuf {
        if self.rel_dir == "." {
            self.workspace_root.clone()
        } else {
            self.workspace_root.join(&self.rel_dir)
        }
    }

    /// Working directory inside the container
    pub fn container_dir(&self) -> String {
        if self.rel_dir == "." {
            CONTAINER_WORKSPACE.to_string()
        } else {
            format!("{}/{}", CONTAINER_WORKSPACE, self.rel_dir)
        }
    }
}

/// Combined output and exit status of a step's commands
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Exit status of the last command run
    pub exit_code: i32,
    pub output: Vec<LogEntry>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Capability to run a step's commands in isolation
///
/// Implementations must allow concurrent independent invocations. An `Err`
/// means the commands could not be run at all; a command exiting non-zero
/// is reported through [`ExecOutput::exit_code`].
#[async_trait]
pub trait ContainerExecutor: Send + Sync {
    async fn execute(&self, request: &ExecRequest) -> Result<ExecOutput>;
}

/// Executor driving the `podman` or `docker` command line
pub struct CliContainerExecutor {
    engine: String,
    run_id: Uuid,
    available: OnceCell<std::result::Result<(), String>>,
}

impl CliContainerExecutor {
    /// Creates an executor for the given engine binary
    ///
    /// # Arguments
    /// * `engine` - Container CLI to drive (`podman` or `docker`)
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            run_id: Uuid::new_v4(),
            available: OnceCell::new(),
        }
    }

    /// Checks the engine answers `--version`, once per executor
    async fn ensure_available(&self) -> Result<()> {
        let status = self
            .available
            .get_or_init(|| async {
                check_engine_available(&self.engine)
                    .await
                    .map_err(|e| format!("{:#}", e))
            })
            .await;

        match status {
            Ok(()) => Ok(()),
            Err(message) => anyhow::bail!("{}", message),
        }
    }

    /// Generates a container name unique to this run and step
    fn container_name(&self, id: &StepId) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        let hash = hasher.finish();

        format!("brick-{}-{:x}", self.run_id, hash)
    }

    async fn start_container(&self, request: &ExecRequest, image: &str) -> Result<StepContainer> {
        let name = self.container_name(&request.id);

        info!(
            "Creating container {} for {} with image {}",
            name, request.id, image
        );

        let mut command = Command::new(&self.engine);
        command
            .arg("run")
            .arg("-d")
            .arg("--name")
            .arg(&name)
            .arg("--entrypoint")
            .arg("/bin/sh")
            .arg("-v")
            .arg(format!(
                "{}:{}",
                request.workspace_root.display(),
                CONTAINER_WORKSPACE
            ))
            .arg("-w")
            .arg(request.container_dir());

        if request.pass_ssh {
            let socket = std::env::var("SSH_AUTH_SOCK")
                .ok()
                .filter(|s| !s.is_empty() && Path::new(s).exists())
                .context(
                    "Step requires SSH forwarding but no SSH agent socket is available (SSH_AUTH_SOCK)",
                )?;
            command
                .arg("-v")
                .arg(format!("{}:{}", socket, CONTAINER_SSH_SOCK))
                .arg("-e")
                .arg(format!("SSH_AUTH_SOCK={}", CONTAINER_SSH_SOCK));
        }

        for port in &request.ports {
            command.arg("-p").arg(format!("{}:{}", port, port));
        }

        let output = command
            .arg(image)
            .arg("-c")
            .arg("sleep infinity")
            .output()
            .await
            .with_context(|| format!("Failed to execute {} run command", self.engine))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !stdout.trim().is_empty() {
            debug!("{} run stdout: {}", self.engine, stdout.trim());
        }
        if !stderr.trim().is_empty() {
            debug!("{} run stderr: {}", self.engine, stderr.trim());
        }

        if !output.status.success() {
            let error_msg = format!(
                "Failed to start container for image {}: exit_code={}, stderr='{}'",
                image,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
            error!("{}", error_msg);
            anyhow::bail!("{}", error_msg);
        }

        Ok(StepContainer {
            engine: self.engine.clone(),
            name,
            removed: false,
        })
    }
}

#[async_trait]
impl ContainerExecutor for CliContainerExecutor {
    async fn execute(&self, request: &ExecRequest) -> Result<ExecOutput> {
        let Some(image) = request.image.as_deref() else {
            return run_on_host(request).await;
        };

        self.ensure_available().await?;

        let mut container = self.start_container(request, image).await?;
        let result = run_commands(request, |cmd| {
            let mut command = Command::new(&self.engine);
            command
                .arg("exec")
                .arg(&container.name)
                .arg("sh")
                .arg("-c")
                .arg(cmd);
            command
        })
        .await;

        container.remove().await;
        result
    }
}

/// A running step container, removed on drop if not removed explicitly
struct StepContainer {
    engine: String,
    name: String,
    removed: bool,
}

impl StepContainer {
    async fn remove(&mut self) {
        let output = Command::new(&self.engine)
            .arg("rm")
            .arg("-f")
            .arg(&self.name)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                debug!("Container {} removed", self.name);
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!("Failed to remove container {}: {}", self.name, stderr.trim());
            }
            Err(e) => {
                warn!("Failed to remove container {}: {}", self.name, e);
            }
        }
        self.removed = true;
    }
}

impl Drop for StepContainer {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::process::Command::new(&self.engine)
            .arg("rm")
            .arg("-f")
            .arg(&self.name)
            .output()
        {
            warn!("Failed to cleanup container {} on drop: {}", self.name, e);
        }
    }
}

/// Checks if the container engine is installed and available
pub async fn check_engine_available(engine: &str) -> Result<()> {
    let output = Command::new(engine)
        .arg("--version")
        .output()
        .await
        .with_context(|| format!("Failed to execute '{} --version'. Is {} installed?", engine, engine))?;

    if !output.status.success() {
        anyhow::bail!("{} is not working correctly", engine);
    }

    let version = String::from_utf8_lossy(&output.stdout);
    info!("{} is available: {}", engine, version.trim());
    Ok(())
}

async fn run_on_host(request: &ExecRequest) -> Result<ExecOutput> {
    let dir = request.host_dir();
    debug!("Running {} on the host in {}", request.id, dir.display());

    run_commands(request, |cmd| {
        let mut command = Command::new("sh");
        command.arg("-c").arg(cmd).current_dir(&dir);
        command
    })
    .await
}

/// Runs each command in order, stopping at the first non-zero exit
async fn run_commands<F>(request: &ExecRequest, make_command: F) -> Result<ExecOutput>
where
    F: Fn(&str) -> Command,
{
    let mut log = Vec::new();
    let mut exit_code = 0;

    for cmd in &request.commands {
        debug!("[{}] $ {}", request.id, cmd);
        log.push(LogEntry::new(LogLevel::Debug, format!("$ {}", cmd)));

        let output = make_command(cmd)
            .output()
            .await
            .with_context(|| format!("Failed to spawn command '{}'", cmd))?;

        capture(&mut log, LogLevel::Info, &output.stdout);
        capture(&mut log, LogLevel::Warning, &output.stderr);

        exit_code = output.status.code().unwrap_or(-1);
        if exit_code != 0 {
            debug!(
                "Command failed for {}: cmd={} exit_code={}",
                request.id, cmd, exit_code
            );
            log.push(LogEntry::new(
                LogLevel::Error,
                format!("Command '{}' exited with code {}", cmd, exit_code),
            ));
            break;
        }
    }

    Ok(ExecOutput {
        exit_code,
        output: log,
    })
}

fn capture(log: &mut Vec<LogEntry>, level: LogLevel, bytes: &[u8]) {
    for line in String::from_utf8_lossy(bytes).lines() {
        log.push(LogEntry::new(level, line));
    }
}
