//! Engine configuration
//!
//! Defines the tunable parameters of a run: parallelism, which container
//! engine to drive, where the cache lives and how failures are handled.

use std::path::{Path, PathBuf};

use brick_core::STATE_DIR;

use crate::cache::{CACHE_FILE, staging_path};

/// Container engines the executor knows how to drive
pub const SUPPORTED_ENGINES: &[&str] = &["podman", "docker"];

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of steps running at the same time
    pub max_parallel_steps: usize,

    /// Container CLI used for steps with an image
    pub container_engine: String,

    /// Cache file; defaults to `.brick/cache.json` under the workspace root
    pub cache_path: Option<PathBuf>,

    /// Keep dispatching independent steps after a failure
    pub continue_on_error: bool,
}

impl EngineConfig {
    /// Creates a new configuration with defaults
    pub fn new() -> Self {
        Self {
            max_parallel_steps: 4,
            container_engine: "podman".to_string(),
            cache_path: None,
            continue_on_error: false,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - BRICK_MAX_PARALLEL_STEPS (default: 4)
    /// - BRICK_CONTAINER_ENGINE (default: podman)
    /// - BRICK_CACHE_PATH (default: <workspace>/.brick/cache.json)
    /// - BRICK_CONTINUE_ON_ERROR (true/false/1/0, default: false)
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self::from_lookup(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from an arbitrary variable source
    ///
    /// Unparseable values fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::new();

        let max_parallel_steps = lookup("BRICK_MAX_PARALLEL_STEPS")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_parallel_steps);

        let container_engine = lookup("BRICK_CONTAINER_ENGINE")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.container_engine);

        let cache_path = lookup("BRICK_CACHE_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let continue_on_error = lookup("BRICK_CONTINUE_ON_ERROR")
            .and_then(|s| parse_bool(&s))
            .unwrap_or(defaults.continue_on_error);

        Self {
            max_parallel_steps,
            container_engine,
            cache_path,
            continue_on_error,
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_parallel_steps == 0 {
            anyhow::bail!("max_parallel_steps must be greater than 0");
        }

        if !SUPPORTED_ENGINES.contains(&self.container_engine.as_str()) {
            anyhow::bail!(
                "container_engine must be one of {}, got '{}'",
                SUPPORTED_ENGINES.join(", "),
                self.container_engine
            );
        }

        Ok(())
    }

    /// Cache file for the workspace at `root`
    ///
    /// A relative override is taken relative to the workspace root.
    pub fn cache_path(&self, root: &Path) -> PathBuf {
        match &self.cache_path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => root.join(path),
            None => root.join(STATE_DIR).join(CACHE_FILE),
        }
    }

    /// Paths Brick itself writes to while running in the workspace at `root`
    ///
    /// Input patterns never match anything below these paths.
    pub fn state_paths(&self, root: &Path) -> Vec<PathBuf> {
        let cache = self.cache_path(root);
        vec![root.join(STATE_DIR), staging_path(&cache), cache]
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
