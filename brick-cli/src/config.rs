//! Configuration module
//!
//! Handles the options shared by every command of one invocation.

use brick_engine::EngineConfig;
use std::path::{Path, PathBuf};

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory brick was launched from
    pub cwd: PathBuf,
    /// Consider every target below the selected directory
    pub recursive: bool,
    /// Leave out the earlier steps of the entry targets
    pub skip_previous_steps: bool,
    /// Ignore the cache for every scheduled step
    pub no_cache: bool,
    /// Engine settings (environment plus command-line overrides)
    pub engine: EngineConfig,
}

impl Config {
    /// Resolves a command's optional target directory against `cwd`
    pub fn target_dir(&self, target: Option<&Path>) -> PathBuf {
        match target {
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) => self.cwd.join(dir),
            None => self.cwd.clone(),
        }
    }
}
