//! Workspace discovery and target loading
//!
//! A workspace is the directory tree below a `WORKSPACE` marker file. Every
//! directory in it holding a `BUILD.yaml` is a target.

use brick_core::{BrickError, DESCRIPTOR_FILE, Result, Target, WORKSPACE_MARKER};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::parser::load_descriptor;

/// Walks up from `start` until a directory containing the workspace marker is found
///
/// # Errors
/// Returns [`BrickError::Config`] when the filesystem root is reached
/// without finding a marker.
pub fn find_workspace_root(start: &Path) -> Result<PathBuf> {
    let start = canonical(start)?;
    let mut current = Some(start.as_path());

    while let Some(dir) = current {
        if dir.join(WORKSPACE_MARKER).is_file() {
            debug!("Found workspace root at {}", dir.display());
            return Ok(dir.to_path_buf());
        }
        current = dir.parent();
    }

    Err(BrickError::config(format!(
        "No {} file found in {} or any parent directory. Did you launch brick from the right project?",
        WORKSPACE_MARKER,
        start.display()
    )))
}

/// A discovered workspace
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Discovers the workspace enclosing `cwd`
    pub fn discover(cwd: &Path) -> Result<Self> {
        Ok(Self {
            root: find_workspace_root(cwd)?,
        })
    }

    /// Opens the workspace rooted exactly at `root`
    pub fn at(root: &Path) -> Result<Self> {
        let root = canonical(root)?;
        if !root.join(WORKSPACE_MARKER).is_file() {
            return Err(BrickError::config(format!(
                "{} is not a workspace root: missing {} file",
                root.display(),
                WORKSPACE_MARKER
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `dir` relative to the root, `/`-separated, `.` for the root itself
    pub fn rel_dir(&self, dir: &Path) -> Result<String> {
        let dir = canonical(dir)?;
        let rel = dir.strip_prefix(&self.root).map_err(|_| {
            BrickError::config(format!(
                "{} is outside the workspace {}",
                dir.display(),
                self.root.display()
            ))
        })?;

        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();

        if parts.is_empty() {
            Ok(".".to_string())
        } else {
            Ok(parts.join("/"))
        }
    }

    /// Loads the entry targets of an invocation
    ///
    /// Non-recursive: only the target rooted at `cwd`, whose descriptor must
    /// exist. Recursive: every target in the workspace.
    pub fn load_targets(&self, cwd: &Path, recursive: bool) -> Result<Vec<Target>> {
        if recursive {
            return self.load_all();
        }

        let dir = canonical(cwd)?;
        let rel_dir = self.rel_dir(&dir)?;
        let target = load_descriptor(&dir, &rel_dir)?;
        Ok(vec![target])
    }

    /// Loads every target in the workspace, sorted by directory
    pub fn load_all(&self) -> Result<Vec<Target>> {
        let mut dirs = Vec::new();
        collect_descriptor_dirs(&self.root, &mut dirs)?;

        let mut targets = Vec::with_capacity(dirs.len());
        for dir in dirs {
            let rel_dir = self.rel_dir(&dir)?;
            targets.push(load_descriptor(&dir, &rel_dir)?);
        }
        targets.sort_by(|a, b| a.rel_dir.cmp(&b.rel_dir));

        check_unique_names(&targets)?;

        info!(
            "Discovered {} target(s) in {}",
            targets.len(),
            self.root.display()
        );
        Ok(targets)
    }
}

/// Recursively collects directories that contain a descriptor
///
/// Hidden directories (including the state directory) are skipped and
/// symlinked directories are not followed.
fn collect_descriptor_dirs(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    if dir.join(DESCRIPTOR_FILE).is_file() {
        found.push(dir.to_path_buf());
    }

    let entries = std::fs::read_dir(dir).map_err(|e| {
        BrickError::config(format!("Failed to read directory {}: {}", dir.display(), e))
    })?;

    let mut children = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            BrickError::config(format!("Failed to read directory {}: {}", dir.display(), e))
        })?;
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if is_dir && !hidden {
            children.push(entry.path());
        }
    }
    children.sort();

    for child in children {
        collect_descriptor_dirs(&child, found)?;
    }
    Ok(())
}

fn check_unique_names(targets: &[Target]) -> Result<()> {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for target in targets {
        if let Some(previous) = seen.insert(&target.name, &target.rel_dir) {
            return Err(BrickError::config(format!(
                "Duplicate target name '{}' declared in {} and {}",
                target.name, previous, target.rel_dir
            )));
        }
    }
    Ok(())
}

fn canonical(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path)
        .map_err(|e| BrickError::config(format!("Cannot resolve {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_target(root: &Path, rel: &str, body: &str) {
        let dir = root.join(rel);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(DESCRIPTOR_FILE), body).unwrap();
    }

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(WORKSPACE_MARKER), "").unwrap();
        dir
    }

    #[test]
    fn test_find_root_from_nested_dir() {
        let ws = workspace();
        let nested = ws.path().join("a/b/c");
        fs::create_dir_all(&nested).unwrap();

        let root = find_workspace_root(&nested).unwrap();
        assert_eq!(root, fs::canonicalize(ws.path()).unwrap());
    }

    #[test]
    fn test_missing_marker_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Workspace::at(dir.path()).unwrap_err();
        assert!(matches!(err, BrickError::Config(_)));
    }

    #[test]
    fn test_load_all_sorted_and_skips_hidden() {
        let ws = workspace();
        write_target(ws.path(), "web", "steps:\n  build:\n    commands: [make]\n");
        write_target(ws.path(), "api", "steps:\n  build:\n    commands: [make]\n");
        write_target(
            ws.path(),
            ".git/hooks",
            "steps:\n  build:\n    commands: [make]\n",
        );

        let workspace = Workspace::at(ws.path()).unwrap();
        let targets = workspace.load_all().unwrap();
        let names: Vec<_> = targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["api", "web"]);
        assert_eq!(targets[0].rel_dir, "api");
    }

    #[test]
    fn test_load_targets_non_recursive() {
        let ws = workspace();
        write_target(ws.path(), "libs/core", "steps:\n  build:\n    commands: [make]\n");
        write_target(ws.path(), "web", "steps:\n  build:\n    commands: [make]\n");

        let workspace = Workspace::at(ws.path()).unwrap();
        let targets = workspace
            .load_targets(&ws.path().join("libs/core"), false)
            .unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name, "core");
        assert_eq!(targets[0].rel_dir, "libs/core");

        // No descriptor at the root itself
        assert!(workspace.load_targets(ws.path(), false).is_err());

        let all = workspace.load_targets(ws.path(), true).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let ws = workspace();
        write_target(ws.path(), "a/web", "steps:\n  build:\n    commands: [make]\n");
        write_target(ws.path(), "b/web", "steps:\n  build:\n    commands: [make]\n");

        let err = Workspace::at(ws.path()).unwrap().load_all().unwrap_err();
        assert!(err.to_string().contains("Duplicate target name 'web'"));
    }

    #[test]
    fn test_rel_dir_of_root() {
        let ws = workspace();
        let workspace = Workspace::at(ws.path()).unwrap();
        assert_eq!(workspace.rel_dir(ws.path()).unwrap(), ".");
    }
}
