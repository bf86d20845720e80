//! Path patterns
//!
//! Step inputs and outputs are glob patterns relative to their target's
//! directory. This module resolves them to workspace-relative patterns,
//! decides lexically whether an output pattern feeds an input pattern, and
//! expands input patterns against the filesystem for fingerprinting.

use brick_core::{BrickError, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A pattern resolved against the workspace root, split into components
///
/// An empty component list denotes the workspace root itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathPattern {
    components: Vec<String>,
}

impl PathPattern {
    /// Resolves `pattern` (relative to the target at `rel_dir`) lexically
    ///
    /// `.` components are dropped and `..` pops a component. A leading `/`
    /// anchors the pattern at the workspace root. Returns `None` when the
    /// pattern climbs above the workspace root.
    pub fn resolve(rel_dir: &str, pattern: &str) -> Option<Self> {
        let mut components: Vec<String> = Vec::new();

        let base = if pattern.starts_with('/') { "" } else { rel_dir };
        for part in base.split('/').chain(pattern.split('/')) {
            match part {
                "" | "." => {}
                ".." => {
                    components.pop()?;
                }
                other => components.push(other.to_string()),
            }
        }

        Some(Self { components })
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn is_glob(&self) -> bool {
        self.components.iter().any(|c| is_glob(c))
    }

    /// Whether a path produced by `self` (an output) equals or contains a
    /// path matched by `input`
    ///
    /// Compared component by component over the output's length: literals
    /// must be equal, a glob must match the other side's literal, and two
    /// globs are assumed to overlap. `**` on either side matches any
    /// remaining suffix. An output longer than the input lies inside the
    /// input directory and does not count.
    pub fn feeds(&self, input: &PathPattern) -> bool {
        for (i, out) in self.components.iter().enumerate() {
            if out == "**" {
                return true;
            }
            let Some(inp) = input.components.get(i) else {
                return false;
            };
            if inp == "**" {
                return true;
            }
            if !components_overlap(out, inp) {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            write!(f, ".")
        } else {
            write!(f, "{}", self.components.join("/"))
        }
    }
}

/// Brace-expands and resolves every pattern of a step
///
/// Patterns escaping the workspace are dropped with a warning; they can
/// neither feed nor consume another step's paths.
pub fn resolve_all(rel_dir: &str, patterns: &[String]) -> Vec<PathPattern> {
    let mut resolved = Vec::new();
    for pattern in patterns {
        for expanded in expand_braces(pattern) {
            match PathPattern::resolve(rel_dir, &expanded) {
                Some(p) => resolved.push(p),
                None => warn!(
                    "Pattern '{}' of target at {} escapes the workspace, ignoring it",
                    expanded, rel_dir
                ),
            }
        }
    }
    resolved
}

/// Bash-style brace expansion: `src/{a,b}.rs` becomes `src/a.rs`, `src/b.rs`
///
/// Groups without a top-level comma and unbalanced braces are kept literally.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    for (start, c) in pattern.char_indices() {
        if c != '{' {
            continue;
        }
        let Some((end, commas)) = find_group(pattern, start) else {
            continue;
        };
        if commas.is_empty() {
            continue;
        }

        let prefix = &pattern[..start];
        let suffix = &pattern[end + 1..];

        let mut alternatives = Vec::with_capacity(commas.len() + 1);
        let mut last = start + 1;
        for comma in commas {
            alternatives.push(&pattern[last..comma]);
            last = comma + 1;
        }
        alternatives.push(&pattern[last..end]);

        return alternatives
            .into_iter()
            .flat_map(|alt| expand_braces(&format!("{}{}{}", prefix, alt, suffix)))
            .collect();
    }

    vec![pattern.to_string()]
}

/// Finds the `}` closing the group opened at `start` and its top-level commas
fn find_group(pattern: &str, start: usize) -> Option<(usize, Vec<usize>)> {
    let mut depth = 0usize;
    let mut commas = Vec::new();

    for (offset, c) in pattern[start..].char_indices() {
        let i = start + offset;
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((i, commas));
                }
            }
            ',' if depth == 1 => commas.push(i),
            _ => {}
        }
    }
    None
}

fn is_glob(component: &str) -> bool {
    component.contains(['*', '?', '['])
}

fn components_overlap(a: &str, b: &str) -> bool {
    match (is_glob(a), is_glob(b)) {
        (false, false) => a == b,
        (true, true) => true,
        (true, false) => glob_matches(a, b),
        (false, true) => glob_matches(b, a),
    }
}

fn glob_matches(pattern: &str, literal: &str) -> bool {
    glob::Pattern::new(pattern)
        .map(|p| p.matches(literal))
        .unwrap_or(false)
}

/// Expands an input pattern to the files it denotes on disk
///
/// Directories expand recursively to every file they contain. Anything at
/// or below one of the `excluded` paths is left out. Returns absolute
/// paths, unsorted.
///
/// # Errors
/// Returns [`BrickError::Io`] if nothing matches or a matched path cannot
/// be read.
pub fn expand_files(
    root: &Path,
    pattern: &PathPattern,
    excluded: &[PathBuf],
) -> Result<Vec<PathBuf>> {
    let literal = root.join(pattern.components.join("/"));
    let mut matches = Vec::new();

    if pattern.is_glob() {
        let full = format!(
            "{}/{}",
            glob::Pattern::escape(&root.to_string_lossy()),
            pattern.components.join("/")
        );
        let paths = glob::glob(&full).map_err(|e| {
            BrickError::io(&literal, format!("invalid pattern '{}': {}", pattern, e.msg))
        })?;
        for entry in paths {
            let path = entry.map_err(|e| BrickError::io(e.path(), e.error()))?;
            if !is_excluded(&path, excluded) {
                matches.push(path);
            }
        }
    } else if fs::symlink_metadata(&literal).is_ok() && !is_excluded(&literal, excluded) {
        matches.push(literal.clone());
    }

    if matches.is_empty() {
        debug!("Could not find a match for {}", literal.display());
        return Err(BrickError::io(
            &literal,
            format!("no matches found for input '{}'", pattern),
        ));
    }

    let mut files = Vec::new();
    for path in matches {
        collect_files(&path, excluded, &mut files)?;
    }
    Ok(files)
}

fn is_excluded(path: &Path, excluded: &[PathBuf]) -> bool {
    excluded.iter().any(|ex| path.starts_with(ex))
}

fn collect_files(path: &Path, excluded: &[PathBuf], files: &mut Vec<PathBuf>) -> Result<()> {
    if is_excluded(path, excluded) {
        debug!("Not hashing excluded path {}", path.display());
        return Ok(());
    }
    let meta = fs::metadata(path).map_err(|e| BrickError::io(path, e))?;

    if meta.is_file() {
        files.push(path.to_path_buf());
        return Ok(());
    }
    if !meta.is_dir() {
        return Ok(());
    }
    // Symlinked directories are not followed to keep traversal finite
    if fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
    {
        debug!("Not following symlinked directory {}", path.display());
        return Ok(());
    }

    let entries = fs::read_dir(path).map_err(|e| BrickError::io(path, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| BrickError::io(path, e))?;
        collect_files(&entry.path(), excluded, files)?;
    }
    Ok(())
}
