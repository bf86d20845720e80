//! Step fingerprints
//!
//! A fingerprint is the SHA-256 over everything that decides whether a
//! step's previous result is still valid: its image, its commands, the
//! content of every file matched by its inputs and the fingerprints of the
//! steps it depends on.

use brick_core::{BrickError, Result, StepId};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::graph::StepNode;
use crate::patterns::{expand_files, resolve_all};

/// Version prefix of the hash stream; bump to invalidate every cache entry
const FINGERPRINT_VERSION: &str = "brick-fingerprint-v1";

/// Content digest of a single file
pub trait FileHasher: Send + Sync {
    fn hash_file(&self, path: &Path) -> io::Result<String>;
}

/// Streams file contents through SHA-256
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256FileHasher;

impl FileHasher for Sha256FileHasher {
    fn hash_file(&self, path: &Path) -> io::Result<String> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Computes step fingerprints for one workspace
#[derive(Clone)]
pub struct Fingerprinter {
    root: PathBuf,
    hasher: Arc<dyn FileHasher>,
    /// Never hashed, even when an input pattern covers them
    excluded: Vec<PathBuf>,
}

impl Fingerprinter {
    pub fn new(root: impl Into<PathBuf>, hasher: Arc<dyn FileHasher>) -> Self {
        Self {
            root: root.into(),
            hasher,
            excluded: Vec::new(),
        }
    }

    /// Leaves the given files and directories out of every input expansion
    pub fn excluding(mut self, paths: Vec<PathBuf>) -> Self {
        self.excluded = paths;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fingerprints `node` given the fingerprints of its predecessors
    ///
    /// The order of `upstream` does not matter. Resolved input files are
    /// sorted by their workspace-relative path before hashing.
    ///
    /// # Errors
    /// Returns [`BrickError::Io`] if an input pattern matches nothing or a
    /// matched file cannot be read.
    pub fn fingerprint(&self, node: &StepNode, upstream: &[(StepId, String)]) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_VERSION.as_bytes());

        match &node.step.image {
            Some(image) => field(&mut hasher, b"image", image.as_bytes()),
            None => field(&mut hasher, b"host", b""),
        }

        field(
            &mut hasher,
            b"commands",
            &(node.step.commands.len() as u64).to_le_bytes(),
        );
        for command in &node.step.commands {
            field(&mut hasher, b"cmd", command.as_bytes());
        }

        let files = self.input_files(node)?;
        field(&mut hasher, b"inputs", &(files.len() as u64).to_le_bytes());
        for (rel, path) in &files {
            let digest = self
                .hasher
                .hash_file(path)
                .map_err(|e| BrickError::io(path, e))?;
            field(&mut hasher, b"path", rel.as_bytes());
            field(&mut hasher, b"digest", digest.as_bytes());
        }

        let mut upstream: Vec<&(StepId, String)> = upstream.iter().collect();
        upstream.sort();
        field(
            &mut hasher,
            b"upstream",
            &(upstream.len() as u64).to_le_bytes(),
        );
        for (id, fingerprint) in upstream {
            field(&mut hasher, b"step", id.to_string().as_bytes());
            field(&mut hasher, b"fingerprint", fingerprint.as_bytes());
        }

        let fingerprint = format!("{:x}", hasher.finalize());
        debug!(
            "Fingerprint of {} over {} file(s): {}",
            node.id,
            files.len(),
            fingerprint
        );
        Ok(fingerprint)
    }

    /// Runs [`Fingerprinter::fingerprint`] on the blocking thread pool
    pub async fn fingerprint_blocking(
        &self,
        node: StepNode,
        upstream: Vec<(StepId, String)>,
    ) -> Result<String> {
        let fingerprinter = self.clone();
        let id = node.id.clone();
        tokio::task::spawn_blocking(move || fingerprinter.fingerprint(&node, &upstream))
            .await
            .map_err(|e| BrickError::io(&self.root, format!("fingerprinting {} aborted: {}", id, e)))?
    }

    /// Every file matched by the node's inputs, keyed by workspace-relative path
    fn input_files(&self, node: &StepNode) -> Result<BTreeMap<String, PathBuf>> {
        let mut files = BTreeMap::new();
        for pattern in resolve_all(&node.rel_dir, &node.step.inputs) {
            for path in expand_files(&self.root, &pattern, &self.excluded)? {
                files.insert(self.relative(&path), path);
            }
        }
        Ok(files)
    }

    fn relative(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) => rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }
}

/// Tagged, length-prefixed field
fn field(hasher: &mut Sha256, tag: &[u8], value: &[u8]) {
    hasher.update(tag);
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use brick_core::Step;
    use std::fs;

    fn node(rel_dir: &str, root: &Path, step: Step) -> StepNode {
        StepNode {
            id: StepId::new(rel_dir, &step.name),
            rel_dir: rel_dir.to_string(),
            dir: root.join(rel_dir),
            step,
            index: 0,
        }
    }

    fn build_step(commands: &[&str]) -> Step {
        Step::new("build", commands.iter().map(|c| c.to_string()).collect())
            .with_image("node:20")
            .with_inputs(["src"])
    }

    fn fixture() -> (tempfile::TempDir, Fingerprinter) {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("www/src/lib")).unwrap();
        fs::write(root.path().join("www/src/index.js"), "console.log(1)").unwrap();
        fs::write(root.path().join("www/src/lib/util.js"), "export {}").unwrap();
        let fingerprinter = Fingerprinter::new(root.path(), Arc::new(Sha256FileHasher));
        (root, fingerprinter)
    }

    #[test]
    fn test_sha256_file_hasher() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        fs::write(&path, "hello").unwrap();
        assert_eq!(
            Sha256FileHasher.hash_file(&path).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let (root, fp) = fixture();
        let n = node("www", root.path(), build_step(&["yarn build"]));
        let first = fp.fingerprint(&n, &[]).unwrap();
        assert_eq!(first.len(), 64);
        assert_eq!(first, fp.fingerprint(&n, &[]).unwrap());
    }

    #[test]
    fn test_content_change_changes_fingerprint() {
        let (root, fp) = fixture();
        let n = node("www", root.path(), build_step(&["yarn build"]));
        let before = fp.fingerprint(&n, &[]).unwrap();

        fs::write(root.path().join("www/src/lib/util.js"), "export { x }").unwrap();
        assert_ne!(before, fp.fingerprint(&n, &[]).unwrap());
    }

    #[test]
    fn test_new_file_changes_fingerprint() {
        let (root, fp) = fixture();
        let n = node("www", root.path(), build_step(&["yarn build"]));
        let before = fp.fingerprint(&n, &[]).unwrap();

        fs::write(root.path().join("www/src/extra.js"), "").unwrap();
        assert_ne!(before, fp.fingerprint(&n, &[]).unwrap());
    }

    #[test]
    fn test_commands_are_verbatim() {
        let (root, fp) = fixture();
        let base = fp
            .fingerprint(&node("www", root.path(), build_step(&["yarn build"])), &[])
            .unwrap();
        let spaced = fp
            .fingerprint(&node("www", root.path(), build_step(&["yarn  build"])), &[])
            .unwrap();
        assert_ne!(base, spaced);

        let ab = fp
            .fingerprint(&node("www", root.path(), build_step(&["a", "b"])), &[])
            .unwrap();
        let ba = fp
            .fingerprint(&node("www", root.path(), build_step(&["b", "a"])), &[])
            .unwrap();
        assert_ne!(ab, ba);

        // Field boundaries are part of the hash
        let split = fp
            .fingerprint(&node("www", root.path(), build_step(&["ab", "c"])), &[])
            .unwrap();
        let joined = fp
            .fingerprint(&node("www", root.path(), build_step(&["a", "bc"])), &[])
            .unwrap();
        assert_ne!(split, joined);
    }

    #[test]
    fn test_image_changes_fingerprint() {
        let (root, fp) = fixture();
        let a = node("www", root.path(), build_step(&["yarn build"]));
        let mut b = a.clone();
        b.step.image = Some("node:22".to_string());
        let mut host = a.clone();
        host.step.image = None;

        let fa = fp.fingerprint(&a, &[]).unwrap();
        assert_ne!(fa, fp.fingerprint(&b, &[]).unwrap());
        assert_ne!(fa, fp.fingerprint(&host, &[]).unwrap());
    }

    #[test]
    fn test_ports_do_not_affect_fingerprint() {
        let (root, fp) = fixture();
        let a = node("www", root.path(), build_step(&["yarn build"]));
        let mut b = a.clone();
        b.step.ports = vec![3000];
        assert_eq!(
            fp.fingerprint(&a, &[]).unwrap(),
            fp.fingerprint(&b, &[]).unwrap()
        );
    }

    #[test]
    fn test_overlapping_inputs_counted_once() {
        let (root, fp) = fixture();
        let a = node("www", root.path(), build_step(&["yarn build"]));
        let mut b = a.clone();
        b.step.inputs = vec!["src".to_string(), "src/index.js".to_string()];
        assert_eq!(
            fp.fingerprint(&a, &[]).unwrap(),
            fp.fingerprint(&b, &[]).unwrap()
        );
    }

    #[test]
    fn test_upstream_order_independent_but_sensitive() {
        let (root, fp) = fixture();
        let n = node("www", root.path(), build_step(&["yarn build"]));
        let a = (StepId::new("a", "build"), "1".to_string());
        let b = (StepId::new("b", "build"), "2".to_string());

        let ab = fp.fingerprint(&n, &[a.clone(), b.clone()]).unwrap();
        let ba = fp.fingerprint(&n, &[b.clone(), a.clone()]).unwrap();
        assert_eq!(ab, ba);

        let changed = (StepId::new("b", "build"), "3".to_string());
        assert_ne!(ab, fp.fingerprint(&n, &[a, changed]).unwrap());
    }

    #[test]
    fn test_missing_input_is_io_error() {
        let (root, fp) = fixture();
        let mut n = node("www", root.path(), build_step(&["yarn build"]));
        n.step.inputs.push("yarn.lock".to_string());
        let err = fp.fingerprint(&n, &[]).unwrap_err();
        assert!(matches!(err, BrickError::Io { .. }));
    }

    #[tokio::test]
    async fn test_fingerprint_blocking_matches() {
        let (root, fp) = fixture();
        let n = node("www", root.path(), build_step(&["yarn build"]));
        let direct = fp.fingerprint(&n, &[]).unwrap();
        let pooled = fp.fingerprint_blocking(n, Vec::new()).await.unwrap();
        assert_eq!(direct, pooled);
    }
}
