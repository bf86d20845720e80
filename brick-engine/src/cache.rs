//! Cache store
//!
//! Remembers, per step, the last fingerprint for which the step ran
//! successfully. A step whose current fingerprint equals the recorded one is
//! up to date.

use brick_core::{BrickError, Result, StepId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Version of the on-disk cache format
pub const CACHE_VERSION: u32 = 1;

/// File name of the cache inside the workspace state directory
pub const CACHE_FILE: &str = "cache.json";

/// Last successful fingerprint of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub fingerprint: String,
    pub recorded_at: DateTime<Utc>,
}

impl CacheRecord {
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Store of step fingerprints
///
/// `put` is only called after a step succeeded. Reads may happen
/// concurrently with each other and with writes.
pub trait CacheStore: Send + Sync {
    /// Fingerprint recorded for the step, if any
    fn get(&self, id: &StepId) -> Option<String>;

    /// Records a successful fingerprint
    fn put(&self, id: &StepId, fingerprint: &str) -> Result<()>;

    /// Every record, sorted by step id
    fn entries(&self) -> Vec<(StepId, CacheRecord)>;

    /// Drops a record; returns whether one existed
    fn remove(&self, id: &StepId) -> Result<bool>;
}

/// In-memory store, lost when dropped
#[derive(Debug, Default)]
pub struct MemoryCache {
    records: RwLock<HashMap<StepId, CacheRecord>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record with an explicit timestamp
    pub fn insert(&self, id: StepId, record: CacheRecord) {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, record);
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, id: &StepId) -> Option<String> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .map(|r| r.fingerprint.clone())
    }

    fn put(&self, id: &StepId, fingerprint: &str) -> Result<()> {
        self.insert(id.clone(), CacheRecord::new(fingerprint));
        Ok(())
    }

    fn entries(&self) -> Vec<(StepId, CacheRecord)> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<_> = records
            .iter()
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    fn remove(&self, id: &StepId) -> Result<bool> {
        Ok(self
            .records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some())
    }
}

/// On-disk format of the cache file
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    steps: BTreeMap<String, CacheRecord>,
}

/// JSON file backed store
///
/// The whole map is loaded on open and rewritten on every change. Writes go
/// through a temporary sibling file and a rename so readers never observe a
/// half-written cache.
#[derive(Debug)]
pub struct FileCache {
    path: PathBuf,
    records: RwLock<BTreeMap<StepId, CacheRecord>>,
    persist: Mutex<()>,
}

impl FileCache {
    /// Opens the cache at `path`
    ///
    /// A missing, unreadable, corrupt or foreign-version file yields an
    /// empty cache; every step is then considered stale.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = load_records(&path);
        debug!(
            "Opened cache {} with {} record(s)",
            path.display(),
            records.len()
        );
        Self {
            path,
            records: RwLock::new(records),
            persist: Mutex::new(()),
        }
    }

    fn persist(&self) -> Result<()> {
        let _guard = self.persist.lock().unwrap_or_else(|e| e.into_inner());

        let file = {
            let records = self.records.read().unwrap_or_else(|e| e.into_inner());
            CacheFile {
                version: CACHE_VERSION,
                steps: records
                    .iter()
                    .map(|(id, r)| (id.to_string(), r.clone()))
                    .collect(),
            }
        };

        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| BrickError::Cache(format!("Failed to serialize cache: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BrickError::Cache(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let tmp = staging_path(&self.path);
        std::fs::write(&tmp, json).map_err(|e| {
            BrickError::Cache(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            BrickError::Cache(format!(
                "Failed to move {} to {}: {}",
                tmp.display(),
                self.path.display(),
                e
            ))
        })?;

        Ok(())
    }
}

impl CacheStore for FileCache {
    fn get(&self, id: &StepId) -> Option<String> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .map(|r| r.fingerprint.clone())
    }

    fn put(&self, id: &StepId, fingerprint: &str) -> Result<()> {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), CacheRecord::new(fingerprint));
        self.persist()
    }

    fn entries(&self) -> Vec<(StepId, CacheRecord)> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect()
    }

    fn remove(&self, id: &StepId) -> Result<bool> {
        let removed = self
            .records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some();
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }
}

fn load_records(path: &Path) -> BTreeMap<StepId, CacheRecord> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            warn!("Cannot read cache {}: {}, starting empty", path.display(), e);
            return BTreeMap::new();
        }
    };

    let file: CacheFile = match serde_json::from_str(&contents) {
        Ok(file) => file,
        Err(e) => {
            warn!("Corrupt cache {}: {}, starting empty", path.display(), e);
            return BTreeMap::new();
        }
    };

    if file.version != CACHE_VERSION {
        warn!(
            "Cache {} has version {}, expected {}, starting empty",
            path.display(),
            file.version,
            CACHE_VERSION
        );
        return BTreeMap::new();
    }

    file.steps
        .into_iter()
        .filter_map(|(key, record)| match key.parse::<StepId>() {
            Ok(id) => Some((id, record)),
            Err(e) => {
                warn!("Ignoring cache record: {}", e);
                None
            }
        })
        .collect()
}

/// Sibling file a cache is written to before being renamed into place
pub fn staging_path(path: &Path) -> PathBuf {
    path.with_extension("json.tmp")
}
