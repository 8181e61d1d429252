//! Local persistence of resource snapshots.
//!
//! A narrow key/value seam: reads return `None` when the medium is missing or
//! unreadable, writes are best-effort. Nothing here returns an error to the
//! stores; failures are logged and the in-memory state stays authoritative.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use coinjar_protocol::VersionedPayload;
use serde::Serialize;
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::error::{JarError, Result};
use crate::storage::StorageConfig;

pub const STATE_KEY: &str = "coinjar-state";
pub const ARCHIVES_KEY: &str = "coinjar-archives";
pub const SETTINGS_KEY: &str = "coinjar-settings";

pub trait PersistentStore: Send + Sync {
    fn read(&self, key: &str) -> Option<String>;
    fn write(&self, key: &str, value: &str);
}

/// Reads a persisted snapshot, dropping anything that is not a JSON object.
pub fn load_snapshot(store: &dyn PersistentStore, key: &str) -> Option<VersionedPayload<Value>> {
    let raw = store.read(key)?;
    let snapshot = VersionedPayload::from_json_str(&raw);
    if snapshot.is_none() {
        tracing::warn!(key, "Ignoring malformed persisted snapshot");
    }
    snapshot
}

pub fn save_snapshot<T: Serialize>(
    store: &dyn PersistentStore,
    key: &str,
    snapshot: &VersionedPayload<T>,
) {
    match serde_json::to_string(snapshot) {
        Ok(raw) => store.write(key, &raw),
        Err(err) => tracing::warn!(key, error = %err, "Failed to serialize snapshot"),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// File-backed store
// ═══════════════════════════════════════════════════════════════════════════════

/// One JSON file per key under `<root>/state/`, replaced atomically.
#[derive(Debug, Clone)]
pub struct FileStore {
    storage: StorageConfig,
}

impl FileStore {
    pub fn new(storage: StorageConfig) -> Self {
        Self { storage }
    }
}

impl PersistentStore for FileStore {
    fn read(&self, key: &str) -> Option<String> {
        let path = self.storage.snapshot_file(key);
        if !path.exists() {
            return None;
        }
        match fs_err::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(err) => {
                tracing::warn!(key, error = %err, "Failed to read persisted snapshot");
                None
            }
        }
    }

    fn write(&self, key: &str, value: &str) {
        let path = self.storage.snapshot_file(key);
        let result = fs_err::create_dir_all(self.storage.state_dir())
            .map_err(|source| JarError::Io {
                context: "creating state directory".to_string(),
                source,
            })
            .and_then(|_| atomic_write(&path, value));
        if let Err(err) = result {
            tracing::warn!(key, error = %err, "Failed to persist snapshot");
        }
    }
}

fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| JarError::Io {
        context: format!("creating temp file in {}", dir.display()),
        source: e,
    })?;

    tmp.write_all(contents.as_bytes())
        .and_then(|_| tmp.flush())
        .map_err(|e| JarError::Io {
            context: format!("writing temp file for {}", path.display()),
            source: e,
        })?;

    tmp.persist(path).map_err(|e| JarError::Io {
        context: format!("persisting temp file to {}", path.display()),
        source: e.error,
    })?;

    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory store
// ═══════════════════════════════════════════════════════════════════════════════

/// Volatile store for tests and hosts without a writable medium.
/// Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PersistentStore for MemoryStore {
    fn read(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn write(&self, key: &str, value: &str) {
        self.lock().insert(key.to_string(), value.to_string());
    }
}
