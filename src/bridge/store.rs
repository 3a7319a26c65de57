//! Storage shared between the companion app and the broadcast worker
//!
//! Entries are grouped by namespace (the app-group name). Stores never cache:
//! every call goes to the backing medium so a value written by one process is
//! seen by the other on its next read.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StoreError};

/// Key-value area visible to both processes
pub trait SharedStore: Send + Sync {
    /// String value under `key`, `None` when unset
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;

    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<()>;

    fn remove(&self, namespace: &str, key: &str) -> Result<()>;
}

/// On-disk layout of one namespace
#[derive(Debug, Default, Serialize, Deserialize)]
struct SharedDocument {
    #[serde(flatten)]
    entries: BTreeMap<String, Value>,
}

/// One JSON document per namespace at `<dir>/<namespace>.json`.
///
/// Writes go to a temporary file in the same directory and are renamed into
/// place, so a concurrent reader sees either the old or the new document.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the document backing `namespace`
    pub fn document_path(&self, namespace: &str) -> PathBuf {
        self.dir.join(format!("{}.json", namespace))
    }

    fn load(&self, namespace: &str) -> Result<SharedDocument> {
        let data = match fs::read(self.document_path(namespace)) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SharedDocument::default()),
            Err(e) => return Err(StoreError::Io(e).into()),
        };
        if data.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(SharedDocument::default());
        }
        serde_json::from_slice(&data).map_err(|e| StoreError::Format(e).into())
    }

    fn save(&self, namespace: &str, doc: &SharedDocument) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(StoreError::Io)?;

        let path = self.document_path(namespace);
        let tmp = self
            .dir
            .join(format!(".{}.json.{}.tmp", namespace, std::process::id()));
        let data = serde_json::to_vec_pretty(doc).map_err(StoreError::Format)?;

        fs::write(&tmp, data).map_err(StoreError::Io)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::Io(e).into());
        }
        Ok(())
    }
}

impl SharedStore for JsonFileStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let doc = self.load(namespace)?;
        // Non-string values are treated as unset
        Ok(doc
            .entries
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let mut doc = self.load(namespace)?;
        doc.entries
            .insert(key.to_string(), Value::String(value.to_string()));
        self.save(namespace, &doc)
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<()> {
        let mut doc = self.load(namespace)?;
        if doc.entries.remove(key).is_some() {
            self.save(namespace, &doc)?;
        }
        Ok(())
    }
}

/// In-process store, for tests and single-process setups
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(String, String), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), String>> {
        // A panic while holding the lock cannot leave the map half-written
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SharedStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries()
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.entries()
            .insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<()> {
        self.entries()
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }
}
