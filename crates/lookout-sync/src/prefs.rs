//! Persisted user preferences.
//!
//! A [`PreferenceBackend`] stores raw strings by key. [`Preferences`]
//! layers JSON encoding on top: values are encoded on `set` and decoded
//! on `get`, and a stored value that no longer decodes is logged,
//! removed, and replaced by the caller's default.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::SyncError;

/// Raw string key-value storage.
pub trait PreferenceBackend: Send + Sync {
    /// The stored string for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Preferences`] if the storage cannot be read.
    fn load(&self, key: &str) -> Result<Option<String>, SyncError>;

    /// Store `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Preferences`] if the storage cannot be written.
    fn store(&self, key: &str, value: String) -> Result<(), SyncError>;

    /// Remove `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Preferences`] if the storage cannot be written.
    fn remove(&self, key: &str) -> Result<(), SyncError>;
}

/// Preferences kept in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryBackend {
    /// An empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PreferenceBackend for MemoryBackend {
    fn load(&self, key: &str) -> Result<Option<String>, SyncError> {
        Ok(self.values().get(key).cloned())
    }

    fn store(&self, key: &str, value: String) -> Result<(), SyncError> {
        self.values().insert(key.to_owned(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SyncError> {
        self.values().remove(key);
        Ok(())
    }
}

/// Preferences kept in a JSON object file, rewritten on every change.
///
/// A missing file is an empty store.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileBackend {
    /// A backend reading and writing `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, SyncError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(SyncError::Preferences(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_str(&raw).map_err(|e| {
            SyncError::Preferences(format!("corrupt preference file {}: {e}", self.path.display()))
        })
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), SyncError> {
        let raw = serde_json::to_string_pretty(map)?;
        std::fs::write(&self.path, raw).map_err(|e| {
            SyncError::Preferences(format!("failed to write {}: {e}", self.path.display()))
        })
    }

    fn update<F>(&self, change: F) -> Result<(), SyncError>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut map = self.read_map()?;
        change(&mut map);
        self.write_map(&map)
    }
}

impl PreferenceBackend for FileBackend {
    fn load(&self, key: &str) -> Result<Option<String>, SyncError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_map()?.remove(key))
    }

    fn store(&self, key: &str, value: String) -> Result<(), SyncError> {
        self.update(|map| {
            map.insert(key.to_owned(), value);
        })
    }

    fn remove(&self, key: &str) -> Result<(), SyncError> {
        self.update(|map| {
            map.remove(key);
        })
    }
}

/// JSON-encoding preference store.
#[derive(Debug)]
pub struct Preferences<B> {
    backend: B,
}

impl<B: PreferenceBackend> Preferences<B> {
    /// Wrap a backend.
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }

    /// The value stored under `key`, or `default` if it is missing,
    /// unreadable, or no longer decodes as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let raw = match self.backend.load(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return default,
            Err(e) => {
                warn!(key, error = %e, "failed to read preference");
                return default;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, value = %raw, error = %e, "removing undecodable preference");
                if let Err(e) = self.unset(key) {
                    warn!(key, error = %e, "failed to remove preference");
                }
                default
            }
        }
    }

    /// Store `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be encoded or stored.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), SyncError> {
        let raw = serde_json::to_string(value)?;
        self.backend.store(key, raw)
    }

    /// Remove `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    pub fn unset(&self, key: &str) -> Result<(), SyncError> {
        self.backend.remove(key)
    }

    /// The wrapped backend.
    pub const fn backend(&self) -> &B {
        &self.backend
    }
}
