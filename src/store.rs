//! Durable state file backing the registries and id counters.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::command_set::CommandSet;
use crate::error::{AppError, Result};
use crate::instance::Instance;

/// Everything that survives a restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct State {
    /// Last surrogate id handed to a command set.
    #[serde(default)]
    pub last_command_set_id: u64,
    /// Last allocated number per hardware type.
    #[serde(default)]
    pub id_counters: BTreeMap<String, u64>,
    #[serde(default)]
    pub instances: BTreeMap<String, Instance>,
    #[serde(default)]
    pub command_sets: Vec<CommandSet>,
}

/// TOML-backed state with an in-memory snapshot.
///
/// Readers get a cheap `Arc` snapshot. Writers run a read-modify-write
/// transaction under `write_lock`; the snapshot is only swapped after the file
/// has been written, so a failed write leaves both untouched.
pub struct Store {
    path: PathBuf,
    write_lock: Mutex<()>,
    cache: RwLock<Arc<State>>,
}

fn load_state_from_disk(path: &Path) -> Result<State> {
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::store(format!("Failed to read {}: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| AppError::store(format!("Failed to parse {}: {}", path.display(), e)))
}

fn save_state_to_disk(path: &Path, state: &State) -> Result<()> {
    let content = toml::to_string_pretty(state)
        .map_err(|e| AppError::store(format!("Failed to serialize state: {}", e)))?;
    let tmp = path.with_extension("toml.tmp");
    fs::write(&tmp, content)
        .map_err(|e| AppError::store(format!("Failed to write {}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, path)
        .map_err(|e| AppError::store(format!("Failed to replace {}: {}", path.display(), e)))
}

impl Store {
    /// Open the state file, creating an empty one when missing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            load_state_from_disk(&path)?
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let state = State::default();
            save_state_to_disk(&path, &state)?;
            state
        };

        log::debug!("Opened state file {}", path.display());

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
            cache: RwLock::new(Arc::new(state)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current snapshot.
    pub fn load(&self) -> Arc<State> {
        let state = self.cache.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&state)
    }

    /// Execute a read-modify-write operation on the state while holding the write lock.
    /// Nothing is persisted when `f` fails.
    pub fn with_state_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut State) -> Result<T>,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut updated = (*self.load()).clone();
        let result = f(&mut updated)?;
        save_state_to_disk(&self.path, &updated)?;

        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(updated);

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn creates_and_reopens_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");

        let store = Store::open(&path).unwrap();
        assert!(path.exists());
        store
            .with_state_mut(|s| {
                s.id_counters.insert("qtap".to_string(), 7);
                Ok(())
            })
            .unwrap();

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.load().id_counters.get("qtap"), Some(&7));
    }

    #[test]
    fn failed_closure_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("state.toml")).unwrap();

        let err = store
            .with_state_mut(|s| -> Result<()> {
                s.last_command_set_id = 99;
                Err(AppError::validation("nope"))
            })
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(store.load().last_command_set_id, 0);
    }

    #[test]
    fn failed_write_keeps_cache() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("gone");
        let store = Store::open(sub.join("state.toml")).unwrap();
        fs::remove_dir_all(&sub).unwrap();

        let err = store
            .with_state_mut(|s| {
                s.last_command_set_id = 5;
                Ok(())
            })
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Store);
        assert_eq!(store.load().last_command_set_id, 0);
    }

    #[test]
    fn corrupt_file_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        fs::write(&path, "instances = 3").unwrap();

        let err = Store::open(&path).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Store);
    }
}
