//! Client-local persistence.
//!
//! A flat string-to-string store, the same contract the pages use for the
//! API credential, quiz settings, and per-page learner progress.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const QUIZ_SETTINGS_KEY: &str = "flashcard_quiz_settings";
pub const QUIZ_PROGRESS_KEY_PREFIX: &str = "flashcard_quiz_progress_";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored value is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("storage lock poisoned")]
    Poisoned,
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Overwrites any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError>
    where
        Self: Sized,
    {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError>
    where
        Self: Sized,
    {
        self.set(key, &serde_json::to_string(value)?)
    }
}

/// JSON helpers for trait objects, where the generic provided methods are unavailable.
pub fn get_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>, StorageError> {
    match store.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub fn set_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<(), StorageError> {
    store.set(key, &serde_json::to_string(value)?)
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// All entries in one JSON object on disk. A missing file reads as empty.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>, StorageError> {
        match fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(HashMap::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut HashMap<String, String>)) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        let mut entries = self.read_all()?;
        f(&mut entries);
        self.write_all(&entries)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

/// Quiz pacing shared by every page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSettings {
    /// Correct answers needed before a word counts as memorized
    #[serde(default)]
    pub threshold: u32,
    /// Words per study batch
    #[serde(default)]
    pub batch_size: u32,
}

impl Default for QuizSettings {
    fn default() -> Self {
        Self {
            threshold: 3,
            batch_size: 10,
        }
    }
}

impl QuizSettings {
    /// Unreadable or zero values fall back to the defaults.
    pub fn load(store: &dyn KeyValueStore) -> Self {
        let defaults = Self::default();
        match get_json::<QuizSettings>(store, QUIZ_SETTINGS_KEY) {
            Ok(Some(stored)) => Self {
                threshold: if stored.threshold == 0 { defaults.threshold } else { stored.threshold },
                batch_size: if stored.batch_size == 0 { defaults.batch_size } else { stored.batch_size },
            },
            Ok(None) => defaults,
            Err(e) => {
                tracing::warn!("failed to load quiz settings, using defaults: {}", e);
                defaults
            }
        }
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<(), StorageError> {
        set_json(store, QUIZ_SETTINGS_KEY, self)
    }
}

/// Correct-answer counts per item on one page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LearnerProgress(HashMap<String, u32>);

impl LearnerProgress {
    pub fn storage_key(page_path: &str) -> String {
        format!("{QUIZ_PROGRESS_KEY_PREFIX}{page_path}")
    }

    pub fn load(store: &dyn KeyValueStore, page_path: &str) -> Self {
        match get_json::<LearnerProgress>(store, &Self::storage_key(page_path)) {
            Ok(progress) => progress.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("failed to load progress for {}: {}", page_path, e);
                Self::default()
            }
        }
    }

    pub fn save(&self, store: &dyn KeyValueStore, page_path: &str) -> Result<(), StorageError> {
        set_json(store, &Self::storage_key(page_path), self)
    }

    pub fn count(&self, item_id: &str) -> u32 {
        self.0.get(item_id).copied().unwrap_or(0)
    }

    /// Returns the new count.
    pub fn record_correct(&mut self, item_id: &str) -> u32 {
        let count = self.0.entry(item_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn is_memorized(&self, item_id: &str, settings: &QuizSettings) -> bool {
        self.count(item_id) >= settings.threshold
    }
}
