//! Local key/value preferences (theme, install prompt). Never holds core data.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const CURRENT_SCHEMA_VERSION: u32 = 1;
const PREFS_MAGIC: &[u8; 4] = b"CLPF";
const MAX_PREFS_BYTES: usize = 1024 * 1024;
const MAX_KEY_LENGTH: usize = 256;
const MAX_VALUE_LENGTH: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum PrefsError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupted preferences: {reason}")]
    Corrupted { reason: &'static str },

    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    #[error("schema version {found} is newer than supported {max}")]
    FutureSchema { found: u32, max: u32 },

    #[error("preferences too large: {size} bytes, max {max}")]
    TooLarge { size: usize, max: usize },

    #[error("invalid preference key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("lock acquisition failed")]
    LockFailed,
}

impl From<ciborium::de::Error<std::io::Error>> for PrefsError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        PrefsError::Serialization(e.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for PrefsError {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        PrefsError::Serialization(e.to_string())
    }
}

pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, PrefsError>;
    fn set(&self, key: &str, value: &str) -> Result<(), PrefsError>;
    fn remove(&self, key: &str) -> Result<(), PrefsError>;
}

fn validate_entry(key: &str, value: Option<&str>) -> Result<(), PrefsError> {
    if key.trim().is_empty() {
        return Err(PrefsError::InvalidKey {
            key: key.to_string(),
            reason: "key cannot be empty",
        });
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(PrefsError::InvalidKey {
            key: key.chars().take(50).collect::<String>() + "...",
            reason: "key too long",
        });
    }
    if key.chars().any(char::is_control) {
        return Err(PrefsError::InvalidKey {
            key: key.escape_default().to_string(),
            reason: "key contains control characters",
        });
    }
    if let Some(value) = value {
        if value.len() > MAX_VALUE_LENGTH {
            return Err(PrefsError::TooLarge {
                size: value.len(),
                max: MAX_VALUE_LENGTH,
            });
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryPreferences {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>, PrefsError> {
        self.values.lock().map_err(|_| PrefsError::LockFailed)
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Result<Option<String>, PrefsError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PrefsError> {
        validate_entry(key, Some(value))?;
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PrefsError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

// ============================================================================
// File backend
// ============================================================================

#[derive(Serialize, Deserialize)]
struct PrefsEnvelope {
    magic: [u8; 4],
    schema_version: u32,
    checksum: [u8; 32],
    payload: Vec<u8>,
}

fn encode(values: &BTreeMap<String, String>) -> Result<Vec<u8>, PrefsError> {
    let mut payload = Vec::new();
    ciborium::into_writer(values, &mut payload)?;

    let envelope = PrefsEnvelope {
        magic: *PREFS_MAGIC,
        schema_version: CURRENT_SCHEMA_VERSION,
        checksum: *blake3::hash(&payload).as_bytes(),
        payload,
    };

    let mut bytes = Vec::new();
    ciborium::into_writer(&envelope, &mut bytes)?;
    Ok(bytes)
}

fn decode(bytes: &[u8]) -> Result<BTreeMap<String, String>, PrefsError> {
    if bytes.len() > MAX_PREFS_BYTES {
        return Err(PrefsError::TooLarge {
            size: bytes.len(),
            max: MAX_PREFS_BYTES,
        });
    }

    let envelope: PrefsEnvelope = ciborium::from_reader(bytes)?;

    if envelope.magic != *PREFS_MAGIC {
        return Err(PrefsError::Corrupted {
            reason: "invalid magic bytes",
        });
    }

    if envelope.schema_version > CURRENT_SCHEMA_VERSION {
        return Err(PrefsError::FutureSchema {
            found: envelope.schema_version,
            max: CURRENT_SCHEMA_VERSION,
        });
    }

    let actual = blake3::hash(&envelope.payload);
    if actual.as_bytes() != &envelope.checksum {
        return Err(PrefsError::IntegrityCheckFailed {
            expected: hex::encode(envelope.checksum),
            actual: hex::encode(actual.as_bytes()),
        });
    }

    Ok(ciborium::from_reader(&envelope.payload[..])?)
}

/// Preferences persisted to one file. Every change rewrites the file through
/// a temporary sibling and a rename, so a crash leaves the old or new file.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FilePreferences {
    /// Opens `path`, starting empty if it does not exist yet. A damaged file
    /// is an error, not an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PrefsError> {
        let path = path.into();
        let values = if path.exists() {
            let bytes = std::fs::read(&path)?;
            if bytes.is_empty() {
                return Err(PrefsError::Corrupted {
                    reason: "empty file",
                });
            }
            decode(&bytes)?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), entries = values.len(), "Preferences loaded");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>, PrefsError> {
        self.values.lock().map_err(|_| PrefsError::LockFailed)
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), PrefsError> {
        let bytes = encode(values)?;
        if bytes.len() > MAX_PREFS_BYTES {
            return Err(PrefsError::TooLarge {
                size: bytes.len(),
                max: MAX_PREFS_BYTES,
            });
        }

        let tmp_path = self.path.with_extension("tmp");
        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, &self.path)?;

        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }

    fn update(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), PrefsError> {
        let mut values = self.lock()?;
        let previous = values.clone();
        change(&mut values);
        if let Err(e) = self.persist(&values) {
            warn!(error = %e, "Failed to persist preferences, reverting");
            *values = previous;
            return Err(e);
        }
        Ok(())
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: &str) -> Result<Option<String>, PrefsError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PrefsError> {
        validate_entry(key, Some(value))?;
        self.update(|values| {
            values.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), PrefsError> {
        if self.lock()?.get(key).is_none() {
            return Ok(());
        }
        self.update(|values| {
            values.remove(key);
        })
    }
}
