use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;
use tokio::sync::RwLock;

use super::http::{RequestKey, Response};

pub const MAX_CACHE_NAME_LENGTH: usize = 64;

/// Name of one cache namespace, e.g. `cashlog-cache-v1`. Exactly one name is
/// active at a time; every other name is garbage once activation completes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheName(String);

impl CacheName {
    pub fn new(name: impl Into<String>) -> Result<Self, CacheError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> Result<(), CacheError> {
        if name.trim().is_empty() {
            return Err(CacheError::InvalidName {
                name: name.to_string(),
                reason: "cache name cannot be empty".to_string(),
            });
        }

        if name.len() > MAX_CACHE_NAME_LENGTH {
            return Err(CacheError::InvalidName {
                name: name.chars().take(50).collect::<String>() + "...",
                reason: format!(
                    "cache name exceeds maximum length of {MAX_CACHE_NAME_LENGTH} bytes"
                ),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(CacheError::InvalidName {
                name: name.to_string(),
                reason: "cache name may only contain ASCII letters, digits, '-', '_' and '.'"
                    .to_string(),
            });
        }

        if name.contains("..") {
            return Err(CacheError::InvalidName {
                name: name.to_string(),
                reason: "cache name cannot contain '..'".to_string(),
            });
        }

        Ok(())
    }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CacheName {
    type Error = CacheError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CacheName> for String {
    fn from(name: CacheName) -> Self {
        name.0
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("invalid cache name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("cache storage error: {0}")]
    Storage(String),

    #[error("cache serialization error: {0}")]
    Serialization(String),

    #[error("cache lock poisoned")]
    LockFailed,
}

/// Named, versioned response caches. Modelled on the browser Cache Storage
/// API: a set of namespaces, each mapping request keys to stored responses.
#[async_trait::async_trait]
pub trait CacheStorage: Send + Sync {
    /// Creates the namespace if missing. Returns `true` if it was created.
    async fn open(&self, name: &CacheName) -> Result<bool, CacheError>;

    async fn lookup(
        &self,
        name: &CacheName,
        key: &RequestKey,
    ) -> Result<Option<Response>, CacheError>;

    async fn put(
        &self,
        name: &CacheName,
        key: RequestKey,
        response: Response,
    ) -> Result<(), CacheError>;

    /// Stores every entry or none of them.
    async fn put_all(
        &self,
        name: &CacheName,
        entries: Vec<(RequestKey, Response)>,
    ) -> Result<(), CacheError>;

    async fn keys(&self, name: &CacheName) -> Result<Vec<RequestKey>, CacheError>;

    async fn names(&self) -> Result<BTreeSet<String>, CacheError>;

    /// Removes a namespace and everything in it. Returns `true` if it existed.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;
}

#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<BTreeMap<String, HashMap<RequestKey, Response>>>,
}

impl MemoryCacheStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &CacheName) -> Result<bool, CacheError> {
        let mut caches = self.caches.write().await;
        if caches.contains_key(name.as_str()) {
            return Ok(false);
        }
        caches.insert(name.to_string(), HashMap::new());
        Ok(true)
    }

    async fn lookup(
        &self,
        name: &CacheName,
        key: &RequestKey,
    ) -> Result<Option<Response>, CacheError> {
        let caches = self.caches.read().await;
        Ok(caches
            .get(name.as_str())
            .and_then(|cache| cache.get(key))
            .cloned())
    }

    async fn put(
        &self,
        name: &CacheName,
        key: RequestKey,
        response: Response,
    ) -> Result<(), CacheError> {
        let mut caches = self.caches.write().await;
        caches
            .entry(name.to_string())
            .or_default()
            .insert(key, response);
        Ok(())
    }

    async fn put_all(
        &self,
        name: &CacheName,
        entries: Vec<(RequestKey, Response)>,
    ) -> Result<(), CacheError> {
        let mut caches = self.caches.write().await;
        caches.entry(name.to_string()).or_default().extend(entries);
        Ok(())
    }

    async fn keys(&self, name: &CacheName) -> Result<Vec<RequestKey>, CacheError> {
        let caches = self.caches.read().await;
        let mut keys: Vec<RequestKey> = caches
            .get(name.as_str())
            .map(|cache| cache.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }

    async fn names(&self) -> Result<BTreeSet<String>, CacheError> {
        Ok(self.caches.read().await.keys().cloned().collect())
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.caches.write().await.remove(name).is_some())
    }
}
