//! Unencrypted on-device key/value storage: settings, JSON blobs and
//! expiring cache entries, persisted as one JSON document.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};

use super::cache::{cache_key, is_cache_key, CacheEntry};
use crate::clock::{Clock, SystemClock};

#[derive(Debug, thiserror::Error)]
pub enum LocalStoreError {
    #[error("Local store used before initialize()")]
    NotInitialized,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Value under '{key}' is not a {expected}")]
    TypeMismatch { key: String, expected: &'static str },
}

pub type Result<T> = std::result::Result<T, LocalStoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocalBackend {
    /// A JSON document on disk, rewritten on every change.
    File { path: PathBuf },
    Memory,
}

type Values = BTreeMap<String, Value>;

pub struct LocalStore {
    backend: LocalBackend,
    clock: Arc<dyn Clock>,
    values: OnceCell<RwLock<Values>>,
}

impl LocalStore {
    pub fn new(backend: LocalBackend) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: LocalBackend, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            values: OnceCell::new(),
        }
    }

    pub fn backend(&self) -> &LocalBackend {
        &self.backend
    }

    pub fn is_initialized(&self) -> bool {
        self.values.initialized()
    }

    /// Load the backing document. A missing file starts an empty store.
    pub async fn initialize(&self) -> Result<()> {
        self.values
            .get_or_try_init(|| async {
                let values = match &self.backend {
                    LocalBackend::File { path } => load(path).await?,
                    LocalBackend::Memory => Values::new(),
                };
                log::debug!("Local store loaded with {} keys", values.len());
                Ok::<_, LocalStoreError>(RwLock::new(values))
            })
            .await?;
        Ok(())
    }

    // --- Primitives --- //

    pub async fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.get_typed(key, "string", |v| v.as_str().map(str::to_string))
            .await
    }

    pub async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.insert(key, Value::from(value)).await
    }

    pub async fn get_int(&self, key: &str) -> Result<Option<i64>> {
        self.get_typed(key, "integer", Value::as_i64).await
    }

    pub async fn set_int(&self, key: &str, value: i64) -> Result<()> {
        self.insert(key, Value::from(value)).await
    }

    pub async fn get_double(&self, key: &str) -> Result<Option<f64>> {
        self.get_typed(key, "number", Value::as_f64).await
    }

    /// Non-finite values cannot be represented and are stored as null.
    pub async fn set_double(&self, key: &str, value: f64) -> Result<()> {
        self.insert(key, Value::from(value)).await
    }

    pub async fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.get_typed(key, "bool", Value::as_bool).await
    }

    pub async fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.insert(key, Value::from(value)).await
    }

    pub async fn get_string_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        self.get_typed(key, "string list", |v| {
            v.as_array()?
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .await
    }

    pub async fn set_string_list(&self, key: &str, value: &[String]) -> Result<()> {
        self.insert(key, Value::from(value.to_vec())).await
    }

    // --- JSON objects --- //

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let values = self.values()?.read().await;
        match values.get(key) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|_| LocalStoreError::TypeMismatch {
                    key: key.to_string(),
                    expected: "json",
                }),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.insert(key, serde_json::to_value(value)?).await
    }

    pub async fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.values()?.read().await.contains_key(key))
    }

    /// All stored keys, cache entries included, in sorted order.
    pub async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.values()?.read().await.keys().cloned().collect())
    }

    /// Returns whether the key was present.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        self.update(|values| values.remove(key).is_some()).await
    }

    // --- Cache --- //

    pub async fn set_cache_item<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expiry: Option<Duration>,
    ) -> Result<()> {
        let entry = CacheEntry::new(serde_json::to_value(value)?, self.clock.now_millis(), expiry);
        self.insert(&cache_key(key), serde_json::to_value(entry)?)
            .await
    }

    /// The cached value, unless it is missing or expired. Expired entries are
    /// left in place until overwritten, pruned or cleared.
    pub async fn get_cache_item<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let values = self.values()?.read().await;
        let Some(raw) = values.get(&cache_key(key)) else {
            return Ok(None);
        };
        let entry: CacheEntry = serde_json::from_value(raw.clone())?;
        if entry.is_expired(self.clock.now_millis()) {
            log::debug!("Cache entry '{}' expired", key);
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(entry.value)?))
    }

    pub async fn remove_cache_item(&self, key: &str) -> Result<bool> {
        self.remove(&cache_key(key)).await
    }

    /// Drop expired cache entries now. Returns how many were removed.
    /// Entries that no longer parse as cache entries are dropped too.
    pub async fn prune_expired_cache(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        self.update(|values| {
            let before = values.len();
            values.retain(|key, value| {
                if !is_cache_key(key) {
                    return true;
                }
                match serde_json::from_value::<CacheEntry>(value.clone()) {
                    Ok(entry) => !entry.is_expired(now),
                    Err(_) => false,
                }
            });
            before - values.len()
        })
        .await
    }

    /// Remove every cache entry, keeping settings and other values.
    pub async fn clear_cache(&self) -> Result<()> {
        self.update(|values| values.retain(|key, _| !is_cache_key(key)))
            .await?;
        log::debug!("Cleared local cache");
        Ok(())
    }

    /// Remove everything. The store stays usable afterwards.
    pub async fn clear_all(&self) -> Result<()> {
        self.update(Values::clear).await?;
        log::debug!("Cleared local store");
        Ok(())
    }

    fn values(&self) -> Result<&RwLock<Values>> {
        self.values.get().ok_or(LocalStoreError::NotInitialized)
    }

    async fn get_typed<T>(
        &self,
        key: &str,
        expected: &'static str,
        convert: impl FnOnce(&Value) -> Option<T>,
    ) -> Result<Option<T>> {
        let values = self.values()?.read().await;
        match values.get(key) {
            None => Ok(None),
            Some(value) => convert(value)
                .map(Some)
                .ok_or_else(|| LocalStoreError::TypeMismatch {
                    key: key.to_string(),
                    expected,
                }),
        }
    }

    async fn insert(&self, key: &str, value: Value) -> Result<()> {
        self.update(|values| {
            values.insert(key.to_string(), value);
        })
        .await
    }

    /// Apply `change` to a copy of the map, persist the copy, and only then
    /// make it visible. A failed save leaves memory and disk as they were.
    async fn update<R>(&self, change: impl FnOnce(&mut Values) -> R) -> Result<R> {
        let mut values = self.values()?.write().await;
        let mut next = values.clone();
        let out = change(&mut next);
        if next != *values {
            self.persist(&next).await?;
            *values = next;
        }
        Ok(out)
    }

    async fn persist(&self, values: &Values) -> Result<()> {
        match &self.backend {
            LocalBackend::File { path } => save(path, values).await,
            LocalBackend::Memory => Ok(()),
        }
    }
}

async fn load(path: &Path) -> Result<Values> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Ok(Values::new()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Values::new()),
        Err(e) => Err(e.into()),
    }
}

/// Write to a sibling temp file then rename, so a crash never leaves a
/// truncated document behind.
async fn save(path: &Path, values: &Values) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(values)?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
