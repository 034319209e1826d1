//! Expiring cache entries kept in the local store's reserved namespace

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::clock::duration_millis;

/// Prefix reserving the cache sub-namespace inside the local store.
pub const CACHE_PREFIX: &str = "cache:";

pub fn cache_key(key: &str) -> String {
    format!("{}{}", CACHE_PREFIX, key)
}

pub fn is_cache_key(key: &str) -> bool {
    key.starts_with(CACHE_PREFIX)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub stored_at: i64,
    pub expiry_ms: Option<i64>,
}

impl CacheEntry {
    pub fn new(value: serde_json::Value, stored_at: i64, expiry: Option<Duration>) -> Self {
        Self {
            value,
            stored_at,
            expiry_ms: expiry.map(duration_millis),
        }
    }

    /// When the entry stops being readable, if ever.
    pub fn expires_at(&self) -> Option<i64> {
        self.expiry_ms
            .map(|expiry| self.stored_at.saturating_add(expiry))
    }

    pub fn is_expired(&self, now_millis: i64) -> bool {
        match self.expires_at() {
            Some(expires_at) => now_millis >= expires_at,
            None => false,
        }
    }
}
