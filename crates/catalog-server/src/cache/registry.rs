//! Registry of populated query-cache keys
//!
//! Product listings are cached under keys derived from arbitrary filter
//! combinations, so invalidation cannot enumerate them. Every key written by
//! [`super::QueryCache`] is recorded here with its expiry and deleted as a set.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::SWEEP_EVERY_WRITES;

#[derive(Debug, Default)]
struct Keys {
    expiry: HashMap<String, Instant>,
    registrations: u64,
}

/// Cache keys that currently hold listing pages
///
/// A key is forgotten once its entry's TTL has passed, since the store no
/// longer holds anything to invalidate.
#[derive(Debug, Default)]
pub struct CacheKeyRegistry {
    keys: Mutex<Keys>,
}

impl CacheKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key` as live for `ttl`
    pub fn register(&self, key: impl Into<String>, ttl: Duration) {
        let Ok(mut keys) = self.keys.lock() else {
            return;
        };
        let now = Instant::now();
        keys.expiry.insert(key.into(), now + ttl);

        keys.registrations += 1;
        if keys.registrations % SWEEP_EVERY_WRITES == 0 {
            keys.expiry.retain(|_, expires_at| *expires_at > now);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.keys
            .lock()
            .map(|keys| keys.expiry.get(key).is_some_and(|expires_at| *expires_at > now))
            .unwrap_or(false)
    }

    /// Number of registered keys that have not expired
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.keys
            .lock()
            .map(|keys| keys.expiry.values().filter(|expires_at| **expires_at > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every key and return the ones that have not expired
    pub(crate) fn drain(&self) -> Vec<String> {
        let now = Instant::now();
        match self.keys.lock() {
            Ok(mut keys) => keys
                .expiry
                .drain()
                .filter(|(_, expires_at)| *expires_at > now)
                .map(|(key, _)| key)
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    #[cfg(test)]
    fn stored(&self) -> usize {
        self.keys.lock().map(|keys| keys.expiry.len()).unwrap_or(0)
    }
}
