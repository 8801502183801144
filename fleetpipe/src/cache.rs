//! Scoped concurrent key/value caches.
//!
//! Three cache scopes coexist during a run: the pipeline cache (whole run,
//! the only legal channel for one module to hand discovered facts to a later
//! module), module caches (one module execution each, drawn from a reuse
//! pool), and host caches (embedded in each [`Host`](crate::host::Host),
//! process lifetime).

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A thread-safe mapping from string key to JSON value.
///
/// Values are stored as [`serde_json::Value`] so facts discovered on one host
/// can be handed to later steps without downcasting machinery. Absence is
/// always distinguishable from a stored `false` or zero value.
#[derive(Debug, Default)]
pub struct Cache {
    data: RwLock<HashMap<String, Value>>,
}

impl Cache {
    /// Creates a new empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a value from the cache.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.read().get(key).cloned()
    }

    /// Gets a boolean value. Returns `None` when the key is absent or the
    /// stored value is not a boolean.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.data.read().get(key).and_then(Value::as_bool)
    }

    /// Gets a value deserialized into a concrete type.
    #[must_use]
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.data.read().get(key).cloned()?;
        serde_json::from_value(value).ok()
    }

    /// Sets a value, overwriting any existing entry.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.write().insert(key.into(), value.into());
    }

    /// Checks if a key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    /// Removes all entries while preserving the container's identity, so a
    /// pooled instance can be reused for the next module.
    pub fn clean(&self) {
        self.data.write().clear();
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

/// A pool of module-scoped caches owned by the pipeline.
///
/// An instance is acquired before a module runs and returned after, cleaned,
/// so no state leaks to the next module. An instance that is still referenced
/// elsewhere (a background server module holding its context) is never
/// returned to the pool.
#[derive(Debug, Default)]
pub struct CachePool {
    pool: Mutex<Vec<Arc<Cache>>>,
}

impl CachePool {
    /// Creates a new empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a cache, reusing a pooled instance when one is available.
    #[must_use]
    pub fn acquire(&self) -> Arc<Cache> {
        self.pool
            .lock()
            .pop()
            .unwrap_or_else(|| Arc::new(Cache::new()))
    }

    /// Returns a cache to the pool after cleaning it.
    ///
    /// The instance is dropped instead of pooled when other references to it
    /// are still alive.
    pub fn release(&self, cache: Arc<Cache>) {
        if Arc::strong_count(&cache) == 1 {
            cache.clean();
            self.pool.lock().push(cache);
        }
    }

    /// Returns the number of idle pooled instances.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.pool.lock().len()
    }
}
