//! Key/value persistence collaborator.
//!
//! The engine only needs four operations from storage, captured by
//! [`KeyValueStore`]. The storage technology is the host's choice (browser
//! local storage, a file, a database); [`MemoryStore`] is the in-process
//! implementation used by default and in tests.
//!
//! # Examples
//!
//! ```rust
//! use traceweave::persistence::{KeyValueStore, MemoryStore};
//!
//! let store = MemoryStore::new();
//! store.put("chatHistory", "[]").unwrap();
//! assert_eq!(store.get("chatHistory").unwrap().as_deref(), Some("[]"));
//! assert_eq!(store.keys().unwrap(), vec!["chatHistory".to_string()]);
//! assert!(store.delete("chatHistory").unwrap());
//! ```

use std::collections::HashMap;
use std::error::Error;
use std::sync::{Arc, Mutex, MutexGuard};

/// Storage operations the engine depends on.
pub trait KeyValueStore: Send + Sync {
    fn put(&self, key: &str, value: &str) -> Result<(), Box<dyn Error + Send + Sync>>;

    fn get(&self, key: &str) -> Result<Option<String>, Box<dyn Error + Send + Sync>>;

    /// Every stored key, in no particular order.
    fn keys(&self) -> Result<Vec<String>, Box<dyn Error + Send + Sync>>;

    /// Removes a key; returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool, Box<dyn Error + Send + Sync>>;
}

/// Thread-safe in-memory store.
///
/// Cloning a `MemoryStore` shares the underlying map, so a test can keep a
/// handle while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, Box<dyn Error + Send + Sync>> {
        self.entries
            .lock()
            .map_err(|err| format!("memory store lock poisoned: {}", err).into())
    }
}

impl KeyValueStore for MemoryStore {
    fn put(&self, key: &str, value: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, Box<dyn Error + Send + Sync>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn keys(&self) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    fn delete(&self, key: &str) -> Result<bool, Box<dyn Error + Send + Sync>> {
        Ok(self.lock()?.remove(key).is_some())
    }
}
