//! Chat history and answer backups.
//!
//! Two kinds of records are kept in the [`KeyValueStore`]:
//!
//! - a ring buffer of the last `history_capacity` (prompt, response) pairs,
//!   stored as one JSON array under [`CHAT_HISTORY_KEY`], oldest first;
//! - a full-text backup of every answer under `complete_message_{id}`,
//!   pruned to twice the history capacity, plus an extra
//!   `product_message_{millis}` copy of answers that carry product content;
//! - recovery snapshots under `message_backup_{millis}`, each one a JSON map
//!   of every answer backup at the time it was taken.
//!
//! [`ChatHistory::recover_entries`] uses the backups to repair history
//! entries whose stored response was cut short.
//!
//! Storage failures never abort a turn: they are logged and reported as
//! [`TraceError::Storage`] to the caller, which decides whether to surface
//! them.

use crate::traceweave::error::TraceError;
use crate::traceweave::persistence::KeyValueStore;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const CHAT_HISTORY_KEY: &str = "chatHistory";
pub const COMPLETE_MESSAGE_PREFIX: &str = "complete_message_";
pub const PRODUCT_MESSAGE_PREFIX: &str = "product_message_";
pub const MESSAGE_SNAPSHOT_PREFIX: &str = "message_backup_";

/// A backup must be at least this many characters longer than a stored
/// response before it replaces it.
pub const RECOVERY_MIN_GAIN: usize = 10;

/// One committed exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub prompt: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

fn storage_error(err: Box<dyn std::error::Error + Send + Sync>) -> TraceError {
    TraceError::Storage(err.to_string())
}

/// Numeric suffix of a backup key, used to order backups newest first.
fn backup_ordinal(key: &str, prefix: &str) -> i64 {
    key.trim_start_matches(prefix).parse().unwrap_or(0)
}

fn is_answer_backup(key: &str) -> bool {
    key.starts_with(COMPLETE_MESSAGE_PREFIX) || key.starts_with(PRODUCT_MESSAGE_PREFIX)
}

pub struct ChatHistory {
    store: Arc<dyn KeyValueStore>,
    capacity: usize,
}

impl ChatHistory {
    pub fn new(store: Arc<dyn KeyValueStore>, capacity: usize) -> Self {
        Self { store, capacity }
    }

    /// Stored entries, oldest first. A missing or unreadable record reads as
    /// an empty history.
    pub fn entries(&self) -> Result<Vec<HistoryEntry>, TraceError> {
        let raw = match self.store.get(CHAT_HISTORY_KEY).map_err(storage_error)? {
            Some(raw) => raw,
            None => return Ok(Vec::new()),
        };
        match serde_json::from_str::<Vec<HistoryEntry>>(&raw) {
            Ok(entries) => Ok(entries),
            Err(err) => {
                warn!("Discarding unreadable chat history: {}", err);
                Ok(Vec::new())
            }
        }
    }

    /// Appends an exchange, keeping only the most recent `capacity` entries.
    pub fn commit(&self, entry: HistoryEntry) -> Result<(), TraceError> {
        let mut entries = self.entries()?;
        entries.retain(|existing| existing.id != entry.id);
        entries.push(entry);
        if entries.len() > self.capacity {
            let excess = entries.len() - self.capacity;
            entries.drain(..excess);
        }
        let serialized = serde_json::to_string(&entries)
            .map_err(|err| TraceError::Storage(err.to_string()))?;
        self.store
            .put(CHAT_HISTORY_KEY, &serialized)
            .map_err(storage_error)?;
        info!("Saved chat history entry ({} total)", entries.len());
        Ok(())
    }

    /// Writes the full answer under `complete_message_{message_id}` and prunes
    /// older backups.
    pub fn backup_answer(&self, message_id: &str, answer: &str) -> Result<(), TraceError> {
        let key = format!("{}{}", COMPLETE_MESSAGE_PREFIX, message_id);
        self.store.put(&key, answer).map_err(storage_error)?;
        debug!("Backed up {} characters under '{}'", answer.len(), key);
        self.prune_backups()?;
        Ok(())
    }

    /// Extra copy of an answer that carries product content, keyed by the
    /// time it was written.
    pub fn backup_product(&self, answer: &str, at: DateTime<Utc>) -> Result<String, TraceError> {
        let key = format!("{}{}", PRODUCT_MESSAGE_PREFIX, at.timestamp_millis());
        self.store.put(&key, answer).map_err(storage_error)?;
        debug!("Product content detected, backed up under '{}'", key);
        self.prune_backups()?;
        Ok(key)
    }

    pub fn backup(&self, message_id: &str) -> Result<Option<String>, TraceError> {
        self.store
            .get(&format!("{}{}", COMPLETE_MESSAGE_PREFIX, message_id))
            .map_err(storage_error)
    }

    /// Longest stored version of a message.
    ///
    /// Candidates are the message's own backup, any answer backup whose text
    /// mentions the id, and product backups written since the message began
    /// (`message_id` is the submission time in milliseconds).
    pub fn longest_version(&self, message_id: &str) -> Result<Option<String>, TraceError> {
        if message_id.is_empty() {
            return Ok(None);
        }
        let started: Option<i64> = message_id.parse().ok();
        let mut longest: Option<String> = None;
        for key in self.store.keys().map_err(storage_error)? {
            let own_key = is_answer_backup(&key) && key.ends_with(message_id);
            let product_since_start = key.starts_with(PRODUCT_MESSAGE_PREFIX)
                && started.map_or(false, |started| {
                    backup_ordinal(&key, PRODUCT_MESSAGE_PREFIX) >= started
                });
            if !own_key && !product_since_start && !key.starts_with(COMPLETE_MESSAGE_PREFIX) {
                continue;
            }
            let content = match self.store.get(&key).map_err(storage_error)? {
                Some(content) => content,
                None => continue,
            };
            if !own_key && !product_since_start && !content.contains(message_id) {
                continue;
            }
            if longest.as_ref().map_or(true, |best| content.len() > best.len()) {
                longest = Some(content);
            }
        }
        Ok(longest)
    }

    /// Replaces every history response that has a backup at least
    /// [`RECOVERY_MIN_GAIN`] characters longer. Returns how many were repaired.
    pub fn recover_entries(&self) -> Result<usize, TraceError> {
        let mut entries = self.entries()?;
        let mut recovered = 0;
        for entry in entries.iter_mut() {
            if let Some(longer) = self.longest_version(&entry.id)? {
                if longer.len() > entry.response.len() + RECOVERY_MIN_GAIN {
                    info!(
                        "Recovered message {} ({} characters longer)",
                        entry.id,
                        longer.len() - entry.response.len()
                    );
                    entry.response = longer;
                    recovered += 1;
                }
            }
        }
        if recovered > 0 {
            let serialized = serde_json::to_string(&entries)
                .map_err(|err| TraceError::Storage(err.to_string()))?;
            self.store
                .put(CHAT_HISTORY_KEY, &serialized)
                .map_err(storage_error)?;
        }
        Ok(recovered)
    }

    /// Copies every answer backup into one `message_backup_{millis}` record.
    /// Returns the snapshot key, or `None` when there is nothing to save.
    pub fn snapshot(&self, at: DateTime<Utc>) -> Result<Option<String>, TraceError> {
        let mut saved = BTreeMap::new();
        for key in self.store.keys().map_err(storage_error)? {
            if !is_answer_backup(&key) {
                continue;
            }
            if let Some(content) = self.store.get(&key).map_err(storage_error)? {
                saved.insert(key, content);
            }
        }
        if saved.is_empty() {
            debug!("No answer backups to snapshot");
            return Ok(None);
        }
        let key = format!("{}{}", MESSAGE_SNAPSHOT_PREFIX, at.timestamp_millis());
        let serialized =
            serde_json::to_string(&saved).map_err(|err| TraceError::Storage(err.to_string()))?;
        self.store.put(&key, &serialized).map_err(storage_error)?;
        info!("Saved snapshot of {} answer backups under '{}'", saved.len(), key);
        self.prune_backups()?;
        Ok(Some(key))
    }

    /// Writes a snapshot's backups back into the store. With no key the
    /// newest snapshot is used. Returns the number of backups restored.
    pub fn restore_snapshot(&self, snapshot_key: Option<&str>) -> Result<usize, TraceError> {
        let key = match snapshot_key {
            Some(key) => key.to_string(),
            None => {
                let newest = self
                    .store
                    .keys()
                    .map_err(storage_error)?
                    .into_iter()
                    .filter(|key| key.starts_with(MESSAGE_SNAPSHOT_PREFIX))
                    .max_by_key(|key| backup_ordinal(key, MESSAGE_SNAPSHOT_PREFIX));
                match newest {
                    Some(key) => key,
                    None => {
                        warn!("No answer snapshots to restore");
                        return Ok(0);
                    }
                }
            }
        };
        let raw = match self.store.get(&key).map_err(storage_error)? {
            Some(raw) => raw,
            None => {
                warn!("No answer snapshot under '{}'", key);
                return Ok(0);
            }
        };
        let saved: BTreeMap<String, String> = serde_json::from_str(&raw)
            .map_err(|err| TraceError::Storage(format!("unreadable snapshot '{}': {}", key, err)))?;
        for (backup_key, content) in &saved {
            self.store.put(backup_key, content).map_err(storage_error)?;
        }
        info!("Restored {} answer backups from '{}'", saved.len(), key);
        Ok(saved.len())
    }

    /// Keeps the newest `capacity` product backups and snapshots, and
    /// `2 × capacity` answer backups. Returns the number of keys removed.
    pub fn prune_backups(&self) -> Result<usize, TraceError> {
        let keys = self.store.keys().map_err(storage_error)?;
        let mut removed = 0;
        for (prefix, keep) in [
            (PRODUCT_MESSAGE_PREFIX, self.capacity),
            (MESSAGE_SNAPSHOT_PREFIX, self.capacity),
            (COMPLETE_MESSAGE_PREFIX, self.capacity * 2),
        ] {
            let mut matching: Vec<&String> =
                keys.iter().filter(|key| key.starts_with(prefix)).collect();
            if matching.len() <= keep {
                continue;
            }
            matching.sort_by_key(|key| std::cmp::Reverse(backup_ordinal(key, prefix)));
            for key in matching.into_iter().skip(keep) {
                if self.store.delete(key).map_err(storage_error)? {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!("Removed {} old message backups", removed);
        }
        Ok(removed)
    }

    /// Removes the history record, every backup and every snapshot.
    pub fn clear_all(&self) -> Result<usize, TraceError> {
        let keys = self.store.keys().map_err(storage_error)?;
        let mut removed = 0;
        for key in keys.iter().filter(|key| {
            key.as_str() == CHAT_HISTORY_KEY
                || key.starts_with(COMPLETE_MESSAGE_PREFIX)
                || key.starts_with(PRODUCT_MESSAGE_PREFIX)
                || key.starts_with(MESSAGE_SNAPSHOT_PREFIX)
        }) {
            if self.store.delete(key).map_err(storage_error)? {
                removed += 1;
            }
        }
        info!("Cleared {} chat storage keys", removed);
        Ok(removed)
    }
}
