//! Per-node cache of reconciled trace groups.
//!
//! The render layer looks traces up by the node an agent is drawn as, not by
//! agent name, and expects them to survive a reload of the chat surface. The
//! cache keeps one JSON document under [`TRACE_CACHE_KEY`]:
//!
//! ```text
//! {
//!   "order-mgmt-agent": {
//!     "sessionId": "…",
//!     "lastUpdated": "…",
//!     "traces": { "<group id>": { "traceGroup": {…}, "lastUpdated": "…", "isComplete": false } }
//!   }
//! }
//! ```
//!
//! A node entry belongs to one session. Storing a group from a different
//! session replaces the node's entry rather than mixing the two.

use crate::traceweave::error::TraceError;
use crate::traceweave::model::TraceGroup;
use crate::traceweave::persistence::KeyValueStore;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub const TRACE_CACHE_KEY: &str = "agent-trace-cache";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedTrace {
    trace_group: TraceGroup,
    last_updated: DateTime<Utc>,
    is_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeTraces {
    session_id: Option<String>,
    last_updated: DateTime<Utc>,
    traces: BTreeMap<String, CachedTrace>,
}

type CacheDocument = HashMap<String, NodeTraces>;

fn storage_error(err: Box<dyn std::error::Error + Send + Sync>) -> TraceError {
    TraceError::Storage(err.to_string())
}

pub struct AgentTraceCache {
    store: Arc<dyn KeyValueStore>,
}

impl AgentTraceCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn load(&self) -> Result<CacheDocument, TraceError> {
        let raw = match self.store.get(TRACE_CACHE_KEY).map_err(storage_error)? {
            Some(raw) => raw,
            None => return Ok(CacheDocument::new()),
        };
        match serde_json::from_str(&raw) {
            Ok(document) => Ok(document),
            Err(err) => {
                warn!("Discarding unreadable agent trace cache: {}", err);
                Ok(CacheDocument::new())
            }
        }
    }

    fn save(&self, document: &CacheDocument) -> Result<(), TraceError> {
        let serialized =
            serde_json::to_string(document).map_err(|err| TraceError::Storage(err.to_string()))?;
        self.store
            .put(TRACE_CACHE_KEY, &serialized)
            .map_err(storage_error)
    }

    /// Stores `group` under `node_id`, replacing any earlier copy of the same
    /// group.
    pub fn store_trace(
        &self,
        node_id: &str,
        group: &TraceGroup,
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), TraceError> {
        let mut document = self.load()?;
        let session_id = session_id.map(str::to_string);
        let node = document
            .entry(node_id.to_string())
            .or_insert_with(|| NodeTraces {
                session_id: session_id.clone(),
                last_updated: now,
                traces: BTreeMap::new(),
            });
        if node.session_id != session_id {
            debug!("Replacing cached traces for node '{}' from another session", node_id);
            node.session_id = session_id;
            node.traces.clear();
        }
        node.last_updated = now;
        node.traces.insert(
            group.id.clone(),
            CachedTrace {
                trace_group: group.clone(),
                last_updated: now,
                is_complete: group.is_complete,
            },
        );
        self.save(&document)
    }

    /// A specific cached group, or the node's most recently updated one.
    pub fn trace(
        &self,
        node_id: &str,
        trace_id: Option<&str>,
    ) -> Result<Option<TraceGroup>, TraceError> {
        let document = self.load()?;
        let node = match document.get(node_id) {
            Some(node) => node,
            None => return Ok(None),
        };
        let cached = match trace_id {
            Some(trace_id) => node.traces.get(trace_id),
            None => node.traces.values().max_by_key(|cached| cached.last_updated),
        };
        Ok(cached.map(|cached| cached.trace_group.clone()))
    }

    /// Every group cached for a node, oldest update first.
    pub fn node_traces(&self, node_id: &str) -> Result<Vec<TraceGroup>, TraceError> {
        let document = self.load()?;
        let mut cached: Vec<&CachedTrace> = document
            .get(node_id)
            .map(|node| node.traces.values().collect())
            .unwrap_or_default();
        cached.sort_by_key(|cached| cached.last_updated);
        Ok(cached.into_iter().map(|c| c.trace_group.clone()).collect())
    }

    /// Node ids that currently hold cached traces.
    pub fn nodes(&self) -> Result<Vec<String>, TraceError> {
        let mut nodes: Vec<String> = self.load()?.into_keys().collect();
        nodes.sort();
        Ok(nodes)
    }

    /// Drops one node's traces. Returns whether the node had any.
    pub fn clear_node(&self, node_id: &str) -> Result<bool, TraceError> {
        let mut document = self.load()?;
        if document.remove(node_id).is_none() {
            return Ok(false);
        }
        self.save(&document)?;
        Ok(true)
    }

    /// Drops the traces cached for `session_id`, or every trace when no
    /// session is given. Returns the number of nodes cleared.
    pub fn clear_all(&self, session_id: Option<&str>) -> Result<usize, TraceError> {
        let mut document = self.load()?;
        let before = document.len();
        match session_id {
            Some(session_id) => {
                document.retain(|_, node| node.session_id.as_deref() != Some(session_id))
            }
            None => document.clear(),
        }
        let cleared = before - document.len();
        if cleared > 0 {
            self.save(&document)?;
            info!("Cleared cached traces for {} node(s)", cleared);
        }
        Ok(cleared)
    }
}
