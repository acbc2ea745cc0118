//! # traceweave
//!
//! traceweave reconstructs a live, per-agent timeline from the trace stream a
//! multi-agent orchestration backend emits while it answers a single user
//! query. The stream is unordered, redelivered, loosely schematized and has no
//! end-of-turn marker; the crate turns it into a stable, idempotently-merged
//! view and decides when the answer is finished.
//!
//! The crate provides layered building blocks:
//!
//! * **Classification**: [`classifier::classify`] maps one nested trace payload
//!   to a [`model::ClassifiedTrace`] through an ordered table of shape rules
//! * **Reconciliation**: [`aggregator::reconcile`] folds classified traces into
//!   a [`model::Session`] of per-agent [`model::TraceGroup`]s, merging
//!   redeliveries and attaching responses beneath the steps they answer
//! * **Timing**: [`ticker::TraceTicker`] keeps elapsed-time labels live and
//!   completes groups one way, `Active -> Complete`
//! * **Turn completion**: [`completion::CompletionDetector`] infers the end of
//!   an answer, honouring an explicit `isFinal` tag when the backend sends one;
//!   [`watchdog::InactivityWatchdog`] closes turns that go silent
//! * **Persistence**: [`history::ChatHistory`] keeps a bounded chat history and
//!   answer backups behind the [`persistence::KeyValueStore`] trait
//! * **Orchestration**: [`TurnEngine`] drives everything from one cooperative
//!   `tokio::select!` loop and reports to an [`event::EventHandler`]
//!
//! ## Classify and reconcile
//!
//! ```rust
//! use chrono::Utc;
//! use serde_json::json;
//! use traceweave::aggregator::reconcile;
//! use traceweave::classifier::classify;
//! use traceweave::model::Session;
//! use traceweave::TraceweaveConfig;
//!
//! let config = TraceweaveConfig::default();
//! let now = Utc::now();
//!
//! let input = classify(&json!({
//!     "collaboratorName": "OrderManagement",
//!     "trace": { "orchestrationTrace": { "invocationInput": {
//!         "actionGroupInvocationInput": { "actionGroupName": "orders", "function": "lookup" }
//!     }}}
//! }));
//! let output = classify(&json!({
//!     "collaboratorName": "OrderManagement",
//!     "trace": { "orchestrationTrace": { "observation": {
//!         "actionGroupInvocationOutput": { "text": "shipped" }
//!     }}}
//! }));
//!
//! let session = reconcile(Session::new(now), &input, &config, now);
//! let session = reconcile(session, &output, &config, now);
//!
//! let group = &session.groups[0];
//! assert_eq!(group.display_title, "OrderManagement - Claude 3.5 Haiku");
//! assert_eq!(group.tasks.len(), 1);
//! assert_eq!(group.tasks[0].sub_tasks.len(), 1);
//! assert!(group.tasks[0].sub_tasks[0].title.starts_with("Step 1.1 - Action Group Response"));
//! ```
//!
//! ## Logging
//!
//! All modules log through the [`log`] facade: `debug!` per classified event,
//! `info!` for session and group lifecycle, `warn!` for caps, timeouts and
//! transport errors. Call [`init_logger`] to route them to `env_logger`.

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Applications embedding traceweave can opt in to `RUST_LOG` driven
/// diagnostics without choosing a logging backend upfront.
///
/// ```rust
/// traceweave::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `traceweave` module.
pub mod traceweave;

// Re-exporting key items for easier external access.
pub use traceweave::aggregator;
pub use traceweave::classifier;
pub use traceweave::completion;
pub use traceweave::config;
pub use traceweave::config::TraceweaveConfig;
pub use traceweave::engine;
pub use traceweave::engine::{TurnEngine, UserAction};
pub use traceweave::error;
pub use traceweave::error::TraceError;
pub use traceweave::event;
pub use traceweave::event::{EventHandler, TurnEvent};
pub use traceweave::history;
pub use traceweave::ingest;
pub use traceweave::ingest::{Envelope, StreamMessage};
pub use traceweave::model;
pub use traceweave::model::{ClassifiedTrace, Session, SubTask, Task, TraceGroup, TraceKind};
pub use traceweave::nodes;
pub use traceweave::persistence;
pub use traceweave::persistence::{KeyValueStore, MemoryStore};
pub use traceweave::ticker;
pub use traceweave::trace_cache;
pub use traceweave::watchdog;
