//! Turn event system.
//!
//! Provides the callback layer through which the render collaborator observes
//! a turn. Implement [`EventHandler`] to receive:
//!
//! - **Timeline updates**: a snapshot of every trace group after each change
//! - **Node activation**: which agent node to animate
//! - **Input gating**: when the prompt box must be locked and unlocked
//! - **Turn lifecycle**: completion, inactivity warning, timeout, stream errors
//! - **Flow reset**: focus returned to the input, animations cleared
//!
//! The single method has a default no-op implementation, so a handler that
//! only cares about some events simply ignores the rest. The engine holds the
//! handler as `Arc<dyn EventHandler>`.
//!
//! # Example
//!
//! ```rust,no_run
//! use traceweave::event::{EventHandler, TurnEvent};
//! use async_trait::async_trait;
//!
//! struct ConsoleHandler;
//!
//! #[async_trait]
//! impl EventHandler for ConsoleHandler {
//!     async fn on_turn_event(&self, event: &TurnEvent) {
//!         match event {
//!             TurnEvent::GroupsUpdated { groups } => {
//!                 for group in groups {
//!                     println!("{}", group.dropdown_title);
//!                 }
//!             }
//!             TurnEvent::TurnTimedOut { inactive_secs } => {
//!                 eprintln!("gave up after {}s", inactive_secs);
//!             }
//!             _ => {}
//!         }
//!     }
//! }
//! ```

use crate::traceweave::model::TraceGroup;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Events emitted by the [`TurnEngine`](crate::engine::TurnEngine).
///
/// # Event flow (typical turn)
///
/// ```text
/// InputLocked
///   └─ NodeActivated { "Supervisor" }
///   └─ GroupsUpdated            (after every reconciled trace and tick)
///   └─ NodeActivated { "OrderManagement" }
///   └─ GroupsUpdated ...
/// TurnCompleted
/// InputUnlocked
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// Snapshot of the current session's trace groups, in order of first
    /// appearance.
    GroupsUpdated { groups: Vec<TraceGroup> },

    /// A trace from this agent arrived; the matching node should animate.
    NodeActivated {
        agent_name: String,
        node_id: String,
    },

    /// A prompt was submitted; input stays locked until the turn ends.
    InputLocked,

    /// The turn ended, by completion, timeout or focus reset.
    InputUnlocked,

    /// No inbound activity for the soft inactivity period.
    InactivityWarning { inactive_secs: u64 },

    /// The hard inactivity period elapsed; the inbound channel was closed.
    TurnTimedOut { inactive_secs: u64 },

    /// Non-fatal transport error. The turn continues.
    StreamError { message: String },

    /// The answer was judged complete.
    TurnCompleted { response: String },

    /// Flow animations were reset after the input regained focus.
    FlowReset,
}

/// Receives [`TurnEvent`]s from the engine.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Called for every event. The default implementation is a no-op.
    async fn on_turn_event(&self, _event: &TurnEvent) {}
}

/// Handler that drops every event.
pub struct NoopEventHandler;

#[async_trait]
impl EventHandler for NoopEventHandler {}

/// Handler that records every event, for tests and replay tooling.
#[derive(Default, Clone)]
pub struct RecordingEventHandler {
    events: Arc<Mutex<Vec<TurnEvent>>>,
}

impl RecordingEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far, in order.
    pub fn events(&self) -> Vec<TurnEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl EventHandler for RecordingEventHandler {
    async fn on_turn_event(&self, event: &TurnEvent) {
        let mut events = match self.events.lock() {
            Ok(events) => events,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.push(event.clone());
    }
}
