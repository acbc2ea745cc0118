//! Inbound message contract.
//!
//! The transport adapter (WebSocket, SSE, a test harness) owns connection
//! handling and pushes [`StreamMessage`]s onto a bounded `tokio::sync::mpsc`
//! channel. Each envelope may carry the answer text so far, a trace
//! payload, or both.
//!
//! ```rust
//! use traceweave::ingest::Envelope;
//!
//! let envelope = Envelope::from_json(r#"{"assistantText":"Hi","isFinal":true}"#).unwrap();
//! assert_eq!(envelope.assistant_text.as_deref(), Some("Hi"));
//! assert!(envelope.is_final);
//! ```

use crate::traceweave::classifier::parse_trace_json;
use crate::traceweave::error::TraceError;
use crate::traceweave::model::TraceEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// One inbound frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// The whole answer so far; replaces any earlier text for the turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_text: Option<String>,
    /// Trace payload, as a JSON string or an inline object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_json: Option<Value>,
    /// Explicit end-of-turn tag.
    #[serde(default)]
    pub is_final: bool,
    /// Agent identity asserted by the transport.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "collaboratorName")]
    pub agent_identity: Option<String>,
}

impl Envelope {
    pub fn from_json(frame: &str) -> Result<Self, TraceError> {
        serde_json::from_str(frame).map_err(|err| TraceError::MalformedTraceShape(err.to_string()))
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            assistant_text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_trace(trace: Value) -> Self {
        Self {
            trace_json: Some(trace),
            ..Self::default()
        }
    }

    pub fn final_tag(mut self) -> Self {
        self.is_final = true;
        self
    }

    /// Trace payload as a [`TraceEvent`].
    ///
    /// String payloads are parsed with the brace-span fallback; a string that
    /// still fails to parse is kept as a JSON string so it classifies as
    /// `Unknown` rather than being dropped.
    pub fn trace_event(&self) -> Option<TraceEvent> {
        let payload = match self.trace_json.as_ref()? {
            Value::String(raw) => match parse_trace_json(raw) {
                Some(parsed) => parsed,
                None => Value::String(raw.clone()),
            },
            Value::Null => return None,
            other => other.clone(),
        };
        let event = TraceEvent::new(payload);
        Some(match self.agent_identity.as_deref().map(str::trim) {
            Some(identity) if !identity.is_empty() => event.with_agent_identity(identity),
            _ => event,
        })
    }
}

/// What the transport adapter delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Envelope(Envelope),
    /// A transport-level failure; the turn continues.
    TransportError(String),
    /// The adapter has closed the stream.
    Closed,
}

pub type TraceSender = mpsc::Sender<StreamMessage>;
pub type TraceReceiver = mpsc::Receiver<StreamMessage>;

/// Bounded channel between the transport adapter and the engine.
pub fn trace_channel(buffer: usize) -> (TraceSender, TraceReceiver) {
    mpsc::channel(buffer)
}
