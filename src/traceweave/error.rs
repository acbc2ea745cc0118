//! Error taxonomy for trace reconciliation and turn handling.
//!
//! Only two of these ever reach a caller: [`TraceError::StreamTransport`] and
//! [`TraceError::TurnTimedOut`]. The shape and embedded-JSON variants are
//! recovered where they occur (the classifier falls back to `Unknown` or to the
//! raw string) and exist so the recovery can be logged with a uniform message.
//!
//! # Examples
//!
//! ```
//! use traceweave::error::TraceError;
//!
//! let err = TraceError::StreamTransport("socket reset".into());
//! assert_eq!(err.to_string(), "Stream transport error: socket reset");
//! ```

use std::error::Error;
use std::fmt;

/// Errors raised while ingesting and reconciling a turn's trace stream.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceError {
    /// A payload matched none of the known trace shapes, or was not JSON.
    MalformedTraceShape(String),

    /// A JSON document embedded as a string inside a payload failed to parse.
    EmbeddedJsonParse(String),

    /// The inbound channel reported an error or closed unexpectedly.
    StreamTransport(String),

    /// No completion was detected before the hard inactivity timeout.
    TurnTimedOut {
        /// Seconds of inactivity that elapsed before the turn was closed.
        inactive_secs: u64,
    },

    /// The persistence collaborator rejected a read or write.
    Storage(String),
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceError::MalformedTraceShape(msg) => write!(f, "Malformed trace shape: {}", msg),
            TraceError::EmbeddedJsonParse(msg) => write!(f, "Embedded JSON parse failure: {}", msg),
            TraceError::StreamTransport(msg) => write!(f, "Stream transport error: {}", msg),
            TraceError::TurnTimedOut { inactive_secs } => write!(
                f,
                "Turn timed out after {} seconds without a complete response",
                inactive_secs
            ),
            TraceError::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl Error for TraceError {}
