//! Whole-turn completion detection.
//!
//! The stream has no end-of-turn marker, so completion is inferred from the
//! accumulated answer text. [`is_response_complete`] is the heuristic;
//! [`CompletionDetector`] carries the one piece of state it needs (the length
//! of the previous observation) and makes completion sticky for the turn.
//!
//! An envelope tagged `isFinal: true` short-circuits the heuristic through
//! [`CompletionDetector::mark_final`].
//!
//! # Example
//!
//! ```rust
//! use traceweave::completion::CompletionDetector;
//! use traceweave::TraceweaveConfig;
//!
//! let mut detector = CompletionDetector::new(TraceweaveConfig::default());
//! assert!(!detector.observe("Looking that up for you"));
//! assert!(detector.observe(
//!     "Your order shipped yesterday and should arrive on Friday. Is there anything else I can do?"
//! ));
//! ```

use crate::traceweave::config::TraceweaveConfig;
use log::debug;

/// Heuristic completion check for an accumulated answer.
///
/// `previous_len` is the character length of the prior observation, if any;
/// it drives the stability rule.
pub fn is_response_complete(
    text: &str,
    previous_len: Option<usize>,
    config: &TraceweaveConfig,
) -> bool {
    let len = text.chars().count();

    if len > config.closing_phrase_min_len
        && config
            .closing_phrases
            .iter()
            .any(|phrase| text.contains(phrase.as_str()))
    {
        return true;
    }

    if len > config.long_answer_len {
        return true;
    }

    if !config.currency_token.is_empty()
        && len > config.currency_min_len
        && text.matches(config.currency_token.as_str()).count() >= config.currency_min_count
    {
        return true;
    }

    match previous_len {
        Some(previous) => {
            len > config.stability_min_len
                && (len as i64 - previous as i64).unsigned_abs() < config.stability_delta as u64
        }
        None => false,
    }
}

/// Sticky completion state for one turn.
#[derive(Debug, Clone)]
pub struct CompletionDetector {
    config: TraceweaveConfig,
    previous_len: Option<usize>,
    complete: bool,
}

impl CompletionDetector {
    pub fn new(config: TraceweaveConfig) -> Self {
        Self {
            config,
            previous_len: None,
            complete: false,
        }
    }

    /// Feeds the current accumulated answer. Returns `true` once the turn is
    /// complete, and keeps returning `true` until [`reset`](Self::reset).
    pub fn observe(&mut self, text: &str) -> bool {
        if self.complete {
            return true;
        }
        let complete = is_response_complete(text, self.previous_len, &self.config);
        self.previous_len = Some(text.chars().count());
        if complete {
            debug!("Answer judged complete at {} characters", text.chars().count());
            self.complete = true;
        }
        complete
    }

    /// Completes the turn on an explicit final tag.
    pub fn mark_final(&mut self) {
        self.complete = true;
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Clears state for a new turn.
    pub fn reset(&mut self) {
        self.previous_len = None;
        self.complete = false;
    }
}
