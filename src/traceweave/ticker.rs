//! Elapsed-time ticker and per-group completion.
//!
//! Each trace group moves one way, `Active -> Complete`. While any group is
//! active the engine calls [`TraceTicker::tick`] once per
//! [`tick_interval`](crate::TraceweaveConfig::tick_interval); each tick
//! refreshes the live dropdown titles and completes groups whose top-level
//! tasks look terminal. The ticker stops itself when every group is complete
//! or after `max_ticks` ticks, whichever comes first.

use crate::traceweave::config::TraceweaveConfig;
use crate::traceweave::model::{Session, TraceGroup, TraceKind};
use chrono::{DateTime, Utc};
use log::{info, warn};

/// Result of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The ticker is not running; nothing was touched.
    Idle,
    /// Some group is still active.
    Continue,
    /// Every group is complete; the ticker has stopped.
    AllComplete,
    /// The tick cap was hit; the ticker has stopped.
    CapReached,
}

/// Self-terminating 1 Hz ticker for the current session.
#[derive(Debug, Clone)]
pub struct TraceTicker {
    ticks: u32,
    max_ticks: u32,
    active: bool,
}

impl TraceTicker {
    pub fn new(max_ticks: u32) -> Self {
        Self {
            ticks: 0,
            max_ticks,
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    /// Starts the ticker with a fresh count. No effect while already running.
    pub fn arm(&mut self) {
        if !self.active {
            self.ticks = 0;
            self.active = true;
        }
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    /// Advances one tick over `session`.
    ///
    /// Completed groups are never modified: their tasks, `final_elapsed_time`
    /// and dropdown title stay exactly as they were when they completed.
    pub fn tick(
        &mut self,
        session: &mut Session,
        config: &TraceweaveConfig,
        now: DateTime<Utc>,
    ) -> TickOutcome {
        if !self.active {
            return TickOutcome::Idle;
        }
        self.ticks += 1;

        for group in session.groups.iter_mut().filter(|group| !group.is_complete) {
            if group_is_terminal(group, config) {
                complete_group(group, now);
            } else {
                group.refresh_dropdown_title(now);
            }
        }

        if session.all_complete() {
            self.active = false;
            TickOutcome::AllComplete
        } else if self.ticks >= self.max_ticks {
            warn!(
                "Ticker stopped after {} ticks with {} group(s) still active",
                self.ticks,
                session.groups.iter().filter(|group| !group.is_complete).count()
            );
            self.active = false;
            TickOutcome::CapReached
        } else {
            TickOutcome::Continue
        }
    }
}

/// Freezes a group. The final elapsed time is captured before the flag flips.
pub fn complete_group(group: &mut TraceGroup, now: DateTime<Utc>) {
    if group.is_complete {
        return;
    }
    let final_secs = group.elapsed_secs(now);
    group.final_elapsed_time = Some(final_secs);
    group.is_complete = true;
    group.refresh_dropdown_title(now);
    info!("Trace group '{}' completed in {:.2}s", group.display_title, final_secs);
}

/// True when any top-level task is a final response or its content reads as
/// a finished answer.
///
/// Only top-level task content is checked, and request-side tasks (model
/// prompts, tool and lookup requests, routing prompts) are skipped.
pub fn group_is_terminal(group: &TraceGroup, config: &TraceweaveConfig) -> bool {
    group.tasks.iter().any(|task| {
        if task.kind == TraceKind::FinalResponse {
            return true;
        }
        let request_side =
            task.kind.input_label().is_some() || task.kind == TraceKind::RoutingDecision;
        !request_side
            && task
                .content
                .as_deref()
                .map_or(false, |content| is_terminal_content(content, config))
    })
}

/// Terminal-marker heuristic for a single piece of task content.
pub fn is_terminal_content(content: &str, config: &TraceweaveConfig) -> bool {
    if config
        .group_terminal_phrases
        .iter()
        .any(|phrase| content.contains(phrase.as_str()))
    {
        return true;
    }
    let len = content.chars().count();
    if len > config.group_terminal_len {
        return true;
    }
    len > config.group_currency_min_len
        && !config.currency_token.is_empty()
        && content.matches(config.currency_token.as_str()).count() >= config.currency_min_count
}
