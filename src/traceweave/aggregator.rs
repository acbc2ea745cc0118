//! Trace reconciliation.
//!
//! [`reconcile`] folds one [`ClassifiedTrace`] into a [`Session`], creating the
//! agent's [`TraceGroup`] on first sight and placing the event as a top-level
//! [`Task`] or as a [`SubTask`] of the input step it answers.
//!
//! The transport redelivers events freely, so reconciliation is idempotent:
//! a task is identified by its *normalized* title (the `Step n[.m] - ` prefix
//! and any `(1.23s)` / `(3 steps)` suffix removed) together with its raw JSON.
//! Replaying an event merges into the existing entry instead of appending.
//!
//! ```text
//! ActionGroupInput  ─► Task    "Step 1 - Action Group Tool (0.80s)"
//!                        └─ SubTask "Step 1.1 - Action Group Input (0.80s)"   (placeholder)
//! ActionGroupOutput ─►   └─ SubTask "Step 1.1 - Action Group Response (1.90s)" (replaces it)
//! ```
//!
//! # Example
//!
//! ```rust
//! use traceweave::aggregator::reconcile;
//! use traceweave::classifier::classify;
//! use traceweave::model::Session;
//! use traceweave::TraceweaveConfig;
//! use chrono::Utc;
//! use serde_json::json;
//!
//! let config = TraceweaveConfig::default();
//! let now = Utc::now();
//! let trace = classify(&json!({
//!     "collaboratorName": "Supervisor",
//!     "trace": { "orchestrationTrace": { "rationale": { "text": "because X" } } }
//! }));
//!
//! let once = reconcile(Session::new(now), &trace, &config, now);
//! let twice = reconcile(once.clone(), &trace, &config, now);
//! assert_eq!(once, twice);
//! assert_eq!(once.groups[0].tasks.len(), 1);
//! ```

use crate::traceweave::config::TraceweaveConfig;
use crate::traceweave::model::{
    elapsed_secs, ClassifiedTrace, Session, SubTask, Task, TraceGroup, TraceKind,
};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;

lazy_static! {
    static ref TIMING_SUFFIX: Regex = Regex::new(
        r"\s*\((?:\d+(?:\.\d+)?s|\d+(?:\.\d+)? seconds|\d+ steps?|\d+(?:\.\d+)?s, \d+ steps?)\)\s*$"
    )
    .expect("valid regex");
    static ref STEP_PREFIX: Regex = Regex::new(r"^Step \d+(?:\.\d+)? - ").expect("valid regex");
}

/// What a call to [`apply`] did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// A group was created for an event that adds no task of its own.
    GroupCreated,
    /// A new top-level task was appended.
    TaskAdded,
    /// A response was attached beneath its input step.
    SubTaskAttached,
    /// The event matched an existing entry and was merged into it.
    Merged,
    /// The event was dropped (completed group or a resource cap).
    Ignored,
}

/// Outcome of reconciling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// Identity of the group the event was resolved to.
    pub agent_identity: String,
    pub change: Change,
}

/// Strips the step prefix and every trailing timing or step-count suffix.
///
/// ```rust
/// use traceweave::aggregator::normalize_title;
///
/// assert_eq!(normalize_title("Step 2.1 - Model Response (3.14s)"), "Model Response");
/// assert_eq!(normalize_title("Supervisor (1.50s, 3 steps)"), "Supervisor");
/// assert_eq!(normalize_title("Rationale (2.00 seconds)"), "Rationale");
/// ```
pub fn normalize_title(title: &str) -> String {
    let mut stripped = strip_timing(title);
    stripped = STEP_PREFIX.replace(&stripped, "").into_owned();
    stripped.trim().to_string()
}

fn strip_timing(title: &str) -> String {
    let mut current = title.trim_end().to_string();
    loop {
        let next = TIMING_SUFFIX.replace(&current, "").into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

fn retimed(title: &str, elapsed: f64) -> String {
    format!("{} ({:.2}s)", strip_timing(title), elapsed)
}

fn same_raw(existing: &Option<String>, incoming: &str) -> bool {
    match existing.as_deref() {
        None | Some("") => true,
        Some(raw) => incoming.is_empty() || raw == incoming,
    }
}

fn fill_if_empty(slot: &mut Option<String>, value: &str) {
    let empty = slot.as_deref().map_or(true, str::is_empty);
    if empty && !value.is_empty() {
        *slot = Some(value.to_string());
    }
}

/// Folds `trace` into `session` and returns the updated session.
///
/// Reconciling the same event twice at the same instant yields the same
/// session as reconciling it once.
pub fn reconcile(
    mut session: Session,
    trace: &ClassifiedTrace,
    config: &TraceweaveConfig,
    now: DateTime<Utc>,
) -> Session {
    apply(&mut session, trace, config, now);
    session
}

/// In-place form of [`reconcile`], reporting what changed.
pub fn apply(
    session: &mut Session,
    trace: &ClassifiedTrace,
    config: &TraceweaveConfig,
    now: DateTime<Utc>,
) -> Applied {
    let agent_identity = resolve_identity(session, trace);
    let ignored = Applied {
        agent_identity: agent_identity.clone(),
        change: Change::Ignored,
    };

    let (index, created) = match session
        .groups
        .iter()
        .position(|group| group.agent_identity == agent_identity)
    {
        Some(index) => (index, false),
        None => {
            if session.groups.len() >= config.max_groups_per_session {
                warn!(
                    "Dropping trace from '{}': session already holds {} trace groups",
                    agent_identity, config.max_groups_per_session
                );
                return ignored;
            }
            let id = format!("{}:{}", session.id, agent_identity);
            let display_title = config.display_title(&agent_identity);
            info!("Trace group '{}' started", display_title);
            session
                .groups
                .push(TraceGroup::new(id, agent_identity.clone(), display_title, now));
            (session.groups.len() - 1, true)
        }
    };

    let group = &mut session.groups[index];
    if group.is_complete {
        debug!(
            "Ignoring {:?} trace for completed group '{}'",
            trace.kind, group.agent_identity
        );
        return ignored;
    }

    let elapsed = elapsed_secs(group.start_time, now);
    let change = if trace.kind == TraceKind::Unknown {
        if created {
            Change::GroupCreated
        } else {
            Change::Ignored
        }
    } else if trace.is_response() {
        attach_response(group, trace, config, elapsed, now)
    } else {
        add_task(group, trace, config, elapsed, now)
    };

    if change != Change::Ignored {
        group.last_update_time = now;
        group.refresh_dropdown_title(now);
    }
    Applied {
        agent_identity,
        change,
    }
}

/// Exact agent name when known; otherwise the first identity already in the
/// session that contains the agent hint, compared case-insensitively.
fn resolve_identity(session: &Session, trace: &ClassifiedTrace) -> String {
    let name = trace.agent_name.trim();
    if !name.is_empty() && !name.eq_ignore_ascii_case("unknown") {
        return name.to_string();
    }

    let hint = trace
        .agent_hint
        .as_deref()
        .map(str::trim)
        .filter(|hint| !hint.is_empty());
    match hint {
        Some(hint) => {
            let needle = hint.to_lowercase();
            session
                .groups
                .iter()
                .map(|group| &group.agent_identity)
                .find(|identity| identity.to_lowercase().contains(&needle))
                .cloned()
                .unwrap_or_else(|| hint.to_string())
        }
        None => "Unknown".to_string(),
    }
}

fn merge_task(task: &mut Task, trace: &ClassifiedTrace, elapsed: f64, now: DateTime<Utc>) {
    task.title = retimed(&task.title, elapsed);
    task.timestamp = now;
    fill_if_empty(&mut task.content, &trace.display_text);
    fill_if_empty(&mut task.raw_json, &trace.raw_json);
}

fn task_label(trace: &ClassifiedTrace) -> String {
    match (&trace.kind, &trace.collaborator) {
        (TraceKind::CollaboratorInvocation, Some(collaborator)) => {
            format!("{} - {}", trace.kind.label(), collaborator)
        }
        (kind, _) => kind.label().to_string(),
    }
}

fn add_task(
    group: &mut TraceGroup,
    trace: &ClassifiedTrace,
    config: &TraceweaveConfig,
    elapsed: f64,
    now: DateTime<Utc>,
) -> Change {
    let label = task_label(trace);

    if let Some(existing) = group.tasks.iter_mut().find(|task| {
        task.kind == trace.kind
            && normalize_title(&task.title) == label
            && same_raw(&task.raw_json, &trace.raw_json)
    }) {
        merge_task(existing, trace, elapsed, now);
        return Change::Merged;
    }

    if group.tasks.len() >= config.max_tasks_per_group {
        warn!(
            "Dropping {:?} trace: group '{}' already holds {} tasks",
            trace.kind, group.agent_identity, config.max_tasks_per_group
        );
        return Change::Ignored;
    }

    let (step_number, title) = if trace.kind.is_unstepped() {
        (0, format!("{} ({:.2}s)", label, elapsed))
    } else {
        let step = group.step_count() as u32 + 1;
        (step, format!("Step {} - {} ({:.2}s)", step, label, elapsed))
    };

    let sub_tasks = match trace.kind.input_label() {
        Some(input_label) => vec![SubTask {
            title: format!("Step {}.1 - {} ({:.2}s)", step_number, input_label, elapsed),
            content: None,
            raw_json: None,
            timestamp: now,
        }],
        None => Vec::new(),
    };

    group.tasks.push(Task {
        step_number,
        kind: trace.kind,
        title,
        content: Some(trace.display_text.clone()),
        raw_json: Some(trace.raw_json.clone()),
        timestamp: now,
        sub_tasks,
    });
    Change::TaskAdded
}

fn attach_response(
    group: &mut TraceGroup,
    trace: &ClassifiedTrace,
    config: &TraceweaveConfig,
    elapsed: f64,
    now: DateTime<Utc>,
) -> Change {
    let input_kind = trace.kind.answers().unwrap_or(TraceKind::CollaboratorInvocation);
    let response_label = input_kind.response_label();

    // Redelivery of a response that is already attached somewhere, either
    // beneath its input or as an orphan that arrived before the input did.
    for task in group.tasks.iter_mut() {
        if task.kind == trace.kind && task.raw_json.as_deref() == Some(trace.raw_json.as_str()) {
            merge_task(task, trace, elapsed, now);
            return Change::Merged;
        }
        if let Some(sub) = task.sub_tasks.iter_mut().find(|sub| {
            sub.raw_json.as_deref() == Some(trace.raw_json.as_str())
                && normalize_title(&sub.title) == response_label
        }) {
            sub.title = retimed(&sub.title, elapsed);
            sub.timestamp = now;
            fill_if_empty(&mut sub.content, &trace.display_text);
            return Change::Merged;
        }
    }

    if let Some(parent) = group
        .tasks
        .iter_mut()
        .rev()
        .find(|task| task.kind == input_kind && task.is_awaiting_response())
    {
        let step = parent.step_number;
        let placeholder = parent.sub_tasks.iter_mut().find(|sub| {
            sub.content.is_none() && Some(normalize_title(&sub.title).as_str()) == input_kind.input_label()
        });
        match placeholder {
            Some(sub) => {
                sub.title = format!("Step {}.1 - {} ({:.2}s)", step, response_label, elapsed);
                sub.content = Some(trace.display_text.clone());
                sub.raw_json = Some(trace.raw_json.clone());
                sub.timestamp = now;
            }
            None => {
                let minor = parent.sub_tasks.len() + 1;
                parent.sub_tasks.push(SubTask {
                    title: format!("Step {}.{} - {} ({:.2}s)", step, minor, response_label, elapsed),
                    content: Some(trace.display_text.clone()),
                    raw_json: Some(trace.raw_json.clone()),
                    timestamp: now,
                });
            }
        }
        return Change::SubTaskAttached;
    }

    // No open parent: keep the response as its own top-level task.
    let label = if trace.is_observation {
        "Observation".to_string()
    } else {
        trace.kind.label().to_string()
    };
    if let Some(existing) = group.tasks.iter_mut().find(|task| {
        task.kind == trace.kind
            && normalize_title(&task.title) == label
            && same_raw(&task.raw_json, &trace.raw_json)
    }) {
        merge_task(existing, trace, elapsed, now);
        return Change::Merged;
    }

    if group.tasks.len() >= config.max_tasks_per_group {
        warn!(
            "Dropping orphan {:?} trace: group '{}' already holds {} tasks",
            trace.kind, group.agent_identity, config.max_tasks_per_group
        );
        return Change::Ignored;
    }

    let (step_number, title) = if trace.is_observation {
        (0, format!("{} ({:.2}s)", label, elapsed))
    } else {
        let step = group.step_count() as u32 + 1;
        (step, format!("Step {} - {} ({:.2}s)", step, label, elapsed))
    };
    group.tasks.push(Task {
        step_number,
        kind: trace.kind,
        title,
        content: Some(trace.display_text.clone()),
        raw_json: Some(trace.raw_json.clone()),
        timestamp: now,
        sub_tasks: Vec::new(),
    });
    Change::TaskAdded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_title_strips_combined_suffix() {
        assert_eq!(normalize_title("Agent Invocation - Billing (0.42s)"), "Agent Invocation - Billing");
        assert_eq!(normalize_title("Step 12 - Routing Classifier (10.00s)"), "Routing Classifier");
        assert_eq!(normalize_title("Final Response"), "Final Response");
    }

    #[test]
    fn test_same_raw_accepts_empty_sides() {
        assert!(same_raw(&None, "{}"));
        assert!(same_raw(&Some("{}".into()), ""));
        assert!(same_raw(&Some("{}".into()), "{}"));
        assert!(!same_raw(&Some("{\"a\":1}".into()), "{}"));
    }
}
