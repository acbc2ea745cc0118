//! Reconciled trace model: sessions, per-agent trace groups, tasks and subtasks.
//!
//! ```text
//! Session (one per user query, replaced wholesale)
//!   └─ TraceGroup "OrderManagement - Claude 3.5 Haiku (4.20s, 2 steps)"
//!       ├─ Task  "Rationale (0.10s)"                         step 0
//!       ├─ Task  "Step 1 - Action Group Tool (0.80s)"        step 1
//!       │    └─ SubTask "Step 1.1 - Action Group Response (1.90s)"
//!       └─ Task  "Step 2 - Invoking Model (2.30s)"           step 2
//!            └─ SubTask "Step 2.1 - Model Input (2.30s)"
//! ```
//!
//! The types here are plain data. All mutation goes through
//! [`reconcile`](crate::aggregator::reconcile) and the
//! [`TraceTicker`](crate::ticker::TraceTicker); both treat a completed group
//! as frozen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Display text used whenever a payload carries nothing renderable.
pub const NO_CONTENT: &str = "No content available";

/// The kind of step a single trace payload describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraceKind {
    Rationale,
    ModelInput,
    ModelOutput,
    ActionGroupInput,
    ActionGroupOutput,
    KBInput,
    KBOutput,
    CollaboratorInvocation,
    RoutingDecision,
    FinalResponse,
    Unknown,
}

impl TraceKind {
    /// Label used in top-level task titles.
    pub fn label(self) -> &'static str {
        match self {
            TraceKind::Rationale => "Rationale",
            TraceKind::ModelInput => "Invoking Model",
            TraceKind::ModelOutput => "Model Response",
            TraceKind::ActionGroupInput => "Action Group Tool",
            TraceKind::ActionGroupOutput => "Action Group Response",
            TraceKind::KBInput => "Knowledge Base Tool",
            TraceKind::KBOutput => "Knowledge Base Response",
            TraceKind::CollaboratorInvocation => "Agent Invocation",
            TraceKind::RoutingDecision => "Routing Classifier",
            TraceKind::FinalResponse => "Final Response",
            TraceKind::Unknown => "Processing",
        }
    }

    /// Label of the placeholder subtask seeded under an input step, if this
    /// kind seeds one.
    pub fn input_label(self) -> Option<&'static str> {
        match self {
            TraceKind::ModelInput => Some("Model Input"),
            TraceKind::ActionGroupInput => Some("Action Group Input"),
            TraceKind::KBInput => Some("Knowledge Base Input"),
            _ => None,
        }
    }

    /// Label of the subtask a response of this input kind is attached as.
    pub fn response_label(self) -> &'static str {
        match self {
            TraceKind::ModelInput => "Model Response",
            TraceKind::ActionGroupInput => "Action Group Response",
            TraceKind::KBInput => "Knowledge Base Response",
            TraceKind::CollaboratorInvocation => "Agent Invocation Response",
            other => other.label(),
        }
    }

    /// Input kind this output kind answers, or `None` for non-output kinds.
    ///
    /// Collaborator observations share the `CollaboratorInvocation` kind and
    /// are told apart by [`ClassifiedTrace::is_observation`].
    pub fn answers(self) -> Option<TraceKind> {
        match self {
            TraceKind::ModelOutput => Some(TraceKind::ModelInput),
            TraceKind::ActionGroupOutput => Some(TraceKind::ActionGroupInput),
            TraceKind::KBOutput => Some(TraceKind::KBInput),
            _ => None,
        }
    }

    /// Kinds that sit outside the step numbering.
    pub fn is_unstepped(self) -> bool {
        matches!(self, TraceKind::Rationale | TraceKind::FinalResponse)
    }
}

/// Raw envelope delivered by the ingest adapter. Discarded after classification.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEvent {
    /// Agent identity reported by the transport, when it knows one.
    pub agent_identity: Option<String>,
    /// The nested trace payload.
    pub raw_payload: Value,
}

impl TraceEvent {
    pub fn new(raw_payload: Value) -> Self {
        Self {
            agent_identity: None,
            raw_payload,
        }
    }

    pub fn with_agent_identity(mut self, agent_identity: impl Into<String>) -> Self {
        self.agent_identity = Some(agent_identity.into());
        self
    }
}

/// Result of classifying one trace payload. Derived, never retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedTrace {
    pub agent_name: String,
    pub kind: TraceKind,
    pub display_text: String,
    /// Pretty-printed payload, kept for the "raw JSON" view.
    pub raw_json: String,
    /// Collaborator named by a collaborator invocation or observation.
    pub collaborator: Option<String>,
    /// `agentId` / `agentAliasId` from the payload, used for fallback matching.
    pub agent_hint: Option<String>,
    /// `true` for the collaborator *output* shape.
    pub is_observation: bool,
}

impl ClassifiedTrace {
    /// A classification carrying nothing but the fallback text.
    pub fn unknown(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            kind: TraceKind::Unknown,
            display_text: NO_CONTENT.to_string(),
            raw_json: String::new(),
            collaborator: None,
            agent_hint: None,
            is_observation: false,
        }
    }

    /// Whether this trace answers an earlier input step.
    pub fn is_response(&self) -> bool {
        self.kind.answers().is_some()
            || (self.kind == TraceKind::CollaboratorInvocation && self.is_observation)
    }
}

/// A sub-step displayed beneath a [`Task`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTask {
    pub title: String,
    pub content: Option<String>,
    pub raw_json: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A displayed step within a trace group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// `0` for Rationale, Final Response and Observation tasks.
    pub step_number: u32,
    pub kind: TraceKind,
    pub title: String,
    pub content: Option<String>,
    pub raw_json: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_tasks: Vec<SubTask>,
}

impl Task {
    /// True while an input step has not yet received its response subtask.
    pub fn is_awaiting_response(&self) -> bool {
        let input_kind = matches!(
            self.kind,
            TraceKind::ModelInput
                | TraceKind::ActionGroupInput
                | TraceKind::KBInput
                | TraceKind::CollaboratorInvocation
        );
        input_kind
            && self.step_number > 0
            && !self
                .sub_tasks
                .iter()
                .any(|sub| sub.title.contains(self.kind.response_label()))
    }
}

/// Everything one agent contributed to the current turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceGroup {
    pub id: String,
    pub agent_identity: String,
    pub display_title: String,
    /// `"{display_title} ({seconds}s, {steps} steps)"`.
    pub dropdown_title: String,
    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    pub is_complete: bool,
    /// Seconds from `start_time` to completion, captured once.
    pub final_elapsed_time: Option<f64>,
    pub tasks: Vec<Task>,
}

impl TraceGroup {
    pub fn new(
        id: impl Into<String>,
        agent_identity: impl Into<String>,
        display_title: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let display_title = display_title.into();
        let mut group = Self {
            id: id.into(),
            agent_identity: agent_identity.into(),
            dropdown_title: display_title.clone(),
            display_title,
            start_time: now,
            last_update_time: now,
            is_complete: false,
            final_elapsed_time: None,
            tasks: Vec::new(),
        };
        group.refresh_dropdown_title(now);
        group
    }

    /// Number of stepped (non-zero) tasks.
    pub fn step_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.step_number > 0).count()
    }

    /// Seconds since the group started, or the frozen final time once complete.
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> f64 {
        match self.final_elapsed_time {
            Some(final_secs) if self.is_complete => final_secs,
            _ => elapsed_secs(self.start_time, now),
        }
    }

    /// Recomputes [`dropdown_title`](Self::dropdown_title) from the current
    /// elapsed time and step count.
    pub fn refresh_dropdown_title(&mut self, now: DateTime<Utc>) {
        self.dropdown_title = format!(
            "{} ({:.2}s, {} steps)",
            self.display_title,
            self.elapsed_secs(now),
            self.step_count()
        );
    }
}

/// Scoping boundary for one user query.
///
/// A new query never clears a session in place: it builds a fresh one with
/// [`Session::new`] and drops the old value, so no group, counter or timer
/// state can leak across queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
    /// Trace groups in order of first appearance.
    pub groups: Vec<TraceGroup>,
}

impl Session {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: now,
            groups: Vec::new(),
        }
    }

    pub fn group(&self, agent_identity: &str) -> Option<&TraceGroup> {
        self.groups
            .iter()
            .find(|group| group.agent_identity == agent_identity)
    }

    /// True when at least one group exists and every group is complete.
    pub fn all_complete(&self) -> bool {
        !self.groups.is_empty() && self.groups.iter().all(|group| group.is_complete)
    }

    pub fn has_active_groups(&self) -> bool {
        self.groups.iter().any(|group| !group.is_complete)
    }
}

/// Seconds between two instants with millisecond resolution, never negative.
pub fn elapsed_secs(start: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let millis = (now - start).num_milliseconds().max(0);
    millis as f64 / 1000.0
}
