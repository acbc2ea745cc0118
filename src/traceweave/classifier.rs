//! Trace classification.
//!
//! Turns one raw, nested trace payload into a [`ClassifiedTrace`]: which agent
//! emitted it, what kind of step it describes, and a human-readable rendering
//! of its content. Classification is a pure function and never fails; a
//! payload that matches no known shape comes back as [`TraceKind::Unknown`]
//! with [`NO_CONTENT`] as its text.
//!
//! # Shape precedence
//!
//! Payload shapes overlap (an orchestration trace can carry both an
//! observation and a rationale), so the rules are kept in a single ordered
//! table, [`SHAPE_RULES`], and the first matching rule wins:
//!
//! ```text
//!  1 collaborator_output   observation.agentCollaboratorInvocationOutput
//!  2 final_response        observation.finalResponse
//!  3 rationale             orchestrationTrace.rationale
//!  4 model_input           modelInvocationInput (orchestration / pre / post)
//!  5 model_output          modelInvocationOutput (orchestration / pre / post)
//!  6 action_group_input    invocationInput.actionGroupInvocationInput
//!  7 action_group_output   observation.actionGroupInvocationOutput
//!  8 collaborator_input    invocationInput.agentCollaboratorInvocationInput
//!  9 routing_classifier    routingClassifierTrace / type = ROUTING_CLASSIFIER
//! 10 knowledge_base        knowledgeBaseLookupInput / knowledgeBaseLookupOutput
//! 11 bare_collaborator     collaboratorName or agentName only
//! ```
//!
//! # Example
//!
//! ```rust
//! use traceweave::classifier::classify;
//! use traceweave::model::TraceKind;
//! use serde_json::json;
//!
//! let payload = json!({
//!     "collaboratorName": "Supervisor",
//!     "trace": { "orchestrationTrace": { "rationale": { "text": "because X" } } }
//! });
//!
//! let trace = classify(&payload);
//! assert_eq!(trace.kind, TraceKind::Rationale);
//! assert_eq!(trace.agent_name, "Supervisor");
//! assert_eq!(trace.display_text, "because X");
//! ```

use crate::traceweave::error::TraceError;
use crate::traceweave::model::{ClassifiedTrace, TraceEvent, TraceKind, NO_CONTENT};
use log::debug;
use serde_json::Value;

const ORCHESTRATION: &str = "/trace/orchestrationTrace";
const ROUTING: &str = "/trace/routingClassifierTrace";
const PRE_PROCESSING: &str = "/trace/preProcessingTrace";
const POST_PROCESSING: &str = "/trace/postProcessingTrace";

/// Text produced when an action group's result set cannot be flattened.
pub const INVALID_RESULT_SET: &str = "Invalid result set format";

/// What a matching rule extracts from a payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub kind: TraceKind,
    pub display_text: String,
    pub collaborator: Option<String>,
    pub is_observation: bool,
}

impl Extracted {
    fn new(kind: TraceKind, display_text: String) -> Self {
        Self {
            kind,
            display_text,
            collaborator: None,
            is_observation: false,
        }
    }
}

/// One entry of the priority dispatch table.
pub struct ShapeRule {
    /// Stable rule name, useful in logs and tests.
    pub name: &'static str,
    /// Returns true when the payload has this rule's shape.
    pub matches: fn(&Value) -> bool,
    /// Builds the classification for a matching payload.
    pub extract: fn(&Value) -> Extracted,
}

/// Shape rules in strict priority order.
pub static SHAPE_RULES: &[ShapeRule] = &[
    ShapeRule {
        name: "collaborator_output",
        matches: is_collaborator_output,
        extract: extract_collaborator_output,
    },
    ShapeRule {
        name: "final_response",
        matches: is_final_response,
        extract: extract_final_response,
    },
    ShapeRule {
        name: "rationale",
        matches: is_rationale,
        extract: extract_rationale,
    },
    ShapeRule {
        name: "model_input",
        matches: is_model_input,
        extract: extract_model_input,
    },
    ShapeRule {
        name: "model_output",
        matches: is_model_output,
        extract: extract_model_output,
    },
    ShapeRule {
        name: "action_group_input",
        matches: is_action_group_input,
        extract: extract_action_group_input,
    },
    ShapeRule {
        name: "action_group_output",
        matches: is_action_group_output,
        extract: extract_action_group_output,
    },
    ShapeRule {
        name: "collaborator_input",
        matches: is_collaborator_input,
        extract: extract_collaborator_input,
    },
    ShapeRule {
        name: "routing_classifier",
        matches: is_routing_classifier,
        extract: extract_routing_classifier,
    },
    ShapeRule {
        name: "knowledge_base",
        matches: is_knowledge_base,
        extract: extract_knowledge_base,
    },
    ShapeRule {
        name: "bare_collaborator",
        matches: has_bare_name,
        extract: extract_bare_name,
    },
];

/// Classifies a parsed trace payload.
///
/// The agent name is taken from `collaboratorName`, then `agentName`, and
/// defaults to `"Unknown"`.
pub fn classify(raw_payload: &Value) -> ClassifiedTrace {
    let normalized = normalize_payload(raw_payload);
    let payload = normalized.as_ref().unwrap_or(raw_payload);

    let agent_name = payload_agent_name(payload).unwrap_or_else(|| "Unknown".to_string());
    let agent_hint = ["agentId", "agentAliasId"]
        .iter()
        .find_map(|key| non_empty_str(payload.get(*key)))
        .map(str::to_string);

    let mut trace = ClassifiedTrace::unknown(agent_name);
    trace.agent_hint = agent_hint;
    trace.raw_json = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());

    match SHAPE_RULES.iter().find(|rule| (rule.matches)(payload)) {
        Some(rule) => {
            let extracted = (rule.extract)(payload);
            debug!(
                "Classified trace from '{}' via rule '{}' as {:?}",
                trace.agent_name, rule.name, extracted.kind
            );
            trace.kind = extracted.kind;
            trace.display_text = if extracted.display_text.trim().is_empty() {
                NO_CONTENT.to_string()
            } else {
                extracted.display_text
            };
            trace.collaborator = extracted.collaborator;
            trace.is_observation = extracted.is_observation;
        }
        None => {
            debug!(
                "{}",
                TraceError::MalformedTraceShape(format!(
                    "no rule matched payload from '{}'",
                    trace.agent_name
                ))
            );
        }
    }
    trace
}

/// Classifies a trace delivered as a JSON string.
///
/// When the string does not parse as a whole, the outermost `{...}` span is
/// tried before giving up; an unparseable string yields an `Unknown` trace
/// whose `raw_json` is the original text.
pub fn classify_str(trace_json: &str) -> ClassifiedTrace {
    match parse_trace_json(trace_json) {
        Some(payload) => classify(&payload),
        None => {
            debug!(
                "{}",
                TraceError::MalformedTraceShape("trace string is not JSON".to_string())
            );
            let mut trace = ClassifiedTrace::unknown("Unknown");
            trace.raw_json = trace_json.to_string();
            trace
        }
    }
}

/// Classifies a [`TraceEvent`]; a non-empty transport identity wins over the
/// name found in the payload.
pub fn classify_event(event: &TraceEvent) -> ClassifiedTrace {
    let mut trace = classify(&event.raw_payload);
    if let Some(identity) = event
        .agent_identity
        .as_deref()
        .map(str::trim)
        .filter(|identity| !identity.is_empty())
    {
        trace.agent_name = identity.to_string();
    }
    trace
}

/// Names of every rule that matches the payload, in priority order.
///
/// Only the first one decides the classification; the rest show which
/// overlapping shapes the payload also carries.
pub fn matching_rules(payload: &Value) -> Vec<&'static str> {
    SHAPE_RULES
        .iter()
        .filter(|rule| (rule.matches)(payload))
        .map(|rule| rule.name)
        .collect()
}

/// Parses a trace string, falling back to its outermost brace-delimited span.
pub fn parse_trace_json(trace_json: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(trace_json) {
        return Some(value);
    }
    let start = trace_json.find('{')?;
    let end = trace_json.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trace_json[start..=end]).ok()
}

/// Re-parses a string that looks like embedded JSON and pretty-prints it.
/// Anything that fails to parse is returned verbatim.
pub fn pretty_embedded(text: &str) -> String {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return text.to_string();
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| text.to_string()),
        Err(err) => {
            debug!("{}", TraceError::EmbeddedJsonParse(err.to_string()));
            text.to_string()
        }
    }
}

/// Flattens `ResultSet.Rows[].Data[].VarCharValue` into pipe-delimited lines,
/// one per row. Returns [`INVALID_RESULT_SET`] when the structure is not a
/// list of rows each holding a `Data` list.
pub fn format_result_set(result: &Value) -> String {
    let rows = match result.pointer("/ResultSet/Rows").and_then(Value::as_array) {
        Some(rows) => rows,
        None => return INVALID_RESULT_SET.to_string(),
    };

    let mut lines = Vec::with_capacity(rows.len());
    for row in rows {
        let cells = match row.get("Data").and_then(Value::as_array) {
            Some(cells) => cells,
            None => return INVALID_RESULT_SET.to_string(),
        };
        let values: Vec<String> = cells
            .iter()
            .map(|cell| match cell.get("VarCharValue") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            })
            .collect();
        lines.push(values.join(" | "));
    }
    lines.join("\n")
}

// ── Payload helpers ───────────────────────────────────────────────────────

/// Legacy transports deliver `trace` as a JSON string; expand it in place.
fn normalize_payload(payload: &Value) -> Option<Value> {
    let embedded = payload.get("trace")?.as_str()?;
    let parsed = parse_trace_json(embedded)?;
    let mut normalized = payload.clone();
    normalized["trace"] = parsed;
    Some(normalized)
}

fn payload_agent_name(payload: &Value) -> Option<String> {
    ["collaboratorName", "agentName"]
        .iter()
        .find_map(|key| non_empty_str(payload.get(*key)))
        .map(str::to_string)
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn at<'a>(payload: &'a Value, root: &str, path: &str) -> Option<&'a Value> {
    payload.pointer(&format!("{}{}", root, path))
}

fn first_at<'a>(payload: &'a Value, roots: &[&str], path: &str) -> Option<&'a Value> {
    roots.iter().find_map(|root| at(payload, root, path))
}

fn text_or_pretty(value: &Value, text_path: &str) -> String {
    match value.pointer(text_path) {
        Some(Value::String(text)) => pretty_embedded(text),
        Some(other) if !other.is_null() => pretty(other),
        _ => pretty(value),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn collaborator_name(value: &Value) -> Option<String> {
    non_empty_str(value.get("agentCollaboratorName")).map(str::to_string)
}

// ── Rules ─────────────────────────────────────────────────────────────────

const COLLABORATOR_OUTPUT: &str = "/observation/agentCollaboratorInvocationOutput";
const COLLABORATOR_INPUT: &str = "/invocationInput/agentCollaboratorInvocationInput";

fn is_collaborator_output(payload: &Value) -> bool {
    first_at(payload, &[ORCHESTRATION, ROUTING], COLLABORATOR_OUTPUT).is_some()
}

fn extract_collaborator_output(payload: &Value) -> Extracted {
    let output = first_at(payload, &[ORCHESTRATION, ROUTING], COLLABORATOR_OUTPUT)
        .unwrap_or(&Value::Null);
    let mut extracted = Extracted::new(
        TraceKind::CollaboratorInvocation,
        text_or_pretty(output, "/output/text"),
    );
    extracted.collaborator = collaborator_name(output);
    extracted.is_observation = true;
    extracted
}

fn is_final_response(payload: &Value) -> bool {
    first_at(payload, &[ORCHESTRATION, ROUTING], "/observation/finalResponse").is_some()
}

fn extract_final_response(payload: &Value) -> Extracted {
    let response = first_at(payload, &[ORCHESTRATION, ROUTING], "/observation/finalResponse")
        .unwrap_or(&Value::Null);
    Extracted::new(TraceKind::FinalResponse, text_or_pretty(response, "/text"))
}

fn is_rationale(payload: &Value) -> bool {
    at(payload, ORCHESTRATION, "/rationale").is_some()
}

fn extract_rationale(payload: &Value) -> Extracted {
    let rationale = at(payload, ORCHESTRATION, "/rationale").unwrap_or(&Value::Null);
    Extracted::new(TraceKind::Rationale, text_or_pretty(rationale, "/text"))
}

const MODEL_ROOTS: &[&str] = &[ORCHESTRATION, PRE_PROCESSING, POST_PROCESSING];

fn is_model_input(payload: &Value) -> bool {
    first_at(payload, MODEL_ROOTS, "/modelInvocationInput").is_some()
}

fn extract_model_input(payload: &Value) -> Extracted {
    let input = first_at(payload, MODEL_ROOTS, "/modelInvocationInput").unwrap_or(&Value::Null);
    Extracted::new(TraceKind::ModelInput, text_or_pretty(input, "/text"))
}

fn is_model_output(payload: &Value) -> bool {
    first_at(payload, MODEL_ROOTS, "/modelInvocationOutput").is_some()
}

fn extract_model_output(payload: &Value) -> Extracted {
    let output = first_at(payload, MODEL_ROOTS, "/modelInvocationOutput").unwrap_or(&Value::Null);
    let text = if output.pointer("/rawResponse/content").is_some() {
        text_or_pretty(output, "/rawResponse/content")
    } else if let Some(rationale) = non_empty_str(output.pointer("/parsedResponse/rationale")) {
        rationale.to_string()
    } else {
        pretty(output)
    };
    Extracted::new(TraceKind::ModelOutput, text)
}

const ACTION_INPUT: &str = "/invocationInput/actionGroupInvocationInput";
const ACTION_OUTPUT: &str = "/observation/actionGroupInvocationOutput";

fn is_action_group_input(payload: &Value) -> bool {
    at(payload, ORCHESTRATION, ACTION_INPUT).is_some()
}

fn extract_action_group_input(payload: &Value) -> Extracted {
    let input = at(payload, ORCHESTRATION, ACTION_INPUT).unwrap_or(&Value::Null);
    Extracted::new(TraceKind::ActionGroupInput, render_action_input(input))
}

/// `name = value` lines for the call's parameters, headed by the action
/// group and operation when present.
fn render_action_input(input: &Value) -> String {
    let mut lines = Vec::new();
    if let Some(group) = non_empty_str(input.get("actionGroupName")) {
        lines.push(format!("Action group: {}", group));
    }
    let operation = non_empty_str(input.get("apiPath")).or_else(|| non_empty_str(input.get("function")));
    if let Some(operation) = operation {
        match non_empty_str(input.get("verb")) {
            Some(verb) => lines.push(format!("Operation: {} {}", verb.to_uppercase(), operation)),
            None => lines.push(format!("Operation: {}", operation)),
        }
    }

    let parameter_lists = [
        input.get("parameters"),
        input.pointer("/requestBody/content/application~1json"),
        input.pointer("/requestBody/content/application~1json/properties"),
    ];
    for list in parameter_lists.iter().flatten() {
        if let Some(items) = list.as_array() {
            for item in items {
                if let Some(name) = non_empty_str(item.get("name")) {
                    let value = match item.get("value") {
                        Some(Value::String(s)) => s.clone(),
                        Some(other) => other.to_string(),
                        None => String::new(),
                    };
                    lines.push(format!("{} = {}", name, value));
                }
            }
        }
    }

    if lines.is_empty() {
        lines.push(pretty(input));
    }
    lines.join("\n")
}

fn is_action_group_output(payload: &Value) -> bool {
    at(payload, ORCHESTRATION, ACTION_OUTPUT).is_some()
}

fn extract_action_group_output(payload: &Value) -> Extracted {
    let output = at(payload, ORCHESTRATION, ACTION_OUTPUT).unwrap_or(&Value::Null);
    Extracted::new(TraceKind::ActionGroupOutput, render_action_output(output))
}

fn render_action_output(output: &Value) -> String {
    let text = match output.get("text") {
        Some(Value::String(text)) => text,
        _ => return pretty(output),
    };
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(parsed) => {
            if let Some(result) = parsed.get("result").filter(|r| r.get("ResultSet").is_some()) {
                format_result_set(result)
            } else if parsed.get("ResultSet").is_some() {
                format_result_set(&parsed)
            } else {
                pretty(&parsed)
            }
        }
        Err(err) => {
            debug!("{}", TraceError::EmbeddedJsonParse(err.to_string()));
            text.clone()
        }
    }
}

fn is_collaborator_input(payload: &Value) -> bool {
    first_at(payload, &[ORCHESTRATION, ROUTING], COLLABORATOR_INPUT).is_some()
}

fn extract_collaborator_input(payload: &Value) -> Extracted {
    let input = first_at(payload, &[ORCHESTRATION, ROUTING], COLLABORATOR_INPUT)
        .unwrap_or(&Value::Null);
    let mut extracted = Extracted::new(
        TraceKind::CollaboratorInvocation,
        text_or_pretty(input, "/input/text"),
    );
    extracted.collaborator = collaborator_name(input);
    extracted
}

fn is_routing_classifier(payload: &Value) -> bool {
    payload.pointer(ROUTING).is_some()
        || payload.get("type").and_then(Value::as_str) == Some("ROUTING_CLASSIFIER")
        || payload.pointer("/trace/trace_type").and_then(Value::as_str) == Some("routing_classifier")
        || payload.get("trace_type").and_then(Value::as_str) == Some("routing_classifier")
}

fn extract_routing_classifier(payload: &Value) -> Extracted {
    let routing = payload.pointer(ROUTING).unwrap_or(&Value::Null);
    let text = if let Some(output) = routing.get("modelInvocationOutput") {
        if output.pointer("/rawResponse/content").is_some() {
            text_or_pretty(output, "/rawResponse/content")
        } else {
            pretty(output)
        }
    } else if let Some(input) = routing.get("modelInvocationInput") {
        text_or_pretty(input, "/text")
    } else {
        NO_CONTENT.to_string()
    };
    Extracted::new(TraceKind::RoutingDecision, text)
}

const KB_INPUT: &str = "/invocationInput/knowledgeBaseLookupInput";
const KB_OUTPUT: &str = "/observation/knowledgeBaseLookupOutput";

fn is_knowledge_base(payload: &Value) -> bool {
    at(payload, ORCHESTRATION, KB_INPUT).is_some() || at(payload, ORCHESTRATION, KB_OUTPUT).is_some()
}

fn extract_knowledge_base(payload: &Value) -> Extracted {
    if let Some(input) = at(payload, ORCHESTRATION, KB_INPUT) {
        let text = match non_empty_str(input.get("text")) {
            Some(query) => query.to_string(),
            None => pretty(input),
        };
        return Extracted::new(TraceKind::KBInput, text);
    }
    let output = at(payload, ORCHESTRATION, KB_OUTPUT).unwrap_or(&Value::Null);
    Extracted::new(TraceKind::KBOutput, render_kb_output(output))
}

fn render_kb_output(output: &Value) -> String {
    let references = match output.get("retrievedReferences").and_then(Value::as_array) {
        Some(references) if !references.is_empty() => references,
        _ => return pretty(output),
    };
    references
        .iter()
        .enumerate()
        .map(|(index, reference)| {
            let source = non_empty_str(reference.pointer("/location/s3Location/uri"))
                .or_else(|| non_empty_str(reference.get("source")));
            let text = non_empty_str(reference.pointer("/content/text")).unwrap_or(NO_CONTENT);
            match source {
                Some(source) => format!("Reference {}:\nSource: {}\n{}", index + 1, source, text),
                None => format!("Reference {}:\n{}", index + 1, text),
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

fn has_bare_name(payload: &Value) -> bool {
    payload_agent_name(payload).is_some()
}

fn extract_bare_name(_payload: &Value) -> Extracted {
    Extracted::new(TraceKind::Unknown, NO_CONTENT.to_string())
}
