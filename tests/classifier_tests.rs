use serde_json::json;
use traceweave::classifier::{
    classify, classify_event, classify_str, format_result_set, matching_rules, INVALID_RESULT_SET,
};
use traceweave::model::{TraceEvent, TraceKind, NO_CONTENT};

fn orchestration(agent: &str, body: serde_json::Value) -> serde_json::Value {
    json!({ "collaboratorName": agent, "trace": { "orchestrationTrace": body } })
}

#[test]
fn test_rationale_from_supervisor() {
    let payload = orchestration("Supervisor", json!({ "rationale": { "text": "because X" } }));
    let trace = classify(&payload);

    assert_eq!(trace.kind, TraceKind::Rationale);
    assert_eq!(trace.agent_name, "Supervisor");
    assert_eq!(trace.display_text, "because X");
    assert!(trace.raw_json.contains("\"rationale\""));
}

#[test]
fn test_agent_name_falls_back_to_agent_name_then_unknown() {
    let by_agent_name = json!({
        "agentName": "Troubleshoot",
        "trace": { "orchestrationTrace": { "rationale": { "text": "checking" } } }
    });
    assert_eq!(classify(&by_agent_name).agent_name, "Troubleshoot");

    let anonymous = json!({ "trace": { "orchestrationTrace": { "rationale": { "text": "x" } } } });
    assert_eq!(classify(&anonymous).agent_name, "Unknown");
}

#[test]
fn test_envelope_identity_overrides_payload_name() {
    let payload = orchestration("Supervisor", json!({ "rationale": { "text": "x" } }));
    let event = TraceEvent::new(payload).with_agent_identity("Personalization");
    assert_eq!(classify_event(&event).agent_name, "Personalization");

    let blank = TraceEvent::new(orchestration("Supervisor", json!({ "rationale": {} })))
        .with_agent_identity("  ");
    assert_eq!(classify_event(&blank).agent_name, "Supervisor");
}

#[test]
fn test_collaborator_output_outranks_everything() {
    let payload = orchestration(
        "Supervisor",
        json!({
            "rationale": { "text": "delegating" },
            "observation": {
                "finalResponse": { "text": "done" },
                "agentCollaboratorInvocationOutput": {
                    "agentCollaboratorName": "OrderManagement",
                    "output": { "text": "Order 42 shipped" }
                }
            }
        }),
    );

    assert_eq!(
        matching_rules(&payload),
        vec!["collaborator_output", "final_response", "rationale", "bare_collaborator"]
    );

    let trace = classify(&payload);
    assert_eq!(trace.kind, TraceKind::CollaboratorInvocation);
    assert!(trace.is_observation);
    assert_eq!(trace.collaborator.as_deref(), Some("OrderManagement"));
    assert_eq!(trace.display_text, "Order 42 shipped");
}

#[test]
fn test_final_response_outranks_rationale() {
    let payload = orchestration(
        "Supervisor",
        json!({
            "rationale": { "text": "wrapping up" },
            "observation": { "finalResponse": { "text": "Here you go" } }
        }),
    );
    let trace = classify(&payload);
    assert_eq!(trace.kind, TraceKind::FinalResponse);
    assert_eq!(trace.display_text, "Here you go");
}

#[test]
fn test_model_input_reparses_embedded_json() {
    let payload = orchestration(
        "Personalization",
        json!({ "modelInvocationInput": { "text": "{\"system\":\"be brief\"}", "type": "ORCHESTRATION" } }),
    );
    let trace = classify(&payload);
    assert_eq!(trace.kind, TraceKind::ModelInput);
    assert_eq!(trace.display_text, "{\n  \"system\": \"be brief\"\n}");
}

#[test]
fn test_model_input_in_pre_processing_trace() {
    let payload = json!({
        "collaboratorName": "Supervisor",
        "trace": { "preProcessingTrace": { "modelInvocationInput": { "text": "classify this" } } }
    });
    let trace = classify(&payload);
    assert_eq!(trace.kind, TraceKind::ModelInput);
    assert_eq!(trace.display_text, "classify this");
}

#[test]
fn test_model_output_keeps_unparseable_content() {
    let payload = orchestration(
        "Supervisor",
        json!({ "modelInvocationOutput": { "rawResponse": { "content": "{not json" } } }),
    );
    let trace = classify(&payload);
    assert_eq!(trace.kind, TraceKind::ModelOutput);
    assert_eq!(trace.display_text, "{not json");
}

#[test]
fn test_action_group_input_lists_parameters() {
    let payload = orchestration(
        "OrderManagement",
        json!({ "invocationInput": { "actionGroupInvocationInput": {
            "actionGroupName": "orders",
            "apiPath": "/orders/{id}",
            "verb": "get",
            "parameters": [ { "name": "id", "type": "string", "value": "42" } ]
        }}}),
    );
    let trace = classify(&payload);
    assert_eq!(trace.kind, TraceKind::ActionGroupInput);
    assert_eq!(
        trace.display_text,
        "Action group: orders\nOperation: GET /orders/{id}\nid = 42"
    );
}

#[test]
fn test_action_group_input_without_parameters_shows_header_only() {
    let payload = orchestration(
        "OrderManagement",
        json!({ "invocationInput": { "actionGroupInvocationInput": {
            "actionGroupName": "orders",
            "function": "lookup"
        }}}),
    );
    let trace = classify(&payload);
    assert_eq!(trace.display_text, "Action group: orders\nOperation: lookup");
}

#[test]
fn test_action_group_output_flattens_result_set() {
    let result = json!({ "result": { "ResultSet": { "Rows": [
        { "Data": [ { "VarCharValue": "order_id" }, { "VarCharValue": "status" } ] },
        { "Data": [ { "VarCharValue": "42" }, { "VarCharValue": "shipped" } ] }
    ]}}});
    let payload = orchestration(
        "OrderManagement",
        json!({ "observation": { "actionGroupInvocationOutput": { "text": result.to_string() } } }),
    );
    let trace = classify(&payload);
    assert_eq!(trace.kind, TraceKind::ActionGroupOutput);
    assert_eq!(trace.display_text, "order_id | status\n42 | shipped");
}

#[test]
fn test_malformed_result_set() {
    let malformed = json!({ "ResultSet": { "Rows": "nope" } });
    assert_eq!(format_result_set(&malformed), INVALID_RESULT_SET);

    let missing_data = json!({ "ResultSet": { "Rows": [ { "Cells": [] } ] } });
    assert_eq!(format_result_set(&missing_data), INVALID_RESULT_SET);
}

#[test]
fn test_collaborator_input_names_collaborator() {
    let payload = orchestration(
        "Supervisor",
        json!({ "invocationInput": { "agentCollaboratorInvocationInput": {
            "agentCollaboratorName": "ProductRecommendation",
            "input": { "text": "find hiking boots" }
        }}}),
    );
    let trace = classify(&payload);
    assert_eq!(trace.kind, TraceKind::CollaboratorInvocation);
    assert!(!trace.is_observation);
    assert_eq!(trace.collaborator.as_deref(), Some("ProductRecommendation"));
    assert_eq!(trace.display_text, "find hiking boots");
}

#[test]
fn test_routing_classifier_model_input_is_a_routing_decision() {
    let payload = json!({
        "collaboratorName": "ROUTING_CLASSIFIER",
        "trace": { "routingClassifierTrace": { "modelInvocationInput": { "text": "route me" } } }
    });
    let trace = classify(&payload);
    assert_eq!(trace.kind, TraceKind::RoutingDecision);
    assert_eq!(trace.display_text, "route me");
}

#[test]
fn test_routing_classifier_type_tag() {
    let payload = json!({ "type": "ROUTING_CLASSIFIER", "agentName": "ROUTING_CLASSIFIER" });
    let trace = classify(&payload);
    assert_eq!(trace.kind, TraceKind::RoutingDecision);
    assert_eq!(trace.display_text, NO_CONTENT);
}

#[test]
fn test_knowledge_base_lookup() {
    let input = orchestration(
        "Troubleshoot",
        json!({ "invocationInput": { "knowledgeBaseLookupInput": { "text": "reset router" } } }),
    );
    let trace = classify(&input);
    assert_eq!(trace.kind, TraceKind::KBInput);
    assert_eq!(trace.display_text, "reset router");

    let output = orchestration(
        "Troubleshoot",
        json!({ "observation": { "knowledgeBaseLookupOutput": { "retrievedReferences": [
            { "content": { "text": "Hold the button" }, "location": { "s3Location": { "uri": "s3://kb/router.md" } } },
            { "content": {} }
        ]}}}),
    );
    let trace = classify(&output);
    assert_eq!(trace.kind, TraceKind::KBOutput);
    assert_eq!(
        trace.display_text,
        "Reference 1:\nSource: s3://kb/router.md\nHold the button\n\n---\n\nReference 2:\nNo content available"
    );
}

#[test]
fn test_bare_collaborator_name_is_unknown_kind() {
    let payload = json!({ "collaboratorName": "Personalization", "trace": {} });
    let trace = classify(&payload);
    assert_eq!(trace.kind, TraceKind::Unknown);
    assert_eq!(trace.agent_name, "Personalization");
    assert_eq!(trace.display_text, NO_CONTENT);
}

#[test]
fn test_unrecognized_payloads_never_panic() {
    for payload in [json!(null), json!(42), json!([1, 2]), json!({ "trace": "garbage" })] {
        let trace = classify(&payload);
        assert_eq!(trace.kind, TraceKind::Unknown);
        assert_eq!(trace.display_text, NO_CONTENT);
    }
}

#[test]
fn test_classify_str_extracts_braced_span() {
    let raw = r#"event: trace {"collaboratorName":"Supervisor","trace":{"orchestrationTrace":{"rationale":{"text":"ok"}}}}"#;
    let trace = classify_str(raw);
    assert_eq!(trace.kind, TraceKind::Rationale);
    assert_eq!(trace.display_text, "ok");

    let garbage = classify_str("not a trace");
    assert_eq!(garbage.kind, TraceKind::Unknown);
    assert_eq!(garbage.raw_json, "not a trace");
}

#[test]
fn test_string_encoded_trace_is_expanded() {
    let payload = json!({
        "collaboratorName": "Supervisor",
        "trace": "{\"orchestrationTrace\":{\"rationale\":{\"text\":\"nested\"}}}"
    });
    let trace = classify(&payload);
    assert_eq!(trace.kind, TraceKind::Rationale);
    assert_eq!(trace.display_text, "nested");
}
