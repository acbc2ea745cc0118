use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use traceweave::engine::{TurnEngine, UserAction};
use traceweave::error::TraceError;
use traceweave::event::{RecordingEventHandler, TurnEvent};
use traceweave::history::{
    HistoryEntry, CHAT_HISTORY_KEY, COMPLETE_MESSAGE_PREFIX, MESSAGE_SNAPSHOT_PREFIX,
    PRODUCT_MESSAGE_PREFIX,
};
use traceweave::ingest::{trace_channel, Envelope, StreamMessage};
use traceweave::persistence::{KeyValueStore, MemoryStore};
use traceweave::TraceweaveConfig;

fn engine_with(
    config: TraceweaveConfig,
) -> (TurnEngine, Arc<RecordingEventHandler>, MemoryStore) {
    let handler = Arc::new(RecordingEventHandler::new());
    let store = MemoryStore::new();
    let engine = TurnEngine::new(config, Arc::new(store.clone()), handler.clone());
    (engine, handler, store)
}

fn rationale(agent: &str, text: &str) -> Envelope {
    Envelope::with_trace(json!({
        "collaboratorName": agent,
        "trace": { "orchestrationTrace": { "rationale": { "text": text } } }
    }))
}

fn final_response(agent: &str, text: &str) -> Envelope {
    Envelope::with_trace(json!({
        "collaboratorName": agent,
        "trace": { "orchestrationTrace": { "observation": { "finalResponse": { "text": text } } } }
    }))
}

#[tokio::test(start_paused = true)]
async fn test_inactivity_warning_then_hard_timeout() {
    let (mut engine, handler, _store) = engine_with(TraceweaveConfig::default());
    let (tx, mut inbound) = trace_channel(16);
    let (actions_tx, mut actions) = mpsc::channel(4);

    actions_tx
        .send(UserAction::Submit("Where is my order?".into()))
        .await
        .unwrap();
    let started = Instant::now();

    let result = engine.run(&mut inbound, &mut actions).await;

    assert_eq!(result, Err(TraceError::TurnTimedOut { inactive_secs: 700 }));
    assert!(started.elapsed() >= Duration::from_secs(700));
    assert!(tx.is_closed());
    assert!(!engine.is_input_locked());
    assert!(!engine.is_turn_open());

    let events = handler.events();
    let warning = events
        .iter()
        .position(|e| *e == TurnEvent::InactivityWarning { inactive_secs: 670 })
        .expect("soft warning");
    let timeout = events
        .iter()
        .position(|e| *e == TurnEvent::TurnTimedOut { inactive_secs: 700 })
        .expect("hard timeout");
    assert!(warning < timeout);
    assert_eq!(events.last(), Some(&TurnEvent::InputUnlocked));
}

#[tokio::test(start_paused = true)]
async fn test_activity_postpones_timeout() {
    let config = TraceweaveConfig {
        soft_inactivity: Duration::from_secs(10),
        hard_inactivity: Duration::from_secs(5),
        ..TraceweaveConfig::default()
    };
    let (mut engine, handler, _store) = engine_with(config);
    let (tx, mut inbound) = trace_channel(16);
    let (actions_tx, mut actions) = mpsc::channel(4);
    actions_tx.send(UserAction::Submit("hi".into())).await.unwrap();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(8)).await;
        let _ = tx.send(StreamMessage::Envelope(Envelope::with_text("Working"))).await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        drop(tx);
    });

    let started = Instant::now();
    let result = engine.run(&mut inbound, &mut actions).await;
    assert_eq!(result, Err(TraceError::TurnTimedOut { inactive_secs: 15 }));
    assert!(started.elapsed() >= Duration::from_secs(23));
    assert!(handler
        .events()
        .contains(&TurnEvent::InactivityWarning { inactive_secs: 10 }));
    drop(actions_tx);
}

#[tokio::test(start_paused = true)]
async fn test_full_turn_commits_history() {
    let (mut engine, handler, store) = engine_with(TraceweaveConfig::default());
    let (tx, mut inbound) = trace_channel(16);
    let (actions_tx, mut actions) = mpsc::channel(4);

    actions_tx
        .send(UserAction::Submit("Recommend boots".into()))
        .await
        .unwrap();
    tx.send(StreamMessage::Envelope(rationale("Supervisor", "delegating")))
        .await
        .unwrap();
    tx.send(StreamMessage::Envelope(final_response("Supervisor", "Try the trail boots.")))
        .await
        .unwrap();
    tx.send(StreamMessage::Envelope(
        Envelope::with_text("Try the trail boots.").final_tag(),
    ))
    .await
    .unwrap();
    drop(tx);
    drop(actions_tx);

    engine.run(&mut inbound, &mut actions).await.unwrap();

    assert!(!engine.is_input_locked());
    assert!(engine.session().all_complete());
    assert!(!engine.ticker().is_active());

    let entries = engine.history().entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].prompt, "Recommend boots");
    assert_eq!(entries[0].response, "Try the trail boots.");
    assert_eq!(
        engine.history().backup(&entries[0].id).unwrap().as_deref(),
        Some("Try the trail boots.")
    );
    assert!(store.get(CHAT_HISTORY_KEY).unwrap().is_some());

    let events = handler.events();
    assert_eq!(events.first(), Some(&TurnEvent::InputLocked));
    assert!(events.contains(&TurnEvent::NodeActivated {
        agent_name: "Supervisor".into(),
        node_id: "supervisor-agent".into(),
    }));
    let completed = events
        .iter()
        .position(|e| matches!(e, TurnEvent::TurnCompleted { .. }))
        .expect("turn completed");
    let unlocked = events
        .iter()
        .position(|e| *e == TurnEvent::InputUnlocked)
        .expect("input unlocked");
    assert!(completed < unlocked);
}

#[tokio::test]
async fn test_new_submission_replaces_session() {
    let (mut engine, _handler, _store) = engine_with(TraceweaveConfig::default());
    engine.submit("first").await;
    engine.handle_envelope(rationale("Supervisor", "x")).await;
    let first_id = engine.session().id.clone();
    assert_eq!(engine.session().groups.len(), 1);
    assert!(engine.ticker().is_active());

    engine.submit("second").await;
    assert!(engine.session().groups.is_empty());
    assert_ne!(engine.session().id, first_id);
    assert!(!engine.ticker().is_active());
    assert_eq!(engine.answer(), "");
}

#[tokio::test]
async fn test_heuristic_completion_unlocks_input() {
    let (mut engine, handler, _store) = engine_with(TraceweaveConfig::default());
    engine.submit("Where is my order?").await;
    assert!(engine.is_input_locked());

    engine
        .handle_envelope(Envelope::with_text("Your order shipped"))
        .await;
    assert!(engine.is_turn_open());

    engine
        .handle_envelope(Envelope::with_text(
            "Your order shipped yesterday. Can I help you with anything else?",
        ))
        .await;
    assert!(!engine.is_turn_open());
    assert!(!engine.is_input_locked());
    assert!(handler.events().contains(&TurnEvent::TurnCompleted {
        response: "Your order shipped yesterday. Can I help you with anything else?".into(),
    }));
}

#[tokio::test]
async fn test_each_update_replaces_the_answer() {
    let (mut engine, _handler, _store) = engine_with(TraceweaveConfig::default());
    engine.submit("Where is my order?").await;
    engine
        .handle_envelope(Envelope::with_text("Let me check on that."))
        .await;
    engine.handle_envelope(Envelope::with_text("")).await;
    assert_eq!(engine.answer(), "Let me check on that.");

    engine
        .handle_envelope(Envelope::with_text("Your order shipped.").final_tag())
        .await;
    assert_eq!(engine.answer(), "Your order shipped.");

    let entries = engine.history().entries().unwrap();
    assert_eq!(entries[0].response, "Your order shipped.");
    assert_eq!(
        engine.history().backup(&entries[0].id).unwrap().as_deref(),
        Some("Your order shipped.")
    );
}

#[tokio::test]
async fn test_answer_is_backed_up_while_streaming() {
    let (mut engine, _handler, store) = engine_with(TraceweaveConfig::default());
    engine.submit("Recommend a speaker").await;
    engine
        .handle_envelope(Envelope::with_text("Recommended Products: ThunderBolt Speaker"))
        .await;
    assert!(engine.is_turn_open());

    let keys = store.keys().unwrap();
    let complete: Vec<&String> = keys
        .iter()
        .filter(|key| key.starts_with(COMPLETE_MESSAGE_PREFIX))
        .collect();
    assert_eq!(complete.len(), 1);
    assert_eq!(
        store.get(complete[0]).unwrap().as_deref(),
        Some("Recommended Products: ThunderBolt Speaker")
    );
    assert!(keys.iter().any(|key| key.starts_with(PRODUCT_MESSAGE_PREFIX)));
}

#[tokio::test]
async fn test_groups_are_cached_per_node_and_cleared_on_submit() {
    let (mut engine, _handler, _store) = engine_with(TraceweaveConfig::default());
    engine.submit("first").await;
    engine.handle_envelope(rationale("OrderManagement", "looking")).await;

    let cached = engine
        .trace_cache()
        .trace("order-mgmt-agent", None)
        .unwrap()
        .expect("cached group");
    assert_eq!(cached.agent_identity, "OrderManagement");
    assert_eq!(cached.tasks.len(), 1);

    engine.submit("second").await;
    assert!(engine.trace_cache().trace("order-mgmt-agent", None).unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_repairs_truncated_history() {
    let (mut engine, _handler, store) = engine_with(TraceweaveConfig::default());
    let id = "1700000000000";
    engine
        .history()
        .commit(HistoryEntry {
            id: id.into(),
            prompt: "Recommend boots".into(),
            response: "Try the".into(),
            timestamp: Utc::now(),
        })
        .unwrap();
    store
        .put(
            &format!("{}{}", COMPLETE_MESSAGE_PREFIX, id),
            "Try the trail boots, they are waterproof.",
        )
        .unwrap();

    let (_tx, mut inbound) = trace_channel(4);
    let (actions_tx, mut actions) = mpsc::channel(4);
    actions_tx.send(UserAction::Submit("hi".into())).await.unwrap();
    assert!(engine.run(&mut inbound, &mut actions).await.is_err());

    let entries = engine.history().entries().unwrap();
    assert_eq!(entries[0].response, "Try the trail boots, they are waterproof.");
    assert!(store
        .keys()
        .unwrap()
        .iter()
        .any(|key| key.starts_with(MESSAGE_SNAPSHOT_PREFIX)));
}

#[tokio::test]
async fn test_transport_error_is_not_fatal() {
    let (mut engine, handler, _store) = engine_with(TraceweaveConfig::default());
    engine.submit("hi").await;
    engine.handle_transport_error("socket reset").await;

    assert!(engine.is_turn_open());
    assert!(handler.events().contains(&TurnEvent::StreamError {
        message: "Stream transport error: socket reset".into(),
    }));
}

#[tokio::test]
async fn test_focus_reset_unlocks_and_resets_flow() {
    let (mut engine, handler, _store) = engine_with(TraceweaveConfig::default());
    engine.submit("hi").await;
    engine.focus_reset().await;

    assert!(!engine.is_input_locked());
    let events = handler.events();
    assert_eq!(
        &events[events.len() - 2..],
        &[TurnEvent::InputUnlocked, TurnEvent::FlowReset]
    );
}

#[tokio::test]
async fn test_node_activation_uses_node_table() {
    let (mut engine, handler, _store) = engine_with(TraceweaveConfig::default());
    engine.submit("hi").await;
    engine.handle_envelope(rationale("OrderManagement", "a")).await;
    engine.handle_envelope(rationale("OrderManagement", "b")).await;
    engine.handle_envelope(rationale("ShippingAgent", "c")).await;

    let activations: Vec<TurnEvent> = handler
        .events()
        .into_iter()
        .filter(|e| matches!(e, TurnEvent::NodeActivated { .. }))
        .collect();
    assert_eq!(
        activations,
        vec![
            TurnEvent::NodeActivated {
                agent_name: "OrderManagement".into(),
                node_id: "order-mgmt-agent".into(),
            },
            TurnEvent::NodeActivated {
                agent_name: "ShippingAgent".into(),
                node_id: "shipping-agent".into(),
            },
        ]
    );
}

#[tokio::test]
async fn test_string_encoded_trace_envelope() {
    let (mut engine, _handler, _store) = engine_with(TraceweaveConfig::default());
    engine.submit("hi").await;
    let frame = r#"{"traceJson":"{\"collaboratorName\":\"Troubleshoot\",\"trace\":{\"orchestrationTrace\":{\"rationale\":{\"text\":\"rebooting\"}}}}"}"#;
    engine.handle_envelope(Envelope::from_json(frame).unwrap()).await;

    let group = engine.session().group("Troubleshoot").unwrap();
    assert_eq!(group.tasks[0].content.as_deref(), Some("rebooting"));
}
