use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use traceweave::model::TraceGroup;
use traceweave::persistence::{KeyValueStore, MemoryStore};
use traceweave::trace_cache::{AgentTraceCache, TRACE_CACHE_KEY};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

fn group(id: &str, agent: &str) -> TraceGroup {
    TraceGroup::new(id, agent, agent, t0())
}

fn cache() -> (AgentTraceCache, MemoryStore) {
    let store = MemoryStore::new();
    (AgentTraceCache::new(Arc::new(store.clone())), store)
}

#[test]
fn test_missing_node_has_no_trace() {
    let (cache, _store) = cache();
    assert_eq!(cache.trace("supervisor-agent", None).unwrap(), None);
    assert!(cache.node_traces("supervisor-agent").unwrap().is_empty());
}

#[test]
fn test_latest_trace_wins_without_an_id() {
    let (cache, _store) = cache();
    let first = group("s1:OrderManagement", "OrderManagement");
    let second = group("s1:OrderManagementAgent", "OrderManagementAgent");
    cache
        .store_trace("order-mgmt-agent", &first, Some("s1"), t0())
        .unwrap();
    cache
        .store_trace("order-mgmt-agent", &second, Some("s1"), t0() + Duration::seconds(1))
        .unwrap();

    assert_eq!(cache.trace("order-mgmt-agent", None).unwrap(), Some(second.clone()));
    assert_eq!(
        cache.trace("order-mgmt-agent", Some("s1:OrderManagement")).unwrap(),
        Some(first.clone())
    );
    assert_eq!(cache.node_traces("order-mgmt-agent").unwrap(), vec![first, second]);
}

#[test]
fn test_restoring_a_group_replaces_the_cached_copy() {
    let (cache, _store) = cache();
    let mut live = group("s1:Supervisor", "Supervisor");
    cache.store_trace("supervisor-agent", &live, Some("s1"), t0()).unwrap();

    live.is_complete = true;
    live.final_elapsed_time = Some(4.0);
    cache
        .store_trace("supervisor-agent", &live, Some("s1"), t0() + Duration::seconds(4))
        .unwrap();

    let cached = cache.node_traces("supervisor-agent").unwrap();
    assert_eq!(cached.len(), 1);
    assert!(cached[0].is_complete);
}

#[test]
fn test_new_session_replaces_node_entry() {
    let (cache, _store) = cache();
    cache
        .store_trace("ts-agent", &group("s1:Troubleshoot", "Troubleshoot"), Some("s1"), t0())
        .unwrap();
    cache
        .store_trace("ts-agent", &group("s2:Troubleshoot", "Troubleshoot"), Some("s2"), t0())
        .unwrap();

    let cached = cache.node_traces("ts-agent").unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].id, "s2:Troubleshoot");
}

#[test]
fn test_clear_by_session_node_and_everything() {
    let (cache, _store) = cache();
    cache
        .store_trace("supervisor-agent", &group("s1:Supervisor", "Supervisor"), Some("s1"), t0())
        .unwrap();
    cache
        .store_trace("ts-agent", &group("s2:Troubleshoot", "Troubleshoot"), Some("s2"), t0())
        .unwrap();
    cache
        .store_trace("order-mgmt-agent", &group("s2:OrderManagement", "OrderManagement"), Some("s2"), t0())
        .unwrap();

    assert_eq!(cache.clear_all(Some("s1")).unwrap(), 1);
    assert_eq!(cache.nodes().unwrap(), vec!["order-mgmt-agent", "ts-agent"]);

    assert!(cache.clear_node("ts-agent").unwrap());
    assert!(!cache.clear_node("ts-agent").unwrap());

    assert_eq!(cache.clear_all(None).unwrap(), 1);
    assert!(cache.nodes().unwrap().is_empty());
}

#[test]
fn test_unreadable_cache_reads_as_empty() {
    let (cache, store) = cache();
    store.put(TRACE_CACHE_KEY, "[1, 2").unwrap();
    assert!(cache.nodes().unwrap().is_empty());

    cache
        .store_trace("supervisor-agent", &group("s1:Supervisor", "Supervisor"), Some("s1"), t0())
        .unwrap();
    assert_eq!(cache.nodes().unwrap(), vec!["supervisor-agent"]);
}
