use std::collections::HashMap;
use std::sync::Arc;

use iris_workspaces::transport::RecordingHistoryReplacer;
use iris_workspaces::{WorkspaceEvent, WorkspaceMeta, WorkspaceStore};

use super::store_harness::{BrokenTransport, Harness, delta, start, user};

#[test]
fn snapshot_identity_is_stable_without_mutation() {
    let harness = Harness::new();
    harness.register_live("w1");
    harness.send("w1", user("u1", "hello", 10));

    let first = harness.store.get_state("w1").unwrap();
    let second = harness.store.get_state("w1").unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    // A duplicate checkpoint is a no-op and must not invalidate.
    harness.send("w1", WorkspaceEvent::CaughtUp);
    assert!(Arc::ptr_eq(&first, &harness.store.get_state("w1").unwrap()));

    harness.send("w1", start("a1", "m", 20));
    let third = harness.store.get_state("w1").unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    assert!(third.can_interrupt);
}

#[test]
fn all_states_keep_untouched_entries() {
    let harness = Harness::new();
    harness.register_live("w1");
    harness.register_live("w2");

    let all = harness.store.get_all_states();
    assert!(Arc::ptr_eq(&all, &harness.store.get_all_states()));
    let w1_before = Arc::clone(all.get("w1").unwrap());

    harness.send("w2", user("u1", "only w2 changes", 5));
    let after = harness.store.get_all_states();
    assert!(!Arc::ptr_eq(&all, &after));
    assert!(Arc::ptr_eq(&w1_before, after.get("w1").unwrap()));
}

#[test]
fn all_states_reflect_exactly_the_registered_set() {
    let harness = Harness::new();
    harness.register("w1");
    harness.register("w2");
    harness.register("w3");
    assert_eq!(harness.store.get_all_states().len(), 3);

    harness.store.remove_session("w2");
    let all = harness.store.get_all_states();
    assert_eq!(all.ids().collect::<Vec<_>>(), vec!["w1", "w3"]);
    assert!(harness.store.get_state("w2").is_none());
    assert_eq!(
        harness.store.get_sidebar_states().keys().collect::<Vec<_>>(),
        vec!["w1", "w3"]
    );
}

#[test]
fn sync_sessions_adds_missing_and_removes_extras() {
    let harness = Harness::new();
    harness.register("old");
    harness.register("kept");

    let desired: HashMap<String, WorkspaceMeta> = ["kept", "new"]
        .into_iter()
        .map(|id| (id.to_string(), WorkspaceMeta::new(id)))
        .collect();
    harness.store.sync_sessions(&desired);

    assert_eq!(harness.store.registered_ids(), vec!["kept", "new"]);
    assert!(!harness.transport.is_attached("old"));
    assert!(harness.transport.is_attached("new"));
    assert_eq!(harness.transport.subscriber_count("kept"), 1);
}

#[test]
fn buffering_session_reports_loading_until_history_arrives() {
    let harness = Harness::new();
    harness.register("w1");
    let sidebar = harness.store.get_sidebar_states();
    assert!(sidebar["w1"].loading);

    harness.send("w1", start("a1", "m", 1));
    harness.send("w1", delta("a1", "buffered"));
    let state = harness.store.get_state("w1").unwrap();
    assert!(state.loading);
    assert!(state.raw_messages.is_empty());
    assert_eq!(harness.store.is_caught_up("w1"), Some(false));

    harness.send("w1", WorkspaceEvent::CaughtUp);
    let state = harness.store.get_state("w1").unwrap();
    assert!(!state.loading);
    assert!(state.can_interrupt);
    assert_eq!(state.raw_messages[0].text(), "buffered");
}

#[test]
fn transport_failures_never_break_the_registry() {
    let store = WorkspaceStore::builder(
        Arc::new(BrokenTransport {
            fail_subscribe: true,
        }),
        Arc::new(RecordingHistoryReplacer::new()),
    )
    .build()
    .unwrap();
    store.add_session(WorkspaceMeta::new("w1"));
    assert!(store.is_registered("w1"));
    store.remove_session("w1");
    assert!(!store.is_registered("w1"));

    let store = WorkspaceStore::builder(
        Arc::new(BrokenTransport {
            fail_subscribe: false,
        }),
        Arc::new(RecordingHistoryReplacer::new()),
    )
    .build()
    .unwrap();
    store.add_session(WorkspaceMeta::new("w1"));
    store.remove_session("w1");
    assert!(store.registered_ids().is_empty());
}

#[test]
fn registering_replaces_a_detached_session() {
    let harness = Harness::new();
    harness
        .store
        .handle_event("w1", start("a1", "model-a", 1_000));
    let detached = harness.store.get_state("w1").expect("detached state");
    assert!(detached.can_interrupt);
    assert_eq!(harness.store.is_caught_up("w1"), Some(true));

    harness.register("w1");
    let fresh = harness.store.get_state("w1").expect("registered state");
    assert!(!fresh.can_interrupt);
    assert!(fresh.loading);
    assert!(fresh.raw_messages.is_empty());
    assert_eq!(harness.store.is_caught_up("w1"), Some(false));
    assert!(harness.store.get_all_states().get("w1").is_some());
}
