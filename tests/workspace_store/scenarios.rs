use std::sync::Arc;

use iris_workspaces::aggregator::DisplayedMessage;
use iris_workspaces::cache::RECENCY_KEY;
use iris_workspaces::events::MessageRole;

use super::store_harness::{Harness, delta, end, start, user};
use iris_workspaces::WorkspaceEvent;

#[test]
fn completed_stream_before_checkpoint_yields_one_assistant_message() {
    let harness = Harness::new();
    harness.register("w1");
    harness.send_all(
        "w1",
        [
            start("a1", "model-a", 1_000),
            delta("a1", "hi"),
            end("a1"),
            WorkspaceEvent::CaughtUp,
        ],
    );

    let state = harness.store.get_state("w1").expect("state");
    assert!(!state.can_interrupt);
    assert!(!state.loading);
    assert_eq!(state.current_model.as_deref(), Some("model-a"));
    assert_eq!(state.raw_messages.len(), 1);
    assert_eq!(state.raw_messages[0].role, MessageRole::Assistant);
    assert_eq!(state.raw_messages[0].text(), "hi");
    assert!(matches!(
        state.messages.as_slice(),
        [DisplayedMessage::Assistant { content, is_streaming: false, .. }] if content == "hi"
    ));
}

#[test]
fn stray_event_after_removal_creates_detached_session() {
    let harness = Harness::new();
    harness.register_live("w1");
    harness.store.remove_session("w1");

    // Delivery already in flight when the subscription was dropped.
    harness
        .store
        .handle_event("w1", start("a9", "model-b", 2_000));

    let state = harness.store.get_state("w1").expect("detached state");
    assert!(state.can_interrupt);
    assert!(!state.loading);
    assert!(!harness.store.is_registered("w1"));
    assert!(harness.store.get_all_states().get("w1").is_none());
    assert!(!harness.store.get_sidebar_states().contains_key("w1"));
}

#[test]
fn content_deltas_do_not_touch_recency_aggregate() {
    let harness = Harness::new();
    harness.register_live("w1");
    harness.send("w1", user("u1", "go", 500));
    harness.send("w1", start("a1", "model-a", 600));

    let recency_watch = harness.store.watch_aggregate(RECENCY_KEY);
    let before_version = recency_watch.version();
    let before = harness.store.get_recency();

    for i in 0..200 {
        harness.send("w1", delta("a1", &format!("chunk {i} ")));
    }

    assert_eq!(recency_watch.version(), before_version);
    assert!(Arc::ptr_eq(&before, &harness.store.get_recency()));
    assert_eq!(harness.store.get_recency()["w1"], 500);

    harness.send("w1", user("u2", "again", 900));
    assert_eq!(recency_watch.version(), before_version + 1);
    assert_eq!(harness.store.get_recency()["w1"], 900);
}
