use std::sync::Arc;

use iris_workspaces::config::{BufferConfig, StoreConfig};
use iris_workspaces::events::{MessagePart, TokenUsage, WorkspaceMessage};
use iris_workspaces::{DerivedSessionState, WorkspaceEvent};
use serde_json::json;

use super::store_harness::{Harness, delta, end, start, user};

fn session_log() -> Vec<WorkspaceEvent> {
    vec![
        user("u1", "list the files", 100),
        start("a1", "model-a", 110),
        WorkspaceEvent::ReasoningDelta {
            message_id: "a1".into(),
            delta: "use ls".into(),
        },
        WorkspaceEvent::ReasoningEnd {
            message_id: "a1".into(),
        },
        WorkspaceEvent::ToolCallStart {
            message_id: "a1".into(),
            tool_call_id: "t1".into(),
            tool_name: "todo_write".into(),
            args: json!({"todos": [{"content": "read src", "status": "in_progress"}]}),
        },
        WorkspaceEvent::ToolCallEnd {
            message_id: "a1".into(),
            tool_call_id: "t1".into(),
            tool_name: "todo_write".into(),
            result: json!({"success": true}),
        },
        delta("a1", "Here "),
        delta("a1", "they are."),
        WorkspaceEvent::StreamEnd {
            message_id: "a1".into(),
            parts: vec![],
            model: None,
            usage: Some(TokenUsage {
                input_tokens: 40,
                output_tokens: 12,
            }),
        },
        start("a2", "model-b", 200),
        delta("a2", "still going"),
    ]
}

/// Run `events` once before `caught-up` and once against a live workspace.
fn replay_both(
    events: &[WorkspaceEvent],
) -> (Arc<DerivedSessionState>, Arc<DerivedSessionState>) {
    let buffered = Harness::new();
    buffered.register("w1");
    buffered.send_all("w1", events.iter().cloned());
    buffered.send("w1", WorkspaceEvent::CaughtUp);

    let live = Harness::new();
    live.register_live("w1");
    live.send_all("w1", events.iter().cloned());

    (
        buffered.store.get_state("w1").unwrap(),
        live.store.get_state("w1").unwrap(),
    )
}

fn ids(state: &DerivedSessionState) -> Vec<&str> {
    state.raw_messages.iter().map(|m| m.id.as_str()).collect()
}

#[test]
fn buffered_replay_matches_live_application() {
    let buffered = Harness::new();
    buffered.register("w1");
    buffered.send_all("w1", session_log());
    assert!(buffered.store.get_state("w1").unwrap().loading);
    buffered.send("w1", WorkspaceEvent::CaughtUp);

    let live = Harness::new();
    live.register_live("w1");
    live.send_all("w1", session_log());

    let replayed = buffered.store.get_state("w1").unwrap();
    let applied = live.store.get_state("w1").unwrap();
    assert_eq!(*replayed, *applied);
    assert_eq!(replayed.current_model.as_deref(), Some("model-b"));
    assert!(replayed.can_interrupt);
    assert_eq!(replayed.todos.len(), 1);
    assert_eq!(replayed.usage.total(), 52);
    assert_eq!(replayed.raw_messages[1].text(), "Here they are.");
}

#[test]
fn pass_through_events_apply_while_buffering() {
    let harness = Harness::new();
    harness.register("w1");
    harness.send("w1", user("u1", "hi", 1));
    harness.send(
        "w1",
        WorkspaceEvent::StreamError {
            message_id: "a0".into(),
            error: "quota exceeded".into(),
            error_type: Some("quota".into()),
        },
    );

    let state = harness.store.get_state("w1").unwrap();
    assert_eq!(state.raw_messages.len(), 1);
    assert_eq!(state.raw_messages[0].id, "a0");
    assert_eq!(
        state.last_error.as_ref().map(|e| e.error.as_str()),
        Some("quota exceeded")
    );
    assert_eq!(harness.store.is_caught_up("w1"), Some(false));
}

#[test]
fn queue_overflow_drops_oldest_events() {
    let harness = Harness::with_config(StoreConfig {
        buffer: BufferConfig {
            max_pending_events: 3,
        },
        ..StoreConfig::default()
    });
    harness.register("w1");
    harness.send_all(
        "w1",
        [
            start("a1", "m", 1),
            delta("a1", "lost "),
            delta("a1", "kept "),
            delta("a1", "too"),
        ],
    );
    harness.send("w1", WorkspaceEvent::CaughtUp);

    // stream-start was dropped, so the deltas have no message to land in.
    let state = harness.store.get_state("w1").unwrap();
    assert!(state.raw_messages.is_empty());
    assert!(!state.can_interrupt);
}

#[test]
fn end_event_parts_win_over_streamed_text_in_both_modes() {
    let events = || {
        vec![
            start("a1", "m", 1),
            delta("a1", "draft"),
            WorkspaceEvent::StreamEnd {
                message_id: "a1".into(),
                parts: vec![MessagePart::Text {
                    text: "final".into(),
                }],
                model: None,
                usage: None,
            },
            end("a1"),
        ]
    };

    let buffered = Harness::new();
    buffered.register("w1");
    buffered.send_all("w1", events());
    buffered.send("w1", WorkspaceEvent::CaughtUp);

    let live = Harness::new();
    live.register_live("w1");
    live.send_all("w1", events());

    let state = buffered.store.get_state("w1").unwrap();
    assert_eq!(state.raw_messages[0].text(), "final");
    assert_eq!(*state, *live.store.get_state("w1").unwrap());
}

#[test]
fn delete_during_replay_window_removes_buffered_history() {
    let events = [
        user("u1", "first", 100),
        user("u2", "second", 110),
        WorkspaceEvent::Delete {
            message_ids: vec!["u1".into()],
        },
    ];
    let (replayed, applied) = replay_both(&events);
    assert_eq!(ids(&replayed), vec!["u2"]);
    assert_eq!(*replayed, *applied);
}

#[test]
fn compaction_echo_during_replay_window_keeps_only_the_summary() {
    let events = [
        user("u1", "old question", 100),
        start("a1", "model-a", 110),
        delta("a1", "old answer"),
        end("a1"),
        WorkspaceEvent::Delete {
            message_ids: vec!["u1".into(), "a1".into()],
        },
        WorkspaceEvent::Message(WorkspaceMessage::assistant("s1", "summary").with_timestamp(120)),
    ];
    let (replayed, applied) = replay_both(&events);
    assert_eq!(ids(&replayed), vec!["s1"]);
    assert_eq!(*replayed, *applied);
}

#[test]
fn stream_error_during_replay_window_ends_the_queued_stream() {
    let events = [
        user("u1", "hi", 100),
        start("a1", "model-a", 110),
        delta("a1", "partial"),
        WorkspaceEvent::StreamError {
            message_id: "a1".into(),
            error: "overloaded".into(),
            error_type: Some("server".into()),
        },
    ];
    let (replayed, applied) = replay_both(&events);
    assert!(!replayed.can_interrupt);
    assert!(!replayed.sidebar().can_interrupt);
    assert_eq!(replayed.raw_messages[1].text(), "partial");
    assert_eq!(replayed.last_error.as_ref().map(|e| e.attempts), Some(1));
    assert_eq!(*replayed, *applied);
}

#[test]
fn error_is_visible_before_caught_up_and_kept_after() {
    let harness = Harness::new();
    harness.register("w1");
    harness.send_all(
        "w1",
        [
            start("a1", "model-a", 110),
            WorkspaceEvent::StreamError {
                message_id: "a1".into(),
                error: "overloaded".into(),
                error_type: None,
            },
        ],
    );
    assert!(harness.store.get_state("w1").unwrap().last_error.is_some());

    harness.send("w1", WorkspaceEvent::CaughtUp);
    let state = harness.store.get_state("w1").unwrap();
    assert_eq!(ids(&state), vec!["a1"]);
    assert_eq!(state.raw_messages[0].metadata.timestamp, Some(110));
    assert!(!state.can_interrupt);
    assert!(state.last_error.is_some());
}

#[test]
fn plain_messages_are_loaded_before_replayed_stream_output() {
    let events = [
        start("a1", "model-a", 110),
        delta("a1", "working"),
        user("u2", "also this", 120),
    ];
    let (replayed, applied) = replay_both(&events);

    // History is loaded as one batch at caught-up, ahead of the queue.
    assert_eq!(ids(&replayed), vec!["u2", "a1"]);
    assert_eq!(ids(&applied), vec!["a1", "u2"]);

    assert_eq!(replayed.can_interrupt, applied.can_interrupt);
    assert_eq!(replayed.current_model, applied.current_model);
    assert_eq!(replayed.recency_timestamp, applied.recency_timestamp);
    assert_eq!(replayed.raw_messages[1], applied.raw_messages[0]);
}
