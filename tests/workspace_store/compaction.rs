use std::sync::Arc;

use iris_workspaces::config::{CompactionConfig, StoreConfig};
use iris_workspaces::transport::{SkipReason, StoreNotice};
use iris_workspaces::WorkspaceEvent;
use tokio::sync::Notify;

use super::store_harness::{
    Harness, ScriptedReplacer, abort, compaction_request, delta, drain, end, end_with_text,
    start, user,
};

fn compacting(harness: &Harness) {
    harness.register_live("w1");
    harness.send_all(
        "w1",
        [
            user("u0", "refactor the parser", 100),
            start("a0", "model-a", 110),
            delta("a0", "done"),
            end("a0"),
            compaction_request("u1", 200),
            start("a1", "model-a", 210),
        ],
    );
    assert!(harness.store.get_state("w1").unwrap().is_compacting);
}

#[tokio::test]
async fn duplicate_stream_end_replaces_history_once() {
    let harness = Harness::new();
    let mut notices = harness.store.notices();
    compacting(&harness);

    harness.send("w1", delta("a1", "Parser refactor summary."));
    harness.send("w1", end("a1"));
    harness.send("w1", end_with_text("a1", "Parser refactor summary."));
    harness.store.flush_pending().await;

    let calls = harness.replacer.calls();
    assert_eq!(calls.len(), 1);
    let (workspace_id, summary) = &calls[0];
    assert_eq!(workspace_id, "w1");
    assert_eq!(summary.text(), "Parser refactor summary.");
    assert!(summary.metadata.compacted);
    assert_eq!(
        summary.metadata.continue_message.as_deref(),
        Some("Carry on with the refactor")
    );

    let finalized = drain(&mut notices)
        .into_iter()
        .filter(|n| matches!(n, StoreNotice::CompactionFinalized { .. }))
        .count();
    assert_eq!(finalized, 1);
    assert!(!harness.store.get_state("w1").unwrap().is_compacting);
}

#[tokio::test]
async fn abort_with_matching_marker_never_replaces() {
    let harness = Harness::new();
    let mut notices = harness.store.notices();
    compacting(&harness);
    harness.markers.mark("w1", "u1");

    harness.send("w1", delta("a1", "half a sum"));
    harness.send("w1", abort("a1"));
    harness.store.flush_pending().await;

    assert_eq!(harness.replacer.count(), 0);
    assert!(harness.markers.get("w1").is_none());
    let notices = drain(&mut notices);
    assert!(notices.contains(&StoreNotice::CompactionSkipped {
        workspace_id: "w1".into(),
        request_id: "u1".into(),
        reason: SkipReason::Cancelled,
    }));
    assert!(
        notices
            .iter()
            .any(|n| matches!(n, StoreNotice::ResumeCheck { .. }))
    );
}

#[tokio::test]
async fn abort_without_marker_keeps_truncated_summary() {
    let harness = Harness::new();
    compacting(&harness);
    harness.markers.mark("w1", "stale-request");

    harness.send("w1", delta("a1", "Parser work so far"));
    harness.send("w1", abort("a1"));
    harness.store.flush_pending().await;

    let calls = harness.replacer.calls();
    assert_eq!(calls.len(), 1);
    let text = calls[0].1.text();
    assert!(text.starts_with("Parser work so far"));
    assert!(text.ends_with(&CompactionConfig::default().truncation_sentinel));
}

#[tokio::test]
async fn write_back_keeps_compacting_until_replace_returns() {
    let gate = Arc::new(Notify::new());
    let harness = Harness::with_replacer(ScriptedReplacer::gated(Arc::clone(&gate)));
    compacting(&harness);

    harness.send("w1", delta("a1", "summary"));
    harness.send("w1", end("a1"));

    // Replacement is parked on the gate; readers see the stale transcript.
    tokio::task::yield_now().await;
    let state = harness.store.get_state("w1").unwrap();
    assert!(state.is_compacting);
    assert!(!state.can_interrupt);
    assert_eq!(state.raw_messages.len(), 4);

    gate.notify_one();
    harness.store.flush_pending().await;
    assert_eq!(harness.replacer.count(), 1);
    assert!(!harness.store.get_state("w1").unwrap().is_compacting);
    assert!(!harness.store.get_sidebar_states()["w1"].is_compacting);
}

#[tokio::test]
async fn failed_write_back_is_reported_and_not_retried() {
    let harness = Harness::with_replacer(ScriptedReplacer::failing());
    let mut notices = harness.store.notices();
    compacting(&harness);

    harness.send("w1", delta("a1", "summary"));
    harness.send("w1", end("a1"));
    harness.store.flush_pending().await;
    harness.send("w1", end("a1"));
    harness.store.flush_pending().await;

    assert_eq!(harness.replacer.count(), 1);
    let failures: Vec<StoreNotice> = drain(&mut notices)
        .into_iter()
        .filter(|n| matches!(n, StoreNotice::CompactionFailed { .. }))
        .collect();
    assert_eq!(failures.len(), 1);

    // The folded transcript stays authoritative.
    let state = harness.store.get_state("w1").unwrap();
    assert!(!state.is_compacting);
    assert_eq!(state.raw_messages.len(), 4);
}

#[tokio::test]
async fn empty_summaries_are_retried_then_abandoned() {
    let harness = Harness::with_config(StoreConfig {
        compaction: CompactionConfig {
            max_extraction_attempts: 2,
            ..CompactionConfig::default()
        },
        ..StoreConfig::default()
    });
    let mut notices = harness.store.notices();
    compacting(&harness);

    harness.send("w1", end("a1"));
    harness.send("w1", end("a1"));
    harness.send("w1", end_with_text("a1", "too late"));
    harness.store.flush_pending().await;

    assert_eq!(harness.replacer.count(), 0);
    let notices: Vec<StoreNotice> = drain(&mut notices)
        .into_iter()
        .filter(|n| {
            matches!(
                n,
                StoreNotice::CompactionSkipped { .. } | StoreNotice::CompactionFailed { .. }
            )
        })
        .collect();
    assert!(matches!(
        notices.as_slice(),
        [
            StoreNotice::CompactionSkipped {
                reason: SkipReason::EmptySummary,
                ..
            },
            StoreNotice::CompactionFailed { .. },
        ]
    ));
}

#[tokio::test]
async fn echoed_replacement_collapses_transcript() {
    let harness = Harness::new();
    compacting(&harness);
    harness.send("w1", delta("a1", "Everything so far."));
    harness.send("w1", end("a1"));
    harness.store.flush_pending().await;

    let (_, summary) = harness.replacer.calls().remove(0);
    let doomed = harness
        .store
        .get_state("w1")
        .unwrap()
        .raw_messages
        .iter()
        .map(|m| m.id.clone())
        .collect();
    harness.send("w1", WorkspaceEvent::Delete { message_ids: doomed });
    harness.send("w1", WorkspaceEvent::Message(summary.clone()));

    let state = harness.store.get_state("w1").unwrap();
    assert_eq!(state.raw_messages, vec![summary.clone()]);
    assert_eq!(state.recency_timestamp, summary.metadata.timestamp);
    assert!(!state.is_compacting);
}
