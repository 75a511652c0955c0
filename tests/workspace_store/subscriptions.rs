use std::time::Duration;

use futures_util::{StreamExt, stream};
use iris_workspaces::cache::SIDEBAR_KEY;
use iris_workspaces::WorkspaceEvent;
use tokio_test::{assert_pending, assert_ready, task};

use super::store_harness::{Harness, delta, start, user};

#[test]
fn consumers_are_woken_not_called() {
    let harness = Harness::new();
    harness.register_live("w1");
    let mut watch = harness.store.watch("w1");

    let mut changed = task::spawn(watch.changed());
    assert_pending!(changed.poll());

    harness.send("w1", user("u1", "hello", 1));
    // Delivery only woke the consumer; nothing of it ran yet.
    assert!(changed.is_woken());
    assert!(assert_ready!(changed.poll()));
}

#[test]
fn watch_ignores_other_workspaces() {
    let harness = Harness::new();
    harness.register_live("w1");
    harness.register_live("w2");
    let watch = harness.store.watch("w1");

    harness.send("w2", user("u1", "elsewhere", 1));
    assert!(!watch.has_changed());
    harness.send("w1", user("u2", "here", 2));
    assert!(watch.has_changed());
}

#[test]
fn watch_all_tracks_membership_and_content() {
    let harness = Harness::new();
    let watch = harness.store.watch_all();
    let sidebar = harness.store.watch_aggregate(SIDEBAR_KEY);

    harness.register("w1");
    assert!(watch.has_changed());
    assert!(sidebar.has_changed());

    let version = watch.version();
    harness.send("w1", WorkspaceEvent::CaughtUp);
    assert!(watch.version() > version);

    let version = watch.version();
    harness.store.remove_session("w1");
    assert!(watch.version() > version);
}

#[test]
fn deferred_events_do_not_notify() {
    let harness = Harness::new();
    harness.register("w1");
    let watch = harness.store.watch("w1");

    harness.send("w1", start("a1", "m", 1));
    harness.send("w1", delta("a1", "queued"));
    assert!(!watch.has_changed());

    harness.send("w1", WorkspaceEvent::CaughtUp);
    assert!(watch.has_changed());
}

#[tokio::test]
async fn state_stream_follows_changes() {
    let harness = Harness::new();
    harness.register_live("w1");
    let mut changes = harness.store.watch("w1").into_stream();

    harness.send("w1", user("u1", "one", 1));
    let first = tokio::time::timeout(Duration::from_secs(1), changes.next())
        .await
        .expect("change")
        .expect("open");
    assert!(first > 0);
    assert_eq!(
        harness.store.get_state("w1").unwrap().raw_messages.len(),
        1
    );
}

#[tokio::test]
async fn ingest_applies_a_stream_in_order() {
    let harness = Harness::new();
    harness.register("w1");
    harness.register("w2");

    let events = vec![
        ("w1".to_string(), start("a1", "m", 1)),
        ("w2".to_string(), WorkspaceEvent::CaughtUp),
        ("w1".to_string(), delta("a1", "ab")),
        ("w1".to_string(), delta("a1", "cd")),
        ("w1".to_string(), WorkspaceEvent::CaughtUp),
    ];
    let handled = harness.store.ingest(stream::iter(events)).await;

    assert_eq!(handled, 5);
    assert_eq!(
        harness.store.get_state("w1").unwrap().raw_messages[0].text(),
        "abcd"
    );
    assert_eq!(harness.store.is_caught_up("w2"), Some(true));
}

#[tokio::test]
async fn notices_report_stream_lifecycle() {
    let harness = Harness::new();
    let mut notices = harness.store.notices();
    harness.register_live("w1");
    harness.send("w1", start("a1", "m", 1));
    harness.send(
        "w1",
        WorkspaceEvent::StreamAbort {
            message_id: "a1".into(),
        },
    );

    let kinds: Vec<String> = super::store_harness::drain(&mut notices)
        .iter()
        .map(|n| serde_json::to_value(n).unwrap()["kind"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(kinds, vec!["retry_reset", "resume_check"]);
}
