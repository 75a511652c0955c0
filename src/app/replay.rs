use anyhow::{Context, Result};
use iris_workspaces::events::parse_event;
use iris_workspaces::transport::{ChannelTransport, RecordingHistoryReplacer, StoreNotice};
use iris_workspaces::utils::text::is_blank;
use iris_workspaces::{DerivedSessionState, StoreConfig, WorkspaceMeta, WorkspaceStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::TryRecvError;

#[derive(Debug, Deserialize)]
struct ReplayRecord {
    workspace_id: String,
    event: serde_json::Value,
}

/// Outcome of one replay run, printed as JSON.
#[derive(Debug, Serialize)]
pub struct ReplayReport {
    pub events: usize,
    pub skipped_lines: usize,
    pub workspaces: BTreeMap<String, DerivedSessionState>,
    pub replaced_histories: usize,
    pub notices: Vec<StoreNotice>,
}

/// Replay the JSONL log at `path` through a fresh store.
///
/// Every workspace id seen in the log is registered before its first event
/// is delivered through an in-process transport.
pub async fn replay_file(path: &Path, config: StoreConfig) -> Result<ReplayReport> {
    let file = File::open(path)
        .await
        .with_context(|| format!("Failed to open event log {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();

    let transport = Arc::new(ChannelTransport::new());
    let replacer = Arc::new(RecordingHistoryReplacer::new());
    let store = WorkspaceStore::builder(transport.clone(), replacer.clone())
        .config(config)
        .build()?;
    let mut notice_rx = store.notices();

    let mut events = 0;
    let mut skipped_lines = 0;
    let mut line_number = 0;
    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if is_blank(&line) {
            continue;
        }
        let record: ReplayRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(line = line_number, %error, "Skipping malformed line");
                skipped_lines += 1;
                continue;
            }
        };
        let event = match parse_event(&record.workspace_id, record.event) {
            Ok(event) => event,
            Err(error) => {
                tracing::warn!(line = line_number, %error, "Skipping malformed event");
                skipped_lines += 1;
                continue;
            }
        };
        if !store.is_registered(&record.workspace_id) {
            store.add_session(WorkspaceMeta::new(record.workspace_id.clone()));
        }
        transport.deliver(&record.workspace_id, event);
        events += 1;
    }

    store.flush_pending().await;

    let mut notices = Vec::new();
    loop {
        match notice_rx.try_recv() {
            Ok(notice) => notices.push(notice),
            Err(TryRecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Notice bus overflowed during replay");
            }
            Err(_) => break,
        }
    }

    let all = store.get_all_states();
    let workspaces = all
        .0
        .iter()
        .map(|(id, state)| (id.clone(), DerivedSessionState::clone(state)))
        .collect();

    Ok(ReplayReport {
        events,
        skipped_lines,
        workspaces,
        replaced_histories: replacer.count(),
        notices,
    })
}
