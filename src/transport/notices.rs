use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Why a compaction ended without replacing history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    /// The user cancelled the summary stream.
    Cancelled,
    /// The summary stream produced no text; a later signal may retry.
    EmptySummary,
}

/// Side effects of event processing, for collaborators outside the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreNotice {
    /// A stream was aborted; the resume logic should look at the workspace.
    ResumeCheck { workspace_id: String },
    /// A new stream started; retry bookkeeping was reset.
    RetryReset { workspace_id: String },
    CompactionFinalized {
        workspace_id: String,
        request_id: String,
        truncated: bool,
    },
    CompactionSkipped {
        workspace_id: String,
        request_id: String,
        reason: SkipReason,
    },
    CompactionFailed {
        workspace_id: String,
        request_id: String,
        message: String,
    },
}

impl StoreNotice {
    pub fn workspace_id(&self) -> &str {
        match self {
            Self::ResumeCheck { workspace_id }
            | Self::RetryReset { workspace_id }
            | Self::CompactionFinalized { workspace_id, .. }
            | Self::CompactionSkipped { workspace_id, .. }
            | Self::CompactionFailed { workspace_id, .. } => workspace_id,
        }
    }
}

pub type NoticeSender = broadcast::Sender<StoreNotice>;
pub type NoticeReceiver = broadcast::Receiver<StoreNotice>;

/// Create a broadcast notice bus with the given capacity.
pub fn notice_bus(capacity: usize) -> (NoticeSender, NoticeReceiver) {
    broadcast::channel(capacity)
}
