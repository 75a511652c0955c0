use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured errors surfaced by the workspace store.
///
/// Nothing on the event-processing path returns these to the transport: they
/// are produced by fallible helpers and logged at the ingest boundary. Library
/// callers that do see them (building a store, raw event parsing) can match
/// on the variant to decide recovery.
#[derive(Debug, Error)]
pub enum StoreError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Transport ───────────────────────────────────────────────────────
    #[error("transport {operation} failed for workspace {workspace_id}: {message}")]
    Transport {
        workspace_id: String,
        operation: &'static str,
        message: String,
    },

    // ── Inbound events ──────────────────────────────────────────────────
    #[error("malformed event for workspace {workspace_id}: {reason}")]
    MalformedEvent {
        workspace_id: String,
        reason: String,
    },

    // ── Compaction ──────────────────────────────────────────────────────
    #[error("history replacement failed for workspace {workspace_id}: {message}")]
    HistoryReplace {
        workspace_id: String,
        message: String,
    },
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn malformed(workspace_id: &str, reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            workspace_id: workspace_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn transport(workspace_id: &str, operation: &'static str, err: &anyhow::Error) -> Self {
        Self::Transport {
            workspace_id: workspace_id.to_string(),
            operation,
            message: format!("{err:#}"),
        }
    }
}
