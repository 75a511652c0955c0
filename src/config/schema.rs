use serde::{Deserialize, Serialize};

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub buffer: BufferConfig,

    #[serde(default)]
    pub compaction: CompactionConfig,

    #[serde(default)]
    pub notices: NoticeConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            buffer: BufferConfig::default(),
            compaction: CompactionConfig::default(),
            notices: NoticeConfig::default(),
        }
    }
}

// ── Pre-checkpoint buffering ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Maximum stream/tool/reasoning events queued per workspace before
    /// caught-up. The oldest queued event is dropped on overflow.
    #[serde(default = "default_max_pending_events")]
    pub max_pending_events: usize,
}

fn default_max_pending_events() -> usize {
    10_000
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_pending_events: default_max_pending_events(),
        }
    }
}

// ── Compaction ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Appended to a summary the user accepted before the stream finished.
    #[serde(default = "default_truncation_sentinel")]
    pub truncation_sentinel: String,
    /// Failed summary extractions tolerated per request before it is abandoned.
    #[serde(default = "default_max_extraction_attempts")]
    pub max_extraction_attempts: u32,
}

fn default_truncation_sentinel() -> String {
    "\n\n[truncated]".into()
}
fn default_max_extraction_attempts() -> u32 {
    3
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            truncation_sentinel: default_truncation_sentinel(),
            max_extraction_attempts: default_max_extraction_attempts(),
        }
    }
}

// ── Notice bus ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticeConfig {
    /// Broadcast capacity; slow receivers lag past this many notices.
    #[serde(default = "default_notice_capacity")]
    pub capacity: usize,
}

fn default_notice_capacity() -> usize {
    256
}

impl Default for NoticeConfig {
    fn default() -> Self {
        Self {
            capacity: default_notice_capacity(),
        }
    }
}
