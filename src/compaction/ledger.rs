use std::collections::{HashMap, HashSet};

/// What to do after a summary could not be extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionVerdict {
    /// Leave the request open; a later duplicate signal may succeed.
    Retry { attempt: u32 },
    /// Attempts exhausted; the request is closed without finalizing.
    Abandon { attempts: u32 },
}

/// Idempotency record of compaction requests for one workspace.
#[derive(Debug, Default)]
pub struct CompactionLedger {
    finalized: HashSet<String>,
    abandoned: HashSet<String>,
    failed_extractions: HashMap<String, u32>,
}

impl CompactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finalized or abandoned: no further finalization may happen.
    pub fn is_settled(&self, request_id: &str) -> bool {
        self.finalized.contains(request_id) || self.abandoned.contains(request_id)
    }

    pub fn is_finalized(&self, request_id: &str) -> bool {
        self.finalized.contains(request_id)
    }

    pub fn is_abandoned(&self, request_id: &str) -> bool {
        self.abandoned.contains(request_id)
    }

    /// Claim `request_id` for finalization. Returns `false` if it was already
    /// settled, in which case the caller must not finalize.
    pub fn claim(&mut self, request_id: &str) -> bool {
        if self.is_settled(request_id) {
            return false;
        }
        self.failed_extractions.remove(request_id);
        self.finalized.insert(request_id.to_string())
    }

    pub fn record_failed_extraction(&mut self, request_id: &str, max_attempts: u32) -> ExtractionVerdict {
        let attempts = self
            .failed_extractions
            .entry(request_id.to_string())
            .or_insert(0);
        *attempts += 1;
        let attempt = *attempts;
        if attempt >= max_attempts {
            self.failed_extractions.remove(request_id);
            self.abandoned.insert(request_id.to_string());
            ExtractionVerdict::Abandon { attempts: attempt }
        } else {
            ExtractionVerdict::Retry { attempt }
        }
    }

    pub fn finalized_count(&self) -> usize {
        self.finalized.len()
    }
}
