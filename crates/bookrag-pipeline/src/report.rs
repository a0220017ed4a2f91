//! Run accounting: what stage the run reached and what it dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bookrag_core::FailureKind;

use crate::validator::ValidationSummary;

/// Coarse pipeline state. Per-URL work fans out inside `Ingesting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Discovering,
    Ingesting,
    Validating,
    Done,
    Failed,
}

/// One skipped or dropped unit of work, kept for the final summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub url: String,
    pub kind: FailureKind,
    pub detail: String,
}

/// Summary of one ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub stage: RunStage,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub urls_discovered: usize,
    pub documents_stored: usize,
    pub documents_skipped: usize,
    pub chunks_stored: usize,
    pub failures: Vec<FailureRecord>,
    pub validation: Option<ValidationSummary>,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            stage: RunStage::Discovering,
            started_at: Utc::now(),
            finished_at: None,
            urls_discovered: 0,
            documents_stored: 0,
            documents_skipped: 0,
            chunks_stored: 0,
            failures: Vec::new(),
            validation: None,
        }
    }

    pub fn record_failure(&mut self, url: impl Into<String>, kind: FailureKind, detail: String) {
        self.failures.push(FailureRecord {
            url: url.into(),
            kind,
            detail,
        });
    }

    pub fn finish(&mut self, stage: RunStage) {
        self.stage = stage;
        self.finished_at = Some(Utc::now());
    }

    /// A run succeeds when it completed, dropped nothing, and every
    /// validation probe passed (or validation produced no probes).
    pub fn is_success(&self) -> bool {
        self.stage == RunStage::Done
            && self.failures.is_empty()
            && self.validation.as_ref().map(|v| v.passed).unwrap_or(true)
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}
