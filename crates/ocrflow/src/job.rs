//! Extraction job record and its lifecycle rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of one extraction attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Returns true for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Forward-only transition table for a single attempt.
    ///
    /// `Pending -> Pending` and `Processing -> Processing` are annotation
    /// writes (phase, progress, partial text) that leave the status alone.
    /// Nothing leaves a terminal status; going back to `Pending` requires a
    /// new attempt.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Pending)
                | (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "Pending"),
            JobStatus::Processing => write!(f, "Processing"),
            JobStatus::Completed => write!(f, "Completed"),
            JobStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Finer-grained step within an attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Converting,
    ExtractingText,
    Aggregating,
    Completed,
    Failed,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Queued => "queued",
            JobPhase::Converting => "converting",
            JobPhase::ExtractingText => "extracting_text",
            JobPhase::Aggregating => "aggregating",
            JobPhase::Completed => "completed",
            JobPhase::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobPhase::Queued),
            "converting" => Some(JobPhase::Converting),
            "extracting_text" => Some(JobPhase::ExtractingText),
            "aggregating" => Some(JobPhase::Aggregating),
            "completed" => Some(JobPhase::Completed),
            "failed" => Some(JobPhase::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Queued => write!(f, "Queued"),
            JobPhase::Converting => write!(f, "Converting"),
            JobPhase::ExtractingText => write!(f, "Extracting text"),
            JobPhase::Aggregating => write!(f, "Aggregating"),
            JobPhase::Completed => write!(f, "Completed"),
            JobPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// How a caller asks for another attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    /// Retry a failed attempt.
    Retry,
    /// Run a completed job again, discarding its current text.
    Reextract,
}

/// One attempt at extracting text from a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionJob {
    /// Stable identifier shared by every attempt for the same document.
    pub id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub source_ref: String,
    pub status: JobStatus,
    pub phase: JobPhase,
    /// Percentage, never decreases within an attempt.
    pub progress: u8,
    pub message: String,
    /// Progress-annotated partial text while processing, the final text on
    /// completion, or a diagnostic on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    /// Raw text of the waves checkpointed so far. Kept after failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_text: Option<String>,
    pub has_extracted_text: bool,
    pub failed_batches: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExtractionJob {
    /// Creates the first attempt for a new document.
    pub fn new(source_ref: &str) -> Self {
        Self::fresh(uuid::Uuid::new_v4().to_string(), 1, source_ref.to_string())
    }

    /// Builds the attempt that supersedes this one. Nothing but the identity
    /// and source reference is carried over.
    pub fn next_attempt(&self) -> Self {
        Self::fresh(self.id.clone(), self.attempt + 1, self.source_ref.clone())
    }

    fn fresh(id: String, attempt: u32, source_ref: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            attempt,
            source_ref,
            status: JobStatus::Pending,
            phase: JobPhase::Queued,
            progress: 0,
            message: "queued".to_string(),
            extracted_text: None,
            partial_text: None,
            has_extracted_text: false,
            failed_batches: 0,
            page_count: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies an already-validated update.
    pub(crate) fn apply(&mut self, update: JobUpdate, now: DateTime<Utc>) {
        self.status = update.status;
        self.phase = update.phase;
        self.progress = self.progress.max(update.progress.min(100));
        self.message = update.message;

        if let Some(text) = update.extracted_text {
            self.extracted_text = Some(text);
        }
        if let Some(text) = update.partial_text {
            self.partial_text = Some(text);
        }
        if let Some(count) = update.page_count {
            self.page_count = Some(count);
        }
        if let Some(failed) = update.failed_batches {
            self.failed_batches = failed;
        }

        self.has_extracted_text = self.status == JobStatus::Completed
            && self
                .extracted_text
                .as_deref()
                .is_some_and(|t| !t.trim().is_empty());

        if self.status.is_terminal() {
            self.completed_at = Some(now);
        }
        self.updated_at = now;
    }
}

/// A single durable write against an attempt.
///
/// Text and counter fields are only replaced when set.
#[derive(Debug, Clone)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub phase: JobPhase,
    pub progress: u8,
    pub message: String,
    pub extracted_text: Option<String>,
    pub partial_text: Option<String>,
    pub page_count: Option<usize>,
    pub failed_batches: Option<usize>,
}

impl JobUpdate {
    pub fn new(status: JobStatus, phase: JobPhase, progress: u8, message: impl Into<String>) -> Self {
        Self {
            status,
            phase,
            progress,
            message: message.into(),
            extracted_text: None,
            partial_text: None,
            page_count: None,
            failed_batches: None,
        }
    }

    pub fn with_extracted_text(mut self, text: impl Into<String>) -> Self {
        self.extracted_text = Some(text.into());
        self
    }

    pub fn with_partial_text(mut self, text: impl Into<String>) -> Self {
        self.partial_text = Some(text.into());
        self
    }

    pub fn with_page_count(mut self, count: usize) -> Self {
        self.page_count = Some(count);
        self
    }

    pub fn with_failed_batches(mut self, failed: usize) -> Self {
        self.failed_batches = Some(failed);
        self
    }
}
