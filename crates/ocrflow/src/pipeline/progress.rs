//! Durable progress checkpoints plus a live event stream.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::aggregate::Aggregate;
use crate::error::RegistryError;
use crate::job::{ExtractionJob, JobPhase, JobStatus, JobUpdate};
use crate::registry::JobRegistry;

pub const CONVERTING_PROGRESS: u8 = 5;
pub const EXTRACTING_PROGRESS: u8 = 10;
pub const AGGREGATING_PROGRESS: u8 = 95;
pub const COMPLETED_PROGRESS: u8 = 100;

/// Progress after wave `wave` of `total_waves` has settled.
pub fn wave_progress(wave: usize, total_waves: usize) -> u8 {
    if total_waves == 0 {
        return AGGREGATING_PROGRESS;
    }
    let span = (AGGREGATING_PROGRESS - EXTRACTING_PROGRESS) as usize;
    let done = wave.min(total_waves);
    EXTRACTING_PROGRESS + (span * done / total_waves) as u8
}

/// Text shown while an attempt is still running.
pub fn annotate_partial(wave: usize, total_waves: usize, partial: &str) -> String {
    format!(
        "[Processing wave {} of {}]\n\n{}",
        wave, total_waves, partial
    )
}

/// A state change of one attempt. Text is left out; it can be large and is
/// available from the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionEvent {
    pub job_id: String,
    pub attempt: u32,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub progress: u8,
    pub message: String,
    pub failed_batches: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

impl ExtractionEvent {
    pub fn from_job(job: &ExtractionJob) -> Self {
        Self {
            job_id: job.id.clone(),
            attempt: job.attempt,
            status: job.status,
            phase: job.phase,
            progress: job.progress,
            message: job.message.clone(),
            failed_batches: job.failed_batches,
            page_count: job.page_count,
            timestamp: job.updated_at,
        }
    }
}

/// Fan-out of extraction events to any number of subscribers.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    sender: Arc<broadcast::Sender<ExtractionEvent>>,
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: ExtractionEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExtractionEvent> {
        self.sender.subscribe()
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Writes the progress of a single attempt.
///
/// Checkpoints are best effort: a failed write is logged and the attempt
/// carries on. Terminal writes are returned to the caller.
pub struct ProgressTracker {
    registry: Arc<JobRegistry>,
    broadcaster: ProgressBroadcaster,
    job_id: String,
    attempt: u32,
}

impl ProgressTracker {
    pub fn new(
        registry: Arc<JobRegistry>,
        broadcaster: ProgressBroadcaster,
        job_id: &str,
        attempt: u32,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            job_id: job_id.to_string(),
            attempt,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Rasterization has started. The attempt stays `Pending`.
    pub fn converting(&self) {
        self.checkpoint(JobUpdate::new(
            JobStatus::Pending,
            JobPhase::Converting,
            CONVERTING_PROGRESS,
            "converting",
        ));
    }

    /// Pages are ready; this is the write that makes the attempt `Processing`.
    /// Fails with `AttemptInFlight` if another run already claimed it.
    pub fn extracting(&self, page_count: usize) -> Result<ExtractionJob, RegistryError> {
        let job = self.registry.claim(
            &self.job_id,
            self.attempt,
            JobUpdate::new(
                JobStatus::Processing,
                JobPhase::ExtractingText,
                EXTRACTING_PROGRESS,
                "extracting text",
            )
            .with_page_count(page_count),
        )?;
        self.broadcaster.send(ExtractionEvent::from_job(&job));
        Ok(job)
    }

    /// Checkpoint after a settled wave. `partial` is the page-ordered text of
    /// every batch attempted so far.
    pub fn wave(&self, wave: usize, total_waves: usize, partial: &str, failed_batches: usize) {
        self.checkpoint(
            JobUpdate::new(
                JobStatus::Processing,
                JobPhase::ExtractingText,
                wave_progress(wave, total_waves),
                format!("processing wave {} of {}", wave, total_waves),
            )
            .with_extracted_text(annotate_partial(wave, total_waves, partial))
            .with_partial_text(partial)
            .with_failed_batches(failed_batches),
        );
    }

    pub fn aggregating(&self) {
        self.checkpoint(JobUpdate::new(
            JobStatus::Processing,
            JobPhase::Aggregating,
            AGGREGATING_PROGRESS,
            "aggregating",
        ));
    }

    pub fn completed(&self, aggregate: &Aggregate) -> Result<ExtractionJob, RegistryError> {
        let message = if aggregate.failed_batches == 0 {
            "completed".to_string()
        } else {
            format!(
                "completed with {} of {} batches failed",
                aggregate.failed_batches, aggregate.total_batches
            )
        };
        self.record(
            JobUpdate::new(
                JobStatus::Completed,
                JobPhase::Completed,
                COMPLETED_PROGRESS,
                message,
            )
            .with_extracted_text(aggregate.text.clone())
            .with_failed_batches(aggregate.failed_batches),
        )
    }

    /// Terminal failure. `partial` replaces the checkpointed text when given;
    /// otherwise whatever was checkpointed stays.
    pub fn failed(
        &self,
        diagnostic: &str,
        partial: Option<String>,
        failed_batches: Option<usize>,
    ) -> Result<ExtractionJob, RegistryError> {
        let mut update = JobUpdate::new(JobStatus::Failed, JobPhase::Failed, 0, diagnostic)
            .with_extracted_text(diagnostic);
        if let Some(partial) = partial {
            update = update.with_partial_text(partial);
        }
        if let Some(failed) = failed_batches {
            update = update.with_failed_batches(failed);
        }
        self.record(update)
    }

    fn checkpoint(&self, update: JobUpdate) -> Option<ExtractionJob> {
        match self.record(update) {
            Ok(job) => Some(job),
            Err(e) => {
                warn!(
                    "Checkpoint for job {} attempt {} not recorded: {}",
                    self.job_id, self.attempt, e
                );
                None
            }
        }
    }

    fn record(&self, update: JobUpdate) -> Result<ExtractionJob, RegistryError> {
        let job = self.registry.update(&self.job_id, self.attempt, update)?;
        self.broadcaster.send(ExtractionEvent::from_job(&job));
        Ok(job)
    }
}
