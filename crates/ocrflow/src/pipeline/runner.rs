use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::aggregate::{concatenate, concatenate_slots, Aggregator};
use crate::batch::partition;
use crate::config::Config;
use crate::error::{ExtractionError, OcrflowError, RegistryError};
use crate::job::{ExtractionJob, JobStatus};
use crate::ocr::{
    BatchResult, CancellationFlag, DispatchOutcome, Dispatcher, HttpOcrService, OcrService,
};
use crate::raster::{Page, RasterizerRegistry};
use crate::registry::JobRegistry;
use crate::source::{DocumentSource, FsDocumentSource};

use super::config::{http_ocr_settings, PipelineConfig};
use super::progress::{ExtractionEvent, ProgressBroadcaster, ProgressTracker};

/// Why an attempt ended early, with whatever text it had gathered.
struct AttemptFailure {
    error: ExtractionError,
    partial_text: Option<String>,
    failed_batches: Option<usize>,
}

impl From<ExtractionError> for AttemptFailure {
    fn from(error: ExtractionError) -> Self {
        Self {
            error,
            partial_text: None,
            failed_batches: None,
        }
    }
}

fn count_failed<'a>(results: impl IntoIterator<Item = &'a BatchResult>) -> usize {
    results.into_iter().filter(|r| !r.is_success()).count()
}

pub struct ExtractionPipeline {
    config: Arc<PipelineConfig>,
    registry: Arc<JobRegistry>,
    source: Arc<dyn DocumentSource>,
    rasterizers: Arc<RasterizerRegistry>,
    dispatcher: Dispatcher,
    aggregator: Aggregator,
    broadcaster: ProgressBroadcaster,
    running: Mutex<HashMap<String, CancellationFlag>>,
}

impl ExtractionPipeline {
    /// Builds a pipeline from explicit parts.
    pub fn new(
        config: Arc<PipelineConfig>,
        registry: Arc<JobRegistry>,
        source: Arc<dyn DocumentSource>,
        rasterizers: RasterizerRegistry,
        ocr: Arc<dyn OcrService>,
    ) -> Self {
        let dispatcher = Dispatcher::new(ocr, config.dispatch.clone());
        let aggregator = Aggregator::new(config.predicate());
        Self {
            config,
            registry,
            source,
            rasterizers: Arc::new(rasterizers),
            dispatcher,
            aggregator,
            broadcaster: ProgressBroadcaster::default(),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Production constructor: HTTP OCR service, filesystem source and the
    /// default rasterizers, all from config.
    pub fn from_config(config: &Config, registry: Arc<JobRegistry>) -> Result<Self, OcrflowError> {
        let pipeline_config = Arc::new(PipelineConfig::from_config(config));
        let ocr = HttpOcrService::new(http_ocr_settings(&config.ocr)?)?;
        let source = FsDocumentSource::new(pipeline_config.source_root.clone());

        Ok(Self::new(
            pipeline_config,
            registry,
            Arc::new(source),
            RasterizerRegistry::new(),
            Arc::new(ocr),
        ))
    }

    /// Replaces the event channel, e.g. to share one across pipelines.
    pub fn with_broadcaster(mut self, broadcaster: ProgressBroadcaster) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ExtractionEvent> {
        self.broadcaster.subscribe()
    }

    /// Asks a running attempt to stop before its next wave. Returns `false`
    /// when the job is not running in this pipeline.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.lock_running().get(job_id) {
            Some(flag) => {
                info!("Cancellation requested for job {}", job_id);
                flag.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.lock_running().contains_key(job_id)
    }

    /// Runs the current attempt of a pending job to a terminal state.
    ///
    /// Returns the completed job, or the error that failed the attempt. In
    /// both cases the terminal state has been written to the registry.
    /// A job already running elsewhere is rejected with `AttemptInFlight`
    /// and left untouched.
    pub async fn run(&self, job_id: &str) -> Result<ExtractionJob, ExtractionError> {
        let _lease = self.registry.lease(job_id)?;
        let job = self.registry.get(job_id)?;
        match job.status {
            JobStatus::Pending => {}
            JobStatus::Processing => {
                return Err(RegistryError::AttemptInFlight {
                    job_id: job.id,
                    attempt: job.attempt,
                }
                .into());
            }
            status => {
                return Err(RegistryError::InvalidTransition {
                    job_id: job.id,
                    from: status,
                    to: JobStatus::Processing,
                }
                .into());
            }
        }

        let cancel = CancellationFlag::new();
        self.lock_running().insert(job_id.to_string(), cancel.clone());
        let _running = RunningGuard {
            running: &self.running,
            job_id: job_id.to_string(),
        };

        let tracker = ProgressTracker::new(
            Arc::clone(&self.registry),
            self.broadcaster.clone(),
            &job.id,
            job.attempt,
        );

        let span = info_span!("pipeline", job_id = %job.id, attempt = job.attempt);
        async {
            match self.execute(&tracker, &job.source_ref, &cancel).await {
                Ok(completed) => {
                    info!(
                        "Job {} completed ({} failed batches)",
                        completed.id, completed.failed_batches
                    );
                    Ok(completed)
                }
                Err(AttemptFailure {
                    error: error @ ExtractionError::Registry(RegistryError::AttemptInFlight { .. }),
                    ..
                }) => {
                    warn!("Job {} was claimed by another run: {}", job.id, error);
                    Err(error)
                }
                Err(failure) => {
                    let diagnostic = failure.error.to_string();
                    warn!("Job {} failed: {}", job.id, diagnostic);
                    if let Err(e) =
                        tracker.failed(&diagnostic, failure.partial_text, failure.failed_batches)
                    {
                        error!("Failed to record failure of job {}: {}", job.id, e);
                    }
                    Err(failure.error)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        tracker: &ProgressTracker,
        source_ref: &str,
        cancel: &CancellationFlag,
    ) -> Result<ExtractionJob, AttemptFailure> {
        // Step 1: Fetch and rasterize. The attempt stays pending.
        tracker.converting();
        let pages = self
            .step_rasterize(source_ref)
            .instrument(info_span!("rasterize"))
            .await?;

        // Step 2: Enter processing with the first real progress write
        tracker
            .extracting(pages.len())
            .map_err(ExtractionError::from)?;

        // Step 3: Batch and dispatch
        let batches = partition(pages, self.config.batch_size);
        debug!(
            "Dispatching {} batches of up to {} pages",
            batches.len(),
            self.config.batch_size
        );

        let outcome = self
            .dispatcher
            .dispatch(&batches, cancel, |wave, total_waves, slots| {
                let failed = count_failed(slots.iter().flatten());
                tracker.wave(wave, total_waves, &concatenate_slots(slots), failed);
            })
            .instrument(info_span!("dispatch", batches = batches.len()))
            .await;

        let results = match outcome {
            DispatchOutcome::Finished(results) => results,
            DispatchOutcome::Cancelled {
                completed_waves,
                total_waves,
                slots,
            } => {
                return Err(AttemptFailure {
                    error: ExtractionError::CancellationRequested {
                        completed_waves,
                        total_waves,
                    },
                    partial_text: (completed_waves > 0).then(|| concatenate_slots(&slots)),
                    failed_batches: Some(count_failed(slots.iter().flatten())),
                });
            }
        };

        // Step 4: Aggregate and finalize
        self.step_finalize(tracker, &results)
    }

    async fn step_rasterize(&self, source_ref: &str) -> Result<Vec<Page>, ExtractionError> {
        let document = self.source.fetch(source_ref).await?;

        let rasterizers = Arc::clone(&self.rasterizers);
        let options = self.config.raster.clone();
        let pages = tokio::task::spawn_blocking(move || {
            rasterizers.rasterize_all(document, &options)
        })
        .await
        .map_err(|e| ExtractionError::Task(e.to_string()))??;

        debug!("Rasterized {} pages", pages.len());
        Ok(pages)
    }

    fn step_finalize(
        &self,
        tracker: &ProgressTracker,
        results: &[BatchResult],
    ) -> Result<ExtractionJob, AttemptFailure> {
        let _step = info_span!("aggregate").entered();
        tracker.aggregating();

        let aggregate = self.aggregator.aggregate(results).map_err(|error| AttemptFailure {
            error,
            partial_text: Some(concatenate(results)),
            failed_batches: Some(count_failed(results)),
        })?;

        tracker.completed(&aggregate).map_err(|e| AttemptFailure {
            error: ExtractionError::Aggregation(e.to_string()),
            partial_text: Some(aggregate.text.clone()),
            failed_batches: Some(aggregate.failed_batches),
        })
    }

    fn lock_running(&self) -> MutexGuard<'_, HashMap<String, CancellationFlag>> {
        match self.running.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Running job table lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Removes a job's cancellation flag once its run ends, however it ends.
struct RunningGuard<'a> {
    running: &'a Mutex<HashMap<String, CancellationFlag>>,
    job_id: String,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let mut running = match self.running.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        running.remove(&self.job_id);
    }
}
