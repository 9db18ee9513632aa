//! Wave-based dispatch of OCR batches under a concurrency cap.
//!
//! Batches are issued in waves of at most `concurrency` calls. A wave is a
//! barrier: the next one starts only after every call of the current one
//! has settled and the inter-wave delay has elapsed. Results land in slots
//! addressed by batch position, so completion order never matters.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::Instrument;

use crate::batch::{waves, Batch};
use crate::error::BatchFailure;
use crate::ocr::{BatchResult, OcrRequest, OcrService};

pub const DEFAULT_CONCURRENCY: usize = 3;
pub const DEFAULT_WAVE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Cooperative cancellation, observed before each wave.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Maximum OCR calls in flight at once.
    pub concurrency: usize,
    /// Pause between waves. Not applied after the last wave.
    pub wave_delay: Duration,
    /// Upper bound for a single OCR call.
    pub call_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            wave_delay: DEFAULT_WAVE_DELAY,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// Every batch was attempted. Results are in batch order.
    Finished(Vec<BatchResult>),
    /// Cancellation was observed before wave `completed_waves + 1`.
    Cancelled {
        completed_waves: usize,
        total_waves: usize,
        slots: Vec<Option<BatchResult>>,
    },
}

pub struct Dispatcher {
    service: Arc<dyn OcrService>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(service: Arc<dyn OcrService>, settings: DispatchSettings) -> Self {
        Self { service, settings }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Runs every batch through the OCR service.
    ///
    /// `on_wave` is called after each wave with the 1-based wave number, the
    /// total number of waves and all slots filled so far.
    pub async fn dispatch<F>(
        &self,
        batches: &[Batch],
        cancel: &CancellationFlag,
        mut on_wave: F,
    ) -> DispatchOutcome
    where
        F: FnMut(usize, usize, &[Option<BatchResult>]),
    {
        let plan = waves(batches.len(), self.settings.concurrency);
        let total_waves = plan.len();
        let mut slots: Vec<Option<BatchResult>> = vec![None; batches.len()];

        for (wave, range) in plan.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return self.cancelled(wave, total_waves, slots);
            }
            if wave > 0 {
                tokio::time::sleep(self.settings.wave_delay).await;
                if cancel.is_cancelled() {
                    return self.cancelled(wave, total_waves, slots);
                }
            }

            let span = tracing::info_span!("wave", wave = wave + 1, total = total_waves);
            let calls = batches[range.clone()].iter().map(|batch| self.call(batch));
            let results = join_all(calls).instrument(span).await;

            for (position, result) in range.zip(results) {
                slots[position] = Some(result);
            }

            on_wave(wave + 1, total_waves, &slots);
        }

        DispatchOutcome::Finished(slots.into_iter().flatten().collect())
    }

    fn cancelled(
        &self,
        completed_waves: usize,
        total_waves: usize,
        slots: Vec<Option<BatchResult>>,
    ) -> DispatchOutcome {
        tracing::info!(
            "Dispatch cancelled after {} of {} waves",
            completed_waves,
            total_waves
        );
        DispatchOutcome::Cancelled {
            completed_waves,
            total_waves,
            slots,
        }
    }

    /// Issues one OCR call. Every failure is folded into the result.
    async fn call(&self, batch: &Batch) -> BatchResult {
        let (first_page, last_page) = batch.page_range();
        let request = OcrRequest {
            batch_index: batch.index,
            pages: &batch.items,
        };
        let timeout = self.settings.call_timeout;

        let outcome = match tokio::time::timeout(timeout, self.service.recognize(request)).await {
            Err(_) => Err(BatchFailure::Timeout(timeout)),
            Ok(Err(e)) => Err(BatchFailure::Service(e.to_string())),
            Ok(Ok(text)) if text.trim().is_empty() => Err(BatchFailure::EmptyResult),
            Ok(Ok(text)) => Ok(text),
        };

        match &outcome {
            Ok(text) => tracing::debug!(
                "Batch {} (pages {}-{}) returned {} chars",
                batch.number(),
                first_page,
                last_page,
                text.len()
            ),
            Err(failure) => tracing::warn!(
                "Batch {} (pages {}-{}) failed: {}",
                batch.number(),
                first_page,
                last_page,
                failure
            ),
        }

        BatchResult {
            index: batch.index,
            first_page,
            last_page,
            outcome,
        }
    }
}
