//! OCR backends and the wave dispatcher that drives them.

pub mod client;
pub mod dispatcher;
#[cfg(feature = "tesseract")]
pub mod tesseract;

use async_trait::async_trait;

use crate::error::{BatchFailure, OcrServiceError};
use crate::raster::Page;

pub use client::{HttpOcrService, HttpOcrSettings};
pub use dispatcher::{CancellationFlag, DispatchOutcome, DispatchSettings, Dispatcher};
#[cfg(feature = "tesseract")]
pub use tesseract::TesseractOcrService;

/// One OCR call: the pages of a single batch, in order.
#[derive(Debug, Clone, Copy)]
pub struct OcrRequest<'a> {
    pub batch_index: usize,
    pub pages: &'a [Page],
}

/// A remote or local service that turns page images into text.
///
/// Implementations must be safe to call concurrently; the dispatcher issues
/// up to its concurrency limit of calls at once.
#[async_trait]
pub trait OcrService: Send + Sync {
    async fn recognize(&self, request: OcrRequest<'_>) -> Result<String, OcrServiceError>;
}

/// Outcome of one batch, addressed by batch index.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub index: usize,
    /// 1-based, inclusive.
    pub first_page: usize,
    /// 1-based, inclusive.
    pub last_page: usize,
    pub outcome: Result<String, BatchFailure>,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn text(&self) -> Option<&str> {
        self.outcome.as_deref().ok()
    }

    pub fn failure(&self) -> Option<&BatchFailure> {
        self.outcome.as_ref().err()
    }
}
