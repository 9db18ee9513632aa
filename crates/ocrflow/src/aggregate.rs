//! Combines per-batch OCR output into the final document text.

use std::sync::Arc;

use crate::error::ExtractionError;
use crate::ocr::BatchResult;

/// Visible boundary between consecutive batches.
pub const PAGE_BREAK: &str = "\n\n--- Page Break ---\n\n";

/// Minimum character count before the garble ratio is checked.
const MIN_TOTAL_CHARS: usize = 50;

/// Minimum percentage of alphanumeric characters for legible text.
const MIN_ALPHANUMERIC_PERCENT: usize = 10;

/// Decides whether a successful batch produced usable text.
pub trait TextPredicate: Send + Sync {
    fn is_meaningful(&self, text: &str) -> bool;
}

/// Accepts text that is neither blank nor garbled.
///
/// Long output with almost no alphanumeric characters is what OCR returns
/// for noise, rules and stamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegibleTextPredicate;

impl TextPredicate for LegibleTextPredicate {
    fn is_meaningful(&self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return false;
        }

        let total_chars = trimmed.chars().count();
        let alphanumeric_chars = trimmed.chars().filter(|c| c.is_alphanumeric()).count();

        !(total_chars > MIN_TOTAL_CHARS
            && alphanumeric_chars * 100 < total_chars * MIN_ALPHANUMERIC_PERCENT)
    }
}

/// Accepts any non-blank text.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonEmptyPredicate;

impl TextPredicate for NonEmptyPredicate {
    fn is_meaningful(&self, text: &str) -> bool {
        !text.trim().is_empty()
    }
}

/// Final text of a document plus counts for the job record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub text: String,
    pub total_batches: usize,
    pub failed_batches: usize,
    pub meaningful_batches: usize,
}

/// Inline marker for a batch that produced no text.
pub fn error_marker(result: &BatchResult) -> String {
    let reason = match &result.outcome {
        Ok(_) => "unreadable output".to_string(),
        Err(failure) => failure.to_string(),
    };
    format!(
        "[Error processing batch {}: pages {}-{}: {}]",
        result.index + 1,
        result.first_page,
        result.last_page,
        reason
    )
}

fn render(result: &BatchResult) -> String {
    match &result.outcome {
        Ok(text) => text.clone(),
        Err(_) => error_marker(result),
    }
}

/// Joins results in ascending batch order, whatever order they are given in.
pub fn concatenate<'a>(results: impl IntoIterator<Item = &'a BatchResult>) -> String {
    let mut ordered: Vec<&BatchResult> = results.into_iter().collect();
    ordered.sort_by_key(|r| r.index);
    ordered
        .iter()
        .map(|r| render(r))
        .collect::<Vec<_>>()
        .join(PAGE_BREAK)
}

/// Joins the slots filled so far, skipping batches not yet attempted.
pub fn concatenate_slots(slots: &[Option<BatchResult>]) -> String {
    concatenate(slots.iter().flatten())
}

pub struct Aggregator {
    predicate: Arc<dyn TextPredicate>,
}

impl Aggregator {
    pub fn new(predicate: Arc<dyn TextPredicate>) -> Self {
        Self { predicate }
    }

    /// Builds the final text, or fails when no batch yielded meaningful
    /// text. Batches the predicate rejects are rendered and counted as
    /// failures, like batches that returned no text at all.
    pub fn aggregate(&self, results: &[BatchResult]) -> Result<Aggregate, ExtractionError> {
        let mut ordered: Vec<&BatchResult> = results.iter().collect();
        ordered.sort_by_key(|r| r.index);

        let rendered: Vec<Option<&str>> = ordered
            .iter()
            .map(|r| r.text().filter(|t| self.predicate.is_meaningful(t)))
            .collect();
        let meaningful_batches = rendered.iter().filter(|t| t.is_some()).count();
        let failed_batches = ordered.len() - meaningful_batches;

        if meaningful_batches == 0 {
            let summary = if ordered.is_empty() {
                "no batches were produced".to_string()
            } else {
                ordered
                    .iter()
                    .map(|r| error_marker(r))
                    .collect::<Vec<_>>()
                    .join("; ")
            };
            return Err(ExtractionError::AllBatchesFailed {
                total: results.len(),
                summary,
            });
        }

        let text = ordered
            .iter()
            .zip(&rendered)
            .map(|(result, text)| match text {
                Some(text) => text.to_string(),
                None => error_marker(result),
            })
            .collect::<Vec<_>>()
            .join(PAGE_BREAK);

        Ok(Aggregate {
            text,
            total_batches: results.len(),
            failed_batches,
            meaningful_batches,
        })
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(Arc::new(LegibleTextPredicate))
    }
}
