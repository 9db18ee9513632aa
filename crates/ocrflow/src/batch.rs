//! Partitioning of rasterized pages into OCR batches and dispatch waves.
//!
//! Both functions are pure and order-preserving: batch `i` always holds
//! pages that precede those of batch `i + 1`, and wave `k` always holds
//! batches that precede those of wave `k + 1`.

use std::ops::Range;

use crate::raster::Page;

/// Default number of pages sent in one OCR call.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// A contiguous, ordered slice of items sent together in one OCR call.
#[derive(Debug, Clone)]
pub struct Batch<T = Page> {
    /// Zero-based batch position.
    pub index: usize,
    /// Zero-based position of the first item in the source sequence.
    pub offset: usize,
    pub items: Vec<T>,
}

impl<T> Batch<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 1-based batch number, as shown to humans.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    /// 1-based inclusive page range covered by this batch.
    pub fn page_range(&self) -> (usize, usize) {
        (self.offset + 1, self.offset + self.items.len().max(1))
    }
}

/// Splits `items` into consecutive batches of at most `batch_size` items.
/// The final batch may be smaller. A `batch_size` of zero is treated as one.
pub fn partition<T>(items: Vec<T>, batch_size: usize) -> Vec<Batch<T>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut current = Vec::with_capacity(batch_size);
    let mut offset = 0;

    for item in items {
        current.push(item);
        if current.len() == batch_size {
            let len = current.len();
            batches.push(Batch {
                index: batches.len(),
                offset,
                items: std::mem::replace(&mut current, Vec::with_capacity(batch_size)),
            });
            offset += len;
        }
    }

    if !current.is_empty() {
        batches.push(Batch {
            index: batches.len(),
            offset,
            items: current,
        });
    }

    batches
}

/// Groups `batch_count` batch indices into consecutive waves of at most
/// `concurrency` batches.
pub fn waves(batch_count: usize, concurrency: usize) -> Vec<Range<usize>> {
    let concurrency = concurrency.max(1);
    (0..batch_count)
        .step_by(concurrency)
        .map(|start| start..(start + concurrency).min(batch_count))
        .collect()
}
