//! Batch scheduling for embedding runs.
//!
//! Splits a list into contiguous batches and drives them through an
//! [`EmbeddingBackend`] with a bounded worker pool. Workers pull batch
//! indices from a shared cursor and send `(start, rows)` back over a channel;
//! results are merged into a map keyed by batch start, so the final matrix is
//! index-aligned with the input regardless of completion order.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error};

use super::backend::EmbeddingBackend;
use super::progress::{ProgressEvent, SharedProgress};
use crate::error::{Error, Result};

/// Hard upper bound on the batch size.
pub const MAX_BATCH_SIZE: usize = 1024;

/// Split `0..total` into contiguous ranges of at most `batch_size` items.
///
/// `batch_size` is clamped to `1..=MAX_BATCH_SIZE`.
#[must_use]
pub fn chunk_ranges(total: usize, batch_size: usize) -> Vec<Range<usize>> {
    let size = batch_size.clamp(1, MAX_BATCH_SIZE);
    (0..total)
        .step_by(size)
        .map(|start| start..(start + size).min(total))
        .collect()
}

/// Ordered embedding rows, one per input text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingMatrix {
    rows: Vec<Vec<f32>>,
    dimensions: usize,
}

impl EmbeddingMatrix {
    /// Build a matrix, checking that every row has the same length.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let dimensions = rows.first().map_or(0, Vec::len);
        if let Some((row, actual)) = rows
            .iter()
            .map(Vec::len)
            .enumerate()
            .find(|(_, len)| *len != dimensions)
        {
            return Err(Error::DimensionMismatch {
                expected: dimensions,
                actual,
                row,
            });
        }
        Ok(Self { rows, dimensions })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Shared row length (0 for an empty matrix).
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<f32>] {
        &self.rows
    }

    #[must_use]
    pub fn into_rows(self) -> Vec<Vec<f32>> {
        self.rows
    }
}

/// How a list is batched and how many batches may run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub batch_size: usize,
    pub max_concurrency: usize,
}

impl BatchPlan {
    #[must_use]
    pub fn new(batch_size: usize, max_concurrency: usize) -> Self {
        Self {
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// A plan that runs one batch at a time.
    #[must_use]
    pub fn sequential(batch_size: usize) -> Self {
        Self::new(batch_size, 1)
    }
}

/// Embed every item through `embedder`, batch by batch.
///
/// Reports a [`ProgressEvent::Batch`] after each completed batch. A failed
/// batch is resent while the embedder's
/// [`resubmit_budget`](EmbeddingBackend::resubmit_budget) allows it; any other
/// batch error aborts all workers and is returned as-is.
pub async fn run_batches<E>(
    items: Arc<[String]>,
    plan: BatchPlan,
    embedder: Arc<E>,
    progress: SharedProgress,
    label: &str,
) -> Result<EmbeddingMatrix>
where
    E: EmbeddingBackend + 'static,
{
    if items.is_empty() {
        return Ok(EmbeddingMatrix::default());
    }

    let ranges: Arc<[Range<usize>]> = chunk_ranges(items.len(), plan.batch_size).into();
    let total = ranges.len();
    let workers = plan.max_concurrency.min(total);
    let cursor = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel::<(Range<usize>, Result<Vec<Vec<f32>>>)>();

    debug!(label, items = items.len(), batches = total, workers, "Starting batch run");

    let mut pool = JoinSet::new();
    for worker in 0..workers {
        let items = Arc::clone(&items);
        let ranges = Arc::clone(&ranges);
        let cursor = Arc::clone(&cursor);
        let embedder = Arc::clone(&embedder);
        let progress = Arc::clone(&progress);
        let tx = tx.clone();

        pool.spawn(async move {
            loop {
                let next = cursor.fetch_add(1, Ordering::SeqCst);
                let Some(range) = ranges.get(next).cloned() else {
                    break;
                };
                debug!(worker, start = range.start, end = range.end, "Batch launched");
                let batch = &items[range.clone()];
                let mut resubmits = 0;
                let result = loop {
                    match embedder.embed(batch, progress.as_ref()).await {
                        Err(e) if resubmits < embedder.resubmit_budget(&e) => {
                            resubmits += 1;
                            debug!(worker, start = range.start, resubmits, error = %e, "Resending batch");
                        }
                        other => break other,
                    }
                };
                let failed = result.is_err();
                if tx.send((range, result)).is_err() || failed {
                    break;
                }
            }
        });
    }
    drop(tx);

    let mut merged: BTreeMap<usize, Vec<Vec<f32>>> = BTreeMap::new();
    let mut completed = 0;

    while let Some((range, result)) = rx.recv().await {
        let rows = match result {
            Ok(rows) => rows,
            Err(e) => {
                error!(label, start = range.start, error = %e, "Batch failed, aborting run");
                pool.abort_all();
                return Err(e);
            }
        };

        if rows.len() != range.len() {
            pool.abort_all();
            return Err(Error::InvalidResponse(format!(
                "batch {}..{} returned {} rows",
                range.start,
                range.end,
                rows.len()
            )));
        }

        debug!(start = range.start, end = range.end, "Batch finished");
        merged.insert(range.start, rows);
        completed += 1;
        progress.report(&ProgressEvent::Batch {
            label: label.to_string(),
            completed,
            total,
        });
    }

    // A worker that panicked never sent its batch.
    while let Some(joined) = pool.join_next().await {
        if let Err(e) = joined {
            return Err(Error::Other(format!("embedding worker failed: {e}")));
        }
    }

    if completed != total {
        return Err(Error::Other(format!(
            "{completed} of {total} batches completed"
        )));
    }

    let rows: Vec<Vec<f32>> = merged.into_values().flatten().collect();
    if rows.len() != items.len() {
        return Err(Error::InvalidResponse(format!(
            "expected {} embeddings, assembled {}",
            items.len(),
            rows.len()
        )));
    }

    EmbeddingMatrix::from_rows(rows)
}
