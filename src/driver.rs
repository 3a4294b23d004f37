//! Resumable batch driver: bounded worker pool over fixed-size batches.
//!
//! Work units are chunked into batches and fed to a pool of worker threads
//! through a bounded channel whose capacity (2x the worker count) is what
//! keeps queued work — and therefore memory — bounded: submission blocks
//! until a worker drains a slot. Results come back in completion order and
//! are handed to a sink on the driver thread; a deterministic collect path
//! replays them in submission order instead.
//!
//! A failing batch is recorded and logged but never aborts its siblings;
//! callers inspect the report and exit non-zero if anything failed.
//! Cancellation is cooperative: the flag is checked between batch
//! submissions, so a cancelled run stops cleanly at a batch boundary.

use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, unbounded};
use tracing::{error, info};

/// Errors from driver configuration or the result sink.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Zero workers can never make progress.
    #[error("worker count must be non-zero")]
    ZeroWorkers,
    /// Zero-size batches can never make progress.
    #[error("batch size must be non-zero")]
    ZeroBatchSize,
    /// The result sink failed; the run aborts since output can no longer
    /// be made durable.
    #[error("sink error: {0}")]
    Sink(#[from] std::io::Error),
}

/// One failed batch: identity plus the rendered error.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    /// Submission sequence number of the failing batch.
    pub batch: usize,
    /// Rendered worker error.
    pub error: String,
}

/// Outcome of a driver run.
#[derive(Debug, Clone, Default)]
pub struct DriverReport {
    /// Batches submitted.
    pub batches: usize,
    /// Batches completed successfully.
    pub completed: usize,
    /// Failures, in completion order. The run continues past them.
    pub failures: Vec<BatchFailure>,
    /// True when the run stopped early due to cancellation.
    pub cancelled: bool,
}

impl DriverReport {
    /// True when every submitted batch completed and nothing was cancelled.
    pub fn all_ok(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

/// Bounded worker pool dispatching fixed-size batches.
#[derive(Debug, Clone)]
pub struct BatchDriver {
    workers: usize,
    batch_size: usize,
    cancel: Arc<AtomicBool>,
}

impl BatchDriver {
    /// Create a driver with the given pool width and batch size.
    pub fn new(workers: usize, batch_size: usize) -> Result<Self, DriverError> {
        if workers == 0 {
            return Err(DriverError::ZeroWorkers);
        }
        if batch_size == 0 {
            return Err(DriverError::ZeroBatchSize);
        }
        Ok(Self {
            workers,
            batch_size,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Configured batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Cooperative cancellation flag. Setting it stops the run at the next
    /// batch boundary; in-flight batches finish and their output is sunk.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Dispatch `items` in batches to `worker`, handing each successful
    /// result to `sink` in completion order.
    ///
    /// The sink runs on the driver thread, so it may hold non-`Sync` state
    /// (open output files, checkpoints). Worker failures are collected into
    /// the report; sink failures abort the run.
    pub fn run<T, R, E, I, W, S>(
        &self,
        items: I,
        worker: W,
        mut sink: S,
    ) -> Result<DriverReport, DriverError>
    where
        T: Send,
        R: Send,
        E: std::fmt::Display,
        I: Iterator<Item = T> + Send,
        W: Fn(usize, Vec<T>) -> Result<R, E> + Sync,
        S: FnMut(usize, R) -> std::io::Result<()>,
    {
        let batch_size = self.batch_size;
        let (job_tx, job_rx) = bounded::<(usize, Vec<T>)>(self.workers * 2);
        let (res_tx, res_rx) = unbounded::<(usize, Result<R, String>)>();

        std::thread::scope(|scope| {
            for _ in 0..self.workers {
                let job_rx = job_rx.clone();
                let res_tx = res_tx.clone();
                let worker = &worker;
                scope.spawn(move || {
                    for (seq, batch) in job_rx.iter() {
                        let outcome = worker(seq, batch).map_err(|e| e.to_string());
                        if res_tx.send((seq, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(job_rx);
            drop(res_tx);

            let cancel = Arc::clone(&self.cancel);
            let submitter = scope.spawn(move || {
                let mut seq = 0usize;
                let mut cancelled = false;
                let mut batch = Vec::with_capacity(batch_size);

                for item in items {
                    batch.push(item);
                    if batch.len() >= batch_size {
                        if cancel.load(Ordering::Relaxed) {
                            cancelled = true;
                            break;
                        }
                        if job_tx.send((seq, std::mem::take(&mut batch))).is_err() {
                            // Pool gone (sink aborted); stop submitting
                            cancelled = true;
                            break;
                        }
                        seq += 1;
                        batch = Vec::with_capacity(batch_size);
                    }
                }
                if !cancelled && !batch.is_empty() {
                    if cancel.load(Ordering::Relaxed) {
                        cancelled = true;
                    } else if job_tx.send((seq, batch)).is_ok() {
                        seq += 1;
                    }
                }
                (seq, cancelled)
            });

            let mut report = DriverReport::default();
            for (seq, outcome) in res_rx.iter() {
                match outcome {
                    Ok(result) => {
                        if let Err(e) = sink(seq, result) {
                            // Output can no longer be made durable: stop
                            // submission and surface the sink failure
                            self.cancel.store(true, Ordering::Relaxed);
                            return Err(DriverError::Sink(e));
                        }
                        report.completed += 1;
                    }
                    Err(err) => {
                        error!(batch = seq, error = %err, "batch failed");
                        report.failures.push(BatchFailure {
                            batch: seq,
                            error: err,
                        });
                    }
                }
            }

            let (batches, cancelled) = submitter
                .join()
                .expect("batch submitter thread panicked");
            report.batches = batches;
            report.cancelled = cancelled;

            if !report.failures.is_empty() {
                info!(
                    failed = report.failures.len(),
                    completed = report.completed,
                    "run finished with batch failures"
                );
            }
            Ok(report)
        })
    }

    /// Dispatch `items` and collect successful results replayed in
    /// submission order, giving a deterministic merge regardless of
    /// completion order.
    pub fn run_collect<T, R, E, I, W>(
        &self,
        items: I,
        worker: W,
    ) -> Result<(Vec<R>, DriverReport), DriverError>
    where
        T: Send,
        R: Send,
        E: std::fmt::Display,
        I: Iterator<Item = T> + Send,
        W: Fn(usize, Vec<T>) -> Result<R, E> + Sync,
    {
        let mut collected: Vec<(usize, R)> = Vec::new();
        let report = self.run(items, worker, |seq, result| {
            collected.push((seq, result));
            Ok(())
        })?;

        collected.sort_by_key(|(seq, _)| *seq);
        Ok((collected.into_iter().map(|(_, r)| r).collect(), report))
    }
}

/// Deterministic combination of partial per-batch results.
///
/// Merging is performed in submission order, so the combined value does not
/// depend on which worker finished first.
pub trait Merge {
    /// Fold `other` into `self`.
    fn merge(&mut self, other: Self);
}

impl<T: Eq + Hash> Merge for HashSet<T> {
    fn merge(&mut self, other: Self) {
        self.extend(other);
    }
}

impl<T> Merge for Vec<T> {
    fn merge(&mut self, other: Self) {
        self.extend(other);
    }
}

impl<K: Ord, V> Merge for BTreeMap<K, Vec<V>> {
    fn merge(&mut self, other: Self) {
        for (key, values) in other {
            self.entry(key).or_default().extend(values);
        }
    }
}

/// Fold a sequence of partial results into one, in the given order.
pub fn merge_all<R: Merge + Default>(parts: impl IntoIterator<Item = R>) -> R {
    let mut combined = R::default();
    for part in parts {
        combined.merge(part);
    }
    combined
}
