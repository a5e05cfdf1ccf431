//! Consumer Scheduler
//!
//! Drives the two periodic storage jobs:
//!
//! - **Flush**: drain the transport queue into the quote buffer, then write
//!   one batch per symbol. A symbol's entries are cleared only after its
//!   batch is written, so failures retry on the next tick.
//! - **Retention sweep**: delete records with `observed_at < now - delete_interval`.
//!
//! The jobs run as independent tasks and never wait on each other. Every
//! storage call carries `storage_timeout`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{BoundedQueue, QuoteBuffer};
use crate::application::ports::{StorageBackend, StorageError, with_timeout};
use crate::domain::market::{Quote, StoredQuote, Timestamp};
use crate::infrastructure::metrics::{self, JobOutcome};

/// Scheduler timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Period of the flush job.
    pub flush_interval: Duration,
    /// Retention window: records older than this are deleted.
    pub delete_interval: Duration,
    /// Period of the retention sweep job.
    pub sweep_period: Duration,
    /// Deadline for each storage call.
    pub storage_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(30),
            delete_interval: Duration::from_secs(7 * 24 * 60 * 60),
            sweep_period: Duration::from_secs(600),
            storage_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of one flush tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Quotes moved from the queue into the buffer.
    pub drained: usize,
    /// Symbols whose batch was written.
    pub symbols_flushed: usize,
    /// Symbols whose batch failed and stays buffered.
    pub symbols_failed: usize,
    /// Quotes written.
    pub written: usize,
    /// Quotes still buffered after the tick.
    pub pending: usize,
}

/// Owns the quote buffer and the periodic storage jobs.
pub struct ConsumerScheduler {
    queue: Arc<BoundedQueue<Quote>>,
    storage: Arc<dyn StorageBackend>,
    buffer: Mutex<QuoteBuffer>,
    config: SchedulerConfig,
}

impl std::fmt::Debug for ConsumerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerScheduler")
            .field("storage", &self.storage.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ConsumerScheduler {
    /// Create a scheduler over a queue and a storage backend.
    #[must_use]
    pub fn new(
        queue: Arc<BoundedQueue<Quote>>,
        storage: Arc<dyn StorageBackend>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            queue,
            storage,
            buffer: Mutex::new(QuoteBuffer::new()),
            config,
        }
    }

    /// Scheduler timing.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Retention cutoff for a given instant.
    #[must_use]
    pub fn retention_cutoff(&self, now: Timestamp) -> Timestamp {
        now.saturating_sub(self.config.delete_interval)
    }

    /// Quotes currently buffered.
    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Run one flush tick.
    ///
    /// `now` is recorded as the ingestion time of written records.
    pub async fn flush_once(&self, now: Timestamp) -> FlushReport {
        let started = Instant::now();
        let mut buffer = self.buffer.lock().await;

        let drained = self.queue.drain();
        let mut report = FlushReport {
            drained: drained.len(),
            ..FlushReport::default()
        };

        let out_of_order = drained
            .into_iter()
            .map(|quote| buffer.append(quote))
            .filter(|in_order| !in_order)
            .count();
        if out_of_order > 0 {
            tracing::debug!(count = out_of_order, "Out-of-order quotes buffered");
            metrics::record_out_of_order(out_of_order as u64);
        }

        for symbol in buffer.pending_symbols() {
            let records: Vec<StoredQuote> = buffer
                .pending(&symbol)
                .iter()
                .cloned()
                .map(|quote| quote.into_stored(now))
                .collect();

            let result = with_timeout(
                self.config.storage_timeout,
                self.storage.insert_batch(&records),
            )
            .await;

            match result {
                Ok(()) => {
                    let written = buffer.mark_flushed(&symbol);
                    report.symbols_flushed += 1;
                    report.written += written;
                    metrics::record_flush(JobOutcome::Success, written as u64);
                }
                Err(e) => {
                    report.symbols_failed += 1;
                    tracing::warn!(
                        symbol = %symbol,
                        pending = records.len(),
                        error = %e,
                        "Flush failed, batch kept for next tick"
                    );
                    metrics::record_flush(JobOutcome::Failure, 0);
                }
            }
        }

        report.pending = buffer.len();
        drop(buffer);

        metrics::set_buffered_quotes(report.pending);
        metrics::record_flush_duration(started.elapsed());
        if report.written > 0 || report.symbols_failed > 0 {
            tracing::debug!(
                drained = report.drained,
                written = report.written,
                flushed = report.symbols_flushed,
                failed = report.symbols_failed,
                pending = report.pending,
                "Flush tick complete"
            );
        }
        report
    }

    /// Run one retention sweep.
    ///
    /// # Errors
    ///
    /// Returns the storage error; the caller retries on its next tick.
    pub async fn sweep_once(&self, now: Timestamp) -> Result<u64, StorageError> {
        let cutoff = self.retention_cutoff(now);
        let result = with_timeout(
            self.config.storage_timeout,
            self.storage.delete_before(cutoff),
        )
        .await;

        match &result {
            Ok(deleted) => {
                tracing::info!(cutoff = %cutoff, deleted, "Retention sweep complete");
                metrics::record_retention(JobOutcome::Success, *deleted);
            }
            Err(e) => {
                tracing::warn!(cutoff = %cutoff, error = %e, "Retention sweep failed");
                metrics::record_retention(JobOutcome::Failure, 0);
            }
        }
        result
    }

    /// Spawn the flush and retention loops.
    ///
    /// The loops stop when `cancel` (or the returned handle) is cancelled.
    #[must_use]
    pub fn start(self: &Arc<Self>, cancel: &CancellationToken) -> SchedulerHandle {
        let cancel = cancel.child_token();

        tracing::info!(
            storage = self.storage.name(),
            flush_interval = ?self.config.flush_interval,
            delete_interval = ?self.config.delete_interval,
            sweep_period = ?self.config.sweep_period,
            "Starting consumer scheduler"
        );

        let flush_task = tokio::spawn(Arc::clone(self).run_flush_loop(cancel.clone()));
        let sweep_task = tokio::spawn(Arc::clone(self).run_sweep_loop(cancel.clone()));

        SchedulerHandle {
            scheduler: Arc::clone(self),
            cancel,
            flush_task,
            sweep_task,
        }
    }

    async fn run_flush_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.flush_once(Timestamp::now()).await;
                }
            }
        }
        tracing::debug!("Flush loop stopped");
    }

    async fn run_sweep_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sweep_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    // Errors are logged inside; the next tick retries.
                    let _ = self.sweep_once(Timestamp::now()).await;
                }
            }
        }
        tracing::debug!("Retention loop stopped");
    }
}

/// Handle to running scheduler loops.
#[derive(Debug)]
pub struct SchedulerHandle {
    scheduler: Arc<ConsumerScheduler>,
    cancel: CancellationToken,
    flush_task: JoinHandle<()>,
    sweep_task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop both loops and run a final flush, all within `grace`.
    ///
    /// Returns the final flush report, or `None` if the grace period ran out
    /// first.
    pub async fn stop(self, grace: Duration) -> Option<FlushReport> {
        self.cancel.cancel();
        let deadline = tokio::time::Instant::now() + grace;

        let Self {
            scheduler,
            flush_task,
            sweep_task,
            ..
        } = self;

        for (name, mut task) in [("flush", flush_task), ("retention", sweep_task)] {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                tracing::warn!(job = name, "Scheduler job did not stop within grace period");
                task.abort();
            }
        }

        match tokio::time::timeout_at(deadline, scheduler.flush_once(Timestamp::now())).await {
            Ok(report) => {
                tracing::info!(
                    written = report.written,
                    pending = report.pending,
                    "Final flush complete"
                );
                Some(report)
            }
            Err(_) => {
                tracing::warn!("Final flush did not complete within grace period");
                None
            }
        }
    }
}
