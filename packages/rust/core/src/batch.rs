//! Batch execution: runs many provider records through the [`Orchestrator`]
//! under a concurrency limit, a per-record time budget, and batch-level
//! cancellation.
//!
//! [`BatchEngine::submit`] returns immediately with a [`BatchHandle`]. The
//! handle exposes a live progress snapshot backed by atomic counters, a
//! non-blocking [`BatchHandle::poll`], and an awaiting [`BatchHandle::wait`].
//! Every input maps to exactly one [`RecordOutcome`] in the final report.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{Instant, error::Elapsed};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use provdir_shared::{
    BatchConfig, BatchId, BatchSummary, DirectoryEntry, FailedRecord, FailureReason,
    ProcessingState, ProvDirError, ProviderInput, ProviderRecord, RecordOutcome, Result,
};

use crate::pipeline::Orchestrator;

// ---------------------------------------------------------------------------
// Options, progress, report
// ---------------------------------------------------------------------------

/// Per-batch execution limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Maximum orchestrator runs at once. Excess records wait FIFO.
    pub concurrency_limit: usize,
    /// Time budget for one record, covering all of its stages.
    pub per_record_timeout: Duration,
}

impl From<&BatchConfig> for BatchOptions {
    fn from(config: &BatchConfig) -> Self {
        Self {
            concurrency_limit: config.concurrency,
            per_record_timeout: config.record_timeout(),
        }
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from(&BatchConfig::default())
    }
}

/// Point-in-time view of a running batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchProgress {
    /// Records that reached `Done`.
    pub processed: usize,
    /// Records that ended `Failed`, for any reason.
    pub failed: usize,
    pub in_flight: usize,
    pub total: usize,
}

impl BatchProgress {
    pub fn finished(&self) -> usize {
        self.processed + self.failed
    }

    pub fn is_complete(&self) -> bool {
        self.finished() == self.total
    }
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicUsize,
    failed: AtomicUsize,
    in_flight: AtomicUsize,
}

impl Counters {
    fn settle(&self, done: bool) {
        if done {
            self.processed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Final result of a batch. Outcomes are in input order.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub outcomes: Vec<RecordOutcome>,
    pub summary: BatchSummary,
}

impl BatchReport {
    pub fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.outcomes.iter().filter_map(RecordOutcome::entry)
    }

    pub fn failures(&self) -> impl Iterator<Item = &FailedRecord> {
        self.outcomes.iter().filter_map(RecordOutcome::failure)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Submits batches of provider records for concurrent processing.
#[derive(Debug, Clone)]
pub struct BatchEngine {
    orchestrator: Arc<Orchestrator>,
}

impl BatchEngine {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }

    /// Start a batch and return its handle without waiting for any record.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, inputs: Vec<ProviderInput>, options: BatchOptions) -> Result<BatchHandle> {
        if options.concurrency_limit == 0 {
            return Err(ProvDirError::config("batch concurrency limit must be at least 1"));
        }
        if options.concurrency_limit > Semaphore::MAX_PERMITS {
            return Err(ProvDirError::config(format!(
                "batch concurrency limit must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if options.per_record_timeout.is_zero() {
            return Err(ProvDirError::config("per-record timeout must be greater than zero"));
        }

        let batch_id = BatchId::new();
        let total = inputs.len();
        let counters = Arc::new(Counters::default());
        let cancel = CancellationToken::new();
        let (report_tx, report_rx) = watch::channel(None);

        tokio::spawn(dispatch(
            Arc::clone(&self.orchestrator),
            batch_id.clone(),
            inputs,
            options,
            Arc::clone(&counters),
            cancel.clone(),
            report_tx,
        ));

        Ok(BatchHandle {
            batch_id,
            total,
            counters,
            cancel,
            report: report_rx,
        })
    }
}

/// Handle to a submitted batch.
#[derive(Debug, Clone)]
pub struct BatchHandle {
    batch_id: BatchId,
    total: usize,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    report: watch::Receiver<Option<Arc<BatchReport>>>,
}

impl BatchHandle {
    pub fn id(&self) -> &BatchId {
        &self.batch_id
    }

    /// Current counters. Never blocks on in-flight work.
    pub fn progress(&self) -> BatchProgress {
        BatchProgress {
            processed: self.counters.processed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
            total: self.total,
        }
    }

    /// Stop dispatching new records. In-flight records run to completion or
    /// timeout; the rest are reported as cancelled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The report if the batch has finished, `None` otherwise.
    pub fn poll(&self) -> Option<Arc<BatchReport>> {
        self.report.borrow().clone()
    }

    /// Wait until every record is `Done` or `Failed`.
    pub async fn wait(&self) -> Result<Arc<BatchReport>> {
        let mut rx = self.report.clone();
        let report = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ProvDirError::invariant("batch dispatcher stopped without a report"))?;
        report
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| ProvDirError::invariant("batch report missing after completion"))
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

type RunResult = std::result::Result<Result<RecordOutcome>, Elapsed>;

/// A record whose run ended without reaching a terminal state of its own.
fn failed_without_run(input: ProviderInput, reason: FailureReason, detail: String) -> RecordOutcome {
    let mut record = ProviderRecord::new(input);
    // Pending -> Failed is always legal.
    let _ = record.advance(ProcessingState::Failed);
    let (input, history) = record.into_parts();
    RecordOutcome::Failed(FailedRecord {
        input,
        reason,
        detail,
        history,
        audit: Vec::new(),
    })
}

/// Turn a finished task into the record's terminal outcome.
fn conclude(
    joined: std::result::Result<(Id, RunResult), JoinError>,
    running: &mut HashMap<Id, (usize, ProviderInput)>,
    counters: &Counters,
    timeout: Duration,
) -> Option<(usize, RecordOutcome)> {
    let (id, run) = match joined {
        Ok((id, run)) => (id, Ok(run)),
        Err(e) => (e.id(), Err(e)),
    };
    let (index, input) = running.remove(&id)?;

    let outcome = match run {
        Ok(Ok(Ok(outcome))) => outcome,
        Ok(Ok(Err(e))) => {
            error!(provider = %input.id, error = %e, "orchestrator rejected record");
            failed_without_run(input, FailureReason::Invariant, e.to_string())
        }
        Ok(Err(_)) => {
            warn!(provider = %input.id, timeout_ms = timeout.as_millis() as u64, "record timed out");
            failed_without_run(
                input,
                FailureReason::Timeout,
                ProvDirError::Timeout(timeout).to_string(),
            )
        }
        Err(e) => {
            // The task never reached its own bookkeeping.
            counters.in_flight.fetch_sub(1, Ordering::SeqCst);
            counters.settle(false);
            error!(provider = %input.id, error = %e, "record task aborted");
            failed_without_run(input, FailureReason::Invariant, format!("record task aborted: {e}"))
        }
    };
    Some((index, outcome))
}

#[instrument(skip_all, fields(batch = %batch_id, total = inputs.len()))]
async fn dispatch(
    orchestrator: Arc<Orchestrator>,
    batch_id: BatchId,
    inputs: Vec<ProviderInput>,
    options: BatchOptions,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    report_tx: watch::Sender<Option<Arc<BatchReport>>>,
) {
    let started = Instant::now();
    let total = inputs.len();
    let timeout = options.per_record_timeout;
    info!(
        concurrency = options.concurrency_limit,
        timeout_ms = timeout.as_millis() as u64,
        "starting batch"
    );

    let semaphore = Arc::new(Semaphore::new(options.concurrency_limit));
    let mut tasks: JoinSet<RunResult> = JoinSet::new();
    let mut running: HashMap<Id, (usize, ProviderInput)> = HashMap::new();
    let mut slots: Vec<Option<RecordOutcome>> = std::iter::repeat_with(|| None).take(total).collect();

    let mut queue = inputs.into_iter().enumerate();
    let mut next = queue.next();

    while next.is_some() {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                if let Some((index, outcome)) = conclude(joined, &mut running, &counters, timeout) {
                    slots[index] = Some(outcome);
                }
            }
            permit = Arc::clone(&semaphore).acquire_owned() => {
                let Ok(permit) = permit else { break };
                let Some((index, input)) = next.take() else { break };

                counters.in_flight.fetch_add(1, Ordering::SeqCst);
                let orchestrator = Arc::clone(&orchestrator);
                let task_counters = Arc::clone(&counters);
                let record = ProviderRecord::new(input.clone());
                let handle = tasks.spawn(async move {
                    let _permit = permit;
                    let run = tokio::time::timeout(timeout, orchestrator.run(record)).await;
                    task_counters.in_flight.fetch_sub(1, Ordering::SeqCst);
                    task_counters.settle(matches!(&run, Ok(Ok(outcome)) if outcome.is_done()));
                    run
                });
                running.insert(handle.id(), (index, input));
                next = queue.next();
            }
        }
    }

    // Anything still queued was never dispatched.
    let mut cancelled = 0usize;
    for (index, input) in next.into_iter().chain(queue) {
        counters.settle(false);
        cancelled += 1;
        slots[index] = Some(failed_without_run(
            input,
            FailureReason::Cancelled,
            "batch cancelled before dispatch".into(),
        ));
    }
    if cancelled > 0 {
        warn!(cancelled, "batch cancelled; undispatched records failed");
    }

    while let Some(joined) = tasks.join_next_with_id().await {
        if let Some((index, outcome)) = conclude(joined, &mut running, &counters, timeout) {
            slots[index] = Some(outcome);
        }
    }

    let outcomes: Vec<RecordOutcome> = slots.into_iter().flatten().collect();
    if outcomes.len() != total {
        error!(
            expected = total,
            actual = outcomes.len(),
            "batch lost track of records"
        );
    }
    let summary = BatchSummary::from_outcomes(&outcomes, started.elapsed());
    info!(
        done = summary.done,
        failed = summary.failed,
        timed_out = summary.timed_out,
        cancelled = summary.cancelled,
        elapsed_ms = summary.elapsed_ms,
        "batch finished"
    );

    report_tx.send_replace(Some(Arc::new(BatchReport {
        batch_id,
        outcomes,
        summary,
    })));
}
