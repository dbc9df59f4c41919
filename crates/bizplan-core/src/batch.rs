//! Batch dispatcher: runs every record through prompt -> model -> writer on a
//! bounded pool of tokio tasks and aggregates the outcomes.
//!
//! Each record is one task. Tasks report back over an mpsc channel to a
//! single aggregator, which owns the [`BatchResult`] and the failure sink, so
//! nothing but the progress counters is shared between tasks.

use std::any::Any;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use crate::failure_log::FailureSink;
use crate::model::{ModelClient, ModelError};
use crate::prompt::PromptTemplate;
use crate::record::BusinessRecord;
use crate::writer::{PlanDocument, PlanWriter, WriteError};

/// Configuration for a batch run.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum number of records in flight at once. Values below 1 act as 1,
    /// and values above the batch size act as the batch size.
    pub concurrency: usize,
    /// Upper bound on a single model call.
    pub task_timeout: Duration,
}

impl BatchConfig {
    pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(600);
    /// Largest limit a semaphore can represent.
    pub const MAX_CONCURRENCY: usize = Semaphore::MAX_PERMITS;

    /// One worker per available CPU.
    pub fn default_concurrency() -> usize {
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(4)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: Self::default_concurrency(),
            task_timeout: Self::DEFAULT_TASK_TIMEOUT,
        }
    }
}

/// Why a single record did not produce a plan.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("batch cancelled before this record was dispatched")]
    Cancelled,

    #[error("task aborted: {0}")]
    Aborted(String),
}

/// One failed record, as stored in [`BatchResult::failures`] and sent to the
/// failure sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Submission index of the record within the batch.
    pub index: usize,
    pub record: BusinessRecord,
    pub message: String,
}

/// Outcome of a whole batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// In submission order.
    pub failures: Vec<Failure>,
    /// Paths of written plans, in submission order.
    pub written: Vec<PathBuf>,
    pub elapsed: Duration,
}

/// Live counters for an in-progress batch. Safe to read from any thread.
#[derive(Debug, Default)]
pub struct BatchProgress {
    total: AtomicUsize,
    completed: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl BatchProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn is_done(&self) -> bool {
        self.completed() >= self.total()
    }

    fn start(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
    }

    fn record(&self, success: bool) {
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.completed.fetch_add(1, Ordering::Relaxed);
    }
}

/// The per-record work: format, generate, write.
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct PlanPipeline {
    pub template: Arc<PromptTemplate>,
    pub model: Arc<dyn ModelClient>,
    pub writer: Arc<dyn PlanWriter>,
}

impl std::fmt::Debug for PlanPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanPipeline")
            .field("model", &self.model.name())
            .finish_non_exhaustive()
    }
}

impl PlanPipeline {
    pub fn new(
        template: PromptTemplate,
        model: Arc<dyn ModelClient>,
        writer: Arc<dyn PlanWriter>,
    ) -> Self {
        Self {
            template: Arc::new(template),
            model,
            writer,
        }
    }

    /// Run one record to completion. `timeout` bounds the model call.
    pub async fn process(
        &self,
        record: &BusinessRecord,
        timeout: Duration,
    ) -> Result<PathBuf, TaskError> {
        let prompt = self.template.render(record);
        let content = match tokio::time::timeout(timeout, self.model.generate(&prompt)).await {
            Ok(result) => result?,
            Err(_elapsed) => return Err(ModelError::Timeout(timeout).into()),
        };
        let plan = PlanDocument::new(record.clone(), content);
        Ok(self.writer.write(&plan).await?)
    }
}

/// Message sent from a finished task back to the aggregator.
struct TaskDone {
    index: usize,
    record: BusinessRecord,
    result: Result<PathBuf, TaskError>,
}

/// Run a batch to completion.
///
/// Every record yields exactly one outcome: a written file or a
/// [`Failure`]. Per-record errors never escape; the only way to stop early
/// is `cancel`, which stops new submissions, lets in-flight tasks finish, and
/// records the rest as [`TaskError::Cancelled`].
pub async fn run_batch(
    records: Vec<BusinessRecord>,
    pipeline: &PlanPipeline,
    config: &BatchConfig,
    sink: &mut dyn FailureSink,
    progress: &BatchProgress,
    cancel: CancellationToken,
) -> BatchResult {
    let started = Instant::now();
    let total = records.len();
    let concurrency = config
        .concurrency
        .clamp(1, total.clamp(1, BatchConfig::MAX_CONCURRENCY));
    progress.start(total);

    tracing::info!(
        total,
        concurrency,
        model = pipeline.model.name(),
        "starting batch"
    );

    let semaphore = Arc::new(Semaphore::new(concurrency));
    let (tx, mut rx) = mpsc::channel::<TaskDone>(concurrency.saturating_mul(2));
    let mut aggregator = Aggregator::new(records.clone(), sink, progress);

    let submit = async move {
        let mut pending = records.into_iter().enumerate();
        let mut unsent = Vec::new();

        while let Some((index, record)) = pending.next() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                tracing::info!(
                    dispatched = index,
                    remaining = total - index,
                    "batch cancelled, no further records will be dispatched"
                );
                unsent.push((index, record));
                unsent.extend(pending.by_ref());
                break;
            };

            let pipeline = pipeline.clone();
            let tx = tx.clone();
            let timeout = config.task_timeout;

            tokio::spawn(async move {
                let result = AssertUnwindSafe(pipeline.process(&record, timeout))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(TaskError::Aborted(panic_message(panic.as_ref()))));
                drop(permit);
                let _ = tx.send(TaskDone {
                    index,
                    record,
                    result,
                })
                .await;
            });
        }

        unsent
    };

    let collect = async {
        while let Some(done) = rx.recv().await {
            aggregator.accept(done.index, done.record, done.result);
        }
    };

    let (unsent, ()) = tokio::join!(submit, collect);

    for (index, record) in unsent {
        aggregator.accept(index, record, Err(TaskError::Cancelled));
    }

    let result = aggregator.finish(started.elapsed());
    tracing::info!(
        total = result.total,
        succeeded = result.succeeded,
        failed = result.failed,
        elapsed_ms = u64::try_from(result.elapsed.as_millis()).unwrap_or(u64::MAX),
        "batch finished"
    );
    result
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

type Outcome = Result<PathBuf, Failure>;

/// Collects outcomes by submission index and forwards failures to the sink
/// in submission order, releasing each contiguous completed prefix.
struct Aggregator<'a> {
    /// Every submitted record, by index, so a missing outcome can still name
    /// its business.
    roster: Vec<BusinessRecord>,
    slots: Vec<Option<Outcome>>,
    next_flush: usize,
    sink: &'a mut dyn FailureSink,
    progress: &'a BatchProgress,
}

impl<'a> Aggregator<'a> {
    fn new(
        roster: Vec<BusinessRecord>,
        sink: &'a mut dyn FailureSink,
        progress: &'a BatchProgress,
    ) -> Self {
        Self {
            slots: (0..roster.len()).map(|_| None).collect(),
            roster,
            next_flush: 0,
            sink,
            progress,
        }
    }

    fn accept(&mut self, index: usize, record: BusinessRecord, result: Result<PathBuf, TaskError>) {
        let Some(slot) = self.slots.get_mut(index) else {
            tracing::error!(index, "outcome for unknown record index, ignoring");
            return;
        };
        if slot.is_some() {
            tracing::error!(index, name = %record.name, "duplicate outcome for record, ignoring");
            return;
        }

        let outcome = match result {
            Ok(path) => {
                tracing::info!(name = %record.name, path = %path.display(), "business plan saved");
                Ok(path)
            }
            Err(err) => {
                tracing::warn!(name = %record.name, error = %err, "business plan failed");
                Err(Failure {
                    index,
                    record,
                    message: err.to_string(),
                })
            }
        };
        self.progress.record(outcome.is_ok());
        *slot = Some(outcome);
        self.flush();
    }

    fn flush(&mut self) {
        while let Some(Some(outcome)) = self.slots.get(self.next_flush) {
            if let Err(failure) = outcome {
                if let Err(e) = self.sink.record(failure) {
                    tracing::error!(
                        name = %failure.record.name,
                        error = %e,
                        "failed to record failure in error log"
                    );
                }
            }
            self.next_flush += 1;
        }
    }

    fn finish(mut self, elapsed: Duration) -> BatchResult {
        // A task that vanished without reporting still owes an outcome.
        let missing: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(i, _)| i)
            .collect();
        for index in missing {
            let record = self.roster[index].clone();
            tracing::error!(index, name = %record.name, "task ended without reporting an outcome");
            let outcome = Err(Failure {
                index,
                record,
                message: TaskError::Aborted("no outcome reported".into()).to_string(),
            });
            self.progress.record(false);
            self.slots[index] = Some(outcome);
        }
        self.flush();

        let mut result = BatchResult {
            total: self.slots.len(),
            elapsed,
            ..BatchResult::default()
        };
        for outcome in self.slots.into_iter().flatten() {
            match outcome {
                Ok(path) => {
                    result.succeeded += 1;
                    result.written.push(path);
                }
                Err(failure) => {
                    result.failed += 1;
                    result.failures.push(failure);
                }
            }
        }
        result
    }
}
