use crate::error::PoolError;
use crate::job::{Job, JobParams};
use crate::outcome::Outcome;
use crate::retry::RetryPolicy;
use crate::runner::{build_work_unit, RunSpec};
use crate::worker_pool::WorkerPool;

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_JOB_ID: AtomicU64 = AtomicU64::new(0);
}

/// A job pool: submits [`Job`]s onto a bounded [`WorkerPool`], bounds each
/// job's execution time, retries failures with exponential backoff, and
/// aggregates every job's [`Outcome`] into one collectible set.
///
/// For every accepted submission, exactly one outcome eventually lands in
/// the collection returned by [`stop_and_collect`] — never zero, never more
/// than one — regardless of how many jobs fail, time out, or retry.
///
/// Generic over `T`, the success payload type jobs produce.
///
/// [`stop_and_collect`]: JobPool::stop_and_collect
pub struct JobPool<T: Send + 'static> {
  name: Arc<String>,
  workers: WorkerPool,
  tokio_handle: TokioHandle,
  default_deadline: Option<Duration>,
  default_params: RwLock<JobParams>,
  retry_policy: RwLock<RetryPolicy>,
  root_scope: CancellationToken,
  outcomes_tx: Mutex<Option<UnboundedSender<Outcome<T>>>>,
  collector: Mutex<Option<JoinHandle<Vec<Outcome<T>>>>>,
}

impl<T: Send + 'static> JobPool<T> {
  /// Creates a pool with `max_workers` concurrent workers and an optional
  /// default deadline applied to jobs that do not carry their own.
  /// `None` means jobs without a deadline are waited on forever (they stay
  /// cancellable through their scope).
  ///
  /// Must be called from within a tokio runtime.
  pub fn new(max_workers: usize, default_deadline: Option<Duration>) -> Self {
    Self::named("job_pool", max_workers, default_deadline)
  }

  /// Like [`new`](JobPool::new), with a pool name carried into every
  /// tracing span this pool emits.
  pub fn named(name: &str, max_workers: usize, default_deadline: Option<Duration>) -> Self {
    Self::with_handle(name, max_workers, default_deadline, TokioHandle::current())
  }

  /// Full-control constructor: explicit runtime handle.
  pub fn with_handle(
    name: &str,
    max_workers: usize,
    default_deadline: Option<Duration>,
    tokio_handle: TokioHandle,
  ) -> Self {
    let name = Arc::new(name.to_string());
    let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();

    let collector = tokio_handle.spawn(
      Self::run_collector_loop(outcomes_rx, name.clone())
        .instrument(info_span!("outcome_collector", pool = %name)),
    );

    Self {
      workers: WorkerPool::new(max_workers, tokio_handle.clone(), &name),
      tokio_handle,
      default_deadline,
      default_params: RwLock::new(JobParams::new()),
      retry_policy: RwLock::new(RetryPolicy::default()),
      root_scope: CancellationToken::new(),
      outcomes_tx: Mutex::new(Some(outcomes_tx)),
      collector: Mutex::new(Some(collector)),
      name,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Point-in-time backlog depth, safe to call concurrently with submission.
  pub fn waiting_queue_size(&self) -> usize {
    self.workers.waiting_queue_size()
  }

  /// Default auxiliary parameters for jobs submitted afterward. Jobs that
  /// carry their own parameters override these key-for-key; jobs already
  /// submitted are unaffected.
  pub fn set_default_params(&self, params: JobParams) {
    *self.default_params.write() = params;
  }

  /// Backoff schedule for retried jobs submitted afterward.
  pub fn set_retry_policy(&self, policy: RetryPolicy) {
    *self.retry_policy.write() = policy;
  }

  /// Submits a job without blocking: the backlog is unbounded, bounded only
  /// by memory ([`waiting_queue_size`](JobPool::waiting_queue_size) is the
  /// caller's backpressure hook).
  ///
  /// Fails with [`PoolError::PoolShuttingDown`] once a stop/collect
  /// operation has begun; submissions are rejected, never silently dropped.
  pub fn submit(&self, job: Job<T>) -> Result<(), PoolError> {
    let outcomes_tx = match &*self.outcomes_tx.lock() {
      Some(tx) => tx.clone(),
      None => return Err(PoolError::PoolShuttingDown),
    };

    let job_id = NEXT_JOB_ID.fetch_add(1, AtomicOrdering::Relaxed);
    // Defaults are resolved now, not at execution, so later calls to
    // set_default_params never affect jobs already submitted.
    let params = self.effective_params(job.params);
    let deadline = job.deadline.or(self.default_deadline);
    let parent_scope = job.parent_scope.unwrap_or_else(|| self.root_scope.clone());
    let retry_policy = *self.retry_policy.read();

    debug!(
      pool = %*self.name,
      job_id,
      name = %job.name,
      retry = job.retry,
      ?deadline,
      "submitting job"
    );

    let spec = RunSpec {
      job_id,
      name: job.name,
      task: job.task,
      params,
      deadline,
      parent_scope,
      retry: job.retry,
      retry_policy,
    };
    let unit = build_work_unit(spec, outcomes_tx, self.tokio_handle.clone());
    self.workers.submit(unit)
  }

  /// Submits each job independently, failing fast on the first rejection.
  /// No ordering or atomicity guarantee across the batch.
  pub fn submit_all(&self, jobs: impl IntoIterator<Item = Job<T>>) -> Result<(), PoolError> {
    for job in jobs {
      self.submit(job)?;
    }
    Ok(())
  }

  /// Stops accepting jobs, runs everything queued and in flight to its
  /// outcome, then returns the full collection.
  ///
  /// The ordering is load-bearing: the worker drain completes before the
  /// outcome channel closes, so a worker can never find the channel closed
  /// while forwarding. The teardown runs at most once; concurrent or
  /// repeated callers get [`PoolError::AlreadyStopped`].
  pub async fn stop_and_collect(&self) -> Result<Vec<Outcome<T>>, PoolError> {
    let collector = self
      .collector
      .lock()
      .take()
      .ok_or(PoolError::AlreadyStopped)?;

    info!(pool = %*self.name, "stop_and_collect: draining workers");
    self.workers.stop_wait().await;

    // Every accepted job has forwarded its outcome; dropping the last
    // sender closes the channel and lets the collector finish draining.
    drop(self.outcomes_tx.lock().take());

    let outcomes = collector
      .await
      .map_err(|join_error| PoolError::CollectorFailed(join_error.to_string()))?;
    info!(pool = %*self.name, collected = outcomes.len(), "stop_and_collect complete");
    Ok(outcomes)
  }

  /// Stops immediately: queued-but-not-started jobs are abandoned and
  /// produce no outcome; already-started jobs resolve promptly to
  /// `Cancelled` outcomes (unless their body wins the race first) because
  /// the pool's root scope is cancelled. Best-effort by design.
  pub async fn stop_now_and_collect(&self) -> Result<Vec<Outcome<T>>, PoolError> {
    let collector = self
      .collector
      .lock()
      .take()
      .ok_or(PoolError::AlreadyStopped)?;

    info!(pool = %*self.name, "stop_now_and_collect: cancelling in-flight jobs");
    // Halt the dispatcher before cancelling the root scope: cancellation
    // frees worker permits, and a still-running dispatcher could spend one
    // on a queued job that is supposed to be abandoned.
    self.workers.halt();
    self.root_scope.cancel();
    self.workers.stop_now().await;
    drop(self.outcomes_tx.lock().take());

    let outcomes = collector
      .await
      .map_err(|join_error| PoolError::CollectorFailed(join_error.to_string()))?;
    info!(pool = %*self.name, collected = outcomes.len(), "stop_now_and_collect complete");
    Ok(outcomes)
  }

  fn effective_params(&self, job_params: Option<JobParams>) -> JobParams {
    let defaults = self.default_params.read();
    match job_params {
      None => defaults.clone(),
      Some(mut params) => {
        for (key, value) in defaults.iter() {
          params.entry(key.clone()).or_insert_with(|| value.clone());
        }
        params
      }
    }
  }

  /// The sole owner of the accumulated collection. Appends every outcome
  /// in arrival order (completion order, not submission order) until the
  /// channel closes, then hands the collection back through its join
  /// handle — awaiting that handle is the done signal.
  async fn run_collector_loop(
    mut outcomes_rx: UnboundedReceiver<Outcome<T>>,
    pool_name: Arc<String>,
  ) -> Vec<Outcome<T>> {
    info!(pool = %*pool_name, "outcome collector started");
    let mut outcomes = Vec::new();

    while let Some(outcome) = outcomes_rx.recv().await {
      trace!(pool = %*pool_name, job = outcome.name(), success = outcome.is_success(), "outcome collected");
      outcomes.push(outcome);
    }

    info!(pool = %*pool_name, collected = outcomes.len(), "outcome channel closed, collector finished");
    outcomes
  }
}

impl<T: Send + 'static> Drop for JobPool<T> {
  fn drop(&mut self) {
    // Explicit stop paths already took the collector handle. If it is
    // still here the pool was dropped without stopping: signal everything
    // down without blocking and let the loops wind down on their own.
    if self.collector.lock().is_some() {
      info!(pool = %*self.name, "pool dropped without explicit stop, signalling teardown");
      self.root_scope.cancel();
      drop(self.outcomes_tx.lock().take());
      self.workers.halt();
    }
  }
}
