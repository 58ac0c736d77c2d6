use thiserror::Error;

/// Error type produced by caller-supplied task bodies.
///
/// Bodies report failure with whatever error type they like; the pool carries
/// it through to the job's outcome unchanged.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Terminal per-job failures, surfaced in the job's single [`Outcome`].
///
/// None of these abort other jobs, the pool, or the collector.
///
/// [`Outcome`]: crate::Outcome
#[derive(Error, Debug)]
pub enum JobError {
  /// The task body reported failure. After a retry budget is exhausted this
  /// carries the last attempt's error, not a wrapper around it.
  #[error(transparent)]
  Task(TaskError),

  /// The job's effective deadline elapsed before its body (or its retry
  /// sequence) completed. The body may still be running; its eventual
  /// result is discarded.
  #[error("job deadline exceeded")]
  DeadlineExceeded,

  /// The job's cancellable scope was cancelled externally rather than
  /// timing out.
  #[error("job cancelled")]
  Cancelled,

  /// The task body panicked. Panics are terminal and never retried.
  #[error("job task panicked")]
  Panicked,
}

impl JobError {
  pub fn is_deadline_exceeded(&self) -> bool {
    matches!(self, JobError::DeadlineExceeded)
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, JobError::Cancelled)
  }
}

/// Pool-level failures. These are the only errors the pool ever raises
/// synchronously to a caller, and all of them are programmer misuse or a
/// dead collector.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PoolError {
  /// Shutdown has begun (or finished); the pool no longer accepts jobs.
  /// Submissions after shutdown are rejected, never silently dropped.
  #[error("pool is shutting down or already stopped, cannot accept new jobs")]
  PoolShuttingDown,

  /// A stop/collect operation already ran; the teardown sequence executes
  /// at most once and only its first caller receives the outcomes.
  #[error("pool already stopped and collected")]
  AlreadyStopped,

  /// The outcome collector task died before handing back its collection.
  #[error("outcome collector task failed: {0}")]
  CollectorFailed(String),
}
