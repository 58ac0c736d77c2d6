use crate::error::TaskError;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Auxiliary parameters handed to a task body at execution time.
///
/// A string-keyed map of arbitrary JSON values. Per-job parameters override
/// pool-wide defaults key-for-key; the meaning and precision of each value
/// is a caller concern, documented at the call site.
pub type JobParams = HashMap<String, Value>;

/// The future a task body returns for one attempt.
pub type TaskFuture<T> = Pin<Box<dyn Future<Output = Result<T, TaskError>> + Send + 'static>>;

/// A task body: invoked with the job's effective parameters, once per
/// attempt. Retried jobs invoke it again after backoff, which is why it is
/// a `Fn` and not a one-shot future.
pub type JobTask<T> = Arc<dyn Fn(JobParams) -> TaskFuture<T> + Send + Sync + 'static>;

/// One submittable unit of work.
///
/// Immutable once submitted. Everything beyond `name` and the task body is
/// an optional override of the pool-wide defaults:
///
/// - `with_deadline` bounds how long the pool listens for the body's result
///   (it never interrupts the body itself).
/// - `with_retry` grants additional attempts after a failing one, with
///   exponential backoff between attempts.
/// - `with_params` supplies auxiliary parameters, merged over the pool
///   defaults key-for-key.
/// - `with_parent_scope` derives the job's cancellable scope from a
///   caller-owned token instead of the pool's root scope.
pub struct Job<T> {
  pub(crate) name: String,
  pub(crate) task: JobTask<T>,
  pub(crate) params: Option<JobParams>,
  pub(crate) deadline: Option<Duration>,
  pub(crate) parent_scope: Option<CancellationToken>,
  pub(crate) retry: u32,
}

impl<T> Job<T> {
  pub fn new<F>(name: impl Into<String>, task: F) -> Self
  where
    F: Fn(JobParams) -> TaskFuture<T> + Send + Sync + 'static,
  {
    Self {
      name: name.into(),
      task: Arc::new(task),
      params: None,
      deadline: None,
      parent_scope: None,
      retry: 0,
    }
  }

  /// Per-job auxiliary parameters. Keys set here win over pool defaults.
  pub fn with_params(mut self, params: JobParams) -> Self {
    self.params = Some(params);
    self
  }

  /// Per-job deadline, overriding the pool default.
  pub fn with_deadline(mut self, deadline: Duration) -> Self {
    self.deadline = Some(deadline);
    self
  }

  /// Derive this job's cancellable scope from a caller-owned token.
  /// Cancelling the token resolves the job to a `Cancelled` outcome.
  pub fn with_parent_scope(mut self, scope: CancellationToken) -> Self {
    self.parent_scope = Some(scope);
    self
  }

  /// Retry budget: the number of additional attempts after the first.
  /// Zero (the default) means a failing body surfaces its error directly.
  pub fn with_retry(mut self, attempts: u32) -> Self {
    self.retry = attempts;
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

impl<T> fmt::Debug for Job<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Job")
      .field("name", &self.name)
      .field("params", &self.params)
      .field("deadline", &self.deadline)
      .field("has_parent_scope", &self.parent_scope.is_some())
      .field("retry", &self.retry)
      .finish_non_exhaustive()
  }
}
