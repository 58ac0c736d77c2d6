use crate::error::JobError;
use crate::job::{JobParams, JobTask};
use crate::outcome::Outcome;
use crate::retry::RetryPolicy;
use crate::worker_pool::WorkUnit;

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, trace, warn, Instrument};

/// Everything the execution wrapper needs for one submission, resolved
/// against the pool defaults at submit time.
pub(crate) struct RunSpec<T> {
  pub(crate) job_id: u64,
  pub(crate) name: String,
  pub(crate) task: JobTask<T>,
  pub(crate) params: JobParams,
  pub(crate) deadline: Option<Duration>,
  pub(crate) parent_scope: CancellationToken,
  pub(crate) retry: u32,
  pub(crate) retry_policy: RetryPolicy,
}

/// Converts one resolved submission into the work unit handed to the
/// [`WorkerPool`](crate::WorkerPool).
///
/// The unit spawns the task body (with its retry loop) as an independent
/// task, then races body completion against the job's cancellable scope and
/// deadline in a single select. Exactly one branch resolves, so exactly one
/// outcome is built and forwarded — that structure is the
/// one-outcome-per-job guarantee.
///
/// The select is biased with the scope and deadline arms first: when a body
/// result and an expired scope are ready in the same poll, the scope wins.
/// A body that finishes after the race has resolved finds its private
/// channel closed and its result is discarded.
pub(crate) fn build_work_unit<T: Send + 'static>(
  spec: RunSpec<T>,
  outcomes_tx: UnboundedSender<Outcome<T>>,
  tokio_handle: TokioHandle,
) -> WorkUnit {
  let RunSpec {
    job_id,
    name,
    task,
    params,
    deadline,
    parent_scope,
    retry,
    retry_policy,
  } = spec;

  Box::pin(async move {
    let started = Instant::now();
    let scope = parent_scope.child_token();
    let (body_tx, body_rx) = oneshot::channel::<Result<T, JobError>>();

    let body_span = debug_span!("job_body", job_id, name = %name);
    tokio_handle.spawn(
      async move {
        let result = run_attempts(task, params, retry, retry_policy, job_id).await;
        if body_tx.send(result).is_err() {
          trace!(job_id, "listener already resolved, late result discarded");
        }
      }
      .instrument(body_span),
    );

    let result: Result<T, JobError> = tokio::select! {
      biased;

      _ = scope.cancelled() => {
        debug!(job_id, name = %name, "job scope cancelled");
        Err(JobError::Cancelled)
      }

      _ = deadline_elapsed(deadline) => {
        debug!(job_id, name = %name, "job deadline exceeded");
        Err(JobError::DeadlineExceeded)
      }

      received = body_rx => match received {
        Ok(body_result) => body_result,
        // The body task died without sending anything. Synthesize a
        // failure so the job still yields its one outcome.
        Err(_) => {
          warn!(job_id, name = %name, "body task dropped its result channel");
          Err(JobError::Panicked)
        }
      },
    };

    let outcome = Outcome::from_result(name, result, started.elapsed());
    if outcomes_tx.send(outcome).is_err() {
      warn!(job_id, "outcome channel closed, outcome dropped");
    }

    scope.cancel();
  })
}

/// The retry state machine: no error means done; an error with attempts
/// remaining sleeps out the backoff and tries again; an error with the
/// budget spent surfaces the last task error unchanged. A budget of zero
/// degenerates to a single attempt whose error surfaces immediately.
///
/// Panicking attempts are caught and terminal, never retried.
async fn run_attempts<T: Send + 'static>(
  task: JobTask<T>,
  params: JobParams,
  retry_budget: u32,
  policy: RetryPolicy,
  job_id: u64,
) -> Result<T, JobError> {
  let mut attempt: u32 = 0;

  loop {
    let attempt_future = (task)(params.clone());
    match AssertUnwindSafe(attempt_future).catch_unwind().await {
      Ok(Ok(data)) => return Ok(data),
      Ok(Err(task_error)) => {
        if attempt < retry_budget {
          let delay = policy.delay_for(attempt);
          debug!(
            job_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %task_error,
            "attempt failed, backing off before retry"
          );
          sleep(delay).await;
          attempt += 1;
        } else {
          return Err(JobError::Task(task_error));
        }
      }
      Err(_panic_payload) => {
        warn!(job_id, attempt, "task body panicked");
        return Err(JobError::Panicked);
      }
    }
  }
}

/// Resolves when the effective deadline elapses; never resolves for jobs
/// without one (they remain cancellable through their scope).
async fn deadline_elapsed(deadline: Option<Duration>) {
  match deadline {
    Some(deadline) => sleep(deadline).await,
    None => futures::future::pending::<()>().await,
  }
}
