use crate::error::JobError;

use std::time::Duration;

/// The single terminal result of one submitted job.
///
/// Exactly one `Outcome` is produced per accepted submission, whether the
/// job succeeded, failed, timed out, or was cancelled. Success and failure
/// are carried in `data`/`error`; `name` and `duration` are always stamped.
#[derive(Debug)]
pub struct Outcome<T> {
  name: String,
  data: Option<T>,
  error: Option<JobError>,
  duration: Duration,
}

impl<T> Outcome<T> {
  pub(crate) fn from_result(name: String, result: Result<T, JobError>, duration: Duration) -> Self {
    match result {
      Ok(data) => Self {
        name,
        data: Some(data),
        error: None,
        duration,
      },
      Err(error) => Self {
        name,
        data: None,
        error: Some(error),
        duration,
      },
    }
  }

  /// The name of the job that produced this outcome.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// The job's payload, if it completed successfully.
  pub fn data(&self) -> Option<&T> {
    self.data.as_ref()
  }

  /// Consumes the outcome and returns the payload, if any.
  pub fn into_data(self) -> Option<T> {
    self.data
  }

  /// The job's terminal error, if it failed, timed out, or was cancelled.
  pub fn error(&self) -> Option<&JobError> {
    self.error.as_ref()
  }

  pub fn is_success(&self) -> bool {
    self.error.is_none()
  }

  /// Wall-clock time from the moment a worker picked the job up until its
  /// outcome was resolved. For retried jobs this is cumulative across all
  /// attempts and backoff sleeps, not the last attempt alone.
  pub fn duration(&self) -> Duration {
    self.duration
  }
}
