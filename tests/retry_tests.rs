use futures_roundup::{Job, JobError, JobPool, RetryPolicy, TaskFuture};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Helper to initialize tracing for tests. Once makes repeated calls safe.
fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter =
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,futures_roundup=trace"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

/// A fast backoff so retry tests stay quick.
fn fast_policy() -> RetryPolicy {
  RetryPolicy::new(Duration::from_millis(10), 2.0, Duration::from_millis(80))
}

/// Fails every attempt with `error_message` until (if ever) the
/// `succeed_on`-th attempt, counting attempts through the shared counter.
fn flaky_job(
  name: &str,
  attempts: Arc<AtomicUsize>,
  succeed_on: Option<usize>,
  error_message: &'static str,
) -> Job<String> {
  Job::new(name, move |_params| -> TaskFuture<String> {
    let attempts = attempts.clone();
    Box::pin(async move {
      let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
      match succeed_on {
        Some(target) if attempt >= target => Ok(format!("succeeded_on_attempt_{attempt}")),
        _ => Err(error_message.into()),
      }
    })
  })
}

#[tokio::test]
async fn exhausted_retries_surface_the_underlying_error() {
  setup_tracing_for_test();
  let pool = JobPool::<String>::named("exhaustion_pool", 2, Some(Duration::from_secs(10)));
  pool.set_retry_policy(fast_policy());

  let attempts = Arc::new(AtomicUsize::new(0));
  pool
    .submit(flaky_job("doomed", attempts.clone(), None, "E").with_retry(3))
    .unwrap();

  let outcomes = pool.stop_and_collect().await.unwrap();
  assert_eq!(outcomes.len(), 1);

  // Budget 3 means three retries beyond the first attempt.
  assert_eq!(attempts.load(Ordering::SeqCst), 4);

  // The last attempt's error comes through untouched, not wrapped.
  let error = outcomes[0].error().unwrap();
  assert!(matches!(error, JobError::Task(_)));
  assert_eq!(error.to_string(), "E");
  assert!(outcomes[0].data().is_none());
}

#[tokio::test]
async fn failing_then_succeeding_job_yields_success() {
  setup_tracing_for_test();
  let pool = JobPool::<String>::named("recovery_pool", 2, Some(Duration::from_secs(10)));
  pool.set_retry_policy(fast_policy());

  let attempts = Arc::new(AtomicUsize::new(0));
  pool
    .submit(flaky_job("recovers", attempts.clone(), Some(3), "transient").with_retry(3))
    .unwrap();

  let outcomes = pool.stop_and_collect().await.unwrap();
  assert_eq!(outcomes.len(), 1);
  assert_eq!(attempts.load(Ordering::SeqCst), 3);
  assert!(outcomes[0].is_success());
  assert_eq!(
    outcomes[0].data().map(String::as_str),
    Some("succeeded_on_attempt_3")
  );
}

#[tokio::test]
async fn zero_budget_surfaces_error_without_retrying() {
  setup_tracing_for_test();
  let pool = JobPool::<String>::named("no_retry_pool", 2, Some(Duration::from_secs(5)));

  let attempts = Arc::new(AtomicUsize::new(0));
  pool
    .submit(flaky_job("one_shot", attempts.clone(), None, "first failure"))
    .unwrap();

  let outcomes = pool.stop_and_collect().await.unwrap();
  assert_eq!(outcomes.len(), 1);
  assert_eq!(attempts.load(Ordering::SeqCst), 1);
  // A non-retrying job's error must never be absorbed as "retry-worthy".
  assert_eq!(outcomes[0].error().unwrap().to_string(), "first failure");
}

#[tokio::test]
async fn deadline_aborts_a_retry_sequence_mid_backoff() {
  setup_tracing_for_test();
  let pool = JobPool::<String>::named("impatient_pool", 2, None);
  pool.set_retry_policy(RetryPolicy::new(
    Duration::from_millis(100),
    2.0,
    Duration::from_secs(1),
  ));

  let attempts = Arc::new(AtomicUsize::new(0));
  pool
    .submit(
      flaky_job("never_finishes", attempts.clone(), None, "still failing")
        .with_retry(10)
        .with_deadline(Duration::from_millis(120)),
    )
    .unwrap();

  let outcomes = pool.stop_and_collect().await.unwrap();
  assert_eq!(outcomes.len(), 1);

  // The deadline is the authoritative liveness signal: it wins over the
  // retry sequence, which had budget left.
  assert!(outcomes[0].error().unwrap().is_deadline_exceeded());
  let seen = attempts.load(Ordering::SeqCst);
  assert!(seen >= 1 && seen < 11, "deadline should cut retries short, saw {seen}");
}

#[tokio::test]
async fn retried_job_duration_is_cumulative() {
  setup_tracing_for_test();
  let pool = JobPool::<String>::named("cumulative_pool", 1, Some(Duration::from_secs(10)));
  pool.set_retry_policy(RetryPolicy::new(
    Duration::from_millis(50),
    2.0,
    Duration::from_millis(200),
  ));

  let attempts = Arc::new(AtomicUsize::new(0));
  pool
    .submit(flaky_job("slow_recovery", attempts.clone(), Some(2), "once").with_retry(2))
    .unwrap();

  let outcomes = pool.stop_and_collect().await.unwrap();
  assert!(outcomes[0].is_success());
  // One backoff sleep of 50ms sits between the two attempts, and the
  // duration covers the whole sequence, not just the winning attempt.
  assert!(outcomes[0].duration() >= Duration::from_millis(50));
}
