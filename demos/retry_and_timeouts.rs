use futures_roundup::{Job, JobPool, RetryPolicy, TaskFuture};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Retry and Timeouts Demo ---");

  let pool = JobPool::<String>::named("retry_pool", 3, Some(Duration::from_secs(5)));
  pool.set_retry_policy(RetryPolicy::new(
    Duration::from_millis(100),
    2.0,
    Duration::from_secs(1),
  ));

  // Succeeds on its third attempt.
  let attempts = Arc::new(AtomicUsize::new(0));
  let flaky = Job::new("flaky_upstream", move |_params| -> TaskFuture<String> {
    let attempts = attempts.clone();
    Box::pin(async move {
      let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
      if n < 3 {
        info!("flaky_upstream attempt {} failing", n);
        Err(format!("connection reset (attempt {n})").into())
      } else {
        Ok(format!("recovered on attempt {n}"))
      }
    })
  })
  .with_retry(4);

  // Sleeps far past its deadline; the pool stops listening at 300ms and
  // the body's eventual result is discarded.
  let sluggish = Job::new("sluggish_scan", |_params| -> TaskFuture<String> {
    Box::pin(async {
      tokio::time::sleep(Duration::from_secs(30)).await;
      Ok("nobody will ever see this".to_string())
    })
  })
  .with_deadline(Duration::from_millis(300));

  // Fails every attempt; the retry budget runs out and the last error
  // surfaces as-is.
  let doomed = Job::new("doomed_probe", |_params| -> TaskFuture<String> {
    Box::pin(async { Err("certificate expired".into()) })
  })
  .with_retry(2);

  pool.submit_all([flaky, sluggish, doomed]).expect("submit failed");

  let outcomes = pool.stop_and_collect().await.expect("pool stop failed");
  for outcome in &outcomes {
    match outcome.data() {
      Some(data) => info!("{}: ok: {} ({:?})", outcome.name(), data, outcome.duration()),
      None => info!(
        "{}: failed: {} ({:?})",
        outcome.name(),
        outcome.error().unwrap(),
        outcome.duration()
      ),
    }
  }

  info!("--- Retry and Timeouts Demo End ---");
}
