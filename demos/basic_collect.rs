use futures_roundup::{Job, JobPool, TaskFuture};
use std::time::Duration;
use tracing::info;

fn fetch_job(name: &str, delay_ms: u64) -> Job<String> {
  let label = name.to_string();
  Job::new(name, move |_params| -> TaskFuture<String> {
    let label = label.clone();
    Box::pin(async move {
      info!("{} starting, will take {}ms", label, delay_ms);
      tokio::time::sleep(Duration::from_millis(delay_ms)).await;
      Ok(format!("{label} finished after {delay_ms}ms"))
    })
  })
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Basic Collect Demo ---");

  let pool = JobPool::<String>::named("basic_pool", 2, Some(Duration::from_secs(10)));

  for i in 0..5u64 {
    // Staggered delays for variety.
    let delay_ms = 200 + (i % 3) * 150;
    if let Err(e) = pool.submit(fetch_job(&format!("fetch_{i}"), delay_ms)) {
      tracing::error!("failed to submit fetch_{}: {}", i, e);
    }
  }

  info!("all jobs submitted, backlog depth: {}", pool.waiting_queue_size());

  let outcomes = pool.stop_and_collect().await.expect("pool stop failed");
  for outcome in &outcomes {
    match outcome.data() {
      Some(data) => info!("{}: {} ({:?})", outcome.name(), data, outcome.duration()),
      None => info!("{}: error {} ({:?})", outcome.name(), outcome.error().unwrap(), outcome.duration()),
    }
  }

  info!("collected {} outcomes", outcomes.len());
  info!("--- Basic Collect Demo End ---");
}
