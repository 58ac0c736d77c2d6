use crate::error::PoolError;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, trace_span, Instrument};

/// The zero-argument unit of work a [`WorkerPool`] executes.
pub type WorkUnit = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A bounded-concurrency execution primitive: a fixed-size set of workers
/// pulls submitted [`WorkUnit`]s from an unbounded backlog.
///
/// This is the mechanism underneath [`JobPool`]; it knows nothing about
/// jobs, deadlines, retries, or outcomes. Submission is non-blocking.
/// `stop_wait` drains the backlog before returning, `stop_now` abandons it,
/// and both wait for already-running units to finish.
///
/// [`JobPool`]: crate::JobPool
pub struct WorkerPool {
  name: Arc<String>,
  max_workers: usize,
  semaphore: Arc<Semaphore>,
  queue_tx: Mutex<Option<UnboundedSender<WorkUnit>>>,
  queue_depth: Arc<AtomicUsize>,
  halt_token: CancellationToken,
  dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
  pub fn new(max_workers: usize, tokio_handle: TokioHandle, name: &str) -> Self {
    let max_workers = max_workers.max(1);
    let (queue_tx, queue_rx) = mpsc::unbounded_channel();
    let semaphore = Arc::new(Semaphore::new(max_workers));
    let queue_depth = Arc::new(AtomicUsize::new(0));
    let halt_token = CancellationToken::new();
    let name = Arc::new(name.to_string());

    let dispatcher = tokio_handle.clone().spawn(
      Self::run_dispatch_loop(
        name.clone(),
        semaphore.clone(),
        queue_rx,
        queue_depth.clone(),
        tokio_handle.clone(),
        halt_token.clone(),
      )
      .instrument(info_span!("dispatch_loop", pool = %name)),
    );

    Self {
      name,
      max_workers,
      semaphore,
      queue_tx: Mutex::new(Some(queue_tx)),
      queue_depth,
      halt_token,
      dispatcher: Mutex::new(Some(dispatcher)),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Point-in-time backlog depth: units submitted but not yet picked up by
  /// a worker. Safe to call concurrently with submission.
  pub fn waiting_queue_size(&self) -> usize {
    self.queue_depth.load(AtomicOrdering::Relaxed)
  }

  /// Enqueues a unit without blocking. Fails once a stop has begun.
  pub fn submit(&self, unit: WorkUnit) -> Result<(), PoolError> {
    let tx = match &*self.queue_tx.lock() {
      Some(tx) => tx.clone(),
      None => return Err(PoolError::PoolShuttingDown),
    };

    // Incremented before the send so the dispatcher's decrement (which can
    // only happen after the send) never underflows.
    self.queue_depth.fetch_add(1, AtomicOrdering::Relaxed);
    match tx.send(unit) {
      Ok(()) => Ok(()),
      Err(_) => {
        self.queue_depth.fetch_sub(1, AtomicOrdering::Relaxed);
        Err(PoolError::PoolShuttingDown)
      }
    }
  }

  /// Stops accepting new units, runs every unit already in the backlog, and
  /// returns once all of them (and all in-flight units) have finished.
  pub async fn stop_wait(&self) {
    info!(pool = %*self.name, "stop_wait: closing queue and draining");
    drop(self.queue_tx.lock().take());
    self.join_dispatcher().await;
    self.drain_workers().await;
    info!(pool = %*self.name, "stop_wait: all workers drained");
  }

  /// Stops accepting new units and abandons the backlog: queued units are
  /// dropped unexecuted. Returns once in-flight units have finished.
  pub async fn stop_now(&self) {
    info!(pool = %*self.name, "stop_now: abandoning queue");
    self.halt_token.cancel();
    drop(self.queue_tx.lock().take());
    self.join_dispatcher().await;
    self.drain_workers().await;
    // Abandoned units were dropped with the queue, never dequeued.
    self.queue_depth.store(0, AtomicOrdering::Relaxed);
    info!(pool = %*self.name, "stop_now: in-flight workers finished");
  }

  /// Non-blocking teardown signal: stops accepting units and tells the
  /// dispatch loop to exit without waiting for anything. Used from drop
  /// paths, where blocking is not an option; in-flight units finish on
  /// their own.
  pub fn halt(&self) {
    self.halt_token.cancel();
    drop(self.queue_tx.lock().take());
  }

  async fn join_dispatcher(&self) {
    // Take the handle out of the lock before awaiting it.
    let handle = self.dispatcher.lock().take();
    if let Some(handle) = handle {
      if let Err(join_error) = handle.await {
        error!(pool = %*self.name, "dispatch loop panicked: {:?}", join_error);
      }
    }
  }

  /// In-flight units each hold one semaphore permit, so holding every
  /// permit at once is the barrier for "all workers idle".
  async fn drain_workers(&self) {
    match self.semaphore.acquire_many(self.max_workers as u32).await {
      Ok(permits) => drop(permits),
      Err(_) => error!(pool = %*self.name, "worker semaphore closed while draining"),
    }
  }

  async fn run_dispatch_loop(
    name: Arc<String>,
    semaphore: Arc<Semaphore>,
    mut queue_rx: UnboundedReceiver<WorkUnit>,
    queue_depth: Arc<AtomicUsize>,
    tokio_handle: TokioHandle,
    halt_token: CancellationToken,
  ) {
    info!(pool = %*name, "dispatch loop started");

    loop {
      tokio::select! {
        biased;

        _ = halt_token.cancelled() => {
          info!(pool = %*name, "halt requested, dispatch loop terminating");
          break;
        }

        permit_acquisition = semaphore.clone().acquire_owned() => {
          let permit = match permit_acquisition {
            Ok(permit) => permit,
            Err(_) => {
              error!(pool = %*name, "worker semaphore closed, dispatch loop exiting");
              break;
            }
          };

          let unit = tokio::select! {
            biased;
            _ = halt_token.cancelled() => {
              info!(pool = %*name, "halt requested while waiting for work, releasing permit");
              drop(permit);
              break;
            }
            received = queue_rx.recv() => match received {
              Some(unit) => unit,
              None => {
                debug!(pool = %*name, "queue closed and drained, dispatch loop terminating");
                drop(permit);
                break;
              }
            }
          };

          queue_depth.fetch_sub(1, AtomicOrdering::Relaxed);
          trace!(pool = %*name, "dequeued unit, spawning with permit");

          let unit_span = trace_span!("work_unit", pool = %*name);
          tokio_handle.spawn(
            async move {
              let _permit = permit;
              unit.await;
            }
            .instrument(unit_span),
          );
        }
      }
    }

    info!(pool = %*name, "dispatch loop stopped");
  }
}

impl Drop for WorkerPool {
  fn drop(&mut self) {
    // Harmless after an explicit stop; otherwise it lets the dispatch loop
    // terminate instead of waiting forever on an open queue.
    self.halt_token.cancel();
    drop(self.queue_tx.lock().take());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;
  use std::time::Duration;
  use tokio::time::sleep;

  fn counting_unit(counter: Arc<AtomicUsize>, delay: Duration) -> WorkUnit {
    Box::pin(async move {
      sleep(delay).await;
      counter.fetch_add(1, AtomicOrdering::SeqCst);
    })
  }

  #[tokio::test]
  async fn stop_wait_runs_everything_queued() {
    let pool = WorkerPool::new(2, TokioHandle::current(), "drain_pool");
    let ran = Arc::new(AtomicUsize::new(0));

    for _ in 0..8 {
      pool
        .submit(counting_unit(ran.clone(), Duration::from_millis(10)))
        .unwrap();
    }

    pool.stop_wait().await;
    assert_eq!(ran.load(AtomicOrdering::SeqCst), 8);
  }

  #[tokio::test]
  async fn stop_now_abandons_backlog() {
    let pool = WorkerPool::new(1, TokioHandle::current(), "abandon_pool");
    let ran = Arc::new(AtomicUsize::new(0));

    // One long unit occupies the single worker; the rest stay queued.
    pool
      .submit(counting_unit(ran.clone(), Duration::from_millis(200)))
      .unwrap();
    for _ in 0..5 {
      pool
        .submit(counting_unit(ran.clone(), Duration::from_millis(10)))
        .unwrap();
    }

    sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.waiting_queue_size(), 5);

    pool.stop_now().await;
    assert_eq!(ran.load(AtomicOrdering::SeqCst), 1);
  }

  #[tokio::test]
  async fn submit_after_stop_is_rejected() {
    let pool = WorkerPool::new(1, TokioHandle::current(), "closed_pool");
    pool.stop_wait().await;

    let result = pool.submit(Box::pin(async {}));
    assert_eq!(result, Err(PoolError::PoolShuttingDown));
  }

  #[tokio::test]
  async fn parallelism_is_bounded() {
    let pool = WorkerPool::new(2, TokioHandle::current(), "bounded_pool");
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for _ in 0..6 {
      let running = running.clone();
      let peak = peak.clone();
      pool
        .submit(Box::pin(async move {
          let now = running.fetch_add(1, AtomicOrdering::SeqCst) + 1;
          peak.fetch_max(now, AtomicOrdering::SeqCst);
          sleep(Duration::from_millis(30)).await;
          running.fetch_sub(1, AtomicOrdering::SeqCst);
        }))
        .unwrap();
    }

    pool.stop_wait().await;
    assert!(peak.load(AtomicOrdering::SeqCst) <= 2);
  }
}
