// src/pool/mod.rs

//! Named pools of OS threads for blocking work.
//!
//! A pool runs blocking closures off the loop threads and schedules each
//! result back onto the submitting loop, so future settlement and handler
//! invocation always happen on a loop thread. Worker selection is
//! load-balanced, not FIFO-strict: independent submissions may complete
//! out of order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;

use crate::context::LoopAssigner;
use crate::error::ReactorError;
use crate::eventloop::current_loop;
use crate::future::{Future, Promise};
use crate::options::PoolOptions;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a named blocking-work pool. Handles are cheap to clone and all
/// refer to the same pool; `Context::create_pool` returns the shared
/// instance for an already-registered name.
#[derive(Clone)]
pub struct WorkerPool {
  inner: Arc<PoolInner>,
}

struct PoolInner {
  name: String,
  options: PoolOptions,
  sender: Mutex<Option<Sender<Job>>>,
  receiver: Receiver<Job>,
  live: AtomicUsize,
  idle: AtomicUsize,
  next_worker: AtomicUsize,
  closed: AtomicBool,
  threads: Mutex<Vec<JoinHandle<()>>>,
  assigner: LoopAssigner,
}

impl WorkerPool {
  pub(crate) fn new(name: impl Into<String>, options: PoolOptions, assigner: LoopAssigner) -> Self {
    let (sender, receiver) = bounded(options.queue_capacity);
    let name = name.into();
    tracing::debug!(
      pool = %name,
      size = options.size,
      queue_capacity = options.queue_capacity,
      "Worker pool created"
    );
    Self {
      inner: Arc::new(PoolInner {
        name,
        options,
        sender: Mutex::new(Some(sender)),
        receiver,
        live: AtomicUsize::new(0),
        idle: AtomicUsize::new(0),
        next_worker: AtomicUsize::new(0),
        closed: AtomicBool::new(false),
        threads: Mutex::new(Vec::new()),
        assigner,
      }),
    }
  }

  /// The pool's registered name.
  pub fn name(&self) -> &str {
    &self.inner.name
  }

  /// Whether `close` has been called.
  pub fn is_closed(&self) -> bool {
    self.inner.closed.load(Ordering::Acquire)
  }

  /// Submits a blocking closure and returns the future of its result.
  ///
  /// The closure runs on a worker thread, never on a loop thread; its
  /// result (or the error wrapping a panic) settles the future back on the
  /// submitting loop. Submission from a loop thread fails fast with
  /// `PoolSaturated` when the queue is full; submission from other threads
  /// may block for queue space.
  pub fn execute_blocking<T, F>(&self, f: F) -> Future<T>
  where
    T: Clone + Send + 'static,
    F: FnOnce() -> Result<T, ReactorError> + Send + 'static,
  {
    let target = self.inner.assigner.resolve();
    let promise = Promise::on_loop(target.clone());
    let future = promise.future();

    if self.is_closed() {
      promise.fail(ReactorError::PoolClosed(self.inner.name.clone()));
      return future;
    }

    let pool_name = self.inner.name.clone();
    let settle_promise = promise.clone();
    let job: Job = Box::new(move || {
      let result =
        catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| Err(ReactorError::from_panic(payload)));
      // Settlement re-enters the submitting loop; it never happens on the
      // worker thread.
      let scheduled = target.schedule(move || {
        settle_promise.settle(result);
      });
      if scheduled.is_err() {
        tracing::trace!(pool = %pool_name, "Blocking result discarded; submitting loop is stopped");
      }
    });

    match self.enqueue(job) {
      Ok(()) => self.ensure_worker(),
      Err(error) => {
        tracing::warn!(pool = %self.inner.name, error = %error, "Blocking submission rejected");
        promise.fail(error);
      }
    }
    future
  }

  fn enqueue(&self, job: Job) -> Result<(), ReactorError> {
    // Clone the sender out of the lock so a blocking send does not hold it.
    let sender = match self.inner.sender.lock().as_ref() {
      Some(sender) => sender.clone(),
      None => return Err(ReactorError::PoolClosed(self.inner.name.clone())),
    };
    if current_loop().is_some() {
      // The loop thread must stay responsive: fail fast on a full queue.
      match sender.try_send(job) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) => Err(ReactorError::PoolSaturated),
        Err(TrySendError::Disconnected(_)) => Err(ReactorError::PoolClosed(self.inner.name.clone())),
      }
    } else {
      sender
        .send(job)
        .map_err(|_| ReactorError::PoolClosed(self.inner.name.clone()))
    }
  }

  /// Spawns a worker if no idle worker can pick the queued job up and the
  /// pool is below its configured size.
  fn ensure_worker(&self) {
    if self.inner.idle.load(Ordering::Acquire) > 0 {
      return;
    }
    loop {
      let live = self.inner.live.load(Ordering::Acquire);
      if live >= self.inner.options.size {
        return;
      }
      if self
        .inner
        .live
        .compare_exchange(live, live + 1, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
      {
        self.spawn_worker();
        return;
      }
    }
  }

  fn spawn_worker(&self) {
    let worker_index = self.inner.next_worker.fetch_add(1, Ordering::Relaxed);
    let thread_name = format!("{}-{}", self.inner.name, worker_index);
    let inner = self.inner.clone();
    match std::thread::Builder::new()
      .name(thread_name.clone())
      .spawn(move || worker_loop(inner))
    {
      Ok(handle) => {
        self.inner.threads.lock().push(handle);
        tracing::trace!(pool = %self.inner.name, worker = %thread_name, "Worker thread spawned");
      }
      Err(error) => {
        self.inner.live.fetch_sub(1, Ordering::AcqRel);
        tracing::error!(pool = %self.inner.name, error = %error, "Failed to spawn worker thread");
      }
    }
  }

  /// Stops accepting new work. Queued and in-flight items still run to
  /// completion, after which the worker threads exit. Idempotent.
  pub fn close(&self) {
    if self.inner.closed.swap(true, Ordering::AcqRel) {
      return;
    }
    *self.inner.sender.lock() = None;
    tracing::debug!(pool = %self.inner.name, "Worker pool closed; queued work drains");
  }

  /// Joins every worker thread this pool ever spawned. Called by
  /// `Context::term` after `close`.
  pub(crate) fn join(&self) {
    let handles: Vec<JoinHandle<()>> = self.inner.threads.lock().drain(..).collect();
    for handle in handles {
      let _ = handle.join();
    }
  }
}

fn worker_loop(inner: Arc<PoolInner>) {
  loop {
    inner.idle.fetch_add(1, Ordering::AcqRel);
    let received = inner.receiver.recv_timeout(inner.options.idle_timeout);
    inner.idle.fetch_sub(1, Ordering::AcqRel);
    match received {
      Ok(job) => job(),
      Err(RecvTimeoutError::Timeout) => {
        // Deregister first, then take one last look at the queue so a job
        // enqueued during the timeout window is not stranded.
        inner.live.fetch_sub(1, Ordering::AcqRel);
        match inner.receiver.try_recv() {
          Ok(job) => {
            inner.live.fetch_add(1, Ordering::AcqRel);
            job();
          }
          Err(_) => {
            tracing::trace!(pool = %inner.name, "Idle worker exiting");
            return;
          }
        }
      }
      Err(RecvTimeoutError::Disconnected) => {
        inner.live.fetch_sub(1, Ordering::AcqRel);
        tracing::trace!(pool = %inner.name, "Worker exiting; pool closed");
        return;
      }
    }
  }
}

impl std::fmt::Debug for WorkerPool {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("WorkerPool")
      .field("name", &self.inner.name)
      .field("size", &self.inner.options.size)
      .field("live", &self.inner.live.load(Ordering::Relaxed))
      .field("closed", &self.is_closed())
      .finish()
  }
}
