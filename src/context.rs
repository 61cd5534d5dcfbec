// src/context.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};

use crate::bus::EventBus;
use crate::error::ReactorError;
use crate::eventloop::{current_loop, EventLoop, TimerHandle};
use crate::future::{Future, Promise};
use crate::options::{ContextOptions, PoolOptions};
use crate::pool::WorkerPool;

/// Hook invoked whenever a callback error is caught at a loop boundary.
pub(crate) type ExceptionHook = Arc<RwLock<Option<Arc<dyn Fn(&ReactorError) + Send + Sync + 'static>>>>;

/// Round-robin assignment of event loops to components created off-loop.
/// Beyond this rotation there is no fairness scheduling between loops.
#[derive(Clone)]
pub(crate) struct LoopAssigner {
  inner: Arc<AssignerInner>,
}

struct AssignerInner {
  loops: Vec<EventLoop>,
  cursor: AtomicUsize,
}

impl LoopAssigner {
  pub(crate) fn new(loops: Vec<EventLoop>) -> Self {
    debug_assert!(!loops.is_empty());
    Self {
      inner: Arc::new(AssignerInner {
        loops,
        cursor: AtomicUsize::new(0),
      }),
    }
  }

  pub(crate) fn loops(&self) -> &[EventLoop] {
    &self.inner.loops
  }

  /// The next loop in rotation.
  pub(crate) fn next(&self) -> EventLoop {
    let index = self.inner.cursor.fetch_add(1, Ordering::Relaxed) % self.inner.loops.len();
    self.inner.loops[index].clone()
  }

  /// The loop owning the current thread, or the next one in rotation when
  /// called from a non-loop thread.
  pub(crate) fn resolve(&self) -> EventLoop {
    current_loop().unwrap_or_else(|| self.next())
  }
}

/// Entry point of the reactor runtime: owns the event loops, the worker
/// pools, and the event bus. Handles are cheap to clone and share one
/// runtime; lifecycle ends with an explicit [`Context::term`].
#[derive(Clone)]
pub struct Context {
  inner: Arc<ContextInner>,
}

struct ContextInner {
  options: ContextOptions,
  assigner: LoopAssigner,
  loop_threads: Mutex<Vec<JoinHandle<()>>>,
  /// Named pools, shared by name: creating an existing name returns the
  /// registered instance.
  pools: RwLock<HashMap<String, WorkerPool>>,
  default_pool: OnceCell<WorkerPool>,
  bus: EventBus,
  exception_hook: ExceptionHook,
  shutdown_initiated: AtomicBool,
}

impl Context {
  /// Creates a context with default options.
  pub fn new() -> Result<Self, ReactorError> {
    Self::with_options(ContextOptions::default())
  }

  /// Creates a context, spawning one thread per configured event loop.
  pub fn with_options(options: ContextOptions) -> Result<Self, ReactorError> {
    options.validate()?;

    let exception_hook: ExceptionHook = Arc::new(RwLock::new(None));
    let mut loops = Vec::with_capacity(options.event_loops);
    for id in 0..options.event_loops {
      loops.push(EventLoop::new(
        id,
        format!("strand-loop-{id}"),
        options.rearm_policy,
        options.blocked_callback_warn,
        exception_hook.clone(),
      ));
    }

    let mut loop_threads = Vec::with_capacity(loops.len());
    for event_loop in &loops {
      let runner = event_loop.clone();
      let spawned = std::thread::Builder::new()
        .name(event_loop.name().to_string())
        .spawn(move || runner.run_loop());
      match spawned {
        Ok(handle) => loop_threads.push(handle),
        Err(error) => {
          for started in &loops {
            started.stop();
          }
          return Err(ReactorError::Internal(format!(
            "failed to spawn event loop thread: {error}"
          )));
        }
      }
    }

    let assigner = LoopAssigner::new(loops);
    let bus = EventBus::new(assigner.clone(), options.bus.clone());
    tracing::debug!(event_loops = options.event_loops, "Context created");

    Ok(Self {
      inner: Arc::new(ContextInner {
        options,
        assigner,
        loop_threads: Mutex::new(loop_threads),
        pools: RwLock::new(HashMap::new()),
        default_pool: OnceCell::new(),
        bus,
        exception_hook,
        shutdown_initiated: AtomicBool::new(false),
      }),
    })
  }

  /// Hands out an event loop, rotating round-robin through the set.
  pub fn event_loop(&self) -> EventLoop {
    self.inner.assigner.next()
  }

  /// The context's event bus.
  pub fn bus(&self) -> &EventBus {
    &self.inner.bus
  }

  /// Creates a promise whose handlers are delivered on the current loop,
  /// or on a round-robin assigned one when called off-loop.
  pub fn promise<T: Clone + Send + 'static>(&self) -> Promise<T> {
    Promise::on_loop(self.inner.assigner.resolve())
  }

  /// Arms a one-shot timer on the current loop (or an assigned one).
  pub fn set_timer(
    &self,
    delay: Duration,
    callback: impl FnOnce() + Send + 'static,
  ) -> Result<TimerHandle, ReactorError> {
    self.inner.assigner.resolve().set_timer(delay, callback)
  }

  /// Arms a periodic timer on the current loop (or an assigned one).
  pub fn set_periodic(
    &self,
    period: Duration,
    callback: impl FnMut() + Send + 'static,
  ) -> Result<TimerHandle, ReactorError> {
    self.inner.assigner.resolve().set_periodic(period, callback)
  }

  /// Submits blocking work to the shared default pool.
  pub fn execute_blocking<T, F>(&self, f: F) -> Future<T>
  where
    T: Clone + Send + 'static,
    F: FnOnce() -> Result<T, ReactorError> + Send + 'static,
  {
    self.default_pool().execute_blocking(f)
  }

  fn default_pool(&self) -> &WorkerPool {
    self.inner.default_pool.get_or_init(|| {
      WorkerPool::new(
        "strand-worker",
        self.inner.options.worker_pool.clone(),
        self.inner.assigner.clone(),
      )
    })
  }

  /// Creates a named worker pool, or returns the already-registered pool
  /// of the same name (the options of the first creation win).
  pub fn create_pool(&self, name: &str, options: PoolOptions) -> Result<WorkerPool, ReactorError> {
    options.validate()?;
    if self.is_terminated() {
      return Err(ReactorError::InvalidState("context is terminated"));
    }
    let mut pools = self.inner.pools.write();
    if let Some(existing) = pools.get(name) {
      tracing::debug!(pool = name, "Returning shared worker pool");
      return Ok(existing.clone());
    }
    let pool = WorkerPool::new(name, options, self.inner.assigner.clone());
    pools.insert(name.to_string(), pool.clone());
    Ok(pool)
  }

  /// Installs the hook invoked whenever a callback error is caught at a
  /// loop boundary. Replaces any previously installed hook.
  pub fn exception_handler(&self, handler: impl Fn(&ReactorError) + Send + Sync + 'static) {
    *self.inner.exception_hook.write() = Some(Arc::new(handler));
  }

  /// Whether `term` has been called.
  pub fn is_terminated(&self) -> bool {
    self.inner.shutdown_initiated.load(Ordering::Acquire)
  }

  /// Terminates the runtime: stops every loop (outstanding callbacks and
  /// timers are discarded, not invoked), closes every pool (queued and
  /// in-flight work finishes), and joins all threads. Idempotent.
  pub fn term(&self) {
    if self.inner.shutdown_initiated.swap(true, Ordering::AcqRel) {
      return;
    }
    tracing::debug!("Context termination initiated");

    for event_loop in self.inner.assigner.loops() {
      event_loop.stop();
    }

    let pools: Vec<WorkerPool> = {
      let mut registered: Vec<WorkerPool> = self.inner.pools.read().values().cloned().collect();
      if let Some(default_pool) = self.inner.default_pool.get() {
        registered.push(default_pool.clone());
      }
      registered
    };
    for pool in &pools {
      pool.close();
    }
    for pool in &pools {
      pool.join();
    }

    let current = std::thread::current().id();
    let handles: Vec<JoinHandle<()>> = self.inner.loop_threads.lock().drain(..).collect();
    for handle in handles {
      // A loop thread calling term() cannot join itself; its loop exits on
      // the stop flag regardless.
      if handle.thread().id() != current {
        let _ = handle.join();
      }
    }
    tracing::debug!("Context terminated");
  }
}

impl fmt::Debug for Context {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Context")
      .field("event_loops", &self.inner.assigner.loops().len())
      .field("terminated", &self.is_terminated())
      .finish()
  }
}
