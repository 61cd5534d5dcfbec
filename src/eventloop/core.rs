// src/eventloop/core.rs

use std::cell::RefCell;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::context::ExceptionHook;
use crate::error::ReactorError;
use crate::eventloop::task::Task;
use crate::eventloop::timer::{TimerEntry, TimerHandle, TimerKind, TimerState};
use crate::options::RearmPolicy;

thread_local! {
  static CURRENT_LOOP: RefCell<Option<EventLoop>> = const { RefCell::new(None) };
}

/// Returns a handle to the event loop owning the current thread, if the
/// current thread is a loop thread.
pub(crate) fn current_loop() -> Option<EventLoop> {
  CURRENT_LOOP.with(|c| c.borrow().clone())
}

/// Handle to a single-threaded callback scheduler.
///
/// Exactly one thread executes a given loop's callbacks, one at a time, to
/// completion. `schedule` is the only thread-safe entry point; everything
/// else the loop owns (ready queue, timer wheel) is touched exclusively by
/// the loop thread. Handles are cheap to clone.
#[derive(Clone)]
pub struct EventLoop {
  inner: Arc<LoopInner>,
}

struct LoopInner {
  id: usize,
  name: String,
  state: Mutex<LoopState>,
  cv: Condvar,
  stopped: AtomicBool,
  next_timer_id: AtomicU64,
  rearm_policy: RearmPolicy,
  blocked_warn: Option<Duration>,
  exception_hook: ExceptionHook,
}

struct LoopState {
  ready: VecDeque<Task>,
  timers: BinaryHeap<TimerEntry>,
  next_seq: u64,
}

impl EventLoop {
  pub(crate) fn new(
    id: usize,
    name: String,
    rearm_policy: RearmPolicy,
    blocked_warn: Option<Duration>,
    exception_hook: ExceptionHook,
  ) -> Self {
    Self {
      inner: Arc::new(LoopInner {
        id,
        name,
        state: Mutex::new(LoopState {
          ready: VecDeque::new(),
          timers: BinaryHeap::new(),
          next_seq: 0,
        }),
        cv: Condvar::new(),
        stopped: AtomicBool::new(false),
        next_timer_id: AtomicU64::new(1),
        rearm_policy,
        blocked_warn,
        exception_hook,
      }),
    }
  }

  /// The context-unique handle id of this loop.
  pub fn id(&self) -> usize {
    self.inner.id
  }

  /// The loop's thread name.
  pub fn name(&self) -> &str {
    &self.inner.name
  }

  /// Whether the current thread is this loop's thread.
  pub fn is_loop_thread(&self) -> bool {
    current_loop().map_or(false, |l| l.inner.id == self.inner.id)
  }

  /// Whether `stop` has been requested.
  pub fn is_stopped(&self) -> bool {
    self.inner.stopped.load(Ordering::Acquire)
  }

  /// Appends a callback to the ready queue. Thread-safe; callable from any
  /// thread. Callbacks scheduled from the same thread run in FIFO order
  /// relative to other already-ready callbacks.
  pub fn schedule(&self, callback: impl FnOnce() + Send + 'static) -> Result<(), ReactorError> {
    if self.is_stopped() {
      return Err(ReactorError::LoopClosed);
    }
    {
      let mut state = self.inner.state.lock();
      state.ready.push_back(Task::Callback(Box::new(callback)));
    }
    self.inner.cv.notify_one();
    Ok(())
  }

  /// Arms a one-shot timer firing once after `delay` (never early).
  pub fn set_timer(
    &self,
    delay: Duration,
    callback: impl FnOnce() + Send + 'static,
  ) -> Result<TimerHandle, ReactorError> {
    self.arm_timer(delay, |_| TimerKind::Once(Box::new(callback)))
  }

  /// Arms a periodic timer firing every `period` until cancelled. The
  /// re-arm policy is configured context-wide (`RearmPolicy`).
  pub fn set_periodic(
    &self,
    period: Duration,
    callback: impl FnMut() + Send + 'static,
  ) -> Result<TimerHandle, ReactorError> {
    if period.is_zero() {
      return Err(ReactorError::InvalidOptions(
        "periodic timer period must be greater than zero".to_string(),
      ));
    }
    self.arm_timer(period, move |p| TimerKind::Periodic {
      period: p,
      callback: Box::new(callback),
    })
  }

  fn arm_timer(
    &self,
    delay: Duration,
    make_kind: impl FnOnce(Duration) -> TimerKind,
  ) -> Result<TimerHandle, ReactorError> {
    if self.is_stopped() {
      return Err(ReactorError::LoopClosed);
    }
    let id = self.inner.next_timer_id.fetch_add(1, Ordering::Relaxed);
    let state = TimerState::new(id);
    let deadline = Instant::now() + delay;
    {
      let mut loop_state = self.inner.state.lock();
      let seq = loop_state.next_seq;
      loop_state.next_seq += 1;
      loop_state.timers.push(TimerEntry {
        deadline,
        seq,
        state: state.clone(),
        kind: make_kind(delay),
      });
    }
    // The new deadline may be earlier than the one the loop is waiting on.
    self.inner.cv.notify_one();
    tracing::trace!(loop_name = %self.inner.name, timer_id = id, delay_ms = delay.as_millis() as u64, "Timer armed");
    Ok(TimerHandle::new(state))
  }

  /// Halts the run loop. Outstanding callbacks and timers are discarded,
  /// not invoked. Idempotent.
  pub fn stop(&self) {
    if !self.inner.stopped.swap(true, Ordering::AcqRel) {
      tracing::debug!(loop_name = %self.inner.name, "Event loop stop requested");
      self.inner.cv.notify_all();
    }
  }

  /// The loop body, executed by the loop's dedicated thread: drain due
  /// timers into the ready queue, pop one ready task, execute it to
  /// completion, repeat until stopped.
  pub(crate) fn run_loop(&self) {
    CURRENT_LOOP.with(|c| *c.borrow_mut() = Some(self.clone()));
    tracing::debug!(loop_name = %self.inner.name, id = self.inner.id, "Event loop running");
    while let Some(task) = self.next_task() {
      self.execute(task);
    }
    CURRENT_LOOP.with(|c| *c.borrow_mut() = None);
    tracing::debug!(loop_name = %self.inner.name, "Event loop exited");
  }

  fn next_task(&self) -> Option<Task> {
    let mut state = self.inner.state.lock();
    loop {
      if self.inner.stopped.load(Ordering::Acquire) {
        let discarded = state.ready.len() + state.timers.len();
        state.ready.clear();
        state.timers.clear();
        if discarded > 0 {
          tracing::debug!(loop_name = %self.inner.name, discarded, "Discarding outstanding work on stop");
        }
        return None;
      }

      let now = Instant::now();
      loop {
        let due = matches!(state.timers.peek(), Some(entry) if entry.deadline <= now);
        if !due {
          break;
        }
        if let Some(entry) = state.timers.pop() {
          if entry.is_cancelled() {
            continue;
          }
          state.ready.push_back(Task::Timer(entry));
        }
      }

      if let Some(task) = state.ready.pop_front() {
        return Some(task);
      }

      match state.timers.peek().map(|entry| entry.deadline) {
        Some(deadline) => {
          let _ = self.inner.cv.wait_until(&mut state, deadline);
        }
        None => {
          self.inner.cv.wait(&mut state);
        }
      }
    }
  }

  fn execute(&self, task: Task) {
    match task {
      Task::Callback(callback) => self.invoke(callback),
      Task::Timer(entry) => self.fire_timer(entry),
    }
  }

  fn fire_timer(&self, entry: TimerEntry) {
    let TimerEntry {
      deadline,
      seq: _,
      state,
      kind,
    } = entry;
    // Re-check immediately before invocation: a cancellation racing the
    // firing tick resolves in favor of cancellation.
    if state.is_cancelled() {
      tracing::trace!(loop_name = %self.inner.name, timer_id = state.id(), "Skipping cancelled timer");
      return;
    }
    match kind {
      TimerKind::Once(callback) => {
        tracing::trace!(loop_name = %self.inner.name, timer_id = state.id(), "One-shot timer fired");
        self.invoke(callback);
      }
      TimerKind::Periodic { period, mut callback } => {
        self.invoke_periodic(&mut callback);
        if state.is_cancelled() {
          tracing::trace!(loop_name = %self.inner.name, timer_id = state.id(), "Periodic timer cancelled, not re-arming");
          return;
        }
        let next = match self.inner.rearm_policy {
          RearmPolicy::FixedDelay => Instant::now() + period,
          RearmPolicy::FixedSchedule => {
            let now = Instant::now();
            let mut next = deadline + period;
            // Skip forward past periods that were missed entirely.
            while next <= now {
              next += period;
            }
            next
          }
        };
        let mut loop_state = self.inner.state.lock();
        let next_seq = loop_state.next_seq;
        loop_state.next_seq += 1;
        loop_state.timers.push(TimerEntry {
          deadline: next,
          seq: next_seq,
          state,
          kind: TimerKind::Periodic { period, callback },
        });
      }
    }
  }

  fn invoke(&self, callback: Box<dyn FnOnce() + Send + 'static>) {
    let started = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(callback));
    self.after_invoke(started, outcome);
  }

  fn invoke_periodic(&self, callback: &mut (dyn FnMut() + Send)) {
    let started = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| callback()));
    self.after_invoke(started, outcome);
  }

  fn after_invoke(&self, started: Instant, outcome: std::thread::Result<()>) {
    if let Err(payload) = outcome {
      let err = ReactorError::from_panic(payload);
      tracing::error!(loop_name = %self.inner.name, error = %err, "Callback panicked; the loop continues");
      self.report(&err);
    }
    if let Some(limit) = self.inner.blocked_warn {
      let elapsed = started.elapsed();
      if elapsed > limit {
        tracing::warn!(
          loop_name = %self.inner.name,
          elapsed_ms = elapsed.as_millis() as u64,
          limit_ms = limit.as_millis() as u64,
          "Callback blocked the event loop past the configured threshold"
        );
      }
    }
  }

  fn report(&self, err: &ReactorError) {
    let hook = self.inner.exception_hook.read();
    if let Some(handler) = hook.as_ref() {
      handler(err);
    }
  }
}

impl fmt::Debug for EventLoop {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EventLoop")
      .field("id", &self.inner.id)
      .field("name", &self.inner.name)
      .field("stopped", &self.is_stopped())
      .finish()
  }
}
