// src/eventloop/timer.rs

//! Timer wheel entries and the cancellable handle returned to callers.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cancellation state shared between a [`TimerHandle`] and the loop-owned
/// heap entry. The loop re-checks the flag immediately before invoking the
/// callback, so a cancellation racing a due timer resolves in favor of
/// cancellation.
#[derive(Debug)]
pub(crate) struct TimerState {
  id: u64,
  cancelled: AtomicBool,
}

impl TimerState {
  pub(crate) fn new(id: u64) -> Arc<Self> {
    Arc::new(Self {
      id,
      cancelled: AtomicBool::new(false),
    })
  }

  pub(crate) fn id(&self) -> u64 {
    self.id
  }

  pub(crate) fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::Acquire)
  }

  pub(crate) fn cancel(&self) {
    self.cancelled.store(true, Ordering::Release);
  }
}

/// Cancellable handle returned by `set_timer` / `set_periodic`.
///
/// Dropping the handle does NOT cancel the timer; cancellation is explicit.
#[derive(Clone)]
pub struct TimerHandle {
  state: Arc<TimerState>,
}

impl TimerHandle {
  pub(crate) fn new(state: Arc<TimerState>) -> Self {
    Self { state }
  }

  /// The loop-unique id of this timer.
  pub fn id(&self) -> u64 {
    self.state.id()
  }

  /// Requests cancellation. A timer cancelled before the loop dequeues it
  /// never fires; a periodic timer cancelled from within its own callback
  /// is not re-armed.
  pub fn cancel(&self) {
    self.state.cancel();
    tracing::trace!(timer_id = self.state.id(), "Timer cancelled");
  }

  /// Whether cancellation has been requested.
  pub fn is_cancelled(&self) -> bool {
    self.state.is_cancelled()
  }
}

impl fmt::Debug for TimerHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TimerHandle")
      .field("id", &self.state.id())
      .field("cancelled", &self.state.is_cancelled())
      .finish()
  }
}

pub(crate) enum TimerKind {
  Once(Box<dyn FnOnce() + Send + 'static>),
  Periodic {
    period: Duration,
    callback: Box<dyn FnMut() + Send + 'static>,
  },
}

/// A scheduled timer in the loop's min-heap, keyed by due time with a
/// sequence tiebreaker so equal deadlines fire in registration order.
pub(crate) struct TimerEntry {
  pub(crate) deadline: Instant,
  pub(crate) seq: u64,
  pub(crate) state: Arc<TimerState>,
  pub(crate) kind: TimerKind,
}

impl TimerEntry {
  pub(crate) fn is_cancelled(&self) -> bool {
    self.state.is_cancelled()
  }
}

// `BinaryHeap` is a max-heap; order entries so the earliest deadline (then
// the lowest sequence number) surfaces at the top.
impl Ord for TimerEntry {
  fn cmp(&self, other: &Self) -> CmpOrdering {
    other
      .deadline
      .cmp(&self.deadline)
      .then_with(|| other.seq.cmp(&self.seq))
  }
}

impl PartialOrd for TimerEntry {
  fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
    Some(self.cmp(other))
  }
}

impl PartialEq for TimerEntry {
  fn eq(&self, other: &Self) -> bool {
    self.deadline == other.deadline && self.seq == other.seq
  }
}

impl Eq for TimerEntry {}
