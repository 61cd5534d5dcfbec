// src/eventloop/task.rs

use crate::eventloop::timer::TimerEntry;

/// A unit of work in the loop's ready queue.
///
/// Due timers are drained into the ready queue as `Timer` tasks so they
/// interleave with plain callbacks in FIFO order; the cancelled flag is
/// checked again at execution time.
pub(crate) enum Task {
  Callback(Box<dyn FnOnce() + Send + 'static>),
  Timer(TimerEntry),
}
