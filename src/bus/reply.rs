// src/bus/reply.rs

//! The single-use reply channel behind request/reply messaging.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ReactorError;
use crate::eventloop::{EventLoop, TimerHandle};
use crate::future::Promise;
use crate::message::Msg;

/// Shared between the delivered request `Msg` and the bus-armed timeout
/// timer. Whichever side settles first wins; the slot's promise can be
/// taken exactly once.
pub(crate) struct ReplySlot {
  state: Mutex<ReplyState>,
  reply_loop: EventLoop,
}

struct ReplyState {
  promise: Option<Promise<Msg>>,
  timeout_timer: Option<TimerHandle>,
}

impl ReplySlot {
  pub(crate) fn new(promise: Promise<Msg>, reply_loop: EventLoop) -> Arc<Self> {
    Arc::new(Self {
      state: Mutex::new(ReplyState {
        promise: Some(promise),
        timeout_timer: None,
      }),
      reply_loop,
    })
  }

  pub(crate) fn set_timeout_timer(&self, handle: TimerHandle) {
    let mut state = self.state.lock();
    if state.promise.is_some() {
      state.timeout_timer = Some(handle);
    } else {
      // The exchange settled before the timer was recorded.
      handle.cancel();
    }
  }

  /// Delivers the reply to the requester. Valid exactly once; a second call
  /// reports `DoubleCompletion` and the extra reply is discarded.
  pub(crate) fn fulfill(&self, reply: Msg) -> Result<(), ReactorError> {
    let (promise, timer) = {
      let mut state = self.state.lock();
      match state.promise.take() {
        Some(promise) => (promise, state.timeout_timer.take()),
        None => return Err(ReactorError::DoubleCompletion),
      }
    };
    if let Some(timer) = timer {
      timer.cancel();
    }
    self.settle(promise, Ok(reply));
    Ok(())
  }

  /// Fails the exchange (reply timeout, or the request was undeliverable).
  pub(crate) fn fail(&self, error: ReactorError) {
    let taken = {
      let mut state = self.state.lock();
      state.promise.take().map(|promise| (promise, state.timeout_timer.take()))
    };
    if let Some((promise, timer)) = taken {
      if let Some(timer) = timer {
        timer.cancel();
      }
      self.settle(promise, Err(error));
    }
  }

  /// The reply handler belongs to the requester's loop: completion is
  /// re-scheduled there unless this thread already is that loop.
  fn settle(&self, promise: Promise<Msg>, result: Result<Msg, ReactorError>) {
    if self.reply_loop.is_loop_thread() {
      promise.settle(result);
      return;
    }
    let fallback_promise = promise.clone();
    let fallback_result = result.clone();
    let scheduled = self.reply_loop.schedule(move || {
      promise.settle(result);
    });
    if scheduled.is_err() {
      // Requester loop already stopped; settle here so the state is still
      // observable through `Future::result`.
      fallback_promise.settle(fallback_result);
    }
  }
}
