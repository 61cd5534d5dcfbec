// src/future/promise.rs

use std::fmt;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ReactorError;
use crate::eventloop::{current_loop, EventLoop};

type Handler<T> = Box<dyn FnOnce(Result<T, ReactorError>) + Send + 'static>;

enum Completion<T> {
  Pending,
  Succeeded(T),
  Failed(ReactorError),
}

impl<T> Completion<T> {
  fn tag(&self) -> &'static str {
    match self {
      Completion::Pending => "Pending",
      Completion::Succeeded(_) => "Succeeded",
      Completion::Failed(_) => "Failed",
    }
  }
}

struct FutureState<T> {
  completion: Completion<T>,
  handlers: Vec<Handler<T>>,
  /// Loop that handlers are delivered on. Seeded at creation from the
  /// current thread's loop (if any); overwritten at settlement time when
  /// the completing thread is a loop thread, so handlers always run on the
  /// loop that owns the completing context.
  owner: Option<EventLoop>,
}

struct FutureShared<T> {
  state: Mutex<FutureState<T>>,
}

/// Write side of a single-assignment asynchronous result.
///
/// Clones share the same write side; the first settlement wins and every
/// later attempt is discarded (`complete`/`fail` report the discard,
/// `try_complete`/`try_fail` are the silent variants).
pub struct Promise<T> {
  shared: Arc<FutureShared<T>>,
}

/// Read side of a single-assignment asynchronous result.
///
/// Handlers registered with [`Future::on_complete`] are each invoked exactly
/// once with the terminal value, in registration order, whether they were
/// registered before or after completion (the result is retained).
pub struct Future<T> {
  shared: Arc<FutureShared<T>>,
}

impl<T> Clone for Promise<T> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<T> Clone for Future<T> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<T: Clone + Send + 'static> Promise<T> {
  /// Creates an unsettled promise. When called on a loop thread, handler
  /// delivery is bound to that loop.
  pub fn new() -> Self {
    Self::with_owner(current_loop())
  }

  /// Creates a promise whose handlers are delivered on the given loop.
  pub(crate) fn on_loop(event_loop: EventLoop) -> Self {
    Self::with_owner(Some(event_loop))
  }

  fn with_owner(owner: Option<EventLoop>) -> Self {
    Self {
      shared: Arc::new(FutureShared {
        state: Mutex::new(FutureState {
          completion: Completion::Pending,
          handlers: Vec::new(),
          owner,
        }),
      }),
    }
  }

  /// The read side of this promise.
  pub fn future(&self) -> Future<T> {
    Future {
      shared: self.shared.clone(),
    }
  }

  /// Settles the promise with a success value. A second settlement attempt
  /// is discarded and reported as a programming error.
  pub fn complete(&self, value: T) {
    if !self.settle(Ok(value)) {
      tracing::error!(error = %ReactorError::DoubleCompletion, "Promise::complete on a settled promise");
    }
  }

  /// Settles with a success value; returns `false` (silently) if the
  /// promise was already settled.
  pub fn try_complete(&self, value: T) -> bool {
    self.settle(Ok(value))
  }

  /// Settles the promise with a failure. A second settlement attempt is
  /// discarded and reported as a programming error.
  pub fn fail(&self, error: ReactorError) {
    if !self.settle(Err(error)) {
      tracing::error!(error = %ReactorError::DoubleCompletion, "Promise::fail on a settled promise");
    }
  }

  /// Settles with a failure; returns `false` (silently) if the promise was
  /// already settled.
  pub fn try_fail(&self, error: ReactorError) -> bool {
    self.settle(Err(error))
  }

  /// Single settlement point. Records the terminal state, captures the
  /// completing loop, and hands every registered handler its own copy of
  /// the result. Returns `false` if the promise was already settled.
  pub(crate) fn settle(&self, result: Result<T, ReactorError>) -> bool {
    let (handlers, target) = {
      let mut state = self.shared.state.lock();
      if !matches!(state.completion, Completion::Pending) {
        return false;
      }
      if let Some(current) = current_loop() {
        state.owner = Some(current);
      }
      state.completion = match result.clone() {
        Ok(value) => Completion::Succeeded(value),
        Err(error) => Completion::Failed(error),
      };
      (mem::take(&mut state.handlers), state.owner.clone())
    };
    for handler in handlers {
      dispatch(target.clone(), result.clone(), handler);
    }
    true
  }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Clone + Send + 'static> Future<T> {
  /// Registers a result handler, invoked exactly once with the terminal
  /// value. If the future is already settled the retained result is
  /// redelivered on the owning loop.
  pub fn on_complete(&self, handler: impl FnOnce(Result<T, ReactorError>) + Send + 'static) {
    let mut state = self.shared.state.lock();
    let snapshot = match &state.completion {
      Completion::Pending => None,
      Completion::Succeeded(value) => Some(Ok(value.clone())),
      Completion::Failed(error) => Some(Err(error.clone())),
    };
    match snapshot {
      None => state.handlers.push(Box::new(handler)),
      Some(result) => {
        let target = state.owner.clone();
        drop(state);
        dispatch(target, result, Box::new(handler));
      }
    }
  }

  /// Whether the future has reached a terminal state.
  pub fn is_complete(&self) -> bool {
    !matches!(self.shared.state.lock().completion, Completion::Pending)
  }

  /// Whether the future has succeeded.
  pub fn succeeded(&self) -> bool {
    matches!(self.shared.state.lock().completion, Completion::Succeeded(_))
  }

  /// Whether the future has failed.
  pub fn failed(&self) -> bool {
    matches!(self.shared.state.lock().completion, Completion::Failed(_))
  }

  /// A snapshot of the terminal state, if any. Mostly useful in tests and
  /// for polling-style integration.
  pub fn result(&self) -> Option<Result<T, ReactorError>> {
    let state = self.shared.state.lock();
    match &state.completion {
      Completion::Pending => None,
      Completion::Succeeded(value) => Some(Ok(value.clone())),
      Completion::Failed(error) => Some(Err(error.clone())),
    }
  }

  /// Sequential composition: once this future succeeds, `f` produces the
  /// next future in the chain. A failure of this future propagates to the
  /// derived future without invoking `f`; a panic inside `f` fails the
  /// derived future.
  pub fn compose<U, F>(&self, f: F) -> Future<U>
  where
    U: Clone + Send + 'static,
    F: FnOnce(T) -> Future<U> + Send + 'static,
  {
    let promise = Promise::<U>::new();
    let derived = promise.future();
    self.on_complete(move |result| match result {
      Ok(value) => match catch_unwind(AssertUnwindSafe(move || f(value))) {
        Ok(next) => {
          next.on_complete(move |r| {
            promise.settle(r);
          });
        }
        Err(payload) => {
          promise.settle(Err(ReactorError::from_panic(payload)));
        }
      },
      Err(error) => {
        promise.settle(Err(error));
      }
    });
    derived
  }

  /// Maps the success value; failures propagate unchanged. A panic inside
  /// `f` fails the derived future.
  pub fn map<U, F>(&self, f: F) -> Future<U>
  where
    U: Clone + Send + 'static,
    F: FnOnce(T) -> U + Send + 'static,
  {
    let promise = Promise::<U>::new();
    let derived = promise.future();
    self.on_complete(move |result| match result {
      Ok(value) => match catch_unwind(AssertUnwindSafe(move || f(value))) {
        Ok(mapped) => {
          promise.settle(Ok(mapped));
        }
        Err(payload) => {
          promise.settle(Err(ReactorError::from_panic(payload)));
        }
      },
      Err(error) => {
        promise.settle(Err(error));
      }
    });
    derived
  }
}

/// Hands one handler its copy of the result, on the owning loop when there
/// is one. A handler whose target loop has already stopped is discarded,
/// matching `stop()`'s contract of dropping outstanding callbacks.
fn dispatch<T: Clone + Send + 'static>(
  target: Option<EventLoop>,
  result: Result<T, ReactorError>,
  handler: Handler<T>,
) {
  match target {
    Some(event_loop) => {
      if event_loop.schedule(move || handler(result)).is_err() {
        tracing::trace!("Future handler discarded; owning loop is stopped");
      }
    }
    None => handler(result),
  }
}

impl<T> fmt::Debug for Promise<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Promise")
      .field("state", &self.shared.state.lock().completion.tag())
      .finish()
  }
}

impl<T> fmt::Debug for Future<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Future")
      .field("state", &self.shared.state.lock().completion.tag())
      .finish()
  }
}
