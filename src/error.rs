// src/error.rs

use std::any::Any;

use thiserror::Error;

/// Errors surfaced by the reactor core.
///
/// The enum is `Clone` because a future's terminal state is retained after
/// completion and redelivered to handlers registered later; every handler
/// observes its own copy of the terminal error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReactorError {
  // --- Scheduling ---
  #[error("Event loop is stopped and no longer accepts work")]
  LoopClosed,

  #[error("Uncaught error inside a scheduled callback: {0}")]
  Callback(String),

  // --- Worker Pools ---
  #[error("Worker pool queue is full, submission rejected")]
  PoolSaturated,

  #[error("Worker pool '{0}' is closed")]
  PoolClosed(String),

  // --- Event Bus ---
  #[error("No consumer registered on address: {0}")]
  NoConsumer(String),

  #[error("Reply did not arrive within the configured timeout")]
  ReplyTimeout,

  // --- Futures ---
  #[error("Promise settled more than once; the extra settlement was discarded")]
  DoubleCompletion,

  // --- Usage Errors ---
  #[error("Operation is invalid for the current state: {0}")]
  InvalidState(&'static str),

  #[error("Invalid options: {0}")]
  InvalidOptions(String),

  // --- Internal Errors ---
  #[error("Internal library error: {0}")]
  Internal(String),
}

impl ReactorError {
  /// Converts a panic payload caught at the loop or pool boundary into a
  /// `Callback` error carrying the panic message where one is recoverable.
  pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
      ReactorError::Callback((*msg).to_string())
    } else if let Some(msg) = payload.downcast_ref::<String>() {
      ReactorError::Callback(msg.clone())
    } else {
      ReactorError::Callback("panic with non-string payload".to_string())
    }
  }
}
