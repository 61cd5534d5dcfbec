// src/future/composite.rs

//! Concurrent composition over sets of futures: `all`, `any`, `join`.
//!
//! Composites observe their inputs through handler registration only; they
//! hold no reference to an input after its completion has been recorded.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ReactorError;
use crate::future::promise::{Future, Promise};

struct GatherState<T> {
  slots: Vec<Option<T>>,
  remaining: usize,
}

impl<T> GatherState<T> {
  fn new(count: usize) -> Arc<Mutex<Self>> {
    Arc::new(Mutex::new(Self {
      slots: (0..count).map(|_| None).collect(),
      remaining: count,
    }))
  }
}

/// Completes successfully with every input's value, in input order, once
/// all inputs succeed. Fails fast with the first input failure; remaining
/// inputs are not cancelled, their results are simply ignored.
///
/// An empty input set completes immediately with an empty vector.
pub fn all<T>(futures: Vec<Future<T>>) -> Future<Vec<T>>
where
  T: Clone + Send + 'static,
{
  let promise = Promise::<Vec<T>>::new();
  let composite = promise.future();
  let count = futures.len();
  if count == 0 {
    promise.complete(Vec::new());
    return composite;
  }
  let state = GatherState::new(count);
  for (index, future) in futures.into_iter().enumerate() {
    let state = state.clone();
    let promise = promise.clone();
    future.on_complete(move |result| match result {
      Ok(value) => {
        let mut guard = state.lock();
        guard.slots[index] = Some(value);
        guard.remaining -= 1;
        if guard.remaining == 0 {
          let values: Vec<T> = guard.slots.drain(..).flatten().collect();
          drop(guard);
          promise.try_complete(values);
        }
      }
      Err(error) => {
        promise.try_fail(error);
      }
    });
  }
  composite
}

/// Completes successfully with the first input success; fails only once
/// every input has failed, with the last observed failure.
///
/// An empty input set fails immediately: there is no input to succeed.
pub fn any<T>(futures: Vec<Future<T>>) -> Future<T>
where
  T: Clone + Send + 'static,
{
  let promise = Promise::<T>::new();
  let composite = promise.future();
  let count = futures.len();
  if count == 0 {
    promise.fail(ReactorError::InvalidOptions(
      "any() requires at least one input future".to_string(),
    ));
    return composite;
  }
  let failures_left = Arc::new(Mutex::new(count));
  for future in futures {
    let failures_left = failures_left.clone();
    let promise = promise.clone();
    future.on_complete(move |result| match result {
      Ok(value) => {
        promise.try_complete(value);
      }
      Err(error) => {
        let mut remaining = failures_left.lock();
        *remaining -= 1;
        if *remaining == 0 {
          drop(remaining);
          promise.try_fail(error);
        }
      }
    });
  }
  composite
}

/// Waits for every input regardless of outcome and completes successfully
/// with each input's individual result, in input order. Never itself fails.
///
/// An empty input set completes immediately with an empty vector.
pub fn join<T>(futures: Vec<Future<T>>) -> Future<Vec<Result<T, ReactorError>>>
where
  T: Clone + Send + 'static,
{
  let promise = Promise::<Vec<Result<T, ReactorError>>>::new();
  let composite = promise.future();
  let count = futures.len();
  if count == 0 {
    promise.complete(Vec::new());
    return composite;
  }
  let state = GatherState::new(count);
  for (index, future) in futures.into_iter().enumerate() {
    let state = state.clone();
    let promise = promise.clone();
    future.on_complete(move |result| {
      let mut guard = state.lock();
      guard.slots[index] = Some(result);
      guard.remaining -= 1;
      if guard.remaining == 0 {
        let outcomes: Vec<Result<T, ReactorError>> = guard.slots.drain(..).flatten().collect();
        drop(guard);
        promise.complete(outcomes);
      }
    });
  }
  composite
}
