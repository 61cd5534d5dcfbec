// tests/worker_pool.rs

use std::sync::mpsc;
use std::time::Duration;

use strand::{PoolOptions, ReactorError};

mod common;

#[test]
fn blocking_work_runs_off_loop_and_settles_on_loop() {
  let ctx = common::test_context();
  let (tx, rx) = common::channel();

  let future = ctx.execute_blocking(|| {
    let worker_thread = std::thread::current().name().unwrap_or("").to_string();
    Ok(worker_thread)
  });
  let tx_result = tx.clone();
  future.on_complete(move |result| {
    let handler_thread = std::thread::current().name().unwrap_or("").to_string();
    tx_result.send((result, handler_thread));
  });

  let (result, handler_thread) = common::recv_within(&rx, common::RECV_TIMEOUT);
  let worker_thread = result.expect("blocking work should succeed");
  assert!(
    worker_thread.starts_with("strand-worker"),
    "blocking closure ran on {worker_thread}"
  );
  assert!(
    handler_thread.starts_with("strand-loop"),
    "settlement handler ran on {handler_thread}"
  );
  assert_ne!(worker_thread, handler_thread);
  ctx.term();
}

#[test]
fn blocking_panic_settles_with_a_wrapped_error() {
  let ctx = common::test_context();
  let (tx, rx) = common::channel();

  let future = ctx.execute_blocking::<u32, _>(|| panic!("kaboom"));
  let tx_result = tx.clone();
  future.on_complete(move |result| {
    tx_result.send(result);
  });

  match common::recv_within(&rx, common::RECV_TIMEOUT) {
    Err(ReactorError::Callback(message)) => assert!(message.contains("kaboom")),
    other => panic!("expected Callback failure, got {other:?}"),
  }
  ctx.term();
}

#[test]
fn saturated_pool_fails_fast_on_the_loop_thread() {
  let ctx = common::test_context();
  let pool = ctx
    .create_pool(
      "squeeze",
      PoolOptions {
        size: 1,
        queue_capacity: 1,
        idle_timeout: Duration::from_secs(60),
      },
    )
    .expect("create pool");
  let event_loop = ctx.event_loop();

  let (gate_tx, gate_rx) = mpsc::channel::<()>();
  let (started_tx, started_rx) = common::channel();
  let (tx, rx) = common::channel();

  // First job occupies the single worker until the gate opens.
  let pool_first = pool.clone();
  let started = started_tx.clone();
  event_loop
    .schedule(move || {
      let occupant = pool_first.execute_blocking(move || {
        started.send(());
        gate_rx.recv().ok();
        Ok(1u32)
      });
      occupant.on_complete(|_| {});
    })
    .expect("schedule first submission");
  common::recv_within(&started_rx, common::RECV_TIMEOUT);

  // With the worker busy, one submission fills the queue and the next is
  // rejected immediately because the submitter is a loop thread.
  let pool_rest = pool.clone();
  let tx_results = tx.clone();
  event_loop
    .schedule(move || {
      let queued = pool_rest.execute_blocking(|| Ok(2u32));
      let rejected = pool_rest.execute_blocking(|| Ok(3u32));
      tx_results.send((queued.result(), rejected.result()));
    })
    .expect("schedule saturating submissions");

  let (queued_result, rejected_result) = common::recv_within(&rx, common::RECV_TIMEOUT);
  assert_eq!(queued_result, None, "queued submission should still be pending");
  assert_eq!(rejected_result, Some(Err(ReactorError::PoolSaturated)));

  gate_tx.send(()).expect("open gate");
  ctx.term();
}

#[test]
fn named_pools_are_shared_by_name() {
  let ctx = common::test_context();
  let pool_a = ctx
    .create_pool("shared-ops", PoolOptions::default())
    .expect("create pool");
  let pool_b = ctx
    .create_pool("shared-ops", PoolOptions::default())
    .expect("re-create pool");

  pool_a.close();
  pool_a.close(); // double close is a no-op
  assert!(pool_b.is_closed());

  let future = pool_b.execute_blocking(|| Ok(1u32));
  assert!(matches!(future.result(), Some(Err(ReactorError::PoolClosed(_)))));
  ctx.term();
}

#[test]
fn close_lets_queued_work_finish() {
  let ctx = common::test_context();
  let pool = ctx
    .create_pool(
      "drain",
      PoolOptions {
        size: 1,
        queue_capacity: 4,
        idle_timeout: Duration::from_secs(60),
      },
    )
    .expect("create pool");

  let (gate_tx, gate_rx) = mpsc::channel::<()>();
  let (started_tx, started_rx) = common::channel();
  let (tx, rx) = common::channel();

  let started = started_tx.clone();
  let occupant = pool.execute_blocking(move || {
    started.send(());
    gate_rx.recv().ok();
    Ok(0u32)
  });
  common::recv_within(&started_rx, common::RECV_TIMEOUT);

  let mut pending = vec![occupant];
  for value in [1u32, 2] {
    pending.push(pool.execute_blocking(move || Ok(value)));
  }

  pool.close();

  // New work is rejected after close, but the queued items still drain.
  let late = pool.execute_blocking(|| Ok(99u32));
  assert!(matches!(late.result(), Some(Err(ReactorError::PoolClosed(_)))));

  gate_tx.send(()).expect("open gate");
  for future in &pending {
    let tx_result = tx.clone();
    future.on_complete(move |result| {
      tx_result.send(result);
    });
  }
  let mut values: Vec<u32> = (0..3)
    .map(|_| common::recv_within(&rx, common::RECV_TIMEOUT).expect("queued work should finish"))
    .collect();
  values.sort_unstable();
  assert_eq!(values, vec![0, 1, 2]);
  ctx.term();
}
