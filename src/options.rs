// src/options.rs

//! Validated option structs with documented defaults.

use std::time::Duration;

use crate::error::ReactorError;

/// Default number of event loops when the host's parallelism cannot be read.
pub const DEFAULT_EVENT_LOOPS: usize = 2;
/// Default worker count for the shared blocking pool.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 20;
/// Default capacity of a worker pool's submission queue.
pub const DEFAULT_WORKER_QUEUE_CAPACITY: usize = 1024;
/// Default time an idle worker thread lingers before exiting.
pub const DEFAULT_WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Default threshold above which a callback is reported as blocking its loop.
pub const DEFAULT_BLOCKED_CALLBACK_WARN: Duration = Duration::from_secs(2);
/// Default deadline for a request/reply exchange on the event bus.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// How a periodic timer computes its next due time after firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RearmPolicy {
  /// Next fire = completion time + period. A slow callback delays the
  /// following fire instead of compounding into a burst.
  #[default]
  FixedDelay,
  /// Next due = previous due + period, skipping forward past periods that
  /// were missed entirely so a stalled loop does not replay them.
  FixedSchedule,
}

/// Top-level reactor configuration, consumed by [`Context::with_options`].
///
/// [`Context::with_options`]: crate::Context::with_options
#[derive(Debug, Clone)]
pub struct ContextOptions {
  /// Number of event-loop threads to spawn. Defaults to twice the host's
  /// available parallelism (or [`DEFAULT_EVENT_LOOPS`] when unknown).
  pub event_loops: usize,
  /// Re-arm policy applied to every periodic timer.
  pub rearm_policy: RearmPolicy,
  /// If set, a callback running longer than this is reported via
  /// `tracing::warn!`. `None` disables the check.
  pub blocked_callback_warn: Option<Duration>,
  /// Sizing for the shared default worker pool.
  pub worker_pool: PoolOptions,
  /// Event bus behavior.
  pub bus: BusOptions,
}

impl Default for ContextOptions {
  fn default() -> Self {
    let loops = std::thread::available_parallelism()
      .map(|n| n.get() * 2)
      .unwrap_or(DEFAULT_EVENT_LOOPS);
    Self {
      event_loops: loops,
      rearm_policy: RearmPolicy::default(),
      blocked_callback_warn: Some(DEFAULT_BLOCKED_CALLBACK_WARN),
      worker_pool: PoolOptions::default(),
      bus: BusOptions::default(),
    }
  }
}

impl ContextOptions {
  pub(crate) fn validate(&self) -> Result<(), ReactorError> {
    if self.event_loops == 0 {
      return Err(ReactorError::InvalidOptions(
        "event_loops must be at least 1".to_string(),
      ));
    }
    self.worker_pool.validate()
  }
}

/// Sizing for a blocking-work pool.
#[derive(Debug, Clone)]
pub struct PoolOptions {
  /// Maximum number of worker threads. Workers are spawned lazily.
  pub size: usize,
  /// Capacity of the submission queue; a full queue rejects loop-thread
  /// submissions with `PoolSaturated`.
  pub queue_capacity: usize,
  /// How long an idle worker thread lingers before exiting.
  pub idle_timeout: Duration,
}

impl Default for PoolOptions {
  fn default() -> Self {
    Self {
      size: DEFAULT_WORKER_POOL_SIZE,
      queue_capacity: DEFAULT_WORKER_QUEUE_CAPACITY,
      idle_timeout: DEFAULT_WORKER_IDLE_TIMEOUT,
    }
  }
}

impl PoolOptions {
  pub(crate) fn validate(&self) -> Result<(), ReactorError> {
    if self.size == 0 {
      return Err(ReactorError::InvalidOptions(
        "pool size must be at least 1".to_string(),
      ));
    }
    if self.queue_capacity == 0 {
      return Err(ReactorError::InvalidOptions(
        "pool queue_capacity must be at least 1".to_string(),
      ));
    }
    Ok(())
  }
}

/// Event bus behavior knobs.
#[derive(Debug, Clone)]
pub struct BusOptions {
  /// Whether a fire-and-forget `send` to an address with no registered
  /// consumer returns `NoConsumer` (`true`, the default) or drops the
  /// message silently (`false`). Request/reply always reports the error
  /// through its future regardless of this flag.
  pub error_on_unroutable: bool,
}

impl Default for BusOptions {
  fn default() -> Self {
    Self {
      error_on_unroutable: true,
    }
  }
}

/// Per-request delivery options for [`EventBus::request`].
///
/// [`EventBus::request`]: crate::bus::EventBus::request
#[derive(Debug, Clone)]
pub struct DeliveryOptions {
  /// Deadline for the reply. `None` waits indefinitely.
  pub timeout: Option<Duration>,
}

impl Default for DeliveryOptions {
  fn default() -> Self {
    Self {
      timeout: Some(DEFAULT_REPLY_TIMEOUT),
    }
  }
}

impl DeliveryOptions {
  /// Delivery options with an explicit reply deadline.
  pub fn with_timeout(timeout: Duration) -> Self {
    Self {
      timeout: Some(timeout),
    }
  }

  /// Delivery options that wait for a reply indefinitely.
  pub fn no_timeout() -> Self {
    Self { timeout: None }
  }
}
