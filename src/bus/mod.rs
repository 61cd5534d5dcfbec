// src/bus/mod.rs

//! The in-process addressable message bus.
//!
//! A process-wide directory mapping string addresses to registration-ordered
//! consumer sets. Supports point-to-point `send` (round-robin rotation),
//! `publish` broadcast, and `request` with a single-use reply channel. Every
//! delivery is an independently scheduled loop callback, so a slow consumer
//! never blocks delivery scheduling to the others.

pub(crate) mod registry;
pub(crate) mod reply;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;

use crate::context::LoopAssigner;
use crate::error::ReactorError;
use crate::future::{Future, Promise};
use crate::message::{Msg, MsgFlags};
use crate::options::{BusOptions, DeliveryOptions};
use self::registry::{ConsumerEntry, ConsumerRegistry};
use self::reply::ReplySlot;

/// Handle to the bus. Cheap to clone; all handles share one registry.
///
/// The bus is an explicit object owned by a [`Context`], not process-global
/// state: isolated bus instances coexist, one per context.
///
/// [`Context`]: crate::Context
#[derive(Clone)]
pub struct EventBus {
  inner: Arc<BusInner>,
}

struct BusInner {
  registry: ConsumerRegistry,
  next_correlation: AtomicU64,
  assigner: LoopAssigner,
  options: BusOptions,
}

impl EventBus {
  pub(crate) fn new(assigner: LoopAssigner, options: BusOptions) -> Self {
    Self {
      inner: Arc::new(BusInner {
        registry: ConsumerRegistry::new(),
        next_correlation: AtomicU64::new(1),
        assigner,
        options,
      }),
    }
  }

  /// Registers a consumer on an address. The handler runs on the loop
  /// current at registration time (or a round-robin assigned one when
  /// registering from a non-loop thread), one delivery at a time.
  pub fn consumer(
    &self,
    address: impl Into<String>,
    handler: impl Fn(Msg) + Send + Sync + 'static,
  ) -> Registration {
    let address = address.into();
    let event_loop = self.inner.assigner.resolve();
    let id = self.inner.registry.register(
      &address,
      ConsumerEntry {
        handler: Arc::new(handler),
        event_loop,
      },
    );
    tracing::debug!(address = %address, consumer_id = id, "Consumer registered on bus");
    Registration {
      bus: Arc::downgrade(&self.inner),
      address,
      id,
    }
  }

  /// Delivers the body to exactly one consumer on the address, chosen by
  /// round-robin rotation through the registered set.
  ///
  /// With no registered consumer the call returns `NoConsumer` when
  /// [`BusOptions::error_on_unroutable`] is set (the default), and silently
  /// drops the message otherwise.
  pub fn send(&self, address: &str, body: impl Into<Bytes>) -> Result<(), ReactorError> {
    match self.inner.registry.select(address) {
      Some(consumer) => {
        let msg = Msg::outbound(address, body.into(), MsgFlags::SEND);
        tracing::trace!(address, "Point-to-point message scheduled");
        deliver(&consumer, msg)
      }
      None if self.inner.options.error_on_unroutable => Err(ReactorError::NoConsumer(address.to_string())),
      None => {
        tracing::trace!(address, "No consumer registered; message dropped");
        Ok(())
      }
    }
  }

  /// Delivers the body to every consumer currently registered on the
  /// address, in registration order, each as an independently scheduled
  /// callback. Returns the number of consumers the message was scheduled
  /// to.
  pub fn publish(&self, address: &str, body: impl Into<Bytes>) -> usize {
    let consumers = self.inner.registry.snapshot(address);
    let body = body.into();
    let mut delivered = 0;
    for consumer in &consumers {
      let msg = Msg::outbound(address, body.clone(), MsgFlags::PUBLISH);
      if deliver(consumer, msg).is_ok() {
        delivered += 1;
      }
    }
    tracing::trace!(address, delivered, "Broadcast scheduled");
    delivered
  }

  /// Point-to-point send with a single-use reply channel. The returned
  /// future settles with the reply, with `NoConsumer` when the address has
  /// no registered consumer, or with `ReplyTimeout` when no reply arrives
  /// within `options.timeout`. The reply handler runs on the loop the
  /// request originated from.
  pub fn request(&self, address: &str, body: impl Into<Bytes>, options: DeliveryOptions) -> Future<Msg> {
    let reply_loop = self.inner.assigner.resolve();
    let promise = Promise::on_loop(reply_loop.clone());
    let future = promise.future();

    let Some(consumer) = self.inner.registry.select(address) else {
      promise.fail(ReactorError::NoConsumer(address.to_string()));
      return future;
    };

    let correlation = self.inner.next_correlation.fetch_add(1, Ordering::Relaxed);
    let reply_to = format!("__reply.{correlation}");
    let slot = ReplySlot::new(promise, reply_loop.clone());

    if let Some(timeout) = options.timeout {
      let timer_slot = slot.clone();
      match reply_loop.set_timer(timeout, move || timer_slot.fail(ReactorError::ReplyTimeout)) {
        Ok(handle) => slot.set_timeout_timer(handle),
        Err(error) => {
          tracing::warn!(address, error = %error, "Failed to arm reply timeout");
        }
      }
    }

    let msg = Msg::request(address, body.into(), reply_to, slot.clone());
    let handler = consumer.handler.clone();
    if consumer.event_loop.schedule(move || handler(msg)).is_err() {
      slot.fail(ReactorError::LoopClosed);
    } else {
      tracing::trace!(address, correlation, "Request scheduled");
    }
    future
  }

  /// Number of consumers currently registered on the address.
  pub fn consumer_count(&self, address: &str) -> usize {
    self.inner.registry.consumer_count(address)
  }
}

fn deliver(consumer: &ConsumerEntry, msg: Msg) -> Result<(), ReactorError> {
  let handler = consumer.handler.clone();
  consumer.event_loop.schedule(move || handler(msg))
}

/// Proof of a consumer registration; `unregister` removes the consumer.
///
/// Dropping a `Registration` does NOT unregister the consumer; removal is
/// explicit. Unregistering while a delivery is in flight is safe: already
/// scheduled deliveries complete, future deliveries stop.
pub struct Registration {
  bus: Weak<BusInner>,
  address: String,
  id: u64,
}

impl Registration {
  /// The address this registration is bound to.
  pub fn address(&self) -> &str {
    &self.address
  }

  /// Removes the consumer from the bus. Idempotent.
  pub fn unregister(&self) {
    if let Some(bus) = self.bus.upgrade() {
      if bus.registry.unregister(&self.address, self.id) {
        tracing::debug!(address = %self.address, consumer_id = self.id, "Consumer unregistered");
      }
    }
  }
}

impl fmt::Debug for Registration {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Registration")
      .field("address", &self.address)
      .field("id", &self.id)
      .finish()
  }
}

impl fmt::Debug for EventBus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EventBus").finish_non_exhaustive()
  }
}
