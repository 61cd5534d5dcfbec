// src/bus/registry.rs

//! Registration-ordered consumer sets with round-robin rotation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

use crate::eventloop::EventLoop;
use crate::message::Msg;

pub(crate) type ConsumerFn = Arc<dyn Fn(Msg) + Send + Sync + 'static>;

/// A registered consumer: its callback and the loop that runs it.
#[derive(Clone)]
pub(crate) struct ConsumerEntry {
  pub(crate) handler: ConsumerFn,
  pub(crate) event_loop: EventLoop,
}

/// Consumers for one address. Iteration order is registration order, used
/// for both broadcast iteration and point-to-point rotation.
struct AddressEntry {
  consumers: LinkedHashMap<u64, ConsumerEntry>,
  cursor: usize,
}

pub(crate) struct ConsumerRegistry {
  addresses: Mutex<HashMap<String, AddressEntry>>,
  next_id: AtomicU64,
}

impl ConsumerRegistry {
  pub(crate) fn new() -> Self {
    Self {
      addresses: Mutex::new(HashMap::new()),
      next_id: AtomicU64::new(1),
    }
  }

  pub(crate) fn register(&self, address: &str, entry: ConsumerEntry) -> u64 {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let mut addresses = self.addresses.lock();
    let address_entry = addresses.entry(address.to_string()).or_insert_with(|| AddressEntry {
      consumers: LinkedHashMap::new(),
      cursor: 0,
    });
    address_entry.consumers.insert(id, entry);
    tracing::trace!(
      address,
      consumer_id = id,
      total = address_entry.consumers.len(),
      "Consumer registered"
    );
    id
  }

  /// Removes a consumer. Returns `false` if it was already gone, making
  /// `Registration::unregister` idempotent.
  pub(crate) fn unregister(&self, address: &str, id: u64) -> bool {
    let mut addresses = self.addresses.lock();
    let Some(address_entry) = addresses.get_mut(address) else {
      return false;
    };
    let removed = address_entry.consumers.remove(&id).is_some();
    if removed && address_entry.consumers.is_empty() {
      addresses.remove(address);
    }
    removed
  }

  /// Selects the next consumer for a point-to-point send by rotating
  /// through the registration-ordered set.
  pub(crate) fn select(&self, address: &str) -> Option<ConsumerEntry> {
    let mut addresses = self.addresses.lock();
    let address_entry = addresses.get_mut(address)?;
    let len = address_entry.consumers.len();
    if len == 0 {
      return None;
    }
    let position = address_entry.cursor % len;
    address_entry.cursor = position + 1;
    address_entry.consumers.values().nth(position).cloned()
  }

  /// Snapshot of every consumer on the address, in registration order.
  pub(crate) fn snapshot(&self, address: &str) -> Vec<ConsumerEntry> {
    let addresses = self.addresses.lock();
    addresses
      .get(address)
      .map(|entry| entry.consumers.values().cloned().collect())
      .unwrap_or_default()
  }

  pub(crate) fn consumer_count(&self, address: &str) -> usize {
    let addresses = self.addresses.lock();
    addresses.get(address).map_or(0, |entry| entry.consumers.len())
  }
}
