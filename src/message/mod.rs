// src/message/mod.rs

//! Message representation for the event bus.

pub mod flags;

pub use self::flags::MsgFlags;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::bus::reply::ReplySlot;
use crate::error::ReactorError;

/// A message delivered to an event bus consumer.
///
/// The body is an opaque payload; `Bytes` makes cloning for broadcast cheap
/// (reference counted). For request/reply deliveries the message carries a
/// single-use reply channel reachable through [`Msg::reply`].
#[derive(Clone, Default)]
pub struct Msg {
  address: String,
  data: Option<Bytes>,
  flags: MsgFlags,
  reply_to: Option<String>,
  reply_slot: Option<Arc<ReplySlot>>,
}

impl Msg {
  /// Builds an outbound fire-and-forget or broadcast message.
  pub(crate) fn outbound(address: &str, data: Bytes, flags: MsgFlags) -> Self {
    Self {
      address: address.to_string(),
      data: Some(data),
      flags,
      reply_to: None,
      reply_slot: None,
    }
  }

  /// Builds a request message carrying a live reply channel.
  pub(crate) fn request(address: &str, data: Bytes, reply_to: String, slot: Arc<ReplySlot>) -> Self {
    Self {
      address: address.to_string(),
      data: Some(data),
      flags: MsgFlags::SEND | MsgFlags::EXPECT_REPLY,
      reply_to: Some(reply_to),
      reply_slot: Some(slot),
    }
  }

  /// Builds the reply half of a request/reply exchange.
  pub(crate) fn reply_msg(reply_address: &str, data: Bytes) -> Self {
    Self {
      address: reply_address.to_string(),
      data: Some(data),
      flags: MsgFlags::REPLY,
      reply_to: None,
      reply_slot: None,
    }
  }

  /// The address this message was delivered on.
  pub fn address(&self) -> &str {
    &self.address
  }

  /// Returns a reference to the message payload bytes, if any.
  pub fn data(&self) -> Option<&[u8]> {
    self.data.as_deref()
  }

  /// Returns the internal `Bytes` object if a payload is present.
  /// Cloning `Bytes` is cheap as it is reference-counted.
  pub fn data_bytes(&self) -> Option<Bytes> {
    self.data.clone()
  }

  /// Returns the size of the message payload in bytes.
  pub fn size(&self) -> usize {
    self.data.as_ref().map_or(0, |d| d.len())
  }

  /// Returns the flags associated with the message.
  pub fn flags(&self) -> MsgFlags {
    self.flags
  }

  /// Checks whether this message was delivered point-to-point.
  pub fn is_send(&self) -> bool {
    self.flags.contains(MsgFlags::SEND)
  }

  /// Checks whether this message was delivered as a broadcast.
  pub fn is_publish(&self) -> bool {
    self.flags.contains(MsgFlags::PUBLISH)
  }

  /// Checks whether the sender is waiting for a reply to this message.
  pub fn expects_reply(&self) -> bool {
    self.flags.contains(MsgFlags::EXPECT_REPLY)
  }

  /// The generated reply address, present only for request/reply deliveries.
  pub fn reply_address(&self) -> Option<&str> {
    self.reply_to.as_deref()
  }

  /// Sends a reply back to the requester.
  ///
  /// Valid exactly once, and only on a message delivered with a reply
  /// channel. The reply is handed back to the requester's future on the
  /// loop the request originated from. A second reply returns
  /// `DoubleCompletion` and is discarded.
  pub fn reply(&self, body: impl Into<Bytes>) -> Result<(), ReactorError> {
    let slot = self
      .reply_slot
      .as_ref()
      .ok_or(ReactorError::InvalidState("message does not expect a reply"))?;
    let reply_to = self.reply_to.as_deref().unwrap_or(&self.address);
    slot.fulfill(Msg::reply_msg(reply_to, body.into()))
  }
}

impl fmt::Debug for Msg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Msg")
      .field("address", &self.address)
      .field("size", &self.size())
      .field("flags", &self.flags)
      .field("reply_to", &self.reply_to)
      .finish()
  }
}
