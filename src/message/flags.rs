use bitflags::bitflags;

bitflags! {
  /// Flags describing how a `Msg` was routed and what it may do.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
  pub struct MsgFlags: u8 {
    /// Delivered point-to-point to a single consumer chosen by rotation.
    const SEND = 0b0001;
    /// Delivered to every consumer registered on the address.
    const PUBLISH = 0b0010;
    /// Carries a live reply channel; the recipient may call `reply` once.
    const EXPECT_REPLY = 0b0100;
    /// This message is itself the reply half of a request/reply exchange.
    const REPLY = 0b1000;
  }
}
