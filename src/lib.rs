// src/lib.rs

//! strand - a callback-driven reactor runtime.
//!
//! A `Context` owns a set of single-threaded event loops, a population of
//! blocking-work pools, and an in-process event bus. All user callbacks run
//! on loop threads, one at a time, to completion; blocking work is handed
//! to a pool and its result re-enters the submitting loop; futures and the
//! bus are the two vocabularies through which completions travel back into
//! callbacks.

/// Defines the in-process message bus: consumers, send/publish/request.
pub mod bus;
/// Defines the `Context`, which is the entry point for the runtime.
pub mod context;
/// Defines custom error types used throughout the library.
pub mod error;
/// The single-threaded callback scheduler and its timer wheel.
pub mod eventloop;
/// Single-assignment result containers and composition operators.
pub mod future;
/// Contains types related to message representation (Msg, MsgFlags).
pub mod message;
/// Validated option structs with documented defaults.
pub mod options;
/// Named pools of OS threads for blocking work.
pub mod pool;

// Re-export the core vocabulary for user convenience, making it accessible
// directly from the crate root (e.g., `strand::Context`).
pub use bus::{EventBus, Registration};
pub use context::Context;
pub use error::ReactorError;
pub use eventloop::{EventLoop, TimerHandle};
pub use future::{all, any, join, Future, Promise};
pub use message::{Msg, MsgFlags};
pub use options::{BusOptions, ContextOptions, DeliveryOptions, PoolOptions, RearmPolicy};
pub use pool::WorkerPool;

// --- Top-Level Library Information Functions ---

/// Major version number of the strand library.
const VERSION_MAJOR: i32 = 0;
/// Minor version number of the strand library.
const VERSION_MINOR: i32 = 1;
/// Patch version number of the strand library.
const VERSION_PATCH: i32 = 0;

/// Returns the library version as a tuple (major, minor, patch).
///
/// # Examples
///
/// ```
/// let (major, minor, patch) = strand::version();
/// println!("strand version: {}.{}.{}", major, minor, patch);
/// ```
pub fn version() -> (i32, i32, i32) {
  (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}

/// Returns the major version number of the library.
pub fn version_major() -> i32 {
  VERSION_MAJOR
}

/// Returns the minor version number of the library.
pub fn version_minor() -> i32 {
  VERSION_MINOR
}

/// Returns the patch version number of the library.
pub fn version_patch() -> i32 {
  VERSION_PATCH
}
