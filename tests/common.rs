// tests/common.rs
#![allow(dead_code)] // Allow unused helpers across test binaries

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use strand::{Context, ContextOptions};
use tracing_subscriber::EnvFilter;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);
pub const QUIET_WINDOW: Duration = Duration::from_millis(300);

// Use std::sync::Once for one-time initialization
static TRACING_INIT: Once = Once::new();

// Setup function to initialize tracing
fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    // Default level filter (e.g., trace for strand, warn for others)
    // Can be overridden by RUST_LOG env variable
    let default_filter = "strand=trace,debug,info,warn";
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_target(true) // Show module path
      .with_line_number(true) // Show line numbers
      .with_test_writer() // Write to test output capture
      .try_init();
  });
}

// Helper to create a context
pub fn test_context() -> Context {
  setup_tracing(); // Ensure tracing is initialized before creating context
  Context::new().expect("Failed to create test context")
}

// Helper to create a context with specific options
pub fn test_context_with(options: ContextOptions) -> Context {
  setup_tracing();
  Context::with_options(options).expect("Failed to create test context")
}

/// An mpsc sender usable from `Fn + Sync` handlers (std's `Sender` is not
/// `Sync`, so handlers share it behind a mutex).
pub struct TestSender<T>(Mutex<mpsc::Sender<T>>);

impl<T> TestSender<T> {
  pub fn send(&self, value: T) {
    self
      .0
      .lock()
      .expect("test sender poisoned")
      .send(value)
      .expect("test receiver dropped");
  }
}

/// Channel pair for observing asynchronous completions from the test thread.
pub fn channel<T>() -> (Arc<TestSender<T>>, Receiver<T>) {
  let (tx, rx) = mpsc::channel();
  (Arc::new(TestSender(Mutex::new(tx))), rx)
}

/// Receives one event or panics after `timeout`.
pub fn recv_within<T>(rx: &Receiver<T>, timeout: Duration) -> T {
  rx.recv_timeout(timeout).expect("timed out waiting for event")
}

/// Asserts that no event arrives within the window.
pub fn assert_no_event<T>(rx: &Receiver<T>, window: Duration) {
  match rx.recv_timeout(window) {
    Err(RecvTimeoutError::Timeout) => {}
    Ok(_) => panic!("received an event that should not have been delivered"),
    Err(RecvTimeoutError::Disconnected) => panic!("test channel disconnected"),
  }
}
