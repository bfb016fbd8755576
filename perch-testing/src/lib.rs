//! # Perch Testing
//!
//! Test harness for the perch coordination engines: an in-memory
//! coordinator that honors sessions, ephemeral/sequential nodes, and
//! one-shot watches, plus small helpers for the end-to-end scenarios in
//! `tests/`.

use std::time::Duration;
use tokio::time::Instant;

pub mod in_memory;

pub use in_memory::{InMemoryCoordinator, InMemorySession, SessionId};

/// Polls `condition` until it holds or `timeout` elapses. Returns
/// whether the condition held.
pub async fn wait_for<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
