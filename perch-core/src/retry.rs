//! The retry supervisor that paces engine attempts.

use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::debug;

use crate::backoff::BackoffPolicy;
use crate::cancel;

/// How an engine runs its attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// One attempt; any error or clean exit ends the engine for good.
    AttemptOnce,
    /// Attempts forever under backoff; only cancellation ends the engine.
    Resilient,
}

/// Why an engine's event loop returned. Neither is an error: the
/// supervisor retries after a lost connection and stops on cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Cancelled,
    ConnectionLost,
}

/// Outcome of a supervisor pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paused {
    Proceed,
    Cancelled,
}

/// A quiet stretch this long since the last attempt rewinds the backoff,
/// so an engine that ran healthily for a while retries promptly again.
pub const QUIESCENT_RESET: Duration = Duration::from_secs(600);

/// Paces attempts with a backoff policy and the quiescence rule.
///
/// The supervisor never times out on its own; only cancellation
/// interrupts a pause.
pub struct RetrySupervisor {
    backoff: Box<dyn BackoffPolicy>,
    last_attempt: Option<Instant>,
}

impl RetrySupervisor {
    pub fn new(backoff: Box<dyn BackoffPolicy>) -> Self {
        Self {
            backoff,
            last_attempt: None,
        }
    }

    /// Waits out the next backoff delay, racing cancellation.
    pub async fn pause(&mut self, cancel: &mut watch::Receiver<bool>) -> Paused {
        match self.last_attempt {
            Some(at) if at.elapsed() <= QUIESCENT_RESET => {}
            _ => self.backoff.reset(),
        }
        let delay = self.backoff.next_delay();
        self.last_attempt = Some(Instant::now());
        debug!("next attempt in {:?}", delay);

        tokio::select! {
            _ = cancel::wait(cancel) => Paused::Cancelled,
            _ = tokio::time::sleep(delay) => Paused::Proceed,
        }
    }
}
