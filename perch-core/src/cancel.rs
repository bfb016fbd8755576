//! Cancellation plumbing shared by the engines.
//!
//! A cancellation scope is a `tokio::sync::watch` pair: the engine handle
//! keeps the triggering side, the background task waits on the receiving
//! side. Cancellation is edge-triggered and idempotent, and a dropped
//! trigger counts as cancellation so an abandoned handle cannot strand
//! its engine.

use std::sync::Arc;
use tokio::sync::watch;

/// Triggering side of a cancellation scope. Cloning shares the scope.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Fires the scope. Safe to call any number of times.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Creates a fresh cancellation scope.
pub fn cancel_pair() -> (CancelHandle, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, rx)
}

/// Resolves once the watched value becomes true, or once every sender is
/// gone. Cancel-safe; used for both cancellation and done signals.
pub async fn wait(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
