//! Session lifecycle management.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::coordinator::{Coordinator, CoordinatorSession, SessionEvents};
use crate::{CoordinationError, Result};

/// Owns the live coordinator session for one engine.
///
/// The manager guarantees that at most one session is open at a time:
/// `open` closes any previous session before connecting, and `close` is
/// safe on every exit path. It deliberately implements no reconnect
/// policy of its own; the retry supervisor decides when to reopen.
pub struct SessionManager<C: Coordinator> {
    coordinator: Arc<C>,
    servers: Vec<String>,
    session_timeout: Duration,
    session: Option<C::Session>,
}

impl<C: Coordinator> SessionManager<C> {
    pub fn new(coordinator: Arc<C>, servers: Vec<String>, session_timeout: Duration) -> Self {
        Self {
            coordinator,
            servers,
            session_timeout,
            session: None,
        }
    }

    /// Opens a fresh session, closing the previous one first, and returns
    /// the new session's event stream.
    pub async fn open(&mut self) -> Result<SessionEvents> {
        self.close().await;
        let (session, events) = self
            .coordinator
            .connect(&self.servers, self.session_timeout)
            .await?;
        self.session = Some(session);
        Ok(events)
    }

    /// Borrows the live session, or fails if none is open.
    pub fn session(&self) -> Result<&C::Session> {
        self.session
            .as_ref()
            .ok_or_else(|| CoordinationError::session_lost("no open session"))
    }

    /// Closes and drops the live session, if any. Idempotent.
    pub async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            debug!("closing coordinator session");
            session.close().await;
        }
    }
}
