//! The service registration engine.
//!
//! A participant publishes its presence as an ephemeral sequential child
//! of a known namespace; the coordinator erases the record when the
//! owning session ends. Registration has no re-determination step: its
//! liveness is exactly the session's liveness, and the engine owes the
//! caller only that the flag tracks session health.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use bytes::Bytes;
use perch_core::cancel::{self, CancelHandle};
use perch_core::coordinator::{
    Coordinator, CoordinatorSession, CreateMode, SessionEvent, SessionEvents,
};
use perch_core::retry::{LoopExit, Paused, RetrySupervisor, StartMode};
use perch_core::session::SessionManager;
use perch_core::status::StatusFlag;
use perch_core::{CoordinationError, Result};

use crate::config::RegistrationConfig;

/// Prefix of registration records under the namespace.
const RECORD_PREFIX: &str = "s_";

/// A service registration participant.
pub struct Registration<C: Coordinator> {
    coordinator: Arc<C>,
    config: RegistrationConfig,
}

impl<C: Coordinator> Registration<C> {
    pub fn new(coordinator: Arc<C>, config: RegistrationConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// Validates the config, performs the initial setup, and spawns the
    /// background task.
    ///
    /// Configuration errors always surface here. A failed first setup is
    /// fatal here in attempt-once mode; in resilient mode the engine
    /// starts anyway and the supervisor keeps retrying the setup under
    /// backoff.
    pub async fn start(mut self, mode: StartMode) -> Result<RegistrationHandle> {
        self.config.validate()?;
        let backoff = self.config.take_backoff();
        // validate() has already rejected a missing payload.
        let payload = self.config.payload.take().unwrap();
        let (cancel_handle, cancel_rx) = cancel::cancel_pair();
        let (done_tx, done_rx) = watch::channel(false);
        let is_registered = StatusFlag::new();

        let mut runner = RegistrationRunner {
            namespace: self.config.namespace,
            payload,
            sessions: SessionManager::new(
                self.coordinator,
                self.config.servers,
                self.config.session_timeout,
            ),
            events: None,
            is_registered: is_registered.clone(),
            cancel_rx,
            supervisor: RetrySupervisor::new(backoff),
        };

        let session_open = match runner.setup().await {
            Ok(()) => true,
            Err(err) => match mode {
                StartMode::AttemptOnce => {
                    // The namespace check can fail with the session already
                    // open; it must not outlive the failed start.
                    runner.sessions.close().await;
                    return Err(err);
                }
                StartMode::Resilient => {
                    warn!("initial setup failed, retrying under backoff: {}", err);
                    false
                }
            },
        };

        tokio::spawn(async move {
            runner.run(mode, session_open).await;
            let _ = done_tx.send(true);
        });

        Ok(RegistrationHandle {
            is_registered,
            cancel: cancel_handle,
            done: done_rx,
        })
    }
}

/// Caller-side view of a running registration engine.
///
/// Dropping every clone of the handle cancels the engine.
#[derive(Debug, Clone)]
pub struct RegistrationHandle {
    is_registered: StatusFlag,
    cancel: CancelHandle,
    done: watch::Receiver<bool>,
}

impl RegistrationHandle {
    /// The engine's current belief. May be stale; poll it.
    pub fn is_registered(&self) -> bool {
        self.is_registered.get()
    }

    /// Stops the engine. Safe to call any number of times.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the background task has fully stopped. Observable
    /// repeatedly.
    pub async fn done(&self) {
        let mut done = self.done.clone();
        cancel::wait(&mut done).await;
    }
}

struct RegistrationRunner<C: Coordinator> {
    namespace: String,
    payload: Bytes,
    sessions: SessionManager<C>,
    events: Option<SessionEvents>,
    is_registered: StatusFlag,
    cancel_rx: watch::Receiver<bool>,
    supervisor: RetrySupervisor,
}

impl<C: Coordinator> RegistrationRunner<C> {
    /// Opens a fresh session and verifies the namespace node exists.
    async fn setup(&mut self) -> Result<()> {
        info!("connecting to coordinator");
        let events = self.sessions.open().await?;
        self.events = Some(events);
        let session = self.sessions.session()?;
        if !session.exists(&self.namespace).await? {
            return Err(CoordinationError::setup(format!(
                "namespace {} does not exist; create it before starting",
                self.namespace
            )));
        }
        Ok(())
    }

    async fn run(mut self, mode: StartMode, session_open: bool) {
        match mode {
            StartMode::AttemptOnce => {
                if let Err(err) = self.attempt().await {
                    error!("registration attempt failed: {}", err);
                }
            }
            StartMode::Resilient => self.run_resilient(session_open).await,
        }
        // The flag must read false before the task exits, whatever the
        // exit path was.
        self.is_registered.clear();
        self.sessions.close().await;
        info!("registration stopped");
    }

    async fn run_resilient(&mut self, mut session_open: bool) {
        info!("starting registration loop");
        loop {
            match self.supervisor.pause(&mut self.cancel_rx).await {
                Paused::Cancelled => {
                    info!("cancelled while waiting to retry");
                    return;
                }
                Paused::Proceed => {}
            }
            if !session_open {
                if let Err(err) = self.setup().await {
                    warn!("setup failed, will retry: {}", err);
                    continue;
                }
            }
            // Every iteration after this one reopens the session.
            session_open = false;
            match self.attempt().await {
                Ok(LoopExit::Cancelled) => return,
                Ok(LoopExit::ConnectionLost) => info!("session lost, will retry"),
                Err(err) => {
                    self.is_registered.clear();
                    error!("registration attempt failed, will retry: {}", err);
                }
            }
        }
    }

    /// One pass through the protocol: publish the record, then track the
    /// session until the attempt ends.
    async fn attempt(&mut self) -> Result<LoopExit> {
        self.publish().await?;
        Ok(self.process_events().await)
    }

    /// Publishes the record carrying the caller payload.
    async fn publish(&mut self) -> Result<()> {
        let prefix = format!("{}/{}", self.namespace, RECORD_PREFIX);
        let session = self.sessions.session()?;
        match session
            .create(&prefix, self.payload.clone(), CreateMode::EphemeralSequential)
            .await
        {
            Ok(full_path) => {
                info!("registered as {}", full_path);
                self.is_registered.set();
                Ok(())
            }
            Err(err) => {
                self.is_registered.clear();
                Err(err)
            }
        }
    }

    /// Multiplexes cancellation and session events until the attempt
    /// ends. Cancellation outranks connection events.
    async fn process_events(&mut self) -> LoopExit {
        info!("processing events");
        loop {
            match self.next_wake().await {
                Wake::Cancel => {
                    info!("cancelled, withdrawing registration");
                    self.is_registered.clear();
                    return LoopExit::Cancelled;
                }
                Wake::Session(Some(SessionEvent::State(state))) if state.is_lost() => {
                    info!("session {}", state);
                    self.is_registered.clear();
                    return LoopExit::ConnectionLost;
                }
                Wake::Session(Some(event)) => {
                    debug!("ignoring session event {:?}", event);
                }
                Wake::Session(None) => {
                    info!("session event stream ended");
                    self.is_registered.clear();
                    return LoopExit::ConnectionLost;
                }
            }
        }
    }

    async fn next_wake(&mut self) -> Wake {
        let cancel_rx = &mut self.cancel_rx;
        let events = self.events.as_mut();
        tokio::select! {
            biased;
            _ = cancel::wait(cancel_rx) => Wake::Cancel,
            event = recv_session(events) => Wake::Session(event),
        }
    }
}

/// What woke the event loop. Cancellation outranks connection events.
enum Wake {
    Cancel,
    Session(Option<SessionEvent>),
}

async fn recv_session(events: Option<&mut SessionEvents>) -> Option<SessionEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
