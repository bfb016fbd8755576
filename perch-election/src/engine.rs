//! The leader election engine.
//!
//! Each participant creates one ephemeral sequential child under the
//! shared namespace and watches only the child immediately preceding its
//! own, so a leader change wakes exactly one follower instead of the
//! whole herd. The participant owning the lexicographically smallest
//! child is the leader.
//!
//! Known limitation: deletion of the engine's own candidate node by
//! outside intervention (an operator removing it directly) is observed
//! by neither the session stream nor the predecessor watch, so the
//! engine's belief goes stale until the next session transition.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use bytes::Bytes;
use perch_core::cancel::{self, CancelHandle};
use perch_core::coordinator::{
    Coordinator, CoordinatorSession, CreateMode, NodeEvent, NodeEventKind, SessionEvent,
    SessionEvents, WatchEvents,
};
use perch_core::retry::{LoopExit, Paused, RetrySupervisor, StartMode};
use perch_core::session::SessionManager;
use perch_core::status::StatusFlag;
use perch_core::{CoordinationError, Result};

use crate::config::ElectionConfig;

/// Prefix of candidate children. A namespace dedicated to election
/// therefore has a homogeneous child set.
const CANDIDATE_PREFIX: &str = "c_";

/// A leader election participant.
///
/// Construct with a coordinator and a config, then [`start`] it; the
/// returned handle is the only way to observe or stop the running
/// engine.
///
/// [`start`]: LeaderElection::start
pub struct LeaderElection<C: Coordinator> {
    coordinator: Arc<C>,
    config: ElectionConfig,
}

impl<C: Coordinator> LeaderElection<C> {
    pub fn new(coordinator: Arc<C>, config: ElectionConfig) -> Self {
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
    pub async fn start(mut self, mode: StartMode) -> Result<ElectionHandle> {
        self.config.validate()?;
        let backoff = self.config.take_backoff();
        let (cancel_handle, cancel_rx) = cancel::cancel_pair();
        let (done_tx, done_rx) = watch::channel(false);
        let is_leader = StatusFlag::new();

        let mut runner = ElectionRunner {
            namespace: self.config.namespace,
            sessions: SessionManager::new(
                self.coordinator,
                self.config.servers,
                self.config.session_timeout,
            ),
            events: None,
            own_child: None,
            predecessor_watch: None,
            is_leader: is_leader.clone(),
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

        Ok(ElectionHandle {
            is_leader,
            cancel: cancel_handle,
            done: done_rx,
        })
    }
}

/// Caller-side view of a running election engine.
///
/// Dropping every clone of the handle cancels the engine.
#[derive(Debug, Clone)]
pub struct ElectionHandle {
    is_leader: StatusFlag,
    cancel: CancelHandle,
    done: watch::Receiver<bool>,
}

impl ElectionHandle {
    /// The engine's current belief. May be stale; poll it.
    pub fn is_leader(&self) -> bool {
        self.is_leader.get()
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

/// What woke the event loop. Cancellation outranks connection events,
/// which outrank predecessor events.
enum Wake {
    Cancel,
    Session(Option<SessionEvent>),
    Predecessor(Option<NodeEvent>),
}

struct ElectionRunner<C: Coordinator> {
    namespace: String,
    sessions: SessionManager<C>,
    events: Option<SessionEvents>,
    own_child: Option<String>,
    predecessor_watch: Option<WatchEvents>,
    is_leader: StatusFlag,
    cancel_rx: watch::Receiver<bool>,
    supervisor: RetrySupervisor,
}

impl<C: Coordinator> ElectionRunner<C> {
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
                    error!("election attempt failed: {}", err);
                }
            }
            StartMode::Resilient => self.run_resilient(session_open).await,
        }
        // The flag must read false before the task exits, whatever the
        // exit path was.
        self.is_leader.clear();
        self.sessions.close().await;
        info!("leader election stopped");
    }

    async fn run_resilient(&mut self, mut session_open: bool) {
        info!("starting leader election loop");
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
                    self.is_leader.clear();
                    error!("election attempt failed, will retry: {}", err);
                }
            }
        }
    }

    /// One pass through the protocol: candidacy, leader determination,
    /// then the event loop until the attempt ends.
    async fn attempt(&mut self) -> Result<LoopExit> {
        self.candidate().await?;
        self.determine_leader().await?;
        self.process_events().await
    }

    /// Volunteers by creating the ephemeral sequential candidate child
    /// and remembering the name the coordinator assigned.
    async fn candidate(&mut self) -> Result<()> {
        info!("volunteering as candidate");
        let prefix = format!("{}/{}", self.namespace, CANDIDATE_PREFIX);
        let session = self.sessions.session()?;
        let full_path = session
            .create(&prefix, Bytes::new(), CreateMode::EphemeralSequential)
            .await?;
        let name = full_path
            .rsplit_once('/')
            .map(|(_, name)| name.to_string())
            .unwrap_or(full_path);
        info!("registered candidate node {}", name);
        self.own_child = Some(name);
        Ok(())
    }

    /// Decides leadership against the current children list, arming a
    /// watch on the predecessor when not leader.
    ///
    /// Loops when the chosen predecessor vanishes between the listing
    /// and the watch; the racing set only shrinks toward us, so the loop
    /// terminates.
    async fn determine_leader(&mut self) -> Result<()> {
        // Arming a new predecessor watch discards any earlier one.
        self.predecessor_watch = None;
        let own = match &self.own_child {
            Some(own) => own.clone(),
            None => {
                return Err(CoordinationError::session_lost(
                    "no candidate node registered",
                ))
            }
        };

        loop {
            let session = self.sessions.session()?;
            let mut children = match session.children(&self.namespace).await {
                Ok(children) => children,
                Err(err) => {
                    self.is_leader.clear();
                    return Err(err);
                }
            };
            if children.is_empty() {
                self.is_leader.clear();
                return Err(CoordinationError::protocol(
                    "namespace has no children after candidacy",
                ));
            }
            // Zero-padded suffixes make lexicographic order numeric order.
            children.sort();

            let position = match children.iter().position(|child| child == &own) {
                Some(position) => position,
                None => {
                    self.is_leader.clear();
                    return Err(CoordinationError::session_lost(format!(
                        "own candidate node {} missing from {}",
                        own, self.namespace
                    )));
                }
            };
            if position == 0 {
                info!("elected leader");
                self.is_leader.set();
                return Ok(());
            }

            let predecessor = &children[position - 1];
            self.is_leader.clear();
            let path = format!("{}/{}", self.namespace, predecessor);
            let (exists, watch) = session.exists_watch(&path).await?;
            if exists {
                info!("not the leader, watching predecessor {}", predecessor);
                self.predecessor_watch = Some(watch);
                return Ok(());
            }
            debug!(
                "predecessor {} vanished before the watch armed, re-listing",
                predecessor
            );
        }
    }

    /// Multiplexes cancellation, session events, and predecessor events
    /// until the attempt ends.
    async fn process_events(&mut self) -> Result<LoopExit> {
        info!("processing events");
        loop {
            match self.next_wake().await {
                Wake::Cancel => {
                    info!("cancelled, leaving the election");
                    self.is_leader.clear();
                    return Ok(LoopExit::Cancelled);
                }
                Wake::Session(Some(SessionEvent::State(state))) if state.is_lost() => {
                    info!("session {}", state);
                    self.abandon();
                    return Ok(LoopExit::ConnectionLost);
                }
                Wake::Session(Some(event)) => {
                    debug!("ignoring session event {:?}", event);
                }
                Wake::Session(None) => {
                    info!("session event stream ended");
                    self.abandon();
                    return Ok(LoopExit::ConnectionLost);
                }
                Wake::Predecessor(Some(event)) => {
                    if event.kind == NodeEventKind::Deleted {
                        info!("predecessor {} deleted, re-determining leader", event.path);
                    } else {
                        // The one-shot watch is spent either way; re-determining
                        // rearms it.
                        debug!("predecessor watch spent by {:?}, rearming", event);
                    }
                    self.determine_leader().await?;
                }
                Wake::Predecessor(None) => {
                    debug!("predecessor watch stream ended");
                    self.predecessor_watch = None;
                }
            }
        }
    }

    async fn next_wake(&mut self) -> Wake {
        let cancel_rx = &mut self.cancel_rx;
        let events = self.events.as_mut();
        let predecessor = self.predecessor_watch.as_mut();
        tokio::select! {
            biased;
            _ = cancel::wait(cancel_rx) => Wake::Cancel,
            event = recv_session(events) => Wake::Session(event),
            event = recv_watch(predecessor) => Wake::Predecessor(event),
        }
    }

    /// Forgets everything tied to the dead session.
    fn abandon(&mut self) {
        self.is_leader.clear();
        self.own_child = None;
        self.predecessor_watch = None;
    }
}

async fn recv_session(events: Option<&mut SessionEvents>) -> Option<SessionEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_watch(watch: Option<&mut WatchEvents>) -> Option<NodeEvent> {
    match watch {
        Some(watch) => watch.recv().await,
        None => std::future::pending().await,
    }
}
