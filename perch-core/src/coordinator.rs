//! The seam between the engines and the coordination service client.
//!
//! The engines never talk to a concrete client library; they are generic
//! over [`Coordinator`] and drive whatever session it hands out. The seam
//! assumes a ZooKeeper-class service: a hierarchical linearizable
//! namespace, sessions, ephemeral and sequential nodes, and one-shot
//! watches. Implementations apply a world-permissive ACL to every node
//! they create.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::Result;

/// How a node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Plain node that outlives the creating session
    Persistent,
    /// Deleted automatically when the creating session ends
    Ephemeral,
    /// Ephemeral, with a coordinator-assigned zero-padded counter suffix
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(self) -> bool {
        matches!(self, Self::Ephemeral | Self::EphemeralSequential)
    }

    pub fn is_sequential(self) -> bool {
        matches!(self, Self::EphemeralSequential)
    }
}

/// Connection/session state transitions delivered on the session stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    Disconnected,
    Expired,
}

impl SessionState {
    /// True for the transitions after which the session can no longer be
    /// relied upon to keep ephemeral nodes alive.
    pub fn is_lost(self) -> bool {
        matches!(self, Self::Disconnected | Self::Expired)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// Kinds of node-level events a watch can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEventKind {
    Created,
    Deleted,
    DataChanged,
    ChildrenChanged,
}

/// A node-level event, tagged with the path it refers to.
#[derive(Debug, Clone)]
pub struct NodeEvent {
    pub kind: NodeEventKind,
    pub path: String,
}

/// Events delivered on the per-session stream: state transitions, plus
/// node events routed here when no dedicated watch stream was requested.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    State(SessionState),
    Node(NodeEvent),
}

/// Stream of session events, live for the lifetime of one session.
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

/// One-shot watch stream: at most one event is ever delivered, after
/// which the sending side is gone and the stream reads as closed.
pub type WatchEvents = mpsc::UnboundedReceiver<NodeEvent>;

/// Factory for coordinator sessions.
///
/// `connect` establishes a fresh session against the given server set and
/// returns the handle together with its event stream. Reconnect policy is
/// deliberately not implemented here; the retry supervisor owns it.
#[async_trait]
pub trait Coordinator: Send + Sync + 'static {
    type Session: CoordinatorSession;

    async fn connect(
        &self,
        servers: &[String],
        session_timeout: Duration,
    ) -> Result<(Self::Session, SessionEvents)>;
}

/// A live session against the coordinator.
#[async_trait]
pub trait CoordinatorSession: Send + Sync + 'static {
    /// Creates a node and returns the full path the coordinator assigned
    /// (which differs from the requested path for sequential nodes).
    async fn create(&self, path: &str, data: Bytes, mode: CreateMode) -> Result<String>;

    /// Lists the names (not full paths) of the children of `path`.
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    /// Reports whether a node exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Atomically reports whether `path` exists and arms a one-shot watch
    /// on it. The watch fires on the next event touching the node,
    /// deletion included.
    async fn exists_watch(&self, path: &str) -> Result<(bool, WatchEvents)>;

    /// Reads the data stored in the node at `path`.
    async fn data(&self, path: &str) -> Result<Bytes>;

    /// Ends the session, releasing its ephemeral nodes and watches.
    /// Idempotent.
    async fn close(&self);
}
