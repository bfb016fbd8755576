//! An in-memory coordinator for driving the engines in tests.
//!
//! The simulation keeps the whole namespace under a single mutex, which
//! makes every operation trivially linearizable. Sessions, ephemeral
//! cleanup, per-parent sequence counters, and one-shot watches behave as
//! the engines expect from the real service, with two test-only extras:
//! a reachability toggle to fail `connect`, and forced session expiry.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use perch_core::coordinator::{
    Coordinator, CoordinatorSession, CreateMode, NodeEvent, NodeEventKind, SessionEvent,
    SessionEvents, SessionState, WatchEvents,
};
use perch_core::{CoordinationError, Result};

/// Identifier of a simulated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
struct NodeRecord {
    data: Bytes,
    owner: Option<SessionId>,
    watchers: Vec<mpsc::UnboundedSender<NodeEvent>>,
}

#[derive(Debug)]
struct SessionRecord {
    events: mpsc::UnboundedSender<SessionEvent>,
}

#[derive(Debug, Default)]
struct Tree {
    nodes: BTreeMap<String, NodeRecord>,
    sessions: HashMap<SessionId, SessionRecord>,
    sequences: HashMap<String, u64>,
}

impl Tree {
    fn children_of(&self, path: &str) -> Vec<String> {
        self.nodes
            .keys()
            .filter_map(|key| {
                let (parent, name) = split_parent(key);
                (parent == path).then(|| name.to_string())
            })
            .collect()
    }

    fn delete_node(&mut self, path: &str) {
        if let Some(node) = self.nodes.remove(path) {
            for watcher in node.watchers {
                let _ = watcher.send(NodeEvent {
                    kind: NodeEventKind::Deleted,
                    path: path.to_string(),
                });
            }
        }
    }

    fn remove_session(&mut self, id: SessionId, state: SessionState) {
        if let Some(session) = self.sessions.remove(&id) {
            let _ = session.events.send(SessionEvent::State(state));
        }
        let ephemeral: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(id))
            .map(|(path, _)| path.clone())
            .collect();
        for path in ephemeral {
            self.delete_node(&path);
        }
    }
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    }
}

/// A shared, in-process coordinator. Clones share the same namespace.
#[derive(Clone)]
pub struct InMemoryCoordinator {
    tree: Arc<Mutex<Tree>>,
    reachable: Arc<AtomicBool>,
}

impl Default for InMemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCoordinator {
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::default())),
            reachable: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Makes `connect` fail while `false`, for driving setup-retry paths.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }

    /// Creates a persistent node, typically the namespace the engines
    /// expect to pre-exist.
    pub fn ensure_node(&self, path: &str) {
        self.tree
            .lock()
            .nodes
            .entry(path.to_string())
            .or_default();
    }

    /// Sorted child names of `path`, observed outside any session.
    pub fn children(&self, path: &str) -> Vec<String> {
        let mut children = self.tree.lock().children_of(path);
        children.sort();
        children
    }

    /// Data stored at `path`, observed outside any session.
    pub fn node_data(&self, path: &str) -> Option<Bytes> {
        self.tree.lock().nodes.get(path).map(|node| node.data.clone())
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.tree.lock().sessions.len()
    }

    /// Forcibly expires every live session, deleting their ephemeral
    /// nodes and delivering `Expired` on their event streams.
    pub fn expire_all_sessions(&self) {
        let mut tree = self.tree.lock();
        let ids: Vec<SessionId> = tree.sessions.keys().copied().collect();
        for id in ids {
            tree.remove_session(id, SessionState::Expired);
        }
    }
}

#[async_trait]
impl Coordinator for InMemoryCoordinator {
    type Session = InMemorySession;

    async fn connect(
        &self,
        servers: &[String],
        _session_timeout: Duration,
    ) -> Result<(InMemorySession, SessionEvents)> {
        if servers.is_empty() {
            return Err(CoordinationError::setup("no servers to connect to"));
        }
        if !self.reachable.load(Ordering::Acquire) {
            return Err(CoordinationError::setup("coordinator unreachable"));
        }
        let id = SessionId(Uuid::new_v4());
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(SessionEvent::State(SessionState::Connected));
        self.tree
            .lock()
            .sessions
            .insert(id, SessionRecord { events: tx });
        let session = InMemorySession {
            id,
            tree: self.tree.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        };
        Ok((session, rx))
    }
}

/// A live session against the in-memory coordinator.
#[derive(Debug)]
pub struct InMemorySession {
    id: SessionId,
    tree: Arc<Mutex<Tree>>,
    closed: Arc<AtomicBool>,
}

impl InMemorySession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    fn live<'a>(&self, tree: &'a mut Tree) -> Result<&'a mut Tree> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoordinationError::session_lost("session closed"));
        }
        if !tree.sessions.contains_key(&self.id) {
            return Err(CoordinationError::session_lost("session expired"));
        }
        Ok(tree)
    }
}

#[async_trait]
impl CoordinatorSession for InMemorySession {
    async fn create(&self, path: &str, data: Bytes, mode: CreateMode) -> Result<String> {
        let mut tree = self.tree.lock();
        let tree = self.live(&mut tree)?;

        let (parent, _) = split_parent(path);
        if !parent.is_empty() && !tree.nodes.contains_key(parent) {
            return Err(CoordinationError::node_not_found(parent));
        }
        let full_path = if mode.is_sequential() {
            let sequence = tree.sequences.entry(parent.to_string()).or_insert(0);
            let assigned = format!("{}{:010}", path, sequence);
            *sequence += 1;
            assigned
        } else {
            path.to_string()
        };
        if tree.nodes.contains_key(&full_path) {
            return Err(CoordinationError::node_exists(full_path));
        }
        let owner = mode.is_ephemeral().then_some(self.id);
        tree.nodes.insert(
            full_path.clone(),
            NodeRecord {
                data,
                owner,
                watchers: Vec::new(),
            },
        );
        Ok(full_path)
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        let mut tree = self.tree.lock();
        let tree = self.live(&mut tree)?;
        if !tree.nodes.contains_key(path) {
            return Err(CoordinationError::node_not_found(path));
        }
        Ok(tree.children_of(path))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let mut tree = self.tree.lock();
        let tree = self.live(&mut tree)?;
        Ok(tree.nodes.contains_key(path))
    }

    async fn exists_watch(&self, path: &str) -> Result<(bool, WatchEvents)> {
        let mut tree = self.tree.lock();
        let tree = self.live(&mut tree)?;
        let (tx, rx) = mpsc::unbounded_channel();
        match tree.nodes.get_mut(path) {
            Some(node) => {
                node.watchers.push(tx);
                Ok((true, rx))
            }
            // The sender is dropped here, so the stream reads as closed.
            None => Ok((false, rx)),
        }
    }

    async fn data(&self, path: &str) -> Result<Bytes> {
        let mut tree = self.tree.lock();
        let tree = self.live(&mut tree)?;
        tree.nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| CoordinationError::node_not_found(path))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.tree
            .lock()
            .remove_session(self.id, SessionState::Disconnected);
    }
}
