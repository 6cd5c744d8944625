//! Live agent connections keyed by the agent-chosen id.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

/// Process-unique id of one duplex channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Work queued for a connection's socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(String),
    Close,
}

/// Write side of an agent's channel.
///
/// Frames are queued to the connection's socket task. The handle is open
/// while that task is alive and the connection has not been torn down.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    connection_id: ConnectionId,
    tx: mpsc::UnboundedSender<Outbound>,
    closed: Arc<AtomicBool>,
}

impl AgentHandle {
    pub fn new(connection_id: ConnectionId, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            connection_id,
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Stop accepting frames. Shared by every clone of the handle.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Mark the handle closed and ask the socket task to close the channel.
    pub fn close(&self) {
        self.mark_closed();
        let _ = self.tx.send(Outbound::Close);
    }

    /// Queue one text frame. Returns the frame back if the channel is no
    /// longer open for write.
    pub fn send_text(&self, frame: String) -> Result<(), String> {
        if self.closed.load(Ordering::Acquire) {
            return Err(frame);
        }
        self.tx.send(Outbound::Frame(frame)).map_err(|err| match err.0 {
            Outbound::Frame(frame) => frame,
            Outbound::Close => String::new(),
        })
    }
}

/// At most one handle per agent id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    agents: HashMap<String, AgentHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handle` under `agent_id`, replacing any prior entry.
    ///
    /// Returns the replaced handle when it belonged to a different connection.
    pub fn register(&mut self, agent_id: &str, handle: AgentHandle) -> Option<AgentHandle> {
        let connection_id = handle.connection_id();
        self.agents
            .insert(agent_id.to_string(), handle)
            .filter(|previous| previous.connection_id() != connection_id)
    }

    pub fn lookup(&self, agent_id: &str) -> Option<&AgentHandle> {
        self.agents.get(agent_id)
    }

    /// Remove `agent_id` only if it is still bound to `connection_id`, so a
    /// late teardown of a superseded connection cannot evict its replacement.
    pub fn unregister(&mut self, agent_id: &str, connection_id: ConnectionId) -> bool {
        match self.agents.get(agent_id) {
            Some(handle) if handle.connection_id() == connection_id => {
                self.agents.remove(agent_id);
                true
            }
            _ => false,
        }
    }

    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
