//! Command dispatcher and inbound routing.
//!
//! A [`Relay`] owns the connection registry and the pending request table.
//! Socket tasks feed it inbound text frames through [`Relay::handle_text`]
//! and report teardown through [`Relay::connection_closed`]; callers issue
//! commands through [`Relay::dispatch`] or [`Relay::send`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::RelayOptions;
use crate::error::{DisconnectReason, RelayError, Result};
use crate::events::{EventEmitter, RelayEvent};
use crate::pending::{PendingReply, PendingTable};
use crate::protocol::{self, AgentMessage, Command};
use crate::registry::{AgentHandle, ConnectionId, ConnectionRegistry, Outbound};

/// Per-socket state, owned by the socket task.
#[derive(Debug)]
pub struct Connection {
    handle: AgentHandle,
    agent_id: Option<String>,
}

impl Connection {
    pub fn connection_id(&self) -> ConnectionId {
        self.handle.connection_id()
    }

    /// Agent id this connection last registered under, if any.
    pub fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref()
    }
}

#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    registry: Mutex<ConnectionRegistry>,
    pending: PendingTable,
    events: EventEmitter,
    options: RelayOptions,
    next_connection_id: AtomicU64,
}

impl Relay {
    pub fn new(options: RelayOptions, events: EventEmitter) -> Self {
        let pending = PendingTable::new(options.request_timeout, events.clone());
        Self {
            inner: Arc::new(RelayInner {
                registry: Mutex::new(ConnectionRegistry::new()),
                pending,
                events,
                options,
                next_connection_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn options(&self) -> &RelayOptions {
        &self.inner.options
    }

    pub fn pending(&self) -> &PendingTable {
        &self.inner.pending
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.inner.registry.lock().agent_ids()
    }

    pub fn agent_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    pub fn is_registered(&self, agent_id: &str) -> bool {
        self.inner.registry.lock().lookup(agent_id).is_some()
    }

    /// Allocate state for a freshly accepted channel whose socket task reads `tx`'s receiver.
    pub fn open_connection(&self, tx: mpsc::UnboundedSender<Outbound>) -> Connection {
        let id = ConnectionId(self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(connection = %id, "agent channel opened");
        Connection {
            handle: AgentHandle::new(id, tx),
            agent_id: None,
        }
    }

    /// Send `command` to `agent_id` and return its eventual outcome.
    ///
    /// Fails immediately, without touching the pending table, when the agent
    /// is unknown or its channel is not open for write. Exactly one frame is
    /// queued per successful call.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime: the reply timeout is a
    /// spawned task.
    pub fn dispatch(&self, agent_id: &str, command: Command) -> Result<PendingReply> {
        let handle = self
            .inner
            .registry
            .lock()
            .lookup(agent_id)
            .cloned()
            .ok_or_else(|| RelayError::AgentNotFound {
                agent_id: agent_id.to_string(),
            })?;
        if !handle.is_open() {
            return Err(RelayError::AgentNotConnected {
                agent_id: agent_id.to_string(),
            });
        }

        let request_id = Uuid::new_v4().to_string();
        let frame = protocol::encode_command(&request_id, &command)?;

        // Registered before the write so a fast reply always finds its entry.
        let reply = self
            .inner
            .pending
            .register(&request_id, agent_id, handle.connection_id());
        if handle.send_text(frame).is_err() {
            self.inner.pending.discard(&request_id);
            return Err(RelayError::AgentNotConnected {
                agent_id: agent_id.to_string(),
            });
        }

        tracing::debug!(
            agent_id = %agent_id,
            request_id = %request_id,
            action = command.action(),
            "sent command"
        );
        self.inner.events.emit(RelayEvent::CommandSent {
            agent_id,
            request_id: &request_id,
            action: command.action(),
        });
        Ok(reply)
    }

    /// [`Relay::dispatch`] and wait for the outcome.
    pub async fn send(&self, agent_id: &str, command: Command) -> Result<Value> {
        self.dispatch(agent_id, command)?.await
    }

    /// Route one inbound text frame. Never fails: malformed, untagged and
    /// stale frames are logged and leave the channel open.
    pub fn handle_text(&self, conn: &mut Connection, text: &str) {
        match protocol::decode_agent_message(text) {
            Ok(AgentMessage::Register { client_id }) => self.register(conn, client_id),
            Ok(AgentMessage::Reply {
                request_id,
                outcome,
            }) => {
                let settled = match outcome {
                    Ok(payload) => self.inner.pending.resolve(&request_id, payload),
                    Err(details) => self
                        .inner
                        .pending
                        .reject(&request_id, RelayError::from_agent(details)),
                };
                if !settled {
                    tracing::debug!(
                        agent_id = conn.agent_id().unwrap_or("-"),
                        error = %RelayError::UnknownRequestId(request_id),
                        "ignoring reply"
                    );
                }
            }
            Ok(AgentMessage::Untagged(value)) => {
                tracing::debug!(
                    agent_id = conn.agent_id().unwrap_or("-"),
                    message = %value,
                    "untagged message from agent"
                );
            }
            Err(error) => {
                tracing::warn!(
                    agent_id = conn.agent_id().unwrap_or("-"),
                    connection = %conn.connection_id(),
                    error = %error,
                    "dropping inbound frame"
                );
            }
        }
    }

    /// Tear down a channel: deregister it (if still current) and reject every
    /// request that was sent over it.
    pub fn connection_closed(&self, conn: &Connection, reason: DisconnectReason) {
        conn.handle.mark_closed();
        let connection_id = conn.connection_id();

        if let Some(agent_id) = conn.agent_id() {
            let removed = self.inner.registry.lock().unregister(agent_id, connection_id);
            tracing::info!(
                agent_id = %agent_id,
                connection = %connection_id,
                reason = reason.as_str(),
                deregistered = removed,
                "agent disconnected"
            );
            self.inner.events.emit(RelayEvent::AgentDisconnected {
                agent_id,
                connection: connection_id.0,
                reason: reason.as_str(),
            });
        }

        let rejected = self.inner.pending.reject_connection(connection_id, reason);
        if rejected > 0 {
            tracing::info!(
                agent_id = conn.agent_id().unwrap_or("-"),
                rejected,
                "rejected pending requests of closed channel"
            );
        }
    }

    fn register(&self, conn: &mut Connection, agent_id: String) {
        let connection_id = conn.connection_id();
        let replaced = {
            let mut registry = self.inner.registry.lock();
            if let Some(previous_id) = conn.agent_id.as_deref() {
                if previous_id != agent_id {
                    registry.unregister(previous_id, connection_id);
                }
            }
            registry.register(&agent_id, conn.handle.clone())
        };
        conn.agent_id = Some(agent_id.clone());

        tracing::info!(agent_id = %agent_id, connection = %connection_id, "agent registered");
        self.inner.events.emit(RelayEvent::AgentRegistered {
            agent_id: &agent_id,
            connection: connection_id.0,
        });

        if let Some(stale) = replaced {
            stale.close();
            let rejected = self
                .inner
                .pending
                .reject_connection(stale.connection_id(), DisconnectReason::Superseded);
            tracing::info!(
                agent_id = %agent_id,
                stale = %stale.connection_id(),
                rejected,
                "superseded previous connection"
            );
            self.inner.events.emit(RelayEvent::AgentSuperseded {
                agent_id: &agent_id,
                connection: stale.connection_id().0,
                rejected,
            });
        }
    }
}
