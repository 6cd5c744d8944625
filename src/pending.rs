//! In-flight commands awaiting a reply, a timeout, or their connection's teardown.
//!
//! Every entry is settled exactly once: the first of [`PendingTable::resolve`],
//! [`PendingTable::reject`], the bulk rejections, or the entry's own timer
//! removes it from the map under the lock and consumes its `oneshot` sender.
//! Any later attempt finds no entry and is a no-op.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::error::{DisconnectReason, RelayError, Result};
use crate::events::{EventEmitter, RelayEvent};
use crate::registry::ConnectionId;

struct PendingEntry {
    agent_id: String,
    connection_id: ConnectionId,
    created_at: Instant,
    outcome: oneshot::Sender<Result<Value>>,
    timer: AbortHandle,
}

/// Eventual outcome of one dispatched command.
#[derive(Debug)]
pub struct PendingReply {
    request_id: String,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingReply {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl Future for PendingReply {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(RelayError::Dropped)))
    }
}

#[derive(Clone)]
pub struct PendingTable {
    entries: Arc<Mutex<HashMap<String, PendingEntry>>>,
    timeout: Duration,
    events: EventEmitter,
}

impl PendingTable {
    pub fn new(timeout: Duration, events: EventEmitter) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            timeout,
            events,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Create an entry and arm its timer.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime, since the timer is a spawned task.
    pub fn register(
        &self,
        request_id: &str,
        agent_id: &str,
        connection_id: ConnectionId,
    ) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries.lock();
        if let Some(previous) = entries.remove(request_id) {
            previous.timer.abort();
            tracing::warn!(request_id = %request_id, "request id collision, replacing pending entry");
        }

        // Spawned while holding the lock so the timer cannot observe the map
        // before the entry exists.
        let table = self.clone();
        let timer_id = request_id.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(table.timeout).await;
            table.expire(&timer_id);
        })
        .abort_handle();

        entries.insert(
            request_id.to_string(),
            PendingEntry {
                agent_id: agent_id.to_string(),
                connection_id,
                created_at: Instant::now(),
                outcome: tx,
                timer,
            },
        );

        PendingReply {
            request_id: request_id.to_string(),
            rx,
        }
    }

    /// Fulfil `request_id` with a reply payload. Returns `false` if it was no longer pending.
    pub fn resolve(&self, request_id: &str, payload: Value) -> bool {
        self.settle(request_id, Ok(payload))
    }

    /// Fail `request_id`. Returns `false` if it was no longer pending.
    pub fn reject(&self, request_id: &str, error: RelayError) -> bool {
        self.settle(request_id, Err(error))
    }

    /// Reject every entry sent to `agent_id`, on any connection. Channel
    /// teardown uses [`PendingTable::reject_connection`] instead.
    pub fn reject_all(&self, agent_id: &str, reason: DisconnectReason) -> usize {
        self.reject_where(reason, |entry| entry.agent_id == agent_id)
    }

    /// Reject the entries that were sent over one specific connection.
    pub fn reject_connection(&self, connection_id: ConnectionId, reason: DisconnectReason) -> usize {
        self.reject_where(reason, |entry| entry.connection_id == connection_id)
    }

    /// Drop an entry whose frame never reached the channel, without settling it.
    pub(crate) fn discard(&self, request_id: &str) -> bool {
        match self.entries.lock().remove(request_id) {
            Some(entry) => {
                entry.timer.abort();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.entries.lock().contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn expire(&self, request_id: &str) {
        let error = RelayError::Timeout {
            request_id: request_id.to_string(),
            after: self.timeout,
        };
        if self.settle(request_id, Err(error)) {
            tracing::warn!(request_id = %request_id, timeout = ?self.timeout, "request timed out");
        }
    }

    fn reject_where(
        &self,
        reason: DisconnectReason,
        matches: impl Fn(&PendingEntry) -> bool,
    ) -> usize {
        let drained: Vec<(String, PendingEntry)> = {
            let mut entries = self.entries.lock();
            let ids: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| matches(entry))
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        let count = drained.len();
        for (request_id, entry) in drained {
            let error = reason.clone().into_error(&entry.agent_id);
            self.complete(&request_id, entry, Err(error));
        }
        count
    }

    fn settle(&self, request_id: &str, outcome: Result<Value>) -> bool {
        let Some(entry) = self.entries.lock().remove(request_id) else {
            return false;
        };
        self.complete(request_id, entry, outcome);
        true
    }

    fn complete(&self, request_id: &str, entry: PendingEntry, outcome: Result<Value>) {
        entry.timer.abort();
        let elapsed_ms = entry.created_at.elapsed().as_millis() as u64;
        self.events.emit(RelayEvent::CommandSettled {
            agent_id: &entry.agent_id,
            request_id,
            ok: outcome.is_ok(),
            code: outcome.as_ref().err().map(RelayError::code),
            elapsed_ms,
        });
        if entry.outcome.send(outcome).is_err() {
            tracing::debug!(request_id = %request_id, "caller stopped waiting before the outcome arrived");
        }
    }
}
