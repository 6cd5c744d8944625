//! Error types for the device relay.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by the relay to dispatcher callers, plus the purely
/// internal conditions that are only ever logged.
#[derive(Error, Debug)]
pub enum RelayError {
    /// No connection has been registered under the given agent id.
    #[error("agent {agent_id} not found")]
    AgentNotFound { agent_id: String },

    /// The agent is registered but its channel is not open for write.
    #[error("agent {agent_id} is not connected")]
    AgentNotConnected { agent_id: String },

    /// No reply arrived within the request window.
    #[error("timed out after {after:?} waiting for reply to request {request_id}")]
    Timeout { request_id: String, after: Duration },

    /// The owning agent closed its channel while the request was pending.
    #[error("agent {agent_id} disconnected")]
    PeerDisconnected { agent_id: String },

    /// The owning agent's channel failed while the request was pending.
    #[error("channel error for agent {agent_id}: {message}")]
    ChannelError { agent_id: String, message: String },

    /// A newer connection registered under the same agent id.
    #[error("agent {agent_id} was superseded by a newer connection")]
    Superseded { agent_id: String },

    /// The agent replied with an `error` field.
    #[error("agent reported an error: {message}")]
    Agent { message: String, details: Value },

    /// Inbound data could not be parsed.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A reply referenced a request id with no pending entry.
    #[error("unknown request id: {0}")]
    UnknownRequestId(String),

    /// An action name or payload did not match the command vocabulary.
    #[error("invalid command {action}: {reason}")]
    InvalidCommand { action: String, reason: String },

    /// The agent's reply did not match the result schema of the action.
    #[error("unexpected result for {action}: {reason}")]
    UnexpectedResult { action: String, reason: String },

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The outcome channel closed without a resolution.
    #[error("request outcome dropped before resolution")]
    Dropped,
}

impl RelayError {
    /// Build an [`RelayError::Agent`] from the raw `error` field of a reply.
    ///
    /// Agents send either a bare string or an object with a `message` key.
    pub fn from_agent(details: Value) -> Self {
        let message = match &details {
            Value::String(text) => text.clone(),
            other => other
                .get("message")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| other.to_string()),
        };
        Self::Agent { message, details }
    }

    /// Stable snake_case code for this error, used in HTTP envelopes and events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AgentNotFound { .. } => "agent_not_found",
            Self::AgentNotConnected { .. } => "agent_not_connected",
            Self::Timeout { .. } => "timeout",
            Self::PeerDisconnected { .. } => "peer_disconnected",
            Self::ChannelError { .. } => "channel_error",
            Self::Superseded { .. } => "superseded",
            Self::Agent { .. } => "agent_error",
            Self::MalformedMessage(_) => "malformed_message",
            Self::UnknownRequestId(_) => "unknown_request_id",
            Self::InvalidCommand { .. } => "invalid_command",
            Self::UnexpectedResult { .. } => "unexpected_result",
            Self::Json(_) => "json",
            Self::Dropped => "dropped",
        }
    }

    /// Check if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if the failure came from the agent's connection rather than the agent itself.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::AgentNotFound { .. }
                | Self::AgentNotConnected { .. }
                | Self::PeerDisconnected { .. }
                | Self::ChannelError { .. }
                | Self::Superseded { .. }
        )
    }
}

/// Why a connection's pending requests are being rejected in bulk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    Closed,
    Errored(String),
    Superseded,
}

impl DisconnectReason {
    pub fn into_error(self, agent_id: &str) -> RelayError {
        let agent_id = agent_id.to_string();
        match self {
            Self::Closed => RelayError::PeerDisconnected { agent_id },
            Self::Errored(message) => RelayError::ChannelError { agent_id, message },
            Self::Superseded => RelayError::Superseded { agent_id },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Errored(_) => "error",
            Self::Superseded => "superseded",
        }
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
