//! Batch submission of loosely-typed actions.
//!
//! Each entry is validated against the command vocabulary and driven
//! through the relay one at a time: the next entry is only issued once the
//! previous entry's outcome is known. Failures, including entries that do
//! not have the `{clientId, action, payload}` shape, never abort the batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;
use crate::protocol::Command;
use crate::relay::Relay;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    #[serde(rename = "clientId")]
    pub client_id: String,
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

impl ActionRequest {
    /// Read one batch entry. A numeric or boolean `clientId` is taken in its
    /// textual form; a missing id or a non-string `action` is rejected.
    pub fn from_entry(entry: &Value) -> Result<Self, RelayError> {
        let invalid = |reason: &str| RelayError::InvalidCommand {
            action: entry_text(entry.get("action")).unwrap_or_default(),
            reason: reason.to_string(),
        };

        if !entry.is_object() {
            return Err(invalid("batch entry is not an object"));
        }
        let client_id = entry_text(entry.get("clientId"))
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| invalid("missing clientId"))?;
        let action = entry
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("missing or non-string action"))?
            .to_string();

        Ok(Self {
            client_id,
            action,
            payload: entry.get("payload").cloned().unwrap_or(Value::Null),
        })
    }
}

/// Body of a batch submission. Entries stay raw JSON so one bad entry
/// cannot reject its neighbours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionBatch {
    pub actions: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionOutcome {
    #[serde(rename = "clientId")]
    pub client_id: String,
    pub action: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl ActionOutcome {
    fn new(entry: &Value, outcome: Result<Value, RelayError>) -> Self {
        let client_id = entry_text(entry.get("clientId")).unwrap_or_default();
        let action = entry_text(entry.get("action")).unwrap_or_default();
        match outcome {
            Ok(result) => Self {
                client_id,
                action,
                ok: true,
                result: Some(result),
                error: None,
                code: None,
            },
            Err(error) => Self {
                client_id,
                action,
                ok: false,
                result: None,
                error: Some(error.to_string()),
                code: Some(error.code()),
            },
        }
    }
}

fn entry_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Drive every entry in order and report each outcome.
pub async fn run_batch(relay: &Relay, actions: Vec<Value>) -> Vec<ActionOutcome> {
    let total = actions.len();
    let mut outcomes = Vec::with_capacity(total);

    for (index, entry) in actions.into_iter().enumerate() {
        let result = match ActionRequest::from_entry(&entry) {
            Ok(request) => {
                tracing::trace!(
                    index,
                    total,
                    agent_id = %request.client_id,
                    action = %request.action,
                    "submitting batch action"
                );
                match Command::from_parts(&request.action, request.payload) {
                    Ok(command) => relay.send(&request.client_id, command).await,
                    Err(error) => Err(error),
                }
            }
            Err(error) => Err(error),
        };
        if let Err(error) = &result {
            tracing::warn!(
                index,
                code = error.code(),
                error = %error,
                "batch action failed"
            );
        }
        outcomes.push(ActionOutcome::new(&entry, result));
    }

    outcomes
}
