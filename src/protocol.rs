//! Wire protocol between the relay and remote agents.
//!
//! Frames are JSON text. The relay sends command frames
//! (`{"requestId", "request_id", "action", "payload"}`); agents send a registration
//! (`{"type": "register_client", "clientId"}`) once per connection and
//! replies (`{"requestId", "payload"?, "error"?}`) per command.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{RelayError, Result};

/// `type` tag of the registration message.
pub const REGISTER_CLIENT: &str = "register_client";

/// Keys carrying the request id in outbound command frames. Browser
/// dispatchers read the snake_case key and echo it back as `requestId`.
pub const OUTBOUND_REQUEST_ID_KEYS: [&str; 2] = ["requestId", "request_id"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeDirection {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Button {
    Home,
    Back,
    VolumeUp,
    VolumeDown,
    Enter,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// The closed command vocabulary understood by agents.
///
/// Serializes adjacently tagged, e.g.
/// `{"action": "launchApp", "payload": {"packageName": "com.example"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "camelCase")]
pub enum Command {
    StartSession {},
    GetScreenSize {},
    Swipe {
        direction: SwipeDirection,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        coordinates: Option<Point>,
    },
    #[serde(rename = "getScreenshot")]
    Screenshot {},
    LaunchApp {
        #[serde(rename = "packageName")]
        package_name: String,
    },
    TerminateApp {
        #[serde(rename = "packageName")]
        package_name: String,
    },
    OpenUrl {
        url: String,
    },
    SendKeys {
        text: String,
    },
    PressButton {
        button: Button,
    },
    Tap {
        coordinates: Point,
    },
    #[serde(rename = "getElementsOnScreen")]
    GetElements {},
}

impl Command {
    /// Wire name of this command's action.
    pub fn action(&self) -> &'static str {
        match self {
            Self::StartSession {} => "startSession",
            Self::GetScreenSize {} => "getScreenSize",
            Self::Swipe { .. } => "swipe",
            Self::Screenshot {} => "getScreenshot",
            Self::LaunchApp { .. } => "launchApp",
            Self::TerminateApp { .. } => "terminateApp",
            Self::OpenUrl { .. } => "openUrl",
            Self::SendKeys { .. } => "sendKeys",
            Self::PressButton { .. } => "pressButton",
            Self::Tap { .. } => "tap",
            Self::GetElements {} => "getElementsOnScreen",
        }
    }

    /// Validate a loosely-typed `(action, payload)` pair against the vocabulary.
    ///
    /// A missing or `null` payload is treated as `{}` so payload-less actions
    /// can be submitted without one.
    pub fn from_parts(action: &str, payload: Value) -> Result<Self> {
        let payload = if payload.is_null() { json!({}) } else { payload };
        serde_json::from_value(json!({ "action": action, "payload": payload })).map_err(|err| {
            RelayError::InvalidCommand {
                action: action.to_string(),
                reason: err.to_string(),
            }
        })
    }
}

/// Serialize a command frame for the wire.
pub fn encode_command(request_id: &str, command: &Command) -> Result<String> {
    let mut frame = serde_json::to_value(command)?;
    let object = frame
        .as_object_mut()
        .ok_or_else(|| RelayError::InvalidCommand {
            action: command.action().to_string(),
            reason: "command did not serialize to an object".to_string(),
        })?;
    for key in OUTBOUND_REQUEST_ID_KEYS {
        object.insert(key.to_string(), json!(request_id));
    }
    Ok(frame.to_string())
}

/// A classified inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentMessage {
    Register {
        client_id: String,
    },
    /// `outcome` is `Err(details)` when the agent sent an `error` field.
    Reply {
        request_id: String,
        outcome: std::result::Result<Value, Value>,
    },
    Untagged(Value),
}

/// Parse and classify an inbound text frame.
pub fn decode_agent_message(text: &str) -> Result<AgentMessage> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| RelayError::MalformedMessage(err.to_string()))?;
    let Some(object) = value.as_object() else {
        return Err(RelayError::MalformedMessage(
            "expected a JSON object".to_string(),
        ));
    };

    let is_registration = object.get("type").and_then(Value::as_str) == Some(REGISTER_CLIENT);
    if is_registration {
        if let Some(client_id) = non_empty_str(object.get("clientId")) {
            return Ok(AgentMessage::Register {
                client_id: client_id.to_string(),
            });
        }
    }

    let request_id =
        non_empty_str(object.get("requestId")).or_else(|| non_empty_str(object.get("request_id")));
    let Some(request_id) = request_id else {
        return Ok(AgentMessage::Untagged(value));
    };

    let outcome = match object.get("error") {
        Some(error) if !error.is_null() => Err(error.clone()),
        _ => Ok(object.get("payload").cloned().unwrap_or(Value::Null)),
    };
    Ok(AgentMessage::Reply {
        request_id: request_id.to_string(),
        outcome,
    })
}

/// Ids are opaque: whitespace-only ones are treated as absent, others are kept verbatim.
fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Result schemas
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotResult {
    pub screenshot: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ElementsResult {
    #[serde(default)]
    pub elements: Vec<UiNode>,
}

/// One node of the agent's UI hierarchy dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UiNode {
    #[serde(default)]
    pub attributes: Option<UiAttributes>,
    #[serde(default)]
    pub bounds: Option<Rect>,
    #[serde(default)]
    pub children: Vec<UiNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UiAttributes {
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub base_class: Option<String>,
    #[serde(default)]
    pub user_interaction_enabled: bool,
    #[serde(default)]
    pub accessibility_label: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Decode a reply payload into the result schema of `action`.
pub fn decode_result<T: DeserializeOwned>(action: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload).map_err(|err| RelayError::UnexpectedResult {
        action: action.to_string(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_frame_carries_request_id_action_and_payload() {
        let frame = encode_command(
            "req-1",
            &Command::LaunchApp {
                package_name: "com.example.app".into(),
            },
        )
        .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "requestId": "req-1",
                "request_id": "req-1",
                "action": "launchApp",
                "payload": { "packageName": "com.example.app" },
            })
        );
    }

    #[test]
    fn payloadless_commands_send_empty_object() {
        let frame = encode_command("req-2", &Command::GetScreenSize {}).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["action"], "getScreenSize");
        assert_eq!(value["payload"], json!({}));
    }

    #[test]
    fn action_names_match_serialized_tags() {
        let commands = vec![
            Command::StartSession {},
            Command::GetScreenSize {},
            Command::Swipe {
                direction: SwipeDirection::Up,
                coordinates: None,
            },
            Command::Screenshot {},
            Command::TerminateApp {
                package_name: "a".into(),
            },
            Command::OpenUrl { url: "https://example.com".into() },
            Command::SendKeys { text: "hi".into() },
            Command::PressButton {
                button: Button::VolumeUp,
            },
            Command::Tap {
                coordinates: Point { x: 1.0, y: 2.0 },
            },
            Command::GetElements {},
        ];
        for command in commands {
            let value = serde_json::to_value(&command).unwrap();
            assert_eq!(value["action"], command.action());
        }
    }

    #[test]
    fn from_parts_accepts_missing_payload() {
        let command = Command::from_parts("getScreenSize", Value::Null).unwrap();
        assert_eq!(command, Command::GetScreenSize {});
    }

    #[test]
    fn from_parts_validates_payload_shape() {
        let command =
            Command::from_parts("pressButton", json!({ "button": "VOLUME_DOWN" })).unwrap();
        assert_eq!(
            command,
            Command::PressButton {
                button: Button::VolumeDown
            }
        );

        let err = Command::from_parts("tap", json!({ "x": 1 })).unwrap_err();
        assert_eq!(err.code(), "invalid_command");
    }

    #[test]
    fn from_parts_rejects_unknown_action() {
        let err = Command::from_parts("reboot", json!({})).unwrap_err();
        assert!(matches!(err, RelayError::InvalidCommand { ref action, .. } if action == "reboot"));
    }

    #[test]
    fn decodes_registration() {
        let msg = decode_agent_message(r#"{"type":"register_client","clientId":"A1"}"#).unwrap();
        assert_eq!(
            msg,
            AgentMessage::Register {
                client_id: "A1".into()
            }
        );
    }

    #[test]
    fn ids_are_kept_verbatim() {
        let msg = decode_agent_message(r#"{"type":"register_client","clientId":" A1 "}"#).unwrap();
        assert_eq!(
            msg,
            AgentMessage::Register {
                client_id: " A1 ".into()
            }
        );

        let msg = decode_agent_message(r#"{"requestId":" X","payload":1}"#).unwrap();
        assert!(matches!(msg, AgentMessage::Reply { ref request_id, .. } if request_id == " X"));

        let msg = decode_agent_message(r#"{"type":"register_client","clientId":"   "}"#).unwrap();
        assert!(matches!(msg, AgentMessage::Untagged(_)));
    }

    #[test]
    fn registration_without_client_id_is_untagged() {
        let msg = decode_agent_message(r#"{"type":"register_client"}"#).unwrap();
        assert!(matches!(msg, AgentMessage::Untagged(_)));
    }

    #[test]
    fn decodes_successful_reply() {
        let msg = decode_agent_message(
            r#"{"type":"response","action":"getScreenSize","requestId":"X","payload":{"width":390,"height":844}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            AgentMessage::Reply {
                request_id: "X".into(),
                outcome: Ok(json!({ "width": 390, "height": 844 })),
            }
        );
    }

    #[test]
    fn error_field_wins_over_payload() {
        let msg = decode_agent_message(
            r#"{"requestId":"X","payload":{"status":"success"},"error":{"message":"nope"}}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            AgentMessage::Reply { outcome: Err(ref details), .. } if details["message"] == "nope"
        ));
    }

    #[test]
    fn null_error_is_a_success() {
        let msg = decode_agent_message(r#"{"requestId":"X","error":null}"#).unwrap();
        assert!(matches!(
            msg,
            AgentMessage::Reply { outcome: Ok(Value::Null), .. }
        ));
    }

    #[test]
    fn untagged_and_malformed_frames() {
        assert!(matches!(
            decode_agent_message(r#"{"hello":"world"}"#).unwrap(),
            AgentMessage::Untagged(_)
        ));
        assert_eq!(
            decode_agent_message("{not json").unwrap_err().code(),
            "malformed_message"
        );
        assert_eq!(
            decode_agent_message("[1,2]").unwrap_err().code(),
            "malformed_message"
        );
    }

    #[test]
    fn decode_result_reports_schema_mismatch() {
        let size: ScreenSize =
            decode_result("getScreenSize", json!({ "width": 390, "height": 844, "scale": 3.0 }))
                .unwrap();
        assert_eq!(size.width, 390);
        assert_eq!(size.scale, Some(3.0));

        let err = decode_result::<ScreenSize>("getScreenSize", json!({ "status": "success" }))
            .unwrap_err();
        assert_eq!(err.code(), "unexpected_result");
    }
}
