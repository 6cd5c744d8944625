//! Typed facade over one remote device agent.
//!
//! Wraps [`Relay::send`] with a method per command and decodes each
//! action's result schema.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::protocol::{
    decode_result, Button, Command, ElementsResult, Point, Rect, ScreenSize, ScreenshotResult,
    SwipeDirection, UiNode,
};
use crate::relay::Relay;

/// UIKit classes worth surfacing as interactive or readable elements.
const ELEMENT_CLASSES: &[&str] = &[
    "UILabel",
    "UIAccessibilityContainerView",
    "UIButton",
    "UIImageView",
    "UIControl",
];

/// Mint a fresh agent id for a device that has not connected yet.
pub fn new_client_id() -> String {
    Uuid::new_v4().to_string()
}

/// URL of the bootstrap page that makes a browser agent register as `client_id`.
pub fn launch_url(base_url: &str, client_id: &str) -> String {
    format!(
        "{}/launch.html?clientId={}",
        base_url.trim_end_matches('/'),
        client_id
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenElement {
    #[serde(rename = "type")]
    pub kind: String,
    pub label: Option<String>,
    pub name: Option<String>,
    pub value: Option<String>,
    pub rect: Rect,
}

impl ScreenElement {
    /// Centre of the element, the point to tap.
    pub fn center(&self) -> Point {
        Point {
            x: self.rect.x + self.rect.width / 2.0,
            y: self.rect.y + self.rect.height / 2.0,
        }
    }
}

#[derive(Clone)]
pub struct RemoteDevice {
    relay: Relay,
    agent_id: String,
}

impl RemoteDevice {
    pub fn new(relay: Relay, agent_id: impl Into<String>) -> Self {
        Self {
            relay,
            agent_id: agent_id.into(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub async fn start_session(&self) -> Result<()> {
        self.run(Command::StartSession {}).await.map(drop)
    }

    pub async fn screen_size(&self) -> Result<ScreenSize> {
        let payload = self.run(Command::GetScreenSize {}).await?;
        decode_result("getScreenSize", payload)
    }

    pub async fn swipe(&self, direction: SwipeDirection) -> Result<()> {
        self.run(Command::Swipe {
            direction,
            coordinates: None,
        })
        .await
        .map(drop)
    }

    /// Capture the screen and return the raw image bytes.
    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        let payload = self.run(Command::Screenshot {}).await?;
        let result: ScreenshotResult = decode_result("getScreenshot", payload)?;
        decode_screenshot(&result.screenshot)
    }

    pub async fn launch_app(&self, package_name: &str) -> Result<()> {
        self.run(Command::LaunchApp {
            package_name: package_name.to_string(),
        })
        .await
        .map(drop)
    }

    pub async fn terminate_app(&self, package_name: &str) -> Result<()> {
        self.run(Command::TerminateApp {
            package_name: package_name.to_string(),
        })
        .await
        .map(drop)
    }

    pub async fn open_url(&self, url: &str) -> Result<()> {
        self.run(Command::OpenUrl {
            url: url.to_string(),
        })
        .await
        .map(drop)
    }

    pub async fn send_keys(&self, text: &str) -> Result<()> {
        self.run(Command::SendKeys {
            text: text.to_string(),
        })
        .await
        .map(drop)
    }

    pub async fn press_button(&self, button: Button) -> Result<()> {
        self.run(Command::PressButton { button }).await.map(drop)
    }

    pub async fn tap(&self, x: f64, y: f64) -> Result<()> {
        self.run(Command::Tap {
            coordinates: Point { x, y },
        })
        .await
        .map(drop)
    }

    /// List on-screen elements, flattened from the agent's UI tree.
    pub async fn elements(&self) -> Result<Vec<ScreenElement>> {
        let payload = self.run(Command::GetElements {}).await?;
        let result: ElementsResult = decode_result("getElementsOnScreen", payload)?;
        Ok(result
            .elements
            .first()
            .map(flatten_elements)
            .unwrap_or_default())
    }

    async fn run(&self, command: Command) -> Result<Value> {
        self.relay.send(&self.agent_id, command).await
    }
}

/// Decode a base64 screenshot, with or without a `data:image/...;base64,` prefix.
pub fn decode_screenshot(data: &str) -> Result<Vec<u8>> {
    let encoded = match data.strip_prefix("data:image/") {
        Some(rest) => rest
            .split_once(";base64,")
            .map(|(_, body)| body)
            .unwrap_or(rest),
        None => data,
    };
    STANDARD
        .decode(encoded.trim())
        .map_err(|err| RelayError::UnexpectedResult {
            action: "getScreenshot".to_string(),
            reason: err.to_string(),
        })
}

/// Walk a UI tree depth-first, keeping visible nodes of interesting classes.
pub fn flatten_elements(root: &UiNode) -> Vec<ScreenElement> {
    let mut out = Vec::new();
    collect_elements(root, &mut out);
    out
}

fn collect_elements(node: &UiNode, out: &mut Vec<ScreenElement>) {
    if let (Some(attributes), Some(bounds)) = (&node.attributes, &node.bounds) {
        let class_matches = |class: &Option<String>| {
            class
                .as_deref()
                .is_some_and(|class| ELEMENT_CLASSES.contains(&class))
        };
        let worthy = class_matches(&attributes.class)
            || (class_matches(&attributes.base_class) && attributes.user_interaction_enabled);
        let visible = bounds.width > 0.0 && bounds.height > 0.0;

        if worthy && visible {
            out.push(ScreenElement {
                kind: attributes
                    .class
                    .clone()
                    .or_else(|| attributes.base_class.clone())
                    .unwrap_or_default(),
                label: non_empty(&attributes.accessibility_label)
                    .or_else(|| non_empty(&attributes.text)),
                name: non_empty(&attributes.name),
                value: attributes.value.as_ref().and_then(value_text),
                rect: *bounds,
            });
        }
    }

    for child in &node.children {
        collect_elements(child, out);
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|value| !value.is_empty()).cloned()
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}
