//! HTTP surface: bootstrap page, batch ingress, health, and the agent upgrade route.

use std::path::PathBuf;

use axum::extract::{FromRef, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::{routing, Json, Router};
use serde_json::{json, Value};

use crate::ingress::{self, ActionBatch, ActionOutcome};
use crate::relay::Relay;
use crate::ws;

/// Acknowledgement returned by `POST /actions` once the batch has been driven.
pub const ACTIONS_ACK: &str = "Action sent to client";

#[derive(Clone)]
struct ApiState {
    relay: Relay,
    public_dir: PathBuf,
}

impl FromRef<ApiState> for Relay {
    fn from_ref(state: &ApiState) -> Self {
        state.relay.clone()
    }
}

pub fn relay_router(relay: Relay, public_dir: PathBuf) -> Router {
    let state = ApiState { relay, public_dir };

    Router::new()
        .route("/health", routing::get(health))
        .route("/launch.html", routing::get(launch_page))
        .route("/actions", routing::post(submit_actions))
        .route("/actions/results", routing::post(submit_actions_with_results))
        .route("/ws", routing::get(ws::agent_ws))
        .route("/", routing::get(ws::agent_ws))
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "device-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "agents": state.relay.agent_count(),
        "pending": state.relay.pending().len(),
        "request_timeout_ms": state.relay.pending().timeout().as_millis() as u64,
    }))
}

async fn launch_page(State(state): State<ApiState>) -> Response {
    let path = state.public_dir.join("launch.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Html(content).into_response(),
        Err(error) => {
            tracing::error!(path = %path.display(), error = %error, "failed to serve launch page");
            (StatusCode::NOT_FOUND, "404 Not Found").into_response()
        }
    }
}

/// Drives the batch and always acknowledges, whatever the per-action outcomes.
async fn submit_actions(
    State(state): State<ApiState>,
    Json(batch): Json<ActionBatch>,
) -> (StatusCode, &'static str) {
    let outcomes = ingress::run_batch(&state.relay, batch.actions).await;
    let failed = outcomes.iter().filter(|outcome| !outcome.ok).count();
    tracing::debug!(total = outcomes.len(), failed, "batch completed");
    (StatusCode::OK, ACTIONS_ACK)
}

async fn submit_actions_with_results(
    State(state): State<ApiState>,
    Json(batch): Json<ActionBatch>,
) -> Json<Vec<ActionOutcome>> {
    Json(ingress::run_batch(&state.relay, batch.actions).await)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use super::{relay_router, ACTIONS_ACK};
    use crate::config::RelayOptions;
    use crate::events::EventEmitter;
    use crate::registry::Outbound;
    use crate::relay::Relay;

    fn test_router(public_dir: &std::path::Path) -> (axum::Router, Relay) {
        let relay = Relay::new(RelayOptions::default(), EventEmitter::new(false));
        (relay_router(relay.clone(), public_dir.to_path_buf()), relay)
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body should be readable")
            .to_vec()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request should build")
    }

    #[tokio::test]
    async fn launch_page_served_from_public_dir() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(dir.path().join("launch.html"), "<html>launch</html>").unwrap();
        let (router, _relay) = test_router(dir.path());

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/launch.html")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"<html>launch</html>");
    }

    #[tokio::test]
    async fn missing_launch_page_is_404() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (router, _relay) = test_router(dir.path());

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/launch.html")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn actions_always_acknowledge() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (router, relay) = test_router(dir.path());

        let response = router
            .oneshot(post_json(
                "/actions",
                json!({ "actions": [{ "clientId": "B", "action": "getScreenSize", "payload": {} }] }),
            ))
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, ACTIONS_ACK.as_bytes());
        assert!(relay.pending().is_empty());
    }

    #[tokio::test]
    async fn action_results_surface_per_action_failures() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (router, _relay) = test_router(dir.path());

        let response = router
            .oneshot(post_json(
                "/actions/results",
                json!({ "actions": [
                    { "clientId": "B", "action": "getScreenSize" },
                    { "clientId": "B", "action": "fly" },
                ] }),
            ))
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body[0]["ok"], false);
        assert_eq!(body[0]["code"], "agent_not_found");
        assert_eq!(body[1]["code"], "invalid_command");
    }

    /// Registers `agent_id` on an in-process connection that answers every
    /// command with `{ "echo": <action> }`.
    fn spawn_echo_agent(relay: &Relay, agent_id: &str) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut conn = relay.open_connection(tx);
        relay.handle_text(
            &mut conn,
            &json!({ "type": "register_client", "clientId": agent_id }).to_string(),
        );
        let agent_relay = relay.clone();
        tokio::spawn(async move {
            while let Some(Outbound::Frame(text)) = rx.recv().await {
                let frame: Value = serde_json::from_str(&text).unwrap();
                let reply = json!({
                    "requestId": frame["requestId"],
                    "payload": { "echo": frame["action"] },
                });
                agent_relay.handle_text(&mut conn, &reply.to_string());
            }
        });
    }

    #[tokio::test]
    async fn bad_entries_do_not_block_the_rest_of_the_batch() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (router, relay) = test_router(dir.path());
        spawn_echo_agent(&relay, "A");

        let response = router
            .oneshot(post_json(
                "/actions",
                json!({ "actions": [
                    { "clientId": 42, "action": "getScreenSize" },
                    { "clientId": "B" },
                    { "clientId": "A", "action": "getScreenSize" },
                ] }),
            ))
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, ACTIONS_ACK.as_bytes());
        assert!(relay.pending().is_empty());
    }

    #[tokio::test]
    async fn action_results_cover_every_entry_of_a_mixed_batch() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (router, relay) = test_router(dir.path());
        spawn_echo_agent(&relay, "A");

        let response = router
            .oneshot(post_json(
                "/actions/results",
                json!({ "actions": [
                    { "clientId": "A", "action": "getScreenSize" },
                    { "clientId": 42, "action": "startSession" },
                    { "clientId": "B" },
                    { "clientId": "A", "action": "startSession", "payload": {} },
                ] }),
            ))
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body.as_array().map(Vec::len), Some(4));
        assert_eq!(body[0]["result"], json!({ "echo": "getScreenSize" }));
        assert_eq!(body[1]["clientId"], "42");
        assert_eq!(body[1]["code"], "agent_not_found");
        assert_eq!(body[2]["code"], "invalid_command");
        assert_eq!(body[3]["ok"], true);
    }

    #[tokio::test]
    async fn malformed_batch_is_rejected_before_dispatch() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (router, _relay) = test_router(dir.path());

        let response = router
            .oneshot(post_json("/actions", json!({ "nope": true })))
            .await
            .expect("request should succeed");

        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (router, _relay) = test_router(dir.path());

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["agents"], 0);
        assert_eq!(body["pending"], 0);
        assert_eq!(body["request_timeout_ms"], 30_000);
    }
}
