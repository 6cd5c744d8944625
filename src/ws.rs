//! Agent-facing WebSocket endpoint.
//!
//! Each upgraded connection runs one task that multiplexes inbound frames,
//! outbound command frames queued by the dispatcher, and keep-alive pings.
//! Text frames go to [`Relay::handle_text`]; binary frames are accepted and
//! dropped. When the loop ends the relay is told why, so pending requests
//! on the channel are rejected.

use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::error::DisconnectReason;
use crate::registry::Outbound;
use crate::relay::Relay;

/// HTTP handler for the agent upgrade route.
pub async fn agent_ws(ws: WebSocketUpgrade, State(relay): State<Relay>) -> Response {
    let options = relay.options().clone();
    ws.max_frame_size(options.max_frame_size)
        .max_message_size(options.max_message_size)
        .on_upgrade(move |socket| handle_agent_socket(socket, relay))
}

pub async fn handle_agent_socket(socket: WebSocket, relay: Relay) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let mut conn = relay.open_connection(tx);
    let (mut sink, mut stream) = socket.split();

    let keepalive_every = relay.options().keepalive_interval;
    let mut keepalive = tokio::time::interval_at(
        tokio::time::Instant::now() + keepalive_every,
        keepalive_every,
    );
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_seen = Instant::now();

    let reason = loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        tracing::trace!(connection = %conn.connection_id(), bytes = text.as_str().len(), "text frame");
                        relay.handle_text(&mut conn, text.as_str());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        last_seen = Instant::now();
                        tracing::trace!(connection = %conn.connection_id(), bytes = data.len(), "ignoring binary frame");
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        last_seen = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => break DisconnectReason::Closed,
                    Some(Err(err)) => break DisconnectReason::Errored(err.to_string()),
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(Outbound::Frame(text)) => {
                        if let Err(err) = sink.send(Message::Text(text.into())).await {
                            break DisconnectReason::Errored(err.to_string());
                        }
                    }
                    stop => {
                        let reason = queue_stop_reason(stop);
                        if reason == DisconnectReason::Superseded {
                            let _ = sink.send(Message::Close(None)).await;
                        }
                        break reason;
                    }
                }
            }
            _ = keepalive.tick() => {
                if last_seen.elapsed() > keepalive_every * 2 {
                    break DisconnectReason::Errored("keep-alive timeout".to_string());
                }
                if let Err(err) = sink.send(Message::Ping(Vec::new().into())).await {
                    break DisconnectReason::Errored(err.to_string());
                }
            }
        }
    };

    if let DisconnectReason::Errored(message) = &reason {
        tracing::warn!(
            agent_id = conn.agent_id().unwrap_or("-"),
            connection = %conn.connection_id(),
            error = %message,
            "agent channel failed"
        );
    }
    relay.connection_closed(&conn, reason);
}

/// Reason for ending the socket task on a queue event other than a frame.
fn queue_stop_reason(outbound: Option<Outbound>) -> DisconnectReason {
    match outbound {
        Some(Outbound::Close) => DisconnectReason::Superseded,
        Some(Outbound::Frame(_)) | None => DisconnectReason::Closed,
    }
}
