//! Per-socket pump tasks: one writer and one reader per accepted
//! connection, joined so teardown runs exactly once per socket.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use proctor_core::Identity;
use proctor_relay::{Relay, ServerConnPipes};

/// Keepalive frame the grading agent expects, verbatim.
const HEARTBEAT_FRAME: &str = r#"{"message": "ping"}"#;

/// Drive a grading-agent socket until its transport closes.
///
/// The writer forwards trigger payloads and sends timer-driven keepalives;
/// the reader feeds every inbound frame to whichever trigger is awaiting a
/// reply. Either side ending means the connection is done.
pub async fn handle_server_socket(
    socket: WebSocket,
    identity: Identity,
    relay: Arc<Relay>,
    heartbeat: Duration,
) {
    let (conn_id, ServerConnPipes { mut outbound_rx, reply_tx }) = relay.attach_server(&identity);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_identity = identity.clone();
    let writer = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                payload = outbound_rx.recv() => {
                    match payload {
                        Some(bytes) => {
                            if ws_tx.send(WsMessage::Binary(bytes)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if ws_tx.send(WsMessage::Text(HEARTBEAT_FRAME.into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(identity = %writer_identity, "sent heartbeat");
                }
            }
        }
    });

    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            let text = match msg {
                WsMessage::Text(text) => text.to_string(),
                WsMessage::Binary(data) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => text,
                    Err(_) => continue,
                },
                WsMessage::Close(_) => break,
                _ => continue,
            };
            if reply_tx.send(text).await.is_err() {
                // Handle was displaced from the registry; nobody will read.
                break;
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    relay.detach_server(&identity, &conn_id);
}

/// Drive a browser socket until its transport closes.
///
/// The writer drains the envelope queue; the browser sends nothing the
/// relay cares about, so the reader exists only to notice closure.
pub async fn handle_client_socket(
    socket: WebSocket,
    identity: Identity,
    relay: Arc<Relay>,
    heartbeat: Duration,
) {
    let (conn_id, mut events_rx) = relay.attach_client(&identity);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    match event {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Close(_) => break,
                _ => {} // receive-and-discard; axum answers pings itself
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    relay.detach_client(&identity, &conn_id);
}
