//! WebSocket server: accept loop and per-connection tasks.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Upgrading each accepted connection to a WebSocket.
//! 3. Sending the version greeting and enforcing the handshake.
//! 4. Running two tasks per connection:
//!    - **Reader**: text frames → [`Session::handle_text`], one task per frame
//!    - **Writer**: the session's outbound channel → text frames
//! 5. Stopping the accept loop when the `running` flag is cleared.
//!
//! ```text
//!  client                         gateway
//!    │ ◄──────── version ───────────│
//!    │ ── initialize{schemaVersion} ►│ negotiate
//!    │ ◄──────── result {} ─────────│ (or schemaIncompatible + close)
//!    │ ── commands ────────────────►│ reader → session → router
//!    │ ◄──────── results / events ──│ writer ◄── outbound channel
//! ```
//!
//! The writer is the only task that touches the socket's write half.  A
//! frame that carries a `written` acknowledgement is acknowledged after the
//! socket accepted it, which is what lets a hard reset wait for its own
//! response to go out.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    WebSocketStream,
};
use tracing::{debug, error, info, warn};
use zwave_core::protocol::recover_message_id;
use zwave_core::{decode_incoming, encode_outgoing, OutgoingMessage, MAX_SCHEMA_VERSION, MIN_SCHEMA_VERSION};

use crate::application::{Gateway, OutboundFrame};
use crate::domain::{GatewayConfig, GatewayError};

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `config.bind_addr` and serves clients until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_server(
    config: GatewayConfig,
    gateway: Arc<Gateway>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {}", config.bind_addr))?;

    info!("Z-Wave gateway listening on {}", config.bind_addr);
    serve(listener, gateway, config.accept_poll_interval, running).await
}

/// Runs the accept loop on an already bound listener.
///
/// `poll` bounds how long one `accept` waits before the `running` flag is
/// checked again.
pub async fn serve(
    listener: TcpListener,
    gateway: Arc<Gateway>,
    poll: Duration,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        match timeout(poll, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new connection from {peer_addr}");
                let gateway = Arc::clone(&gateway);
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, gateway).await;
                });
            }
            Ok(Err(e)) => {
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }

    Ok(())
}

// ── Per-connection handler ────────────────────────────────────────────────────

async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, gateway: Arc<Gateway>) {
    match run_connection(stream, peer_addr, gateway).await {
        Ok(()) => info!("connection {peer_addr} closed"),
        Err(e) => warn!("connection {peer_addr} closed with error: {e:#}"),
    }
}

async fn run_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    gateway: Arc<Gateway>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    send_message(&mut ws_tx, &gateway.version_message())
        .await
        .with_context(|| format!("{peer_addr}: failed to send version greeting"))?;

    // ── Handshake ─────────────────────────────────────────────────────────────

    let first = loop {
        match ws_rx.next().await {
            Some(Ok(WsMessage::Text(text))) => break text,
            Some(Ok(WsMessage::Close(_))) | None => {
                debug!("{peer_addr}: closed before handshake");
                return Ok(());
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e).with_context(|| format!("{peer_addr}: read failed")),
        }
    };

    let negotiated = decode_incoming(&first)
        .map_err(|e| (recover_message_id(&first), e.to_string()))
        .and_then(|message| match Gateway::negotiate(&message) {
            Ok(version) => Ok((message, version)),
            Err(err) => Err((Some(message.message_id.clone()), err.to_string())),
        });

    let (handshake, schema_version) = match negotiated {
        Ok(ok) => ok,
        Err((message_id, reason)) => {
            info!("{peer_addr}: handshake rejected: {reason}");
            if let Some(message_id) = message_id {
                let requested = requested_version(&first);
                let err = GatewayError::SchemaVersionUnsupported {
                    requested,
                    min: MIN_SCHEMA_VERSION,
                    max: MAX_SCHEMA_VERSION,
                };
                send_message(&mut ws_tx, &err.to_result(message_id)).await?;
            }
            ws_tx.send(WsMessage::Close(None)).await.ok();
            return Ok(());
        }
    };

    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let session = gateway.connect(peer_addr.to_string(), schema_version, outbound);
    info!(
        "{peer_addr}: client {} connected with schema {schema_version}",
        session.client()
    );
    session.complete_handshake(&handshake);

    // ── Writer ────────────────────────────────────────────────────────────────

    let mut writer = tokio::spawn(write_frames(ws_tx, outbound_rx, peer_addr));

    // ── Reader ────────────────────────────────────────────────────────────────

    let reader_session = session.clone();
    let mut reader = tokio::spawn(async move {
        loop {
            let ws_msg = match ws_rx.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) => {
                    debug!("{peer_addr}: WebSocket closed");
                    break;
                }
                Some(Err(e)) => {
                    warn!("{peer_addr}: WebSocket error: {e}");
                    break;
                }
                None => break,
            };

            match ws_msg {
                WsMessage::Text(text) => {
                    let session = reader_session.clone();
                    tokio::spawn(async move { session.handle_text(&text).await });
                }
                WsMessage::Binary(_) => {
                    warn!("{peer_addr}: binary frame ignored");
                }
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => debug!("{peer_addr}: writer finished"),
        _ = &mut reader => debug!("{peer_addr}: reader finished"),
    }
    writer.abort();
    reader.abort();
    session.disconnect();
    Ok(())
}

async fn write_frames(
    mut ws_tx: WsSink,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    peer_addr: SocketAddr,
) {
    while let Some(frame) = outbound.recv().await {
        let Some(text) = frame_text(&frame.message) else {
            continue;
        };
        if let Err(e) = ws_tx.send(WsMessage::Text(text)).await {
            debug!("{peer_addr}: send failed: {e}");
            break;
        }
        if let Some(written) = frame.written {
            written.send(()).ok();
        }
    }
    ws_tx.close().await.ok();
}

async fn send_message(ws_tx: &mut WsSink, message: &OutgoingMessage) -> anyhow::Result<()> {
    if let Some(text) = frame_text(message) {
        ws_tx.send(WsMessage::Text(text)).await?;
    }
    Ok(())
}

/// Encodes a message, logging and skipping one that cannot be rendered.
fn frame_text(message: &OutgoingMessage) -> Option<String> {
    match encode_outgoing(message) {
        Ok(text) => Some(text),
        Err(e) => {
            error!("dropping unencodable frame: {e}");
            None
        }
    }
}

/// The `schemaVersion` a rejected handshake asked for, if any.
fn requested_version(text: &str) -> Option<i64> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let command = value.get("command")?.as_str()?;
    if !crate::application::gateway::HANDSHAKE_COMMANDS.contains(&command) {
        return None;
    }
    value.get("schemaVersion")?.as_i64()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
