use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use foodlink_engine::{ConnectionId, Engine};
use foodlink_types::events::{Audience, ClientCommand, ServerEvent};
use foodlink_types::models::Principal;
use foodlink_types::Result;

use crate::rate_limit::SlidingWindow;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long an unauthenticated socket may wait before sending Identify.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Close code sent when the handshake fails.
const CLOSE_AUTH_FAILED: u16 = 4001;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub rate_limit_max: usize,
    pub rate_limit_window: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rate_limit_max: 100,
            rate_limit_window: Duration::from_secs(60),
        }
    }
}

/// Handle a WebSocket whose token was already checked at the HTTP upgrade.
pub async fn handle_connection_authenticated(
    socket: WebSocket,
    engine: Engine,
    principal: Principal,
    config: GatewayConfig,
) {
    let (sender, receiver) = socket.split();
    info!(
        "{} ({}, {}) connected to gateway (pre-authenticated)",
        principal.name, principal.user_id, principal.role
    );
    run_connection_loop(sender, receiver, engine, principal, config).await;
}

/// Handle a WebSocket that must send `Identify` as its first frame.
pub async fn handle_connection(socket: WebSocket, engine: Engine, config: GatewayConfig) {
    let (mut sender, mut receiver) = socket.split();

    let principal = match wait_for_identify(&mut receiver, &engine).await {
        Some(principal) => principal,
        None => {
            warn!("WebSocket client failed to identify, closing");
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_AUTH_FAILED,
                    reason: "authentication failed".into(),
                })))
                .await;
            return;
        }
    };

    info!(
        "{} ({}, {}) connected to gateway",
        principal.name, principal.user_id, principal.role
    );
    run_connection_loop(sender, receiver, engine, principal, config).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    engine: Engine,
    principal: Principal,
    config: GatewayConfig,
) {
    let ready = ServerEvent::Ready {
        user_id: principal.user_id,
        name: principal.name.clone(),
        role: principal.role,
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    // Joins user:<id> and role:<role>
    let directory = engine.directory().clone();
    let (conn_id, mut events_rx) = directory.register(&principal).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let engine_recv = engine.clone();
    let principal_recv = principal.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut limiter = SlidingWindow::new(config.rate_limit_max, config.rate_limit_window);

        while let Some(Ok(msg)) = receiver.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Binary(_) => {
                    // Counted, then ignored: the protocol is JSON text only.
                    limiter.check(Instant::now());
                    continue;
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                    continue;
                }
                Message::Close(_) => break,
                _ => continue,
            };

            if !limiter.check(Instant::now()) {
                warn!(
                    "{} ({}) exceeded {} messages per {:?}",
                    principal_recv.name,
                    principal_recv.user_id,
                    config.rate_limit_max,
                    config.rate_limit_window
                );
                reply_error(&engine_recv, conn_id, "rate_limited", "too many messages").await;
                continue;
            }

            let cmd = match serde_json::from_str::<ClientCommand>(&text) {
                Ok(cmd) => cmd,
                Err(e) => {
                    warn!(
                        "{} ({}) bad command: {} -- raw: {}",
                        principal_recv.name,
                        principal_recv.user_id,
                        e,
                        text.chars().take(200).collect::<String>()
                    );
                    reply_error(&engine_recv, conn_id, "validation_error", &e.to_string()).await;
                    continue;
                }
            };

            if let Err(e) = handle_command(&engine_recv, conn_id, &principal_recv, cmd).await {
                debug!(
                    "{} ({}) command rejected: {}",
                    principal_recv.name, principal_recv.user_id, e
                );
                reply_error(&engine_recv, conn_id, e.code(), &e.to_string()).await;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    directory.unregister(conn_id).await;
    info!("{} ({}) disconnected from gateway", principal.name, principal.user_id);
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> std::result::Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn reply_error(engine: &Engine, conn_id: ConnectionId, code: &str, message: &str) {
    engine
        .directory()
        .send_to_connection(
            conn_id,
            ServerEvent::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
        )
        .await;
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    engine: &Engine,
) -> Option<Principal> {
    let identify = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    return match serde_json::from_str::<ClientCommand>(&text) {
                        Ok(ClientCommand::Identify { token }) => match engine.authenticate(&token).await {
                            Ok(principal) => Some(principal),
                            Err(e) => {
                                warn!("Identify rejected: {}", e);
                                None
                            }
                        },
                        // Anything before Identify is a protocol violation.
                        _ => None,
                    };
                }
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    });

    identify.await.ok().flatten()
}

/// Execute one command on behalf of a connection.
pub async fn handle_command(
    engine: &Engine,
    conn_id: ConnectionId,
    principal: &Principal,
    cmd: ClientCommand,
) -> Result<()> {
    match cmd {
        ClientCommand::Identify { .. } => {} // Already handled

        ClientCommand::JoinPost { donation_id } => {
            if engine.may_watch(principal, donation_id).await? {
                engine
                    .directory()
                    .join(conn_id, Audience::Post(donation_id))
                    .await;
                debug!("{} joined post:{}", principal.name, donation_id);
            } else {
                // Unknown and off-limits ids look the same to the client.
                debug!("{} denied post:{}", principal.name, donation_id);
            }
        }

        ClientCommand::LeavePost { donation_id } => {
            engine
                .directory()
                .leave(conn_id, Audience::Post(donation_id))
                .await;
        }

        ClientCommand::RequestStatusChange {
            donation_id,
            status,
            estimated_pickup_time,
        } => {
            let principal = engine.refresh(principal).await?;
            engine
                .request_status(&principal, donation_id, status, estimated_pickup_time)
                .await?;
        }

        ClientCommand::RequestFieldUpdate {
            donation_id,
            fields,
        } => {
            let principal = engine.refresh(principal).await?;
            engine.update_fields(&principal, donation_id, fields).await?;
        }

        ClientCommand::BroadcastNewDonation { donation } => {
            let principal = engine.refresh(principal).await?;
            let created = engine.create_donation(&principal, donation).await?;
            // The donor follows their own post from here on.
            engine
                .directory()
                .join(conn_id, Audience::Post(created.id))
                .await;
        }

        ClientCommand::ShareLocation {
            donation_id,
            location,
        } => {
            engine.share_location(principal, donation_id, location).await?;
        }
    }
    Ok(())
}
