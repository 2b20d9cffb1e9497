use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use kelas_types::api::Claims;
use kelas_types::events::{GatewayCommand, GatewayEvent};
use kelas_types::models::UserProfile;

use crate::dispatcher::Dispatcher;
use crate::session::Session;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh socket may stay silent before sending Identify.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound events queued per connection.
const OUTBOUND_BUFFER: usize = 64;

/// Handle a single WebSocket connection: Identify handshake, Ready, then
/// stream whatever the client watches until either side goes away.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher) {
    let (mut sender, mut receiver) = socket.split();

    let Some(uid) = wait_for_identify(&mut receiver, dispatcher.jwt_secret()).await else {
        warn!("WebSocket client failed to identify, closing");
        return;
    };

    let profile = match load_profile(&dispatcher, &uid).await {
        Some(profile) => profile,
        None => {
            let _ = send_event(
                &mut sender,
                &GatewayEvent::Error { message: "unknown user".into() },
            )
            .await;
            return;
        }
    };

    info!("{} ({}) connected to gateway", profile.display_name, profile.uid);

    let ready = GatewayEvent::Ready {
        user_id: profile.uid.clone(),
        display_name: profile.display_name.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, profile).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    profile: UserProfile,
) {
    let (conn_id, conn_token) = dispatcher.register(&profile.uid).await;
    let (out_tx, mut out_rx) = mpsc::channel::<GatewayEvent>(OUTBOUND_BUFFER);

    // Set by the reader on every Pong, cleared by each heartbeat tick
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events to the client, with heartbeat
    let send_token = conn_token.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                biased;
                _ = send_token.cancelled() => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                event = out_rx.recv() => {
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
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let uid = profile.uid.clone();
    let mut session = Session::new(profile, dispatcher.clone(), out_tx, conn_token.clone());
    let recv_token = conn_token.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                biased;
                _ = recv_token.cancelled() => break,
                msg = receiver.next() => msg,
            };
            let Some(Ok(msg)) = msg else { break };

            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => session.handle_command(cmd).await,
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            session.uid(),
                            e,
                            truncate(&text, 200)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        session.close().await;
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => {
            conn_token.cancel();
            let _ = recv_task.await;
        }
        _ = &mut recv_task => {
            conn_token.cancel();
            let _ = send_task.await;
        }
    }

    dispatcher.unregister(conn_id).await;
    info!("{} disconnected from gateway", uid);
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, jwt_secret: &str) -> Option<String> {
    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(token_data.claims.sub);
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn load_profile(dispatcher: &Dispatcher, uid: &str) -> Option<UserProfile> {
    let db = dispatcher.db().clone();
    let lookup = uid.to_string();
    match tokio::task::spawn_blocking(move || db.get_profile(&lookup)).await {
        Ok(Ok(Some(profile))) => Some(profile),
        Ok(Ok(None)) => {
            warn!("Gateway token for unknown profile {}", uid);
            None
        }
        Ok(Err(e)) => {
            error!("Profile lookup for {} failed: {:#}", uid, e);
            None
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            None
        }
    }
}
