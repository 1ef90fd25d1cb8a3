//! Agent-facing WebSocket endpoint (`/ws/agent`, C5 spec §4.5). Grounded
//! on `ws_forwarder.rs`'s handshake-then-select-loop shape: validate the
//! credential found on the connection, register the session, emit a
//! one-shot greeting, then run read and write pumps side by side until
//! either exits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use flotilla_protocol::{Envelope, MessageType};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::HostStatus;
use crate::session::Session;
use crate::state::AppState;

const TRANSPORT_PING_INTERVAL: Duration = Duration::from_secs(15);

pub async fn ws_agent_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let api_key = params.get("api_key").cloned();
    let requested_host_id = params.get("host_id").cloned();
    ws.on_upgrade(move |socket| handle_agent_socket(socket, state, api_key, requested_host_id))
}

async fn handle_agent_socket(
    mut socket: WebSocket,
    state: AppState,
    api_key: Option<String>,
    requested_host_id: Option<String>,
) {
    let Some(api_key) = api_key else {
        let _ = socket.send(Message::Close(None)).await;
        return;
    };

    let claims = match state.auth.validate_api_key(&api_key).await {
        Ok(claims) => claims,
        Err(_) => {
            warn!("agent handshake rejected: invalid api key");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    // `host_id` is the one channel the handshake actually carries an
    // identity on (spec §6's session URL has no slot for the agent's own
    // persisted agent_id); we use it as the session's sole registration
    // key, deferring the bound-key-wins rule from §4.5.
    let host_id = claims.host_id.or(requested_host_id).unwrap_or_else(|| Uuid::new_v4().to_string());

    let session = Arc::new(Session::new(host_id.clone(), host_id.clone()));
    if !state.register_session(session.clone()).await {
        warn!(host_id = %host_id, "rejecting duplicate agent connection");
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    info!(host_id = %host_id, "agent connected");

    let settings = Envelope::event(
        "server_settings",
        serde_json::json!({ "server_settings": { "metrics_enabled": state.timeseries.enabled() } }),
    );
    if socket.send(Message::Text(settings.encode().into())).await.is_err() {
        state.unregister_session(&host_id).await;
        return;
    }

    let Some(mut send_rx) = session.take_send_queue().await else {
        warn!(host_id = %host_id, "pump already started for this session, refusing to start a second (P2)");
        return;
    };
    let mut shutdown_rx = session.subscribe_shutdown();

    let mut ping_ticker = tokio::time::interval(TRANSPORT_PING_INTERVAL);
    ping_ticker.tick().await;

    loop {
        tokio::select! {
            // Fired by `AppState::unregister_session` — either the
            // liveness ticker closing a stale session, or a duplicate
            // connection bumping this one. Without this arm the loop has
            // no way to learn it was unregistered out from under it, and
            // a peer that keeps answering transport pings would hold the
            // socket open forever.
            _ = shutdown_rx.changed() => {
                info!(host_id = %host_id, "session shut down, closing socket");
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound_frame(&state, &session, &text).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        session.touch();
                    }
                    Some(Ok(Message::Ping(data))) => {
                        session.touch();
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(host_id = %host_id, "agent disconnected");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {}
                    Some(Err(e)) => {
                        warn!(host_id = %host_id, error = %e, "websocket error, closing session");
                        break;
                    }
                }
            }
            outbound = send_rx.recv() => {
                let Some(mut frame) = outbound else { break };
                // Opportunistically coalesce whatever else is already
                // queued into one text message, newline-separated.
                let mut batch = frame.encode();
                while let Ok(more) = send_rx.try_recv() {
                    frame = more;
                    batch.push('\n');
                    batch.push_str(&frame.encode());
                }
                if socket.send(Message::Text(batch.into())).await.is_err() {
                    warn!(host_id = %host_id, "write failed, closing session");
                    break;
                }
            }
            _ = ping_ticker.tick() => {
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.unregister_session(&host_id).await;
    state.router.cancel_agent(&host_id).await;
    info!(host_id = %host_id, "agent session ended");
}

async fn handle_inbound_frame(state: &AppState, session: &Arc<Session>, text: &str) {
    session.touch();
    let envelope = match Envelope::decode(text) {
        Ok(e) => e,
        Err(e) => {
            debug!(error = %e, "malformed frame from agent, ignoring");
            return;
        }
    };

    match envelope.message_type {
        MessageType::Response => {
            state.router.deliver_response(envelope).await;
        }
        MessageType::Event => {
            if let Ok(view) = envelope.as_event() {
                if view.event_type == "log_data" {
                    if let Some(container_id) = view.data.get("container_id").and_then(|v| v.as_str()) {
                        state.logstreams.fan_out(&session.host_id, container_id, &envelope).await;
                    }
                } else {
                    let _ = state.ui_broadcast.send(envelope);
                }
            }
        }
        MessageType::Heartbeat => {
            if let Ok(hb) = envelope.as_heartbeat() {
                state
                    .hosts
                    .upsert(
                        &session.host_id,
                        crate::auth::HostMetadata {
                            agent_id: hb.agent_id,
                            agent_name: hb.agent_name,
                            hostname: hb.hostname,
                        },
                    )
                    .await;
                state.hosts.set_status(&session.host_id, HostStatus::Online).await;
            }
        }
        MessageType::Metrics => {
            if let Ok(metrics) = envelope.as_metrics() {
                if state.timeseries.enabled() {
                    let now = chrono::Utc::now();
                    state.timeseries.write_host(&session.host_id, &metrics.host, now).await;
                    for container in &metrics.containers {
                        state.timeseries.write_container(&session.host_id, container, now).await;
                    }
                }
            }
        }
        MessageType::Command => {
            debug!("agent sent a command frame, which this endpoint never issues; ignoring");
        }
    }
}
