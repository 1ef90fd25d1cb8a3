//! Browser-facing WebSocket endpoints: `/ws/ui` (general event broadcast)
//! and `/ws/logs/:host_id/:container_id` (a single container's log
//! stream). Grounded on `ws_receiver.rs`'s thin delegator shape: extract
//! a credential, validate it via the auth collaborator, and only then
//! upgrade.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use flotilla_protocol::Envelope;
use tracing::{info, warn};

use crate::state::AppState;

fn extract_access_token(headers: &HeaderMap, protocols: Option<&str>, query: &HashMap<String, String>) -> Option<String> {
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(token) = crate::auth::extract_bearer(auth) {
            return Some(token.to_string());
        }
    }
    if let Some(protocols) = protocols {
        for candidate in protocols.split(',').map(str::trim) {
            if let Some(token) = candidate.strip_prefix("auth-") {
                return Some(token.to_string());
            }
        }
    }
    query.get("token").cloned()
}

pub async fn ws_ui_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let protocols = headers.get("sec-websocket-protocol").and_then(|v| v.to_str().ok()).map(str::to_owned);
    let Some(token) = extract_access_token(&headers, protocols.as_deref(), &HashMap::new()) else {
        return axum::http::StatusCode::UNAUTHORIZED.into_response();
    };
    if state.auth.parse_access_token(&token).await.is_err() {
        return axum::http::StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| handle_ui_socket(socket, state)).into_response()
}

async fn handle_ui_socket(mut socket: WebSocket, state: AppState) {
    let mut events = state.ui_broadcast.subscribe();
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(envelope) => {
                        if socket.send(Message::Text(envelope.encode().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "UI client lagged behind broadcast, frames dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

pub async fn ws_logs_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((host_id, container_id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let protocols = headers.get("sec-websocket-protocol").and_then(|v| v.to_str().ok()).map(str::to_owned);
    let Some(token) = extract_access_token(&headers, protocols.as_deref(), &query) else {
        return axum::http::StatusCode::UNAUTHORIZED.into_response();
    };
    if state.auth.parse_access_token(&token).await.is_err() {
        return axum::http::StatusCode::UNAUTHORIZED.into_response();
    }

    let Some(agent_id) = state.agent_id_for_host(&host_id).await else {
        return axum::http::StatusCode::NOT_FOUND.into_response();
    };

    ws.on_upgrade(move |socket| handle_log_stream_socket(socket, state, agent_id, host_id, container_id, query))
        .into_response()
}

async fn handle_log_stream_socket(
    mut socket: WebSocket,
    state: AppState,
    agent_id: String,
    host_id: String,
    container_id: String,
    query: HashMap<String, String>,
) {
    let (subscription, mut rx) = state.logstreams.subscribe(&host_id, &container_id).await;

    let params = serde_json::json!({
        "container_id": container_id,
        "follow": query.get("follow").map_or(true, |v| v != "false"),
        "tail": query.get("tail").cloned().unwrap_or_else(|| "all".to_string()),
        "timestamps": query.get("timestamps").is_some_and(|v| v == "true"),
    });
    let command = Envelope::command(None, "stream_container_logs", params);
    if let Err(e) = state.router.issue(&agent_id, command, std::time::Duration::from_secs(15)).await {
        warn!(host_id = %host_id, container_id = %container_id, error = %e, "failed to start agent log stream");
    }
    info!(host_id = %host_id, container_id = %container_id, "UI log stream subscribed");

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(envelope) => {
                        if socket.send(Message::Text(envelope.encode().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    subscription.unsubscribe().await;
}
