//! `AgentSession`: the persistent framed connection to the server (spec
//! §4.4). A single writer task owns the WebSocket sink; the read loop,
//! the heartbeat ticker, and the metrics forwarder all push frames
//! through a cloneable [`SessionHandle`] instead of touching the socket
//! directly.
//!
//! Grounded on `services/forwarder/src/uplink.rs`'s connect/send/recv
//! shape and `services/receiver/src/session.rs`'s `run_session_loop`
//! `tokio::select!` structure. Unlike the forwarder's uplink, the
//! handshake here is carried entirely in the connection URL (`host_id`
//! and `api_key` query parameters, spec §6) — there is no explicit hello
//! frame to await before the session is considered live.

use std::sync::Arc;
use std::time::Duration;

use flotilla_dispatcher::Dispatcher;
use flotilla_protocol::{Envelope, Heartbeat};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const WRITE_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub base_url: String,
    pub agent_ws_path: String,
    pub host_id: String,
    pub api_key: String,
    pub agent_id: String,
    pub agent_name: String,
    pub hostname: String,
}

impl SessionConfig {
    fn url(&self) -> String {
        format!(
            "{}{}?host_id={}&api_key={}",
            self.base_url, self.agent_ws_path, self.host_id, self.api_key
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connect: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection closed by server")]
    ConnectionClosed,
}

/// Cloneable handle for pushing frames onto the session's single write
/// task — used by the dispatcher's log-emit callback, the heartbeat
/// ticker, and the metrics forwarder.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Message>,
}

impl SessionHandle {
    pub fn send(&self, envelope: Envelope) {
        if self.tx.try_send(Message::Text(envelope.encode().into())).is_err() {
            debug!("write queue full, dropping outbound frame");
        }
    }
}

/// Runs the session forever: connects, serves the socket until a fatal
/// error, then reconnects with exponential backoff. Only returns once
/// `shutdown` is signalled.
///
/// `app_rx` carries every envelope the rest of the agent wants to push
/// to the server outside of a command/response round trip — metrics
/// samples and `log_data` events alike. Frames queued here while the
/// socket is down are held at most for the lifetime of the channel's
/// bounded buffer; producers (the metrics collector, the log-streaming
/// callback) use non-blocking sends and drop on backpressure, so nothing
/// is buffered indefinitely across a reconnect.
pub async fn run(
    config: SessionConfig,
    dispatcher: Arc<Dispatcher>,
    mut app_rx: mpsc::Receiver<Envelope>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if *shutdown.borrow() {
            return;
        }

        match connect_and_serve(&config, &dispatcher, &mut app_rx, &mut shutdown).await {
            Ok(()) => return, // clean shutdown
            Err(e) => {
                warn!(error = %e, backoff_secs = backoff.as_secs(), "session ended, reconnecting");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
                backoff = next_backoff(backoff);
            }
        }
    }
}

async fn connect_and_serve(
    config: &SessionConfig,
    dispatcher: &Arc<Dispatcher>,
    app_rx: &mut mpsc::Receiver<Envelope>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), SessionError> {
    let url = config.url();
    let (ws_stream, _response) = tokio_tungstenite::connect_async(&url).await?;
    info!(host_id = %config.host_id, "agent session connected");

    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<Message>(WRITE_QUEUE_DEPTH);
    let handle = SessionHandle { tx: tx.clone() };

    let write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if write.send(msg).await.is_err() {
                break;
            }
        }
    });

    let heartbeat_handle = handle.clone();
    let heartbeat_cfg = config.clone();
    let mut heartbeat_shutdown = shutdown.clone();
    let heartbeat_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        let started = tokio::time::Instant::now();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let hb = Heartbeat {
                        agent_id: heartbeat_cfg.agent_id.clone(),
                        agent_name: heartbeat_cfg.agent_name.clone(),
                        hostname: heartbeat_cfg.hostname.clone(),
                        status: "online".to_string(),
                        uptime_seconds: started.elapsed().as_secs(),
                        containers_running: 0,
                    };
                    heartbeat_handle.send(Envelope::heartbeat(&hb));
                }
                _ = heartbeat_shutdown.changed() => {
                    if *heartbeat_shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });

    let result = read_loop(dispatcher, &handle, &mut read, app_rx, shutdown).await;

    heartbeat_task.abort();
    drop(tx);
    let _ = write_task.await;
    result
}

async fn read_loop<S>(
    dispatcher: &Arc<Dispatcher>,
    handle: &SessionHandle,
    read: &mut futures_util::stream::SplitStream<tokio_tungstenite::WebSocketStream<S>>,
    app_rx: &mut mpsc::Receiver<Envelope>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), SessionError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
            outbound = app_rx.recv() => {
                if let Some(envelope) = outbound {
                    handle.send(envelope);
                }
            }
            msg = read.next() => {
                match msg {
                    None => return Err(SessionError::ConnectionClosed),
                    Some(Err(e)) => return Err(SessionError::Connect(e)),
                    Some(Ok(Message::Text(text))) => {
                        let Ok(envelope) = Envelope::decode(&text) else {
                            warn!("malformed frame from server, ignoring");
                            continue;
                        };
                        match envelope.as_command() {
                            Ok(_) => {
                                let response = dispatcher.handle(&envelope).await;
                                handle.send(response);
                            }
                            Err(_) => {
                                if let Ok(event) = envelope.as_event() {
                                    debug!(event_type = %event.event_type, "server event");
                                } else {
                                    debug!("ignoring non-command frame from server");
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = handle.tx.try_send(Message::Pong(data));
                    }
                    Some(Ok(Message::Close(_))) => return Err(SessionError::ConnectionClosed),
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = INITIAL_BACKOFF;
        assert_eq!(b, Duration::from_secs(1));
        b = next_backoff(b);
        assert_eq!(b, Duration::from_secs(2));
        b = next_backoff(b);
        assert_eq!(b, Duration::from_secs(4));
        for _ in 0..10 {
            b = next_backoff(b);
        }
        assert_eq!(b, MAX_BACKOFF);
    }

    #[test]
    fn session_url_carries_host_id_and_api_key() {
        let cfg = SessionConfig {
            base_url: "ws://example.test".to_string(),
            agent_ws_path: "/ws/agent".to_string(),
            host_id: "host-1".to_string(),
            api_key: "secret".to_string(),
            agent_id: "agent-1".to_string(),
            agent_name: "agent-1".to_string(),
            hostname: "box".to_string(),
        };
        assert_eq!(cfg.url(), "ws://example.test/ws/agent?host_id=host-1&api_key=secret");
    }
}
