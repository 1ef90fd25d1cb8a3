//! Request/response router (C6, spec §4.6): pairs an outbound `command`
//! with the `response` that eventually arrives on the agent's session,
//! and forwards `log_data` events to subscribed log streams.
//!
//! The waiter table is the router's own mutex-guarded state — nothing
//! else touches it (ownership rule, spec §3). Sending the command itself
//! goes through the session registry owned by C5's hub; the router only
//! ever sees it through the narrow [`SessionLookup`] it's constructed
//! with, so hub and router can evolve independently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use flotilla_protocol::Envelope;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;

use crate::logstream::LogStreamRegistry;
use crate::session::Session;

/// Send side of a per-agent queue, as exposed by the hub's session
/// registry. Kept separate from `crate::session::Session` so the router
/// only depends on the one capability it needs (send a command, know
/// whether the agent exists).
#[async_trait::async_trait]
pub trait SessionLookup: Send + Sync {
    async fn sender_for(&self, agent_id: &str) -> Option<mpsc::Sender<Envelope>>;
}

#[async_trait::async_trait]
impl SessionLookup for tokio::sync::RwLock<HashMap<String, Arc<Session>>> {
    async fn sender_for(&self, agent_id: &str) -> Option<mpsc::Sender<Envelope>> {
        self.read().await.get(agent_id).map(Session::sender)
    }
}

const SEND_TIMEOUT: Duration = Duration::from_secs(10);
/// Capacity of the hub-wide fallback channel for responses that arrive
/// after their waiter has already been removed (late replies, or a
/// response for a command this router never issued). Bounded and
/// drop-on-overflow per spec §4.6.
const FALLBACK_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("no session registered for agent")]
    AgentNotFound,
    #[error("no agent bound to host")]
    HostNotFound,
    #[error("agent session is not accepting commands")]
    AgentNotReady,
    #[error("command timed out waiting for a response")]
    CommandTimeout,
    #[error("session closed before a response arrived")]
    ConnectionClosed,
    #[error("dispatcher reported an error: {0}")]
    DispatcherError(String),
}

/// A registered waiter: which agent the in-flight command was sent to
/// (so a destroyed session only cancels its own commands, spec §5 line
/// 199) plus the one-shot the response gets delivered on.
struct Waiter {
    agent_id: String,
    reply_tx: oneshot::Sender<Envelope>,
}

pub struct CommandRouter {
    sessions: Arc<dyn SessionLookup>,
    logstreams: Arc<LogStreamRegistry>,
    waiters: Mutex<HashMap<String, Waiter>>,
    fallback_tx: mpsc::Sender<Envelope>,
}

impl CommandRouter {
    pub fn new(sessions: Arc<dyn SessionLookup>, logstreams: Arc<LogStreamRegistry>) -> Arc<Self> {
        let (fallback_tx, mut fallback_rx) = mpsc::channel::<Envelope>(FALLBACK_CAPACITY);
        tokio::spawn(async move {
            while let Some(envelope) = fallback_rx.recv().await {
                debug!(id = %envelope.id, "response with no matching waiter, dropped to fallback");
            }
        });
        Arc::new(Self { sessions, logstreams, waiters: Mutex::new(HashMap::new()), fallback_tx })
    }

    /// Registers a single-slot waiter for `command_id`, tagged with the
    /// agent it was issued to. The router owns exactly one slot per id;
    /// a second `subscribe` for the same id silently replaces the first
    /// (the caller is expected to generate fresh UUIDs per issue, per I2).
    pub async fn subscribe(&self, agent_id: String, command_id: String) -> oneshot::Receiver<Envelope> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(command_id, Waiter { agent_id, reply_tx: tx });
        rx
    }

    pub async fn unsubscribe(&self, command_id: &str) {
        self.waiters.lock().await.remove(command_id);
    }

    /// Called by the agent read pump when a `response` envelope arrives.
    /// Delivers to the matching waiter if one is still registered;
    /// otherwise drops it to the bounded fallback channel.
    pub async fn deliver_response(&self, envelope: Envelope) {
        let waiter = self.waiters.lock().await.remove(&envelope.id);
        match waiter {
            Some(waiter) => {
                // Delivery is best-effort: a full/closed waiter just means
                // the caller already gave up (timed out) and we drop it.
                let _ = waiter.reply_tx.send(envelope);
            }
            None => {
                let _ = self.fallback_tx.try_send(envelope);
            }
        }
    }

    /// Releases only the waiters that were issued to `agent_id` (spec §5
    /// line 199: closure is scoped to the destroyed session, silent to
    /// every other in-flight command). Called once per destroyed
    /// session; waiters for other agents are untouched and keep
    /// resolving independently via `deliver_response`.
    pub async fn cancel_agent(&self, agent_id: &str) {
        let mut waiters = self.waiters.lock().await;
        waiters.retain(|_, waiter| {
            if waiter.agent_id == agent_id {
                false // dropping the sender wakes the receiver with a RecvError
            } else {
                true
            }
        });
    }

    /// Issues `command` to `agent_id` and waits up to `timeout` for the
    /// matching response. Returns the response's `data` payload (or the
    /// raw payload if `data` is absent) on success; an `error` field in
    /// the response is surfaced as `DispatcherError` verbatim.
    pub async fn issue(
        &self,
        agent_id: &str,
        command: Envelope,
        timeout: Duration,
    ) -> Result<serde_json::Value, RouterError> {
        let command_id = command.id.clone();
        let rx = self.subscribe(agent_id.to_string(), command_id.clone()).await;

        let Some(sender) = self.sessions.sender_for(agent_id).await else {
            self.unsubscribe(&command_id).await;
            return Err(RouterError::AgentNotFound);
        };

        match tokio::time::timeout(SEND_TIMEOUT, sender.send(command)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                self.unsubscribe(&command_id).await;
                return Err(RouterError::ConnectionClosed);
            }
            Err(_) => {
                self.unsubscribe(&command_id).await;
                return Err(RouterError::AgentNotReady);
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(envelope)) => {
                let view = envelope
                    .as_response()
                    .map_err(|e| RouterError::DispatcherError(e.to_string()))?;
                if let Some(error) = view.error {
                    return Err(RouterError::DispatcherError(error));
                }
                Ok(view.data.unwrap_or(serde_json::Value::Null))
            }
            Ok(Err(_)) => Err(RouterError::ConnectionClosed),
            Err(_) => {
                self.unsubscribe(&command_id).await;
                Err(RouterError::CommandTimeout)
            }
        }
    }

    /// Invoked by C5 on a `log_data` event from an agent session.
    pub async fn forward_log(
        &self,
        host_id: &str,
        container_id: &str,
        data: &str,
        stream: &str,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) {
        let envelope = Envelope::event(
            "log_data",
            serde_json::json!({
                "container_id": container_id,
                "data": data,
                "stream": stream,
                "timestamp": timestamp,
            }),
        );
        self.logstreams.fan_out(host_id, container_id, &envelope).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct FakeSessions {
        senders: StdMutex<HashMap<String, mpsc::Sender<Envelope>>>,
    }

    #[async_trait::async_trait]
    impl SessionLookup for FakeSessions {
        async fn sender_for(&self, agent_id: &str) -> Option<mpsc::Sender<Envelope>> {
            self.senders.lock().unwrap().get(agent_id).cloned()
        }
    }

    #[tokio::test]
    async fn issue_returns_agent_not_found_for_unknown_agent() {
        let sessions = Arc::new(FakeSessions { senders: StdMutex::new(HashMap::new()) });
        let router = CommandRouter::new(sessions, Arc::new(LogStreamRegistry::new()));
        let command = Envelope::command(Some("c1".to_string()), "list_containers", serde_json::json!({}));
        let err = router.issue("ghost", command, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, RouterError::AgentNotFound));
    }

    #[tokio::test]
    async fn issue_round_trips_a_response_delivered_out_of_band() {
        let (tx, mut rx) = mpsc::channel::<Envelope>(8);
        let sessions = Arc::new(FakeSessions {
            senders: StdMutex::new(HashMap::from([("agent-1".to_string(), tx)])),
        });
        let router = CommandRouter::new(sessions, Arc::new(LogStreamRegistry::new()));

        let command = Envelope::command(Some("c1".to_string()), "list_containers", serde_json::json!({}));
        let router_for_agent = router.clone();
        let responder = tokio::spawn(async move {
            let sent = rx.recv().await.expect("command forwarded to agent");
            let view = sent.as_command().unwrap();
            let response = Envelope::response_ok(view.id, serde_json::json!({"containers": []}));
            router_for_agent.deliver_response(response).await;
        });

        let data = router.issue("agent-1", command, Duration::from_secs(1)).await.unwrap();
        assert_eq!(data, serde_json::json!({"containers": []}));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn issue_times_out_when_no_response_arrives() {
        let (tx, _rx) = mpsc::channel::<Envelope>(8);
        let sessions = Arc::new(FakeSessions {
            senders: StdMutex::new(HashMap::from([("agent-1".to_string(), tx)])),
        });
        let router = CommandRouter::new(sessions, Arc::new(LogStreamRegistry::new()));
        let command = Envelope::command(Some("c1".to_string()), "list_containers", serde_json::json!({}));
        let err = router.issue("agent-1", command, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, RouterError::CommandTimeout));
    }

    #[tokio::test]
    async fn issue_surfaces_dispatcher_error_verbatim() {
        let (tx, mut rx) = mpsc::channel::<Envelope>(8);
        let sessions = Arc::new(FakeSessions {
            senders: StdMutex::new(HashMap::from([("agent-1".to_string(), tx)])),
        });
        let router = CommandRouter::new(sessions, Arc::new(LogStreamRegistry::new()));
        let command = Envelope::command(Some("c1".to_string()), "stop_container", serde_json::json!({}));
        let router_for_agent = router.clone();
        tokio::spawn(async move {
            let sent = rx.recv().await.unwrap();
            let view = sent.as_command().unwrap();
            router_for_agent.deliver_response(Envelope::response_err(view.id, "no such container")).await;
        });
        let err = router.issue("agent-1", command, Duration::from_secs(1)).await.unwrap_err();
        match err {
            RouterError::DispatcherError(msg) => assert_eq!(msg, "no such container"),
            other => panic!("expected DispatcherError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_agent_only_releases_that_agents_waiters() {
        let (tx_a, _rx_a) = mpsc::channel::<Envelope>(8);
        let (tx_b, _rx_b) = mpsc::channel::<Envelope>(8);
        let sessions = Arc::new(FakeSessions {
            senders: StdMutex::new(HashMap::from([
                ("agent-a".to_string(), tx_a),
                ("agent-b".to_string(), tx_b),
            ])),
        });
        let router = CommandRouter::new(sessions, Arc::new(LogStreamRegistry::new()));

        let command_a = Envelope::command(Some("a1".to_string()), "list_containers", serde_json::json!({}));
        let command_b = Envelope::command(Some("b1".to_string()), "list_containers", serde_json::json!({}));
        let router_a = router.clone();
        let router_b = router.clone();
        let issue_a = tokio::spawn(async move { router_a.issue("agent-a", command_a, Duration::from_secs(2)).await });
        let issue_b = tokio::spawn(async move { router_b.issue("agent-b", command_b, Duration::from_secs(2)).await });

        // Give both `issue` calls time to register their waiters before
        // agent-a's session is torn down.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        router.cancel_agent("agent-a").await;

        let err_a = issue_a.await.unwrap().unwrap_err();
        assert!(matches!(err_a, RouterError::ConnectionClosed), "agent-a's command must be cancelled");

        router.deliver_response(Envelope::response_ok("b1", serde_json::json!({"ok": true}))).await;
        let data_b = issue_b.await.unwrap().unwrap();
        assert_eq!(data_b, serde_json::json!({"ok": true}), "agent-b's command must be unaffected");
    }
}
