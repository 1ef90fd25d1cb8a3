//! `AppState`: the hub's shared, cloneable handle (spec §3, §5). Holds
//! the agent/host session registries behind their own reader/writer
//! locks, the UI broadcast channel, the command router, the log-stream
//! registry, and the three collaborator trait objects the core consumes
//! but does not implement.
//!
//! Grounded on the register/unregister and lazily-created-broadcast
//! idioms this codebase already uses for its forwarder and stream
//! registries: a read-lock fast path, then a write-lock
//! check-then-insert to avoid clobbering a concurrent registration.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::warn;

use crate::auth::{AuthService, HostRegistry, TimeseriesSink};
use crate::logstream::LogStreamRegistry;
use crate::router::CommandRouter;
use crate::session::Session;

pub type AgentSessionRegistry = RwLock<HashMap<String, Arc<Session>>>;
pub type HostIndex = RwLock<HashMap<String, String>>;

#[derive(Clone)]
pub struct AppState {
    pub agent_sessions: Arc<AgentSessionRegistry>,
    /// `host_id -> agent_id`, so the REST layer (out of scope) can issue
    /// commands against a host without knowing the current agent_id.
    pub host_index: Arc<HostIndex>,
    pub ui_broadcast: broadcast::Sender<flotilla_protocol::Envelope>,
    pub router: Arc<CommandRouter>,
    pub logstreams: Arc<LogStreamRegistry>,
    pub auth: Arc<dyn AuthService>,
    pub hosts: Arc<dyn HostRegistry>,
    pub timeseries: Arc<dyn TimeseriesSink>,
}

impl AppState {
    pub fn new(
        auth: Arc<dyn AuthService>,
        hosts: Arc<dyn HostRegistry>,
        timeseries: Arc<dyn TimeseriesSink>,
    ) -> Self {
        let agent_sessions: Arc<AgentSessionRegistry> = Arc::new(RwLock::new(HashMap::new()));
        let logstreams = Arc::new(LogStreamRegistry::new());
        let router = CommandRouter::new(agent_sessions.clone(), logstreams.clone());
        let (ui_broadcast, _) = broadcast::channel(4096);
        Self {
            agent_sessions,
            host_index: Arc::new(RwLock::new(HashMap::new())),
            ui_broadcast,
            router,
            logstreams,
            auth,
            hosts,
            timeseries,
        }
    }

    /// Registers a session under both its `agent_id` and `host_id`.
    /// Returns `false` (a no-op) if an agent with this id is already
    /// registered — the caller should reject the duplicate connection
    /// rather than silently replacing the live one.
    pub async fn register_session(&self, session: Arc<Session>) -> bool {
        {
            let sessions = self.agent_sessions.read().await;
            if sessions.contains_key(&session.agent_id) {
                warn!(agent_id = %session.agent_id, "duplicate agent registration rejected");
                return false;
            }
        }
        let mut sessions = self.agent_sessions.write().await;
        if sessions.contains_key(&session.agent_id) {
            return false;
        }
        self.host_index.write().await.insert(session.host_id.clone(), session.agent_id.clone());
        sessions.insert(session.agent_id.clone(), session);
        true
    }

    /// Removes the session from both registries, marks its host
    /// offline, then signals shutdown so the agent socket's read/write
    /// pumps tear down rather than lingering on a registry entry that no
    /// longer exists (spec §4.5 unregister order: registries, then the
    /// send queue, then offline — the socket close follows from the
    /// shutdown signal the pumps select on).
    pub async fn unregister_session(&self, agent_id: &str) {
        let removed = self.agent_sessions.write().await.remove(agent_id);
        if let Some(session) = removed {
            self.host_index.write().await.remove(&session.host_id);
            self.hosts.set_status(&session.host_id, crate::auth::HostStatus::Offline).await;
            session.shutdown();
        }
    }

    pub async fn session_by_agent(&self, agent_id: &str) -> Option<Arc<Session>> {
        self.agent_sessions.read().await.get(agent_id).cloned()
    }

    pub async fn agent_id_for_host(&self, host_id: &str) -> Option<String> {
        self.host_index.read().await.get(host_id).cloned()
    }

    /// Sessions whose `last_seen` is older than `max_age`, for the
    /// liveness ticker to close.
    pub async fn stale_sessions(&self, max_age: chrono::Duration) -> Vec<Arc<Session>> {
        let cutoff = chrono::Utc::now().timestamp_millis() - max_age.num_milliseconds();
        self.agent_sessions
            .read()
            .await
            .values()
            .filter(|s| s.last_seen_unix_ms() < cutoff)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccessClaims, ApiKeyClaims, AuthError, HostMetadata};
    use async_trait::async_trait;

    struct NoopAuth;
    #[async_trait]
    impl AuthService for NoopAuth {
        async fn validate_api_key(&self, _key: &str) -> Result<ApiKeyClaims, AuthError> {
            Ok(ApiKeyClaims { host_id: None })
        }
        async fn parse_access_token(&self, _token: &str) -> Result<AccessClaims, AuthError> {
            Ok(AccessClaims { subject: "test".to_string() })
        }
    }

    struct NoopHosts;
    #[async_trait]
    impl HostRegistry for NoopHosts {
        async fn upsert(&self, _host_id: &str, _metadata: HostMetadata) {}
        async fn set_status(&self, _host_id: &str, _status: crate::auth::HostStatus) {}
    }

    struct NoopTimeseries;
    #[async_trait]
    impl TimeseriesSink for NoopTimeseries {
        fn enabled(&self) -> bool {
            false
        }
        async fn write_container(
            &self,
            _host_id: &str,
            _metrics: &flotilla_protocol::ContainerMetrics,
            _ts: chrono::DateTime<chrono::Utc>,
        ) {
        }
        async fn write_host(
            &self,
            _host_id: &str,
            _metrics: &flotilla_protocol::HostMetrics,
            _ts: chrono::DateTime<chrono::Utc>,
        ) {
        }
    }

    fn test_state() -> AppState {
        AppState::new(Arc::new(NoopAuth), Arc::new(NoopHosts), Arc::new(NoopTimeseries))
    }

    #[tokio::test]
    async fn duplicate_registration_is_a_no_op() {
        let state = test_state();
        let session = Arc::new(Session::new("agent-1".to_string(), "host-1".to_string()));
        assert!(state.register_session(session.clone()).await);
        let duplicate = Arc::new(Session::new("agent-1".to_string(), "host-2".to_string()));
        assert!(!state.register_session(duplicate).await);
        assert_eq!(state.agent_id_for_host("host-1").await.as_deref(), Some("agent-1"));
    }

    #[tokio::test]
    async fn unregister_clears_both_indexes() {
        let state = test_state();
        let session = Arc::new(Session::new("agent-1".to_string(), "host-1".to_string()));
        state.register_session(session).await;
        state.unregister_session("agent-1").await;
        assert!(state.session_by_agent("agent-1").await.is_none());
        assert!(state.agent_id_for_host("host-1").await.is_none());
    }

    #[tokio::test]
    async fn unregister_fires_the_session_shutdown_signal() {
        let state = test_state();
        let session = Arc::new(Session::new("agent-1".to_string(), "host-1".to_string()));
        let mut shutdown_rx = session.subscribe_shutdown();
        state.register_session(session).await;
        state.unregister_session("agent-1").await;
        shutdown_rx.changed().await.expect("sender still alive");
        assert!(*shutdown_rx.borrow(), "unregister must signal the socket to tear down");
    }

    #[tokio::test]
    async fn stale_sessions_reports_only_sessions_past_the_cutoff() {
        let state = test_state();
        let fresh = Arc::new(Session::new("fresh".to_string(), "host-fresh".to_string()));
        state.register_session(fresh).await;
        let stale = state.stale_sessions(chrono::Duration::milliseconds(-1)).await;
        assert_eq!(stale.len(), 1, "every session is 'stale' against a negative max age");
    }
}
