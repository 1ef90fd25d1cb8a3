//! Liveness ticker (C5, spec §4.5, P5): every 30 s, scan all registered
//! agent sessions and close any whose `last_seen` is older than 2
//! minutes. Closing here unregisters the session, cancels that agent's
//! outstanding waiters, and fires `Session::shutdown`; the agent's own
//! `tokio::select!` loop in `ws_agent.rs` selects on that shutdown
//! signal and tears the socket down from the other side — a stale peer
//! that still answers transport pings does not keep the connection
//! open past this scan.

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tracing::info;

use crate::state::AppState;

pub const SCAN_INTERVAL: Duration = Duration::from_secs(30);
pub const STALE_AFTER: ChronoDuration = ChronoDuration::minutes(2);

pub async fn run(state: AppState) {
    let mut ticker = tokio::time::interval(SCAN_INTERVAL);
    loop {
        ticker.tick().await;
        for session in state.stale_sessions(STALE_AFTER).await {
            info!(host_id = %session.host_id, "closing session: liveness timeout");
            state.unregister_session(&session.agent_id).await;
            state.router.cancel_agent(&session.agent_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccessClaims, ApiKeyClaims, AuthError, HostMetadata, HostStatus};
    use crate::session::Session;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NoopAuth;
    #[async_trait]
    impl crate::auth::AuthService for NoopAuth {
        async fn validate_api_key(&self, _key: &str) -> Result<ApiKeyClaims, AuthError> {
            Ok(ApiKeyClaims { host_id: None })
        }
        async fn parse_access_token(&self, _token: &str) -> Result<AccessClaims, AuthError> {
            Ok(AccessClaims { subject: "test".to_string() })
        }
    }

    struct NoopHosts;
    #[async_trait]
    impl crate::auth::HostRegistry for NoopHosts {
        async fn upsert(&self, _host_id: &str, _metadata: HostMetadata) {}
        async fn set_status(&self, _host_id: &str, _status: HostStatus) {}
    }

    struct NoopTimeseries;
    #[async_trait]
    impl crate::auth::TimeseriesSink for NoopTimeseries {
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

    #[tokio::test]
    async fn stale_sessions_are_found_by_app_state_before_being_closed() {
        let state = AppState::new(Arc::new(NoopAuth), Arc::new(NoopHosts), Arc::new(NoopTimeseries));
        let session = Arc::new(Session::new("agent-1".to_string(), "host-1".to_string()));
        state.register_session(session).await;
        let stale = state.stale_sessions(ChronoDuration::milliseconds(-1)).await;
        assert_eq!(stale.len(), 1);
    }
}
