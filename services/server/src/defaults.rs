//! Stand-in collaborator implementations wired by `main.rs` until a real
//! deployment supplies Postgres-backed auth/host persistence and a TSDB
//! client (spec §1, §6 — explicitly out of scope for this core). These
//! are not test fakes: they're what a lone `server` binary falls back to
//! when no production collaborators are configured, logged loudly so the
//! gap is visible in production.

use async_trait::async_trait;
use tracing::warn;

use crate::auth::{AccessClaims, ApiKeyClaims, AuthError, AuthService, HostMetadata, HostRegistry, HostStatus, TimeseriesSink};

/// Accepts every key/token unconditionally and never binds a key to a
/// host. Logs once per process so this is impossible to miss in an
/// operator's startup output.
pub struct PermissiveAuth;

impl PermissiveAuth {
    pub fn new() -> Self {
        warn!("no AuthService configured: accepting all api keys and access tokens unchecked");
        Self
    }
}

impl Default for PermissiveAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthService for PermissiveAuth {
    async fn validate_api_key(&self, _key: &str) -> Result<ApiKeyClaims, AuthError> {
        Ok(ApiKeyClaims { host_id: None })
    }

    async fn parse_access_token(&self, _token: &str) -> Result<AccessClaims, AuthError> {
        Ok(AccessClaims { subject: "anonymous".to_string() })
    }
}

/// Logs host metadata/status transitions instead of persisting them.
pub struct LoggingHostRegistry;

#[async_trait]
impl HostRegistry for LoggingHostRegistry {
    async fn upsert(&self, host_id: &str, metadata: HostMetadata) {
        tracing::debug!(host_id, agent_id = %metadata.agent_id, hostname = %metadata.hostname, "host upsert (no persistence configured)");
    }

    async fn set_status(&self, host_id: &str, status: HostStatus) {
        tracing::debug!(host_id, ?status, "host status change (no persistence configured)");
    }
}

/// Metrics collaborator that reports itself disabled, matching
/// `TimeseriesSink::enabled() -> bool` (spec §6) so the agent/hub code
/// paths that gate on it skip the write entirely.
pub struct DisabledTimeseries;

#[async_trait]
impl TimeseriesSink for DisabledTimeseries {
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

    async fn write_host(&self, _host_id: &str, _metrics: &flotilla_protocol::HostMetrics, _ts: chrono::DateTime<chrono::Utc>) {}
}
