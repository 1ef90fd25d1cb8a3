//! Collaborator interfaces the hub consumes but does not implement (spec
//! §6): API key/token validation, host persistence, and time-series
//! storage all live behind a Postgres/JWT/TSDB client elsewhere. The hub
//! is generic over these traits so it can be exercised against in-memory
//! fakes without a database.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outcome of validating an agent's API key. `host_id` is `Some` when the
/// key is already bound to a host; an unbound key leaves host assignment
/// to the caller (§4.5 agent handshake).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyClaims {
    pub host_id: Option<String>,
}

/// Claims carried by a short-lived UI access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessClaims {
    pub subject: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid or revoked credential")]
    Invalid,
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn validate_api_key(&self, key: &str) -> Result<ApiKeyClaims, AuthError>;
    async fn parse_access_token(&self, token: &str) -> Result<AccessClaims, AuthError>;
}

/// Metadata pushed to the host registry on agent handshake and heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostMetadata {
    pub agent_id: String,
    pub agent_name: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    Online,
    Offline,
}

#[async_trait]
pub trait HostRegistry: Send + Sync {
    async fn upsert(&self, host_id: &str, metadata: HostMetadata);
    async fn set_status(&self, host_id: &str, status: HostStatus);
}

#[async_trait]
pub trait TimeseriesSink: Send + Sync {
    fn enabled(&self) -> bool;
    async fn write_container(
        &self,
        host_id: &str,
        metrics: &flotilla_protocol::ContainerMetrics,
        ts: chrono::DateTime<chrono::Utc>,
    );
    async fn write_host(
        &self,
        host_id: &str,
        metrics: &flotilla_protocol::HostMetrics,
        ts: chrono::DateTime<chrono::Utc>,
    );
}

pub fn extract_bearer(authorization: &str) -> Option<&str> {
    authorization.strip_prefix("Bearer ")
}
