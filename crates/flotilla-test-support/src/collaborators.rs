//! In-memory stand-ins for the server's `AuthService`/`HostRegistry`/
//! `TimeseriesSink` collaborators, for exercising `server`'s hub without
//! a real Postgres/JWT/TSDB client — the same role `FakeContainerEngine`
//! plays for the agent's dispatcher.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use server::auth::{
    AccessClaims, ApiKeyClaims, AuthError, AuthService, HostMetadata, HostRegistry, HostStatus, TimeseriesSink,
};

/// Maps api keys to an optional bound host id, and access tokens to a
/// subject name. Both maps start empty: an unregistered key is rejected,
/// not silently accepted, so tests can exercise the `AuthError::Invalid`
/// path deliberately.
pub struct InMemoryAuthService {
    api_keys: Mutex<HashMap<String, Option<String>>>,
    access_tokens: Mutex<HashMap<String, String>>,
}

impl InMemoryAuthService {
    pub fn new() -> Self {
        Self { api_keys: Mutex::new(HashMap::new()), access_tokens: Mutex::new(HashMap::new()) }
    }

    pub fn register_api_key(&self, key: impl Into<String>, bound_host_id: Option<String>) {
        self.api_keys.lock().unwrap().insert(key.into(), bound_host_id);
    }

    pub fn register_access_token(&self, token: impl Into<String>, subject: impl Into<String>) {
        self.access_tokens.lock().unwrap().insert(token.into(), subject.into());
    }
}

impl Default for InMemoryAuthService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthService for InMemoryAuthService {
    async fn validate_api_key(&self, key: &str) -> Result<ApiKeyClaims, AuthError> {
        self.api_keys
            .lock()
            .unwrap()
            .get(key)
            .map(|host_id| ApiKeyClaims { host_id: host_id.clone() })
            .ok_or(AuthError::Invalid)
    }

    async fn parse_access_token(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.access_tokens
            .lock()
            .unwrap()
            .get(token)
            .map(|subject| AccessClaims { subject: subject.clone() })
            .ok_or(AuthError::Invalid)
    }
}

#[derive(Debug, Clone)]
pub struct HostRecord {
    pub metadata: Option<HostMetadata>,
    pub status: Option<HostStatus>,
}

/// Records every upsert/status-change it sees, so tests can assert on
/// the sequence a session produced.
pub struct InMemoryHostRegistry {
    hosts: Mutex<HashMap<String, HostRecord>>,
}

impl InMemoryHostRegistry {
    pub fn new() -> Self {
        Self { hosts: Mutex::new(HashMap::new()) }
    }

    pub fn get(&self, host_id: &str) -> Option<HostRecord> {
        self.hosts.lock().unwrap().get(host_id).cloned()
    }
}

impl Default for InMemoryHostRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostRegistry for InMemoryHostRegistry {
    async fn upsert(&self, host_id: &str, metadata: HostMetadata) {
        let mut hosts = self.hosts.lock().unwrap();
        let entry = hosts.entry(host_id.to_string()).or_insert(HostRecord { metadata: None, status: None });
        entry.metadata = Some(metadata);
    }

    async fn set_status(&self, host_id: &str, status: HostStatus) {
        let mut hosts = self.hosts.lock().unwrap();
        let entry = hosts.entry(host_id.to_string()).or_insert(HostRecord { metadata: None, status: None });
        entry.status = Some(status);
    }
}

/// A `TimeseriesSink` that records every write instead of shipping it
/// anywhere, and reports itself enabled so the write paths actually run
/// in tests.
pub struct InMemoryTimeseriesSink {
    container_writes: Mutex<Vec<(String, String)>>,
    host_writes: Mutex<Vec<String>>,
}

impl InMemoryTimeseriesSink {
    pub fn new() -> Self {
        Self { container_writes: Mutex::new(Vec::new()), host_writes: Mutex::new(Vec::new()) }
    }

    pub fn container_write_count(&self) -> usize {
        self.container_writes.lock().unwrap().len()
    }

    pub fn host_write_count(&self) -> usize {
        self.host_writes.lock().unwrap().len()
    }
}

impl Default for InMemoryTimeseriesSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TimeseriesSink for InMemoryTimeseriesSink {
    fn enabled(&self) -> bool {
        true
    }

    async fn write_container(
        &self,
        host_id: &str,
        metrics: &flotilla_protocol::ContainerMetrics,
        _ts: chrono::DateTime<chrono::Utc>,
    ) {
        self.container_writes.lock().unwrap().push((host_id.to_string(), metrics.container_id.clone()));
    }

    async fn write_host(&self, host_id: &str, _metrics: &flotilla_protocol::HostMetrics, _ts: chrono::DateTime<chrono::Utc>) {
        self.host_writes.lock().unwrap().push(host_id.to_string());
    }
}
