//! Agent configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides
//! except `FLOTILLA_AGENT_API_KEY`, which is required (it is a secret and
//! does not belong in a file checked into version control).
//!
//! Default config path: `/etc/flotilla/agent.toml`.
//!
//! # Required fields
//! - `server.base_url`
//! - the `FLOTILLA_AGENT_API_KEY` environment variable

use serde::Deserialize;
use std::path::Path;

// ---------------------------------------------------------------------------
// Config types (validated, ready to use)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub api_key: String,
    pub host_id: Option<String>,
    pub display_name: Option<String>,
    pub server: ServerConfig,
    pub identity: IdentityConfig,
    pub metrics: MetricsConfig,
    pub docker: DockerConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub base_url: String,
    pub agent_ws_path: String,
}

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub state_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct DockerConfig {
    pub stacks_root: String,
    pub compose_binary: String,
    pub inspect_pool_size: usize,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (all fields optional, validated after parse)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    host_id: Option<String>,
    display_name: Option<String>,
    server: Option<RawServerConfig>,
    identity: Option<RawIdentityConfig>,
    metrics: Option<RawMetricsConfig>,
    docker: Option<RawDockerConfig>,
}

#[derive(Debug, Deserialize)]
struct RawServerConfig {
    base_url: Option<String>,
    agent_ws_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawIdentityConfig {
    state_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMetricsConfig {
    interval_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawDockerConfig {
    stacks_root: Option<String>,
    compose_binary: Option<String>,
    inspect_pool_size: Option<usize>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn load_config() -> Result<AgentConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/flotilla/agent.toml"))
}

pub fn load_config_from_path(path: &Path) -> Result<AgentConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

pub fn load_config_from_str(toml_str: &str) -> Result<AgentConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let api_key = std::env::var("FLOTILLA_AGENT_API_KEY")
        .map_err(|_| ConfigError::MissingField("FLOTILLA_AGENT_API_KEY".to_owned()))?;

    let raw_server = raw
        .server
        .ok_or_else(|| ConfigError::MissingField("server".to_owned()))?;
    let base_url = raw_server
        .base_url
        .ok_or_else(|| ConfigError::MissingField("server.base_url".to_owned()))?;
    let agent_ws_path = raw_server.agent_ws_path.unwrap_or_else(|| "/ws/agent".to_owned());

    let identity = match raw.identity {
        Some(i) => IdentityConfig { state_dir: i.state_dir },
        None => IdentityConfig { state_dir: None },
    };

    let metrics = match raw.metrics {
        Some(m) => MetricsConfig { interval_seconds: m.interval_seconds.unwrap_or(10) },
        None => MetricsConfig { interval_seconds: 10 },
    };

    let docker = match raw.docker {
        Some(d) => DockerConfig {
            stacks_root: d.stacks_root.unwrap_or_else(|| "/var/lib/flotilla/stacks".to_owned()),
            compose_binary: d.compose_binary.unwrap_or_else(|| "docker".to_owned()),
            inspect_pool_size: d.inspect_pool_size.unwrap_or(4),
        },
        None => DockerConfig {
            stacks_root: "/var/lib/flotilla/stacks".to_owned(),
            compose_binary: "docker".to_owned(),
            inspect_pool_size: 4,
        },
    };

    Ok(AgentConfig {
        api_key,
        host_id: raw.host_id,
        display_name: raw.display_name,
        server: ServerConfig { base_url, agent_ws_path },
        identity,
        metrics,
        docker,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("missing required field: {0}")]
    MissingField(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_server_is_an_error() {
        unsafe { std::env::set_var("FLOTILLA_AGENT_API_KEY", "k") };
        let err = load_config_from_str("").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "server"));
    }

    #[test]
    fn defaults_fill_in_optional_sections() {
        unsafe { std::env::set_var("FLOTILLA_AGENT_API_KEY", "k") };
        let cfg = load_config_from_str(
            r#"
            [server]
            base_url = "wss://example.test"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.agent_ws_path, "/ws/agent");
        assert_eq!(cfg.metrics.interval_seconds, 10);
        assert_eq!(cfg.docker.compose_binary, "docker");
    }

    #[test]
    fn explicit_values_override_defaults() {
        unsafe { std::env::set_var("FLOTILLA_AGENT_API_KEY", "k") };
        let cfg = load_config_from_str(
            r#"
            host_id = "host-1"
            display_name = "Rack 3"

            [server]
            base_url = "wss://example.test"
            agent_ws_path = "/ws/agent/v2"

            [metrics]
            interval_seconds = 5

            [docker]
            compose_binary = "docker-compose"
            inspect_pool_size = 8
            "#,
        )
        .unwrap();
        assert_eq!(cfg.host_id.as_deref(), Some("host-1"));
        assert_eq!(cfg.server.agent_ws_path, "/ws/agent/v2");
        assert_eq!(cfg.metrics.interval_seconds, 5);
        assert_eq!(cfg.docker.inspect_pool_size, 8);
    }
}
