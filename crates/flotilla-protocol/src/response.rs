//! Typed result shapes shared by the dispatcher and server-side consumers.
//!
//! These are not wire envelopes themselves — they are the `data` payload of
//! a `response` envelope for a given action, kept here so both ends of the
//! session agree on field names without re-deriving them from JSON.

use serde::{Deserialize, Serialize};

/// The closed set of container states the dispatcher normalizes engine
/// status strings into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizedStatus {
    Running,
    Stopped,
    Paused,
    Restarting,
    Exited,
    Error,
}

impl NormalizedStatus {
    /// Maps an engine-reported state/status pair to the closed set.
    ///
    /// `Up …` => running, `Exited …` => stopped, `dead` => error,
    /// `created` => stopped, anything else => stopped.
    pub fn normalize(state: &str, status: &str) -> Self {
        let state = state.to_ascii_lowercase();
        let status = status.to_ascii_lowercase();
        if state == "dead" {
            return NormalizedStatus::Error;
        }
        if state == "paused" {
            return NormalizedStatus::Paused;
        }
        if state == "restarting" {
            return NormalizedStatus::Restarting;
        }
        if state == "running" || status.starts_with("up ") {
            return NormalizedStatus::Running;
        }
        if status.starts_with("exited") {
            return NormalizedStatus::Stopped;
        }
        if state == "created" {
            return NormalizedStatus::Stopped;
        }
        NormalizedStatus::Stopped
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: NormalizedStatus,
    pub state: String,
    pub created: i64,
    #[serde(default)]
    pub labels: std::collections::HashMap<String, String>,
}

/// One of the three outcomes a `remove_{images,networks,volumes}` action
/// can produce for a given target id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalOutcome {
    Removed { id: String },
    Conflict(ResourceRemovalConflict),
    Error(ResourceRemovalError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockerKind {
    ImageTag,
    Container,
    ContainerMount,
    ContainerAttachment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovalBlocker {
    pub kind: BlockerKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRemovalConflict {
    pub resource_type: String,
    pub resource_id: String,
    pub resource_name: String,
    pub reason: String,
    pub blockers: Vec<RemovalBlocker>,
    pub force_supported: bool,
    pub engine_error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRemovalError {
    pub resource_type: String,
    pub resource_name: String,
    pub message: String,
}

/// Response element for a batched inspect (networks/volumes): either the
/// normalized payload or a per-item error, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InspectOutcome {
    Ok(serde_json::Value),
    Err { id: String, error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackSummary {
    pub name: String,
    pub services: Vec<String>,
    pub status: String,
    pub deployed_timestamp: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_maps_up_status_to_running() {
        assert_eq!(
            NormalizedStatus::normalize("running", "Up 2 minutes"),
            NormalizedStatus::Running
        );
    }

    #[test]
    fn normalize_maps_exited_status_to_stopped() {
        assert_eq!(
            NormalizedStatus::normalize("exited", "Exited (0) 3 hours ago"),
            NormalizedStatus::Stopped
        );
    }

    #[test]
    fn normalize_maps_dead_state_to_error() {
        assert_eq!(NormalizedStatus::normalize("dead", ""), NormalizedStatus::Error);
    }

    #[test]
    fn normalize_maps_created_state_to_stopped() {
        assert_eq!(
            NormalizedStatus::normalize("created", "Created"),
            NormalizedStatus::Stopped
        );
    }

    #[test]
    fn normalize_defaults_unknown_to_stopped() {
        assert_eq!(
            NormalizedStatus::normalize("whatever", "whatever"),
            NormalizedStatus::Stopped
        );
    }
}
