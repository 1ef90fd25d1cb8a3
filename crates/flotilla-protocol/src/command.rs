//! Typed parameter structs for each `command` action (spec §4.2).
//!
//! These are decoded out of a [`crate::CommandView::params`] value by the
//! action handler that owns them; the router itself stays untyped.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListContainersParams {
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContainerIdParams {
    pub container_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoveContainerParams {
    pub container_id: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateContainerParams {
    pub image: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub ports: HashMap<String, String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoveIdsParams {
    pub ids: Vec<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InspectIdsParams {
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContainerLogsParams {
    pub container_id: String,
    #[serde(default)]
    pub tail: Option<u32>,
    #[serde(default)]
    pub since: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StackNameParams {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeployStackParams {
    pub name: String,
    pub compose_yaml: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StackContainerActionParams {
    pub name: String,
    pub container_id: String,
    pub action: String,
}

/// The full set of supported action names (spec §4.2), grouped the way
/// the dispatcher's modules are.
pub mod actions {
    pub const LIST_CONTAINERS: &str = "list_containers";
    pub const GET_CONTAINER: &str = "get_container";
    pub const CREATE_CONTAINER: &str = "create_container";
    pub const START_CONTAINER: &str = "start_container";
    pub const STOP_CONTAINER: &str = "stop_container";
    pub const RESTART_CONTAINER: &str = "restart_container";
    pub const REMOVE_CONTAINER: &str = "remove_container";

    pub const LIST_IMAGES: &str = "list_images";
    pub const REMOVE_IMAGES: &str = "remove_images";
    pub const PRUNE_DANGLING_IMAGES: &str = "prune_dangling_images";

    pub const LIST_NETWORKS: &str = "list_networks";
    pub const INSPECT_NETWORKS: &str = "inspect_networks";
    pub const REMOVE_NETWORKS: &str = "remove_networks";

    pub const LIST_VOLUMES: &str = "list_volumes";
    pub const INSPECT_VOLUMES: &str = "inspect_volumes";
    pub const REMOVE_VOLUMES: &str = "remove_volumes";

    pub const GET_CONTAINER_LOGS: &str = "get_container_logs";
    pub const STREAM_CONTAINER_LOGS: &str = "stream_container_logs";
    pub const GET_CONTAINER_STATS: &str = "get_container_stats";

    pub const DEPLOY_STACK: &str = "deploy_stack";
    pub const UPDATE_STACK: &str = "update_stack";
    pub const REMOVE_STACK: &str = "remove_stack";
    pub const START_STACK: &str = "start_stack";
    pub const STOP_STACK: &str = "stop_stack";
    pub const RESTART_STACK: &str = "restart_stack";
    pub const IMPORT_STACK: &str = "import_stack";
    pub const LIST_STACKS: &str = "list_stacks";
    pub const GET_STACK: &str = "get_stack";
    pub const GET_STACK_CONTAINERS: &str = "get_stack_containers";
    pub const STACK_CONTAINER_ACTION: &str = "stack_container_action";

    pub const GET_DOCKER_INFO: &str = "get_docker_info";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_container_defaults_force_to_false() {
        let params: RemoveContainerParams =
            serde_json::from_value(serde_json::json!({"container_id": "abc"})).unwrap();
        assert!(!params.force);
    }

    #[test]
    fn list_containers_defaults_all_to_false() {
        let params: ListContainersParams = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(!params.all);
    }
}
