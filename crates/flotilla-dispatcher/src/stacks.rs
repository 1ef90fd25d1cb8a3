//! Stack action handlers (spec §4.2 "Stacks" group).
//!
//! Stacks are backed by compose YAML written under a per-host working
//! directory. A deploy/update writes `docker-compose.yml` into the
//! stack's project directory (creating it if absent) with managed
//! labels injected, then invokes the compose orchestrator.

use std::path::Path;

use tokio::fs;

use crate::compose::{Compose, inject_stack_labels, validate_stack_name};
use crate::engine::ContainerEngine;
use crate::error::DispatchError;

const COMPOSE_FILE_NAME: &str = "docker-compose.yml";

async fn write_compose_file(project_dir: &Path, compose_yaml: &str) -> Result<(), DispatchError> {
    fs::create_dir_all(project_dir)
        .await
        .map_err(|e| DispatchError::Compose(e.to_string()))?;
    fs::write(project_dir.join(COMPOSE_FILE_NAME), compose_yaml)
        .await
        .map_err(|e| DispatchError::Compose(e.to_string()))
}

pub async fn deploy_stack(
    compose: &dyn Compose,
    params: flotilla_protocol::DeployStackParams,
) -> Result<serde_json::Value, DispatchError> {
    let name = validate_stack_name(&params.name)?.to_string();
    let labeled = inject_stack_labels(&params.compose_yaml, &name)?;
    let project_dir = compose.project_dir(&name);
    write_compose_file(&project_dir, &labeled).await?;
    compose.up(&project_dir, &name).await?;
    Ok(serde_json::json!({ "name": name, "status": "deployed" }))
}

pub async fn update_stack(
    compose: &dyn Compose,
    params: flotilla_protocol::DeployStackParams,
) -> Result<serde_json::Value, DispatchError> {
    deploy_stack(compose, params).await
}

pub async fn remove_stack(
    compose: &dyn Compose,
    params: flotilla_protocol::StackNameParams,
) -> Result<serde_json::Value, DispatchError> {
    let name = validate_stack_name(&params.name)?.to_string();
    let project_dir = compose.project_dir(&name);
    compose.down(&project_dir, &name).await?;
    Ok(serde_json::json!({ "name": name, "status": "removed" }))
}

pub async fn start_stack(
    compose: &dyn Compose,
    params: flotilla_protocol::StackNameParams,
) -> Result<serde_json::Value, DispatchError> {
    let name = validate_stack_name(&params.name)?.to_string();
    let project_dir = compose.project_dir(&name);
    compose.start(&project_dir, &name).await?;
    Ok(serde_json::json!({ "name": name, "status": "running" }))
}

pub async fn stop_stack(
    compose: &dyn Compose,
    params: flotilla_protocol::StackNameParams,
) -> Result<serde_json::Value, DispatchError> {
    let name = validate_stack_name(&params.name)?.to_string();
    let project_dir = compose.project_dir(&name);
    compose.stop(&project_dir, &name).await?;
    Ok(serde_json::json!({ "name": name, "status": "stopped" }))
}

pub async fn restart_stack(
    compose: &dyn Compose,
    params: flotilla_protocol::StackNameParams,
) -> Result<serde_json::Value, DispatchError> {
    let name = validate_stack_name(&params.name)?.to_string();
    let project_dir = compose.project_dir(&name);
    compose.restart(&project_dir, &name).await?;
    Ok(serde_json::json!({ "name": name, "status": "running" }))
}

pub async fn import_stack(
    compose: &dyn Compose,
    params: flotilla_protocol::DeployStackParams,
) -> Result<serde_json::Value, DispatchError> {
    deploy_stack(compose, params).await
}

pub async fn list_stacks(stacks_root: &Path) -> Result<serde_json::Value, DispatchError> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(stacks_root)
        .await
        .map_err(|e| DispatchError::Compose(e.to_string()))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DispatchError::Compose(e.to_string()))?
    {
        if entry.path().join(COMPOSE_FILE_NAME).exists() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    Ok(serde_json::json!({ "stacks": names }))
}

pub async fn get_stack(
    stacks_root: &Path,
    params: flotilla_protocol::StackNameParams,
) -> Result<serde_json::Value, DispatchError> {
    let name = validate_stack_name(&params.name)?.to_string();
    let compose_path = stacks_root.join(&name).join(COMPOSE_FILE_NAME);
    let yaml = fs::read_to_string(&compose_path)
        .await
        .map_err(|e| DispatchError::Compose(e.to_string()))?;
    Ok(serde_json::json!({ "name": name, "compose_yaml": yaml }))
}

pub async fn get_stack_containers(
    engine: &dyn ContainerEngine,
    params: flotilla_protocol::StackNameParams,
) -> Result<serde_json::Value, DispatchError> {
    let name = validate_stack_name(&params.name)?.to_string();
    let containers = engine
        .list_containers(true)
        .await
        .map_err(|e| DispatchError::Engine(e.to_string()))?
        .into_iter()
        .filter(|c| c.labels.get("stack.name").map(|s| s == &name).unwrap_or(false))
        .map(|c| serde_json::json!({ "id": c.id, "names": c.names }))
        .collect::<Vec<_>>();
    Ok(serde_json::json!({ "name": name, "containers": containers }))
}

pub async fn stack_container_action(
    engine: &dyn ContainerEngine,
    params: flotilla_protocol::StackContainerActionParams,
) -> Result<serde_json::Value, DispatchError> {
    validate_stack_name(&params.name)?;
    match params.action.as_str() {
        "start" => engine.start_container(&params.container_id).await,
        "stop" => engine.stop_container(&params.container_id).await,
        "restart" => engine.restart_container(&params.container_id).await,
        other => return Err(DispatchError::InvalidParams(format!("unknown stack container action '{other}'"))),
    }
    .map_err(|e| DispatchError::Engine(e.to_string()))?;
    Ok(serde_json::json!({ "container_id": params.container_id, "action": params.action }))
}

