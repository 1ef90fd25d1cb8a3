//! Container action handlers (spec §4.2 "Container" group).

use flotilla_protocol::{ContainerSummary, NormalizedStatus};

use crate::engine::{ContainerEngine, CreateContainerParams as EngineCreateParams};
use crate::error::{DispatchError, EngineError};

fn to_summary(c: crate::engine::EngineContainer) -> ContainerSummary {
    let status = NormalizedStatus::normalize(&c.state, &c.status);
    ContainerSummary {
        name: c
            .names
            .first()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| c.id.clone()),
        id: c.id,
        image: c.image,
        status,
        state: c.state,
        created: c.created,
        labels: c.labels,
    }
}

pub async fn list_containers(
    engine: &dyn ContainerEngine,
    params: flotilla_protocol::ListContainersParams,
) -> Result<serde_json::Value, DispatchError> {
    let containers = engine
        .list_containers(params.all)
        .await
        .map_err(|e| DispatchError::Engine(e.to_string()))?;
    let summaries: Vec<ContainerSummary> = containers.into_iter().map(to_summary).collect();
    Ok(serde_json::json!({ "containers": summaries }))
}

pub async fn get_container(
    engine: &dyn ContainerEngine,
    params: flotilla_protocol::ContainerIdParams,
) -> Result<serde_json::Value, DispatchError> {
    let detail = engine
        .inspect_container(&params.container_id)
        .await
        .map_err(|e| DispatchError::Engine(e.to_string()))?;
    Ok(serde_json::json!({ "container": to_summary(detail.container), "pid": detail.pid }))
}

pub async fn create_container(
    engine: &dyn ContainerEngine,
    params: flotilla_protocol::CreateContainerParams,
) -> Result<serde_json::Value, DispatchError> {
    if params.image.trim().is_empty() {
        return Err(DispatchError::InvalidParams("'image' must not be empty".into()));
    }
    let id = engine
        .create_container(EngineCreateParams {
            name: params.name,
            image: params.image,
            env: params.env,
            ports: params.ports,
            labels: params.labels,
        })
        .await
        .map_err(|e| DispatchError::Engine(e.to_string()))?;
    Ok(serde_json::json!({ "container_id": id }))
}

pub async fn start_container(
    engine: &dyn ContainerEngine,
    params: flotilla_protocol::ContainerIdParams,
) -> Result<serde_json::Value, DispatchError> {
    engine
        .start_container(&params.container_id)
        .await
        .map_err(|e| DispatchError::Engine(e.to_string()))?;
    Ok(serde_json::json!({ "container_id": params.container_id }))
}

pub async fn stop_container(
    engine: &dyn ContainerEngine,
    params: flotilla_protocol::ContainerIdParams,
) -> Result<serde_json::Value, DispatchError> {
    engine
        .stop_container(&params.container_id)
        .await
        .map_err(|e| DispatchError::Engine(e.to_string()))?;
    Ok(serde_json::json!({ "container_id": params.container_id }))
}

pub async fn restart_container(
    engine: &dyn ContainerEngine,
    params: flotilla_protocol::ContainerIdParams,
) -> Result<serde_json::Value, DispatchError> {
    engine
        .restart_container(&params.container_id)
        .await
        .map_err(|e| DispatchError::Engine(e.to_string()))?;
    Ok(serde_json::json!({ "container_id": params.container_id }))
}

/// Non-forced removal of a running container first issues a graceful
/// stop; if the stop itself fails, removal is upgraded to forced and the
/// upgrade is logged (spec §4.2).
pub async fn remove_container(
    engine: &dyn ContainerEngine,
    params: flotilla_protocol::RemoveContainerParams,
) -> Result<serde_json::Value, DispatchError> {
    let mut force = params.force;
    if !force {
        let detail = engine
            .inspect_container(&params.container_id)
            .await
            .map_err(|e| DispatchError::Engine(e.to_string()))?;
        if detail.container.state.eq_ignore_ascii_case("running") {
            if let Err(e) = engine.stop_container(&params.container_id).await {
                tracing::warn!(
                    container_id = %params.container_id,
                    error = %e,
                    "graceful stop failed before removal, upgrading to forced removal"
                );
                force = true;
            }
        }
    }
    match engine.remove_container(&params.container_id, force).await {
        Ok(()) => Ok(serde_json::json!({ "container_id": params.container_id, "forced": force })),
        Err(EngineError::Conflict(msg)) => Err(DispatchError::Engine(format!("conflict: {msg}"))),
        Err(e) => Err(DispatchError::Engine(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_test_support::fakes::FakeContainerEngine;

    #[tokio::test]
    async fn remove_running_container_without_force_stops_first() {
        let engine = FakeContainerEngine::new();
        engine.seed_running_container("cid", "web");
        let params = flotilla_protocol::RemoveContainerParams {
            container_id: "cid".into(),
            force: false,
        };
        let result = remove_container(&engine, params).await.unwrap();
        assert_eq!(result["forced"], false);
        assert!(engine.was_stopped("cid"));
        assert!(engine.was_removed("cid"));
    }

    #[tokio::test]
    async fn remove_running_container_upgrades_to_force_if_stop_fails() {
        let engine = FakeContainerEngine::new();
        engine.seed_running_container("cid", "web");
        engine.fail_stop("cid");
        let params = flotilla_protocol::RemoveContainerParams {
            container_id: "cid".into(),
            force: false,
        };
        let result = remove_container(&engine, params).await.unwrap();
        assert_eq!(result["forced"], true);
    }

    #[tokio::test]
    async fn list_containers_normalizes_status() {
        let engine = FakeContainerEngine::new();
        engine.seed_running_container("abc123456789", "/web");
        let result = list_containers(&engine, flotilla_protocol::ListContainersParams { all: true })
            .await
            .unwrap();
        let containers = result["containers"].as_array().unwrap();
        assert_eq!(containers[0]["id"], "abc123456789");
        assert_eq!(containers[0]["name"], "web");
        assert_eq!(containers[0]["status"], "running");
    }
}
