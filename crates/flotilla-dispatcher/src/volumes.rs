//! Volume action handlers (spec §4.2 "Volumes" group).

use std::sync::Arc;

use flotilla_protocol::RemovalOutcome;
use futures_util::future::join_all;
use tokio::sync::Semaphore;

use crate::engine::ContainerEngine;
use crate::error::DispatchError;
use crate::removal::{classify_removal, volume_blockers};

pub async fn list_volumes(engine: &dyn ContainerEngine) -> Result<serde_json::Value, DispatchError> {
    let volumes = engine.list_volumes().await.map_err(|e| DispatchError::Engine(e.to_string()))?;
    let payload: Vec<_> = volumes.into_iter().map(|v| serde_json::json!({ "name": v.name })).collect();
    Ok(serde_json::json!({ "volumes": payload }))
}

pub async fn inspect_volumes(
    engine: Arc<dyn ContainerEngine>,
    params: flotilla_protocol::InspectIdsParams,
    pool_size: usize,
) -> Result<serde_json::Value, DispatchError> {
    let semaphore = Arc::new(Semaphore::new(pool_size.max(1)));
    let tasks = params.ids.into_iter().map(|name| {
        let engine = engine.clone();
        let semaphore = semaphore.clone();
        async move {
            let _permit = semaphore.acquire().await.expect("semaphore never closed");
            match engine.inspect_volume(&name).await {
                Ok(v) => v.raw,
                Err(e) => serde_json::json!({ "id": name, "error": e.to_string() }),
            }
        }
    });
    let results = join_all(tasks).await;
    Ok(serde_json::json!({ "volumes": results }))
}

pub async fn remove_volumes(
    engine: &dyn ContainerEngine,
    params: flotilla_protocol::RemoveIdsParams,
) -> Result<serde_json::Value, DispatchError> {
    let mut removed = Vec::new();
    let mut conflicts = Vec::new();
    let mut errors = Vec::new();

    for name in &params.ids {
        let containers = engine
            .list_containers(true)
            .await
            .map_err(|e| DispatchError::Engine(e.to_string()))?;
        let using = containers
            .into_iter()
            .filter(|c| c.mounts.iter().any(|m| m == name))
            .collect::<Vec<_>>();
        let blockers = volume_blockers(name, &using);
        let result = engine.remove_volume(name, params.force).await;
        match classify_removal("volume", name, name, result, true, blockers) {
            RemovalOutcome::Removed { id } => removed.push(id),
            RemovalOutcome::Conflict(c) => conflicts.push(c),
            RemovalOutcome::Error(e) => errors.push(e),
        }
    }

    Ok(serde_json::json!({ "removed": removed, "conflicts": conflicts, "errors": errors }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_test_support::fakes::FakeContainerEngine;

    #[tokio::test]
    async fn remove_volumes_reports_mounting_containers_as_blockers() {
        let fake = FakeContainerEngine::new();
        fake.seed_running_container("c1", "web-1");
        fake.seed_container_mount("c1", "data");
        fake.fail_remove_volume_with_conflict("data");
        let params = flotilla_protocol::RemoveIdsParams { ids: vec!["data".into()], force: false };
        let result = remove_volumes(&fake, params).await.unwrap();
        let conflicts = result["conflicts"].as_array().unwrap();
        assert_eq!(conflicts.len(), 1);
        let blockers = conflicts[0]["blockers"].as_array().unwrap();
        assert_eq!(blockers.len(), 1);
        assert_eq!(blockers[0]["name"], "web-1");
    }

    #[tokio::test]
    async fn remove_volumes_reports_no_blockers_when_nothing_mounts_it() {
        let fake = FakeContainerEngine::new();
        fake.seed_running_container("c1", "web-1");
        fake.fail_remove_volume_with_conflict("data");
        let params = flotilla_protocol::RemoveIdsParams { ids: vec!["data".into()], force: false };
        let result = remove_volumes(&fake, params).await.unwrap();
        let conflicts = result["conflicts"].as_array().unwrap();
        assert_eq!(conflicts[0]["blockers"].as_array().unwrap().len(), 0);
    }
}
