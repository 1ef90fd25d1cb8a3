//! Image action handlers (spec §4.2 "Images" group).

use flotilla_protocol::RemovalOutcome;

use crate::engine::ContainerEngine;
use crate::error::DispatchError;
use crate::removal::{classify_removal, find_containers_referencing_image, image_blockers};

pub async fn list_images(engine: &dyn ContainerEngine) -> Result<serde_json::Value, DispatchError> {
    let images = engine.list_images().await.map_err(|e| DispatchError::Engine(e.to_string()))?;
    let payload: Vec<_> = images
        .into_iter()
        .map(|i| serde_json::json!({ "id": i.id, "repo_tags": i.repo_tags, "size": i.size }))
        .collect();
    Ok(serde_json::json!({ "images": payload }))
}

pub async fn remove_images(
    engine: &dyn ContainerEngine,
    params: flotilla_protocol::RemoveIdsParams,
) -> Result<serde_json::Value, DispatchError> {
    let mut removed = Vec::new();
    let mut conflicts = Vec::new();
    let mut errors = Vec::new();

    for target in &params.ids {
        let all_tags = engine
            .list_images()
            .await
            .map_err(|e| DispatchError::Engine(e.to_string()))?
            .into_iter()
            .find(|i| i.repo_tags.iter().any(|t| t == target))
            .map(|i| i.repo_tags)
            .unwrap_or_default();
        let containers = find_containers_referencing_image(engine, target)
            .await
            .map_err(|e| DispatchError::Engine(e.to_string()))?;
        let blockers = image_blockers(target, &all_tags, &containers);

        let result = engine.remove_image(target, params.force).await;
        match classify_removal("image", target, target, result, true, blockers) {
            RemovalOutcome::Removed { id } => removed.push(id),
            RemovalOutcome::Conflict(c) => conflicts.push(c),
            RemovalOutcome::Error(e) => errors.push(e),
        }
    }

    Ok(serde_json::json!({ "removed": removed, "conflicts": conflicts, "errors": errors }))
}

pub async fn prune_dangling_images(engine: &dyn ContainerEngine) -> Result<serde_json::Value, DispatchError> {
    let deleted = engine
        .prune_dangling_images()
        .await
        .map_err(|e| DispatchError::Engine(e.to_string()))?;
    Ok(serde_json::json!({ "deleted": deleted }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_test_support::fakes::FakeContainerEngine;

    #[tokio::test]
    async fn remove_images_conflict_reports_blockers_and_reason() {
        let engine = FakeContainerEngine::new();
        engine.seed_image("repo:tag", &["repo:tag", "repo:alt"]);
        engine.seed_running_container_with_image("ctrX", "ctrX", "repo:tag");
        engine.fail_remove_image_with_conflict("repo:tag");

        let result = remove_images(
            &engine,
            flotilla_protocol::RemoveIdsParams { ids: vec!["repo:tag".into()], force: false },
        )
        .await
        .unwrap();

        assert_eq!(result["removed"].as_array().unwrap().len(), 0);
        let conflicts = result["conflicts"].as_array().unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0]["resource_name"], "repo:tag");
        assert_eq!(conflicts[0]["force_supported"], true);
        let blockers = conflicts[0]["blockers"].as_array().unwrap();
        assert_eq!(blockers.len(), 2);
    }
}
