//! Shared removal-conflict / blocker-enumeration logic used by the
//! images/networks/volumes handlers (spec §4.2 "Removal conflict model").

use flotilla_protocol::{BlockerKind, RemovalBlocker, RemovalOutcome, ResourceRemovalConflict, ResourceRemovalError};

use crate::engine::{ContainerEngine, EngineContainer};
use crate::error::EngineError;

/// Enumerates other tags of the same image plus containers whose image
/// reference matches, for an image removal conflict.
pub fn image_blockers(
    target: &str,
    all_images_with_tag: &[String],
    containers: &[EngineContainer],
) -> Vec<RemovalBlocker> {
    let mut blockers = Vec::new();
    for tag in all_images_with_tag {
        if tag != target {
            blockers.push(RemovalBlocker {
                kind: BlockerKind::ImageTag,
                id: None,
                name: Some(tag.clone()),
                stack: None,
                details: None,
            });
        }
    }
    for c in containers.iter().filter(|c| c.image == target) {
        blockers.push(RemovalBlocker {
            kind: BlockerKind::Container,
            id: Some(c.id.clone()),
            name: c.names.first().cloned(),
            stack: c.labels.get("stack.name").cloned(),
            details: None,
        });
    }
    blockers
}

/// Enumerates containers whose mounts reference the given volume name.
pub fn volume_blockers(volume_name: &str, containers_using_volume: &[EngineContainer]) -> Vec<RemovalBlocker> {
    containers_using_volume
        .iter()
        .map(|c| RemovalBlocker {
            kind: BlockerKind::ContainerMount,
            id: Some(c.id.clone()),
            name: c.names.first().cloned(),
            stack: c.labels.get("stack.name").cloned(),
            details: Some(format!("mounts volume '{volume_name}'")),
        })
        .collect()
}

/// Enumerates endpoints currently attached to the given network.
pub fn network_blockers(endpoints: &[(String, String)]) -> Vec<RemovalBlocker> {
    endpoints
        .iter()
        .map(|(id, name)| RemovalBlocker {
            kind: BlockerKind::ContainerAttachment,
            id: Some(id.clone()),
            name: Some(name.clone()),
            stack: None,
            details: None,
        })
        .collect()
}

pub fn conflict_reason(resource_type: &str, blockers: &[RemovalBlocker]) -> String {
    let tag_count = blockers.iter().filter(|b| b.kind == BlockerKind::ImageTag).count();
    let container_count = blockers
        .iter()
        .filter(|b| matches!(b.kind, BlockerKind::Container | BlockerKind::ContainerMount | BlockerKind::ContainerAttachment))
        .count();
    match resource_type {
        "image" => format!(
            "{tag_count} tag(s) still reference the image; {container_count} container(s) currently use the image"
        ),
        "volume" => format!("{container_count} container(s) currently mount the volume"),
        "network" => format!("{container_count} endpoint(s) are still attached to the network"),
        other => format!("{other} is still in use"),
    }
}

/// Converts one engine removal attempt into the three-way outcome
/// (success / conflict / error) the response payload reports.
pub fn classify_removal(
    resource_type: &str,
    resource_id: &str,
    resource_name: &str,
    result: Result<(), EngineError>,
    force_supported: bool,
    blockers: Vec<RemovalBlocker>,
) -> RemovalOutcome {
    match result {
        Ok(()) => RemovalOutcome::Removed { id: resource_id.to_string() },
        Err(EngineError::Conflict(engine_error)) => RemovalOutcome::Conflict(ResourceRemovalConflict {
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            resource_name: resource_name.to_string(),
            reason: conflict_reason(resource_type, &blockers),
            blockers,
            force_supported,
            engine_error,
        }),
        Err(other) => RemovalOutcome::Error(ResourceRemovalError {
            resource_type: resource_type.to_string(),
            resource_name: resource_name.to_string(),
            message: other.to_string(),
        }),
    }
}

pub async fn find_containers_referencing_image(
    engine: &dyn ContainerEngine,
    image: &str,
) -> Result<Vec<EngineContainer>, EngineError> {
    let containers = engine.list_containers(true).await?;
    Ok(containers.into_iter().filter(|c| c.image == image).collect())
}
