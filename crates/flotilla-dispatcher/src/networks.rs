//! Network action handlers (spec §4.2 "Networks" group).

use std::sync::Arc;

use flotilla_protocol::RemovalOutcome;
use futures_util::future::join_all;
use tokio::sync::Semaphore;

use crate::engine::ContainerEngine;
use crate::error::DispatchError;
use crate::removal::{classify_removal, network_blockers};

pub async fn list_networks(engine: &dyn ContainerEngine) -> Result<serde_json::Value, DispatchError> {
    let networks = engine.list_networks().await.map_err(|e| DispatchError::Engine(e.to_string()))?;
    let payload: Vec<_> = networks
        .into_iter()
        .map(|n| serde_json::json!({ "id": n.id, "name": n.name }))
        .collect();
    Ok(serde_json::json!({ "networks": payload }))
}

/// Runs one inspect per id concurrently, bounded by `pool_size` (default
/// 4). Each element is either the normalized payload or `{id, error}`;
/// the overall response stays `success` as long as the batch is well-formed.
pub async fn inspect_networks(
    engine: Arc<dyn ContainerEngine>,
    params: flotilla_protocol::InspectIdsParams,
    pool_size: usize,
) -> Result<serde_json::Value, DispatchError> {
    let semaphore = Arc::new(Semaphore::new(pool_size.max(1)));
    let tasks = params.ids.into_iter().map(|id| {
        let engine = engine.clone();
        let semaphore = semaphore.clone();
        async move {
            let _permit = semaphore.acquire().await.expect("semaphore never closed");
            match engine.inspect_network(&id).await {
                Ok(n) => n.raw,
                Err(e) => serde_json::json!({ "id": id, "error": e.to_string() }),
            }
        }
    });
    let results = join_all(tasks).await;
    Ok(serde_json::json!({ "networks": results }))
}

/// Reads a bollard network's serialized `"Containers"` map into (endpoint
/// id, container name) pairs. Missing or malformed shapes just mean no
/// known blockers, not an error — the removal attempt below is still the
/// authority on whether the network is actually in use.
fn attached_endpoints(raw: &serde_json::Value) -> Vec<(String, String)> {
    raw.get("Containers")
        .and_then(|v| v.as_object())
        .map(|containers| {
            containers
                .iter()
                .map(|(endpoint_id, endpoint)| {
                    let name = endpoint
                        .get("Name")
                        .and_then(|v| v.as_str())
                        .unwrap_or(endpoint_id)
                        .to_string();
                    (endpoint_id.clone(), name)
                })
                .collect()
        })
        .unwrap_or_default()
}

pub async fn remove_networks(
    engine: &dyn ContainerEngine,
    params: flotilla_protocol::RemoveIdsParams,
) -> Result<serde_json::Value, DispatchError> {
    let mut removed = Vec::new();
    let mut conflicts = Vec::new();
    let mut errors = Vec::new();

    for id in &params.ids {
        // A network that's already gone, or one the inspect call otherwise
        // fails to reach, just reports no known blockers; `remove_network`
        // below is still what actually decides the outcome.
        let endpoints = match engine.inspect_network(id).await {
            Ok(network) => attached_endpoints(&network.raw),
            Err(_) => Vec::new(),
        };
        let result = engine.remove_network(id).await;
        // Networks do not support a forced removal path on the engine.
        let blockers = network_blockers(&endpoints);
        match classify_removal("network", id, id, result, false, blockers) {
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
    async fn inspect_networks_runs_bounded_and_reports_per_item_errors() {
        let fake = FakeContainerEngine::new();
        fake.seed_network("net1");
        let engine: Arc<dyn ContainerEngine> = Arc::new(fake);
        let params = flotilla_protocol::InspectIdsParams {
            ids: vec!["net1".into(), "missing".into()],
        };
        let result = inspect_networks(engine, params, 4).await.unwrap();
        let networks = result["networks"].as_array().unwrap();
        assert_eq!(networks.len(), 2);
    }

    #[tokio::test]
    async fn remove_networks_reports_attached_endpoints_as_blockers() {
        let fake = FakeContainerEngine::new();
        fake.seed_network("net1");
        fake.seed_network_endpoint("net1", "ep1", "web-1");
        fake.fail_remove_network_with_conflict("net1");
        let params = flotilla_protocol::RemoveIdsParams { ids: vec!["net1".into()], force: false };
        let result = remove_networks(&fake, params).await.unwrap();
        let conflicts = result["conflicts"].as_array().unwrap();
        assert_eq!(conflicts.len(), 1);
        let blockers = conflicts[0]["blockers"].as_array().unwrap();
        assert_eq!(blockers.len(), 1);
        assert_eq!(blockers[0]["name"], "web-1");
        assert_eq!(conflicts[0]["reason"], "1 endpoint(s) are still attached to the network");
    }

    #[tokio::test]
    async fn attached_endpoints_reads_the_containers_map() {
        let raw = serde_json::json!({
            "Containers": {
                "ep1": { "Name": "web-1" },
                "ep2": { "Name": "web-2" },
            }
        });
        let mut endpoints = attached_endpoints(&raw);
        endpoints.sort();
        assert_eq!(
            endpoints,
            vec![("ep1".to_string(), "web-1".to_string()), ("ep2".to_string(), "web-2".to_string())]
        );
    }

    #[test]
    fn attached_endpoints_is_empty_for_missing_or_malformed_shapes() {
        assert!(attached_endpoints(&serde_json::json!({})).is_empty());
        assert!(attached_endpoints(&serde_json::json!({ "Containers": "not an object" })).is_empty());
    }
}
