//! System action handlers (spec §4.2 "System" group).

use crate::engine::ContainerEngine;
use crate::error::DispatchError;

pub async fn get_docker_info(engine: &dyn ContainerEngine) -> Result<serde_json::Value, DispatchError> {
    engine.docker_info().await.map_err(|e| DispatchError::Engine(e.to_string()))
}
