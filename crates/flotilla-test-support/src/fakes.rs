//! In-memory `ContainerEngine`/`Compose` test doubles, the dispatcher-side
//! counterpart of the mock WebSocket peers below. Tests seed state with
//! the `seed_*`/`fail_*` helpers, exercise a handler, then assert with
//! `was_*`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use flotilla_dispatcher::compose::Compose;
use flotilla_dispatcher::engine::{
    ContainerEngine, CreateContainerParams, EngineContainer, EngineContainerDetail, EngineError,
    EngineImage, EngineNetwork, EngineStats, EngineVolume,
};
use flotilla_dispatcher::error::DispatchError;
use futures_util::stream::{self, BoxStream, StreamExt};

#[derive(Default)]
struct FakeState {
    containers: HashMap<String, EngineContainer>,
    images: HashMap<String, EngineImage>,
    networks: HashMap<String, EngineNetwork>,
    volumes: HashMap<String, EngineVolume>,
    stopped: HashSet<String>,
    removed_containers: HashSet<String>,
    removed_images: HashSet<String>,
    fail_stop: HashSet<String>,
    fail_remove_image_conflict: HashSet<String>,
    fail_remove_network_conflict: HashSet<String>,
    fail_remove_volume_conflict: HashSet<String>,
}

pub struct FakeContainerEngine {
    state: Mutex<FakeState>,
}

impl FakeContainerEngine {
    pub fn new() -> Self {
        Self { state: Mutex::new(FakeState::default()) }
    }

    pub fn seed_running_container(&self, id: &str, name: &str) {
        self.seed_running_container_with_image(id, name, "");
    }

    pub fn seed_running_container_with_image(&self, id: &str, name: &str, image: &str) {
        let mut state = self.state.lock().unwrap();
        state.containers.insert(
            id.to_string(),
            EngineContainer {
                id: id.to_string(),
                names: vec![name.to_string()],
                image: image.to_string(),
                state: "running".to_string(),
                status: "Up 2 minutes".to_string(),
                created: 0,
                labels: HashMap::new(),
                mounts: Vec::new(),
            },
        );
    }

    /// Records that `container_id` (already seeded) mounts the named volume.
    pub fn seed_container_mount(&self, container_id: &str, volume_name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.containers.get_mut(container_id) {
            c.mounts.push(volume_name.to_string());
        }
    }

    /// Records that `endpoint_id`/`container_name` is attached to the
    /// network, so a removal-conflict test can see it in `network.raw`.
    pub fn seed_network_endpoint(&self, network_id: &str, endpoint_id: &str, container_name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(n) = state.networks.get_mut(network_id) {
            n.raw
                .as_object_mut()
                .unwrap()
                .entry("Containers")
                .or_insert_with(|| serde_json::json!({}))
                .as_object_mut()
                .unwrap()
                .insert(endpoint_id.to_string(), serde_json::json!({ "Name": container_name }));
        }
    }

    pub fn seed_image(&self, id: &str, repo_tags: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.images.insert(
            id.to_string(),
            EngineImage {
                id: id.to_string(),
                repo_tags: repo_tags.iter().map(|s| s.to_string()).collect(),
                size: 0,
            },
        );
    }

    pub fn seed_network(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.networks.insert(
            id.to_string(),
            EngineNetwork {
                id: id.to_string(),
                name: id.to_string(),
                raw: serde_json::json!({ "id": id, "name": id }),
            },
        );
    }

    pub fn fail_stop(&self, id: &str) {
        self.state.lock().unwrap().fail_stop.insert(id.to_string());
    }

    pub fn fail_remove_image_with_conflict(&self, id: &str) {
        self.state.lock().unwrap().fail_remove_image_conflict.insert(id.to_string());
    }

    pub fn fail_remove_network_with_conflict(&self, id: &str) {
        self.state.lock().unwrap().fail_remove_network_conflict.insert(id.to_string());
    }

    pub fn fail_remove_volume_with_conflict(&self, name: &str) {
        self.state.lock().unwrap().fail_remove_volume_conflict.insert(name.to_string());
    }

    pub fn was_stopped(&self, id: &str) -> bool {
        self.state.lock().unwrap().stopped.contains(id)
    }

    pub fn was_removed(&self, id: &str) -> bool {
        self.state.lock().unwrap().removed_containers.contains(id)
    }
}

impl Default for FakeContainerEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerEngine for FakeContainerEngine {
    async fn list_containers(&self, _all: bool) -> Result<Vec<EngineContainer>, EngineError> {
        Ok(self.state.lock().unwrap().containers.values().cloned().collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<EngineContainerDetail, EngineError> {
        let state = self.state.lock().unwrap();
        let container = state
            .containers
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        Ok(EngineContainerDetail { container, pid: Some(1234) })
    }

    async fn create_container(&self, params: CreateContainerParams) -> Result<String, EngineError> {
        let id = format!("fake-{}", params.name.unwrap_or_else(|| "container".to_string()));
        let mut state = self.state.lock().unwrap();
        state.containers.insert(
            id.clone(),
            EngineContainer {
                id: id.clone(),
                names: vec![id.clone()],
                image: params.image,
                state: "created".to_string(),
                status: "Created".to_string(),
                created: 0,
                labels: params.labels,
                mounts: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.containers.get_mut(id) {
            c.state = "running".to_string();
        }
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_stop.contains(id) {
            return Err(EngineError::Other("stop failed".to_string()));
        }
        state.stopped.insert(id.to_string());
        if let Some(c) = state.containers.get_mut(id) {
            c.state = "exited".to_string();
        }
        Ok(())
    }

    async fn restart_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.containers.get_mut(id) {
            c.state = "running".to_string();
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str, _force: bool) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.containers.remove(id);
        state.removed_containers.insert(id.to_string());
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<EngineImage>, EngineError> {
        Ok(self.state.lock().unwrap().images.values().cloned().collect())
    }

    async fn remove_image(&self, id: &str, _force: bool) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_remove_image_conflict.contains(id) {
            return Err(EngineError::Conflict(format!("image '{id}' is in use")));
        }
        state.images.remove(id);
        state.removed_images.insert(id.to_string());
        Ok(())
    }

    async fn prune_dangling_images(&self) -> Result<Vec<String>, EngineError> {
        Ok(Vec::new())
    }

    async fn list_networks(&self) -> Result<Vec<EngineNetwork>, EngineError> {
        Ok(self.state.lock().unwrap().networks.values().cloned().collect())
    }

    async fn inspect_network(&self, id: &str) -> Result<EngineNetwork, EngineError> {
        self.state
            .lock()
            .unwrap()
            .networks
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    async fn remove_network(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_remove_network_conflict.contains(id) {
            return Err(EngineError::Conflict(format!("network '{id}' has active endpoints")));
        }
        state.networks.remove(id);
        Ok(())
    }

    async fn list_volumes(&self) -> Result<Vec<EngineVolume>, EngineError> {
        Ok(self.state.lock().unwrap().volumes.values().cloned().collect())
    }

    async fn inspect_volume(&self, name: &str) -> Result<EngineVolume, EngineError> {
        self.state
            .lock()
            .unwrap()
            .volumes
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(name.to_string()))
    }

    async fn remove_volume(&self, name: &str, _force: bool) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_remove_volume_conflict.contains(name) {
            return Err(EngineError::Conflict(format!("volume '{name}' is in use")));
        }
        state.volumes.remove(name);
        Ok(())
    }

    async fn container_logs(
        &self,
        _id: &str,
        _tail: Option<u32>,
        _since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Vec<u8>, EngineError> {
        Ok(Vec::new())
    }

    async fn stream_container_logs(
        &self,
        _id: &str,
    ) -> Result<BoxStream<'static, Result<Bytes, EngineError>>, EngineError> {
        Ok(stream::iter(Vec::<Result<Bytes, EngineError>>::new()).boxed())
    }

    async fn container_stats(&self, _id: &str) -> Result<EngineStats, EngineError> {
        Ok(EngineStats::default())
    }

    async fn docker_info(&self) -> Result<serde_json::Value, EngineError> {
        Ok(serde_json::json!({ "fake": true }))
    }
}

/// A `Compose` double that records every invocation instead of shelling
/// out, so stack-action handlers can be exercised without a real
/// compose binary on the test host.
pub struct FakeCompose {
    calls: Mutex<Vec<String>>,
    fail_next: Mutex<bool>,
}

impl FakeCompose {
    pub fn new() -> Self {
        Self { calls: Mutex::new(Vec::new()), fail_next: Mutex::new(false) }
    }

    pub fn fail_next_call(&self) {
        *self.fail_next.lock().unwrap() = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, op: &str, name: &str) -> Result<(), DispatchError> {
        self.calls.lock().unwrap().push(format!("{op}:{name}"));
        let mut fail = self.fail_next.lock().unwrap();
        if *fail {
            *fail = false;
            return Err(DispatchError::Compose(format!("{op} failed")));
        }
        Ok(())
    }
}

impl Default for FakeCompose {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Compose for FakeCompose {
    fn project_dir(&self, name: &str) -> PathBuf {
        PathBuf::from("/tmp/flotilla-fake-stacks").join(name)
    }

    async fn up(&self, _project_dir: &Path, name: &str) -> Result<(), DispatchError> {
        self.record("up", name)
    }

    async fn down(&self, _project_dir: &Path, name: &str) -> Result<(), DispatchError> {
        self.record("down", name)
    }

    async fn start(&self, _project_dir: &Path, name: &str) -> Result<(), DispatchError> {
        self.record("start", name)
    }

    async fn stop(&self, _project_dir: &Path, name: &str) -> Result<(), DispatchError> {
        self.record("stop", name)
    }

    async fn restart(&self, _project_dir: &Path, name: &str) -> Result<(), DispatchError> {
        self.record("restart", name)
    }
}
