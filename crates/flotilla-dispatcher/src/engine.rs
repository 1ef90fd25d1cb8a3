//! The container engine collaborator (spec §6): list/inspect/create/
//! start/stop/restart/remove for containers, list/inspect/remove for
//! images/networks/volumes, prune, logs, stats, info.
//!
//! `ContainerEngine` is the seam the dispatcher's action handlers are
//! written against; `BollardEngine` is the only implementation in the
//! pack's ecosystem (`bollard` is the Docker API client used elsewhere in
//! this codebase's sibling projects for talking to the daemon socket).

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, ListContainersOptions,
    LogsOptions, RemoveContainerOptions, RestartContainerOptions, StartContainerOptions,
    StatsOptions, StopContainerOptions,
};
use bollard::image::{ListImagesOptions, PruneImagesOptions, RemoveImageOptions};
use bollard::network::{InspectNetworkOptions, ListNetworksOptions};
use bollard::volume::{ListVolumesOptions, RemoveVolumeOptions};
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};

use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct EngineContainer {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub state: String,
    pub status: String,
    pub created: i64,
    pub labels: HashMap<String, String>,
    /// Names of the named volumes this container mounts (bind mounts have
    /// no name and are omitted); source for volume removal-conflict checks.
    pub mounts: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EngineContainerDetail {
    pub container: EngineContainer,
    pub pid: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct EngineImage {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub size: i64,
}

#[derive(Debug, Clone)]
pub struct EngineNetwork {
    pub id: String,
    pub name: String,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct EngineVolume {
    pub name: String,
    pub raw: serde_json::Value,
}

/// Raw stats needed by the metrics collector, kept here (not in
/// `flotilla-metrics`) because only the engine knows how to ask the daemon
/// for them.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub cpu_total_usage: u64,
    pub cpu_system_usage: u64,
    pub online_cpus: u64,
    pub per_cpu_usage_len: u64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub blkio_read: Option<u64>,
    pub blkio_write: Option<u64>,
    pub network_rx: u64,
    pub network_tx: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CreateContainerParams {
    pub name: Option<String>,
    pub image: String,
    pub env: Vec<String>,
    pub ports: HashMap<String, String>,
    pub labels: HashMap<String, String>,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn list_containers(&self, all: bool) -> Result<Vec<EngineContainer>, EngineError>;
    async fn inspect_container(&self, id: &str) -> Result<EngineContainerDetail, EngineError>;
    async fn create_container(&self, params: CreateContainerParams) -> Result<String, EngineError>;
    async fn start_container(&self, id: &str) -> Result<(), EngineError>;
    async fn stop_container(&self, id: &str) -> Result<(), EngineError>;
    async fn restart_container(&self, id: &str) -> Result<(), EngineError>;
    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError>;

    async fn list_images(&self) -> Result<Vec<EngineImage>, EngineError>;
    async fn remove_image(&self, id: &str, force: bool) -> Result<(), EngineError>;
    async fn prune_dangling_images(&self) -> Result<Vec<String>, EngineError>;

    async fn list_networks(&self) -> Result<Vec<EngineNetwork>, EngineError>;
    async fn inspect_network(&self, id: &str) -> Result<EngineNetwork, EngineError>;
    async fn remove_network(&self, id: &str) -> Result<(), EngineError>;

    async fn list_volumes(&self) -> Result<Vec<EngineVolume>, EngineError>;
    async fn inspect_volume(&self, name: &str) -> Result<EngineVolume, EngineError>;
    async fn remove_volume(&self, name: &str, force: bool) -> Result<(), EngineError>;

    async fn container_logs(
        &self,
        id: &str,
        tail: Option<u32>,
        since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Vec<u8>, EngineError>;

    /// Returns the raw multiplexed byte stream for `stream_container_logs`;
    /// the caller (logs.rs) is responsible for demultiplexing frames.
    async fn stream_container_logs(
        &self,
        id: &str,
    ) -> Result<BoxStream<'static, Result<Bytes, EngineError>>, EngineError>;

    async fn container_stats(&self, id: &str) -> Result<EngineStats, EngineError>;

    async fn docker_info(&self) -> Result<serde_json::Value, EngineError>;
}

pub struct BollardEngine {
    docker: Docker,
}

impl BollardEngine {
    pub fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| EngineError::Other(e.to_string()))?;
        Ok(Self { docker })
    }
}

fn classify(err: bollard::errors::Error) -> EngineError {
    let msg = err.to_string();
    if msg.contains("404") || msg.to_ascii_lowercase().contains("no such") {
        EngineError::NotFound(msg)
    } else if msg.contains("409") || msg.to_ascii_lowercase().contains("conflict") {
        EngineError::Conflict(msg)
    } else {
        EngineError::Other(msg)
    }
}

#[async_trait]
impl ContainerEngine for BollardEngine {
    async fn list_containers(&self, all: bool) -> Result<Vec<EngineContainer>, EngineError> {
        let options = ListContainersOptions::<String> {
            all,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(classify)?;
        Ok(containers
            .into_iter()
            .map(|c| EngineContainer {
                id: c.id.unwrap_or_default(),
                names: c.names.unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                state: c.state.unwrap_or_default(),
                status: c.status.unwrap_or_default(),
                created: c.created.unwrap_or_default(),
                labels: c.labels.unwrap_or_default(),
                mounts: c.mounts.unwrap_or_default().into_iter().filter_map(|m| m.name).collect(),
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<EngineContainerDetail, EngineError> {
        let detail = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(classify)?;
        let state = detail.state.clone().unwrap_or_default();
        let config = detail.config.clone().unwrap_or_default();
        let mounts = detail.mounts.clone().unwrap_or_default().into_iter().filter_map(|m| m.name).collect();
        Ok(EngineContainerDetail {
            container: EngineContainer {
                id: detail.id.unwrap_or_default(),
                names: detail.name.into_iter().collect(),
                image: config.image.unwrap_or_default(),
                state: state.status.map(|s| format!("{s:?}").to_ascii_lowercase()).unwrap_or_default(),
                status: String::new(),
                created: 0,
                labels: config.labels.unwrap_or_default(),
                mounts,
            },
            pid: state.pid,
        })
    }

    async fn create_container(&self, params: CreateContainerParams) -> Result<String, EngineError> {
        let options = params.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });
        let config = ContainerConfig {
            image: Some(params.image),
            env: Some(params.env),
            labels: Some(params.labels),
            ..Default::default()
        };
        let response = self
            .docker
            .create_container(options, config)
            .await
            .map_err(classify)?;
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(classify)
    }

    async fn stop_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .stop_container(id, None::<StopContainerOptions>)
            .await
            .map_err(classify)
    }

    async fn restart_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .restart_container(id, None::<RestartContainerOptions>)
            .await
            .map_err(classify)
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError> {
        self.docker
            .remove_container(id, Some(RemoveContainerOptions { force, ..Default::default() }))
            .await
            .map_err(classify)
    }

    async fn list_images(&self) -> Result<Vec<EngineImage>, EngineError> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String> { all: true, ..Default::default() }))
            .await
            .map_err(classify)?;
        Ok(images
            .into_iter()
            .map(|i| EngineImage {
                id: i.id,
                repo_tags: i.repo_tags,
                size: i.size,
            })
            .collect())
    }

    async fn remove_image(&self, id: &str, force: bool) -> Result<(), EngineError> {
        self.docker
            .remove_image(id, Some(RemoveImageOptions { force, ..Default::default() }), None)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn prune_dangling_images(&self) -> Result<Vec<String>, EngineError> {
        let mut filters = HashMap::new();
        filters.insert("dangling".to_string(), vec!["true".to_string()]);
        let result = self
            .docker
            .prune_images(Some(PruneImagesOptions { filters }))
            .await
            .map_err(classify)?;
        Ok(result
            .images_deleted
            .unwrap_or_default()
            .into_iter()
            .filter_map(|d| d.deleted.or(d.untagged))
            .collect())
    }

    async fn list_networks(&self) -> Result<Vec<EngineNetwork>, EngineError> {
        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions<String>>)
            .await
            .map_err(classify)?;
        Ok(networks
            .into_iter()
            .map(|n| EngineNetwork {
                id: n.id.clone().unwrap_or_default(),
                name: n.name.clone().unwrap_or_default(),
                raw: serde_json::to_value(&n).unwrap_or_default(),
            })
            .collect())
    }

    async fn inspect_network(&self, id: &str) -> Result<EngineNetwork, EngineError> {
        let n = self
            .docker
            .inspect_network(id, None::<InspectNetworkOptions<String>>)
            .await
            .map_err(classify)?;
        Ok(EngineNetwork {
            id: n.id.clone().unwrap_or_default(),
            name: n.name.clone().unwrap_or_default(),
            raw: serde_json::to_value(&n).unwrap_or_default(),
        })
    }

    async fn remove_network(&self, id: &str) -> Result<(), EngineError> {
        self.docker.remove_network(id).await.map_err(classify)
    }

    async fn list_volumes(&self) -> Result<Vec<EngineVolume>, EngineError> {
        let resp = self
            .docker
            .list_volumes(None::<ListVolumesOptions<String>>)
            .await
            .map_err(classify)?;
        Ok(resp
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| EngineVolume {
                name: v.name.clone(),
                raw: serde_json::to_value(&v).unwrap_or_default(),
            })
            .collect())
    }

    async fn inspect_volume(&self, name: &str) -> Result<EngineVolume, EngineError> {
        let v = self.docker.inspect_volume(name).await.map_err(classify)?;
        Ok(EngineVolume {
            name: v.name.clone(),
            raw: serde_json::to_value(&v).unwrap_or_default(),
        })
    }

    async fn remove_volume(&self, name: &str, force: bool) -> Result<(), EngineError> {
        self.docker
            .remove_volume(name, Some(RemoveVolumeOptions { force }))
            .await
            .map_err(classify)
    }

    async fn container_logs(
        &self,
        id: &str,
        tail: Option<u32>,
        since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Vec<u8>, EngineError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.map(|t| t.to_string()).unwrap_or_else(|| "all".into()),
            since: since.map(|t| t.timestamp()).unwrap_or(0),
            timestamps: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(id, Some(options));
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(classify)?;
            out.extend_from_slice(&chunk.into_bytes());
        }
        Ok(out)
    }

    async fn stream_container_logs(
        &self,
        id: &str,
    ) -> Result<BoxStream<'static, Result<Bytes, EngineError>>, EngineError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            timestamps: true,
            tail: "0".into(),
            ..Default::default()
        };
        let stream = self
            .docker
            .logs(id, Some(options))
            .map_ok(|chunk| chunk.into_bytes())
            .map_err(classify);
        Ok(Box::pin(stream))
    }

    async fn container_stats(&self, id: &str) -> Result<EngineStats, EngineError> {
        let options = StatsOptions { stream: false, one_shot: true };
        let mut stream = self.docker.stats(id, Some(options));
        let stats = stream
            .next()
            .await
            .ok_or_else(|| EngineError::Other("no stats sample available".into()))?
            .map_err(classify)?;

        let cpu_total_usage = stats.cpu_stats.cpu_usage.total_usage;
        let cpu_system_usage = stats.cpu_stats.system_cpu_usage.unwrap_or(0);
        let per_cpu_len = stats
            .cpu_stats
            .cpu_usage
            .percpu_usage
            .as_ref()
            .map(|v| v.len() as u64)
            .unwrap_or(0);
        let online_cpus = stats.cpu_stats.online_cpus.unwrap_or(0);

        let memory_usage = stats.memory_stats.usage.unwrap_or(0);
        let memory_limit = stats.memory_stats.limit.unwrap_or(0);

        let (blkio_read, blkio_write) = stats
            .blkio_stats
            .io_service_bytes_recursive
            .as_ref()
            .map(|entries| {
                let read = entries
                    .iter()
                    .filter(|e| e.op.eq_ignore_ascii_case("read"))
                    .map(|e| e.value)
                    .sum();
                let write = entries
                    .iter()
                    .filter(|e| e.op.eq_ignore_ascii_case("write"))
                    .map(|e| e.value)
                    .sum();
                (Some(read), Some(write))
            })
            .unwrap_or((None, None));

        let (network_rx, network_tx) = stats
            .networks
            .as_ref()
            .map(|nets| {
                let rx = nets.values().map(|n| n.rx_bytes).sum();
                let tx = nets.values().map(|n| n.tx_bytes).sum();
                (rx, tx)
            })
            .unwrap_or((0, 0));

        Ok(EngineStats {
            cpu_total_usage,
            cpu_system_usage,
            online_cpus,
            per_cpu_usage_len: per_cpu_len,
            memory_usage,
            memory_limit,
            blkio_read,
            blkio_write,
            network_rx,
            network_tx,
        })
    }

    async fn docker_info(&self) -> Result<serde_json::Value, EngineError> {
        let info = self.docker.info().await.map_err(classify)?;
        serde_json::to_value(info).map_err(|e| EngineError::Other(e.to_string()))
    }
}
