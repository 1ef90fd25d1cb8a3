//! `MetricsCollector`: the agent-side periodic sampler (spec §4.3).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use flotilla_dispatcher::engine::{ContainerEngine, EngineStats};
use flotilla_protocol::{ContainerMetrics, HostMetrics, MetricsEnvelope};
use tokio::sync::Mutex;
use tokio::sync::mpsc::Sender;

use crate::cgroup::{parse_io_stat, resolve_cgroup_path, saturating_delta};
use crate::host::HostSampler;

const ZERO_INTERVALS_BEFORE_FALLBACK: u32 = 3;

#[derive(Debug, Clone, Default)]
struct PreviousSample {
    cpu_total_usage: u64,
    cpu_system_usage: u64,
    cumulative_read_bytes: u64,
    cumulative_write_bytes: u64,
    zero_blkio_intervals: u32,
    cgroup_fallback_active: bool,
}

pub struct MetricsCollector {
    engine: Arc<dyn ContainerEngine>,
    host_sampler: Option<HostSampler>,
    proc_root: PathBuf,
    cgroup_root: PathBuf,
    previous: Mutex<HashMap<String, PreviousSample>>,
    interval: Duration,
}

impl MetricsCollector {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        host_sampler: Option<HostSampler>,
        proc_root: PathBuf,
        cgroup_root: PathBuf,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            host_sampler,
            proc_root,
            cgroup_root,
            previous: Mutex::new(HashMap::new()),
            interval,
        }
    }

    /// Runs the sample loop forever: emits immediately, then on every
    /// tick. Non-blocking send — if the agent session isn't connected,
    /// the sample is dropped rather than buffered (spec §4.3).
    pub async fn run(&self, host_id: String, outbound: Sender<MetricsEnvelope>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            match self.sample_all(&host_id).await {
                Ok(envelope) => {
                    if outbound.try_send(envelope).is_err() {
                        tracing::debug!("metrics sample dropped, agent session not connected");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "metrics sample failed"),
            }
        }
    }

    pub async fn sample_all(&self, host_id: &str) -> Result<MetricsEnvelope, String> {
        let containers = self.engine.list_containers(false).await.map_err(|e| e.to_string())?;
        let mut container_metrics = Vec::with_capacity(containers.len());
        for c in containers {
            if let Ok(metrics) = self.sample_container(&c.id).await {
                container_metrics.push(metrics);
            }
        }
        let host = match &self.host_sampler {
            Some(sampler) => sampler.sample().await.unwrap_or_default(),
            None => HostMetrics {
                cpu_percent: 0.0,
                memory_used_bytes: 0.0,
                memory_total_bytes: 0.0,
                disk_used_bytes: None,
                disk_total_bytes: None,
            },
        };
        let _ = host_id;
        Ok(MetricsEnvelope { host, containers: container_metrics })
    }

    pub async fn sample_container(&self, container_id: &str) -> Result<ContainerMetrics, String> {
        let stats = self.engine.container_stats(container_id).await.map_err(|e| e.to_string())?;
        let mut previous = self.previous.lock().await;
        let prev = previous.entry(container_id.to_string()).or_default();

        let cpu_percent = cpu_percent(&stats, prev.cpu_total_usage, prev.cpu_system_usage);
        prev.cpu_total_usage = stats.cpu_total_usage;
        prev.cpu_system_usage = stats.cpu_system_usage;

        let memory_limit = if stats.memory_limit == 0 { stats.memory_usage } else { stats.memory_limit };

        let (read_bytes, write_bytes) = self.block_io(container_id, &stats, prev).await;

        Ok(ContainerMetrics {
            container_id: container_id.to_string(),
            cpu_percent,
            memory_usage_bytes: stats.memory_usage as f64,
            memory_limit_bytes: memory_limit as f64,
            network_rx_bytes: stats.network_rx as f64,
            network_tx_bytes: stats.network_tx as f64,
            block_read_bytes: read_bytes as f64,
            block_write_bytes: write_bytes as f64,
        })
    }

    async fn block_io(
        &self,
        container_id: &str,
        stats: &EngineStats,
        prev: &mut PreviousSample,
    ) -> (u64, u64) {
        let engine_reported = match (stats.blkio_read, stats.blkio_write) {
            (Some(r), Some(w)) if r > 0 || w > 0 => Some((r, w)),
            _ => None,
        };

        if let Some((read, write)) = engine_reported {
            if !prev.cgroup_fallback_active {
                prev.zero_blkio_intervals = 0;
                return (read, write);
            }
        } else {
            prev.zero_blkio_intervals += 1;
            if prev.zero_blkio_intervals >= ZERO_INTERVALS_BEFORE_FALLBACK && !prev.cgroup_fallback_active {
                prev.cgroup_fallback_active = true;
                tracing::info!("activating cgroup-v2 block I/O fallback");
            }
        }

        if !prev.cgroup_fallback_active {
            return (0, 0);
        }

        let Ok(detail) = self.engine.inspect_container(container_id).await else {
            return (0, 0);
        };
        let Some(pid) = detail.pid else { return (0, 0) };
        let Some(cgroup_path) = resolve_cgroup_path(&self.proc_root, &self.cgroup_root, pid) else {
            return (0, 0);
        };
        let Ok(io_stat) = std::fs::read_to_string(cgroup_path.join("io.stat")) else {
            return (0, 0);
        };
        let totals = parse_io_stat(&io_stat);
        let read_delta = saturating_delta(totals.read_bytes, prev.cumulative_read_bytes);
        let write_delta = saturating_delta(totals.write_bytes, prev.cumulative_write_bytes);
        prev.cumulative_read_bytes = totals.read_bytes;
        prev.cumulative_write_bytes = totals.write_bytes;
        (read_delta, write_delta)
    }
}

/// `(Δtotal_usage / Δsystem_usage) × online_cpus × 100`, clamped to
/// `[0, 100]`. On the first sample (no previous usage recorded) returns 0.
pub fn cpu_percent(stats: &EngineStats, prev_total: u64, prev_system: u64) -> f64 {
    if prev_total == 0 && prev_system == 0 {
        return 0.0;
    }
    let delta_total = stats.cpu_total_usage.saturating_sub(prev_total) as f64;
    let delta_system = stats.cpu_system_usage.saturating_sub(prev_system) as f64;
    if delta_system <= 0.0 {
        return 0.0;
    }
    let online_cpus = if stats.online_cpus > 0 {
        stats.online_cpus as f64
    } else if stats.per_cpu_usage_len > 0 {
        stats.per_cpu_usage_len as f64
    } else {
        1.0
    };
    ((delta_total / delta_system) * online_cpus * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(total: u64, system: u64, online_cpus: u64) -> EngineStats {
        EngineStats {
            cpu_total_usage: total,
            cpu_system_usage: system,
            online_cpus,
            ..Default::default()
        }
    }

    #[test]
    fn first_sample_is_zero() {
        assert_eq!(cpu_percent(&stats(100, 200, 2), 0, 0), 0.0);
    }

    #[test]
    fn computes_and_clamps_to_100() {
        // delta_total=200, delta_system=200, online_cpus=2 => 200% clamped to 100
        assert_eq!(cpu_percent(&stats(300, 400, 2), 100, 200), 100.0);
    }

    #[test]
    fn second_delta_after_clamp_scenario() {
        assert_eq!(cpu_percent(&stats(310, 500, 2), 300, 400), 20.0);
    }
}
