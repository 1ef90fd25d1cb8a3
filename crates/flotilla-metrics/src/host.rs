//! Optional host CPU/memory/disk sampling (spec §4.3). Gated either by
//! explicit config or by autodetection of `/proc/stat`, `/proc/meminfo`
//! and the configured disk root.

use std::path::PathBuf;
use std::time::Duration;

use flotilla_protocol::HostMetrics;

pub struct HostSampler {
    proc_root: PathBuf,
    disk_root: Option<PathBuf>,
}

impl HostSampler {
    pub fn new(proc_root: PathBuf, disk_root: Option<PathBuf>) -> Self {
        Self { proc_root, disk_root }
    }

    /// Probes whether `/proc/stat` and `/proc/meminfo` exist under
    /// `proc_root`; logs once and returns a sampler if so, `None`
    /// otherwise (no host metrics are sent if the host can't be read).
    pub fn autodetect(proc_root: PathBuf, disk_root: Option<PathBuf>) -> Option<Self> {
        let stat_present = proc_root.join("stat").exists();
        let meminfo_present = proc_root.join("meminfo").exists();
        if stat_present && meminfo_present {
            tracing::info!("host metrics autodetected and enabled");
            Some(Self::new(proc_root, disk_root))
        } else {
            None
        }
    }

    pub async fn sample(&self) -> Option<HostMetrics> {
        let cpu_percent = self.sample_cpu_percent().await.unwrap_or(0.0);
        let (memory_used_bytes, memory_total_bytes) = self.sample_memory().unwrap_or((0.0, 0.0));
        let (disk_used_bytes, disk_total_bytes) = self
            .disk_root
            .as_ref()
            .and_then(|root| sample_disk(root))
            .map(|(u, t)| (Some(u), Some(t)))
            .unwrap_or((None, None));
        Some(HostMetrics {
            cpu_percent,
            memory_used_bytes,
            memory_total_bytes,
            disk_used_bytes,
            disk_total_bytes,
        })
    }

    async fn sample_cpu_percent(&self) -> Option<f64> {
        let first = read_proc_stat_totals(&self.proc_root)?;
        tokio::time::sleep(Duration::from_secs(1)).await;
        let second = read_proc_stat_totals(&self.proc_root)?;
        let total_delta = second.total.saturating_sub(first.total);
        let idle_delta = second.idle.saturating_sub(first.idle);
        if total_delta == 0 {
            return Some(0.0);
        }
        let busy = total_delta.saturating_sub(idle_delta) as f64;
        Some((busy / total_delta as f64 * 100.0).clamp(0.0, 100.0))
    }

    fn sample_memory(&self) -> Option<(f64, f64)> {
        let contents = std::fs::read_to_string(self.proc_root.join("meminfo")).ok()?;
        let mut total_kb = 0u64;
        let mut available_kb = 0u64;
        for line in contents.lines() {
            if let Some(v) = line.strip_prefix("MemTotal:") {
                total_kb = parse_kb(v);
            } else if let Some(v) = line.strip_prefix("MemAvailable:") {
                available_kb = parse_kb(v);
            }
        }
        if total_kb == 0 {
            return None;
        }
        let used_kb = total_kb.saturating_sub(available_kb);
        Some((used_kb as f64 * 1024.0, total_kb as f64 * 1024.0))
    }
}

fn parse_kb(field: &str) -> u64 {
    field
        .trim()
        .split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

struct ProcStatTotals {
    total: u64,
    idle: u64,
}

fn read_proc_stat_totals(proc_root: &std::path::Path) -> Option<ProcStatTotals> {
    let contents = std::fs::read_to_string(proc_root.join("stat")).ok()?;
    let line = contents.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|f| f.parse().ok())
        .collect();
    if fields.len() < 4 {
        return None;
    }
    let idle = fields[3];
    let total: u64 = fields.iter().sum();
    Some(ProcStatTotals { total, idle })
}

/// Picks the mounted filesystem whose mount point is the longest prefix
/// of `root` (the usual way to resolve a path to its containing
/// filesystem when no direct statvfs binding is used) and reports its
/// used/total bytes.
fn sample_disk(root: &std::path::Path) -> Option<(f64, f64)> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .filter(|d| root.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())?;
    let total = disk.total_space() as f64;
    let used = total - disk.available_space() as f64;
    Some((used, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn autodetect_returns_none_when_proc_files_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(HostSampler::autodetect(dir.path().to_path_buf(), None).is_none());
    }

    #[test]
    fn autodetect_returns_some_when_proc_files_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stat"), "cpu 1 2 3 4\n").unwrap();
        std::fs::write(dir.path().join("meminfo"), "MemTotal: 1000 kB\nMemAvailable: 400 kB\n").unwrap();
        assert!(HostSampler::autodetect(dir.path().to_path_buf(), None).is_some());
    }

    #[test]
    fn sample_memory_computes_used_from_total_minus_available() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("meminfo"), "MemTotal: 1000 kB\nMemAvailable: 400 kB\n").unwrap();
        let sampler = HostSampler::new(dir.path().to_path_buf(), None);
        let (used, total) = sampler.sample_memory().unwrap();
        assert_eq!(total, 1000.0 * 1024.0);
        assert_eq!(used, 600.0 * 1024.0);
    }
}
