//! Pure cgroup-v2 parsing helpers, the fallback path for block I/O
//! accounting when the engine's own `blkio.io_service_bytes_recursive`
//! is empty or stuck at zero (spec §4.3).

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlkioTotals {
    pub read_bytes: u64,
    pub write_bytes: u64,
}

/// Reads `/proc/<pid>/cgroup` and returns the unified-hierarchy path
/// (the line whose controller id field is `0`), joined onto `cgroup_root`.
pub fn resolve_cgroup_path(proc_root: &Path, cgroup_root: &Path, pid: i64) -> Option<PathBuf> {
    let contents = std::fs::read_to_string(proc_root.join(pid.to_string()).join("cgroup")).ok()?;
    parse_cgroup_file(&contents).map(|relative| {
        let trimmed = relative.trim_start_matches('/');
        cgroup_root.join(trimmed)
    })
}

/// Parses the contents of a `/proc/<pid>/cgroup` file and returns the
/// path portion of the line whose controller-id field is `0` (unified
/// hierarchy in a cgroup v2 system).
fn parse_cgroup_file(contents: &str) -> Option<String> {
    for line in contents.lines() {
        let mut parts = line.splitn(3, ':');
        let id = parts.next()?;
        let _controllers = parts.next()?;
        let path = parts.next()?;
        if id == "0" {
            return Some(path.to_string());
        }
    }
    None
}

/// Parses an `io.stat` file, summing `rbytes=`/`wbytes=` across every
/// device line present.
pub fn parse_io_stat(contents: &str) -> BlkioTotals {
    let mut totals = BlkioTotals::default();
    for line in contents.lines() {
        for field in line.split_whitespace() {
            if let Some(value) = field.strip_prefix("rbytes=") {
                totals.read_bytes += value.parse::<u64>().unwrap_or(0);
            } else if let Some(value) = field.strip_prefix("wbytes=") {
                totals.write_bytes += value.parse::<u64>().unwrap_or(0);
            }
        }
    }
    totals
}

/// Computes a wrap-around-safe delta: clamps to 0 instead of underflowing
/// when the current cumulative total is smaller than the previous one
/// (counter reset, container restart).
pub fn saturating_delta(current: u64, previous: u64) -> u64 {
    current.saturating_sub(previous)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cgroup_file_picks_controller_zero_line() {
        let contents = "12:memory:/system.slice\n0::/system.slice/docker-abc.scope\n";
        assert_eq!(
            parse_cgroup_file(contents).as_deref(),
            Some("/system.slice/docker-abc.scope")
        );
    }

    #[test]
    fn parse_cgroup_file_returns_none_when_no_unified_line() {
        let contents = "12:memory:/system.slice\n";
        assert_eq!(parse_cgroup_file(contents), None);
    }

    #[test]
    fn parse_io_stat_sums_across_devices() {
        let contents = "8:0 rbytes=100 wbytes=50 rios=1 wios=1\n8:16 rbytes=25 wbytes=10 rios=1 wios=1\n";
        let totals = parse_io_stat(contents);
        assert_eq!(totals.read_bytes, 125);
        assert_eq!(totals.write_bytes, 60);
    }

    #[test]
    fn saturating_delta_clamps_on_counter_reset() {
        assert_eq!(saturating_delta(10, 50), 0);
        assert_eq!(saturating_delta(50, 10), 40);
    }

    #[test]
    fn resolve_cgroup_path_joins_onto_root() {
        let dir = tempfile::tempdir().unwrap();
        let pid_dir = dir.path().join("123");
        std::fs::create_dir_all(&pid_dir).unwrap();
        std::fs::write(pid_dir.join("cgroup"), "0::/docker/containerabc\n").unwrap();

        let cgroup_root = dir.path().join("sys-fs-cgroup");
        let resolved = resolve_cgroup_path(dir.path(), &cgroup_root, 123).unwrap();
        assert_eq!(resolved, cgroup_root.join("docker/containerabc"));
    }
}
