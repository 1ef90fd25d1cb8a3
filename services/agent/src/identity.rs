//! Agent identity record (spec §6): `{agent_id}` persisted as JSON so a
//! reconnecting agent reclaims its previous host instead of registering a
//! fresh identity every restart.
//!
//! Preferred path: `/var/lib/flotilla/agent-id`. Falls back to
//! `${HOME}/.flotilla/agent-id` when the preferred directory isn't
//! writable (e.g. running unprivileged in development). Created with
//! mode 0600 (parent directory 0750) on first run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdentityRecord {
    agent_id: String,
}

const PREFERRED_PATH: &str = "/var/lib/flotilla/agent-id";

/// Loads the persisted agent ID, creating a new random one on first run.
/// `state_dir_override` lets config/tests pin an explicit directory instead
/// of the preferred/fallback pair.
pub fn load_or_create(state_dir_override: Option<&str>) -> std::io::Result<String> {
    let path = resolve_path(state_dir_override);
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    match std::fs::read_to_string(&path) {
        Ok(contents) => {
            let record: IdentityRecord = serde_json::from_str(&contents).map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, format!("corrupt identity record: {e}"))
            })?;
            Ok(record.agent_id)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let agent_id = Uuid::new_v4().to_string();
            write_record(&path, &agent_id)?;
            Ok(agent_id)
        }
        Err(e) => Err(e),
    }
}

fn resolve_path(state_dir_override: Option<&str>) -> PathBuf {
    if let Some(dir) = state_dir_override {
        return PathBuf::from(dir).join("agent-id");
    }

    let preferred = PathBuf::from(PREFERRED_PATH);
    if preferred.parent().is_some_and(|p| writable_dir(p)) {
        return preferred;
    }

    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".flotilla").join("agent-id")
}

fn writable_dir(dir: &Path) -> bool {
    if dir.exists() {
        std::fs::metadata(dir).map(|m| !m.permissions().readonly()).unwrap_or(false)
    } else {
        // Parent of the preferred path may not exist yet; only treat it as
        // usable if we can actually create it.
        std::fs::create_dir_all(dir).is_ok()
    }
}

fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    set_permissions(dir, 0o750)
}

fn write_record(path: &Path, agent_id: &str) -> std::io::Result<()> {
    let record = IdentityRecord { agent_id: agent_id.to_owned() };
    let contents = serde_json::to_string(&record).expect("identity record always serializes");
    std::fs::write(path, contents)?;
    set_permissions(path, 0o600)
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_and_reuses_identity() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().to_str().unwrap();

        let first = load_or_create(Some(state_dir)).unwrap();
        let second = load_or_create(Some(state_dir)).unwrap();
        assert_eq!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn rejects_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("agent-id"), "not json").unwrap();
        let err = load_or_create(Some(dir.path().to_str().unwrap())).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
