//! The compose orchestrator collaborator: deploy/update/remove/start/
//! stop/restart a stack backed by a compose YAML file on disk.
//!
//! `CliCompose` shells out to the host's `docker` binary, preferring the
//! v2 plugin subcommand (`docker compose ...`) and falling back to the
//! standalone v1 binary (`docker-compose ...`) on failure, per
//! REDESIGN FLAGS.

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::DispatchError;

#[async_trait]
pub trait Compose: Send + Sync {
    /// The on-disk directory a given stack's compose file lives under.
    fn project_dir(&self, name: &str) -> PathBuf;
    async fn up(&self, project_dir: &Path, name: &str) -> Result<(), DispatchError>;
    async fn down(&self, project_dir: &Path, name: &str) -> Result<(), DispatchError>;
    async fn start(&self, project_dir: &Path, name: &str) -> Result<(), DispatchError>;
    async fn stop(&self, project_dir: &Path, name: &str) -> Result<(), DispatchError>;
    async fn restart(&self, project_dir: &Path, name: &str) -> Result<(), DispatchError>;
}

pub struct CliCompose {
    /// Root directory under which each stack gets its own subdirectory
    /// named after the (sanitized) stack name.
    pub stacks_root: PathBuf,
    /// Binary used for the v2 fallback path (usually `docker`, invoked as
    /// `docker compose ...`); v1 falls back to `docker-compose`.
    pub compose_binary: String,
}

impl CliCompose {
    pub fn new(stacks_root: PathBuf) -> Self {
        Self {
            stacks_root,
            compose_binary: "docker".to_string(),
        }
    }

    async fn run(&self, project_dir: &Path, name: &str, args: &[&str]) -> Result<(), DispatchError> {
        let v2 = self.invoke_v2(project_dir, name, args).await;
        let v2_output = match v2 {
            Ok(output) if output.status.success() => return Ok(()),
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(stack = %name, error = %e, "compose v2 invocation failed to start");
                return self.invoke_v1(project_dir, name, args).await;
            }
        };
        tracing::warn!(
            stack = %name,
            stdout = %String::from_utf8_lossy(&v2_output.stdout),
            stderr = %String::from_utf8_lossy(&v2_output.stderr),
            "compose v2 failed, falling back to v1"
        );
        let v1_result = self.invoke_v1(project_dir, name, args).await;
        if v1_result.is_err() {
            tracing::error!(stack = %name, "compose v1 fallback also failed");
        }
        v1_result
    }

    async fn invoke_v2(
        &self,
        project_dir: &Path,
        name: &str,
        args: &[&str],
    ) -> std::io::Result<Output> {
        Command::new(&self.compose_binary)
            .arg("compose")
            .arg("-p")
            .arg(name)
            .current_dir(project_dir)
            .args(args)
            .output()
            .await
    }

    async fn invoke_v1(
        &self,
        project_dir: &Path,
        name: &str,
        args: &[&str],
    ) -> Result<(), DispatchError> {
        let output = Command::new("docker-compose")
            .arg("-p")
            .arg(name)
            .current_dir(project_dir)
            .args(args)
            .output()
            .await
            .map_err(|e| DispatchError::Compose(e.to_string()))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(DispatchError::Compose(format!(
                "stdout: {}\nstderr: {}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            )))
        }
    }
}

#[async_trait]
impl Compose for CliCompose {
    fn project_dir(&self, name: &str) -> PathBuf {
        self.stacks_root.join(name)
    }

    async fn up(&self, project_dir: &Path, name: &str) -> Result<(), DispatchError> {
        self.run(project_dir, name, &["up", "-d", "--remove-orphans"]).await
    }

    async fn down(&self, project_dir: &Path, name: &str) -> Result<(), DispatchError> {
        self.run(project_dir, name, &["down"]).await
    }

    async fn start(&self, project_dir: &Path, name: &str) -> Result<(), DispatchError> {
        self.run(project_dir, name, &["start"]).await
    }

    async fn stop(&self, project_dir: &Path, name: &str) -> Result<(), DispatchError> {
        self.run(project_dir, name, &["stop"]).await
    }

    async fn restart(&self, project_dir: &Path, name: &str) -> Result<(), DispatchError> {
        self.run(project_dir, name, &["restart"]).await
    }
}

/// Stack names must be non-empty after trim and match `^[A-Za-z0-9_.-]+$` (P10).
pub fn validate_stack_name(name: &str) -> Result<&str, DispatchError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DispatchError::InvalidStackName(name.to_string()));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
    {
        return Err(DispatchError::InvalidStackName(name.to_string()));
    }
    Ok(trimmed)
}

/// Injects the three managed-stack labels into every service of a compose
/// document, normalizing array-form `labels:` to map form first.
pub fn inject_stack_labels(
    compose_yaml: &str,
    stack_name: &str,
) -> Result<String, DispatchError> {
    let mut doc: serde_yaml::Value = serde_yaml::from_str(compose_yaml)
        .map_err(|e| DispatchError::Compose(format!("invalid compose YAML: {e}")))?;

    let timestamp = chrono::Utc::now().to_rfc3339();
    let services = doc
        .get_mut("services")
        .and_then(|v| v.as_mapping_mut())
        .ok_or_else(|| DispatchError::Compose("compose file has no 'services' map".into()))?;

    for (_, service) in services.iter_mut() {
        let Some(service_map) = service.as_mapping_mut() else {
            continue;
        };
        let labels_key = serde_yaml::Value::String("labels".to_string());
        let mut normalized = match service_map.get(&labels_key) {
            Some(serde_yaml::Value::Sequence(items)) => {
                let mut map = serde_yaml::Mapping::new();
                for item in items {
                    if let Some(s) = item.as_str() {
                        if let Some((k, v)) = s.split_once('=') {
                            map.insert(
                                serde_yaml::Value::String(k.to_string()),
                                serde_yaml::Value::String(v.to_string()),
                            );
                        }
                    }
                }
                map
            }
            Some(serde_yaml::Value::Mapping(map)) => map.clone(),
            _ => serde_yaml::Mapping::new(),
        };
        normalized.insert(
            serde_yaml::Value::String("managed".into()),
            serde_yaml::Value::String("true".into()),
        );
        normalized.insert(
            serde_yaml::Value::String("stack.name".into()),
            serde_yaml::Value::String(stack_name.to_string()),
        );
        normalized.insert(
            serde_yaml::Value::String("deployed.timestamp".into()),
            serde_yaml::Value::String(timestamp.clone()),
        );
        service_map.insert(labels_key, serde_yaml::Value::Mapping(normalized));
    }

    serde_yaml::to_string(&doc).map_err(|e| DispatchError::Compose(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_alphanumeric_dot_dash_underscore_names() {
        assert!(validate_stack_name("my-stack_1.0").is_ok());
    }

    #[test]
    fn rejects_empty_and_whitespace_names() {
        assert!(validate_stack_name("").is_err());
        assert!(validate_stack_name("   ").is_err());
    }

    #[test]
    fn rejects_names_with_path_separators() {
        assert!(validate_stack_name("../etc").is_err());
        assert!(validate_stack_name("a/b").is_err());
    }

    #[test]
    fn injects_labels_and_normalizes_array_form() {
        let yaml = "services:\n  web:\n    image: nginx\n    labels:\n      - foo=bar\n";
        let out = inject_stack_labels(yaml, "mystack").unwrap();
        assert!(out.contains("managed"));
        assert!(out.contains("stack.name"));
        assert!(out.contains("foo"));
    }
}
