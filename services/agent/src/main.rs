use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent::config;
use agent::identity;
use agent::session::{self, SessionConfig};
use bytes::Bytes;
use flotilla_dispatcher::{BollardEngine, CliCompose, Dispatcher};
use flotilla_metrics::{HostSampler, MetricsCollector};
use flotilla_protocol::{Envelope, LogStream};
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "agent starting");

    let cfg = match config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let agent_id = match identity::load_or_create(cfg.identity.state_dir.as_deref()) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("FATAL: failed to load agent identity: {e}");
            std::process::exit(1);
        }
    };
    let hostname = hostname_or_unknown();
    let agent_name = cfg.display_name.clone().unwrap_or_else(|| hostname.clone());
    let host_id = cfg.host_id.clone().unwrap_or_else(|| agent_id.clone());

    info!(agent_id = %agent_id, host_id = %host_id, "identity resolved");

    let engine = match BollardEngine::connect() {
        Ok(e) => Arc::new(e),
        Err(e) => {
            eprintln!("FATAL: failed to connect to Docker: {e}");
            std::process::exit(1);
        }
    };

    let mut compose = CliCompose::new(PathBuf::from(&cfg.docker.stacks_root));
    compose.compose_binary = cfg.docker.compose_binary.clone();
    let compose = Arc::new(compose);

    // A single bounded channel carries every envelope the agent wants to
    // push outside of a command/response round trip: `log_data` events
    // from the dispatcher's streaming callback, and metrics samples.
    // Both producers use non-blocking sends, so backpressure here simply
    // drops the sample/chunk rather than buffering it across a reconnect.
    let (app_tx, app_rx) = mpsc::channel::<Envelope>(256);

    let emit_log = {
        let app_tx = app_tx.clone();
        Arc::new(move |container_id: String, data: Bytes, stream: LogStream| {
            let event = flotilla_protocol::LogDataEvent {
                container_id,
                stream_id: String::new(),
                data: String::from_utf8_lossy(&data).into_owned(),
                stream,
                timestamp: chrono::Utc::now(),
            };
            let payload = serde_json::to_value(&event).expect("log event always serializes");
            let _ = app_tx.try_send(Envelope::event("log_data", payload));
        })
    };

    let dispatcher = Arc::new(Dispatcher::new(
        engine.clone(),
        compose,
        PathBuf::from(&cfg.docker.stacks_root),
        emit_log,
    ));

    let host_sampler = HostSampler::autodetect(PathBuf::from("/proc"), Some(PathBuf::from("/")));
    let metrics_collector = Arc::new(MetricsCollector::new(
        engine,
        host_sampler,
        PathBuf::from("/proc"),
        PathBuf::from("/sys/fs/cgroup"),
        Duration::from_secs(cfg.metrics.interval_seconds),
    ));

    let (metrics_tx, mut metrics_rx) = mpsc::channel(1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let collector_task = {
        let collector = metrics_collector.clone();
        let host_id = host_id.clone();
        tokio::spawn(async move { collector.run(host_id, metrics_tx).await })
    };

    let metrics_relay_task = {
        let app_tx = app_tx.clone();
        tokio::spawn(async move {
            while let Some(sample) = metrics_rx.recv().await {
                let _ = app_tx.try_send(Envelope::metrics(&sample));
            }
        })
    };

    let session_config = SessionConfig {
        base_url: cfg.server.base_url.clone(),
        agent_ws_path: cfg.server.agent_ws_path.clone(),
        host_id,
        api_key: cfg.api_key.clone(),
        agent_id,
        agent_name,
        hostname,
    };

    tokio::select! {
        () = session::run(session_config, dispatcher, app_rx, shutdown_rx.clone()) => {}
        () = shutdown_signal() => {
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    }

    collector_task.abort();
    metrics_relay_task.abort();
    info!("agent shut down gracefully");
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
