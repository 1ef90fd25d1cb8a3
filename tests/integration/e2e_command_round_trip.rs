//! End-to-end scenario #1 (spec §8): issue a `list_containers` command to
//! a real agent process (in-process, but talking over a real TCP socket
//! and the real `agent`/`server` wire code) and see the router's `issue`
//! return the dispatcher's normalized container list.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent::session::{self, SessionConfig};
use flotilla_dispatcher::Dispatcher;
use flotilla_test_support::{FakeCompose, FakeContainerEngine, InMemoryAuthService, InMemoryHostRegistry, InMemoryTimeseriesSink};
use server::state::AppState;
use tokio::sync::{mpsc, watch};

#[tokio::test]
async fn issues_list_containers_and_returns_normalized_result() {
    let auth = Arc::new(InMemoryAuthService::new());
    auth.register_api_key("test-key", None);
    let state = AppState::new(auth, Arc::new(InMemoryHostRegistry::new()), Arc::new(InMemoryTimeseriesSink::new()));

    let router = server::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    let engine = Arc::new(FakeContainerEngine::new());
    engine.seed_running_container("abc123456789", "web");
    let compose = Arc::new(FakeCompose::new());
    let emit_log = Arc::new(|_: String, _: bytes::Bytes, _: flotilla_protocol::LogStream| {});
    let dispatcher = Arc::new(Dispatcher::new(engine, compose, PathBuf::from("/tmp/stacks"), emit_log));

    let (_app_tx, app_rx) = mpsc::channel(8);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let session_config = SessionConfig {
        base_url: format!("ws://{addr}"),
        agent_ws_path: "/ws/agent".to_string(),
        host_id: "host-1".to_string(),
        api_key: "test-key".to_string(),
        agent_id: "agent-1".to_string(),
        agent_name: "agent-1".to_string(),
        hostname: "box".to_string(),
    };
    tokio::spawn(session::run(session_config, dispatcher, app_rx, shutdown_rx));

    wait_until_registered(&state, "host-1").await;

    let command = flotilla_protocol::Envelope::command(
        Some("c1".to_string()),
        "list_containers",
        serde_json::json!({"all": true}),
    );
    let data = state
        .router
        .issue("host-1", command, Duration::from_secs(5))
        .await
        .expect("issue succeeds");

    let containers = data["containers"].as_array().expect("containers array");
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0]["id"], "abc123456789");
    assert_eq!(containers[0]["name"], "web");
    assert_eq!(containers[0]["status"], "running");
}

async fn wait_until_registered(state: &AppState, host_id: &str) {
    for _ in 0..200 {
        if state.session_by_agent(host_id).await.is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("agent never registered with the hub");
}
