//! End-to-end scenario #6 (spec §8): a registered session that never
//! sends another inbound frame (or pong) is closed by the hub's liveness
//! ticker once `last_seen` is more than 2 minutes old — not just removed
//! from the registries, but the socket itself is actually torn down, so
//! a peer that keeps answering transport pings can't hold the TCP
//! connection open past the scan.

use std::sync::Arc;

use flotilla_test_support::{InMemoryAuthService, InMemoryHostRegistry, InMemoryTimeseriesSink};
use futures_util::StreamExt;
use server::auth::HostStatus;
use server::state::AppState;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test(start_paused = true)]
async fn stale_session_is_closed_and_the_socket_is_torn_down() {
    let auth = Arc::new(InMemoryAuthService::new());
    auth.register_api_key("test-key", None);
    let hosts = Arc::new(InMemoryHostRegistry::new());
    let state = AppState::new(auth, hosts.clone(), Arc::new(InMemoryTimeseriesSink::new()));

    let router = server::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    let url = format!("ws://{addr}/ws/agent?api_key=test-key&host_id=host-1");
    let (mut socket, _) = tokio_tungstenite::connect_async(&url).await.expect("agent connects");

    // First frame off the wire is the one-shot `server_settings` greeting;
    // draining it confirms the session actually registered before the
    // liveness ticker starts scanning.
    let greeting = socket.next().await.expect("socket still open").expect("greeting frame");
    assert!(matches!(greeting, Message::Text(_)));
    assert!(state.session_by_agent("host-1").await.is_some());

    let liveness_state = state.clone();
    let liveness_task = tokio::spawn(server::liveness::run(liveness_state));

    // Sleeping under a paused clock auto-advances virtual time; the
    // socket answers nothing in the meantime, simulating a peer that
    // holds the connection open without sending anything until the
    // liveness ticker catches it.
    tokio::time::sleep(server::liveness::STALE_AFTER.to_std().unwrap() + server::liveness::SCAN_INTERVAL * 2).await;

    assert!(state.session_by_agent("host-1").await.is_none(), "stale session must be unregistered");
    let record = hosts.get("host-1").expect("host record exists");
    assert_eq!(record.status, Some(HostStatus::Offline));

    // The hub must have actively closed the socket, not merely forgotten
    // about it — a real peer that never sends anything would otherwise
    // keep the TCP connection open indefinitely.
    match socket.next().await {
        Some(Ok(Message::Close(_))) | None => {}
        other => panic!("expected the server to close the socket after the liveness timeout, got {other:?}"),
    }

    liveness_task.abort();
}
