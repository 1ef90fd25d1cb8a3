//! End-to-end scenario #7 (spec §8): two browser log-stream subscriptions
//! for the same `(host_id, container_id)` both receive a single
//! `log_data` frame when the hub forwards one event from the agent side.

use std::sync::Arc;

use flotilla_test_support::{InMemoryAuthService, InMemoryHostRegistry, InMemoryTimeseriesSink};
use server::state::AppState;

#[tokio::test]
async fn both_subscriptions_receive_the_same_log_chunk() {
    let state = AppState::new(
        Arc::new(InMemoryAuthService::new()),
        Arc::new(InMemoryHostRegistry::new()),
        Arc::new(InMemoryTimeseriesSink::new()),
    );

    let (sub_a, mut rx_a) = state.logstreams.subscribe("H", "C").await;
    let (sub_b, mut rx_b) = state.logstreams.subscribe("H", "C").await;

    let timestamp = "2025-10-29T10:00:00Z".parse::<chrono::DateTime<chrono::Utc>>().unwrap();
    state.router.forward_log("H", "C", "hello", "stdout", timestamp).await;

    let frame_a = rx_a.recv().await.expect("subscriber a receives a frame");
    let frame_b = rx_b.recv().await.expect("subscriber b receives a frame");

    for frame in [&frame_a, &frame_b] {
        assert_eq!(frame.message_type, flotilla_protocol::MessageType::Event);
        let view = frame.as_event().unwrap();
        assert_eq!(view.event_type, "log_data");
        assert_eq!(view.data["container_id"], "C");
        assert_eq!(view.data["data"], "hello");
        assert_eq!(view.data["stream"], "stdout");
    }

    sub_a.unsubscribe().await;
    sub_b.unsubscribe().await;
}
