pub mod auth;
pub mod defaults;
pub mod liveness;
pub mod logstream;
pub mod router;
pub mod session;
pub mod state;
pub mod ws_agent;
pub mod ws_ui;

pub use state::AppState;

use axum::routing::get;
use axum::Router;

/// Builds the hub's router: the agent session endpoint, the two
/// browser-facing endpoints, and a health check. The HTTP REST surface
/// that fronts these (stacks, hosts, auth issuance) is an out-of-scope
/// collaborator (spec §1) and is not wired here.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/agent", get(ws_agent::ws_agent_handler))
        .route("/ws/ui", get(ws_ui::ws_ui_handler))
        .route("/ws/logs/:host_id/:container_id", get(ws_ui::ws_logs_handler))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}
