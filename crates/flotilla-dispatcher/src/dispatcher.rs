//! `Dispatcher`: the agent-side entry point for `command` envelopes
//! (spec §4.2). `handle` always returns a `response` envelope with the
//! same id — engine/compose failures become `status=error`, never a
//! network-level failure.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use flotilla_protocol::{CommandView, Envelope, LogStream};
use tokio::time::timeout;

use crate::compose::Compose;
use crate::engine::ContainerEngine;
use crate::error::DispatchError;
use crate::{containers, images, logs, networks, stacks, system, volumes};

const DEFAULT_BUDGET: Duration = Duration::from_secs(30);
const STACK_BUDGET: Duration = Duration::from_secs(120);
const INSPECT_POOL_SIZE: usize = 4;

pub type LogEmitCallback = Arc<dyn Fn(String, Bytes, LogStream) + Send + Sync>;

pub struct Dispatcher {
    engine: Arc<dyn ContainerEngine>,
    compose: Arc<dyn Compose>,
    stacks_root: PathBuf,
    emit_log: LogEmitCallback,
}

impl Dispatcher {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        compose: Arc<dyn Compose>,
        stacks_root: PathBuf,
        emit_log: LogEmitCallback,
    ) -> Self {
        Self { engine, compose, stacks_root, emit_log }
    }

    pub async fn handle(&self, envelope: &Envelope) -> Envelope {
        let view = match envelope.as_command() {
            Ok(view) => view,
            Err(e) => return Envelope::response_err(envelope.id.clone(), e.to_string()),
        };

        let budget = if view.action.ends_with("_stack") || view.action == "import_stack" {
            STACK_BUDGET
        } else {
            DEFAULT_BUDGET
        };

        match timeout(budget, self.dispatch_action(&view)).await {
            Ok(Ok(data)) => Envelope::response_ok(view.id, data),
            Ok(Err(e)) => Envelope::response_err(view.id, e.to_string()),
            Err(_) => Envelope::response_err(view.id, format!("action '{}' exceeded its time budget", view.action)),
        }
    }

    async fn dispatch_action(&self, view: &CommandView) -> Result<serde_json::Value, DispatchError> {
        use flotilla_protocol::actions::*;

        macro_rules! parse {
            () => {
                serde_json::from_value(view.params.clone())
                    .map_err(|e| DispatchError::InvalidParams(e.to_string()))?
            };
        }

        match view.action.as_str() {
            LIST_CONTAINERS => containers::list_containers(self.engine.as_ref(), parse!()).await,
            GET_CONTAINER => containers::get_container(self.engine.as_ref(), parse!()).await,
            CREATE_CONTAINER => containers::create_container(self.engine.as_ref(), parse!()).await,
            START_CONTAINER => containers::start_container(self.engine.as_ref(), parse!()).await,
            STOP_CONTAINER => containers::stop_container(self.engine.as_ref(), parse!()).await,
            RESTART_CONTAINER => containers::restart_container(self.engine.as_ref(), parse!()).await,
            REMOVE_CONTAINER => containers::remove_container(self.engine.as_ref(), parse!()).await,

            LIST_IMAGES => images::list_images(self.engine.as_ref()).await,
            REMOVE_IMAGES => images::remove_images(self.engine.as_ref(), parse!()).await,
            PRUNE_DANGLING_IMAGES => images::prune_dangling_images(self.engine.as_ref()).await,

            LIST_NETWORKS => networks::list_networks(self.engine.as_ref()).await,
            INSPECT_NETWORKS => networks::inspect_networks(self.engine.clone(), parse!(), INSPECT_POOL_SIZE).await,
            REMOVE_NETWORKS => networks::remove_networks(self.engine.as_ref(), parse!()).await,

            LIST_VOLUMES => volumes::list_volumes(self.engine.as_ref()).await,
            INSPECT_VOLUMES => volumes::inspect_volumes(self.engine.clone(), parse!(), INSPECT_POOL_SIZE).await,
            REMOVE_VOLUMES => volumes::remove_volumes(self.engine.as_ref(), parse!()).await,

            GET_CONTAINER_LOGS => logs::get_container_logs(self.engine.as_ref(), parse!()).await,
            STREAM_CONTAINER_LOGS => {
                logs::stream_container_logs(self.engine.clone(), parse!(), self.emit_log.clone()).await
            }
            GET_CONTAINER_STATS => logs::get_container_stats(self.engine.as_ref(), parse!()).await,

            DEPLOY_STACK => stacks::deploy_stack(self.compose.as_ref(), parse!()).await,
            UPDATE_STACK => stacks::update_stack(self.compose.as_ref(), parse!()).await,
            REMOVE_STACK => stacks::remove_stack(self.compose.as_ref(), parse!()).await,
            START_STACK => stacks::start_stack(self.compose.as_ref(), parse!()).await,
            STOP_STACK => stacks::stop_stack(self.compose.as_ref(), parse!()).await,
            RESTART_STACK => stacks::restart_stack(self.compose.as_ref(), parse!()).await,
            IMPORT_STACK => stacks::import_stack(self.compose.as_ref(), parse!()).await,
            LIST_STACKS => stacks::list_stacks(&self.stacks_root).await,
            GET_STACK => stacks::get_stack(&self.stacks_root, parse!()).await,
            GET_STACK_CONTAINERS => stacks::get_stack_containers(self.engine.as_ref(), parse!()).await,
            STACK_CONTAINER_ACTION => stacks::stack_container_action(self.engine.as_ref(), parse!()).await,

            GET_DOCKER_INFO => system::get_docker_info(self.engine.as_ref()).await,

            other => Err(DispatchError::UnknownAction(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_test_support::fakes::{FakeCompose, FakeContainerEngine};

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            Arc::new(FakeContainerEngine::new()),
            Arc::new(FakeCompose::new()),
            PathBuf::from("/tmp/flotilla-stacks-test"),
            Arc::new(|_, _, _| {}),
        )
    }

    #[tokio::test]
    async fn round_trip_list_containers_command() {
        let d = dispatcher();
        let env = Envelope::command(Some("c1".into()), "list_containers", serde_json::json!({"all": true}));
        let response = d.handle(&env).await;
        let view = response.as_response().unwrap();
        assert_eq!(view.id, "c1");
        assert!(view.ok);
    }

    #[tokio::test]
    async fn unknown_action_returns_error_response_not_failure() {
        let d = dispatcher();
        let env = Envelope::command(Some("c2".into()), "teleport_container", serde_json::json!({}));
        let response = d.handle(&env).await;
        let view = response.as_response().unwrap();
        assert!(!view.ok);
        assert!(view.error.unwrap().contains("teleport_container"));
    }

    #[tokio::test]
    async fn handle_on_non_command_envelope_returns_error_response() {
        let d = dispatcher();
        let env = Envelope::event("log_data", serde_json::json!({}));
        let response = d.handle(&env).await;
        let view = response.as_response().unwrap();
        assert!(!view.ok);
    }
}
