//! flotilla-test-support: shared test doubles for the agent/server/
//! dispatcher crates — mock WebSocket peers and in-memory
//! `ContainerEngine`/`Compose` fakes, mirroring the teacher's
//! `rt-test-utils`.

pub mod collaborators;
pub mod fakes;
pub mod mock_agent_client;
pub mod mock_server;

pub use collaborators::{InMemoryAuthService, InMemoryHostRegistry, InMemoryTimeseriesSink};
pub use fakes::{FakeCompose, FakeContainerEngine};
pub use mock_agent_client::MockAgentClient;
pub use mock_server::MockServer;
