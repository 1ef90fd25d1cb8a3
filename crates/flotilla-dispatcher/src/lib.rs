//! flotilla-dispatcher: the agent-side command dispatcher (spec §4.2).
//!
//! [`Dispatcher::handle`] is the single entry point: it decodes a
//! `command` envelope, routes by action name to one of the per-group
//! handler modules, and always returns a `response` envelope — engine
//! and compose failures become `status=error`, never a transport-level
//! failure.

pub mod compose;
pub mod containers;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod images;
pub mod logs;
pub mod networks;
pub mod removal;
pub mod stacks;
pub mod system;
pub mod volumes;

pub use compose::{CliCompose, Compose};
pub use dispatcher::{Dispatcher, LogEmitCallback};
pub use engine::{BollardEngine, ContainerEngine};
pub use error::{DispatchError, EngineError};
