//! flotilla-metrics: the agent-side periodic metrics collector (spec §4.3).

pub mod cgroup;
pub mod collector;
pub mod host;

pub use collector::{MetricsCollector, cpu_percent};
pub use host::HostSampler;
