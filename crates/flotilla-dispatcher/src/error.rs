use thiserror::Error;

/// Errors an action handler can raise. The dispatcher's `handle` entry
/// point always converts these into a `response{status:error}` envelope —
/// they never escape as a network-level failure (spec §4.2).
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("missing or invalid parameter: {0}")]
    InvalidParams(String),
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    #[error("container engine error: {0}")]
    Engine(String),
    #[error("compose error: {0}")]
    Compose(String),
    #[error("invalid stack name '{0}'")]
    InvalidStackName(String),
}

/// Errors surfaced by a `ContainerEngine`/`Compose` implementation.
///
/// `Conflict` is distinguished from `Other` so the removal-conflict model
/// (spec §4.2) can tell "resource still referenced" apart from any other
/// engine failure without string-sniffing at every call site.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{0}")]
    Other(String),
}
