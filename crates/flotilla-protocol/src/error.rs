use thiserror::Error;

/// Errors raised while decoding or interpreting an [`crate::Envelope`].
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("invalid message type: {0}")]
    InvalidMessageType(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
