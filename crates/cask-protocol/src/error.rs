use thiserror::Error;

use crate::message::WireErrorKind;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("framing error: {0}")]
    FramingError(String),

    #[error("message of {size} bytes exceeds maximum of {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("server reported {kind:?}: {message}")]
    Remote { kind: WireErrorKind, message: String },

    #[error("expected {expected} response, got {got}")]
    UnexpectedResponse {
        expected: &'static str,
        got: &'static str,
    },
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
