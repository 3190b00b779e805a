use thiserror::Error;

use cask_types::Guid;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid registry magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported registry version: {0}")]
    UnsupportedVersion(u32),

    #[error("duplicate guid in registry: {0}")]
    DuplicateGuid(Guid),

    #[error("corrupt registry image: {0}")]
    CorruptImage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
