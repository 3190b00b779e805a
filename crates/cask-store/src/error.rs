use thiserror::Error;

use cask_registry::RegistryError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid block file magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported block file version: {0}")]
    UnsupportedVersion(u32),

    #[error("block store is closed")]
    Closed,

    #[error("corrupt block at offset {offset}: {reason}")]
    CorruptBlock { offset: u64, reason: String },

    #[error("CRC32 mismatch for block at offset {offset}")]
    CrcMismatch { offset: u64 },

    #[error("corrupt header block: {0}")]
    CorruptHeader(String),

    #[error("read range [{start}, {end}) out of bounds for block of {len} bytes")]
    RangeOutOfBounds { start: u64, end: u64, len: u64 },

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
