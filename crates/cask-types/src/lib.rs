//! Foundation types for the Cask object database.
//!
//! This crate provides the identity and addressing types used throughout the
//! Cask system. Every other Cask crate depends on `cask-types`.
//!
//! # Key Types
//!
//! - [`Guid`] — 128-bit globally unique instance identifier
//! - [`BlockId`] — Opaque reference to a byte block in a block store
//! - [`TypeError`] — Parse/validation failures for the above

pub mod block;
pub mod error;
pub mod guid;

pub use block::BlockId;
pub use error::TypeError;
pub use guid::Guid;
