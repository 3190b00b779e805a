//! Append-only block store and compactor for the Cask object database.
//!
//! # Architecture
//!
//! - **Block file**: magic + version + header-block pointer, then CRC-framed
//!   byte blocks; the fsynced pointer update is the save commit point
//! - **[`BlockStore`]**: append and random-access read, addressed by
//!   [`BlockId`](cask_types::BlockId) (the frame's byte offset)
//! - **[`BlockReader`]**: a bounded read stream that holds a shared
//!   reference to the store for its whole lifetime
//! - **[`compact`]**: rebuilds the file with only reachable blocks and
//!   atomically renames it over the original
//!
//! Blocks are only ever appended, never overwritten in place, so reads are
//! safe concurrently with appends elsewhere in the file.

pub mod compact;
pub mod error;
pub mod store;

pub use compact::{compact, CompactReport};
pub use error::{StoreError, StoreResult};
pub use store::{BlockReader, BlockStore, STORE_VERSION};
