//! Entry registry for the Cask object database.
//!
//! The registry is the complete entry graph: a strict tree of
//! [`GroupEntry`] nodes owning [`InstanceEntry`] leaves, each instance
//! referencing byte blocks through [`BlockEntry`]. There is exactly one root
//! group per database; every other entry is reachable from it.
//!
//! Entries live in an arena keyed by [`EntryId`] so that callers (and the
//! remote protocol's handle table) can address them without holding borrows
//! into the tree.

pub mod entry;
pub mod error;
pub mod registry;

pub use entry::{BlockEntry, EntryId, GroupEntry, InstanceEntry};
pub use error::{RegistryError, RegistryResult};
pub use registry::{Registry, REGISTRY_VERSION};
