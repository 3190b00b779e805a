use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use cask_types::{BlockId, Guid};

/// Arena identifier for an entry in a [`Registry`](crate::Registry).
///
/// Ids are minted sequentially per registry and never reused, so a stale id
/// held after removal simply fails to resolve.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(u64);

impl EntryId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id value.
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.0)
    }
}

/// Reference to one byte block in the block store.
///
/// Never shared between two instance data slots: each live `BlockEntry`
/// denotes exactly one byte range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntry {
    pub block_id: BlockId,
}

impl BlockEntry {
    /// Create a block entry referencing the given block.
    pub fn new(block_id: BlockId) -> Self {
        Self { block_id }
    }

    /// A block entry with no physical block allocated yet.
    pub fn unassigned() -> Self {
        Self {
            block_id: BlockId::UNASSIGNED,
        }
    }
}

/// A named, serialized instance: the leaf of the registry tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceEntry {
    /// Display name; not unique.
    pub name: String,
    /// Stable identity, unique within the registry.
    pub guid: Guid,
    /// String tag of the stored object's type.
    pub primary_type_name: String,
    /// Reference to the serialized object header block, if written.
    pub object_block: Option<BlockEntry>,
    /// Auxiliary binary payloads keyed by data name. Keys are unique;
    /// insertion order is irrelevant.
    pub data_blocks: BTreeMap<String, BlockEntry>,
}

impl InstanceEntry {
    pub(crate) fn new(name: impl Into<String>, guid: Guid, primary_type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            guid,
            primary_type_name: primary_type_name.into(),
            object_block: None,
            data_blocks: BTreeMap::new(),
        }
    }
}

/// A group: an interior node owning child groups and instances.
///
/// Child order is display order and is preserved by serialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupEntry {
    /// Display name; not unique.
    pub name: String,
    /// Owned child groups, in display order.
    pub child_groups: Vec<EntryId>,
    /// Owned child instances, in display order.
    pub child_instances: Vec<EntryId>,
}

impl GroupEntry {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            child_groups: Vec::new(),
            child_instances: Vec::new(),
        }
    }
}
