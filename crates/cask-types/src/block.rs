use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque reference to a byte block in a block store.
///
/// For the single-file block store this is the byte offset of the block's
/// frame header. Providers that keep blocks as loose files use
/// [`BlockId::UNASSIGNED`] and address bytes by guid/key convention instead.
/// Compaction may renumber ids but preserves the 1:1 relationship between a
/// live block reference and exactly one byte range.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(u64);

impl BlockId {
    /// Sentinel for "no physical block allocated".
    pub const UNASSIGNED: BlockId = BlockId(u64::MAX);

    /// Create a block id from a raw offset.
    pub const fn from_offset(offset: u64) -> Self {
        Self(offset)
    }

    /// The raw offset value.
    pub const fn offset(&self) -> u64 {
        self.0
    }

    /// Returns `true` if no physical block is allocated.
    pub fn is_unassigned(&self) -> bool {
        *self == Self::UNASSIGNED
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unassigned() {
            write!(f, "BlockId(unassigned)")
        } else {
            write!(f, "BlockId({})", self.0)
        }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unassigned() {
            write!(f, "unassigned")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
