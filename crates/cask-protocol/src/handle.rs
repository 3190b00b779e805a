use std::collections::HashMap;

use cask_registry::EntryId;

/// What a wire handle points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    Group(EntryId),
    Instance(EntryId),
}

/// Server-side table of opaque wire handles.
///
/// Handles are minted sequentially and never reused. The table is append
/// only: removing an entry from the database does not remove its handle,
/// resolution just fails at the provider and the server answers `NotFound`.
/// Minting the same target twice yields the same handle, so handle equality
/// on the client matches entry identity on the server.
#[derive(Debug, Default)]
pub struct HandleTable {
    targets: HashMap<u64, Target>,
    by_target: HashMap<Target, u64>,
    next: u64,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint (or re-issue) the handle for a target.
    pub fn mint(&mut self, target: Target) -> u64 {
        if let Some(&handle) = self.by_target.get(&target) {
            return handle;
        }
        let handle = self.next;
        self.next += 1;
        self.targets.insert(handle, target);
        self.by_target.insert(target, handle);
        handle
    }

    /// Resolve a handle to its target, if the handle was ever minted.
    pub fn resolve(&self, handle: u64) -> Option<Target> {
        self.targets.get(&handle).copied()
    }

    /// Number of minted handles.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
