use std::path::{Path, PathBuf};

use tracing::debug;

use cask_registry::{BlockEntry, EntryId, Registry};
use cask_store::{BlockReader, BlockStore, CompactReport};
use cask_types::Guid;

use crate::bus::{ChangeBus, ChangeEvent};
use crate::error::{ProviderError, ProviderResult};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Slot {
    Object,
    Data(String),
}

struct PendingWrite {
    instance: EntryId,
    slot: Slot,
    bytes: Vec<u8>,
}

/// Single-file provider: every object and data block lives in one
/// block-allocated file, with the registry serialized as the header block.
///
/// Writes buffer in memory until `commit()`, which appends the new blocks,
/// then commits the updated registry via the header pointer — that pointer
/// update is the single commit point. A commit that fails partway leaves
/// orphaned blocks behind; they are invisible (nothing references them) and
/// [`compact`](Self::compact) reclaims them.
pub struct CompactProvider {
    path: PathBuf,
    store: BlockStore,
    committed: Registry,
    working: Registry,
    pending_writes: Vec<PendingWrite>,
    bus: ChangeBus,
    pending_events: Vec<ChangeEvent>,
    in_txn: bool,
}

impl CompactProvider {
    /// Open a database file, creating an empty one (root group `root_name`)
    /// if the file does not exist or has no committed registry yet.
    pub fn open(path: &Path, root_name: impl Into<String>) -> ProviderResult<Self> {
        let store = BlockStore::open(path)?;
        let committed = match store.read_header()? {
            Some(image) => Registry::from_bytes(&image)?,
            None => {
                let registry = Registry::new(root_name);
                store.write_header(&registry.to_bytes()?)?;
                registry
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            working: committed.clone(),
            committed,
            store,
            pending_writes: Vec::new(),
            bus: ChangeBus::new(),
            pending_events: Vec::new(),
            in_txn: false,
        })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    // -----------------------------------------------------------------------
    // Structure reads (working tree: uncommitted edits are visible)
    // -----------------------------------------------------------------------

    pub fn root_group(&self) -> EntryId {
        self.working.root()
    }

    pub fn group_name(&self, id: EntryId) -> Option<String> {
        self.working.group(id).map(|g| g.name.clone())
    }

    pub fn instance_name(&self, id: EntryId) -> Option<String> {
        self.working.instance(id).map(|i| i.name.clone())
    }

    pub fn instance_guid(&self, id: EntryId) -> Option<Guid> {
        self.working.instance(id).map(|i| i.guid)
    }

    pub fn instance_type(&self, id: EntryId) -> Option<String> {
        self.working.instance(id).map(|i| i.primary_type_name.clone())
    }

    pub fn child_groups(&self, id: EntryId) -> Option<Vec<(String, EntryId)>> {
        let group = self.working.group(id)?;
        Some(
            group
                .child_groups
                .iter()
                .map(|&child| (self.working.group(child).expect("tree intact").name.clone(), child))
                .collect(),
        )
    }

    pub fn child_instances(&self, id: EntryId) -> Option<Vec<(String, EntryId)>> {
        let group = self.working.group(id)?;
        Some(
            group
                .child_instances
                .iter()
                .map(|&child| (self.working.instance(child).expect("tree intact").name.clone(), child))
                .collect(),
        )
    }

    pub fn find_instance(&self, guid: &Guid) -> Option<EntryId> {
        self.working.find_instance(guid)
    }

    pub fn data_keys(&self, id: EntryId) -> Option<Vec<String>> {
        self.working
            .instance(id)
            .map(|i| i.data_blocks.keys().cloned().collect())
    }

    // -----------------------------------------------------------------------
    // Byte reads (committed state)
    // -----------------------------------------------------------------------

    /// Read an instance's committed object bytes.
    pub fn read_object(&self, id: EntryId) -> ProviderResult<Option<Vec<u8>>> {
        let Some(block) = self.committed_block(id, &Slot::Object) else {
            return Ok(None);
        };
        Ok(Some(self.store.read_block(block.block_id)?))
    }

    /// Read an instance's committed data bytes for `key`.
    pub fn read_data(&self, id: EntryId, key: &str) -> ProviderResult<Option<Vec<u8>>> {
        let Some(block) = self.committed_block(id, &Slot::Data(key.into())) else {
            return Ok(None);
        };
        Ok(Some(self.store.read_block(block.block_id)?))
    }

    /// Open a bounded read stream over `[start, end)` of a committed data
    /// block. The stream keeps the underlying file alive even across a
    /// later compaction.
    pub fn open_data_range(
        &self,
        id: EntryId,
        key: &str,
        start: u64,
        end: u64,
    ) -> ProviderResult<Option<BlockReader>> {
        let Some(block) = self.committed_block(id, &Slot::Data(key.into())) else {
            return Ok(None);
        };
        Ok(Some(self.store.open_read_range(block.block_id, start, end)?))
    }

    /// Committed block for an instance slot, resolved by guid so the lookup
    /// survives working-tree edits.
    fn committed_block(&self, id: EntryId, slot: &Slot) -> Option<BlockEntry> {
        let guid = self.working.instance(id).map(|i| i.guid)?;
        let cid = self.committed.find_instance(&guid)?;
        let inst = self.committed.instance(cid)?;
        let block = match slot {
            Slot::Object => inst.object_block?,
            Slot::Data(key) => *inst.data_blocks.get(key)?,
        };
        if block.block_id.is_unassigned() {
            return None;
        }
        Some(block)
    }

    // -----------------------------------------------------------------------
    // Mutations (buffered until commit)
    // -----------------------------------------------------------------------

    pub fn create_group(&mut self, parent: EntryId, name: &str) -> ProviderResult<Option<EntryId>> {
        let Some(id) = self.working.create_group_entry(parent, name) else {
            return Ok(None);
        };
        self.in_txn = true;
        self.pending_events.push(ChangeEvent::GroupAdded { name: name.into() });
        Ok(Some(id))
    }

    pub fn create_instance(
        &mut self,
        parent: EntryId,
        name: &str,
        type_name: &str,
    ) -> ProviderResult<Option<EntryId>> {
        let Some(id) = self.working.create_instance_entry(parent, name, type_name) else {
            return Ok(None);
        };
        let guid = self.working.instance(id).expect("just created").guid;
        self.in_txn = true;
        self.pending_events.push(ChangeEvent::InstanceAdded { guid, name: name.into() });
        Ok(Some(id))
    }

    pub fn write_object(&mut self, id: EntryId, bytes: Vec<u8>) -> ProviderResult<bool> {
        let Some(guid) = self.working.instance(id).map(|i| i.guid) else {
            return Ok(false);
        };
        self.working.set_object_block(id, BlockEntry::unassigned());
        self.buffer_write(id, Slot::Object, bytes);
        self.in_txn = true;
        self.pending_events.push(ChangeEvent::ObjectWritten { guid });
        Ok(true)
    }

    pub fn write_data(&mut self, id: EntryId, key: &str, bytes: Vec<u8>) -> ProviderResult<bool> {
        let Some(guid) = self.working.instance(id).map(|i| i.guid) else {
            return Ok(false);
        };
        self.working.insert_data_block(id, key, BlockEntry::unassigned());
        self.buffer_write(id, Slot::Data(key.into()), bytes);
        self.in_txn = true;
        self.pending_events.push(ChangeEvent::DataWritten { guid, key: key.into() });
        Ok(true)
    }

    /// Last write to a slot wins; earlier buffered bytes for the same slot
    /// are dropped so they never reach the file.
    fn buffer_write(&mut self, instance: EntryId, slot: Slot, bytes: Vec<u8>) {
        self.pending_writes
            .retain(|w| !(w.instance == instance && w.slot == slot));
        self.pending_writes.push(PendingWrite { instance, slot, bytes });
    }

    pub fn remove_data(&mut self, id: EntryId, key: &str) -> ProviderResult<bool> {
        let Some(guid) = self.working.instance(id).map(|i| i.guid) else {
            return Ok(false);
        };
        if !self.working.remove_data_block(id, key) {
            return Ok(false);
        }
        self.pending_writes
            .retain(|w| !(w.instance == id && w.slot == Slot::Data(key.into())));
        self.in_txn = true;
        self.pending_events.push(ChangeEvent::DataRemoved { guid, key: key.into() });
        Ok(true)
    }

    pub fn remove_instance(&mut self, id: EntryId) -> ProviderResult<bool> {
        let Some(guid) = self.working.instance(id).map(|i| i.guid) else {
            return Ok(false);
        };
        self.pending_writes.retain(|w| w.instance != id);
        self.working.remove_instance(id);
        self.in_txn = true;
        self.pending_events.push(ChangeEvent::InstanceRemoved { guid });
        Ok(true)
    }

    pub fn remove_group(&mut self, id: EntryId) -> ProviderResult<bool> {
        if id == self.working.root() || self.working.group(id).is_none() {
            return Ok(false);
        }
        let name = self.working.group(id).expect("checked above").name.clone();
        let doomed = self.working.instances_under(id);
        self.pending_writes.retain(|w| !doomed.contains(&w.instance));
        self.working.remove_group(id);
        self.in_txn = true;
        self.pending_events.push(ChangeEvent::GroupRemoved { name });
        Ok(true)
    }

    pub fn rename_group(&mut self, id: EntryId, name: &str) -> ProviderResult<bool> {
        let Some(old_name) = self.working.group(id).map(|g| g.name.clone()) else {
            return Ok(false);
        };
        self.working.rename_group(id, name);
        self.in_txn = true;
        self.pending_events.push(ChangeEvent::GroupRenamed {
            old_name,
            new_name: name.into(),
        });
        Ok(true)
    }

    pub fn rename_instance(&mut self, id: EntryId, name: &str) -> ProviderResult<bool> {
        let Some(guid) = self.working.instance(id).map(|i| i.guid) else {
            return Ok(false);
        };
        self.working.rename_instance(id, name);
        self.in_txn = true;
        self.pending_events.push(ChangeEvent::InstanceRenamed {
            guid,
            new_name: name.into(),
        });
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Transaction control
    // -----------------------------------------------------------------------

    pub fn in_transaction(&self) -> bool {
        self.in_txn
    }

    /// Commit: append every buffered block, patch the block references into
    /// the working registry, then commit it as the new header. The header
    /// pointer update is the commit point; a failure before it leaves the
    /// committed state untouched (any blocks already appended are orphans
    /// that the next compaction reclaims).
    pub fn commit(&mut self) -> ProviderResult<()> {
        let result = self.append_pending_and_save();
        match result {
            Ok(()) => {
                self.committed = self.working.clone();
                for event in self.pending_events.drain(..) {
                    self.bus.push(event);
                }
                self.pending_writes.clear();
                self.in_txn = false;
                debug!("compact provider transaction committed");
                Ok(())
            }
            Err(e) => {
                self.working = self.committed.clone();
                self.pending_writes.clear();
                self.pending_events.clear();
                self.in_txn = false;
                Err(e)
            }
        }
    }

    fn append_pending_and_save(&mut self) -> ProviderResult<()> {
        for write in &self.pending_writes {
            let block = BlockEntry::new(self.store.append_block(&write.bytes)?);
            match &write.slot {
                Slot::Object => {
                    self.working.set_object_block(write.instance, block);
                }
                Slot::Data(key) => {
                    self.working.insert_data_block(write.instance, key, block);
                }
            }
        }
        self.store.write_header(&self.working.to_bytes()?)?;
        Ok(())
    }

    /// Discard the transaction; nothing was written, nothing to undo.
    pub fn revert(&mut self) {
        self.working = self.committed.clone();
        self.pending_writes.clear();
        self.pending_events.clear();
        self.in_txn = false;
        debug!("compact provider transaction reverted");
    }

    // -----------------------------------------------------------------------
    // Compaction
    // -----------------------------------------------------------------------

    /// Rewrite the database file keeping only reachable blocks.
    ///
    /// Fails with [`ProviderError::TransactionInProgress`] if uncommitted
    /// edits exist. Streams opened before the call keep reading the old
    /// bytes until dropped.
    pub fn compact(&mut self) -> ProviderResult<CompactReport> {
        if self.in_txn {
            return Err(ProviderError::TransactionInProgress);
        }
        let (store, registry, report) = cask_store::compact(&self.path)?;
        self.store.close();
        self.store = store;
        self.working = registry.clone();
        self.committed = registry;
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Change bus
    // -----------------------------------------------------------------------

    pub fn get_event(&self, seq: u64) -> Option<ChangeEvent> {
        self.bus.get_event(seq).cloned()
    }

    pub fn next_event_seq(&self) -> u64 {
        self.bus.next_seq()
    }
}
