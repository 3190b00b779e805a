use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use cask_registry::{BlockEntry, EntryId, Registry};
use cask_txn::{Action, ActionContext, Transaction};
use cask_types::Guid;

use crate::bus::{ChangeBus, ChangeEvent};
use crate::error::ProviderResult;

const REGISTRY_FILE: &str = "registry.cask";

/// Filesystem-backed provider: one file per object block and per named data
/// block, plus the registry in its own file.
///
/// Every mutating call appends actions to the current transaction instead
/// of touching storage directly; structure edits apply to a working copy of
/// the registry so they are visible to further calls before commit. On
/// `commit()` the action log executes atomically (undo-on-failure); on
/// `revert()` the working copy and buffered actions are discarded. Byte
/// reads (`read_object`/`read_data`) always reflect the last committed
/// state.
pub struct LocalProvider {
    dir: PathBuf,
    committed: Registry,
    working: Registry,
    txn: Transaction,
    bus: ChangeBus,
    pending_events: Vec<ChangeEvent>,
    in_txn: bool,
}

impl LocalProvider {
    /// Open an existing database directory.
    pub fn open(dir: &Path) -> ProviderResult<Self> {
        let image = fs::read(dir.join(REGISTRY_FILE))?;
        let committed = Registry::from_bytes(&image)?;
        Ok(Self::with_registry(dir, committed))
    }

    /// Create a new database directory with an empty root group.
    ///
    /// Fails if a database already exists at `dir`.
    pub fn create(dir: &Path, root_name: impl Into<String>) -> ProviderResult<Self> {
        fs::create_dir_all(dir)?;
        let registry_path = dir.join(REGISTRY_FILE);
        if registry_path.exists() {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "database already exists").into());
        }
        let committed = Registry::new(root_name);
        fs::write(&registry_path, committed.to_bytes()?)?;
        Ok(Self::with_registry(dir, committed))
    }

    fn with_registry(dir: &Path, committed: Registry) -> Self {
        Self {
            dir: dir.to_path_buf(),
            working: committed.clone(),
            committed,
            txn: Transaction::new(),
            bus: ChangeBus::new(),
            pending_events: Vec::new(),
            in_txn: false,
        }
    }

    fn registry_path(&self) -> PathBuf {
        self.dir.join(REGISTRY_FILE)
    }

    fn object_path(&self, guid: &Guid) -> PathBuf {
        self.dir.join(format!("{}.obj", guid.to_hex()))
    }

    fn data_path(&self, guid: &Guid, key: &str) -> PathBuf {
        // Keys are caller-chosen strings; hex keeps the file name safe.
        self.dir.join(format!("{}.{}.dat", guid.to_hex(), hex::encode(key)))
    }

    // -----------------------------------------------------------------------
    // Structure reads (working tree: uncommitted edits are visible)
    // -----------------------------------------------------------------------

    /// The root group's id.
    pub fn root_group(&self) -> EntryId {
        self.working.root()
    }

    /// Name of a group, if the id resolves.
    pub fn group_name(&self, id: EntryId) -> Option<String> {
        self.working.group(id).map(|g| g.name.clone())
    }

    /// Name of an instance, if the id resolves.
    pub fn instance_name(&self, id: EntryId) -> Option<String> {
        self.working.instance(id).map(|i| i.name.clone())
    }

    /// Guid of an instance, if the id resolves.
    pub fn instance_guid(&self, id: EntryId) -> Option<Guid> {
        self.working.instance(id).map(|i| i.guid)
    }

    /// Primary type name of an instance, if the id resolves.
    pub fn instance_type(&self, id: EntryId) -> Option<String> {
        self.working.instance(id).map(|i| i.primary_type_name.clone())
    }

    /// Child groups of a group, in display order.
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

    /// Child instances of a group, in display order.
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

    /// Find an instance by guid.
    pub fn find_instance(&self, guid: &Guid) -> Option<EntryId> {
        self.working.find_instance(guid)
    }

    /// Data keys present on an instance.
    pub fn data_keys(&self, id: EntryId) -> Option<Vec<String>> {
        self.working
            .instance(id)
            .map(|i| i.data_blocks.keys().cloned().collect())
    }

    // -----------------------------------------------------------------------
    // Byte reads (committed state)
    // -----------------------------------------------------------------------

    /// Read an instance's committed object bytes. `Ok(None)` if the id does
    /// not resolve or no object has been committed.
    pub fn read_object(&self, id: EntryId) -> ProviderResult<Option<Vec<u8>>> {
        let Some(guid) = self.working.instance(id).map(|i| i.guid) else {
            return Ok(None);
        };
        read_optional(&self.object_path(&guid))
    }

    /// Read an instance's committed data bytes for `key`.
    pub fn read_data(&self, id: EntryId, key: &str) -> ProviderResult<Option<Vec<u8>>> {
        let Some(guid) = self.working.instance(id).map(|i| i.guid) else {
            return Ok(None);
        };
        read_optional(&self.data_path(&guid, key))
    }

    // -----------------------------------------------------------------------
    // Mutations (buffered until commit)
    // -----------------------------------------------------------------------

    /// Create a group under `parent`. `Ok(None)` if the parent is gone.
    pub fn create_group(&mut self, parent: EntryId, name: &str) -> ProviderResult<Option<EntryId>> {
        let Some(id) = self.working.create_group_entry(parent, name) else {
            return Ok(None);
        };
        self.in_txn = true;
        self.pending_events.push(ChangeEvent::GroupAdded { name: name.into() });
        Ok(Some(id))
    }

    /// Create an instance under `parent` with a fresh guid.
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

    /// Write an instance's serialized object. `Ok(false)` if the id does not
    /// resolve.
    pub fn write_object(&mut self, id: EntryId, bytes: Vec<u8>) -> ProviderResult<bool> {
        let Some(guid) = self.working.instance(id).map(|i| i.guid) else {
            return Ok(false);
        };
        self.working.set_object_block(id, BlockEntry::unassigned());
        self.txn.push(Action::WriteFile {
            path: self.object_path(&guid),
            bytes,
        })?;
        self.in_txn = true;
        self.pending_events.push(ChangeEvent::ObjectWritten { guid });
        Ok(true)
    }

    /// Write (or overwrite) a named data block on an instance.
    pub fn write_data(&mut self, id: EntryId, key: &str, bytes: Vec<u8>) -> ProviderResult<bool> {
        let Some(guid) = self.working.instance(id).map(|i| i.guid) else {
            return Ok(false);
        };
        self.working.insert_data_block(id, key, BlockEntry::unassigned());
        self.txn.push(Action::WriteFile {
            path: self.data_path(&guid, key),
            bytes,
        })?;
        self.in_txn = true;
        self.pending_events.push(ChangeEvent::DataWritten { guid, key: key.into() });
        Ok(true)
    }

    /// Remove a named data block. `Ok(false)` if the instance or key is
    /// missing.
    pub fn remove_data(&mut self, id: EntryId, key: &str) -> ProviderResult<bool> {
        let Some(guid) = self.working.instance(id).map(|i| i.guid) else {
            return Ok(false);
        };
        if !self.working.remove_data_block(id, key) {
            return Ok(false);
        }
        let path = self.data_path(&guid, key);
        self.txn.drop_actions_for(&path)?;
        if self.committed_has_data(&guid, key) {
            self.txn.push(Action::RemoveFile { path })?;
        }
        self.in_txn = true;
        self.pending_events.push(ChangeEvent::DataRemoved { guid, key: key.into() });
        Ok(true)
    }

    /// Remove an instance and its files. `Ok(false)` if the id does not
    /// resolve.
    pub fn remove_instance(&mut self, id: EntryId) -> ProviderResult<bool> {
        let Some(guid) = self.working.instance(id).map(|i| i.guid) else {
            return Ok(false);
        };
        self.queue_instance_file_removal(id, &guid)?;
        self.working.remove_instance(id);
        self.in_txn = true;
        self.pending_events.push(ChangeEvent::InstanceRemoved { guid });
        Ok(true)
    }

    /// Remove a group and its whole subtree. `Ok(false)` if the id does not
    /// resolve or names the root.
    pub fn remove_group(&mut self, id: EntryId) -> ProviderResult<bool> {
        if id == self.working.root() || self.working.group(id).is_none() {
            return Ok(false);
        }
        let name = self.working.group(id).expect("checked above").name.clone();
        for inst in self.working.instances_under(id) {
            let guid = self.working.instance(inst).expect("subtree intact").guid;
            self.queue_instance_file_removal(inst, &guid)?;
        }
        self.working.remove_group(id);
        self.in_txn = true;
        self.pending_events.push(ChangeEvent::GroupRemoved { name });
        Ok(true)
    }

    /// Rename a group. `Ok(false)` if the id does not resolve.
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

    /// Rename an instance. `Ok(false)` if the id does not resolve.
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

    fn committed_has_data(&self, guid: &Guid, key: &str) -> bool {
        self.committed
            .find_instance(guid)
            .and_then(|id| self.committed.instance(id))
            .map(|inst| inst.data_blocks.contains_key(key))
            .unwrap_or(false)
    }

    /// Queue removal of every file belonging to an instance: committed files
    /// get a staged `RemoveFile`; writes queued earlier in this transaction
    /// are simply dropped so they never create orphans.
    fn queue_instance_file_removal(&mut self, id: EntryId, guid: &Guid) -> ProviderResult<()> {
        let mut keys: BTreeSet<String> = self
            .working
            .instance(id)
            .map(|inst| inst.data_blocks.keys().cloned().collect())
            .unwrap_or_default();

        let committed_inst = self
            .committed
            .find_instance(guid)
            .and_then(|cid| self.committed.instance(cid));
        let committed_has_object = committed_inst
            .map(|inst| inst.object_block.is_some())
            .unwrap_or(false);
        let committed_keys: BTreeSet<String> = committed_inst
            .map(|inst| inst.data_blocks.keys().cloned().collect())
            .unwrap_or_default();
        keys.extend(committed_keys.iter().cloned());

        let object = self.object_path(guid);
        self.txn.drop_actions_for(&object)?;
        if committed_has_object {
            self.txn.push(Action::RemoveFile { path: object })?;
        }
        for key in keys {
            let path = self.data_path(guid, &key);
            self.txn.drop_actions_for(&path)?;
            if committed_keys.contains(&key) {
                self.txn.push(Action::RemoveFile { path })?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transaction control
    // -----------------------------------------------------------------------

    /// Returns `true` if uncommitted edits are buffered.
    pub fn in_transaction(&self) -> bool {
        self.in_txn
    }

    /// Commit the current transaction atomically.
    ///
    /// The registry rewrite is the final action; if any action fails the
    /// whole transaction is rolled back, the working tree is reset to the
    /// committed state, and the error reports which action failed.
    pub fn commit(&mut self) -> ProviderResult<()> {
        let image = self.working.to_bytes()?;
        self.txn.push(Action::WriteFile {
            path: self.registry_path(),
            bytes: image,
        })?;

        let mut ctx = ActionContext::new();
        match self.txn.commit(&mut ctx) {
            Ok(()) => {
                self.committed = self.working.clone();
                for event in self.pending_events.drain(..) {
                    self.bus.push(event);
                }
                self.reset_txn();
                debug!("local provider transaction committed");
                Ok(())
            }
            Err(e) => {
                self.working = self.committed.clone();
                self.pending_events.clear();
                self.reset_txn();
                Err(e.into())
            }
        }
    }

    /// Discard the current transaction: nothing executed, nothing to undo.
    pub fn revert(&mut self) {
        self.working = self.committed.clone();
        self.pending_events.clear();
        self.reset_txn();
        debug!("local provider transaction reverted");
    }

    fn reset_txn(&mut self) {
        self.txn = Transaction::new();
        self.in_txn = false;
    }

    // -----------------------------------------------------------------------
    // Change bus
    // -----------------------------------------------------------------------

    /// Poll the change bus; `None` if no event with that sequence number
    /// exists yet.
    pub fn get_event(&self, seq: u64) -> Option<ChangeEvent> {
        self.bus.get_event(seq).cloned()
    }

    /// Sequence number the next committed event will get.
    pub fn next_event_seq(&self) -> u64 {
        self.bus.next_seq()
    }
}

fn read_optional(path: &Path) -> ProviderResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
