use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use cask_types::{BlockId, Guid};

use crate::entry::{BlockEntry, EntryId, GroupEntry, InstanceEntry};
use crate::error::{RegistryError, RegistryResult};

/// Current registry image format version.
pub const REGISTRY_VERSION: u32 = 1;

const MAGIC: &[u8; 4] = b"CSKR";

/// The complete entry graph plus a root-group reference.
///
/// Entries live in an arena keyed by [`EntryId`]; the tree structure is held
/// as child-id lists on each group. The arena enforces the structural
/// invariants: guid uniqueness, strict-tree ownership (an entry has exactly
/// one parent), and no orphans (removal drops the whole subtree).
#[derive(Clone, Debug)]
pub struct Registry {
    groups: HashMap<EntryId, GroupEntry>,
    instances: HashMap<EntryId, InstanceEntry>,
    parents: HashMap<EntryId, EntryId>,
    guids: HashMap<Guid, EntryId>,
    root: EntryId,
    next_id: u64,
}

impl Registry {
    /// Create an empty registry with a fresh root group.
    pub fn new(root_name: impl Into<String>) -> Self {
        let root = EntryId::new(0);
        let mut groups = HashMap::new();
        groups.insert(root, GroupEntry::new(root_name));
        Self {
            groups,
            instances: HashMap::new(),
            parents: HashMap::new(),
            guids: HashMap::new(),
            root,
            next_id: 1,
        }
    }

    /// The root group's id.
    pub fn root(&self) -> EntryId {
        self.root
    }

    fn mint_id(&mut self) -> EntryId {
        let id = EntryId::new(self.next_id);
        self.next_id += 1;
        id
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Look up a group entry. `None` if the id does not resolve to a group.
    pub fn group(&self, id: EntryId) -> Option<&GroupEntry> {
        self.groups.get(&id)
    }

    /// Look up an instance entry.
    pub fn instance(&self, id: EntryId) -> Option<&InstanceEntry> {
        self.instances.get(&id)
    }

    /// Find an instance by guid.
    pub fn find_instance(&self, guid: &Guid) -> Option<EntryId> {
        self.guids.get(guid).copied()
    }

    /// Parent of an entry. `None` for the root or an unknown id.
    pub fn parent(&self, id: EntryId) -> Option<EntryId> {
        self.parents.get(&id).copied()
    }

    /// Number of groups, including the root.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Number of instances.
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Create a group entry under `parent`, appended to its child list.
    ///
    /// Returns `None` if `parent` does not resolve to a group.
    pub fn create_group_entry(&mut self, parent: EntryId, name: impl Into<String>) -> Option<EntryId> {
        if !self.groups.contains_key(&parent) {
            return None;
        }
        let id = self.mint_id();
        self.groups.insert(id, GroupEntry::new(name));
        self.parents.insert(id, parent);
        self.groups
            .get_mut(&parent)
            .expect("parent checked above")
            .child_groups
            .push(id);
        Some(id)
    }

    /// Create an instance entry under `parent` with a freshly minted guid.
    ///
    /// Returns `None` if `parent` does not resolve to a group.
    pub fn create_instance_entry(
        &mut self,
        parent: EntryId,
        name: impl Into<String>,
        primary_type_name: impl Into<String>,
    ) -> Option<EntryId> {
        if !self.groups.contains_key(&parent) {
            return None;
        }
        let guid = Guid::new();
        let id = self.mint_id();
        self.instances
            .insert(id, InstanceEntry::new(name, guid, primary_type_name));
        self.parents.insert(id, parent);
        self.guids.insert(guid, id);
        self.groups
            .get_mut(&parent)
            .expect("parent checked above")
            .child_instances
            .push(id);
        Some(id)
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Remove a group and its whole subtree. Returns `false` if the id does
    /// not resolve or names the root (the root cannot be removed).
    pub fn remove_group(&mut self, id: EntryId) -> bool {
        if id == self.root || !self.groups.contains_key(&id) {
            return false;
        }
        self.detach(id, true);
        self.drop_group_subtree(id);
        true
    }

    /// Remove an instance. Returns `false` if the id does not resolve.
    pub fn remove_instance(&mut self, id: EntryId) -> bool {
        if !self.instances.contains_key(&id) {
            return false;
        }
        self.detach(id, false);
        self.drop_instance(id);
        true
    }

    /// Drop one data block reference from an instance. Returns `false` if
    /// the instance or key does not exist. The underlying bytes are not
    /// freed; that is reclaimed by compaction.
    pub fn remove_data_block(&mut self, id: EntryId, key: &str) -> bool {
        match self.instances.get_mut(&id) {
            Some(inst) => inst.data_blocks.remove(key).is_some(),
            None => false,
        }
    }

    fn detach(&mut self, id: EntryId, is_group: bool) {
        if let Some(parent) = self.parents.remove(&id) {
            if let Some(group) = self.groups.get_mut(&parent) {
                let list = if is_group {
                    &mut group.child_groups
                } else {
                    &mut group.child_instances
                };
                list.retain(|&child| child != id);
            }
        }
    }

    fn drop_group_subtree(&mut self, id: EntryId) {
        let Some(group) = self.groups.remove(&id) else {
            return;
        };
        for child in group.child_instances {
            self.parents.remove(&child);
            self.drop_instance(child);
        }
        for child in group.child_groups {
            self.parents.remove(&child);
            self.drop_group_subtree(child);
        }
    }

    fn drop_instance(&mut self, id: EntryId) {
        if let Some(inst) = self.instances.remove(&id) {
            self.guids.remove(&inst.guid);
        }
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Rename a group. Returns `false` if the id does not resolve.
    pub fn rename_group(&mut self, id: EntryId, name: impl Into<String>) -> bool {
        match self.groups.get_mut(&id) {
            Some(group) => {
                group.name = name.into();
                true
            }
            None => false,
        }
    }

    /// Rename an instance. Returns `false` if the id does not resolve.
    pub fn rename_instance(&mut self, id: EntryId, name: impl Into<String>) -> bool {
        match self.instances.get_mut(&id) {
            Some(inst) => {
                inst.name = name.into();
                true
            }
            None => false,
        }
    }

    /// Point an instance's object header at a block. Returns `false` if the
    /// id does not resolve.
    pub fn set_object_block(&mut self, id: EntryId, block: BlockEntry) -> bool {
        match self.instances.get_mut(&id) {
            Some(inst) => {
                inst.object_block = Some(block);
                true
            }
            None => false,
        }
    }

    /// Insert or replace a named data block reference on an instance.
    /// Returns `false` if the id does not resolve.
    pub fn insert_data_block(&mut self, id: EntryId, key: impl Into<String>, block: BlockEntry) -> bool {
        match self.instances.get_mut(&id) {
            Some(inst) => {
                inst.data_blocks.insert(key.into(), block);
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Reachability
    // -----------------------------------------------------------------------

    /// All instances in the subtree rooted at `group`, depth-first.
    pub fn instances_under(&self, group: EntryId) -> Vec<EntryId> {
        let mut out = Vec::new();
        self.collect_instances(group, &mut out);
        out
    }

    fn collect_instances(&self, group: EntryId, out: &mut Vec<EntryId>) {
        let Some(entry) = self.groups.get(&group) else {
            return;
        };
        out.extend(&entry.child_instances);
        for &child in &entry.child_groups {
            self.collect_instances(child, out);
        }
    }

    /// All block ids reachable from the root, in depth-first encounter
    /// order, de-duplicated, unassigned ids excluded. This is the compactor's
    /// liveness set.
    pub fn reachable_blocks(&self) -> Vec<BlockId> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        self.walk_blocks(self.root, &mut |block_id| {
            if !block_id.is_unassigned() && seen.insert(block_id) {
                out.push(block_id);
            }
        });
        out
    }

    fn walk_blocks(&self, group: EntryId, visit: &mut impl FnMut(BlockId)) {
        let Some(entry) = self.groups.get(&group) else {
            return;
        };
        for &inst_id in &entry.child_instances {
            if let Some(inst) = self.instances.get(&inst_id) {
                if let Some(block) = &inst.object_block {
                    visit(block.block_id);
                }
                for block in inst.data_blocks.values() {
                    visit(block.block_id);
                }
            }
        }
        for &child in &entry.child_groups {
            self.walk_blocks(child, visit);
        }
    }

    /// Rewrite every block reference through `map`. References missing from
    /// the map are left untouched. Used by the compactor after copying
    /// blocks into the new store.
    pub fn remap_blocks(&mut self, map: &HashMap<BlockId, BlockId>) {
        for inst in self.instances.values_mut() {
            if let Some(block) = &mut inst.object_block {
                if let Some(&new_id) = map.get(&block.block_id) {
                    block.block_id = new_id;
                }
            }
            for block in inst.data_blocks.values_mut() {
                if let Some(&new_id) = map.get(&block.block_id) {
                    block.block_id = new_id;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------------

    /// Serialize the tree depth-first: magic, version, then the nested node
    /// image of every owned collection.
    pub fn to_bytes(&self) -> RegistryResult<Vec<u8>> {
        let image = self.build_node(self.root);
        let payload =
            bincode::serialize(&image).map_err(|e| RegistryError::Serialization(e.to_string()))?;
        let mut buf = Vec::with_capacity(8 + payload.len());
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&REGISTRY_VERSION.to_be_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Deserialize a registry image, rebuilding the arena.
    ///
    /// Rejects images with the wrong magic or a version tag that does not
    /// match [`REGISTRY_VERSION`], and images that violate guid uniqueness —
    /// a corrupt registry is never partially trusted.
    pub fn from_bytes(data: &[u8]) -> RegistryResult<Self> {
        if data.len() < 8 {
            return Err(RegistryError::CorruptImage("too short".into()));
        }
        if &data[0..4] != MAGIC {
            return Err(RegistryError::InvalidMagic {
                expected: "CSKR".into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let version = u32::from_be_bytes(data[4..8].try_into().expect("length checked"));
        if version != REGISTRY_VERSION {
            return Err(RegistryError::UnsupportedVersion(version));
        }
        let image: GroupNode = bincode::deserialize(&data[8..])
            .map_err(|e| RegistryError::Serialization(e.to_string()))?;

        let mut registry = Registry::new(image.name.clone());
        let root = registry.root;
        registry.load_node(root, &image)?;
        Ok(registry)
    }

    fn build_node(&self, id: EntryId) -> GroupNode {
        let group = self.groups.get(&id).expect("tree has no dangling group ids");
        GroupNode {
            name: group.name.clone(),
            instances: group
                .child_instances
                .iter()
                .map(|inst_id| {
                    let inst = self
                        .instances
                        .get(inst_id)
                        .expect("tree has no dangling instance ids");
                    InstanceNode {
                        name: inst.name.clone(),
                        guid: inst.guid,
                        primary_type_name: inst.primary_type_name.clone(),
                        object_block: inst.object_block.map(|b| b.block_id),
                        data_blocks: inst
                            .data_blocks
                            .iter()
                            .map(|(k, v)| (k.clone(), v.block_id))
                            .collect(),
                    }
                })
                .collect(),
            groups: self
                .groups
                .get(&id)
                .expect("checked above")
                .child_groups
                .iter()
                .map(|&child| self.build_node(child))
                .collect(),
        }
    }

    fn load_node(&mut self, target: EntryId, node: &GroupNode) -> RegistryResult<()> {
        for inst_node in &node.instances {
            if self.guids.contains_key(&inst_node.guid) {
                return Err(RegistryError::DuplicateGuid(inst_node.guid));
            }
            let id = self.mint_id();
            let mut inst = InstanceEntry::new(
                inst_node.name.clone(),
                inst_node.guid,
                inst_node.primary_type_name.clone(),
            );
            inst.object_block = inst_node.object_block.map(BlockEntry::new);
            inst.data_blocks = inst_node
                .data_blocks
                .iter()
                .map(|(k, v)| (k.clone(), BlockEntry::new(*v)))
                .collect();
            self.instances.insert(id, inst);
            self.parents.insert(id, target);
            self.guids.insert(inst_node.guid, id);
            self.groups
                .get_mut(&target)
                .expect("target group exists")
                .child_instances
                .push(id);
        }
        for group_node in &node.groups {
            let id = self.mint_id();
            self.groups.insert(id, GroupEntry::new(group_node.name.clone()));
            self.parents.insert(id, target);
            self.groups
                .get_mut(&target)
                .expect("target group exists")
                .child_groups
                .push(id);
            self.load_node(id, group_node)?;
        }
        Ok(())
    }
}

/// Depth-first serialized form of a group and everything it owns.
#[derive(Serialize, Deserialize)]
struct GroupNode {
    name: String,
    instances: Vec<InstanceNode>,
    groups: Vec<GroupNode>,
}

#[derive(Serialize, Deserialize)]
struct InstanceNode {
    name: String,
    guid: Guid,
    primary_type_name: String,
    object_block: Option<BlockId>,
    data_blocks: BTreeMap<String, BlockId>,
}
