use cask_registry::EntryId;
use cask_types::Guid;

use crate::bus::ChangeEvent;
use crate::compact::CompactProvider;
use crate::error::ProviderResult;
use crate::local::LocalProvider;

/// Common surface of [`LocalProvider`] and [`CompactProvider`].
///
/// The remote server dispatches over this trait so a database can be served
/// from either backing layout. Structure reads see uncommitted edits; byte
/// reads see committed state only.
pub trait Provider {
    fn root_group(&self) -> EntryId;
    fn group_name(&self, id: EntryId) -> Option<String>;
    fn instance_name(&self, id: EntryId) -> Option<String>;
    fn instance_guid(&self, id: EntryId) -> Option<Guid>;
    fn instance_type(&self, id: EntryId) -> Option<String>;
    fn child_groups(&self, id: EntryId) -> Option<Vec<(String, EntryId)>>;
    fn child_instances(&self, id: EntryId) -> Option<Vec<(String, EntryId)>>;
    fn find_instance(&self, guid: &Guid) -> Option<EntryId>;
    fn data_keys(&self, id: EntryId) -> Option<Vec<String>>;

    fn read_object(&self, id: EntryId) -> ProviderResult<Option<Vec<u8>>>;
    fn read_data(&self, id: EntryId, key: &str) -> ProviderResult<Option<Vec<u8>>>;

    fn create_group(&mut self, parent: EntryId, name: &str) -> ProviderResult<Option<EntryId>>;
    fn create_instance(
        &mut self,
        parent: EntryId,
        name: &str,
        type_name: &str,
    ) -> ProviderResult<Option<EntryId>>;
    fn write_object(&mut self, id: EntryId, bytes: Vec<u8>) -> ProviderResult<bool>;
    fn write_data(&mut self, id: EntryId, key: &str, bytes: Vec<u8>) -> ProviderResult<bool>;
    fn remove_data(&mut self, id: EntryId, key: &str) -> ProviderResult<bool>;
    fn remove_instance(&mut self, id: EntryId) -> ProviderResult<bool>;
    fn remove_group(&mut self, id: EntryId) -> ProviderResult<bool>;
    fn rename_group(&mut self, id: EntryId, name: &str) -> ProviderResult<bool>;
    fn rename_instance(&mut self, id: EntryId, name: &str) -> ProviderResult<bool>;

    fn in_transaction(&self) -> bool;
    fn commit(&mut self) -> ProviderResult<()>;
    fn revert(&mut self);

    fn get_event(&self, seq: u64) -> Option<ChangeEvent>;
    fn next_event_seq(&self) -> u64;
}

macro_rules! delegate_provider {
    ($ty:ty) => {
        impl Provider for $ty {
            fn root_group(&self) -> EntryId {
                Self::root_group(self)
            }
            fn group_name(&self, id: EntryId) -> Option<String> {
                Self::group_name(self, id)
            }
            fn instance_name(&self, id: EntryId) -> Option<String> {
                Self::instance_name(self, id)
            }
            fn instance_guid(&self, id: EntryId) -> Option<Guid> {
                Self::instance_guid(self, id)
            }
            fn instance_type(&self, id: EntryId) -> Option<String> {
                Self::instance_type(self, id)
            }
            fn child_groups(&self, id: EntryId) -> Option<Vec<(String, EntryId)>> {
                Self::child_groups(self, id)
            }
            fn child_instances(&self, id: EntryId) -> Option<Vec<(String, EntryId)>> {
                Self::child_instances(self, id)
            }
            fn find_instance(&self, guid: &Guid) -> Option<EntryId> {
                Self::find_instance(self, guid)
            }
            fn data_keys(&self, id: EntryId) -> Option<Vec<String>> {
                Self::data_keys(self, id)
            }
            fn read_object(&self, id: EntryId) -> ProviderResult<Option<Vec<u8>>> {
                Self::read_object(self, id)
            }
            fn read_data(&self, id: EntryId, key: &str) -> ProviderResult<Option<Vec<u8>>> {
                Self::read_data(self, id, key)
            }
            fn create_group(&mut self, parent: EntryId, name: &str) -> ProviderResult<Option<EntryId>> {
                Self::create_group(self, parent, name)
            }
            fn create_instance(
                &mut self,
                parent: EntryId,
                name: &str,
                type_name: &str,
            ) -> ProviderResult<Option<EntryId>> {
                Self::create_instance(self, parent, name, type_name)
            }
            fn write_object(&mut self, id: EntryId, bytes: Vec<u8>) -> ProviderResult<bool> {
                Self::write_object(self, id, bytes)
            }
            fn write_data(&mut self, id: EntryId, key: &str, bytes: Vec<u8>) -> ProviderResult<bool> {
                Self::write_data(self, id, key, bytes)
            }
            fn remove_data(&mut self, id: EntryId, key: &str) -> ProviderResult<bool> {
                Self::remove_data(self, id, key)
            }
            fn remove_instance(&mut self, id: EntryId) -> ProviderResult<bool> {
                Self::remove_instance(self, id)
            }
            fn remove_group(&mut self, id: EntryId) -> ProviderResult<bool> {
                Self::remove_group(self, id)
            }
            fn rename_group(&mut self, id: EntryId, name: &str) -> ProviderResult<bool> {
                Self::rename_group(self, id, name)
            }
            fn rename_instance(&mut self, id: EntryId, name: &str) -> ProviderResult<bool> {
                Self::rename_instance(self, id, name)
            }
            fn in_transaction(&self) -> bool {
                Self::in_transaction(self)
            }
            fn commit(&mut self) -> ProviderResult<()> {
                Self::commit(self)
            }
            fn revert(&mut self) {
                Self::revert(self)
            }
            fn get_event(&self, seq: u64) -> Option<ChangeEvent> {
                Self::get_event(self, seq)
            }
            fn next_event_seq(&self) -> u64 {
                Self::next_event_seq(self)
            }
        }
    };
}

delegate_provider!(LocalProvider);
delegate_provider!(CompactProvider);

#[cfg(test)]
mod tests {
    use super::*;

    // Both providers must agree on the generic surface.
    fn exercise<P: Provider>(p: &mut P) {
        let root = p.root_group();
        let group = p.create_group(root, "Models").unwrap().unwrap();
        let inst = p.create_instance(group, "Part", "Part").unwrap().unwrap();
        p.write_object(inst, b"obj".to_vec()).unwrap();
        p.write_data(inst, "Mesh", b"mesh".to_vec()).unwrap();
        p.commit().unwrap();

        assert_eq!(p.group_name(group).unwrap(), "Models");
        assert_eq!(p.instance_type(inst).unwrap(), "Part");
        assert_eq!(p.read_object(inst).unwrap().unwrap(), b"obj");
        assert_eq!(p.read_data(inst, "Mesh").unwrap().unwrap(), b"mesh");
        assert_eq!(p.data_keys(inst).unwrap(), vec!["Mesh".to_string()]);

        let guid = p.instance_guid(inst).unwrap();
        assert_eq!(p.find_instance(&guid), Some(inst));

        p.remove_group(group).unwrap();
        p.revert();
        assert_eq!(p.child_groups(root).unwrap().len(), 1);
    }

    #[test]
    fn local_provider_implements_the_trait() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = crate::LocalProvider::create(dir.path(), "Root").unwrap();
        exercise(&mut p);
    }

    #[test]
    fn compact_provider_implements_the_trait() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = crate::CompactProvider::open(&dir.path().join("db.cask"), "Root").unwrap();
        exercise(&mut p);
    }
}
