use cask_provider::ChangeEvent;
use cask_types::Guid;

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{CaskMessage, EntryInfo, PROTOCOL_VERSION};
use crate::transport::Transport;

/// Typed client over any [`Transport`].
///
/// Handles are opaque server-minted integers; the client never interprets
/// them. A `NotFound` from the server (stale handle, unknown guid or key)
/// comes back as [`ProtocolError::Remote`].
pub struct RemoteClient<T: Transport> {
    transport: T,
}

impl<T: Transport> RemoteClient<T> {
    /// Perform the version handshake and return a ready client.
    pub fn connect(mut transport: T) -> ProtocolResult<Self> {
        let resp = transport.call(&CaskMessage::Hello { version: PROTOCOL_VERSION })?;
        match resp {
            CaskMessage::HelloAck { .. } => Ok(Self { transport }),
            other => Err(unexpected("HelloAck", other)),
        }
    }

    fn call(&mut self, request: CaskMessage) -> ProtocolResult<CaskMessage> {
        let resp = self.transport.call(&request)?;
        if let CaskMessage::Error { kind, message } = resp {
            return Err(ProtocolError::Remote { kind, message });
        }
        Ok(resp)
    }

    fn call_handle(&mut self, request: CaskMessage) -> ProtocolResult<u64> {
        match self.call(request)? {
            CaskMessage::Handle { handle } => Ok(handle),
            other => Err(unexpected("Handle", other)),
        }
    }

    fn call_ack(&mut self, request: CaskMessage) -> ProtocolResult<()> {
        match self.call(request)? {
            CaskMessage::Ack => Ok(()),
            other => Err(unexpected("Ack", other)),
        }
    }

    fn call_name(&mut self, request: CaskMessage) -> ProtocolResult<String> {
        match self.call(request)? {
            CaskMessage::Name { name } => Ok(name),
            other => Err(unexpected("Name", other)),
        }
    }

    fn call_bytes(&mut self, request: CaskMessage) -> ProtocolResult<Option<Vec<u8>>> {
        match self.call(request)? {
            CaskMessage::OptionalBytes { bytes } => Ok(bytes),
            other => Err(unexpected("OptionalBytes", other)),
        }
    }

    fn call_entries(&mut self, request: CaskMessage) -> ProtocolResult<Vec<EntryInfo>> {
        match self.call(request)? {
            CaskMessage::EntryList { entries } => Ok(entries),
            other => Err(unexpected("EntryList", other)),
        }
    }

    // -----------------------------------------------------------------------
    // Structure
    // -----------------------------------------------------------------------

    pub fn root_group(&mut self) -> ProtocolResult<u64> {
        self.call_handle(CaskMessage::GetRootGroup)
    }

    pub fn child_groups(&mut self, group: u64) -> ProtocolResult<Vec<EntryInfo>> {
        self.call_entries(CaskMessage::GetChildGroups { group })
    }

    pub fn child_instances(&mut self, group: u64) -> ProtocolResult<Vec<EntryInfo>> {
        self.call_entries(CaskMessage::GetChildInstances { group })
    }

    pub fn name(&mut self, handle: u64) -> ProtocolResult<String> {
        self.call_name(CaskMessage::GetName { handle })
    }

    pub fn type_name(&mut self, instance: u64) -> ProtocolResult<String> {
        self.call_name(CaskMessage::GetTypeName { instance })
    }

    pub fn guid(&mut self, instance: u64) -> ProtocolResult<Guid> {
        match self.call(CaskMessage::GetGuid { instance })? {
            CaskMessage::GuidValue { guid } => Ok(guid),
            other => Err(unexpected("GuidValue", other)),
        }
    }

    pub fn find_instance(&mut self, guid: Guid) -> ProtocolResult<Option<u64>> {
        match self.call(CaskMessage::FindInstance { guid })? {
            CaskMessage::OptionalHandle { handle } => Ok(handle),
            other => Err(unexpected("OptionalHandle", other)),
        }
    }

    pub fn data_keys(&mut self, instance: u64) -> ProtocolResult<Vec<String>> {
        match self.call(CaskMessage::ListDataKeys { instance })? {
            CaskMessage::Keys { keys } => Ok(keys),
            other => Err(unexpected("Keys", other)),
        }
    }

    pub fn create_group(&mut self, parent: u64, name: &str) -> ProtocolResult<u64> {
        self.call_handle(CaskMessage::CreateGroup {
            parent,
            name: name.into(),
        })
    }

    pub fn create_instance(
        &mut self,
        parent: u64,
        name: &str,
        type_name: &str,
    ) -> ProtocolResult<u64> {
        self.call_handle(CaskMessage::CreateInstance {
            parent,
            name: name.into(),
            type_name: type_name.into(),
        })
    }

    pub fn rename(&mut self, handle: u64, name: &str) -> ProtocolResult<()> {
        self.call_ack(CaskMessage::RenameEntry {
            handle,
            name: name.into(),
        })
    }

    pub fn remove(&mut self, handle: u64) -> ProtocolResult<()> {
        self.call_ack(CaskMessage::RemoveEntry { handle })
    }

    // -----------------------------------------------------------------------
    // Bytes
    // -----------------------------------------------------------------------

    pub fn write_object(&mut self, instance: u64, bytes: Vec<u8>) -> ProtocolResult<()> {
        self.call_ack(CaskMessage::WriteObject { instance, bytes })
    }

    pub fn read_object(&mut self, instance: u64) -> ProtocolResult<Option<Vec<u8>>> {
        self.call_bytes(CaskMessage::ReadObject { instance })
    }

    pub fn write_data(&mut self, instance: u64, key: &str, bytes: Vec<u8>) -> ProtocolResult<()> {
        self.call_ack(CaskMessage::WriteData {
            instance,
            key: key.into(),
            bytes,
        })
    }

    pub fn read_data(&mut self, instance: u64, key: &str) -> ProtocolResult<Option<Vec<u8>>> {
        self.call_bytes(CaskMessage::ReadData {
            instance,
            key: key.into(),
        })
    }

    pub fn remove_data(&mut self, instance: u64, key: &str) -> ProtocolResult<()> {
        self.call_ack(CaskMessage::RemoveData {
            instance,
            key: key.into(),
        })
    }

    /// Read `[start, end)` of a committed data block by streaming chunks of
    /// at most `chunk_size` bytes.
    pub fn read_data_range(
        &mut self,
        instance: u64,
        key: &str,
        start: u64,
        end: u64,
        chunk_size: u32,
    ) -> ProtocolResult<Vec<u8>> {
        let (stream, len) = match self.call(CaskMessage::OpenDataStream {
            instance,
            key: key.into(),
            start,
            end,
        })? {
            CaskMessage::StreamOpened { stream, len } => (stream, len),
            other => return Err(unexpected("StreamOpened", other)),
        };

        let mut out = Vec::with_capacity(len as usize);
        loop {
            match self.call(CaskMessage::ReadStream {
                stream,
                max: chunk_size,
            })? {
                CaskMessage::StreamChunk { bytes, eof } => {
                    out.extend_from_slice(&bytes);
                    if eof {
                        break;
                    }
                }
                other => return Err(unexpected("StreamChunk", other)),
            }
        }
        self.call_ack(CaskMessage::CloseStream { stream })?;
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Transactions and events
    // -----------------------------------------------------------------------

    pub fn commit(&mut self) -> ProtocolResult<()> {
        self.call_ack(CaskMessage::Commit)
    }

    pub fn revert(&mut self) -> ProtocolResult<()> {
        self.call_ack(CaskMessage::Revert)
    }

    pub fn get_event(&mut self, seq: u64) -> ProtocolResult<Option<ChangeEvent>> {
        match self.call(CaskMessage::GetEvent { seq })? {
            CaskMessage::Event { event } => Ok(event),
            other => Err(unexpected("Event", other)),
        }
    }
}

fn unexpected(expected: &'static str, got: CaskMessage) -> ProtocolError {
    ProtocolError::UnexpectedResponse {
        expected,
        got: got.type_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::WireErrorKind;
    use crate::transport::LoopbackTransport;
    use cask_provider::{CompactProvider, LocalProvider};

    fn local_client() -> (tempfile::TempDir, RemoteClient<LoopbackTransport<LocalProvider>>) {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::create(dir.path(), "Root").unwrap();
        let client = RemoteClient::connect(LoopbackTransport::new(provider)).unwrap();
        (dir, client)
    }

    #[test]
    fn uncommitted_group_listed_in_same_session() {
        let (_dir, mut client) = local_client();
        let root = client.root_group().unwrap();
        let group = client.create_group(root, "Models").unwrap();

        let listed = client.child_groups(root).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Models");
        assert_eq!(listed[0].handle, group);
    }

    #[test]
    fn full_session_against_local_provider() {
        let (_dir, mut client) = local_client();
        let root = client.root_group().unwrap();
        assert_eq!(client.name(root).unwrap(), "Root");

        let group = client.create_group(root, "Models").unwrap();
        let inst = client.create_instance(group, "Wheel", "Part").unwrap();
        assert_eq!(client.type_name(inst).unwrap(), "Part");

        client.write_object(inst, b"serialized wheel".to_vec()).unwrap();
        client.write_data(inst, "Mesh", b"mesh bytes".to_vec()).unwrap();
        client.commit().unwrap();

        assert_eq!(client.read_object(inst).unwrap().unwrap(), b"serialized wheel");
        assert_eq!(client.read_data(inst, "Mesh").unwrap().unwrap(), b"mesh bytes");
        assert_eq!(client.data_keys(inst).unwrap(), vec!["Mesh".to_string()]);

        let guid = client.guid(inst).unwrap();
        assert_eq!(client.find_instance(guid).unwrap(), Some(inst));

        client.rename(inst, "FrontWheel").unwrap();
        client.commit().unwrap();
        assert_eq!(client.name(inst).unwrap(), "FrontWheel");
    }

    #[test]
    fn full_session_against_compact_provider() {
        let dir = tempfile::tempdir().unwrap();
        let provider = CompactProvider::open(&dir.path().join("db.cask"), "Root").unwrap();
        let mut client = RemoteClient::connect(LoopbackTransport::new(provider)).unwrap();

        let root = client.root_group().unwrap();
        let inst = client.create_instance(root, "Foo", "Part").unwrap();
        client.write_data(inst, "Data", b"payload".to_vec()).unwrap();
        client.commit().unwrap();

        assert_eq!(client.read_data(inst, "Data").unwrap().unwrap(), b"payload");
        assert_eq!(
            client.read_data_range(inst, "Data", 0, 7, 2).unwrap(),
            b"payload"
        );
    }

    #[test]
    fn repeated_writes_then_commit_last_wins() {
        let (_dir, mut client) = local_client();
        let root = client.root_group().unwrap();
        let inst = client.create_instance(root, "Foo", "Part").unwrap();

        for round in 0..4u8 {
            client.write_data(inst, "Data", vec![round; 8]).unwrap();
        }
        client.commit().unwrap();
        assert_eq!(client.read_data(inst, "Data").unwrap().unwrap(), vec![3u8; 8]);
    }

    #[test]
    fn revert_then_nothing_committed() {
        let (_dir, mut client) = local_client();
        let root = client.root_group().unwrap();
        client.create_group(root, "Doomed").unwrap();
        client.revert().unwrap();
        assert!(client.child_groups(root).unwrap().is_empty());
        assert!(client.get_event(0).unwrap().is_none());
    }

    #[test]
    fn stale_handle_surfaces_as_remote_not_found() {
        let (_dir, mut client) = local_client();
        let root = client.root_group().unwrap();
        let inst = client.create_instance(root, "Doomed", "Part").unwrap();
        client.remove(inst).unwrap();

        let err = client.name(inst).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Remote { kind: WireErrorKind::NotFound, .. }
        ));
    }

    #[test]
    fn streamed_range_matches_direct_read() {
        let (_dir, mut client) = local_client();
        let root = client.root_group().unwrap();
        let inst = client.create_instance(root, "Foo", "Part").unwrap();
        let payload: Vec<u8> = (0..10_000u32).map(|b| (b % 251) as u8).collect();
        client.write_data(inst, "Data", payload.clone()).unwrap();
        client.commit().unwrap();

        let got = client.read_data_range(inst, "Data", 100, 9_900, 1_024).unwrap();
        assert_eq!(got, payload[100..9_900]);
    }

    #[test]
    fn events_poll_in_order() {
        let (_dir, mut client) = local_client();
        let root = client.root_group().unwrap();
        let inst = client.create_instance(root, "Foo", "Part").unwrap();
        let guid = client.guid(inst).unwrap();
        client.write_data(inst, "Data", vec![1]).unwrap();
        client.commit().unwrap();

        use cask_provider::ChangeEvent;
        assert_eq!(
            client.get_event(0).unwrap(),
            Some(ChangeEvent::InstanceAdded { guid, name: "Foo".into() })
        );
        assert_eq!(
            client.get_event(1).unwrap(),
            Some(ChangeEvent::DataWritten { guid, key: "Data".into() })
        );
        assert!(client.get_event(2).unwrap().is_none());
    }

    #[test]
    fn remote_edits_persist_for_a_later_direct_open() {
        let dir = tempfile::tempdir().unwrap();
        let guid = {
            let provider = LocalProvider::create(dir.path(), "Root").unwrap();
            let mut client = RemoteClient::connect(LoopbackTransport::new(provider)).unwrap();
            let root = client.root_group().unwrap();
            let inst = client.create_instance(root, "Foo", "Part").unwrap();
            client.write_data(inst, "Data", b"durable".to_vec()).unwrap();
            client.commit().unwrap();
            client.guid(inst).unwrap()
        };

        let provider = LocalProvider::open(dir.path()).unwrap();
        let inst = provider.find_instance(&guid).unwrap();
        assert_eq!(provider.read_data(inst, "Data").unwrap().unwrap(), b"durable");
    }
}
