use std::collections::HashMap;

use tracing::{debug, warn};

use cask_provider::{Provider, ProviderError};
use cask_registry::EntryId;
use cask_store::StoreError;
use cask_txn::TxnError;

use crate::handle::{HandleTable, Target};
use crate::message::{CaskMessage, EntryInfo, WireErrorKind, PROTOCOL_VERSION};

struct OpenStream {
    bytes: Vec<u8>,
    pos: usize,
}

/// Protocol server: dispatches wire messages against one provider.
///
/// One request in, one response out; every response is a [`CaskMessage`],
/// errors included, so the transport never has to represent failure itself.
/// Stale handles and unknown guids answer `NotFound` rather than tearing
/// down the session.
pub struct CaskServer<P: Provider> {
    provider: P,
    handles: HandleTable,
    streams: HashMap<u64, OpenStream>,
    next_stream: u64,
}

impl<P: Provider> CaskServer<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            handles: HandleTable::new(),
            streams: HashMap::new(),
            next_stream: 0,
        }
    }

    /// Shared access to the provider, for callers hosting the server
    /// in-process.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Dispatch one request and produce its response.
    pub fn handle_message(&mut self, request: CaskMessage) -> CaskMessage {
        debug!(request = request.type_name(), "dispatching");
        match request {
            CaskMessage::Hello { version } => {
                if version != PROTOCOL_VERSION {
                    error(
                        WireErrorKind::CorruptFormat,
                        format!("unsupported protocol version {version}"),
                    )
                } else {
                    CaskMessage::HelloAck { version: PROTOCOL_VERSION }
                }
            }

            CaskMessage::GetRootGroup => {
                let root = self.provider.root_group();
                CaskMessage::Handle {
                    handle: self.handles.mint(Target::Group(root)),
                }
            }

            CaskMessage::GetChildGroups { group } => match self.resolve_group(group) {
                Ok(id) => {
                    let children = self.provider.child_groups(id).unwrap_or_default();
                    CaskMessage::EntryList {
                        entries: self.mint_entries(children, Target::Group),
                    }
                }
                Err(e) => e,
            },

            CaskMessage::GetChildInstances { group } => match self.resolve_group(group) {
                Ok(id) => {
                    let children = self.provider.child_instances(id).unwrap_or_default();
                    CaskMessage::EntryList {
                        entries: self.mint_entries(children, Target::Instance),
                    }
                }
                Err(e) => e,
            },

            CaskMessage::GetName { handle } => match self.resolve_any(handle) {
                Ok(Target::Group(id)) => match self.provider.group_name(id) {
                    Some(name) => CaskMessage::Name { name },
                    None => not_found("group removed"),
                },
                Ok(Target::Instance(id)) => match self.provider.instance_name(id) {
                    Some(name) => CaskMessage::Name { name },
                    None => not_found("instance removed"),
                },
                Err(e) => e,
            },

            CaskMessage::GetTypeName { instance } => match self.resolve_instance(instance) {
                Ok(id) => match self.provider.instance_type(id) {
                    Some(name) => CaskMessage::Name { name },
                    None => not_found("instance removed"),
                },
                Err(e) => e,
            },

            CaskMessage::GetGuid { instance } => match self.resolve_instance(instance) {
                Ok(id) => match self.provider.instance_guid(id) {
                    Some(guid) => CaskMessage::GuidValue { guid },
                    None => not_found("instance removed"),
                },
                Err(e) => e,
            },

            CaskMessage::FindInstance { guid } => {
                let handle = self
                    .provider
                    .find_instance(&guid)
                    .map(|id| self.handles.mint(Target::Instance(id)));
                CaskMessage::OptionalHandle { handle }
            }

            CaskMessage::ListDataKeys { instance } => match self.resolve_instance(instance) {
                Ok(id) => match self.provider.data_keys(id) {
                    Some(keys) => CaskMessage::Keys { keys },
                    None => not_found("instance removed"),
                },
                Err(e) => e,
            },

            CaskMessage::CreateGroup { parent, name } => match self.resolve_group(parent) {
                Ok(id) => match self.provider.create_group(id, &name) {
                    Ok(Some(child)) => CaskMessage::Handle {
                        handle: self.handles.mint(Target::Group(child)),
                    },
                    Ok(None) => not_found("parent group removed"),
                    Err(e) => provider_error(&e),
                },
                Err(e) => e,
            },

            CaskMessage::CreateInstance { parent, name, type_name } => {
                match self.resolve_group(parent) {
                    Ok(id) => match self.provider.create_instance(id, &name, &type_name) {
                        Ok(Some(child)) => CaskMessage::Handle {
                            handle: self.handles.mint(Target::Instance(child)),
                        },
                        Ok(None) => not_found("parent group removed"),
                        Err(e) => provider_error(&e),
                    },
                    Err(e) => e,
                }
            }

            CaskMessage::RenameEntry { handle, name } => match self.resolve_any(handle) {
                Ok(Target::Group(id)) => {
                    bool_response(self.provider_mut().rename_group(id, &name))
                }
                Ok(Target::Instance(id)) => {
                    bool_response(self.provider_mut().rename_instance(id, &name))
                }
                Err(e) => e,
            },

            CaskMessage::RemoveEntry { handle } => match self.resolve_any(handle) {
                Ok(Target::Group(id)) => bool_response(self.provider_mut().remove_group(id)),
                Ok(Target::Instance(id)) => {
                    bool_response(self.provider_mut().remove_instance(id))
                }
                Err(e) => e,
            },

            CaskMessage::WriteObject { instance, bytes } => match self.resolve_instance(instance) {
                Ok(id) => bool_response(self.provider_mut().write_object(id, bytes)),
                Err(e) => e,
            },

            CaskMessage::ReadObject { instance } => match self.resolve_instance(instance) {
                Ok(id) => match self.provider.read_object(id) {
                    Ok(bytes) => CaskMessage::OptionalBytes { bytes },
                    Err(e) => provider_error(&e),
                },
                Err(e) => e,
            },

            CaskMessage::WriteData { instance, key, bytes } => {
                match self.resolve_instance(instance) {
                    Ok(id) => bool_response(self.provider_mut().write_data(id, &key, bytes)),
                    Err(e) => e,
                }
            }

            CaskMessage::ReadData { instance, key } => match self.resolve_instance(instance) {
                Ok(id) => match self.provider.read_data(id, &key) {
                    Ok(bytes) => CaskMessage::OptionalBytes { bytes },
                    Err(e) => provider_error(&e),
                },
                Err(e) => e,
            },

            CaskMessage::RemoveData { instance, key } => match self.resolve_instance(instance) {
                Ok(id) => bool_response(self.provider_mut().remove_data(id, &key)),
                Err(e) => e,
            },

            CaskMessage::OpenDataStream { instance, key, start, end } => {
                match self.resolve_instance(instance) {
                    Ok(id) => self.open_stream(id, &key, start, end),
                    Err(e) => e,
                }
            }

            CaskMessage::ReadStream { stream, max } => {
                let Some(open) = self.streams.get_mut(&stream) else {
                    return not_found("unknown stream handle");
                };
                let want = (max as usize).min(open.bytes.len() - open.pos);
                let chunk = open.bytes[open.pos..open.pos + want].to_vec();
                open.pos += want;
                CaskMessage::StreamChunk {
                    bytes: chunk,
                    eof: open.pos == open.bytes.len(),
                }
            }

            CaskMessage::GetStreamStat { stream } => match self.streams.get(&stream) {
                Some(open) => CaskMessage::StreamStat {
                    remaining: (open.bytes.len() - open.pos) as u64,
                },
                None => not_found("unknown stream handle"),
            },

            CaskMessage::CloseStream { stream } => {
                if self.streams.remove(&stream).is_none() {
                    not_found("unknown stream handle")
                } else {
                    CaskMessage::Ack
                }
            }

            CaskMessage::Commit => match self.provider_mut().commit() {
                Ok(()) => CaskMessage::Ack,
                Err(e) => {
                    warn!(error = %e, "remote commit failed");
                    provider_error(&e)
                }
            },

            CaskMessage::Revert => {
                self.provider_mut().revert();
                CaskMessage::Ack
            }

            CaskMessage::GetEvent { seq } => CaskMessage::Event {
                event: self.provider.get_event(seq),
            },

            other => error(
                WireErrorKind::CorruptFormat,
                format!("{} is not a request", other.type_name()),
            ),
        }
    }

    fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    fn resolve_any(&self, handle: u64) -> Result<Target, CaskMessage> {
        self.handles
            .resolve(handle)
            .ok_or_else(|| not_found("unknown handle"))
    }

    fn resolve_group(&self, handle: u64) -> Result<EntryId, CaskMessage> {
        match self.resolve_any(handle)? {
            Target::Group(id) if self.provider.group_name(id).is_some() => Ok(id),
            Target::Group(_) => Err(not_found("group removed")),
            Target::Instance(_) => Err(not_found("handle names an instance, not a group")),
        }
    }

    fn resolve_instance(&self, handle: u64) -> Result<EntryId, CaskMessage> {
        match self.resolve_any(handle)? {
            Target::Instance(id) if self.provider.instance_name(id).is_some() => Ok(id),
            Target::Instance(_) => Err(not_found("instance removed")),
            Target::Group(_) => Err(not_found("handle names a group, not an instance")),
        }
    }

    fn mint_entries(
        &mut self,
        children: Vec<(String, EntryId)>,
        wrap: fn(EntryId) -> Target,
    ) -> Vec<EntryInfo> {
        children
            .into_iter()
            .map(|(name, id)| EntryInfo {
                name,
                handle: self.handles.mint(wrap(id)),
            })
            .collect()
    }


    fn open_stream(&mut self, id: EntryId, key: &str, start: u64, end: u64) -> CaskMessage {
        let bytes = match self.provider.read_data(id, key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return not_found("no committed data for key"),
            Err(e) => return provider_error(&e),
        };
        if start > end || end > bytes.len() as u64 {
            return error(
                WireErrorKind::IoError,
                format!("range {start}..{end} out of bounds for {} bytes", bytes.len()),
            );
        }
        let window = bytes[start as usize..end as usize].to_vec();
        let len = window.len() as u64;
        let stream = self.next_stream;
        self.next_stream += 1;
        self.streams.insert(stream, OpenStream { bytes: window, pos: 0 });
        CaskMessage::StreamOpened { stream, len }
    }
}

fn error(kind: WireErrorKind, message: impl Into<String>) -> CaskMessage {
    CaskMessage::Error {
        kind,
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> CaskMessage {
    error(WireErrorKind::NotFound, message)
}

fn bool_response(result: Result<bool, ProviderError>) -> CaskMessage {
    match result {
        Ok(true) => CaskMessage::Ack,
        Ok(false) => not_found("entry removed"),
        Err(e) => provider_error(&e),
    }
}

/// Map a provider failure onto the wire taxonomy.
fn provider_error(e: &ProviderError) -> CaskMessage {
    let kind = match e {
        ProviderError::Txn(TxnError::Aborted { .. }) => WireErrorKind::TransactionAborted,
        ProviderError::Txn(_) => WireErrorKind::IoError,
        ProviderError::Registry(_) => WireErrorKind::CorruptFormat,
        ProviderError::Store(StoreError::Io(_)) => WireErrorKind::IoError,
        ProviderError::Store(_) => WireErrorKind::CorruptFormat,
        ProviderError::TransactionInProgress => WireErrorKind::IoError,
        ProviderError::Io(_) => WireErrorKind::IoError,
    };
    error(kind, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cask_provider::LocalProvider;

    fn server() -> (tempfile::TempDir, CaskServer<LocalProvider>) {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::create(dir.path(), "Root").unwrap();
        (dir, CaskServer::new(provider))
    }

    fn root_handle<P: Provider>(server: &mut CaskServer<P>) -> u64 {
        match server.handle_message(CaskMessage::GetRootGroup) {
            CaskMessage::Handle { handle } => handle,
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn hello_handshake() {
        let (_dir, mut server) = server();
        let resp = server.handle_message(CaskMessage::Hello { version: PROTOCOL_VERSION });
        assert!(matches!(resp, CaskMessage::HelloAck { version: PROTOCOL_VERSION }));

        let resp = server.handle_message(CaskMessage::Hello { version: 99 });
        assert!(matches!(
            resp,
            CaskMessage::Error { kind: WireErrorKind::CorruptFormat, .. }
        ));
    }

    #[test]
    fn created_group_is_visible_before_commit() {
        let (_dir, mut server) = server();
        let root = root_handle(&mut server);

        let created = server.handle_message(CaskMessage::CreateGroup {
            parent: root,
            name: "Models".into(),
        });
        let CaskMessage::Handle { handle } = created else {
            panic!("unexpected response {created:?}");
        };

        // Listing the same session sees the uncommitted group.
        let listed = server.handle_message(CaskMessage::GetChildGroups { group: root });
        let CaskMessage::EntryList { entries } = listed else {
            panic!("unexpected response {listed:?}");
        };
        assert_eq!(entries, vec![EntryInfo { name: "Models".into(), handle }]);
    }

    #[test]
    fn root_handle_is_stable() {
        let (_dir, mut server) = server();
        assert_eq!(root_handle(&mut server), root_handle(&mut server));
    }

    #[test]
    fn stale_handle_is_not_found() {
        let (_dir, mut server) = server();
        let root = root_handle(&mut server);
        let resp = server.handle_message(CaskMessage::CreateInstance {
            parent: root,
            name: "Doomed".into(),
            type_name: "Part".into(),
        });
        let CaskMessage::Handle { handle } = resp else {
            panic!("unexpected response {resp:?}");
        };
        assert!(matches!(
            server.handle_message(CaskMessage::RemoveEntry { handle }),
            CaskMessage::Ack
        ));

        // Handle still exists in the table, but the entry is gone.
        let resp = server.handle_message(CaskMessage::GetName { handle });
        assert!(matches!(
            resp,
            CaskMessage::Error { kind: WireErrorKind::NotFound, .. }
        ));
        let resp = server.handle_message(CaskMessage::WriteData {
            instance: handle,
            key: "Data".into(),
            bytes: vec![1],
        });
        assert!(matches!(
            resp,
            CaskMessage::Error { kind: WireErrorKind::NotFound, .. }
        ));
    }

    #[test]
    fn unknown_handle_is_not_found() {
        let (_dir, mut server) = server();
        let resp = server.handle_message(CaskMessage::GetName { handle: 999 });
        assert!(matches!(
            resp,
            CaskMessage::Error { kind: WireErrorKind::NotFound, .. }
        ));
    }

    #[test]
    fn group_handle_rejected_where_instance_expected() {
        let (_dir, mut server) = server();
        let root = root_handle(&mut server);
        let resp = server.handle_message(CaskMessage::ReadObject { instance: root });
        assert!(matches!(
            resp,
            CaskMessage::Error { kind: WireErrorKind::NotFound, .. }
        ));
    }

    #[test]
    fn write_read_cycle_over_the_wire() {
        let (_dir, mut server) = server();
        let root = root_handle(&mut server);
        let CaskMessage::Handle { handle: inst } = server.handle_message(CaskMessage::CreateInstance {
            parent: root,
            name: "Foo".into(),
            type_name: "Part".into(),
        }) else {
            panic!("create failed");
        };

        // Repeated writes before the commit; only the last one matters.
        for payload in [b"v1".as_slice(), b"v2", b"v3"] {
            let resp = server.handle_message(CaskMessage::WriteData {
                instance: inst,
                key: "Data".into(),
                bytes: payload.to_vec(),
            });
            assert!(matches!(resp, CaskMessage::Ack));
        }
        assert!(matches!(server.handle_message(CaskMessage::Commit), CaskMessage::Ack));

        let resp = server.handle_message(CaskMessage::ReadData {
            instance: inst,
            key: "Data".into(),
        });
        let CaskMessage::OptionalBytes { bytes } = resp else {
            panic!("unexpected response {resp:?}");
        };
        assert_eq!(bytes.unwrap(), b"v3");
    }

    #[test]
    fn revert_over_the_wire() {
        let (_dir, mut server) = server();
        let root = root_handle(&mut server);
        server.handle_message(CaskMessage::CreateGroup {
            parent: root,
            name: "Doomed".into(),
        });
        assert!(matches!(server.handle_message(CaskMessage::Revert), CaskMessage::Ack));

        let CaskMessage::EntryList { entries } =
            server.handle_message(CaskMessage::GetChildGroups { group: root })
        else {
            panic!("listing failed");
        };
        assert!(entries.is_empty());
    }

    #[test]
    fn find_instance_by_guid() {
        let (_dir, mut server) = server();
        let root = root_handle(&mut server);
        let CaskMessage::Handle { handle: inst } = server.handle_message(CaskMessage::CreateInstance {
            parent: root,
            name: "Foo".into(),
            type_name: "Part".into(),
        }) else {
            panic!("create failed");
        };
        let CaskMessage::GuidValue { guid } =
            server.handle_message(CaskMessage::GetGuid { instance: inst })
        else {
            panic!("guid fetch failed");
        };

        let resp = server.handle_message(CaskMessage::FindInstance { guid });
        assert!(matches!(resp, CaskMessage::OptionalHandle { handle: Some(h) } if h == inst));

        let resp = server.handle_message(CaskMessage::FindInstance {
            guid: cask_types::Guid::new(),
        });
        assert!(matches!(resp, CaskMessage::OptionalHandle { handle: None }));
    }

    #[test]
    fn stream_chunks_until_eof() {
        let (_dir, mut server) = server();
        let root = root_handle(&mut server);
        let CaskMessage::Handle { handle: inst } = server.handle_message(CaskMessage::CreateInstance {
            parent: root,
            name: "Foo".into(),
            type_name: "Part".into(),
        }) else {
            panic!("create failed");
        };
        server.handle_message(CaskMessage::WriteData {
            instance: inst,
            key: "Data".into(),
            bytes: b"0123456789".to_vec(),
        });
        server.handle_message(CaskMessage::Commit);

        let CaskMessage::StreamOpened { stream, len } =
            server.handle_message(CaskMessage::OpenDataStream {
                instance: inst,
                key: "Data".into(),
                start: 2,
                end: 9,
            })
        else {
            panic!("open failed");
        };
        assert_eq!(len, 7);

        let mut collected = Vec::new();
        loop {
            let CaskMessage::StreamChunk { bytes, eof } =
                server.handle_message(CaskMessage::ReadStream { stream, max: 3 })
            else {
                panic!("read failed");
            };
            collected.extend_from_slice(&bytes);
            if eof {
                break;
            }
        }
        assert_eq!(collected, b"2345678");
        assert!(matches!(
            server.handle_message(CaskMessage::CloseStream { stream }),
            CaskMessage::Ack
        ));
        assert!(matches!(
            server.handle_message(CaskMessage::ReadStream { stream, max: 1 }),
            CaskMessage::Error { kind: WireErrorKind::NotFound, .. }
        ));
    }

    #[test]
    fn stream_stat_reports_remaining() {
        let (_dir, mut server) = server();
        let root = root_handle(&mut server);
        let CaskMessage::Handle { handle: inst } = server.handle_message(CaskMessage::CreateInstance {
            parent: root,
            name: "Foo".into(),
            type_name: "Part".into(),
        }) else {
            panic!("create failed");
        };
        server.handle_message(CaskMessage::WriteData {
            instance: inst,
            key: "Data".into(),
            bytes: b"0123456789".to_vec(),
        });
        server.handle_message(CaskMessage::Commit);

        let CaskMessage::StreamOpened { stream, .. } =
            server.handle_message(CaskMessage::OpenDataStream {
                instance: inst,
                key: "Data".into(),
                start: 0,
                end: 10,
            })
        else {
            panic!("open failed");
        };

        assert!(matches!(
            server.handle_message(CaskMessage::GetStreamStat { stream }),
            CaskMessage::StreamStat { remaining: 10 }
        ));
        server.handle_message(CaskMessage::ReadStream { stream, max: 4 });
        assert!(matches!(
            server.handle_message(CaskMessage::GetStreamStat { stream }),
            CaskMessage::StreamStat { remaining: 6 }
        ));

        server.handle_message(CaskMessage::CloseStream { stream });
        assert!(matches!(
            server.handle_message(CaskMessage::GetStreamStat { stream }),
            CaskMessage::Error { kind: WireErrorKind::NotFound, .. }
        ));
    }

    #[test]
    fn stream_range_out_of_bounds() {
        let (_dir, mut server) = server();
        let root = root_handle(&mut server);
        let CaskMessage::Handle { handle: inst } = server.handle_message(CaskMessage::CreateInstance {
            parent: root,
            name: "Foo".into(),
            type_name: "Part".into(),
        }) else {
            panic!("create failed");
        };
        server.handle_message(CaskMessage::WriteData {
            instance: inst,
            key: "Data".into(),
            bytes: b"short".to_vec(),
        });
        server.handle_message(CaskMessage::Commit);

        let resp = server.handle_message(CaskMessage::OpenDataStream {
            instance: inst,
            key: "Data".into(),
            start: 0,
            end: 100,
        });
        assert!(matches!(resp, CaskMessage::Error { kind: WireErrorKind::IoError, .. }));
    }

    #[test]
    fn events_polled_over_the_wire() {
        let (_dir, mut server) = server();
        let root = root_handle(&mut server);
        server.handle_message(CaskMessage::CreateGroup { parent: root, name: "G".into() });

        let CaskMessage::Event { event } = server.handle_message(CaskMessage::GetEvent { seq: 0 })
        else {
            panic!("event poll failed");
        };
        assert!(event.is_none());

        server.handle_message(CaskMessage::Commit);
        let CaskMessage::Event { event } = server.handle_message(CaskMessage::GetEvent { seq: 0 })
        else {
            panic!("event poll failed");
        };
        assert_eq!(event, Some(cask_provider::ChangeEvent::GroupAdded { name: "G".into() }));
    }

    #[test]
    fn response_messages_are_rejected_as_requests() {
        let (_dir, mut server) = server();
        let resp = server.handle_message(CaskMessage::Ack);
        assert!(matches!(
            resp,
            CaskMessage::Error { kind: WireErrorKind::CorruptFormat, .. }
        ));
    }
}
