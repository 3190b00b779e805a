use serde::{Deserialize, Serialize};

use cask_provider::ChangeEvent;
use cask_types::Guid;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Error taxonomy carried over the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireErrorKind {
    /// Underlying storage or transport failure.
    IoError,
    /// Handle, guid or key does not resolve (including stale handles).
    NotFound,
    /// On-disk or on-wire data failed validation.
    CorruptFormat,
    /// A commit failed and was rolled back.
    TransactionAborted,
}

/// All message types in the Cask remote protocol.
///
/// Handles are server-minted opaque integers naming a group or instance;
/// stream handles name an open bounded read. A request that names a removed
/// entry gets a `NotFound` error rather than a crash or a stale answer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CaskMessage {
    Hello { version: u32 },
    HelloAck { version: u32 },

    // Structure reads
    GetRootGroup,
    GetChildGroups { group: u64 },
    GetChildInstances { group: u64 },
    GetName { handle: u64 },
    GetTypeName { instance: u64 },
    GetGuid { instance: u64 },
    FindInstance { guid: Guid },
    ListDataKeys { instance: u64 },

    // Structure mutations
    CreateGroup { parent: u64, name: String },
    CreateInstance { parent: u64, name: String, type_name: String },
    RenameEntry { handle: u64, name: String },
    RemoveEntry { handle: u64 },

    // Byte payloads
    WriteObject { instance: u64, bytes: Vec<u8> },
    ReadObject { instance: u64 },
    WriteData { instance: u64, key: String, bytes: Vec<u8> },
    ReadData { instance: u64, key: String },
    RemoveData { instance: u64, key: String },

    // Bounded streaming reads
    OpenDataStream { instance: u64, key: String, start: u64, end: u64 },
    ReadStream { stream: u64, max: u32 },
    GetStreamStat { stream: u64 },
    CloseStream { stream: u64 },

    // Transaction control
    Commit,
    Revert,

    // Change notifications (poll model)
    GetEvent { seq: u64 },

    // Responses
    Ack,
    Handle { handle: u64 },
    OptionalHandle { handle: Option<u64> },
    EntryList { entries: Vec<EntryInfo> },
    Name { name: String },
    GuidValue { guid: Guid },
    OptionalBytes { bytes: Option<Vec<u8>> },
    Keys { keys: Vec<String> },
    StreamOpened { stream: u64, len: u64 },
    StreamChunk { bytes: Vec<u8>, eof: bool },
    StreamStat { remaining: u64 },
    Event { event: Option<ChangeEvent> },
    Error { kind: WireErrorKind, message: String },
}

/// One named child in a directory listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    pub name: String,
    pub handle: u64,
}

impl CaskMessage {
    pub fn type_tag(&self) -> u8 {
        match self {
            Self::Hello { .. } => 1,
            Self::HelloAck { .. } => 2,
            Self::GetRootGroup => 3,
            Self::GetChildGroups { .. } => 4,
            Self::GetChildInstances { .. } => 5,
            Self::GetName { .. } => 6,
            Self::GetTypeName { .. } => 7,
            Self::GetGuid { .. } => 8,
            Self::FindInstance { .. } => 9,
            Self::ListDataKeys { .. } => 10,
            Self::CreateGroup { .. } => 11,
            Self::CreateInstance { .. } => 12,
            Self::RenameEntry { .. } => 13,
            Self::RemoveEntry { .. } => 14,
            Self::WriteObject { .. } => 15,
            Self::ReadObject { .. } => 16,
            Self::WriteData { .. } => 17,
            Self::ReadData { .. } => 18,
            Self::RemoveData { .. } => 19,
            Self::OpenDataStream { .. } => 20,
            Self::ReadStream { .. } => 21,
            Self::CloseStream { .. } => 22,
            Self::Commit => 23,
            Self::Revert => 24,
            Self::GetEvent { .. } => 25,
            Self::GetStreamStat { .. } => 26,
            Self::Ack => 64,
            Self::Handle { .. } => 65,
            Self::OptionalHandle { .. } => 66,
            Self::EntryList { .. } => 67,
            Self::Name { .. } => 68,
            Self::GuidValue { .. } => 69,
            Self::OptionalBytes { .. } => 70,
            Self::Keys { .. } => 71,
            Self::StreamOpened { .. } => 72,
            Self::StreamChunk { .. } => 73,
            Self::Event { .. } => 74,
            Self::StreamStat { .. } => 75,
            Self::Error { .. } => 255,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "Hello",
            Self::HelloAck { .. } => "HelloAck",
            Self::GetRootGroup => "GetRootGroup",
            Self::GetChildGroups { .. } => "GetChildGroups",
            Self::GetChildInstances { .. } => "GetChildInstances",
            Self::GetName { .. } => "GetName",
            Self::GetTypeName { .. } => "GetTypeName",
            Self::GetGuid { .. } => "GetGuid",
            Self::FindInstance { .. } => "FindInstance",
            Self::ListDataKeys { .. } => "ListDataKeys",
            Self::CreateGroup { .. } => "CreateGroup",
            Self::CreateInstance { .. } => "CreateInstance",
            Self::RenameEntry { .. } => "RenameEntry",
            Self::RemoveEntry { .. } => "RemoveEntry",
            Self::WriteObject { .. } => "WriteObject",
            Self::ReadObject { .. } => "ReadObject",
            Self::WriteData { .. } => "WriteData",
            Self::ReadData { .. } => "ReadData",
            Self::RemoveData { .. } => "RemoveData",
            Self::OpenDataStream { .. } => "OpenDataStream",
            Self::ReadStream { .. } => "ReadStream",
            Self::GetStreamStat { .. } => "GetStreamStat",
            Self::CloseStream { .. } => "CloseStream",
            Self::Commit => "Commit",
            Self::Revert => "Revert",
            Self::GetEvent { .. } => "GetEvent",
            Self::Ack => "Ack",
            Self::Handle { .. } => "Handle",
            Self::OptionalHandle { .. } => "OptionalHandle",
            Self::EntryList { .. } => "EntryList",
            Self::Name { .. } => "Name",
            Self::GuidValue { .. } => "GuidValue",
            Self::OptionalBytes { .. } => "OptionalBytes",
            Self::Keys { .. } => "Keys",
            Self::StreamOpened { .. } => "StreamOpened",
            Self::StreamChunk { .. } => "StreamChunk",
            Self::Event { .. } => "Event",
            Self::StreamStat { .. } => "StreamStat",
            Self::Error { .. } => "Error",
        }
    }
}
