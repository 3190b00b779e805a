//! Wire protocol for remote access to a Cask object database.
//!
//! Defines the framing, message types, handle table, server dispatch, and a
//! typed client. The server fronts any [`cask_provider::Provider`], so a
//! database can be served from either backing layout over any blocking
//! [`Transport`].

pub mod client;
pub mod codec;
pub mod error;
pub mod handle;
pub mod message;
pub mod server;
pub mod transport;

pub use client::RemoteClient;
pub use codec::CaskCodec;
pub use error::{ProtocolError, ProtocolResult};
pub use handle::{HandleTable, Target};
pub use message::{
    CaskMessage, EntryInfo, WireErrorKind, MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};
pub use server::CaskServer;
pub use transport::{LoopbackTransport, Transport};
