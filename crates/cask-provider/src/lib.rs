//! Storage providers for the Cask object database.
//!
//! A provider exposes group/instance CRUD over one database, with one
//! transaction open at a time: mutations buffer against a working copy of
//! the registry and only touch storage on `commit()`.
//!
//! - [`LocalProvider`] — filesystem-backed: one file per object block and
//!   per named data block, registry in its own file, atomicity via the
//!   action log in `cask-txn`
//! - [`CompactProvider`] — single-file block-allocated: blocks appended to a
//!   `cask-store` block file on commit, the registry header pointer update
//!   being the commit point; space is reclaimed by [`CompactProvider::compact`]
//! - [`ChangeBus`] — sequence-numbered change notifications, polled
//!   non-blockingly with [`ChangeBus::get_event`]

pub mod bus;
pub mod compact;
pub mod error;
pub mod local;
pub mod provider;

pub use bus::{ChangeBus, ChangeEvent};
pub use compact::CompactProvider;
pub use error::{ProviderError, ProviderResult};
pub use local::LocalProvider;
pub use provider::Provider;
