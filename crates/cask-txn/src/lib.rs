//! Reversible action log for the Cask object database.
//!
//! Every mutating database operation is expressed as an [`Action`] so that a
//! sequence of them (a [`Transaction`]) can be applied atomically: actions
//! execute in append order on commit, and on the first failure everything
//! already executed is undone in reverse order. Destruction is always staged
//! through a reversible rename or backup, never an immediate delete; the
//! permanent delete happens in `clean`, after the transaction has committed.

pub mod action;
pub mod backup;
pub mod error;
pub mod transaction;

pub use action::{Action, ActionContext};
pub use backup::BackupStore;
pub use error::{TxnError, TxnResult};
pub use transaction::{Transaction, TxnState};
