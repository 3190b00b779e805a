use thiserror::Error;

use cask_registry::RegistryError;
use cask_store::StoreError;
use cask_txn::TxnError;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("transaction error: {0}")]
    Txn(#[from] TxnError),

    #[error("compaction requires a clean provider: a transaction is in progress")]
    TransactionInProgress,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ProviderResult<T> = Result<T, ProviderError>;
