use thiserror::Error;

use crate::transaction::TxnState;

#[derive(Debug, Error)]
pub enum TxnError {
    #[error("transaction aborted: action {action_index} failed: {source}")]
    Aborted {
        action_index: usize,
        #[source]
        source: Box<TxnError>,
    },

    #[error("invalid transaction state for {operation}: {state}")]
    InvalidState {
        operation: &'static str,
        state: TxnState,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TxnResult<T> = Result<T, TxnError>;
