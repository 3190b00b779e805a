use std::fmt;

use tracing::{debug, warn};

use crate::action::{Action, ActionContext};
use crate::error::{TxnError, TxnResult};

/// Transaction lifecycle: `Pending → Committing → {Committed | Aborted}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnState {
    /// Actions are being appended; redundancy folding runs opportunistically.
    Pending,
    /// Actions are executing in append order.
    Committing,
    /// Every action executed; terminal.
    Committed,
    /// Rolled back or reverted; terminal. No observable change versus before
    /// the transaction began.
    Aborted,
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        };
        write!(f, "{name}")
    }
}

/// An ordered, atomically-applied sequence of actions.
pub struct Transaction {
    actions: Vec<Action>,
    state: TxnState,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
            state: TxnState::Pending,
        }
    }

    /// Current state.
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Number of buffered actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns `true` if no actions are buffered.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Append an action, folding away earlier actions it makes redundant.
    pub fn push(&mut self, action: Action) -> TxnResult<()> {
        if self.state != TxnState::Pending {
            return Err(TxnError::InvalidState {
                operation: "push",
                state: self.state,
            });
        }
        let before = self.actions.len();
        self.actions.retain(|earlier| !earlier.redundant(&action));
        let folded = before - self.actions.len();
        if folded > 0 {
            debug!(folded, target = %action.target().display(), "redundant actions folded");
        }
        self.actions.push(action);
        Ok(())
    }

    /// Drop every buffered action targeting `path`. Used when the resource
    /// a queued write would create is removed later in the same transaction,
    /// which would otherwise leave an orphan file behind. Only valid while
    /// `Pending`.
    pub fn drop_actions_for(&mut self, path: &std::path::Path) -> TxnResult<usize> {
        if self.state != TxnState::Pending {
            return Err(TxnError::InvalidState {
                operation: "drop_actions_for",
                state: self.state,
            });
        }
        let before = self.actions.len();
        self.actions.retain(|action| action.target() != path);
        Ok(before - self.actions.len())
    }

    /// Execute all actions in append order.
    ///
    /// On the first failure every already-executed action is undone in
    /// reverse order and the transaction ends `Aborted`; the caller is told
    /// which action failed and the database is already rolled back by the
    /// time the error returns. On success `clean` runs on every action and
    /// the transaction ends `Committed`. Either way the transaction is
    /// terminal afterwards and cannot be reopened.
    pub fn commit(&mut self, ctx: &mut ActionContext) -> TxnResult<()> {
        if self.state != TxnState::Pending {
            return Err(TxnError::InvalidState {
                operation: "commit",
                state: self.state,
            });
        }
        self.state = TxnState::Committing;

        for index in 0..self.actions.len() {
            if let Err(e) = self.actions[index].execute(ctx) {
                warn!(
                    action_index = index,
                    error = %e,
                    "commit failed; rolling back"
                );
                self.unwind(index, ctx);
                self.state = TxnState::Aborted;
                return Err(TxnError::Aborted {
                    action_index: index,
                    source: Box::new(e),
                });
            }
        }

        for action in &self.actions {
            action.clean(ctx);
        }
        self.state = TxnState::Committed;
        debug!(actions = self.actions.len(), "transaction committed");
        Ok(())
    }

    /// Discard the buffered actions without executing anything.
    pub fn revert(&mut self) -> TxnResult<()> {
        if self.state != TxnState::Pending {
            return Err(TxnError::InvalidState {
                operation: "revert",
                state: self.state,
            });
        }
        self.actions.clear();
        self.state = TxnState::Aborted;
        Ok(())
    }

    /// Undo actions `[0, failed_index)` in reverse order. Undo failures are
    /// logged and the unwind continues: a fully-attempted rollback beats a
    /// half-abandoned one.
    fn unwind(&self, failed_index: usize, ctx: &mut ActionContext) {
        for index in (0..failed_index).rev() {
            if let Err(e) = self.actions[index].undo(ctx) {
                warn!(action_index = index, error = %e, "undo failed during rollback");
            }
        }
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}
