//! Reward hook notified of floating and fixed balance changes.
//!
//! Notifications are buffered while an operation runs and handed to the hook
//! only after the operation commits. A rolled-back operation notifies nothing.

use std::sync::{Mutex, PoisonError};

use alloy_primitives::{Address, U256};
use serde::Serialize;

/// Which balance of an account changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Floating share balance
    Deposit,
    /// Floating borrow shares
    Borrow,
    FixedDeposit { maturity: u64 },
    FixedBorrow { maturity: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceChange {
    pub account: Address,
    pub market: Address,
    pub operation: OperationKind,
    /// Balance after the change: shares for floating kinds, position assets
    /// for fixed kinds
    pub new_balance: U256,
}

/// Receiver of committed balance changes
pub trait RewardHook: Send + Sync {
    /// Hook name for logging
    fn name(&self) -> &str {
        "reward-hook"
    }

    fn on_balance_change(&self, change: &BalanceChange);
}

/// Hook that stores every change it receives
#[derive(Debug, Default)]
pub struct RecordingHook {
    changes: Mutex<Vec<BalanceChange>>,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn changes(&self) -> Vec<BalanceChange> {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl RewardHook for RecordingHook {
    fn name(&self) -> &str {
        "recording"
    }

    fn on_balance_change(&self, change: &BalanceChange) {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(change.clone());
    }
}

/// Collapses buffered changes to one per (account, market, operation),
/// keeping the final balance and the order of first occurrence
pub fn coalesce(changes: Vec<BalanceChange>) -> Vec<BalanceChange> {
    let mut coalesced: Vec<BalanceChange> = Vec::with_capacity(changes.len());
    for change in changes {
        let existing = coalesced.iter_mut().find(|c| {
            c.account == change.account
                && c.market == change.market
                && c.operation == change.operation
        });
        match existing {
            Some(slot) => slot.new_balance = change.new_balance,
            None => coalesced.push(change),
        }
    }
    coalesced
}
