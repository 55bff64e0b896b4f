//! Per-maturity fixed-rate pool ledger.
//!
//! A pool tracks fixed supply and fixed borrows at one maturity. Borrows that
//! exceed fixed supply are backed by the floating pool ("backup" liquidity);
//! the methods that move `borrowed` or `supplied` return how much backup
//! borrowing they added or released so the market can keep its aggregate
//! `floating_backup_borrowed` in sync.
//!
//! Fees paid by fixed borrowers enter `unassigned_earnings` and are released
//! linearly until maturity.

use std::fmt;

use alloy_primitives::U256;

use crate::error::ProtocolError;
use crate::math::{mul_div_down, try_add, try_sub, w_mul_down};

/// Distance between two consecutive maturities (4 weeks)
pub const INTERVAL: u64 = 4 * 7 * 86_400;

/// Ledger of one maturity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedPool {
    pub borrowed: U256,
    pub supplied: U256,
    pub unassigned_earnings: U256,
    pub last_accrual: u64,
}

impl FixedPool {
    /// Borrowed amount not covered by fixed supply
    pub fn backup_supplied(&self) -> U256 {
        self.borrowed.saturating_sub(self.supplied)
    }

    /// Yield a fixed deposit of `amount` earns, and the fee kept by the
    /// floating pool out of it. Returns `(yield, backup_fee)`.
    pub fn calculate_deposit(
        &self,
        amount: U256,
        backup_fee_rate: U256,
    ) -> Result<(U256, U256), ProtocolError> {
        let backup_supplied = self.backup_supplied();
        if backup_supplied.is_zero() {
            return Ok((U256::ZERO, U256::ZERO));
        }
        let earnings = mul_div_down(
            self.unassigned_earnings,
            amount.min(backup_supplied),
            backup_supplied,
        )?;
        let backup_fee = w_mul_down(earnings, backup_fee_rate)?;
        Ok((earnings - backup_fee, backup_fee))
    }

    /// Adds fixed supply. Returns the backup debt it releases.
    pub fn deposit(&mut self, amount: U256) -> Result<U256, ProtocolError> {
        let backup_debt_reduction = self.backup_supplied().min(amount);
        self.supplied = try_add(self.supplied, amount)?;
        Ok(backup_debt_reduction)
    }

    /// Removes fixed borrows. Returns the backup debt it releases.
    pub fn repay(&mut self, amount: U256) -> Result<U256, ProtocolError> {
        let backup_debt_reduction = self.backup_supplied().min(amount);
        self.borrowed = try_sub(self.borrowed, amount)?;
        Ok(backup_debt_reduction)
    }

    /// Adds fixed borrows. Returns the backup debt it adds.
    pub fn borrow(&mut self, amount: U256) -> Result<U256, ProtocolError> {
        let new_borrowed = try_add(self.borrowed, amount)?;
        let covered = self.borrowed.max(self.supplied).min(new_borrowed);
        self.borrowed = new_borrowed;
        Ok(new_borrowed - covered)
    }

    /// Removes fixed supply. Returns the backup debt it adds.
    pub fn withdraw(&mut self, amount: U256) -> Result<U256, ProtocolError> {
        let new_supplied = try_sub(self.supplied, amount)?;
        let addition = self.supplied.min(self.borrowed) - new_supplied.min(self.borrowed);
        self.supplied = new_supplied;
        Ok(addition)
    }

    /// Earnings that `accrue_earnings` would release at `timestamp`
    pub fn pending_earnings(&self, maturity: u64, timestamp: u64) -> Result<U256, ProtocolError> {
        if self.last_accrual >= maturity {
            return Ok(U256::ZERO);
        }
        if timestamp >= maturity {
            return Ok(self.unassigned_earnings);
        }
        mul_div_down(
            self.unassigned_earnings,
            U256::from(timestamp.saturating_sub(self.last_accrual)),
            U256::from(maturity - self.last_accrual),
        )
    }

    /// Releases the share of unassigned earnings elapsed since the last
    /// accrual. Everything left is released once maturity is reached.
    pub fn accrue_earnings(&mut self, maturity: u64, timestamp: u64) -> Result<U256, ProtocolError> {
        let earnings = self.pending_earnings(maturity, timestamp)?;
        self.unassigned_earnings = try_sub(self.unassigned_earnings, earnings)?;
        self.last_accrual = timestamp.min(maturity).max(self.last_accrual);
        Ok(earnings)
    }

    /// Splits a borrow fee between the pool's unassigned earnings (the part
    /// backed by floating liquidity) and the part backed by fixed supply.
    /// Returns `(unassigned, backup)`.
    pub fn distribute_earnings(
        &self,
        earnings: U256,
        borrow_amount: U256,
    ) -> Result<(U256, U256), ProtocolError> {
        if borrow_amount.is_zero() {
            return Ok((earnings, U256::ZERO));
        }
        let uncovered = borrow_amount - self.backup_supplied().min(borrow_amount);
        let backup = mul_div_down(earnings, uncovered, borrow_amount)?;
        Ok((earnings - backup, backup))
    }
}

/// An account's position at one maturity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedPosition {
    pub principal: U256,
    pub fee: U256,
}

impl FixedPosition {
    pub fn new(principal: U256, fee: U256) -> Self {
        Self { principal, fee }
    }

    pub fn total(&self) -> Result<U256, ProtocolError> {
        try_add(self.principal, self.fee)
    }

    pub fn is_empty(&self) -> bool {
        self.principal.is_zero() && self.fee.is_zero()
    }

    /// Splits `amount` into principal and fee using this position's ratio
    pub fn scale_proportionally(&self, amount: U256) -> Result<Self, ProtocolError> {
        let total = self.total()?;
        if total.is_zero() {
            return Ok(Self::new(amount, U256::ZERO));
        }
        let principal = mul_div_down(amount, self.principal, total)?;
        Ok(Self::new(principal, amount - principal))
    }

    /// Position left after removing `amount` proportionally. The removed
    /// part is exactly `scale_proportionally(amount)`.
    pub fn reduce_proportionally(&self, amount: U256) -> Result<Self, ProtocolError> {
        if amount > self.total()? {
            return Err(ProtocolError::Arithmetic);
        }
        let removed = self.scale_proportionally(amount)?;
        Ok(Self::new(
            try_sub(self.principal, removed.principal)?,
            try_sub(self.fee, removed.fee)?,
        ))
    }
}

/// Lifecycle of a maturity relative to the current time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Not aligned to `INTERVAL`
    Invalid,
    Matured,
    Valid,
    /// Too far in the future for the market's `max_future_pools`
    NotReady,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Invalid => "invalid",
            Self::Matured => "matured",
            Self::Valid => "valid",
            Self::NotReady => "not ready",
        };
        f.write_str(name)
    }
}

/// Most recent maturity at or before `timestamp`
pub fn latest_maturity(timestamp: u64) -> u64 {
    timestamp - timestamp % INTERVAL
}

pub fn pool_state(maturity: u64, max_pools: u8, timestamp: u64) -> PoolState {
    if maturity % INTERVAL != 0 {
        PoolState::Invalid
    } else if maturity < timestamp {
        PoolState::Matured
    } else if maturity > latest_maturity(timestamp) + INTERVAL * u64::from(max_pools) {
        PoolState::NotReady
    } else {
        PoolState::Valid
    }
}

/// Fails with [`ProtocolError::UnmatchedPoolState`] unless the maturity is
/// in `required` or `alternative` state
pub fn check_pool_state(
    maturity: u64,
    max_pools: u8,
    timestamp: u64,
    required: PoolState,
    alternative: Option<PoolState>,
) -> Result<(), ProtocolError> {
    let state = pool_state(maturity, max_pools, timestamp);
    if state == required || Some(state) == alternative {
        return Ok(());
    }
    Err(ProtocolError::UnmatchedPoolState {
        maturity,
        state,
        required,
        alternative,
    })
}
