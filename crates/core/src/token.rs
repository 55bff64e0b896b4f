//! Balances and approvals of the underlying assets.

use std::collections::HashMap;

use alloy_primitives::{Address, U256};

use crate::error::ProtocolError;
use crate::math::{try_add, try_sub};

/// Fungible token ledger for every underlying asset
#[derive(Debug, Clone, Default)]
pub struct TokenLedger {
    /// (asset, holder) -> balance
    balances: HashMap<(Address, Address), U256>,
    /// (asset, owner, spender) -> allowance
    allowances: HashMap<(Address, Address, Address), U256>,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, asset: Address, holder: Address) -> U256 {
        self.balances
            .get(&(asset, holder))
            .copied()
            .unwrap_or_default()
    }

    pub fn allowance(&self, asset: Address, owner: Address, spender: Address) -> U256 {
        self.allowances
            .get(&(asset, owner, spender))
            .copied()
            .unwrap_or_default()
    }

    /// Creates `amount` new units for `to`
    pub fn mint(&mut self, asset: Address, to: Address, amount: U256) -> Result<(), ProtocolError> {
        let balance = self.balances.entry((asset, to)).or_default();
        *balance = try_add(*balance, amount)?;
        Ok(())
    }

    pub fn approve(&mut self, asset: Address, owner: Address, spender: Address, amount: U256) {
        self.allowances.insert((asset, owner, spender), amount);
    }

    pub fn transfer(
        &mut self,
        asset: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), ProtocolError> {
        if amount.is_zero() || from == to {
            return Ok(());
        }
        let balance = self.balance_of(asset, from);
        if balance < amount {
            return Err(ProtocolError::TransferFailed {
                asset,
                from,
                amount,
                balance,
            });
        }
        self.balances.insert((asset, from), balance - amount);
        self.mint(asset, to, amount)
    }

    /// Moves `amount` from `from` on behalf of `spender`. An allowance of
    /// `U256::MAX` is never decreased.
    pub fn transfer_from(
        &mut self,
        asset: Address,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), ProtocolError> {
        if spender != from {
            let allowance = self.allowance(asset, from, spender);
            if allowance < amount {
                return Err(ProtocolError::InsufficientTokenAllowance {
                    asset,
                    owner: from,
                    spender,
                    allowance,
                    required: amount,
                });
            }
            if allowance != U256::MAX {
                self.allowances
                    .insert((asset, from, spender), try_sub(allowance, amount)?);
            }
        }
        self.transfer(asset, from, to, amount)
    }
}
