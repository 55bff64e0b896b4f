//! Leverage engine.
//!
//! Every flow borrows working capital from a [`FlashLender`], runs the
//! market operations on the account's behalf inside the loan callback and
//! pays the loan back out of the borrowed or withdrawn assets. The account
//! must have approved the manager for its tokens and, for borrows and
//! withdrawals, for its floating shares.
//!
//! Flows operate on a [`State`] and are expected to run inside
//! [`exactly_rs_core::Protocol::transact`], so a failure at any step leaves
//! nothing behind.

use alloy_primitives::{keccak256, Address, B256, U256};
use exactly_rs_core::math::{try_add, try_sub, w_mul_down, WAD};
use exactly_rs_core::{FlashLender, FlashLoanRecipient, ProtocolError, State};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Continuation carried through a flash loan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    Leverage {
        market: Address,
        account: Address,
        deposit: U256,
    },
    Deleverage {
        market: Address,
        account: Address,
        borrow_shares: U256,
    },
    RollFixed {
        account: Address,
        roll: RollFixed,
    },
}

/// Moves a fixed borrow from one maturity to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollFixed {
    pub market: Address,
    pub repay_maturity: u64,
    pub borrow_maturity: u64,
    /// Share of the position to roll, in wad
    pub percentage: U256,
    /// Most the old position may cost to repay
    pub max_repay_assets: U256,
    /// Most the new position may owe at maturity
    pub max_borrow_assets: U256,
}

#[derive(Debug, Clone)]
pub struct DebtManager {
    address: Address,
    lender: FlashLender,
    pending: Option<B256>,
}

impl DebtManager {
    pub fn new(address: Address, lender: FlashLender) -> Self {
        Self {
            address,
            lender,
            pending: None,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn lender(&self) -> &FlashLender {
        &self.lender
    }

    /// Assets borrowed to turn `deposit` into a position of
    /// `deposit * ratio`
    pub fn leverage_borrow(deposit: U256, ratio: U256) -> Result<U256, ProtocolError> {
        if ratio < WAD {
            return Err(ProtocolError::InvalidParameter {
                name: "ratio",
                value: ratio,
            });
        }
        w_mul_down(deposit, ratio - WAD)
    }

    /// Deposits `deposit` from `account` and levers the position up to
    /// `deposit * ratio`, borrowing the difference. The borrowed assets,
    /// flash fees included, must not exceed `max_borrow_assets`. Returns the
    /// total borrowed.
    ///
    /// When the lender cannot fund the whole amount at once, the loop runs
    /// as many rounds as needed.
    pub fn leverage(
        &mut self,
        state: &mut State,
        account: Address,
        market: Address,
        deposit: U256,
        ratio: U256,
        max_borrow_assets: U256,
    ) -> Result<U256, ProtocolError> {
        let asset = self.prepare(state, market)?;
        let target = Self::leverage_borrow(deposit, ratio)?;
        state
            .tokens_mut()
            .transfer_from(asset, self.address, account, self.address, deposit)?;

        let mut remaining = target;
        let mut pending_deposit = deposit;
        let mut borrowed = U256::ZERO;
        while !remaining.is_zero() {
            let available = state.tokens().balance_of(asset, self.lender.address());
            if available.is_zero() {
                return Err(ProtocolError::TransferFailed {
                    asset,
                    from: self.lender.address(),
                    amount: remaining,
                    balance: available,
                });
            }
            let chunk = remaining.min(available);
            let step = Step::Leverage {
                market,
                account,
                deposit: pending_deposit,
            };
            let fees = self.flash(state, asset, chunk, &step)?;
            borrowed = try_add(borrowed, try_add(chunk, fees)?)?;
            remaining = try_sub(remaining, chunk)?;
            pending_deposit = U256::ZERO;
            debug!(account = %account, market = %market, %chunk, %remaining, "leverage round");
        }
        if !pending_deposit.is_zero() {
            state.deposit(self.address, market, pending_deposit, account)?;
        }
        if borrowed > max_borrow_assets {
            return Err(ProtocolError::Disagreement {
                actual: borrowed,
                bound: max_borrow_assets,
            });
        }
        info!(account = %account, market = %market, %deposit, %borrowed, "leveraged");
        Ok(borrowed)
    }

    /// Repays `percentage` of the account's floating debt with a flash loan
    /// and withdraws collateral to pay it back. The withdrawn assets must
    /// not exceed `max_withdraw_assets`. Returns the assets withdrawn.
    pub fn deleverage(
        &mut self,
        state: &mut State,
        account: Address,
        market: Address,
        percentage: U256,
        max_withdraw_assets: U256,
    ) -> Result<U256, ProtocolError> {
        if percentage > WAD {
            return Err(ProtocolError::InvalidParameter {
                name: "percentage",
                value: percentage,
            });
        }
        let asset = self.prepare(state, market)?;
        let timestamp = state.timestamp();
        let view = state.market(market)?;
        let shares = view
            .account(account)
            .map(|a| a.floating_borrow_shares)
            .unwrap_or_default();
        let borrow_shares = w_mul_down(shares, percentage)?;
        let loan = view.preview_refund(borrow_shares, timestamp)?;
        if loan.is_zero() {
            return Err(ProtocolError::ZeroRepay);
        }

        let step = Step::Deleverage {
            market,
            account,
            borrow_shares,
        };
        let fees = self.flash(state, asset, loan, &step)?;
        let withdrawn = try_add(loan, fees)?;
        if withdrawn > max_withdraw_assets {
            return Err(ProtocolError::Disagreement {
                actual: withdrawn,
                bound: max_withdraw_assets,
            });
        }
        info!(account = %account, market = %market, repaid = %loan, %withdrawn, "deleveraged");
        Ok(withdrawn)
    }

    /// Repays part of a fixed borrow and reopens it at another maturity.
    /// Returns the assets owed at the new maturity.
    pub fn roll_fixed(&mut self, state: &mut State, account: Address, roll: RollFixed) -> Result<U256, ProtocolError> {
        if roll.percentage > WAD {
            return Err(ProtocolError::InvalidParameter {
                name: "percentage",
                value: roll.percentage,
            });
        }
        let asset = self.prepare(state, roll.market)?;
        let position = state
            .market(roll.market)?
            .fixed_borrow_position(roll.repay_maturity, account);
        if position.is_empty() {
            return Err(ProtocolError::ZeroRepay);
        }

        let before = state
            .market(roll.market)?
            .fixed_borrow_position(roll.borrow_maturity, account)
            .total()?;
        let step = Step::RollFixed { account, roll };
        self.flash(state, asset, roll.max_repay_assets, &step)?;
        let after = state
            .market(roll.market)?
            .fixed_borrow_position(roll.borrow_maturity, account)
            .total()?;
        let owed = try_sub(after, before)?;
        info!(
            account = %account,
            market = %roll.market,
            from = roll.repay_maturity,
            to = roll.borrow_maturity,
            %owed,
            "fixed borrow rolled"
        );
        Ok(owed)
    }

    /// Lets the market pull the manager's tokens. Returns the market's asset.
    fn prepare(&self, state: &mut State, market: Address) -> Result<Address, ProtocolError> {
        let asset = state.market(market)?.asset();
        state
            .tokens_mut()
            .approve(asset, self.address, market, U256::MAX);
        Ok(asset)
    }

    /// Runs `step` inside a flash loan of `amount`. Returns the fee paid.
    fn flash(&mut self, state: &mut State, asset: Address, amount: U256, step: &Step) -> Result<U256, ProtocolError> {
        let data = serde_json::to_vec(step)?;
        self.pending = Some(keccak256(&data));
        let lender = self.lender;
        let result = lender.flash_loan(state, self.address, self, &[asset], &[amount], &data);
        self.pending = None;
        Ok(result?.into_iter().next().unwrap_or_default())
    }

    fn run(&self, state: &mut State, step: Step, amount: U256, fee: U256) -> Result<(), ProtocolError> {
        let owed = try_add(amount, fee)?;
        match step {
            Step::Leverage {
                market,
                account,
                deposit,
            } => {
                state.deposit(self.address, market, try_add(deposit, amount)?, account)?;
                state.borrow(self.address, market, owed, self.address, account)?;
            }
            Step::Deleverage {
                market,
                account,
                borrow_shares,
            } => {
                state.refund(self.address, market, borrow_shares, account)?;
                state.withdraw(self.address, market, owed, self.address, account)?;
            }
            Step::RollFixed { account, roll } => {
                let position_assets = w_mul_down(
                    state
                        .market(roll.market)?
                        .fixed_borrow_position(roll.repay_maturity, account)
                        .total()?,
                    roll.percentage,
                )?;
                let repaid = state.repay_at_maturity(
                    self.address,
                    roll.market,
                    roll.repay_maturity,
                    position_assets,
                    roll.max_repay_assets,
                    account,
                )?;
                // the unused part of the loan is still held by the manager
                let borrow = try_add(repaid, fee)?;
                state.borrow_at_maturity(
                    self.address,
                    roll.market,
                    roll.borrow_maturity,
                    borrow,
                    roll.max_borrow_assets,
                    self.address,
                    account,
                )?;
            }
        }
        Ok(())
    }
}

impl FlashLoanRecipient for DebtManager {
    fn receive_flash_loan(
        &mut self,
        state: &mut State,
        lender: Address,
        assets: &[Address],
        amounts: &[U256],
        fees: &[U256],
        data: &[u8],
    ) -> Result<(), ProtocolError> {
        let expected = self.pending.take();
        if lender != self.lender.address() || expected != Some(keccak256(data)) {
            return Err(ProtocolError::CallHashMismatch {
                receiver: self.address,
            });
        }
        let (Some(asset), Some(amount), Some(fee)) = (assets.first(), amounts.first(), fees.first())
        else {
            return Err(ProtocolError::CallHashMismatch {
                receiver: self.address,
            });
        };
        let step: Step = serde_json::from_slice(data)?;
        self.run(state, step, *amount, *fee)?;
        state
            .tokens_mut()
            .transfer(*asset, self.address, lender, try_add(*amount, *fee)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exactly_rs_core::{Auditor, AuditorConfig};

    const MANAGER: Address = Address::repeat_byte(0xd0);
    const LENDER: Address = Address::repeat_byte(0xf1);

    fn create_test_manager() -> DebtManager {
        DebtManager::new(MANAGER, FlashLender::new(LENDER, U256::ZERO).unwrap())
    }

    #[test]
    fn test_leverage_borrow() {
        let deposit = U256::from(100) * WAD;
        assert_eq!(
            DebtManager::leverage_borrow(deposit, U256::from(3) * WAD).unwrap(),
            U256::from(200) * WAD
        );
        assert_eq!(DebtManager::leverage_borrow(deposit, WAD).unwrap(), U256::ZERO);
        assert!(DebtManager::leverage_borrow(deposit, WAD - U256::from(1)).is_err());
    }

    #[test]
    fn test_unexpected_callback_rejected() {
        let mut manager = create_test_manager();
        let auditor = Auditor::new(Address::repeat_byte(0xff), AuditorConfig::default()).unwrap();
        let mut state = State::new(auditor, 0);
        let data = serde_json::to_vec(&Step::Leverage {
            market: Address::ZERO,
            account: Address::ZERO,
            deposit: U256::ZERO,
        })
        .unwrap();

        let err = manager
            .receive_flash_loan(&mut state, LENDER, &[], &[], &[], &data)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::CallHashMismatch { .. }));

        // a pending hash only matches its own payload
        manager.pending = Some(keccak256(b"other"));
        let err = manager
            .receive_flash_loan(&mut state, LENDER, &[], &[], &[], &data)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::CallHashMismatch { .. }));
        assert!(manager.pending.is_none());
    }

    #[test]
    fn test_step_encoding_is_tagged() {
        let step = Step::Deleverage {
            market: Address::ZERO,
            account: Address::ZERO,
            borrow_shares: U256::from(5),
        };
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["step"], "deleverage");
        let decoded: Step = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, step);
    }
}
