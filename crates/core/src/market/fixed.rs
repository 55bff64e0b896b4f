//! Fixed-rate deposits and borrows at a maturity.
//!
//! Fixed borrows pay their whole fee upfront. The part of the fee backed by
//! floating liquidity becomes the pool's unassigned earnings, released into
//! the floating pool linearly until maturity. Fixed depositors take a share
//! of the unassigned earnings as soon as their deposit covers backup debt.

use alloy_primitives::{Address, U256};
use tracing::debug;

use super::{Context, Market};
use crate::error::ProtocolError;
use crate::events::Event;
use crate::fixed_pool::{check_pool_state, PoolState};
use crate::hooks::OperationKind;
use crate::math::{try_add, try_sub, w_div_down, w_mul_down, WAD};

impl Market {
    fn check_pool(
        &self,
        maturity: u64,
        timestamp: u64,
        alternative: Option<PoolState>,
    ) -> Result<(), ProtocolError> {
        check_pool_state(
            maturity,
            self.config.max_future_pools,
            timestamp,
            PoolState::Valid,
            alternative,
        )
    }

    /// Deposits at a fixed rate. Returns the position assets owed at maturity.
    pub fn deposit_at_maturity(
        &mut self,
        ctx: Context,
        maturity: u64,
        assets: U256,
        min_assets_required: U256,
        receiver: Address,
    ) -> Result<U256, ProtocolError> {
        if assets.is_zero() {
            return Err(ProtocolError::ZeroDeposit);
        }
        self.check_pool(maturity, ctx.timestamp, None)?;
        self.accrue_pool(maturity, ctx.timestamp)?;

        let (fee, backup_fee) = self
            .fixed_pool(maturity)
            .calculate_deposit(assets, self.config.backup_fee_rate)?;
        let position_assets = try_add(assets, fee)?;
        if position_assets < min_assets_required {
            return Err(ProtocolError::Disagreement {
                actual: position_assets,
                bound: min_assets_required,
            });
        }

        let pool = self.pool_mut(maturity);
        let backup_reduction = pool.deposit(assets)?;
        pool.unassigned_earnings = try_sub(pool.unassigned_earnings, try_add(fee, backup_fee)?)?;
        self.subtract_backup(backup_reduction)?;
        self.add_to_earnings_accumulator(backup_fee)?;

        let position = self.account_mut(receiver).fixed_deposits.entry(maturity).or_default();
        position.principal = try_add(position.principal, assets)?;
        position.fee = try_add(position.fee, fee)?;

        self.notify(receiver, OperationKind::FixedDeposit { maturity });
        self.emit(Event::DepositAtMaturity {
            market: self.address,
            maturity,
            caller: ctx.caller,
            owner: receiver,
            assets,
            fee,
        });
        self.emit_market_update(ctx.timestamp);
        self.emit_fixed_earnings_update(maturity, ctx.timestamp);
        Ok(position_assets)
    }

    /// Withdraws `position_assets` of a fixed deposit, discounted at the
    /// current fixed borrow rate before maturity. Returns the assets paid
    /// out.
    pub fn withdraw_at_maturity(
        &mut self,
        ctx: Context,
        maturity: u64,
        position_assets: U256,
        min_assets_required: U256,
        receiver: Address,
        owner: Address,
    ) -> Result<U256, ProtocolError> {
        if position_assets.is_zero() {
            return Err(ProtocolError::ZeroWithdraw);
        }
        self.check_pool(maturity, ctx.timestamp, Some(PoolState::Matured))?;
        self.accrue_pool(maturity, ctx.timestamp)?;

        let position = self.fixed_deposit_position(maturity, owner);
        let position_assets = position_assets.min(position.total()?);
        if position_assets.is_zero() {
            return Err(ProtocolError::ZeroWithdraw);
        }

        let principal = position.scale_proportionally(position_assets)?.principal;
        let backup_addition = self.pool_mut(maturity).withdraw(principal)?;
        let new_backup = try_add(self.floating_backup_borrowed, backup_addition)?;
        if try_add(new_backup, self.floating_debt)? > self.floating_assets {
            return Err(ProtocolError::InsufficientProtocolLiquidity {
                market: self.address,
            });
        }
        self.floating_backup_borrowed = new_backup;

        let assets_discounted = if ctx.timestamp < maturity {
            let pool = self.fixed_pool(maturity);
            let rate = self.irm.fixed_borrow_rate(
                maturity,
                position_assets,
                pool.borrowed,
                pool.supplied,
                self.preview_floating_assets_average(ctx.timestamp)?,
                ctx.timestamp,
            )?;
            w_div_down(position_assets, try_add(WAD, rate)?)?
        } else {
            position_assets
        };
        if assets_discounted < min_assets_required {
            return Err(ProtocolError::Disagreement {
                actual: assets_discounted,
                bound: min_assets_required,
            });
        }
        self.spend_allowance(owner, ctx.caller, assets_discounted, ctx.timestamp)?;

        let earnings = self.charge_treasury_fee(position_assets - assets_discounted, ctx.timestamp)?;
        let (unassigned, backup) = self
            .fixed_pool(maturity)
            .distribute_earnings(earnings, assets_discounted)?;
        let pool = self.pool_mut(maturity);
        pool.unassigned_earnings = try_add(pool.unassigned_earnings, unassigned)?;
        self.collect_free_lunch(backup, ctx.timestamp)?;

        let remaining = position.reduce_proportionally(position_assets)?;
        let account = self.account_mut(owner);
        if remaining.is_empty() {
            account.fixed_deposits.remove(&maturity);
        } else {
            account.fixed_deposits.insert(maturity, remaining);
        }

        self.notify(owner, OperationKind::FixedDeposit { maturity });
        self.emit(Event::WithdrawAtMaturity {
            market: self.address,
            maturity,
            caller: ctx.caller,
            receiver,
            owner,
            position_assets,
            assets: assets_discounted,
        });
        self.emit_market_update(ctx.timestamp);
        self.emit_fixed_earnings_update(maturity, ctx.timestamp);
        Ok(assets_discounted)
    }

    /// Borrows at a fixed rate. Returns the assets owed at maturity.
    ///
    /// The caller runs the auditor's liquidity check afterwards.
    pub fn borrow_at_maturity(
        &mut self,
        ctx: Context,
        maturity: u64,
        assets: U256,
        max_assets: U256,
        receiver: Address,
        borrower: Address,
    ) -> Result<U256, ProtocolError> {
        if assets.is_zero() {
            return Err(ProtocolError::ZeroBorrow);
        }
        self.check_pool(maturity, ctx.timestamp, None)?;
        self.accrue_pool(maturity, ctx.timestamp)?;
        self.update_floating_assets_average(ctx.timestamp)?;

        let pool = self.fixed_pool(maturity);
        let rate = self.irm.fixed_borrow_rate(
            maturity,
            assets,
            pool.borrowed,
            pool.supplied,
            self.floating_assets_average,
            ctx.timestamp,
        )?;
        let fee = w_mul_down(assets, rate)?;
        let assets_owed = try_add(assets, fee)?;
        if assets_owed > max_assets {
            return Err(ProtocolError::Disagreement {
                actual: assets_owed,
                bound: max_assets,
            });
        }
        self.spend_allowance(borrower, ctx.caller, assets_owed, ctx.timestamp)?;

        let backup_addition = self.pool_mut(maturity).borrow(assets)?;
        if !backup_addition.is_zero() {
            let new_backup = try_add(self.floating_backup_borrowed, backup_addition)?;
            let treasury_fee = self.update_floating_debt(ctx.timestamp)?;
            self.deposit_to_treasury(treasury_fee, ctx.timestamp)?;
            let borrowable = w_mul_down(self.floating_assets, WAD - self.config.reserve_factor)?;
            if try_add(new_backup, self.floating_debt)? > borrowable {
                return Err(ProtocolError::InsufficientProtocolLiquidity {
                    market: self.address,
                });
            }
            self.floating_backup_borrowed = new_backup;
        }

        let earnings = self.charge_treasury_fee(fee, ctx.timestamp)?;
        let (unassigned, backup) = self
            .fixed_pool(maturity)
            .distribute_earnings(earnings, assets)?;
        let pool = self.pool_mut(maturity);
        pool.unassigned_earnings = try_add(pool.unassigned_earnings, unassigned)?;
        self.collect_free_lunch(backup, ctx.timestamp)?;

        let position = self.account_mut(borrower).fixed_borrows.entry(maturity).or_default();
        position.principal = try_add(position.principal, assets)?;
        position.fee = try_add(position.fee, fee)?;

        self.notify(borrower, OperationKind::FixedBorrow { maturity });
        self.emit(Event::BorrowAtMaturity {
            market: self.address,
            maturity,
            caller: ctx.caller,
            receiver,
            borrower,
            assets,
            fee,
        });
        self.emit_market_update(ctx.timestamp);
        self.emit_fixed_earnings_update(maturity, ctx.timestamp);
        Ok(assets_owed)
    }

    /// Repays `position_assets` of a fixed borrow. Early repayments earn a
    /// discount, late ones pay a penalty. Returns the assets charged.
    pub fn repay_at_maturity(
        &mut self,
        ctx: Context,
        maturity: u64,
        position_assets: U256,
        max_assets: U256,
        borrower: Address,
    ) -> Result<U256, ProtocolError> {
        if position_assets.is_zero() {
            return Err(ProtocolError::ZeroRepay);
        }
        self.check_pool(maturity, ctx.timestamp, Some(PoolState::Matured))?;
        let actual = self.no_transfer_repay_at_maturity(ctx, maturity, position_assets, max_assets, borrower, true)?;
        self.emit_market_update(ctx.timestamp);
        Ok(actual)
    }

    pub(crate) fn no_transfer_repay_at_maturity(
        &mut self,
        ctx: Context,
        maturity: u64,
        position_assets: U256,
        max_assets: U256,
        borrower: Address,
        can_discount: bool,
    ) -> Result<U256, ProtocolError> {
        self.accrue_pool(maturity, ctx.timestamp)?;

        let position = self.fixed_borrow_position(maturity, borrower);
        let debt_covered = position_assets.min(position.total()?);
        if debt_covered.is_zero() {
            return Err(ProtocolError::ZeroRepay);
        }
        let principal_covered = position.scale_proportionally(debt_covered)?.principal;

        let actual_repay = if ctx.timestamp < maturity {
            if can_discount {
                let (discount, backup_fee) = self
                    .fixed_pool(maturity)
                    .calculate_deposit(principal_covered, self.config.backup_fee_rate)?;
                let pool = self.pool_mut(maturity);
                pool.unassigned_earnings =
                    try_sub(pool.unassigned_earnings, try_add(discount, backup_fee)?)?;
                self.add_to_earnings_accumulator(backup_fee)?;
                try_sub(debt_covered, discount)?
            } else {
                debt_covered
            }
        } else {
            let penalty = w_mul_down(debt_covered, self.penalty_rate_over(ctx.timestamp - maturity))?;
            self.add_to_earnings_accumulator(penalty)?;
            try_add(debt_covered, penalty)?
        };
        if actual_repay > max_assets {
            return Err(ProtocolError::Disagreement {
                actual: actual_repay,
                bound: max_assets,
            });
        }

        let backup_reduction = self.pool_mut(maturity).repay(principal_covered)?;
        self.subtract_backup(backup_reduction)?;

        let remaining = position.reduce_proportionally(debt_covered)?;
        let account = self.account_mut(borrower);
        if remaining.is_empty() {
            account.fixed_borrows.remove(&maturity);
        } else {
            account.fixed_borrows.insert(maturity, remaining);
        }

        debug!(market = %self.address, borrower = %borrower, maturity, %debt_covered, %actual_repay, "fixed debt repaid");
        self.notify(borrower, OperationKind::FixedBorrow { maturity });
        self.emit(Event::RepayAtMaturity {
            market: self.address,
            maturity,
            caller: ctx.caller,
            borrower,
            assets: actual_repay,
            position_assets: debt_covered,
        });
        self.emit_fixed_earnings_update(maturity, ctx.timestamp);
        Ok(actual_repay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed_pool::INTERVAL;
    use crate::market::tests::{create_test_market, ctx, wad, ALICE, BOB, START};

    const MATURITY: u64 = START + INTERVAL;

    /// Market with 1000 floating assets and a settled average
    fn create_funded_market() -> (Market, u64) {
        let mut market = create_test_market();
        market.deposit(ctx(ALICE, START), wad(1_000), ALICE).unwrap();
        // let the average catch up with the deposit
        let now = START + 10_000;
        market.update_floating_assets_average(now).unwrap();
        (market, now)
    }

    #[test]
    fn test_fixed_deposit_without_backup_earns_nothing() {
        let mut market = create_test_market();
        let position = market
            .deposit_at_maturity(ctx(ALICE, START), MATURITY, wad(100), wad(100), ALICE)
            .unwrap();
        assert_eq!(position, wad(100));
        assert_eq!(market.fixed_pool(MATURITY).supplied, wad(100));
        assert_eq!(market.fixed_deposit_position(MATURITY, ALICE).principal, wad(100));
    }

    #[test]
    fn test_deposit_rejects_invalid_maturity() {
        let mut market = create_test_market();
        let err = market
            .deposit_at_maturity(ctx(ALICE, START), MATURITY + 1, wad(1), U256::ZERO, ALICE)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnmatchedPoolState { state: PoolState::Invalid, .. }));

        let far = START + INTERVAL * 10;
        let err = market
            .deposit_at_maturity(ctx(ALICE, START), far, wad(1), U256::ZERO, ALICE)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnmatchedPoolState { state: PoolState::NotReady, .. }));
    }

    #[test]
    fn test_fixed_borrow_uses_backup() {
        let (mut market, now) = create_funded_market();
        let owed = market
            .borrow_at_maturity(ctx(BOB, now), MATURITY, wad(100), wad(200), BOB, BOB)
            .unwrap();
        assert!(owed > wad(100));

        let pool = market.fixed_pool(MATURITY);
        assert_eq!(pool.borrowed, wad(100));
        assert_eq!(market.floating_backup_borrowed(), wad(100));
        assert_eq!(market.backup_borrowed_by_pools().unwrap(), wad(100));
        // the whole fee is backed by floating liquidity
        assert_eq!(pool.unassigned_earnings, owed - wad(100));

        let position = market.fixed_borrow_position(MATURITY, BOB);
        assert_eq!(position.total().unwrap(), owed);
    }

    #[test]
    fn test_fixed_borrow_slippage() {
        let (mut market, now) = create_funded_market();
        let err = market
            .borrow_at_maturity(ctx(BOB, now), MATURITY, wad(100), wad(100), BOB, BOB)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Disagreement { .. }));
    }

    #[test]
    fn test_fixed_deposit_takes_unassigned_earnings() {
        let (mut market, now) = create_funded_market();
        market
            .borrow_at_maturity(ctx(BOB, now), MATURITY, wad(100), wad(200), BOB, BOB)
            .unwrap();
        let unassigned = market.fixed_pool(MATURITY).unassigned_earnings;

        let position = market
            .deposit_at_maturity(ctx(ALICE, now), MATURITY, wad(100), U256::ZERO, ALICE)
            .unwrap();
        let fee = position - wad(100);
        assert!(fee > U256::ZERO);
        // backup fee stays with the floating pool
        assert_eq!(fee + market.earnings_accumulator(), unassigned);
        assert_eq!(market.fixed_pool(MATURITY).unassigned_earnings, U256::ZERO);
        assert_eq!(market.floating_backup_borrowed(), U256::ZERO);
    }

    #[test]
    fn test_early_withdraw_is_discounted() {
        let (mut market, now) = create_funded_market();
        market
            .deposit_at_maturity(ctx(ALICE, now), MATURITY, wad(100), U256::ZERO, ALICE)
            .unwrap();
        let assets = market
            .withdraw_at_maturity(ctx(ALICE, now), MATURITY, wad(100), U256::ZERO, ALICE, ALICE)
            .unwrap();
        assert!(assets < wad(100));
        assert!(market.fixed_deposit_position(MATURITY, ALICE).is_empty());
        assert_eq!(market.fixed_pool(MATURITY).supplied, U256::ZERO);
    }

    #[test]
    fn test_withdraw_after_maturity_is_full() {
        let (mut market, now) = create_funded_market();
        market
            .deposit_at_maturity(ctx(ALICE, now), MATURITY, wad(100), U256::ZERO, ALICE)
            .unwrap();
        let assets = market
            .withdraw_at_maturity(ctx(ALICE, MATURITY + 1), MATURITY, wad(500), U256::ZERO, ALICE, ALICE)
            .unwrap();
        assert_eq!(assets, wad(100));
    }

    #[test]
    fn test_early_repay_is_discounted() {
        let (mut market, now) = create_funded_market();
        let owed = market
            .borrow_at_maturity(ctx(BOB, now), MATURITY, wad(100), wad(200), BOB, BOB)
            .unwrap();
        // an early repayment collects the pool's unassigned earnings as a discount
        let actual = market
            .repay_at_maturity(ctx(BOB, now), MATURITY, owed, owed, BOB)
            .unwrap();
        assert!(actual < owed);
        assert!(market.fixed_borrow_position(MATURITY, BOB).is_empty());
        assert_eq!(market.fixed_pool(MATURITY).borrowed, U256::ZERO);
        assert_eq!(market.floating_backup_borrowed(), U256::ZERO);
    }

    #[test]
    fn test_late_repay_pays_penalty() {
        let (mut market, now) = create_funded_market();
        let owed = market
            .borrow_at_maturity(ctx(BOB, now), MATURITY, wad(100), wad(200), BOB, BOB)
            .unwrap();
        let late = MATURITY + 86_400;
        let accumulator = market.earnings_accumulator();
        let actual = market
            .repay_at_maturity(ctx(BOB, late), MATURITY, owed, wad(200), BOB)
            .unwrap();
        let penalty = actual - owed;
        assert!(penalty > U256::ZERO);
        assert_eq!(market.earnings_accumulator(), accumulator + penalty);
    }

    #[test]
    fn test_repay_without_position() {
        let mut market = create_test_market();
        let err = market
            .repay_at_maturity(ctx(BOB, START), MATURITY, wad(1), wad(1), BOB)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ZeroRepay));
    }
}
