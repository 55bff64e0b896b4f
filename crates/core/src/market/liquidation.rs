//! Liquidation legs of a market: repaying a borrower's debt, seizing its
//! collateral and writing off bad debt.

use alloy_primitives::{Address, U256};
use tracing::warn;

use super::{Context, Market};
use crate::error::ProtocolError;
use crate::events::Event;
use crate::hooks::OperationKind;
use crate::math::{mul_div_down, try_add, try_sub, w_mul_down, zero_floor_sub};

impl Market {
    /// Repays up to `max_assets` of the borrower's debt, oldest maturity first
    /// and floating debt last. Early fixed repayments get no discount. Returns
    /// the assets repaid, late penalties included.
    pub fn liquidate_repay(
        &mut self,
        ctx: Context,
        borrower: Address,
        max_assets: U256,
    ) -> Result<U256, ProtocolError> {
        let maturities: Vec<u64> = self
            .accounts
            .get(&borrower)
            .map(|a| a.fixed_borrows.keys().copied().collect())
            .unwrap_or_default();

        let mut remaining = max_assets;
        let mut repaid = U256::ZERO;
        for maturity in maturities {
            if remaining.is_zero() {
                break;
            }
            let actual = if ctx.timestamp < maturity {
                self.no_transfer_repay_at_maturity(ctx, maturity, remaining, remaining, borrower, false)?
            } else {
                let position_assets = self.fixed_borrow_position(maturity, borrower).total()?;
                let debt = try_add(
                    position_assets,
                    w_mul_down(position_assets, self.penalty_rate_over(ctx.timestamp - maturity))?,
                )?;
                let covered = if debt > remaining {
                    mul_div_down(remaining, position_assets, debt)?
                } else {
                    position_assets
                };
                if covered.is_zero() {
                    break;
                }
                self.no_transfer_repay_at_maturity(ctx, maturity, covered, remaining, borrower, false)?
            };
            remaining = try_sub(remaining, actual)?;
            repaid = try_add(repaid, actual)?;
        }

        let floating_shares = self
            .accounts
            .get(&borrower)
            .map(|a| a.floating_borrow_shares)
            .unwrap_or_default();
        if !remaining.is_zero() && !floating_shares.is_zero() {
            let shares = self.preview_repay(remaining, ctx.timestamp)?;
            if !shares.is_zero() {
                let (assets, _) = self.no_transfer_refund(ctx, shares, borrower)?;
                repaid = try_add(repaid, assets)?;
            }
        }

        self.emit_market_update(ctx.timestamp);
        Ok(repaid)
    }

    /// Burns the borrower's shares worth `assets` on behalf of a liquidator.
    /// Returns the shares burnt.
    pub fn seize(&mut self, ctx: Context, borrower: Address, assets: U256) -> Result<U256, ProtocolError> {
        if assets.is_zero() {
            return Err(ProtocolError::ZeroWithdraw);
        }
        let shares = self.preview_withdraw(assets, ctx.timestamp)?;
        self.before_withdraw(assets, ctx.timestamp)?;
        self.burn_shares(borrower, shares)?;

        self.notify(borrower, OperationKind::Deposit);
        self.emit(Event::Withdraw {
            market: self.address,
            caller: ctx.caller,
            receiver: ctx.caller,
            owner: borrower,
            assets,
            shares,
        });
        self.emit(Event::Seize {
            market: self.address,
            liquidator: ctx.caller,
            borrower,
            assets,
        });
        self.emit_market_update(ctx.timestamp);
        Ok(shares)
    }

    /// Writes off the borrower's debt against the earnings accumulator. Each
    /// fixed position is cleared only if the accumulator covers it in full;
    /// the floating debt is refunded as far as the accumulator reaches.
    /// Returns the total written off.
    pub fn clear_bad_debt(&mut self, ctx: Context, borrower: Address) -> Result<U256, ProtocolError> {
        let earnings = self.accrue_accumulated_earnings(ctx.timestamp)?;
        self.floating_assets = try_add(self.floating_assets, earnings)?;

        let positions: Vec<_> = self
            .accounts
            .get(&borrower)
            .map(|a| a.fixed_borrows.iter().map(|(m, p)| (*m, *p)).collect())
            .unwrap_or_default();

        let mut total_bad_debt = U256::ZERO;
        for (maturity, position) in positions {
            let bad_debt = position.total()?;
            if self.earnings_accumulator < bad_debt {
                continue;
            }
            self.earnings_accumulator -= bad_debt;
            total_bad_debt = try_add(total_bad_debt, bad_debt)?;

            let backup_reduction = self.pool_mut(maturity).repay(position.principal)?;
            self.subtract_backup(backup_reduction)?;
            self.account_mut(borrower).fixed_borrows.remove(&maturity);

            self.notify(borrower, OperationKind::FixedBorrow { maturity });
            self.emit(Event::RepayAtMaturity {
                market: self.address,
                maturity,
                caller: ctx.caller,
                borrower,
                assets: bad_debt,
                position_assets: bad_debt,
            });
        }

        let floating_shares = self
            .accounts
            .get(&borrower)
            .map(|a| a.floating_borrow_shares)
            .unwrap_or_default();
        if !floating_shares.is_zero() {
            let covered = self.preview_repay(self.earnings_accumulator, ctx.timestamp)?;
            if !covered.is_zero() {
                let (assets, _) = self.no_transfer_refund(ctx, floating_shares.min(covered), borrower)?;
                self.earnings_accumulator = zero_floor_sub(self.earnings_accumulator, assets);
                total_bad_debt = try_add(total_bad_debt, assets)?;
            }
        }

        if !total_bad_debt.is_zero() {
            warn!(market = %self.address, borrower = %borrower, assets = %total_bad_debt, "bad debt spread");
            self.emit(Event::SpreadBadDebt {
                market: self.address,
                borrower,
                assets: total_bad_debt,
            });
        }
        self.emit_market_update(ctx.timestamp);
        Ok(total_bad_debt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed_pool::INTERVAL;
    use crate::market::tests::{create_test_market, ctx, wad, ALICE, BOB, START};

    const MATURITY: u64 = START + INTERVAL;

    fn create_test_borrower() -> (Market, u64) {
        let mut market = create_test_market();
        market.deposit(ctx(ALICE, START), wad(1_000), ALICE).unwrap();
        let now = START + 10_000;
        market.deposit(ctx(BOB, now), wad(100), BOB).unwrap();
        market.borrow(ctx(BOB, now), wad(50), BOB, BOB).unwrap();
        market
            .borrow_at_maturity(ctx(BOB, now), MATURITY, wad(50), wad(100), BOB, BOB)
            .unwrap();
        (market, now)
    }

    #[test]
    fn test_liquidate_repay_fixed_first() {
        let (mut market, now) = create_test_borrower();
        let fixed_debt = market.fixed_borrow_position(MATURITY, BOB).total().unwrap();

        let repaid = market.liquidate_repay(ctx(ALICE, now), BOB, wad(10)).unwrap();
        assert_eq!(repaid, wad(10));
        let left = market.fixed_borrow_position(MATURITY, BOB).total().unwrap();
        assert_eq!(left, fixed_debt - wad(10));
        assert_eq!(market.account(BOB).unwrap().floating_borrow_shares, wad(50));
    }

    #[test]
    fn test_liquidate_repay_spills_into_floating() {
        let (mut market, now) = create_test_borrower();
        let fixed_debt = market.fixed_borrow_position(MATURITY, BOB).total().unwrap();

        let repaid = market.liquidate_repay(ctx(ALICE, now), BOB, fixed_debt + wad(20)).unwrap();
        assert_eq!(repaid, fixed_debt + wad(20));
        assert!(market.fixed_borrow_position(MATURITY, BOB).is_empty());
        assert_eq!(market.floating_debt(), wad(30));
    }

    #[test]
    fn test_liquidate_repay_matured_includes_penalty() {
        let (mut market, _) = create_test_borrower();
        let late = MATURITY + 86_400;
        let repaid = market.liquidate_repay(ctx(ALICE, late), BOB, wad(5)).unwrap();
        assert!(repaid <= wad(5));
        assert!(market.earnings_accumulator() > U256::ZERO);
    }

    #[test]
    fn test_seize_burns_shares() {
        let (mut market, now) = create_test_borrower();
        let shares = market.seize(ctx(ALICE, now), BOB, wad(10)).unwrap();
        assert_eq!(market.balance_of(BOB), wad(100) - shares);

        let err = market.seize(ctx(ALICE, now), BOB, U256::ZERO).unwrap_err();
        assert!(matches!(err, ProtocolError::ZeroWithdraw));
    }

    #[test]
    fn test_clear_bad_debt_needs_accumulator() {
        let (mut market, now) = create_test_borrower();
        assert_eq!(market.clear_bad_debt(ctx(ALICE, now), BOB).unwrap(), U256::ZERO);
        assert!(!market.fixed_borrow_position(MATURITY, BOB).is_empty());

        market.add_to_earnings_accumulator(wad(500)).unwrap();
        let cleared = market.clear_bad_debt(ctx(ALICE, now), BOB).unwrap();
        assert!(cleared >= wad(100));
        assert!(market.fixed_borrow_position(MATURITY, BOB).is_empty());
        assert_eq!(market.account(BOB).unwrap().floating_borrow_shares, U256::ZERO);
        assert_eq!(market.floating_backup_borrowed(), U256::ZERO);
        assert_eq!(market.earnings_accumulator(), wad(500) - cleared);
    }

    #[test]
    fn test_clear_bad_debt_refunds_floating_partially() {
        let mut market = create_test_market();
        market.deposit(ctx(ALICE, START), wad(1_000), ALICE).unwrap();
        market.deposit(ctx(BOB, START), wad(100), BOB).unwrap();
        market.borrow(ctx(BOB, START), wad(50), BOB, BOB).unwrap();
        market.add_to_earnings_accumulator(wad(20)).unwrap();

        let cleared = market.clear_bad_debt(ctx(ALICE, START), BOB).unwrap();
        assert_eq!(cleared, wad(20));
        assert_eq!(market.earnings_accumulator(), U256::ZERO);
        assert_eq!(market.floating_debt(), wad(30));
        assert_eq!(market.account(BOB).unwrap().floating_borrow_shares, wad(30));
    }
}
