//! Per-asset market: a floating-rate pool with ERC4626-style share accounting
//! and a family of fixed-rate pools, one per maturity.
//!
//! # Floating pool
//!
//! `floating_assets` counts everything deposited into the floating pool,
//! including what is currently lent out. Floating borrowers hold borrow shares
//! over `floating_debt`; interest accrues lazily on every touch. Fixed pools
//! may draw on floating liquidity when their own supply does not cover their
//! borrows, tracked in `floating_backup_borrowed`.
//!
//! ```text
//! total_assets = floating_assets
//!              + pending fixed pool earnings
//!              + released share of the earnings accumulator
//!              + pending floating interest * (1 - treasury_fee_rate)
//! ```
//!
//! # Earnings accumulator
//!
//! Penalties, backup fees and the lenders' share of liquidations are parked in
//! `earnings_accumulator` and released into the floating pool gradually:
//!
//! ```text
//! released = accumulator * elapsed / (elapsed + smooth_factor * max_future_pools * INTERVAL)
//! ```
//!
//! Market operations only move ledger state. Token movements and solvency
//! checks are orchestrated by [`crate::protocol::State`].

mod fixed;
mod floating;
mod liquidation;

use std::collections::{BTreeMap, HashMap};

use alloy_primitives::{Address, U256};
use tracing::{debug, info};

use crate::auditor::MarketView;
use crate::config::MarketConfig;
use crate::error::ProtocolError;
use crate::events::Event;
use crate::fixed_pool::{FixedPool, FixedPosition, INTERVAL};
use crate::hooks::{BalanceChange, OperationKind};
use crate::irm::InterestRateModel;
use crate::math::{
    exp_wad, mul_div_down, try_add, try_sub, w_mul_down, zero_floor_sub, SECONDS_PER_YEAR, WAD,
};

/// Who is calling and when
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub caller: Address,
    pub timestamp: u64,
}

impl Context {
    pub fn new(caller: Address, timestamp: u64) -> Self {
        Self { caller, timestamp }
    }
}

/// Borrow and fixed positions of one account in one market
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub floating_borrow_shares: U256,
    /// Open fixed deposits keyed by maturity
    pub fixed_deposits: BTreeMap<u64, FixedPosition>,
    /// Open fixed borrows keyed by maturity
    pub fixed_borrows: BTreeMap<u64, FixedPosition>,
}

impl Account {
    pub fn is_empty(&self) -> bool {
        self.floating_borrow_shares.is_zero()
            && self.fixed_deposits.is_empty()
            && self.fixed_borrows.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
struct Outbox {
    events: Vec<Event>,
    balance_changes: Vec<BalanceChange>,
}

#[derive(Debug, Clone)]
pub struct Market {
    address: Address,
    asset: Address,
    decimals: u8,
    auditor: Address,
    treasury: Address,
    config: MarketConfig,
    irm: InterestRateModel,

    floating_assets: U256,
    floating_debt: U256,
    floating_backup_borrowed: U256,
    floating_assets_average: U256,
    earnings_accumulator: U256,
    total_floating_borrow_shares: U256,
    total_supply: U256,
    last_accumulator_accrual: u64,
    last_floating_debt_update: u64,
    last_average_update: u64,

    fixed_pools: BTreeMap<u64, FixedPool>,
    accounts: HashMap<Address, Account>,
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,

    outbox: Outbox,
}

impl Market {
    /// Creates an empty market supervised by `auditor`
    pub fn new(
        address: Address,
        asset: Address,
        decimals: u8,
        auditor: Address,
        config: MarketConfig,
        timestamp: u64,
    ) -> Result<Self, ProtocolError> {
        config.validate()?;
        let irm = InterestRateModel::new(config.interest_rate_model)?;
        Ok(Self {
            address,
            asset,
            decimals,
            auditor,
            treasury: Address::ZERO,
            config,
            irm,
            floating_assets: U256::ZERO,
            floating_debt: U256::ZERO,
            floating_backup_borrowed: U256::ZERO,
            floating_assets_average: U256::ZERO,
            earnings_accumulator: U256::ZERO,
            total_floating_borrow_shares: U256::ZERO,
            total_supply: U256::ZERO,
            last_accumulator_accrual: timestamp,
            last_floating_debt_update: timestamp,
            last_average_update: timestamp,
            fixed_pools: BTreeMap::new(),
            accounts: HashMap::new(),
            balances: HashMap::new(),
            allowances: HashMap::new(),
            outbox: Outbox::default(),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn asset(&self) -> Address {
        self.asset
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn auditor(&self) -> Address {
        self.auditor
    }

    pub fn treasury(&self) -> Address {
        self.treasury
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn interest_rate_model(&self) -> &InterestRateModel {
        &self.irm
    }

    pub fn floating_assets(&self) -> U256 {
        self.floating_assets
    }

    pub fn floating_debt(&self) -> U256 {
        self.floating_debt
    }

    pub fn floating_backup_borrowed(&self) -> U256 {
        self.floating_backup_borrowed
    }

    /// Stored average, as of the last update
    pub fn floating_assets_average(&self) -> U256 {
        self.floating_assets_average
    }

    pub fn earnings_accumulator(&self) -> U256 {
        self.earnings_accumulator
    }

    pub fn total_floating_borrow_shares(&self) -> U256 {
        self.total_floating_borrow_shares
    }

    pub fn total_supply(&self) -> U256 {
        self.total_supply
    }

    pub fn balance_of(&self, account: Address) -> U256 {
        self.balances.get(&account).copied().unwrap_or_default()
    }

    /// Share holders with a non-zero balance
    pub fn holders(&self) -> impl Iterator<Item = (&Address, &U256)> {
        self.balances.iter().filter(|(_, balance)| !balance.is_zero())
    }

    pub fn allowance(&self, owner: Address, spender: Address) -> U256 {
        self.allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default()
    }

    pub fn account(&self, account: Address) -> Option<&Account> {
        self.accounts.get(&account)
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &Account)> {
        self.accounts.iter()
    }

    /// Pool at `maturity`; untouched maturities read as empty
    pub fn fixed_pool(&self, maturity: u64) -> FixedPool {
        self.fixed_pools.get(&maturity).copied().unwrap_or_default()
    }

    pub fn fixed_pools(&self) -> &BTreeMap<u64, FixedPool> {
        &self.fixed_pools
    }

    pub fn fixed_deposit_position(&self, maturity: u64, account: Address) -> FixedPosition {
        self.accounts
            .get(&account)
            .and_then(|a| a.fixed_deposits.get(&maturity))
            .copied()
            .unwrap_or_default()
    }

    pub fn fixed_borrow_position(&self, maturity: u64, account: Address) -> FixedPosition {
        self.accounts
            .get(&account)
            .and_then(|a| a.fixed_borrows.get(&maturity))
            .copied()
            .unwrap_or_default()
    }

    /// Replaces the market parameters after accruing floating interest under
    /// the current ones
    pub fn update_config(&mut self, config: MarketConfig, timestamp: u64) -> Result<(), ProtocolError> {
        config.validate()?;
        let irm = InterestRateModel::new(config.interest_rate_model)?;
        let fee = self.update_floating_debt(timestamp)?;
        self.deposit_to_treasury(fee, timestamp)?;
        self.update_floating_assets_average(timestamp)?;
        self.config = config;
        self.irm = irm;
        info!(market = %self.address, "market parameters updated");
        self.emit_market_update(timestamp);
        Ok(())
    }

    pub fn set_treasury(
        &mut self,
        treasury: Address,
        treasury_fee_rate: U256,
        timestamp: u64,
    ) -> Result<(), ProtocolError> {
        let mut config = self.config;
        config.treasury_fee_rate = treasury_fee_rate;
        config.validate()?;
        let fee = self.update_floating_debt(timestamp)?;
        self.deposit_to_treasury(fee, timestamp)?;
        self.treasury = treasury;
        self.config = config;
        info!(market = %self.address, treasury = %treasury, %treasury_fee_rate, "treasury updated");
        Ok(())
    }

    /// Annualized floating rate at the current ledger state
    pub fn floating_rate(&self) -> Result<U256, ProtocolError> {
        self.irm.current_floating_rate(
            self.floating_assets,
            self.floating_debt,
            self.floating_backup_borrowed,
        )
    }

    fn pending_floating_interest(&self, timestamp: u64) -> Result<U256, ProtocolError> {
        let elapsed = timestamp.saturating_sub(self.last_floating_debt_update);
        if elapsed == 0 || self.floating_debt.is_zero() {
            return Ok(U256::ZERO);
        }
        let rate = self.floating_rate()?;
        let accrual = mul_div_down(rate, U256::from(elapsed), U256::from(SECONDS_PER_YEAR))?;
        w_mul_down(self.floating_debt, accrual)
    }

    /// Floating debt including interest not yet accrued
    pub fn total_floating_borrow_assets(&self, timestamp: u64) -> Result<U256, ProtocolError> {
        try_add(self.floating_debt, self.pending_floating_interest(timestamp)?)
    }

    /// Accrues floating interest. Returns the treasury's cut, which the
    /// caller must deposit with [`Self::deposit_to_treasury`].
    fn update_floating_debt(&mut self, timestamp: u64) -> Result<U256, ProtocolError> {
        let new_debt = self.pending_floating_interest(timestamp)?;
        self.last_floating_debt_update = self.last_floating_debt_update.max(timestamp);
        if new_debt.is_zero() {
            return Ok(U256::ZERO);
        }
        let treasury_fee = w_mul_down(new_debt, self.config.treasury_fee_rate)?;
        self.floating_debt = try_add(self.floating_debt, new_debt)?;
        self.floating_assets = try_add(self.floating_assets, new_debt - treasury_fee)?;
        debug!(market = %self.address, %new_debt, %treasury_fee, "accrued floating interest");
        Ok(treasury_fee)
    }

    fn deposit_to_treasury(&mut self, fee: U256, timestamp: u64) -> Result<(), ProtocolError> {
        if fee.is_zero() {
            return Ok(());
        }
        let shares = self.preview_deposit(fee, timestamp)?;
        self.mint_shares(self.treasury, shares)?;
        self.floating_assets = try_add(self.floating_assets, fee)?;
        Ok(())
    }

    /// Share of the earnings accumulator released since the last accrual
    pub fn accumulated_earnings(&self, timestamp: u64) -> Result<U256, ProtocolError> {
        let elapsed = timestamp.saturating_sub(self.last_accumulator_accrual);
        if elapsed == 0 {
            return Ok(U256::ZERO);
        }
        let horizon = w_mul_down(
            self.config.earnings_accumulator_smooth_factor,
            U256::from(u64::from(self.config.max_future_pools) * INTERVAL),
        )?;
        mul_div_down(
            self.earnings_accumulator,
            U256::from(elapsed),
            try_add(U256::from(elapsed), horizon)?,
        )
    }

    fn accrue_accumulated_earnings(&mut self, timestamp: u64) -> Result<U256, ProtocolError> {
        let earnings = self.accumulated_earnings(timestamp)?;
        self.earnings_accumulator = try_sub(self.earnings_accumulator, earnings)?;
        self.last_accumulator_accrual = self.last_accumulator_accrual.max(timestamp);
        Ok(earnings)
    }

    pub(crate) fn add_to_earnings_accumulator(&mut self, amount: U256) -> Result<(), ProtocolError> {
        self.earnings_accumulator = try_add(self.earnings_accumulator, amount)?;
        Ok(())
    }

    /// Exponentially damped average of floating assets. Rises slowly and
    /// falls quickly.
    pub fn preview_floating_assets_average(&self, timestamp: u64) -> Result<U256, ProtocolError> {
        let elapsed = timestamp.saturating_sub(self.last_average_update);
        let damp_speed = if self.floating_assets < self.floating_assets_average {
            self.config.damp_speed_down
        } else {
            self.config.damp_speed_up
        };
        let exponent = damp_speed
            .saturating_mul(U256::from(elapsed))
            .saturating_to::<i128>();
        let average_factor = WAD.saturating_sub(exp_wad(-exponent)?);
        try_add(
            w_mul_down(self.floating_assets_average, WAD - average_factor)?,
            w_mul_down(average_factor, self.floating_assets)?,
        )
    }

    fn update_floating_assets_average(&mut self, timestamp: u64) -> Result<(), ProtocolError> {
        self.floating_assets_average = self.preview_floating_assets_average(timestamp)?;
        self.last_average_update = self.last_average_update.max(timestamp);
        Ok(())
    }

    /// Assets owned by floating depositors, including everything accrued but
    /// not yet recorded
    pub fn total_assets(&self, timestamp: u64) -> Result<U256, ProtocolError> {
        let mut backup_earnings = U256::ZERO;
        for (maturity, pool) in &self.fixed_pools {
            backup_earnings = try_add(backup_earnings, pool.pending_earnings(*maturity, timestamp)?)?;
        }
        let pending_interest = w_mul_down(
            self.pending_floating_interest(timestamp)?,
            WAD - self.config.treasury_fee_rate,
        )?;
        try_add(
            try_add(self.floating_assets, backup_earnings)?,
            try_add(self.accumulated_earnings(timestamp)?, pending_interest)?,
        )
    }

    fn after_deposit(&mut self, assets: U256, timestamp: u64) -> Result<(), ProtocolError> {
        self.update_floating_assets_average(timestamp)?;
        let treasury_fee = self.update_floating_debt(timestamp)?;
        let earnings = self.accrue_accumulated_earnings(timestamp)?;
        self.floating_assets = try_add(self.floating_assets, try_add(earnings, assets)?)?;
        self.deposit_to_treasury(treasury_fee, timestamp)
    }

    /// Fails with [`ProtocolError::InsufficientProtocolLiquidity`] if the
    /// assets are lent out to floating or fixed borrowers
    fn before_withdraw(&mut self, assets: U256, timestamp: u64) -> Result<(), ProtocolError> {
        self.update_floating_assets_average(timestamp)?;
        let treasury_fee = self.update_floating_debt(timestamp)?;
        self.deposit_to_treasury(treasury_fee, timestamp)?;
        let earnings = self.accrue_accumulated_earnings(timestamp)?;
        let new_floating_assets = try_add(self.floating_assets, earnings)?
            .checked_sub(assets)
            .ok_or(ProtocolError::InsufficientProtocolLiquidity {
                market: self.address,
            })?;
        if try_add(self.floating_backup_borrowed, self.floating_debt)? > new_floating_assets {
            return Err(ProtocolError::InsufficientProtocolLiquidity {
                market: self.address,
            });
        }
        self.floating_assets = new_floating_assets;
        Ok(())
    }

    /// Mints the treasury's cut of `earnings`. Returns the remainder.
    fn charge_treasury_fee(&mut self, earnings: U256, timestamp: u64) -> Result<U256, ProtocolError> {
        let fee = w_mul_down(earnings, self.config.treasury_fee_rate)?;
        self.deposit_to_treasury(fee, timestamp)?;
        Ok(earnings - fee)
    }

    /// Earnings no floating depositor backed go to the treasury if it takes
    /// a fee, otherwise to the accumulator
    fn collect_free_lunch(&mut self, earnings: U256, timestamp: u64) -> Result<(), ProtocolError> {
        if earnings.is_zero() {
            return Ok(());
        }
        if self.config.treasury_fee_rate.is_zero() {
            self.add_to_earnings_accumulator(earnings)
        } else {
            self.deposit_to_treasury(earnings, timestamp)
        }
    }

    /// Total debt of `account`, fixed positions with late penalties plus
    /// floating debt with pending interest
    pub fn preview_debt(&self, account: Address, timestamp: u64) -> Result<U256, ProtocolError> {
        let Some(data) = self.accounts.get(&account) else {
            return Ok(U256::ZERO);
        };
        let mut debt = U256::ZERO;
        for (maturity, position) in &data.fixed_borrows {
            let position_assets = position.total()?;
            debt = try_add(debt, position_assets)?;
            if timestamp > *maturity {
                let penalty = w_mul_down(position_assets, self.penalty_rate_over(timestamp - maturity))?;
                debt = try_add(debt, penalty)?;
            }
        }
        if !data.floating_borrow_shares.is_zero() {
            debt = try_add(debt, self.preview_refund(data.floating_borrow_shares, timestamp)?)?;
        }
        Ok(debt)
    }

    fn penalty_rate_over(&self, elapsed: u64) -> U256 {
        self.config.penalty_rate.saturating_mul(U256::from(elapsed))
    }

    fn account_mut(&mut self, account: Address) -> &mut Account {
        self.accounts.entry(account).or_default()
    }

    fn pool_mut(&mut self, maturity: u64) -> &mut FixedPool {
        self.fixed_pools.entry(maturity).or_default()
    }

    /// Releases a pool's elapsed earnings into the floating pool
    fn accrue_pool(&mut self, maturity: u64, timestamp: u64) -> Result<(), ProtocolError> {
        let earnings = self.pool_mut(maturity).accrue_earnings(maturity, timestamp)?;
        self.floating_assets = try_add(self.floating_assets, earnings)?;
        Ok(())
    }

    fn mint_shares(&mut self, to: Address, shares: U256) -> Result<(), ProtocolError> {
        self.total_supply = try_add(self.total_supply, shares)?;
        let balance = self.balances.entry(to).or_default();
        *balance = try_add(*balance, shares)?;
        Ok(())
    }

    fn burn_shares(&mut self, from: Address, shares: U256) -> Result<(), ProtocolError> {
        let balance = self.balance_of(from);
        if balance < shares {
            return Err(ProtocolError::InsufficientShares {
                account: from,
                balance,
                required: shares,
            });
        }
        self.balances.insert(from, balance - shares);
        self.total_supply = try_sub(self.total_supply, shares)?;
        Ok(())
    }

    fn spend_share_allowance(
        &mut self,
        owner: Address,
        spender: Address,
        shares: U256,
    ) -> Result<(), ProtocolError> {
        if owner == spender {
            return Ok(());
        }
        let allowance = self.allowance(owner, spender);
        if allowance == U256::MAX {
            return Ok(());
        }
        if allowance < shares {
            return Err(ProtocolError::InsufficientAllowance {
                owner,
                spender,
                allowance,
                required: shares,
            });
        }
        self.allowances.insert((owner, spender), allowance - shares);
        Ok(())
    }

    /// Spends the share allowance `assets` would take to withdraw. Used when
    /// borrowing on behalf of another account.
    fn spend_allowance(
        &mut self,
        owner: Address,
        spender: Address,
        assets: U256,
        timestamp: u64,
    ) -> Result<(), ProtocolError> {
        if owner == spender {
            return Ok(());
        }
        let shares = self.preview_withdraw(assets, timestamp)?;
        self.spend_share_allowance(owner, spender, shares)
    }

    fn notify(&mut self, account: Address, operation: OperationKind) {
        let new_balance = match operation {
            OperationKind::Deposit => self.balance_of(account),
            OperationKind::Borrow => self
                .accounts
                .get(&account)
                .map(|a| a.floating_borrow_shares)
                .unwrap_or_default(),
            OperationKind::FixedDeposit { maturity } => {
                let position = self.fixed_deposit_position(maturity, account);
                position.principal.saturating_add(position.fee)
            }
            OperationKind::FixedBorrow { maturity } => {
                let position = self.fixed_borrow_position(maturity, account);
                position.principal.saturating_add(position.fee)
            }
        };
        self.outbox.balance_changes.push(BalanceChange {
            account,
            market: self.address,
            operation,
            new_balance,
        });
    }

    pub(crate) fn emit(&mut self, event: Event) {
        self.outbox.events.push(event);
    }

    fn emit_market_update(&mut self, timestamp: u64) {
        self.emit(Event::MarketUpdate {
            market: self.address,
            timestamp,
            floating_deposit_shares: self.total_supply,
            floating_assets: self.floating_assets,
            floating_borrow_shares: self.total_floating_borrow_shares,
            floating_debt: self.floating_debt,
            earnings_accumulator: self.earnings_accumulator,
        });
    }

    fn emit_fixed_earnings_update(&mut self, maturity: u64, timestamp: u64) {
        let unassigned_earnings = self.fixed_pool(maturity).unassigned_earnings;
        self.emit(Event::FixedEarningsUpdate {
            market: self.address,
            timestamp,
            maturity,
            unassigned_earnings,
        });
    }

    /// Takes the events and balance changes buffered since the last drain
    pub(crate) fn drain_outbox(&mut self) -> (Vec<Event>, Vec<BalanceChange>) {
        let outbox = std::mem::take(&mut self.outbox);
        (outbox.events, outbox.balance_changes)
    }

    /// Sum of backup borrowing over every pool, recomputed from the pools
    pub fn backup_borrowed_by_pools(&self) -> Result<U256, ProtocolError> {
        self.fixed_pools
            .values()
            .try_fold(U256::ZERO, |sum, pool| try_add(sum, pool.backup_supplied()))
    }

    fn subtract_backup(&mut self, reduction: U256) -> Result<(), ProtocolError> {
        self.floating_backup_borrowed = try_sub(self.floating_backup_borrowed, reduction)?;
        Ok(())
    }

    fn reduce_floating_debt(&mut self, assets: U256) {
        self.floating_debt = zero_floor_sub(self.floating_debt, assets);
    }
}

impl MarketView for Market {
    fn decimals(&self) -> u8 {
        self.decimals
    }

    fn auditor(&self) -> Address {
        self.auditor
    }

    fn account_snapshot(&self, account: Address, timestamp: u64) -> Result<(U256, U256), ProtocolError> {
        let collateral = self.convert_to_assets(self.balance_of(account), timestamp)?;
        Ok((collateral, self.preview_debt(account, timestamp)?))
    }

    fn max_withdraw(&self, owner: Address, timestamp: u64) -> Result<U256, ProtocolError> {
        self.convert_to_assets(self.balance_of(owner), timestamp)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const MARKET: Address = Address::repeat_byte(0x10);
    pub(crate) const ASSET: Address = Address::repeat_byte(0xa0);
    pub(crate) const AUDITOR: Address = Address::repeat_byte(0xff);
    pub(crate) const ALICE: Address = Address::repeat_byte(1);
    pub(crate) const BOB: Address = Address::repeat_byte(2);
    pub(crate) const START: u64 = INTERVAL * 100;

    pub(crate) fn wad(x: u64) -> U256 {
        U256::from(x) * WAD
    }

    pub(crate) fn ctx(caller: Address, timestamp: u64) -> Context {
        Context::new(caller, timestamp)
    }

    pub(crate) fn create_test_market() -> Market {
        Market::new(MARKET, ASSET, 18, AUDITOR, MarketConfig::default(), START).unwrap()
    }

    #[test]
    fn test_new_market_is_empty() {
        let market = create_test_market();
        assert_eq!(market.total_assets(START).unwrap(), U256::ZERO);
        assert_eq!(market.total_supply(), U256::ZERO);
        assert_eq!(market.fixed_pool(START + INTERVAL), FixedPool::default());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = MarketConfig::default();
        config.max_future_pools = 0;
        assert!(Market::new(MARKET, ASSET, 18, AUDITOR, config, START).is_err());
    }

    #[test]
    fn test_accumulated_earnings_release() {
        let mut market = create_test_market();
        market.earnings_accumulator = wad(100);
        let horizon = 3 * INTERVAL;

        assert_eq!(market.accumulated_earnings(START).unwrap(), U256::ZERO);
        // after one full horizon half of the accumulator is released
        assert_eq!(market.accumulated_earnings(START + horizon).unwrap(), wad(50));
        assert_eq!(market.total_assets(START + horizon).unwrap(), wad(50));
    }

    #[test]
    fn test_floating_assets_average_damping() {
        let mut market = create_test_market();
        market.floating_assets = wad(100);

        let soon = market.preview_floating_assets_average(START + 10).unwrap();
        let later = market.preview_floating_assets_average(START + 2_000).unwrap();
        assert!(soon > U256::ZERO);
        assert!(soon < later);
        assert!(later <= wad(100));

        // averages fall faster than they rise
        market.floating_assets_average = wad(100);
        market.floating_assets = U256::ZERO;
        let fallen = market.preview_floating_assets_average(START + 10).unwrap();
        assert!(fallen < wad(2));
    }

    #[test]
    fn test_update_config_accrues_first() {
        let mut market = create_test_market();
        market.floating_assets = wad(100);
        market.floating_debt = wad(50);
        market.total_floating_borrow_shares = wad(50);

        let mut config = MarketConfig::default();
        config.reserve_factor = WAD / U256::from(10);
        market.update_config(config, START + 86_400).unwrap();

        assert!(market.floating_debt() > wad(50));
        assert_eq!(market.config().reserve_factor, WAD / U256::from(10));
    }

    #[test]
    fn test_preview_debt_includes_penalty() {
        let mut market = create_test_market();
        let maturity = START + INTERVAL;
        market
            .account_mut(ALICE)
            .fixed_borrows
            .insert(maturity, FixedPosition::new(wad(100), wad(1)));

        assert_eq!(market.preview_debt(ALICE, maturity).unwrap(), wad(101));
        let late = market.preview_debt(ALICE, maturity + 86_400).unwrap();
        let penalty = w_mul_down(wad(101), market.config().penalty_rate * U256::from(86_400)).unwrap();
        assert_eq!(late, wad(101) + penalty);
        // roughly 2% per day
        assert!(penalty > wad(2) && penalty < wad(203) / U256::from(100));
    }
}
