//! Protocol state and transactional entry points.
//!
//! [`State`] owns the auditor, every market and the token ledger, and
//! orchestrates each operation: ledger update in the market, solvency checks
//! in the auditor, then token movements. [`Protocol`] wraps the state and
//! runs every operation atomically: on error the state is restored and the
//! buffered events and reward notifications are discarded.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use tracing::{debug, info, warn};

use crate::auditor::Auditor;
use crate::config::{AuditorConfig, LiquidationIncentive, MarketConfig};
use crate::error::ProtocolError;
use crate::events::Event;
use crate::hooks::{coalesce, RewardHook};
use crate::market::{Context, Market};
use crate::math::try_add;
use crate::oracle::PriceSource;
use crate::token::TokenLedger;

/// Everything an operation can touch
#[derive(Debug, Clone)]
pub struct State {
    timestamp: u64,
    auditor: Auditor,
    markets: BTreeMap<Address, Market>,
    tokens: TokenLedger,
}

impl State {
    pub fn new(auditor: Auditor, timestamp: u64) -> Self {
        Self {
            timestamp,
            auditor,
            markets: BTreeMap::new(),
            tokens: TokenLedger::new(),
        }
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn auditor(&self) -> &Auditor {
        &self.auditor
    }

    pub fn markets(&self) -> &BTreeMap<Address, Market> {
        &self.markets
    }

    pub fn market(&self, market: Address) -> Result<&Market, ProtocolError> {
        self.markets
            .get(&market)
            .ok_or(ProtocolError::MarketNotFound { market })
    }

    fn market_mut(&mut self, market: Address) -> Result<&mut Market, ProtocolError> {
        self.markets
            .get_mut(&market)
            .ok_or(ProtocolError::MarketNotFound { market })
    }

    pub fn tokens(&self) -> &TokenLedger {
        &self.tokens
    }

    pub fn tokens_mut(&mut self) -> &mut TokenLedger {
        &mut self.tokens
    }

    fn ctx(&self, caller: Address) -> Context {
        Context::new(caller, self.timestamp)
    }

    /// Pulls `amount` of the market's asset from `from`, which must have
    /// approved the market
    fn pull(&mut self, market: Address, from: Address, amount: U256) -> Result<(), ProtocolError> {
        let asset = self.market(market)?.asset();
        self.tokens.transfer_from(asset, market, from, market, amount)
    }

    fn push(&mut self, market: Address, to: Address, amount: U256) -> Result<(), ProtocolError> {
        let asset = self.market(market)?.asset();
        self.tokens.transfer(asset, market, to, amount)
    }

    /// Adjusted `(collateral, debt)` of `account` across entered markets
    pub fn account_liquidity(&self, account: Address) -> Result<(U256, U256), ProtocolError> {
        self.auditor
            .account_liquidity(account, None, U256::ZERO, &self.markets, self.timestamp)
    }

    pub fn add_market(&mut self, market: Market) -> Result<(), ProtocolError> {
        let address = market.address();
        if self.markets.contains_key(&address) {
            return Err(ProtocolError::MarketAlreadyExists { market: address });
        }
        info!(market = %address, asset = %market.asset(), "market created");
        self.markets.insert(address, market);
        Ok(())
    }

    pub fn enable_market(
        &mut self,
        market: Address,
        price_source: PriceSource,
        adjust_factor: U256,
    ) -> Result<(), ProtocolError> {
        let view = self
            .markets
            .get(&market)
            .ok_or(ProtocolError::MarketNotFound { market })?;
        self.auditor
            .enable_market(market, view, price_source, adjust_factor)
    }

    pub fn set_adjust_factor(&mut self, market: Address, adjust_factor: U256) -> Result<(), ProtocolError> {
        self.auditor.set_adjust_factor(market, adjust_factor)
    }

    pub fn set_price_source(&mut self, market: Address, price_source: PriceSource) -> Result<(), ProtocolError> {
        self.auditor.set_price_source(market, price_source)
    }

    pub fn set_liquidation_incentive(&mut self, incentive: LiquidationIncentive) -> Result<(), ProtocolError> {
        self.auditor.set_liquidation_incentive(incentive)
    }

    pub fn set_market_config(&mut self, market: Address, config: MarketConfig) -> Result<(), ProtocolError> {
        let timestamp = self.timestamp;
        self.market_mut(market)?.update_config(config, timestamp)
    }

    pub fn set_treasury(
        &mut self,
        market: Address,
        treasury: Address,
        treasury_fee_rate: U256,
    ) -> Result<(), ProtocolError> {
        let timestamp = self.timestamp;
        self.market_mut(market)?
            .set_treasury(treasury, treasury_fee_rate, timestamp)
    }

    pub fn enter_market(&mut self, account: Address, market: Address) -> Result<(), ProtocolError> {
        self.auditor.enter_market(account, market)
    }

    pub fn exit_market(&mut self, account: Address, market: Address) -> Result<(), ProtocolError> {
        self.auditor
            .exit_market(account, market, &self.markets, self.timestamp)
    }

    pub fn deposit(
        &mut self,
        caller: Address,
        market: Address,
        assets: U256,
        receiver: Address,
    ) -> Result<U256, ProtocolError> {
        let ctx = self.ctx(caller);
        let shares = self.market_mut(market)?.deposit(ctx, assets, receiver)?;
        self.pull(market, caller, assets)?;
        info!(market = %market, caller = %caller, receiver = %receiver, %assets, %shares, "deposit");
        Ok(shares)
    }

    pub fn mint(
        &mut self,
        caller: Address,
        market: Address,
        shares: U256,
        receiver: Address,
    ) -> Result<U256, ProtocolError> {
        let ctx = self.ctx(caller);
        let assets = self.market_mut(market)?.mint(ctx, shares, receiver)?;
        self.pull(market, caller, assets)?;
        info!(market = %market, caller = %caller, receiver = %receiver, %assets, %shares, "mint");
        Ok(assets)
    }

    pub fn withdraw(
        &mut self,
        caller: Address,
        market: Address,
        assets: U256,
        receiver: Address,
        owner: Address,
    ) -> Result<U256, ProtocolError> {
        self.auditor
            .check_shortfall(market, owner, assets, &self.markets, self.timestamp)?;
        let ctx = self.ctx(caller);
        let shares = self
            .market_mut(market)?
            .withdraw(ctx, assets, receiver, owner)?;
        self.push(market, receiver, assets)?;
        info!(market = %market, owner = %owner, receiver = %receiver, %assets, %shares, "withdraw");
        Ok(shares)
    }

    pub fn redeem(
        &mut self,
        caller: Address,
        market: Address,
        shares: U256,
        receiver: Address,
        owner: Address,
    ) -> Result<U256, ProtocolError> {
        let preview = self.market(market)?.preview_redeem(shares, self.timestamp)?;
        self.auditor
            .check_shortfall(market, owner, preview, &self.markets, self.timestamp)?;
        let ctx = self.ctx(caller);
        let assets = self
            .market_mut(market)?
            .redeem(ctx, shares, receiver, owner)?;
        self.push(market, receiver, assets)?;
        info!(market = %market, owner = %owner, receiver = %receiver, %assets, %shares, "redeem");
        Ok(assets)
    }

    /// Transfers floating shares. The sender must stay solvent without them.
    pub fn transfer_shares(
        &mut self,
        caller: Address,
        market: Address,
        to: Address,
        shares: U256,
    ) -> Result<(), ProtocolError> {
        let assets = self.market(market)?.preview_redeem(shares, self.timestamp)?;
        self.auditor
            .check_shortfall(market, caller, assets, &self.markets, self.timestamp)?;
        self.market_mut(market)?.transfer(caller, to, shares)
    }

    pub fn transfer_shares_from(
        &mut self,
        caller: Address,
        market: Address,
        from: Address,
        to: Address,
        shares: U256,
    ) -> Result<(), ProtocolError> {
        let assets = self.market(market)?.preview_redeem(shares, self.timestamp)?;
        self.auditor
            .check_shortfall(market, from, assets, &self.markets, self.timestamp)?;
        self.market_mut(market)?
            .transfer_from(caller, from, to, shares)
    }

    /// Share allowance, which also authorizes borrowing on the owner's behalf
    pub fn approve_shares(
        &mut self,
        owner: Address,
        market: Address,
        spender: Address,
        shares: U256,
    ) -> Result<(), ProtocolError> {
        self.market_mut(market)?.approve(owner, spender, shares);
        Ok(())
    }

    pub fn borrow(
        &mut self,
        caller: Address,
        market: Address,
        assets: U256,
        receiver: Address,
        borrower: Address,
    ) -> Result<U256, ProtocolError> {
        let ctx = self.ctx(caller);
        let shares = self
            .market_mut(market)?
            .borrow(ctx, assets, receiver, borrower)?;
        self.auditor
            .check_borrow(market, borrower, &self.markets, self.timestamp)?;
        self.push(market, receiver, assets)?;
        info!(market = %market, borrower = %borrower, receiver = %receiver, %assets, %shares, "borrow");
        Ok(shares)
    }

    /// Returns `(actual_assets, shares)`
    pub fn repay(
        &mut self,
        caller: Address,
        market: Address,
        assets: U256,
        borrower: Address,
    ) -> Result<(U256, U256), ProtocolError> {
        let ctx = self.ctx(caller);
        let (actual, shares) = self.market_mut(market)?.repay(ctx, assets, borrower)?;
        self.pull(market, caller, actual)?;
        info!(market = %market, borrower = %borrower, assets = %actual, %shares, "repay");
        Ok((actual, shares))
    }

    /// Returns `(assets, actual_shares)`
    pub fn refund(
        &mut self,
        caller: Address,
        market: Address,
        shares: U256,
        borrower: Address,
    ) -> Result<(U256, U256), ProtocolError> {
        let ctx = self.ctx(caller);
        let (assets, actual) = self.market_mut(market)?.refund(ctx, shares, borrower)?;
        self.pull(market, caller, assets)?;
        info!(market = %market, borrower = %borrower, %assets, shares = %actual, "refund");
        Ok((assets, actual))
    }

    pub fn deposit_at_maturity(
        &mut self,
        caller: Address,
        market: Address,
        maturity: u64,
        assets: U256,
        min_assets_required: U256,
        receiver: Address,
    ) -> Result<U256, ProtocolError> {
        let ctx = self.ctx(caller);
        let position_assets = self.market_mut(market)?.deposit_at_maturity(
            ctx,
            maturity,
            assets,
            min_assets_required,
            receiver,
        )?;
        self.pull(market, caller, assets)?;
        info!(market = %market, maturity, receiver = %receiver, %assets, %position_assets, "fixed deposit");
        Ok(position_assets)
    }

    #[expect(clippy::too_many_arguments)]
    pub fn withdraw_at_maturity(
        &mut self,
        caller: Address,
        market: Address,
        maturity: u64,
        position_assets: U256,
        min_assets_required: U256,
        receiver: Address,
        owner: Address,
    ) -> Result<U256, ProtocolError> {
        let ctx = self.ctx(caller);
        let assets = self.market_mut(market)?.withdraw_at_maturity(
            ctx,
            maturity,
            position_assets,
            min_assets_required,
            receiver,
            owner,
        )?;
        self.push(market, receiver, assets)?;
        info!(market = %market, maturity, owner = %owner, %position_assets, %assets, "fixed withdraw");
        Ok(assets)
    }

    #[expect(clippy::too_many_arguments)]
    pub fn borrow_at_maturity(
        &mut self,
        caller: Address,
        market: Address,
        maturity: u64,
        assets: U256,
        max_assets: U256,
        receiver: Address,
        borrower: Address,
    ) -> Result<U256, ProtocolError> {
        let ctx = self.ctx(caller);
        let assets_owed = self.market_mut(market)?.borrow_at_maturity(
            ctx, maturity, assets, max_assets, receiver, borrower,
        )?;
        self.auditor
            .check_borrow(market, borrower, &self.markets, self.timestamp)?;
        self.push(market, receiver, assets)?;
        info!(market = %market, maturity, borrower = %borrower, %assets, %assets_owed, "fixed borrow");
        Ok(assets_owed)
    }

    pub fn repay_at_maturity(
        &mut self,
        caller: Address,
        market: Address,
        maturity: u64,
        position_assets: U256,
        max_assets: U256,
        borrower: Address,
    ) -> Result<U256, ProtocolError> {
        let ctx = self.ctx(caller);
        let actual = self.market_mut(market)?.repay_at_maturity(
            ctx,
            maturity,
            position_assets,
            max_assets,
            borrower,
        )?;
        self.pull(market, caller, actual)?;
        info!(market = %market, maturity, borrower = %borrower, %position_assets, assets = %actual, "fixed repay");
        Ok(actual)
    }

    /// Repays up to `max_assets` of `borrower`'s debt in `repay_market` and
    /// seizes the equivalent collateral plus incentive from `seize_market`.
    /// Any debt left once the borrower has no collateral is written off
    /// against each market's earnings accumulator. Returns the assets
    /// repaid.
    pub fn liquidate(
        &mut self,
        liquidator: Address,
        repay_market: Address,
        borrower: Address,
        max_assets: U256,
        seize_market: Address,
    ) -> Result<U256, ProtocolError> {
        if liquidator == borrower {
            return Err(ProtocolError::SelfLiquidation { borrower });
        }
        self.market(repay_market)?;
        self.market(seize_market)?;
        let timestamp = self.timestamp;
        let ctx = self.ctx(liquidator);

        let max_repay = self.auditor.check_liquidation(
            repay_market,
            seize_market,
            borrower,
            max_assets,
            &self.markets,
            timestamp,
        )?;
        if max_repay.is_zero() {
            return Err(ProtocolError::ZeroRepay);
        }

        let repaid = self
            .market_mut(repay_market)?
            .liquidate_repay(ctx, borrower, max_repay)?;
        if repaid.is_zero() {
            return Err(ProtocolError::ZeroRepay);
        }
        let (lenders_assets, seize_assets) = self.auditor.calculate_seize(
            repay_market,
            seize_market,
            borrower,
            repaid,
            &self.markets,
            timestamp,
        )?;
        self.market_mut(repay_market)?
            .add_to_earnings_accumulator(lenders_assets)?;

        self.auditor.check_seize(repay_market, seize_market)?;
        if !seize_assets.is_zero() {
            self.market_mut(seize_market)?
                .seize(ctx, borrower, seize_assets)?;
        }
        self.market_mut(repay_market)?.emit(Event::Liquidate {
            market: repay_market,
            receiver: liquidator,
            borrower,
            assets: repaid,
            lenders_assets,
            seize_market,
            seized_assets: seize_assets,
        });

        let exhausted = self
            .auditor
            .handle_bad_debt(borrower, &self.markets, timestamp)?;
        for market in exhausted {
            self.market_mut(market)?.clear_bad_debt(ctx, borrower)?;
        }

        self.push(seize_market, liquidator, seize_assets)?;
        self.pull(repay_market, liquidator, try_add(repaid, lenders_assets)?)?;
        info!(
            liquidator = %liquidator,
            borrower = %borrower,
            repay_market = %repay_market,
            seize_market = %seize_market,
            %repaid,
            %lenders_assets,
            %seize_assets,
            "liquidation"
        );
        Ok(repaid)
    }
}

/// Transactional wrapper around [`State`]
pub struct Protocol {
    state: State,
    events: Vec<Event>,
    reward_hook: Option<Arc<dyn RewardHook>>,
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("state", &self.state)
            .field("events", &self.events.len())
            .field("reward_hook", &self.reward_hook.as_ref().map(|h| h.name().to_string()))
            .finish()
    }
}

impl Protocol {
    pub fn new(auditor: Address, config: AuditorConfig, timestamp: u64) -> Result<Self, ProtocolError> {
        Ok(Self {
            state: State::new(Auditor::new(auditor, config)?, timestamp),
            events: Vec::new(),
            reward_hook: None,
        })
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn timestamp(&self) -> u64 {
        self.state.timestamp
    }

    pub fn auditor(&self) -> &Auditor {
        &self.state.auditor
    }

    pub fn market(&self, market: Address) -> Result<&Market, ProtocolError> {
        self.state.market(market)
    }

    pub fn set_reward_hook(&mut self, hook: Arc<dyn RewardHook>) {
        info!(hook = hook.name(), "reward hook installed");
        self.reward_hook = Some(hook);
    }

    /// Moves the clock forward. Time never goes backwards.
    pub fn warp(&mut self, timestamp: u64) -> Result<(), ProtocolError> {
        if timestamp < self.state.timestamp {
            return Err(ProtocolError::InvalidTimestamp {
                timestamp,
                current: self.state.timestamp,
            });
        }
        self.state.timestamp = timestamp;
        Ok(())
    }

    pub fn skip(&mut self, seconds: u64) {
        self.state.timestamp = self.state.timestamp.saturating_add(seconds);
    }

    /// Runs `operation` atomically. On error the state is restored and
    /// nothing buffered during the operation is delivered.
    pub fn transact<T>(
        &mut self,
        operation: impl FnOnce(&mut State) -> Result<T, ProtocolError>,
    ) -> Result<T, ProtocolError> {
        let snapshot = self.state.clone();
        match operation(&mut self.state) {
            Ok(value) => {
                self.commit();
                Ok(value)
            }
            Err(error) => {
                warn!(%error, kind = ?error.kind(), "operation rolled back");
                self.state = snapshot;
                Err(error)
            }
        }
    }

    fn commit(&mut self) {
        let mut changes = Vec::new();
        self.events.extend(self.state.auditor.drain_events());
        for market in self.state.markets.values_mut() {
            let (events, balance_changes) = market.drain_outbox();
            self.events.extend(events);
            changes.extend(balance_changes);
        }
        if let Some(hook) = &self.reward_hook {
            for change in coalesce(changes) {
                debug!(
                    hook = hook.name(),
                    account = %change.account,
                    market = %change.market,
                    balance = %change.new_balance,
                    "balance change"
                );
                hook.on_balance_change(&change);
            }
        }
    }

    /// Events committed since the last call
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Creates a market supervised by this protocol's auditor
    pub fn create_market(
        &mut self,
        market: Address,
        asset: Address,
        decimals: u8,
        config: MarketConfig,
    ) -> Result<(), ProtocolError> {
        let auditor = self.state.auditor.address();
        let timestamp = self.state.timestamp;
        self.transact(|state| {
            state.add_market(Market::new(market, asset, decimals, auditor, config, timestamp)?)
        })
    }

    /// Adds a prebuilt market, which may belong to another auditor
    pub fn add_market(&mut self, market: Market) -> Result<(), ProtocolError> {
        self.transact(|state| state.add_market(market))
    }

    pub fn enable_market(
        &mut self,
        market: Address,
        price_source: PriceSource,
        adjust_factor: U256,
    ) -> Result<(), ProtocolError> {
        self.transact(|state| state.enable_market(market, price_source, adjust_factor))
    }

    pub fn set_adjust_factor(&mut self, market: Address, adjust_factor: U256) -> Result<(), ProtocolError> {
        self.transact(|state| state.set_adjust_factor(market, adjust_factor))
    }

    pub fn set_price_source(&mut self, market: Address, price_source: PriceSource) -> Result<(), ProtocolError> {
        self.transact(|state| state.set_price_source(market, price_source))
    }

    pub fn set_liquidation_incentive(&mut self, incentive: LiquidationIncentive) -> Result<(), ProtocolError> {
        self.transact(|state| state.set_liquidation_incentive(incentive))
    }

    pub fn set_market_config(&mut self, market: Address, config: MarketConfig) -> Result<(), ProtocolError> {
        self.transact(|state| state.set_market_config(market, config))
    }

    pub fn set_treasury(
        &mut self,
        market: Address,
        treasury: Address,
        treasury_fee_rate: U256,
    ) -> Result<(), ProtocolError> {
        self.transact(|state| state.set_treasury(market, treasury, treasury_fee_rate))
    }

    /// Credits `amount` of `asset` to `to`
    pub fn fund(&mut self, asset: Address, to: Address, amount: U256) -> Result<(), ProtocolError> {
        self.transact(|state| state.tokens.mint(asset, to, amount))
    }

    pub fn approve_token(&mut self, asset: Address, owner: Address, spender: Address, amount: U256) {
        self.state.tokens.approve(asset, owner, spender, amount);
    }

    pub fn enter_market(&mut self, account: Address, market: Address) -> Result<(), ProtocolError> {
        self.transact(|state| state.enter_market(account, market))
    }

    pub fn exit_market(&mut self, account: Address, market: Address) -> Result<(), ProtocolError> {
        self.transact(|state| state.exit_market(account, market))
    }

    pub fn deposit(
        &mut self,
        caller: Address,
        market: Address,
        assets: U256,
        receiver: Address,
    ) -> Result<U256, ProtocolError> {
        self.transact(|state| state.deposit(caller, market, assets, receiver))
    }

    pub fn mint(
        &mut self,
        caller: Address,
        market: Address,
        shares: U256,
        receiver: Address,
    ) -> Result<U256, ProtocolError> {
        self.transact(|state| state.mint(caller, market, shares, receiver))
    }

    pub fn withdraw(
        &mut self,
        caller: Address,
        market: Address,
        assets: U256,
        receiver: Address,
        owner: Address,
    ) -> Result<U256, ProtocolError> {
        self.transact(|state| state.withdraw(caller, market, assets, receiver, owner))
    }

    pub fn redeem(
        &mut self,
        caller: Address,
        market: Address,
        shares: U256,
        receiver: Address,
        owner: Address,
    ) -> Result<U256, ProtocolError> {
        self.transact(|state| state.redeem(caller, market, shares, receiver, owner))
    }

    pub fn transfer_shares(
        &mut self,
        caller: Address,
        market: Address,
        to: Address,
        shares: U256,
    ) -> Result<(), ProtocolError> {
        self.transact(|state| state.transfer_shares(caller, market, to, shares))
    }

    pub fn transfer_shares_from(
        &mut self,
        caller: Address,
        market: Address,
        from: Address,
        to: Address,
        shares: U256,
    ) -> Result<(), ProtocolError> {
        self.transact(|state| state.transfer_shares_from(caller, market, from, to, shares))
    }

    pub fn approve_shares(
        &mut self,
        owner: Address,
        market: Address,
        spender: Address,
        shares: U256,
    ) -> Result<(), ProtocolError> {
        self.transact(|state| state.approve_shares(owner, market, spender, shares))
    }

    pub fn borrow(
        &mut self,
        caller: Address,
        market: Address,
        assets: U256,
        receiver: Address,
        borrower: Address,
    ) -> Result<U256, ProtocolError> {
        self.transact(|state| state.borrow(caller, market, assets, receiver, borrower))
    }

    pub fn repay(
        &mut self,
        caller: Address,
        market: Address,
        assets: U256,
        borrower: Address,
    ) -> Result<(U256, U256), ProtocolError> {
        self.transact(|state| state.repay(caller, market, assets, borrower))
    }

    pub fn refund(
        &mut self,
        caller: Address,
        market: Address,
        shares: U256,
        borrower: Address,
    ) -> Result<(U256, U256), ProtocolError> {
        self.transact(|state| state.refund(caller, market, shares, borrower))
    }

    pub fn deposit_at_maturity(
        &mut self,
        caller: Address,
        market: Address,
        maturity: u64,
        assets: U256,
        min_assets_required: U256,
        receiver: Address,
    ) -> Result<U256, ProtocolError> {
        self.transact(|state| {
            state.deposit_at_maturity(caller, market, maturity, assets, min_assets_required, receiver)
        })
    }

    #[expect(clippy::too_many_arguments)]
    pub fn withdraw_at_maturity(
        &mut self,
        caller: Address,
        market: Address,
        maturity: u64,
        position_assets: U256,
        min_assets_required: U256,
        receiver: Address,
        owner: Address,
    ) -> Result<U256, ProtocolError> {
        self.transact(|state| {
            state.withdraw_at_maturity(
                caller,
                market,
                maturity,
                position_assets,
                min_assets_required,
                receiver,
                owner,
            )
        })
    }

    #[expect(clippy::too_many_arguments)]
    pub fn borrow_at_maturity(
        &mut self,
        caller: Address,
        market: Address,
        maturity: u64,
        assets: U256,
        max_assets: U256,
        receiver: Address,
        borrower: Address,
    ) -> Result<U256, ProtocolError> {
        self.transact(|state| {
            state.borrow_at_maturity(caller, market, maturity, assets, max_assets, receiver, borrower)
        })
    }

    pub fn repay_at_maturity(
        &mut self,
        caller: Address,
        market: Address,
        maturity: u64,
        position_assets: U256,
        max_assets: U256,
        borrower: Address,
    ) -> Result<U256, ProtocolError> {
        self.transact(|state| {
            state.repay_at_maturity(caller, market, maturity, position_assets, max_assets, borrower)
        })
    }

    pub fn liquidate(
        &mut self,
        liquidator: Address,
        repay_market: Address,
        borrower: Address,
        max_assets: U256,
        seize_market: Address,
    ) -> Result<U256, ProtocolError> {
        self.transact(|state| state.liquidate(liquidator, repay_market, borrower, max_assets, seize_market))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::WAD;

    const AUDITOR: Address = Address::repeat_byte(0xff);
    const MARKET: Address = Address::repeat_byte(0x10);
    const ASSET: Address = Address::repeat_byte(0xa0);
    const ALICE: Address = Address::repeat_byte(1);

    fn create_test_protocol() -> Protocol {
        let mut protocol = Protocol::new(AUDITOR, AuditorConfig::default(), 1_000_000).unwrap();
        protocol
            .create_market(MARKET, ASSET, 18, MarketConfig::default())
            .unwrap();
        protocol
            .enable_market(MARKET, PriceSource::Base, WAD * U256::from(8) / U256::from(10))
            .unwrap();
        protocol.fund(ASSET, ALICE, WAD * U256::from(1_000)).unwrap();
        protocol.approve_token(ASSET, ALICE, MARKET, U256::MAX);
        protocol
    }

    #[test]
    fn test_warp_never_goes_back() {
        let mut protocol = create_test_protocol();
        protocol.warp(1_000_100).unwrap();
        let err = protocol.warp(1_000_000).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidTimestamp { .. }));
        protocol.skip(10);
        assert_eq!(protocol.timestamp(), 1_000_110);
    }

    #[test]
    fn test_duplicate_market() {
        let mut protocol = create_test_protocol();
        let err = protocol
            .create_market(MARKET, ASSET, 18, MarketConfig::default())
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MarketAlreadyExists { .. }));
    }

    #[test]
    fn test_deposit_moves_tokens() {
        let mut protocol = create_test_protocol();
        protocol.take_events();
        protocol.deposit(ALICE, MARKET, WAD, ALICE).unwrap();
        let tokens = protocol.state().tokens();
        assert_eq!(tokens.balance_of(ASSET, MARKET), WAD);
        assert_eq!(tokens.balance_of(ASSET, ALICE), WAD * U256::from(999));
        assert_eq!(protocol.take_events().len(), 2);
    }

    #[test]
    fn test_failed_operation_rolls_back() {
        let mut protocol = create_test_protocol();
        protocol.deposit(ALICE, MARKET, WAD, ALICE).unwrap();
        protocol.take_events();

        let before = protocol.market(MARKET).unwrap().floating_assets();
        // borrowing more than the collateral allows fails after the ledger moved
        let err = protocol
            .borrow(ALICE, MARKET, WAD * U256::from(9) / U256::from(10), ALICE, ALICE)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InsufficientAccountLiquidity { .. }));
        let market = protocol.market(MARKET).unwrap();
        assert_eq!(market.floating_assets(), before);
        assert_eq!(market.floating_debt(), U256::ZERO);
        assert!(!protocol.auditor().is_entered(ALICE, MARKET));
        assert!(protocol.events().is_empty());
    }

    #[test]
    fn test_self_liquidation_rejected() {
        let mut protocol = create_test_protocol();
        let err = protocol
            .liquidate(ALICE, MARKET, ALICE, WAD, MARKET)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::SelfLiquidation { .. }));
    }
}
