//! Cross-market risk manager.
//!
//! The auditor lists markets, tracks which markets each account uses as
//! collateral and values positions with oracle prices:
//!
//! ```text
//! collateral = Σ balance * price / 10^decimals * adjust_factor
//! debt       = Σ debt    * price / 10^decimals / adjust_factor
//! ```
//!
//! An account may borrow or withdraw only while collateral covers debt.
//! Accounts whose debt exceeds collateral can be liquidated, up to the amount
//! that restores [`TARGET_HEALTH`].

use std::collections::{BTreeMap, HashMap};

use alloy_primitives::{Address, U256};
use tracing::{debug, info, warn};

use crate::config::{AuditorConfig, LiquidationIncentive};
use crate::error::ProtocolError;
use crate::events::Event;
use crate::math::{mul_div_down, mul_div_up, try_add, w_div_up, w_mul_down, w_mul_up, WAD};
use crate::oracle::PriceSource;

/// Health factor a liquidation aims to restore, 1.25
pub const TARGET_HEALTH: U256 = U256::from_limbs([1_250_000_000_000_000_000, 0, 0, 0]);

/// Upper bound of markets one auditor can list
pub const MAX_MARKETS: usize = 256;

/// Read-only view of a market used for risk checks
pub trait MarketView {
    fn decimals(&self) -> u8;

    fn auditor(&self) -> Address;

    /// `(collateral_assets, debt_assets)` of `account` at `timestamp`
    fn account_snapshot(&self, account: Address, timestamp: u64) -> Result<(U256, U256), ProtocolError>;

    /// Assets `owner` could withdraw if liquidity allowed
    fn max_withdraw(&self, owner: Address, timestamp: u64) -> Result<U256, ProtocolError>;
}

/// Resolves market addresses to views
pub trait MarketLookup {
    fn view(&self, market: Address) -> Option<&dyn MarketView>;
}

impl<M: MarketView> MarketLookup for BTreeMap<Address, M> {
    fn view(&self, market: Address) -> Option<&dyn MarketView> {
        self.get(&market).map(|m| m as &dyn MarketView)
    }
}

/// Listing data of one market
#[derive(Debug, Clone)]
pub struct MarketData {
    pub adjust_factor: U256,
    pub decimals: u8,
    /// Position in the listing order, also the account bitmap bit
    pub index: usize,
    pub price_source: PriceSource,
}

#[derive(Debug, Clone)]
pub struct Auditor {
    address: Address,
    config: AuditorConfig,
    markets: HashMap<Address, MarketData>,
    market_list: Vec<Address>,
    /// Bitmap of entered market indices per account
    account_markets: HashMap<Address, U256>,
    events: Vec<Event>,
}

/// Valuation of the market being repaid in a liquidation
#[derive(Debug, Clone, Copy)]
struct RepayValuation {
    price: U256,
    base_unit: U256,
}

fn base_unit(decimals: u8) -> U256 {
    U256::from(10u64).pow(U256::from(decimals))
}

/// Share of a liquidator's budget left for repayment once the lenders' cut
/// is taken out, `max_assets / (1 + lenders)`. `U256::MAX` means unlimited.
fn liquidator_budget(max_assets: U256, lenders: U256) -> Result<U256, ProtocolError> {
    if max_assets == U256::MAX {
        return Ok(max_assets);
    }
    let denominator = try_add(WAD, lenders)?;
    // split into quotient and remainder so `max_assets * WAD` never overflows
    let whole = (max_assets / denominator)
        .checked_mul(WAD)
        .ok_or(ProtocolError::Arithmetic)?;
    try_add(whole, mul_div_down(max_assets % denominator, WAD, denominator)?)
}

impl Auditor {
    pub fn new(address: Address, config: AuditorConfig) -> Result<Self, ProtocolError> {
        config.validate()?;
        Ok(Self {
            address,
            config,
            markets: HashMap::new(),
            market_list: Vec::new(),
            account_markets: HashMap::new(),
            events: Vec::new(),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn config(&self) -> &AuditorConfig {
        &self.config
    }

    pub fn market_data(&self, market: Address) -> Option<&MarketData> {
        self.markets.get(&market)
    }

    /// Listed markets in listing order
    pub fn all_markets(&self) -> &[Address] {
        &self.market_list
    }

    pub fn account_markets(&self, account: Address) -> U256 {
        self.account_markets.get(&account).copied().unwrap_or_default()
    }

    pub fn is_entered(&self, account: Address, market: Address) -> bool {
        self.markets
            .get(&market)
            .is_some_and(|data| self.account_markets(account).bit(data.index))
    }

    /// Markets `account` has entered, in listing order
    pub fn entered_markets(&self, account: Address) -> Vec<Address> {
        let bitmap = self.account_markets(account);
        self.market_list
            .iter()
            .enumerate()
            .filter(|(index, _)| bitmap.bit(*index))
            .map(|(_, market)| *market)
            .collect()
    }

    fn listed(&self, market: Address) -> Result<&MarketData, ProtocolError> {
        self.markets
            .get(&market)
            .ok_or(ProtocolError::MarketNotListed { market })
    }

    fn check_adjust_factor(adjust_factor: U256) -> Result<(), ProtocolError> {
        if adjust_factor.is_zero() || adjust_factor > WAD {
            return Err(ProtocolError::InvalidParameter {
                name: "adjust_factor",
                value: adjust_factor,
            });
        }
        Ok(())
    }

    fn check_price_source(&self, market: Address, source: &PriceSource) -> Result<(), ProtocolError> {
        if let PriceSource::Feed(feed) = source {
            if feed.decimals() != self.config.price_decimals {
                return Err(ProtocolError::InvalidPriceFeed {
                    market,
                    decimals: feed.decimals(),
                    expected: self.config.price_decimals,
                });
            }
        }
        Ok(())
    }

    /// Lists a market
    pub fn enable_market(
        &mut self,
        market: Address,
        view: &dyn MarketView,
        price_source: PriceSource,
        adjust_factor: U256,
    ) -> Result<(), ProtocolError> {
        if view.auditor() != self.address {
            return Err(ProtocolError::AuditorMismatch {
                market,
                expected: self.address,
                actual: view.auditor(),
            });
        }
        if self.markets.contains_key(&market) {
            return Err(ProtocolError::MarketAlreadyListed { market });
        }
        self.check_price_source(market, &price_source)?;
        if self.market_list.len() >= MAX_MARKETS {
            return Err(ProtocolError::TooManyMarkets { max: MAX_MARKETS });
        }
        Self::check_adjust_factor(adjust_factor)?;

        let decimals = view.decimals();
        self.markets.insert(
            market,
            MarketData {
                adjust_factor,
                decimals,
                index: self.market_list.len(),
                price_source,
            },
        );
        self.market_list.push(market);
        info!(market = %market, decimals, %adjust_factor, "market listed");
        self.events.push(Event::MarketListed { market, decimals });
        Ok(())
    }

    pub fn set_adjust_factor(&mut self, market: Address, adjust_factor: U256) -> Result<(), ProtocolError> {
        Self::check_adjust_factor(adjust_factor)?;
        let data = self
            .markets
            .get_mut(&market)
            .ok_or(ProtocolError::MarketNotListed { market })?;
        data.adjust_factor = adjust_factor;
        info!(market = %market, %adjust_factor, "adjust factor updated");
        Ok(())
    }

    pub fn set_price_source(&mut self, market: Address, price_source: PriceSource) -> Result<(), ProtocolError> {
        self.listed(market)?;
        self.check_price_source(market, &price_source)?;
        if let Some(data) = self.markets.get_mut(&market) {
            data.price_source = price_source;
        }
        info!(market = %market, "price source updated");
        Ok(())
    }

    pub fn set_liquidation_incentive(&mut self, incentive: LiquidationIncentive) -> Result<(), ProtocolError> {
        incentive.validate()?;
        self.config.liquidation_incentive = incentive;
        info!(
            liquidator = %incentive.liquidator,
            lenders = %incentive.lenders,
            "liquidation incentive updated"
        );
        Ok(())
    }

    /// Price of one whole unit of the market's asset in the base asset, WAD
    /// scaled
    pub fn asset_price(&self, market: Address, timestamp: u64) -> Result<U256, ProtocolError> {
        let data = self.listed(market)?;
        match &data.price_source {
            PriceSource::Base => Ok(WAD),
            PriceSource::Feed(feed) => {
                let round = feed
                    .latest_round_data()
                    .ok_or(ProtocolError::InvalidPrice { market })?;
                if !round.answer.is_positive() {
                    warn!(market = %market, answer = %round.answer, "non-positive price");
                    return Err(ProtocolError::InvalidPrice { market });
                }
                let age = timestamp.saturating_sub(round.updated_at);
                if age > self.config.price_expiry {
                    warn!(market = %market, updated_at = round.updated_at, age, "stale price");
                    return Err(ProtocolError::InvalidPrice { market });
                }
                round
                    .answer
                    .into_raw()
                    .checked_mul(base_unit(18 - self.config.price_decimals))
                    .ok_or(ProtocolError::Arithmetic)
            }
        }
    }

    /// Marks `market` as collateral for `account`. Idempotent.
    pub fn enter_market(&mut self, account: Address, market: Address) -> Result<(), ProtocolError> {
        let index = self.listed(market)?.index;
        let bitmap = self.account_markets.entry(account).or_default();
        if bitmap.bit(index) {
            return Ok(());
        }
        bitmap.set_bit(index, true);
        debug!(account = %account, market = %market, "market entered");
        self.events.push(Event::MarketEntered { market, account });
        Ok(())
    }

    /// Stops using `market` as collateral. Fails while the account owes
    /// anything in it or if removing its deposits would leave a shortfall.
    pub fn exit_market(
        &mut self,
        account: Address,
        market: Address,
        markets: &dyn MarketLookup,
        timestamp: u64,
    ) -> Result<(), ProtocolError> {
        let index = self.listed(market)?.index;
        let view = markets
            .view(market)
            .ok_or(ProtocolError::MarketNotFound { market })?;
        let (assets, debt) = view.account_snapshot(account, timestamp)?;
        if !debt.is_zero() {
            return Err(ProtocolError::RemainingDebt {
                account,
                market,
                debt,
            });
        }
        self.check_shortfall(market, account, assets, markets, timestamp)?;

        let Some(bitmap) = self.account_markets.get_mut(&account) else {
            return Ok(());
        };
        if !bitmap.bit(index) {
            return Ok(());
        }
        bitmap.set_bit(index, false);
        debug!(account = %account, market = %market, "market exited");
        self.events.push(Event::MarketExited { market, account });
        Ok(())
    }

    /// Value of `account`'s collateral and debt, both adjusted, with an
    /// optional simulated withdrawal of `withdraw_amount` from
    /// `market_to_simulate`. Returns `(collateral, debt)`.
    pub fn account_liquidity(
        &self,
        account: Address,
        market_to_simulate: Option<Address>,
        withdraw_amount: U256,
        markets: &dyn MarketLookup,
        timestamp: u64,
    ) -> Result<(U256, U256), ProtocolError> {
        let mut sum_collateral = U256::ZERO;
        let mut sum_debt = U256::ZERO;
        for market in self.entered_markets(account) {
            let data = self.listed(market)?;
            let view = markets
                .view(market)
                .ok_or(ProtocolError::MarketNotFound { market })?;
            let price = self.asset_price(market, timestamp)?;
            let unit = base_unit(data.decimals);
            let (balance, borrow_balance) = view.account_snapshot(account, timestamp)?;

            sum_collateral = try_add(
                sum_collateral,
                w_mul_down(mul_div_down(balance, price, unit)?, data.adjust_factor)?,
            )?;
            sum_debt = try_add(
                sum_debt,
                w_div_up(mul_div_up(borrow_balance, price, unit)?, data.adjust_factor)?,
            )?;
            if market_to_simulate == Some(market) {
                sum_debt = try_add(
                    sum_debt,
                    w_mul_down(mul_div_down(withdraw_amount, price, unit)?, data.adjust_factor)?,
                )?;
            }
        }
        Ok((sum_collateral, sum_debt))
    }

    /// Post-borrow check. Enters the market on the borrower's behalf.
    pub fn check_borrow(
        &mut self,
        market: Address,
        borrower: Address,
        markets: &dyn MarketLookup,
        timestamp: u64,
    ) -> Result<(), ProtocolError> {
        self.enter_market(borrower, market)?;
        let (collateral, debt) = self.account_liquidity(borrower, None, U256::ZERO, markets, timestamp)?;
        if collateral < debt {
            return Err(ProtocolError::InsufficientAccountLiquidity {
                account: borrower,
                collateral,
                debt,
            });
        }
        Ok(())
    }

    /// Fails if withdrawing `amount` from `market` would leave `account`
    /// with less collateral than debt. Markets the account has not entered
    /// are not collateral and always pass.
    pub fn check_shortfall(
        &self,
        market: Address,
        account: Address,
        amount: U256,
        markets: &dyn MarketLookup,
        timestamp: u64,
    ) -> Result<(), ProtocolError> {
        if !self.is_entered(account, market) {
            return Ok(());
        }
        let (collateral, debt) = self.account_liquidity(account, Some(market), amount, markets, timestamp)?;
        if collateral < debt {
            return Err(ProtocolError::InsufficientAccountLiquidity {
                account,
                collateral,
                debt,
            });
        }
        Ok(())
    }

    /// Maximum assets of `repay_market` a liquidator may repay for
    /// `borrower`, capped by `max_liquidator_assets`.
    ///
    /// The close factor repays just enough debt to bring the account back to
    /// [`TARGET_HEALTH`], bounded by the collateral available in
    /// `seize_market`.
    pub fn check_liquidation(
        &self,
        repay_market: Address,
        seize_market: Address,
        borrower: Address,
        max_liquidator_assets: U256,
        markets: &dyn MarketLookup,
        timestamp: u64,
    ) -> Result<U256, ProtocolError> {
        self.listed(repay_market)?;
        self.listed(seize_market)?;

        let mut total_debt = U256::ZERO;
        let mut adjusted_debt = U256::ZERO;
        let mut total_collateral = U256::ZERO;
        let mut adjusted_collateral = U256::ZERO;
        let mut seize_available = U256::ZERO;
        let mut repay: Option<RepayValuation> = None;

        for market in self.entered_markets(borrower) {
            let data = self.listed(market)?;
            let view = markets
                .view(market)
                .ok_or(ProtocolError::MarketNotFound { market })?;
            let price = self.asset_price(market, timestamp)?;
            let unit = base_unit(data.decimals);
            if market == repay_market {
                repay = Some(RepayValuation {
                    price,
                    base_unit: unit,
                });
            }
            let (collateral, debt) = view.account_snapshot(borrower, timestamp)?;

            let debt_value = mul_div_up(debt, price, unit)?;
            total_debt = try_add(total_debt, debt_value)?;
            adjusted_debt = try_add(adjusted_debt, w_div_up(debt_value, data.adjust_factor)?)?;

            let collateral_value = mul_div_down(collateral, price, unit)?;
            total_collateral = try_add(total_collateral, collateral_value)?;
            adjusted_collateral = try_add(
                adjusted_collateral,
                w_mul_down(collateral_value, data.adjust_factor)?,
            )?;
            if market == seize_market {
                seize_available = collateral_value;
            }
        }

        if adjusted_collateral >= adjusted_debt {
            return Err(ProtocolError::InsufficientShortfall { account: borrower });
        }
        let Some(repay) = repay else {
            return Ok(U256::ZERO);
        };
        if total_collateral.is_zero() {
            return Ok(U256::ZERO);
        }

        let incentive = self.config.liquidation_incentive;
        let incentive_factor = try_add(WAD, try_add(incentive.liquidator, incentive.lenders)?)?;
        let adjust_factor = w_div_up(
            w_mul_up(adjusted_collateral, total_debt)?,
            w_mul_up(adjusted_debt, total_collateral)?,
        )?;
        let health = w_div_up(adjusted_collateral, adjusted_debt)?;
        let close_factor = match TARGET_HEALTH.checked_sub(w_mul_down(adjust_factor, incentive_factor)?) {
            Some(denominator) if !denominator.is_zero() => {
                w_div_up(TARGET_HEALTH.saturating_sub(health), denominator)?
            }
            _ => WAD,
        };

        let max_repay_value = w_mul_up(total_debt, close_factor.min(WAD))?
            .min(w_div_up(seize_available, incentive_factor)?);
        let max_repay = mul_div_up(max_repay_value, repay.base_unit, repay.price)?;
        let max_assets = max_repay.min(liquidator_budget(max_liquidator_assets, incentive.lenders)?);
        debug!(
            borrower = %borrower,
            repay_market = %repay_market,
            %close_factor,
            %max_assets,
            "liquidation sized"
        );
        Ok(max_assets)
    }

    /// Both markets of a seizure must be listed
    pub fn check_seize(&self, repay_market: Address, seize_market: Address) -> Result<(), ProtocolError> {
        self.listed(repay_market)?;
        self.listed(seize_market)?;
        Ok(())
    }

    /// Collateral seized for repaying `actual_repay_assets` in
    /// `repay_market`. Returns `(lenders_assets, seize_assets)`, where
    /// `lenders_assets` is paid by the liquidator on top of the repayment.
    pub fn calculate_seize(
        &self,
        repay_market: Address,
        seize_market: Address,
        borrower: Address,
        actual_repay_assets: U256,
        markets: &dyn MarketLookup,
        timestamp: u64,
    ) -> Result<(U256, U256), ProtocolError> {
        let incentive = self.config.liquidation_incentive;
        let lenders_assets = w_mul_down(actual_repay_assets, incentive.lenders)?;

        let price_borrowed = self.asset_price(repay_market, timestamp)?;
        let price_collateral = self.asset_price(seize_market, timestamp)?;
        let base_amount = mul_div_up(actual_repay_assets, price_borrowed, price_collateral)?;

        let repay_decimals = self.listed(repay_market)?.decimals;
        let seize_decimals = self.listed(seize_market)?.decimals;
        let incentive_factor = try_add(WAD, try_add(incentive.liquidator, incentive.lenders)?)?;
        let seize_assets = w_mul_up(
            mul_div_up(base_amount, base_unit(seize_decimals), base_unit(repay_decimals))?,
            incentive_factor,
        )?;

        let view = markets
            .view(seize_market)
            .ok_or(ProtocolError::MarketNotFound {
                market: seize_market,
            })?;
        let seize_assets = seize_assets.min(view.max_withdraw(borrower, timestamp)?);
        Ok((lenders_assets, seize_assets))
    }

    /// Markets whose debt should be written off, empty while `account` still
    /// has any collateral value left
    pub fn handle_bad_debt(
        &self,
        account: Address,
        markets: &dyn MarketLookup,
        timestamp: u64,
    ) -> Result<Vec<Address>, ProtocolError> {
        let entered = self.entered_markets(account);
        for market in &entered {
            let data = self.listed(*market)?;
            let view = markets
                .view(*market)
                .ok_or(ProtocolError::MarketNotFound { market: *market })?;
            let assets = view.max_withdraw(account, timestamp)?;
            let price = self.asset_price(*market, timestamp)?;
            let value = w_mul_down(mul_div_down(assets, price, base_unit(data.decimals))?, data.adjust_factor)?;
            if !value.is_zero() {
                return Ok(Vec::new());
            }
        }
        Ok(entered)
    }

    pub(crate) fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::I256;

    use super::*;
    use crate::oracle::FixedPriceFeed;

    const AUDITOR: Address = Address::repeat_byte(0xff);
    const USDC: Address = Address::repeat_byte(0x11);
    const WETH: Address = Address::repeat_byte(0x22);
    const ALICE: Address = Address::repeat_byte(1);
    const NOW: u64 = 1_000_000;

    #[derive(Debug, Default)]
    struct MockMarket {
        decimals: u8,
        auditor: Address,
        snapshots: HashMap<Address, (U256, U256)>,
    }

    impl MarketView for MockMarket {
        fn decimals(&self) -> u8 {
            self.decimals
        }

        fn auditor(&self) -> Address {
            self.auditor
        }

        fn account_snapshot(&self, account: Address, _timestamp: u64) -> Result<(U256, U256), ProtocolError> {
            Ok(self.snapshots.get(&account).copied().unwrap_or_default())
        }

        fn max_withdraw(&self, owner: Address, _timestamp: u64) -> Result<U256, ProtocolError> {
            Ok(self.snapshots.get(&owner).map(|s| s.0).unwrap_or_default())
        }
    }

    fn units(amount: u64, decimals: u8) -> U256 {
        U256::from(amount) * base_unit(decimals)
    }

    fn create_test_mock(decimals: u8) -> MockMarket {
        MockMarket {
            decimals,
            auditor: AUDITOR,
            snapshots: HashMap::new(),
        }
    }

    /// USDC priced as base with 6 decimals, WETH at 2000 with 18 decimals,
    /// both with a 0.8 adjust factor
    fn create_test_auditor() -> (Auditor, BTreeMap<Address, MockMarket>) {
        let mut auditor = Auditor::new(AUDITOR, AuditorConfig::default()).unwrap();
        let mut markets = BTreeMap::new();
        markets.insert(USDC, create_test_mock(6));
        markets.insert(WETH, create_test_mock(18));
        let adjust = WAD * U256::from(8) / U256::from(10);

        auditor
            .enable_market(USDC, &markets[&USDC], PriceSource::Base, adjust)
            .unwrap();
        let feed = FixedPriceFeed::new(18, I256::from_raw(units(2_000, 18)), NOW);
        auditor
            .enable_market(WETH, &markets[&WETH], PriceSource::feed(feed), adjust)
            .unwrap();
        (auditor, markets)
    }

    #[test]
    fn test_enable_market_validation() {
        let (mut auditor, markets) = create_test_auditor();
        let err = auditor
            .enable_market(USDC, &markets[&USDC], PriceSource::Base, WAD)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MarketAlreadyListed { .. }));

        let foreign = MockMarket {
            decimals: 18,
            auditor: Address::repeat_byte(0xee),
            snapshots: HashMap::new(),
        };
        let err = auditor
            .enable_market(Address::repeat_byte(0x33), &foreign, PriceSource::Base, WAD)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::AuditorMismatch { .. }));

        let feed = FixedPriceFeed::new(8, I256::ONE, NOW);
        let err = auditor
            .enable_market(Address::repeat_byte(0x33), &create_test_mock(18), PriceSource::feed(feed), WAD)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPriceFeed { decimals: 8, .. }));

        assert_eq!(auditor.all_markets(), &[USDC, WETH]);
        assert_eq!(auditor.drain_events().len(), 2);
    }

    #[test]
    fn test_asset_price() {
        let (auditor, _) = create_test_auditor();
        assert_eq!(auditor.asset_price(USDC, NOW).unwrap(), WAD);
        assert_eq!(auditor.asset_price(WETH, NOW).unwrap(), units(2_000, 18));

        let stale = NOW + auditor.config().price_expiry + 1;
        let err = auditor.asset_price(WETH, stale).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPrice { .. }));
    }

    #[test]
    fn test_invalid_feed_answers() {
        let mut auditor = Auditor::new(AUDITOR, AuditorConfig::default()).unwrap();
        let market = create_test_mock(18);
        auditor
            .enable_market(WETH, &market, PriceSource::feed(FixedPriceFeed::empty(18)), WAD)
            .unwrap();
        assert!(auditor.asset_price(WETH, NOW).is_err());

        auditor
            .set_price_source(WETH, PriceSource::feed(FixedPriceFeed::new(18, I256::ZERO, NOW)))
            .unwrap();
        assert!(matches!(
            auditor.asset_price(WETH, NOW).unwrap_err(),
            ProtocolError::InvalidPrice { .. }
        ));
    }

    #[test]
    fn test_enter_and_exit_market() {
        let (mut auditor, mut markets) = create_test_auditor();
        auditor.enter_market(ALICE, USDC).unwrap();
        auditor.enter_market(ALICE, USDC).unwrap();
        assert!(auditor.is_entered(ALICE, USDC));
        assert_eq!(auditor.entered_markets(ALICE), vec![USDC]);
        assert_eq!(auditor.drain_events().len(), 3);

        markets
            .get_mut(&USDC)
            .unwrap()
            .snapshots
            .insert(ALICE, (units(100, 6), units(1, 6)));
        let err = auditor.exit_market(ALICE, USDC, &markets, NOW).unwrap_err();
        assert!(matches!(err, ProtocolError::RemainingDebt { .. }));

        markets
            .get_mut(&USDC)
            .unwrap()
            .snapshots
            .insert(ALICE, (units(100, 6), U256::ZERO));
        auditor.exit_market(ALICE, USDC, &markets, NOW).unwrap();
        assert!(!auditor.is_entered(ALICE, USDC));
        auditor.exit_market(ALICE, USDC, &markets, NOW).unwrap();

        let err = auditor.enter_market(ALICE, Address::repeat_byte(0x44)).unwrap_err();
        assert!(matches!(err, ProtocolError::MarketNotListed { .. }));
    }

    #[test]
    fn test_account_liquidity() {
        let (mut auditor, mut markets) = create_test_auditor();
        // 1 WETH collateral, 1000 USDC debt
        markets
            .get_mut(&WETH)
            .unwrap()
            .snapshots
            .insert(ALICE, (units(1, 18), U256::ZERO));
        markets
            .get_mut(&USDC)
            .unwrap()
            .snapshots
            .insert(ALICE, (U256::ZERO, units(1_000, 6)));
        auditor.enter_market(ALICE, WETH).unwrap();
        auditor.enter_market(ALICE, USDC).unwrap();

        let (collateral, debt) = auditor
            .account_liquidity(ALICE, None, U256::ZERO, &markets, NOW)
            .unwrap();
        assert_eq!(collateral, units(1_600, 18));
        assert_eq!(debt, units(1_250, 18));

        // withdrawing half a WETH removes 800 of collateral value
        let (_, debt) = auditor
            .account_liquidity(ALICE, Some(WETH), units(1, 18) / U256::from(2), &markets, NOW)
            .unwrap();
        assert_eq!(debt, units(2_050, 18));
        assert!(auditor
            .check_shortfall(WETH, ALICE, units(1, 18) / U256::from(2), &markets, NOW)
            .is_err());
        auditor
            .check_shortfall(WETH, ALICE, units(1, 18) / U256::from(10), &markets, NOW)
            .unwrap();
    }

    #[test]
    fn test_check_borrow_enters_market() {
        let (mut auditor, mut markets) = create_test_auditor();
        markets
            .get_mut(&USDC)
            .unwrap()
            .snapshots
            .insert(ALICE, (U256::ZERO, units(10, 6)));
        let err = auditor.check_borrow(USDC, ALICE, &markets, NOW).unwrap_err();
        assert!(matches!(err, ProtocolError::InsufficientAccountLiquidity { .. }));
        assert!(auditor.is_entered(ALICE, USDC));
    }

    #[test]
    fn test_check_liquidation() {
        let (mut auditor, mut markets) = create_test_auditor();
        markets
            .get_mut(&WETH)
            .unwrap()
            .snapshots
            .insert(ALICE, (units(1, 18), U256::ZERO));
        markets
            .get_mut(&USDC)
            .unwrap()
            .snapshots
            .insert(ALICE, (U256::ZERO, units(1_000, 6)));
        auditor.enter_market(ALICE, WETH).unwrap();
        auditor.enter_market(ALICE, USDC).unwrap();

        let err = auditor
            .check_liquidation(USDC, WETH, ALICE, U256::MAX, &markets, NOW)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InsufficientShortfall { .. }));

        // WETH drops to 1000, collateral 800 against debt 1250
        let feed = FixedPriceFeed::new(18, I256::from_raw(units(1_000, 18)), NOW);
        auditor.set_price_source(WETH, PriceSource::feed(feed)).unwrap();
        let max = auditor
            .check_liquidation(USDC, WETH, ALICE, U256::MAX, &markets, NOW)
            .unwrap();
        assert!(max > U256::ZERO);
        assert!(max <= units(1_000, 6));

        let capped = auditor
            .check_liquidation(USDC, WETH, ALICE, units(10, 6), &markets, NOW)
            .unwrap();
        assert!(capped < units(10, 6));

        let (lenders, seize) = auditor
            .calculate_seize(USDC, WETH, ALICE, units(100, 6), &markets, NOW)
            .unwrap();
        assert_eq!(lenders, units(1, 6));
        // 100 USDC at 1000 per WETH plus the 10% incentive
        assert_eq!(seize, units(11, 16));
    }

    #[test]
    fn test_liquidator_budget_takes_lenders_cut() {
        let lenders = WAD / U256::from(100);
        assert_eq!(liquidator_budget(U256::from(101), lenders).unwrap(), U256::from(100));
        assert_eq!(liquidator_budget(U256::MAX, lenders).unwrap(), U256::MAX);

        // too large for `max * WAD` yet still reduced
        let chunk = U256::MAX / U256::from(1_000);
        let budget = liquidator_budget(chunk * U256::from(101), lenders).unwrap();
        assert_eq!(budget, chunk * U256::from(100));
        let almost = U256::MAX - U256::from(1);
        assert_eq!(liquidator_budget(almost, U256::ZERO).unwrap(), almost);
    }

    #[test]
    fn test_handle_bad_debt() {
        let (mut auditor, mut markets) = create_test_auditor();
        auditor.enter_market(ALICE, USDC).unwrap();
        auditor.enter_market(ALICE, WETH).unwrap();
        markets
            .get_mut(&USDC)
            .unwrap()
            .snapshots
            .insert(ALICE, (U256::ZERO, units(10, 6)));
        markets
            .get_mut(&WETH)
            .unwrap()
            .snapshots
            .insert(ALICE, (U256::from(1), U256::ZERO));
        assert!(auditor.handle_bad_debt(ALICE, &markets, NOW).unwrap().is_empty());

        markets
            .get_mut(&WETH)
            .unwrap()
            .snapshots
            .insert(ALICE, (U256::ZERO, U256::ZERO));
        assert_eq!(auditor.handle_bad_debt(ALICE, &markets, NOW).unwrap(), vec![USDC, WETH]);
    }
}
