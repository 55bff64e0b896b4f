//! Shared setup for protocol integration tests.

use std::sync::Arc;

use alloy_primitives::{address, Address, I256, U256};
use exactly_rs_core::{
    AuditorConfig, FixedPriceFeed, MarketConfig, PriceSource, Protocol, INTERVAL, WAD,
};

pub const AUDITOR: Address = address!("00000000000000000000000000000000000000aa");
pub const DAI_MARKET: Address = address!("0000000000000000000000000000000000001001");
pub const WETH_MARKET: Address = address!("0000000000000000000000000000000000001002");
pub const DAI: Address = address!("6B175474E89094C44Da98b954EedeAC495271d0F");
pub const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");

pub const ALICE: Address = address!("00000000000000000000000000000000000a11ce");
pub const BOB: Address = address!("0000000000000000000000000000000000000b0b");
pub const CAROL: Address = address!("00000000000000000000000000000000000ca201");

pub const START: u64 = INTERVAL * 100;
pub const MATURITY: u64 = START + INTERVAL;

pub fn wad(x: u64) -> U256 {
    U256::from(x) * WAD
}

/// Price with 18 decimals
pub fn price(x: u64) -> I256 {
    I256::from_raw(wad(x))
}

/// Two markets: DAI as the unit of account and WETH priced by a settable
/// feed, both with an adjust factor of 0.8. Every test account holds 10k of
/// each asset and has approved both markets.
pub struct Fixture {
    pub protocol: Protocol,
    pub weth_feed: Arc<FixedPriceFeed>,
}

pub fn create_test_fixture(dai_config: MarketConfig) -> Fixture {
    let mut protocol = Protocol::new(AUDITOR, AuditorConfig::default(), START).unwrap();
    protocol
        .create_market(DAI_MARKET, DAI, 18, dai_config)
        .unwrap();
    protocol
        .create_market(WETH_MARKET, WETH, 18, MarketConfig::default())
        .unwrap();

    let adjust_factor = wad(8) / U256::from(10);
    let weth_feed = Arc::new(FixedPriceFeed::new(18, price(2_000), START));
    protocol
        .enable_market(DAI_MARKET, PriceSource::Base, adjust_factor)
        .unwrap();
    protocol
        .enable_market(WETH_MARKET, PriceSource::Feed(weth_feed.clone()), adjust_factor)
        .unwrap();

    for account in [ALICE, BOB, CAROL] {
        protocol.fund(DAI, account, wad(10_000)).unwrap();
        protocol.fund(WETH, account, wad(10_000)).unwrap();
        protocol.approve_token(DAI, account, DAI_MARKET, U256::MAX);
        protocol.approve_token(WETH, account, WETH_MARKET, U256::MAX);
    }
    protocol.take_events();
    Fixture {
        protocol,
        weth_feed,
    }
}

impl Fixture {
    /// Moves the clock and refreshes the WETH price so it never goes stale
    pub fn skip(&mut self, seconds: u64, weth_price: u64) {
        self.protocol.skip(seconds);
        self.weth_feed
            .set_price(price(weth_price), self.protocol.timestamp());
    }

    /// Floating share price of `market` in wad
    pub fn share_price(&self, market: Address) -> U256 {
        let market = self.protocol.market(market).unwrap();
        if market.total_supply().is_zero() {
            return WAD;
        }
        market.total_assets(self.protocol.timestamp()).unwrap() * WAD / market.total_supply()
    }

    /// Sum of every holder's floating shares
    pub fn sum_of_balances(&self, market: Address) -> U256 {
        self.protocol
            .market(market)
            .unwrap()
            .holders()
            .fold(U256::ZERO, |sum, (_, balance)| sum + *balance)
    }

    pub fn assert_backup_consistent(&self, market: Address) {
        let market = self.protocol.market(market).unwrap();
        assert_eq!(
            market.backup_borrowed_by_pools().unwrap(),
            market.floating_backup_borrowed()
        );
    }
}
