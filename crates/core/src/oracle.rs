//! Price sources consumed by the auditor.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use alloy_primitives::I256;

/// Latest answer of a price feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundData {
    /// Signed price scaled by the feed's decimals
    pub answer: I256,
    /// Unix timestamp of the answer
    pub updated_at: u64,
}

/// External price feed for one asset, quoted in the base asset
pub trait PriceFeed: Send + Sync + fmt::Debug {
    fn decimals(&self) -> u8;

    /// `None` when the feed has no answer
    fn latest_round_data(&self) -> Option<RoundData>;
}

/// Where a market's price comes from
#[derive(Debug, Clone)]
pub enum PriceSource {
    /// The market's asset is the unit of account
    Base,
    Feed(Arc<dyn PriceFeed>),
}

impl PriceSource {
    pub fn feed(feed: impl PriceFeed + 'static) -> Self {
        Self::Feed(Arc::new(feed))
    }
}

/// Settable in-memory feed
#[derive(Debug)]
pub struct FixedPriceFeed {
    decimals: u8,
    round: RwLock<Option<RoundData>>,
}

impl FixedPriceFeed {
    pub fn new(decimals: u8, answer: I256, updated_at: u64) -> Self {
        Self {
            decimals,
            round: RwLock::new(Some(RoundData { answer, updated_at })),
        }
    }

    /// Feed that has never reported
    pub fn empty(decimals: u8) -> Self {
        Self {
            decimals,
            round: RwLock::new(None),
        }
    }

    pub fn set_price(&self, answer: I256, updated_at: u64) {
        *self.round.write().unwrap_or_else(PoisonError::into_inner) =
            Some(RoundData { answer, updated_at });
    }
}

impl PriceFeed for FixedPriceFeed {
    fn decimals(&self) -> u8 {
        self.decimals
    }

    fn latest_round_data(&self) -> Option<RoundData> {
        *self.round.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_price_feed() {
        let feed = FixedPriceFeed::new(8, I256::try_from(200_000_000_000i64).unwrap(), 100);
        assert_eq!(feed.decimals(), 8);
        assert_eq!(feed.latest_round_data().unwrap().updated_at, 100);

        feed.set_price(I256::try_from(190_000_000_000i64).unwrap(), 200);
        let round = feed.latest_round_data().unwrap();
        assert_eq!(round.updated_at, 200);
        assert_eq!(round.answer, I256::try_from(190_000_000_000i64).unwrap());

        assert!(FixedPriceFeed::empty(8).latest_round_data().is_none());
    }
}
