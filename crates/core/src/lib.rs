//! Fixed and floating rate lending markets.
//!
//! This crate models a lending protocol in which every market offers two
//! legs over the same asset: an ERC-4626 style floating pool with variable
//! rates, and a series of fixed-rate pools, one per maturity, that borrow
//! from the floating pool as backup when their own deposits run short. A
//! shared auditor prices accounts across markets, gates borrows and
//! withdrawals on solvency, and drives liquidations.
//!
//! # Overview
//!
//! - [`math`]: wad fixed point helpers, `ln`/`exp` and share conversions
//! - [`irm`]: utilization based interest rate curves for both legs
//! - [`fixed_pool`]: per-maturity pool ledger and position arithmetic
//! - [`market`]: the per-asset ledger
//! - [`auditor`]: cross-market liquidity, liquidation and bad debt
//! - [`protocol`]: atomic entry points, token movements and event delivery
//!
//! # Example
//!
//! ```rust,ignore
//! use exactly_rs_core::{MarketConfig, PriceSource, Protocol, AuditorConfig, WAD};
//! use alloy_primitives::{Address, U256};
//!
//! let mut protocol = Protocol::new(auditor, AuditorConfig::default(), now)?;
//! protocol.create_market(market, asset, 18, MarketConfig::default())?;
//! protocol.enable_market(market, PriceSource::Base, WAD * U256::from(8) / U256::from(10))?;
//!
//! protocol.fund(asset, alice, U256::from(100) * WAD)?;
//! protocol.approve_token(asset, alice, market, U256::MAX);
//! let shares = protocol.deposit(alice, market, U256::from(100) * WAD, alice)?;
//! ```

pub mod auditor;
pub mod config;
pub mod error;
pub mod events;
pub mod fixed_pool;
pub mod flash;
pub mod hooks;
pub mod irm;
pub mod market;
pub mod math;
pub mod oracle;
pub mod protocol;
pub mod token;

// Re-export commonly used types
pub use error::{ErrorKind, ProtocolError};

pub use auditor::{Auditor, MarketData, MarketLookup, MarketView, MAX_MARKETS, TARGET_HEALTH};
pub use config::{
    AuditorConfig, CurveParameters, FloatingCurve, InterestRateModelConfig, LiquidationIncentive,
    MarketConfig,
};
pub use events::Event;
pub use fixed_pool::{FixedPool, FixedPosition, PoolState, INTERVAL};
pub use flash::{FlashLender, FlashLoanRecipient};
pub use hooks::{BalanceChange, OperationKind, RecordingHook, RewardHook};
pub use irm::InterestRateModel;
pub use market::{Account, Context, Market};
pub use math::{RoundingDirection, SECONDS_PER_YEAR, WAD};
pub use oracle::{FixedPriceFeed, PriceFeed, PriceSource, RoundData};
pub use protocol::{Protocol, State};
pub use token::TokenLedger;
