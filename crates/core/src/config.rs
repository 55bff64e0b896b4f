//! Market, interest rate model and auditor parameters.
//!
//! All configuration types are serde-(de)serializable and fall back to the
//! production defaults for any field that is omitted.

use alloy_primitives::{I256, U256};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::math::WAD;

const fn wad_fraction(value: u64) -> U256 {
    U256::from_limbs([value, 0, 0, 0])
}

/// Highest number of concurrently open maturities a market may expose
pub const MAX_FUTURE_POOLS_LIMIT: u8 = 224;

/// Parameters of one rate curve `a / (max_utilization - u) + b`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveParameters {
    pub curve_a: U256,
    pub curve_b: I256,
    pub max_utilization: U256,
    pub natural_utilization: U256,
}

impl Default for CurveParameters {
    fn default() -> Self {
        Self {
            curve_a: wad_fraction(23_000_000_000_000_000),
            curve_b: -I256::from_raw(wad_fraction(2_500_000_000_000_000)),
            max_utilization: wad_fraction(1_020_000_000_000_000_000),
            natural_utilization: wad_fraction(700_000_000_000_000_000),
        }
    }
}

/// Which formula drives the floating leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FloatingCurve {
    /// Curve rate scaled by the natural-utilization liquidity correction
    #[default]
    Natural,
    /// Curve rate scaled by a sigmoid of global utilization
    Sigmoid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterestRateModelConfig {
    pub fixed: CurveParameters,
    pub floating: CurveParameters,
    pub floating_curve: FloatingCurve,
    /// Steepness of the sigmoid around natural utilization
    pub sigmoid_speed: U256,
    /// Growth of the rate once past natural utilization
    pub growth_speed: U256,
    /// Annualized ceiling for the floating rate
    pub max_rate: U256,
}

impl Default for InterestRateModelConfig {
    fn default() -> Self {
        Self {
            fixed: CurveParameters::default(),
            floating: CurveParameters::default(),
            floating_curve: FloatingCurve::Natural,
            sigmoid_speed: wad_fraction(2_500_000_000_000_000_000),
            growth_speed: wad_fraction(1_000_000_000_000_000_000),
            max_rate: U256::from(150u64) * WAD,
        }
    }
}

/// Per-market accounting parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Per-second penalty charged on late fixed repayments
    pub penalty_rate: U256,
    /// Share of fixed-pool earnings kept by the floating pool for backing deposits
    pub backup_fee_rate: U256,
    /// Fraction of floating assets that can never be borrowed
    pub reserve_factor: U256,
    /// Share of interest and fees minted to the treasury
    pub treasury_fee_rate: U256,
    pub damp_speed_up: U256,
    pub damp_speed_down: U256,
    pub earnings_accumulator_smooth_factor: U256,
    pub max_future_pools: u8,
    pub interest_rate_model: InterestRateModelConfig,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            penalty_rate: wad_fraction(20_000_000_000_000_000) / U256::from(86_400u64),
            backup_fee_rate: wad_fraction(100_000_000_000_000_000),
            reserve_factor: U256::ZERO,
            treasury_fee_rate: U256::ZERO,
            damp_speed_up: wad_fraction(4_600_000_000_000_000),
            damp_speed_down: wad_fraction(420_000_000_000_000_000),
            earnings_accumulator_smooth_factor: WAD,
            max_future_pools: 3,
            interest_rate_model: InterestRateModelConfig::default(),
        }
    }
}

impl MarketConfig {
    /// Parses and validates a JSON document
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        check_at_most("backup_fee_rate", self.backup_fee_rate, WAD)?;
        check_at_most("reserve_factor", self.reserve_factor, wad_fraction(900_000_000_000_000_000))?;
        check_at_most("treasury_fee_rate", self.treasury_fee_rate, WAD)?;
        check_at_most("damp_speed_up", self.damp_speed_up, WAD)?;
        check_at_most("damp_speed_down", self.damp_speed_down, WAD)?;
        check_at_most(
            "earnings_accumulator_smooth_factor",
            self.earnings_accumulator_smooth_factor,
            U256::from(4u64) * WAD,
        )?;
        if self.max_future_pools == 0 || self.max_future_pools > MAX_FUTURE_POOLS_LIMIT {
            return Err(ProtocolError::InvalidParameter {
                name: "max_future_pools",
                value: U256::from(self.max_future_pools),
            });
        }
        Ok(())
    }
}

/// Split of the seized collateral bonus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationIncentive {
    pub liquidator: U256,
    pub lenders: U256,
}

impl Default for LiquidationIncentive {
    fn default() -> Self {
        Self {
            liquidator: wad_fraction(90_000_000_000_000_000),
            lenders: wad_fraction(10_000_000_000_000_000),
        }
    }
}

impl LiquidationIncentive {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        check_at_most("liquidator", self.liquidator, wad_fraction(200_000_000_000_000_000))?;
        check_at_most("lenders", self.lenders, wad_fraction(100_000_000_000_000_000))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditorConfig {
    pub liquidation_incentive: LiquidationIncentive,
    /// Decimals every external price feed must report with
    pub price_decimals: u8,
    /// Seconds after which a feed answer is considered stale
    pub price_expiry: u64,
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self {
            liquidation_incentive: LiquidationIncentive::default(),
            price_decimals: 18,
            price_expiry: 86_400,
        }
    }
}

impl AuditorConfig {
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        self.liquidation_incentive.validate()?;
        if self.price_decimals > 18 {
            return Err(ProtocolError::InvalidParameter {
                name: "price_decimals",
                value: U256::from(self.price_decimals),
            });
        }
        Ok(())
    }
}

fn check_at_most(name: &'static str, value: U256, limit: U256) -> Result<(), ProtocolError> {
    if value > limit {
        return Err(ProtocolError::InvalidParameter { name, value });
    }
    Ok(())
}
