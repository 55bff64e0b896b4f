//! Interest rate model.
//!
//! Both legs share the same curve shape:
//!
//! ```text
//! rate(u) = a / (max_utilization - u) + b
//! ```
//!
//! # Floating leg
//!
//! The floating rate evaluates the curve at `debt / assets` and then scales it
//! by how much of the pool is still liquid once backup borrowing by the fixed
//! pools is accounted for:
//!
//! ```text
//! liquidity = assets - debt - backup_borrowed
//! rate      = rate(u) * (1 - natural_utilization) / (liquidity / assets)
//! ```
//!
//! A sigmoid-shaped alternative is available through [`FloatingCurve::Sigmoid`].
//!
//! # Fixed leg
//!
//! A fixed borrow that moves pool utilization from `u0` to `u1` pays the mean
//! of the curve over that interval:
//!
//! ```text
//! rate = a * ln((max - u0) / (max - u1)) / (u1 - u0) + b
//! ```
//!
//! When the interval is too narrow for the logarithm to be accurate, Simpson's
//! rule is used instead. All rates are annualized and WAD-scaled.

use alloy_primitives::{I256, U256};

use crate::config::{CurveParameters, FloatingCurve, InterestRateModelConfig};
use crate::error::ProtocolError;
use crate::math::{
    exp_wad, ln_wad, mul_div_down, try_add, try_sub, w_div_down, w_div_up, w_mul_down,
    SECONDS_PER_YEAR, WAD,
};

/// Below this `delta / alpha` ratio the fixed rate falls back to Simpson's rule
pub const PRECISION_THRESHOLD: U256 = U256::from_limbs([750_000_000_000_000, 0, 0, 0]);

/// Clamp applied to exponents in the sigmoid curve
const MAX_SIGMOID_EXPONENT: i128 = 50_000_000_000_000_000_000;

const WAD_I128: i128 = 1_000_000_000_000_000_000;

impl CurveParameters {
    /// Annualized curve rate at `utilization`
    pub fn rate_at(&self, utilization: U256) -> Result<U256, ProtocolError> {
        let headroom = try_sub(self.max_utilization, utilization)?;
        apply_offset(w_div_down(self.curve_a, headroom)?, self.curve_b)
    }

    fn validate(&self, leg: &'static str) -> Result<(), ProtocolError> {
        if self.max_utilization <= WAD {
            return Err(ProtocolError::InvalidCurve {
                reason: "max utilization must exceed 100%",
            });
        }
        if self.natural_utilization.is_zero() || self.natural_utilization >= WAD {
            return Err(ProtocolError::InvalidCurve {
                reason: "natural utilization must be within (0, 100%)",
            });
        }
        // the curve is increasing in u, so its value at zero is its minimum
        self.rate_at(U256::ZERO).map_err(|_| ProtocolError::InvalidCurve { reason: leg })?;
        Ok(())
    }
}

fn apply_offset(base: U256, offset: I256) -> Result<U256, ProtocolError> {
    if offset.is_negative() {
        base.checked_sub(offset.unsigned_abs())
            .ok_or(ProtocolError::NegativeRate)
    } else {
        try_add(base, offset.into_raw())
    }
}

/// Validated rate model for one market
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterestRateModel {
    config: InterestRateModelConfig,
}

impl InterestRateModel {
    /// Builds a model, rejecting curves that could ever yield a negative rate
    pub fn new(config: InterestRateModelConfig) -> Result<Self, ProtocolError> {
        config.fixed.validate("fixed curve is negative at zero utilization")?;
        config
            .floating
            .validate("floating curve is negative at zero utilization")?;
        if config.max_rate.is_zero() {
            return Err(ProtocolError::InvalidCurve {
                reason: "max rate must be positive",
            });
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &InterestRateModelConfig {
        &self.config
    }

    /// Floating rate under whichever curve the model is configured with
    pub fn current_floating_rate(
        &self,
        assets: U256,
        debt: U256,
        backup_borrowed: U256,
    ) -> Result<U256, ProtocolError> {
        match self.config.floating_curve {
            FloatingCurve::Natural => self.floating_rate(assets, debt, backup_borrowed),
            FloatingCurve::Sigmoid => self.floating_rate_sigmoid(assets, debt, backup_borrowed),
        }
    }

    /// Annualized floating borrow rate.
    ///
    /// Fails with [`ProtocolError::Arithmetic`] if `debt + backup_borrowed`
    /// exceeds `assets`.
    pub fn floating_rate(
        &self,
        assets: U256,
        debt: U256,
        backup_borrowed: U256,
    ) -> Result<U256, ProtocolError> {
        let liquidity = try_sub(try_sub(assets, debt)?, backup_borrowed)?;
        let rate = self.base_floating_rate(assets, debt)?;
        if liquidity.is_zero() {
            return Ok(rate.min(self.config.max_rate));
        }

        let liquidity_ratio = w_div_down(liquidity, assets)?;
        let natural_complement = WAD - self.config.floating.natural_utilization;
        let scaled = mul_div_down(rate, natural_complement, liquidity_ratio)?;
        Ok(scaled.min(self.config.max_rate))
    }

    /// Annualized floating borrow rate using the sigmoid growth curve.
    ///
    /// ```text
    /// sig    = 1 / (1 + e^(-speed * (logit(u_global) - logit(natural))))
    /// factor = ((1 - natural) / (1 - u_global)) ^ (growth * sig)
    /// ```
    pub fn floating_rate_sigmoid(
        &self,
        assets: U256,
        debt: U256,
        backup_borrowed: U256,
    ) -> Result<U256, ProtocolError> {
        let liquidity = try_sub(try_sub(assets, debt)?, backup_borrowed)?;
        let rate = self.base_floating_rate(assets, debt)?;
        if assets.is_zero() {
            return Ok(rate.min(self.config.max_rate));
        }
        if liquidity.is_zero() {
            return Ok(self.config.max_rate);
        }

        let global_utilization = WAD - w_div_down(liquidity, assets)?;
        if global_utilization.is_zero() {
            return Ok(rate.min(self.config.max_rate));
        }

        let natural = self.config.floating.natural_utilization;
        let logit_distance = logit(global_utilization)? - logit(natural)?;
        let sigmoid_exponent = self
            .config
            .sigmoid_speed
            .saturating_to::<i128>()
            .checked_mul(-logit_distance)
            .ok_or(ProtocolError::Arithmetic)?
            / WAD_I128;
        let denominator = try_add(WAD, exp_wad(sigmoid_exponent.min(MAX_SIGMOID_EXPONENT))?)?;
        let sigmoid = mul_div_down(WAD, WAD, denominator)?.saturating_to::<i128>();

        let ln_ratio = ln_wad(WAD - natural)? - ln_wad(WAD - global_utilization)?;
        let growth = self
            .config
            .growth_speed
            .saturating_to::<i128>()
            .checked_mul(sigmoid)
            .ok_or(ProtocolError::Arithmetic)?
            / WAD_I128;
        let exponent = growth
            .checked_mul(ln_ratio)
            .ok_or(ProtocolError::Arithmetic)?
            / WAD_I128;
        let factor = exp_wad(exponent.min(MAX_SIGMOID_EXPONENT))?;

        Ok(w_mul_down(rate, factor)?.min(self.config.max_rate))
    }

    fn base_floating_rate(&self, assets: U256, debt: U256) -> Result<U256, ProtocolError> {
        let utilization = if assets.is_zero() {
            U256::ZERO
        } else {
            w_div_up(debt, assets)?
        };
        self.config.floating.rate_at(utilization)
    }

    /// Annualized fixed rate for moving utilization from `before` to `after`
    pub fn fixed_rate(
        &self,
        utilization_before: U256,
        utilization_after: U256,
    ) -> Result<U256, ProtocolError> {
        if utilization_after > WAD {
            return Err(ProtocolError::UtilizationExceeded);
        }
        let curve = &self.config.fixed;
        let alpha = try_sub(curve.max_utilization, utilization_before)?;
        let delta = try_sub(utilization_after, utilization_before)?;
        let headroom_after = try_sub(curve.max_utilization, utilization_after)?;

        let mean = if w_div_down(delta, alpha)? < PRECISION_THRESHOLD {
            let midpoint = try_sub(
                curve.max_utilization,
                (utilization_after + utilization_before) / U256::from(2u64),
            )?;
            let start = w_div_down(curve.curve_a, alpha)?;
            let middle = mul_div_down(curve.curve_a, U256::from(4u64) * WAD, midpoint)?;
            let end = w_div_down(curve.curve_a, headroom_after)?;
            try_add(try_add(start, middle)?, end)? / U256::from(6u64)
        } else {
            let log = ln_wad(w_div_down(alpha, headroom_after)?)?.max(0);
            mul_div_down(curve.curve_a, U256::from(log.unsigned_abs()), delta)?
        };

        apply_offset(mean, curve.curve_b)
    }

    /// Rate for borrowing `amount` at `maturity`, prorated to the time left.
    ///
    /// `backup_assets` is the floating liquidity the pool may draw on in
    /// addition to its own supply.
    pub fn fixed_borrow_rate(
        &self,
        maturity: u64,
        amount: U256,
        borrowed: U256,
        supplied: U256,
        backup_assets: U256,
        timestamp: u64,
    ) -> Result<U256, ProtocolError> {
        if timestamp >= maturity {
            return Err(ProtocolError::AlreadyMatured {
                maturity,
                timestamp,
            });
        }
        let potential_assets = try_add(supplied, backup_assets)?;
        if potential_assets.is_zero() {
            return Err(ProtocolError::UtilizationExceeded);
        }
        let utilization_after = w_div_up(try_add(borrowed, amount)?, potential_assets)?;
        if utilization_after > WAD {
            return Err(ProtocolError::UtilizationExceeded);
        }
        let utilization_before = w_div_down(borrowed, potential_assets)?;
        let rate = self.fixed_rate(utilization_before, utilization_after)?;

        mul_div_down(
            rate,
            U256::from(maturity - timestamp),
            U256::from(SECONDS_PER_YEAR),
        )
    }

    /// Marginal fixed rate at the pool's current utilization.
    ///
    /// Returns `(rate, utilization)`.
    pub fn min_fixed_rate(
        &self,
        borrowed: U256,
        supplied: U256,
        backup_assets: U256,
    ) -> Result<(U256, U256), ProtocolError> {
        let potential_assets = try_add(supplied, backup_assets)?;
        let utilization = if potential_assets.is_zero() {
            U256::ZERO
        } else {
            w_div_up(borrowed, potential_assets)?
        };
        let rate = self.fixed_rate(utilization, utilization)?;
        Ok((rate, utilization))
    }
}

fn logit(x: U256) -> Result<i128, ProtocolError> {
    ln_wad(w_div_down(x, try_sub(WAD, x)?)?)
}
