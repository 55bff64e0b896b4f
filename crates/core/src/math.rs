//! 18-decimal fixed-point math.
//!
//! All ledger quantities are [`U256`] values scaled by [`WAD`]. Multiplication
//! and division come in explicit round-down and round-up variants; callers pick
//! the direction that biases against the account (debt up, collateral down).
//! Every helper is checked and reports overflow, underflow or division by zero
//! as a [`ProtocolError`] instead of panicking.

use alloy_primitives::U256;

use crate::error::ProtocolError;

/// 1.0 in 18-decimal fixed point
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Seconds in a 365-day year
pub const SECONDS_PER_YEAR: u64 = 365 * 86_400;

/// ln(2) scaled by WAD
pub const LN_2: i128 = 693_147_180_559_945_309;

/// ln(1e-18) scaled by WAD (negative)
pub const LN_WEI: i128 = -41_446_531_673_892_822_312;

/// Largest argument accepted by `exp_wad` without overflowing 256 bits
pub const EXP_WAD_UPPER_BOUND: i128 = 135_305_999_368_893_231_589;

const WAD_I128: i128 = 1_000_000_000_000_000_000;

/// Rounding direction for share and fixed-point conversions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundingDirection {
    Down,
    Up,
}

/// Computes `x * y / denominator` with the requested rounding
pub fn mul_div(
    x: U256,
    y: U256,
    denominator: U256,
    rounding: RoundingDirection,
) -> Result<U256, ProtocolError> {
    if denominator.is_zero() {
        return Err(ProtocolError::DivisionByZero);
    }
    let product = x.checked_mul(y).ok_or(ProtocolError::Arithmetic)?;
    let quotient = product / denominator;
    match rounding {
        RoundingDirection::Down => Ok(quotient),
        RoundingDirection::Up if (product % denominator).is_zero() => Ok(quotient),
        RoundingDirection::Up => try_add(quotient, U256::from(1)),
    }
}

/// `x * y / denominator`, rounded down
pub fn mul_div_down(x: U256, y: U256, denominator: U256) -> Result<U256, ProtocolError> {
    mul_div(x, y, denominator, RoundingDirection::Down)
}

/// `x * y / denominator`, rounded up
pub fn mul_div_up(x: U256, y: U256, denominator: U256) -> Result<U256, ProtocolError> {
    mul_div(x, y, denominator, RoundingDirection::Up)
}

/// `x * y / WAD`, rounded down
pub fn w_mul_down(x: U256, y: U256) -> Result<U256, ProtocolError> {
    mul_div_down(x, y, WAD)
}

/// `x * y / WAD`, rounded up
pub fn w_mul_up(x: U256, y: U256) -> Result<U256, ProtocolError> {
    mul_div_up(x, y, WAD)
}

/// `x * WAD / y`, rounded down
pub fn w_div_down(x: U256, y: U256) -> Result<U256, ProtocolError> {
    mul_div_down(x, WAD, y)
}

/// `x * WAD / y`, rounded up
pub fn w_div_up(x: U256, y: U256) -> Result<U256, ProtocolError> {
    mul_div_up(x, WAD, y)
}

/// Checked addition
pub fn try_add(x: U256, y: U256) -> Result<U256, ProtocolError> {
    x.checked_add(y).ok_or(ProtocolError::Arithmetic)
}

/// Checked subtraction
pub fn try_sub(x: U256, y: U256) -> Result<U256, ProtocolError> {
    x.checked_sub(y).ok_or(ProtocolError::Arithmetic)
}

/// Returns `max(x - y, 0)`
pub fn zero_floor_sub(x: U256, y: U256) -> U256 {
    x.saturating_sub(y)
}

/// Converts assets to shares. An empty supply converts 1:1.
pub fn assets_to_shares(
    assets: U256,
    total_assets: U256,
    total_shares: U256,
    rounding: RoundingDirection,
) -> Result<U256, ProtocolError> {
    if total_shares.is_zero() {
        return Ok(assets);
    }
    mul_div(assets, total_shares, total_assets, rounding)
}

/// Converts shares to assets. An empty supply converts 1:1.
pub fn shares_to_assets(
    shares: U256,
    total_assets: U256,
    total_shares: U256,
    rounding: RoundingDirection,
) -> Result<U256, ProtocolError> {
    if total_shares.is_zero() {
        return Ok(shares);
    }
    mul_div(shares, total_assets, total_shares, rounding)
}

/// Natural logarithm of a WAD-scaled value, WAD-scaled.
///
/// The argument is normalized to `m * 2^k` with `m` in `[1, 2)`, then
/// `ln(m) = 2 * atanh((m - 1) / (m + 1))` is summed until the series term
/// vanishes at 18-decimal precision.
pub fn ln_wad(x: U256) -> Result<i128, ProtocolError> {
    if x.is_zero() {
        return Err(ProtocolError::Arithmetic);
    }

    let (mantissa, exponent) = if x >= WAD {
        let shift = (x / WAD).bit_len() - 1;
        (x >> shift, shift as i128)
    } else {
        let mut shift = WAD.bit_len() - x.bit_len();
        let mut mantissa = x << shift;
        if mantissa < WAD {
            mantissa <<= 1;
            shift += 1;
        }
        (mantissa, -(shift as i128))
    };

    let m = mantissa.saturating_to::<i128>();
    let z = (m - WAD_I128) * WAD_I128 / (m + WAD_I128);
    let z_squared = z * z / WAD_I128;

    let mut term = z;
    let mut sum = 0i128;
    let mut n = 1i128;
    while term != 0 {
        sum += term / n;
        term = term * z_squared / WAD_I128;
        n += 2;
    }

    Ok(exponent * LN_2 + 2 * sum)
}

/// `e^x` for a WAD-scaled exponent, WAD-scaled.
///
/// Uses the decomposition `e^x = 2^k * e^r` with `|r| <= ln(2) / 2` and a
/// Taylor series for `e^r`.
pub fn exp_wad(x: i128) -> Result<U256, ProtocolError> {
    // exp(x) < 1e-18 rounds to zero
    if x < LN_WEI {
        return Ok(U256::ZERO);
    }
    if x >= EXP_WAD_UPPER_BOUND {
        return Err(ProtocolError::Arithmetic);
    }

    let half = if x < 0 { -(LN_2 / 2) } else { LN_2 / 2 };
    let k = (x + half) / LN_2;
    let r = x - k * LN_2;

    let mut term = WAD_I128;
    let mut sum = WAD_I128;
    let mut n = 1i128;
    loop {
        term = term * r / WAD_I128 / n;
        if term == 0 {
            break;
        }
        sum += term;
        n += 1;
    }

    let exp_r = U256::from(sum.unsigned_abs());
    if k >= 0 {
        exp_r
            .checked_shl(k as usize)
            .ok_or(ProtocolError::Arithmetic)
    } else {
        Ok(exp_r >> ((-k) as usize))
    }
}

/// Lossy conversion of a WAD-scaled value to `f64`, for reporting
pub fn wad_to_f64(value: U256) -> f64 {
    value.saturating_to::<u128>() as f64 / 1e18
}
