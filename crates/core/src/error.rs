//! Error types for the lending engine.

use alloy_primitives::{Address, U256};
use thiserror::Error;

use crate::fixed_pool::PoolState;

/// Broad classification of a [`ProtocolError`].
///
/// Every error aborts the operation that raised it and rolls back all of its
/// state changes; the kind only tells the caller what went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller mistake, retrying with different arguments can succeed
    Input,
    /// State-dependent rejection expected in normal operation
    Solvency,
    /// Unreachable with correct inputs and state
    Invariant,
    /// Listing or parameter misconfiguration
    Configuration,
    /// Underlying asset movement failed
    Transfer,
}

/// Errors raised by markets, the auditor and the protocol aggregate
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Deposit of zero assets")]
    ZeroDeposit,

    #[error("Borrow of zero assets")]
    ZeroBorrow,

    #[error("Repay of zero assets")]
    ZeroRepay,

    #[error("Withdraw of zero assets")]
    ZeroWithdraw,

    #[error("Utilization would exceed 100%")]
    UtilizationExceeded,

    #[error("Maturity {maturity} already reached at {timestamp}")]
    AlreadyMatured { maturity: u64, timestamp: u64 },

    /// Realized amount is outside the caller's slippage bound
    #[error("Disagreement: realized {actual} against bound {bound}")]
    Disagreement { actual: U256, bound: U256 },

    #[error("Pool at maturity {maturity} is {state:?}, expected {required:?}")]
    UnmatchedPoolState {
        maturity: u64,
        state: PoolState,
        required: PoolState,
        alternative: Option<PoolState>,
    },

    #[error("Insufficient shares for {account}: has {balance}, needs {required}")]
    InsufficientShares {
        account: Address,
        balance: U256,
        required: U256,
    },

    #[error("Allowance of {spender} over {owner} is {allowance}, needs {required}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        allowance: U256,
        required: U256,
    },

    #[error("Account {borrower} cannot liquidate itself")]
    SelfLiquidation { borrower: Address },

    #[error("Account {account} still owes {debt} in market {market}")]
    RemainingDebt {
        account: Address,
        market: Address,
        debt: U256,
    },

    #[error("Insufficient account liquidity for {account}: collateral {collateral}, debt {debt}")]
    InsufficientAccountLiquidity {
        account: Address,
        collateral: U256,
        debt: U256,
    },

    #[error("Account {account} is not in shortfall")]
    InsufficientShortfall { account: Address },

    #[error("Insufficient protocol liquidity in market {market}")]
    InsufficientProtocolLiquidity { market: Address },

    #[error("Invalid price for market {market}")]
    InvalidPrice { market: Address },

    #[error("Market {market} already listed")]
    MarketAlreadyListed { market: Address },

    #[error("Market {market} not listed")]
    MarketNotListed { market: Address },

    #[error("Market {market} does not exist")]
    MarketNotFound { market: Address },

    #[error("Market {market} already exists")]
    MarketAlreadyExists { market: Address },

    #[error("Market {market} belongs to auditor {expected}, not {actual}")]
    AuditorMismatch {
        market: Address,
        expected: Address,
        actual: Address,
    },

    #[error("Price feed for market {market} reports {decimals} decimals, expected {expected}")]
    InvalidPriceFeed {
        market: Address,
        decimals: u8,
        expected: u8,
    },

    #[error("Too many markets listed (max {max})")]
    TooManyMarkets { max: usize },

    #[error("Invalid parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: U256 },

    /// Interest rate curve that can produce a negative rate
    #[error("Invalid interest rate curve: {reason}")]
    InvalidCurve { reason: &'static str },

    #[error("Timestamp {timestamp} is before current {current}")]
    InvalidTimestamp { timestamp: u64, current: u64 },

    #[error("Transfer of {amount} {asset} from {from} failed: balance {balance}")]
    TransferFailed {
        asset: Address,
        from: Address,
        amount: U256,
        balance: U256,
    },

    #[error("Token allowance of {spender} over {owner} for {asset} is {allowance}, needs {required}")]
    InsufficientTokenAllowance {
        asset: Address,
        owner: Address,
        spender: Address,
        allowance: U256,
        required: U256,
    },

    #[error("Flash loan of {asset} was not repaid: expected {expected}, got {actual}")]
    FlashLoanNotRepaid {
        asset: Address,
        expected: U256,
        actual: U256,
    },

    #[error("Negative interest rate")]
    NegativeRate,

    /// Re-entrant callback whose continuation does not match the pending call
    #[error("Unexpected callback into {receiver}")]
    CallHashMismatch { receiver: Address },

    #[error("Arithmetic overflow or underflow")]
    Arithmetic,

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Classifies the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ZeroDeposit
            | Self::ZeroBorrow
            | Self::ZeroRepay
            | Self::ZeroWithdraw
            | Self::UtilizationExceeded
            | Self::AlreadyMatured { .. }
            | Self::Disagreement { .. }
            | Self::UnmatchedPoolState { .. }
            | Self::InsufficientShares { .. }
            | Self::InsufficientAllowance { .. }
            | Self::SelfLiquidation { .. }
            | Self::RemainingDebt { .. }
            | Self::InvalidTimestamp { .. } => ErrorKind::Input,
            Self::InsufficientAccountLiquidity { .. }
            | Self::InsufficientShortfall { .. }
            | Self::InsufficientProtocolLiquidity { .. }
            | Self::InvalidPrice { .. } => ErrorKind::Solvency,
            Self::MarketAlreadyListed { .. }
            | Self::MarketNotListed { .. }
            | Self::MarketNotFound { .. }
            | Self::MarketAlreadyExists { .. }
            | Self::AuditorMismatch { .. }
            | Self::InvalidPriceFeed { .. }
            | Self::TooManyMarkets { .. }
            | Self::InvalidParameter { .. }
            | Self::InvalidCurve { .. }
            | Self::Serialization(_) => ErrorKind::Configuration,
            Self::TransferFailed { .. }
            | Self::InsufficientTokenAllowance { .. }
            | Self::FlashLoanNotRepaid { .. } => ErrorKind::Transfer,
            Self::NegativeRate
            | Self::CallHashMismatch { .. }
            | Self::Arithmetic
            | Self::DivisionByZero => ErrorKind::Invariant,
        }
    }

    /// Returns true for errors that should be unreachable
    pub fn is_invariant_violation(&self) -> bool {
        self.kind() == ErrorKind::Invariant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ProtocolError::ZeroDeposit.kind(), ErrorKind::Input);
        assert_eq!(
            ProtocolError::InsufficientProtocolLiquidity {
                market: Address::ZERO
            }
            .kind(),
            ErrorKind::Solvency
        );
        assert_eq!(
            ProtocolError::MarketAlreadyListed {
                market: Address::ZERO
            }
            .kind(),
            ErrorKind::Configuration
        );
        assert!(ProtocolError::Arithmetic.is_invariant_violation());
        assert!(!ProtocolError::ZeroBorrow.is_invariant_violation());
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::Disagreement {
            actual: U256::from(11),
            bound: U256::from(10),
        };
        assert_eq!(err.to_string(), "Disagreement: realized 11 against bound 10");
    }
}
