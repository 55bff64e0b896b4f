//! Events emitted by committed operations.

use alloy_primitives::{Address, U256};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Deposit {
        market: Address,
        caller: Address,
        owner: Address,
        assets: U256,
        shares: U256,
    },
    Withdraw {
        market: Address,
        caller: Address,
        receiver: Address,
        owner: Address,
        assets: U256,
        shares: U256,
    },
    /// Floating share transfer between accounts
    Transfer {
        market: Address,
        from: Address,
        to: Address,
        shares: U256,
    },
    Borrow {
        market: Address,
        caller: Address,
        receiver: Address,
        borrower: Address,
        assets: U256,
        shares: U256,
    },
    Repay {
        market: Address,
        caller: Address,
        borrower: Address,
        assets: U256,
        shares: U256,
    },
    DepositAtMaturity {
        market: Address,
        maturity: u64,
        caller: Address,
        owner: Address,
        assets: U256,
        fee: U256,
    },
    WithdrawAtMaturity {
        market: Address,
        maturity: u64,
        caller: Address,
        receiver: Address,
        owner: Address,
        position_assets: U256,
        assets: U256,
    },
    BorrowAtMaturity {
        market: Address,
        maturity: u64,
        caller: Address,
        receiver: Address,
        borrower: Address,
        assets: U256,
        fee: U256,
    },
    RepayAtMaturity {
        market: Address,
        maturity: u64,
        caller: Address,
        borrower: Address,
        assets: U256,
        position_assets: U256,
    },
    Liquidate {
        market: Address,
        receiver: Address,
        borrower: Address,
        assets: U256,
        lenders_assets: U256,
        seize_market: Address,
        seized_assets: U256,
    },
    Seize {
        market: Address,
        liquidator: Address,
        borrower: Address,
        assets: U256,
    },
    /// Debt written off against the earnings accumulator
    SpreadBadDebt {
        market: Address,
        borrower: Address,
        assets: U256,
    },
    MarketEntered {
        market: Address,
        account: Address,
    },
    MarketExited {
        market: Address,
        account: Address,
    },
    MarketListed {
        market: Address,
        decimals: u8,
    },
    /// Snapshot of a market's floating ledger after an operation
    MarketUpdate {
        market: Address,
        timestamp: u64,
        floating_deposit_shares: U256,
        floating_assets: U256,
        floating_borrow_shares: U256,
        floating_debt: U256,
        earnings_accumulator: U256,
    },
    FixedEarningsUpdate {
        market: Address,
        timestamp: u64,
        maturity: u64,
        unassigned_earnings: U256,
    },
}

impl Event {
    /// Market the event belongs to
    pub fn market(&self) -> Address {
        match self {
            Self::Deposit { market, .. }
            | Self::Withdraw { market, .. }
            | Self::Transfer { market, .. }
            | Self::Borrow { market, .. }
            | Self::Repay { market, .. }
            | Self::DepositAtMaturity { market, .. }
            | Self::WithdrawAtMaturity { market, .. }
            | Self::BorrowAtMaturity { market, .. }
            | Self::RepayAtMaturity { market, .. }
            | Self::Liquidate { market, .. }
            | Self::Seize { market, .. }
            | Self::SpreadBadDebt { market, .. }
            | Self::MarketEntered { market, .. }
            | Self::MarketExited { market, .. }
            | Self::MarketListed { market, .. }
            | Self::MarketUpdate { market, .. }
            | Self::FixedEarningsUpdate { market, .. } => *market,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
