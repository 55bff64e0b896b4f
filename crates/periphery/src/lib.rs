//! Position management on top of the lending core.
//!
//! The [`DebtManager`] chains deposits, borrows, repayments and withdrawals
//! through a single flash loan so an account can lever up, unwind or roll
//! a fixed borrow to a later maturity in one atomic call.

pub mod debt_manager;

pub use debt_manager::{DebtManager, RollFixed, Step};
