//! Flash lending.
//!
//! A [`FlashLender`] hands out its own token balances for the duration of a
//! single callback. The recipient must return every amount plus the fee
//! before the callback ends, otherwise the whole loan fails.

use alloy_primitives::{Address, U256};
use tracing::{debug, info};

use crate::error::ProtocolError;
use crate::math::{try_add, w_mul_up, WAD};
use crate::protocol::State;

/// Receiver of a flash loan. Runs with the borrowed funds credited.
pub trait FlashLoanRecipient {
    fn receive_flash_loan(
        &mut self,
        state: &mut State,
        lender: Address,
        assets: &[Address],
        amounts: &[U256],
        fees: &[U256],
        data: &[u8],
    ) -> Result<(), ProtocolError>;
}

#[derive(Debug, Clone, Copy)]
pub struct FlashLender {
    address: Address,
    fee_rate: U256,
}

impl FlashLender {
    pub fn new(address: Address, fee_rate: U256) -> Result<Self, ProtocolError> {
        if fee_rate > WAD {
            return Err(ProtocolError::InvalidParameter {
                name: "flash_fee_rate",
                value: fee_rate,
            });
        }
        Ok(Self { address, fee_rate })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn fee_rate(&self) -> U256 {
        self.fee_rate
    }

    pub fn flash_fee(&self, amount: U256) -> Result<U256, ProtocolError> {
        w_mul_up(amount, self.fee_rate)
    }

    /// Lends `amounts` of `assets` to `recipient` and runs `handler`.
    /// Returns the fees charged.
    pub fn flash_loan(
        &self,
        state: &mut State,
        recipient: Address,
        handler: &mut dyn FlashLoanRecipient,
        assets: &[Address],
        amounts: &[U256],
        data: &[u8],
    ) -> Result<Vec<U256>, ProtocolError> {
        if assets.len() != amounts.len() {
            return Err(ProtocolError::InvalidParameter {
                name: "amounts",
                value: U256::from(amounts.len()),
            });
        }

        let mut before = Vec::with_capacity(assets.len());
        let mut fees = Vec::with_capacity(assets.len());
        for (asset, amount) in assets.iter().zip(amounts) {
            before.push(state.tokens().balance_of(*asset, self.address));
            fees.push(self.flash_fee(*amount)?);
            state
                .tokens_mut()
                .transfer(*asset, self.address, recipient, *amount)?;
            debug!(asset = %asset, recipient = %recipient, amount = %amount, "flash loan out");
        }

        handler.receive_flash_loan(state, self.address, assets, amounts, &fees, data)?;

        for ((asset, balance), fee) in assets.iter().zip(&before).zip(&fees) {
            let expected = try_add(*balance, *fee)?;
            let actual = state.tokens().balance_of(*asset, self.address);
            if actual < expected {
                return Err(ProtocolError::FlashLoanNotRepaid {
                    asset: *asset,
                    expected,
                    actual,
                });
            }
        }
        info!(lender = %self.address, recipient = %recipient, loans = assets.len(), "flash loan settled");
        Ok(fees)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auditor::Auditor;
    use crate::config::AuditorConfig;

    const LENDER: Address = Address::repeat_byte(0xf1);
    const ASSET: Address = Address::repeat_byte(0xa0);
    const RECIPIENT: Address = Address::repeat_byte(3);

    struct Repayer {
        extra: U256,
    }

    impl FlashLoanRecipient for Repayer {
        fn receive_flash_loan(
            &mut self,
            state: &mut State,
            lender: Address,
            assets: &[Address],
            amounts: &[U256],
            fees: &[U256],
            _data: &[u8],
        ) -> Result<(), ProtocolError> {
            for ((asset, amount), fee) in assets.iter().zip(amounts).zip(fees) {
                let owed = *amount + *fee;
                state
                    .tokens_mut()
                    .transfer(*asset, RECIPIENT, lender, owed.min(*amount + self.extra))?;
            }
            Ok(())
        }
    }

    fn create_test_state() -> State {
        let auditor = Auditor::new(Address::repeat_byte(0xff), AuditorConfig::default()).unwrap();
        let mut state = State::new(auditor, 1_000);
        state.tokens_mut().mint(ASSET, LENDER, U256::from(1_000)).unwrap();
        state.tokens_mut().mint(ASSET, RECIPIENT, U256::from(10)).unwrap();
        state
    }

    #[test]
    fn test_fee_rate_bounded() {
        assert!(FlashLender::new(LENDER, WAD + U256::from(1)).is_err());
    }

    #[test]
    fn test_flash_loan_repaid_with_fee() {
        let mut state = create_test_state();
        // 0.5%
        let lender = FlashLender::new(LENDER, WAD / U256::from(200)).unwrap();
        let mut repayer = Repayer { extra: U256::from(10) };
        let fees = lender
            .flash_loan(&mut state, RECIPIENT, &mut repayer, &[ASSET], &[U256::from(1_000)], &[])
            .unwrap();
        assert_eq!(fees, vec![U256::from(5)]);
        assert_eq!(state.tokens().balance_of(ASSET, LENDER), U256::from(1_005));
        assert_eq!(state.tokens().balance_of(ASSET, RECIPIENT), U256::from(5));
    }

    #[test]
    fn test_flash_loan_not_repaid() {
        let mut state = create_test_state();
        let lender = FlashLender::new(LENDER, WAD / U256::from(200)).unwrap();
        let mut repayer = Repayer { extra: U256::ZERO };
        let err = lender
            .flash_loan(&mut state, RECIPIENT, &mut repayer, &[ASSET], &[U256::from(1_000)], &[])
            .unwrap_err();
        assert!(matches!(err, ProtocolError::FlashLoanNotRepaid { .. }));
    }

    #[test]
    fn test_flash_loan_length_mismatch() {
        let mut state = create_test_state();
        let lender = FlashLender::new(LENDER, U256::ZERO).unwrap();
        let mut repayer = Repayer { extra: U256::ZERO };
        let err = lender
            .flash_loan(&mut state, RECIPIENT, &mut repayer, &[ASSET], &[], &[])
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidParameter { .. }));
    }
}
