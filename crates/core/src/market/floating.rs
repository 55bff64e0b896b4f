//! Floating deposits (ERC4626 shares) and floating borrows.

use alloy_primitives::{Address, U256};
use tracing::debug;

use super::{Context, Market};
use crate::error::ProtocolError;
use crate::events::Event;
use crate::hooks::OperationKind;
use crate::math::{assets_to_shares, shares_to_assets, try_add, try_sub, w_mul_down, RoundingDirection, WAD};

impl Market {
    pub fn convert_to_shares(&self, assets: U256, timestamp: u64) -> Result<U256, ProtocolError> {
        assets_to_shares(
            assets,
            self.total_assets(timestamp)?,
            self.total_supply,
            RoundingDirection::Down,
        )
    }

    pub fn convert_to_assets(&self, shares: U256, timestamp: u64) -> Result<U256, ProtocolError> {
        shares_to_assets(
            shares,
            self.total_assets(timestamp)?,
            self.total_supply,
            RoundingDirection::Down,
        )
    }

    pub fn preview_deposit(&self, assets: U256, timestamp: u64) -> Result<U256, ProtocolError> {
        self.convert_to_shares(assets, timestamp)
    }

    pub fn preview_mint(&self, shares: U256, timestamp: u64) -> Result<U256, ProtocolError> {
        shares_to_assets(
            shares,
            self.total_assets(timestamp)?,
            self.total_supply,
            RoundingDirection::Up,
        )
    }

    pub fn preview_withdraw(&self, assets: U256, timestamp: u64) -> Result<U256, ProtocolError> {
        assets_to_shares(
            assets,
            self.total_assets(timestamp)?,
            self.total_supply,
            RoundingDirection::Up,
        )
    }

    pub fn preview_redeem(&self, shares: U256, timestamp: u64) -> Result<U256, ProtocolError> {
        self.convert_to_assets(shares, timestamp)
    }

    /// Borrow shares minted for `assets`, rounded up
    pub fn preview_borrow(&self, assets: U256, timestamp: u64) -> Result<U256, ProtocolError> {
        assets_to_shares(
            assets,
            self.total_floating_borrow_assets(timestamp)?,
            self.total_floating_borrow_shares,
            RoundingDirection::Up,
        )
    }

    /// Borrow shares burnt by repaying `assets`, rounded down
    pub fn preview_repay(&self, assets: U256, timestamp: u64) -> Result<U256, ProtocolError> {
        assets_to_shares(
            assets,
            self.total_floating_borrow_assets(timestamp)?,
            self.total_floating_borrow_shares,
            RoundingDirection::Down,
        )
    }

    /// Assets owed for `shares` borrow shares, rounded up
    pub fn preview_refund(&self, shares: U256, timestamp: u64) -> Result<U256, ProtocolError> {
        shares_to_assets(
            shares,
            self.total_floating_borrow_assets(timestamp)?,
            self.total_floating_borrow_shares,
            RoundingDirection::Up,
        )
    }

    pub fn deposit(&mut self, ctx: Context, assets: U256, receiver: Address) -> Result<U256, ProtocolError> {
        if assets.is_zero() {
            return Err(ProtocolError::ZeroDeposit);
        }
        let shares = self.preview_deposit(assets, ctx.timestamp)?;
        if shares.is_zero() {
            return Err(ProtocolError::ZeroDeposit);
        }
        self.finish_deposit(ctx, assets, shares, receiver)?;
        Ok(shares)
    }

    /// Mints exactly `shares`. Returns the assets they cost.
    pub fn mint(&mut self, ctx: Context, shares: U256, receiver: Address) -> Result<U256, ProtocolError> {
        let assets = self.preview_mint(shares, ctx.timestamp)?;
        if assets.is_zero() || shares.is_zero() {
            return Err(ProtocolError::ZeroDeposit);
        }
        self.finish_deposit(ctx, assets, shares, receiver)?;
        Ok(assets)
    }

    fn finish_deposit(
        &mut self,
        ctx: Context,
        assets: U256,
        shares: U256,
        receiver: Address,
    ) -> Result<(), ProtocolError> {
        self.mint_shares(receiver, shares)?;
        self.after_deposit(assets, ctx.timestamp)?;
        self.notify(receiver, OperationKind::Deposit);
        self.emit(Event::Deposit {
            market: self.address,
            caller: ctx.caller,
            owner: receiver,
            assets,
            shares,
        });
        self.emit_market_update(ctx.timestamp);
        Ok(())
    }

    /// Withdraws exactly `assets`. Returns the shares burnt.
    pub fn withdraw(
        &mut self,
        ctx: Context,
        assets: U256,
        receiver: Address,
        owner: Address,
    ) -> Result<U256, ProtocolError> {
        if assets.is_zero() {
            return Err(ProtocolError::ZeroWithdraw);
        }
        let shares = self.preview_withdraw(assets, ctx.timestamp)?;
        self.spend_share_allowance(owner, ctx.caller, shares)?;
        self.finish_withdraw(ctx, assets, shares, receiver, owner)?;
        Ok(shares)
    }

    /// Redeems exactly `shares`. Returns the assets paid out.
    pub fn redeem(
        &mut self,
        ctx: Context,
        shares: U256,
        receiver: Address,
        owner: Address,
    ) -> Result<U256, ProtocolError> {
        self.spend_share_allowance(owner, ctx.caller, shares)?;
        let assets = self.preview_redeem(shares, ctx.timestamp)?;
        if assets.is_zero() {
            return Err(ProtocolError::ZeroWithdraw);
        }
        self.finish_withdraw(ctx, assets, shares, receiver, owner)?;
        Ok(assets)
    }

    fn finish_withdraw(
        &mut self,
        ctx: Context,
        assets: U256,
        shares: U256,
        receiver: Address,
        owner: Address,
    ) -> Result<(), ProtocolError> {
        self.before_withdraw(assets, ctx.timestamp)?;
        self.burn_shares(owner, shares)?;
        self.notify(owner, OperationKind::Deposit);
        self.emit(Event::Withdraw {
            market: self.address,
            caller: ctx.caller,
            receiver,
            owner,
            assets,
            shares,
        });
        self.emit_market_update(ctx.timestamp);
        Ok(())
    }

    /// Moves floating shares. The caller must check the sender's shortfall.
    pub fn transfer(&mut self, from: Address, to: Address, shares: U256) -> Result<(), ProtocolError> {
        self.burn_shares(from, shares)?;
        self.mint_shares(to, shares)?;
        self.notify(from, OperationKind::Deposit);
        self.notify(to, OperationKind::Deposit);
        self.emit(Event::Transfer {
            market: self.address,
            from,
            to,
            shares,
        });
        Ok(())
    }

    pub fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        shares: U256,
    ) -> Result<(), ProtocolError> {
        self.spend_share_allowance(from, spender, shares)?;
        self.transfer(from, to, shares)
    }

    /// Sets the share allowance of `spender` over `owner`. Also authorizes
    /// borrowing on the owner's behalf.
    pub fn approve(&mut self, owner: Address, spender: Address, shares: U256) {
        self.allowances.insert((owner, spender), shares);
    }

    /// Borrows at the floating rate. Returns the borrow shares minted.
    ///
    /// The ledger is updated before the auditor's liquidity check, which the
    /// caller runs afterwards.
    pub fn borrow(
        &mut self,
        ctx: Context,
        assets: U256,
        receiver: Address,
        borrower: Address,
    ) -> Result<U256, ProtocolError> {
        if assets.is_zero() {
            return Err(ProtocolError::ZeroBorrow);
        }
        self.spend_allowance(borrower, ctx.caller, assets, ctx.timestamp)?;

        let treasury_fee = self.update_floating_debt(ctx.timestamp)?;
        self.deposit_to_treasury(treasury_fee, ctx.timestamp)?;

        let shares = self.preview_borrow(assets, ctx.timestamp)?;
        let new_floating_debt = try_add(self.floating_debt, assets)?;
        let borrowable = w_mul_down(self.floating_assets, WAD - self.config.reserve_factor)?;
        if try_add(self.floating_backup_borrowed, new_floating_debt)? > borrowable {
            return Err(ProtocolError::InsufficientProtocolLiquidity {
                market: self.address,
            });
        }
        self.floating_debt = new_floating_debt;
        self.total_floating_borrow_shares = try_add(self.total_floating_borrow_shares, shares)?;
        let account = self.account_mut(borrower);
        account.floating_borrow_shares = try_add(account.floating_borrow_shares, shares)?;

        self.notify(borrower, OperationKind::Borrow);
        self.emit(Event::Borrow {
            market: self.address,
            caller: ctx.caller,
            receiver,
            borrower,
            assets,
            shares,
        });
        self.emit_market_update(ctx.timestamp);
        Ok(shares)
    }

    /// Repays `assets` of floating debt. Returns `(actual_assets, shares)`.
    pub fn repay(&mut self, ctx: Context, assets: U256, borrower: Address) -> Result<(U256, U256), ProtocolError> {
        let shares = self.preview_repay(assets, ctx.timestamp)?;
        let repaid = self.no_transfer_refund(ctx, shares, borrower)?;
        self.emit_market_update(ctx.timestamp);
        Ok(repaid)
    }

    /// Burns `shares` borrow shares. Returns `(assets, actual_shares)`.
    pub fn refund(&mut self, ctx: Context, shares: U256, borrower: Address) -> Result<(U256, U256), ProtocolError> {
        let refunded = self.no_transfer_refund(ctx, shares, borrower)?;
        self.emit_market_update(ctx.timestamp);
        Ok(refunded)
    }

    /// Burns up to `shares` of the borrower's borrow shares without moving
    /// tokens. Returns `(assets, actual_shares)`.
    pub(crate) fn no_transfer_refund(
        &mut self,
        ctx: Context,
        shares: U256,
        borrower: Address,
    ) -> Result<(U256, U256), ProtocolError> {
        let treasury_fee = self.update_floating_debt(ctx.timestamp)?;
        self.deposit_to_treasury(treasury_fee, ctx.timestamp)?;

        let account_shares = self
            .accounts
            .get(&borrower)
            .map(|a| a.floating_borrow_shares)
            .unwrap_or_default();
        let shares = shares.min(account_shares);
        let assets = self.preview_refund(shares, ctx.timestamp)?;
        if assets.is_zero() {
            return Err(ProtocolError::ZeroRepay);
        }

        self.reduce_floating_debt(assets);
        self.total_floating_borrow_shares = try_sub(self.total_floating_borrow_shares, shares)?;
        let account = self.account_mut(borrower);
        account.floating_borrow_shares = account_shares - shares;

        debug!(market = %self.address, borrower = %borrower, %assets, %shares, "floating debt repaid");
        self.notify(borrower, OperationKind::Borrow);
        self.emit(Event::Repay {
            market: self.address,
            caller: ctx.caller,
            borrower,
            assets,
            shares,
        });
        Ok((assets, shares))
    }
}
