//! Cross-market liquidation and bad debt scenarios.

mod helpers;

use alloy_primitives::U256;
use exactly_rs_core::{Event, MarketConfig, ProtocolError};
use helpers::{
    create_test_fixture, wad, Fixture, ALICE, BOB, CAROL, DAI, DAI_MARKET, WETH, WETH_MARKET,
};

/// Alice lends 10k DAI; Bob borrows 1200 DAI against 1 WETH at 2000
fn create_test_borrower() -> Fixture {
    let mut fx = create_test_fixture(MarketConfig::default());
    fx.protocol.deposit(ALICE, DAI_MARKET, wad(10_000), ALICE).unwrap();
    fx.protocol.deposit(BOB, WETH_MARKET, wad(1), BOB).unwrap();
    fx.protocol.enter_market(BOB, WETH_MARKET).unwrap();
    fx.protocol.borrow(BOB, DAI_MARKET, wad(1_200), BOB, BOB).unwrap();
    fx.protocol.take_events();
    fx
}

#[test]
fn test_healthy_account_cannot_be_liquidated() {
    let mut fx = create_test_borrower();
    let err = fx
        .protocol
        .liquidate(CAROL, DAI_MARKET, BOB, wad(100), WETH_MARKET)
        .unwrap_err();
    assert!(matches!(err, ProtocolError::InsufficientShortfall { .. }));
}

#[test]
fn test_liquidation_improves_health() {
    let mut fx = create_test_borrower();
    fx.skip(0, 1_500);

    let (collateral_before, debt_before) = fx.protocol.state().account_liquidity(BOB).unwrap();
    assert!(collateral_before < debt_before);

    let max_assets = wad(300);
    let repaid = fx
        .protocol
        .liquidate(CAROL, DAI_MARKET, BOB, max_assets, WETH_MARKET)
        .unwrap();
    assert!(repaid > U256::ZERO);
    assert!(repaid <= max_assets);

    let (collateral_after, debt_after) = fx.protocol.state().account_liquidity(BOB).unwrap();
    // debt / collateral strictly decreases
    assert!(debt_after * collateral_before < debt_before * collateral_after);

    // the liquidator paid the repayment plus the lenders' cut and got WETH
    let tokens = fx.protocol.state().tokens();
    let lenders = repaid / U256::from(100);
    assert_eq!(tokens.balance_of(DAI, CAROL), wad(10_000) - repaid - lenders);
    assert!(tokens.balance_of(WETH, CAROL) > wad(10_000));
    assert_eq!(
        fx.protocol.market(DAI_MARKET).unwrap().earnings_accumulator(),
        lenders
    );

    let events = fx.protocol.take_events();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::Liquidate { borrower, seize_market, .. } if *borrower == BOB && *seize_market == WETH_MARKET
    )));
    assert!(events.iter().any(|e| matches!(e, Event::Seize { .. })));
}

#[test]
fn test_liquidation_respects_liquidator_cap() {
    let mut fx = create_test_borrower();
    fx.skip(0, 1_500);
    let repaid = fx
        .protocol
        .liquidate(CAROL, DAI_MARKET, BOB, wad(101), WETH_MARKET)
        .unwrap();
    // the lenders' cut comes out of the liquidator's budget
    assert!(repaid <= wad(100));
}

#[test]
fn test_unbacked_debt_is_written_off() {
    let mut fx = create_test_borrower();
    fx.skip(0, 1_310);

    let repaid = fx
        .protocol
        .liquidate(CAROL, DAI_MARKET, BOB, U256::MAX, WETH_MARKET)
        .unwrap();
    assert!(repaid < wad(1_200));

    let now = fx.protocol.timestamp();
    let dai = fx.protocol.market(DAI_MARKET).unwrap();
    let weth = fx.protocol.market(WETH_MARKET).unwrap();
    assert_eq!(weth.balance_of(BOB), U256::ZERO);
    assert_eq!(dai.preview_debt(BOB, now).unwrap(), U256::ZERO);
    assert_eq!(dai.floating_debt(), U256::ZERO);

    let events = fx.protocol.take_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::SpreadBadDebt { market, .. } if *market == DAI_MARKET)));
}

#[test]
fn test_accumulator_covers_part_of_floating_bad_debt() {
    let mut fx = create_test_borrower();
    fx.skip(0, 900);

    let repaid = fx
        .protocol
        .liquidate(CAROL, DAI_MARKET, BOB, U256::MAX, WETH_MARKET)
        .unwrap();
    let lenders = repaid / U256::from(100);
    let unbacked = wad(1_200) - repaid;
    assert!(lenders < unbacked);

    let now = fx.protocol.timestamp();
    let dai = fx.protocol.market(DAI_MARKET).unwrap();
    assert_eq!(fx.protocol.market(WETH_MARKET).unwrap().balance_of(BOB), U256::ZERO);
    // the whole lenders' cut went into writing off debt
    assert!(dai.earnings_accumulator() <= U256::from(1));
    let debt = dai.preview_debt(BOB, now).unwrap();
    let expected = unbacked - lenders;
    let diff = if debt > expected { debt - expected } else { expected - debt };
    assert!(diff <= U256::from(1));

    let events = fx.protocol.take_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::SpreadBadDebt { borrower, .. } if *borrower == BOB)));
}

#[test]
fn test_liquidation_needs_entered_repay_market() {
    let mut fx = create_test_borrower();
    fx.skip(0, 1_500);
    // Bob owes nothing in WETH
    let err = fx
        .protocol
        .liquidate(CAROL, WETH_MARKET, BOB, wad(1), WETH_MARKET)
        .unwrap_err();
    assert!(matches!(err, ProtocolError::ZeroRepay));
}
