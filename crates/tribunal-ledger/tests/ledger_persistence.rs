//! On-disk ledger tests: reload round-trips and cost-basis invariants.

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tribunal_ledger::{PositionLedger, SqliteStore};
use tribunal_models::position::{CloseReason, PositionStatus};

fn open_ledger(path: &str) -> PositionLedger {
    let store = SqliteStore::open(path).unwrap();
    PositionLedger::new(Box::new(store), 3).unwrap()
}

#[test]
fn reload_preserves_entries_status_and_totals() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let path = path.to_str().unwrap();

    let before = {
        let ledger = open_ledger(path);
        ledger
            .open("AAPL", "Apple Inc.", dec!(150), dec!(10000), "breakout entry")
            .unwrap();
        ledger
            .add_entry("AAPL", dec!(135), dec!(5000), "averaged at -10%")
            .unwrap();
        ledger
            .open("TSLA", "Tesla", dec!(250), dec!(3000), "momentum")
            .unwrap();
        ledger
            .close("TSLA", dec!(220), CloseReason::StopLoss)
            .unwrap();
        ledger
            .open("TSLA", "Tesla", dec!(200), dec!(1000), "re-entry")
            .unwrap();
        ledger.snapshot().unwrap()
    };

    let reloaded = open_ledger(path).snapshot().unwrap();
    assert_eq!(before, reloaded);

    let aapl = &reloaded.positions["AAPL"];
    assert_eq!(aapl.status, PositionStatus::Open);
    assert_eq!(aapl.entries.len(), 2);
    assert_eq!(aapl.entries[1].rationale, "averaged at -10%");
    assert_eq!(aapl.total_invested(), dec!(15000));
    assert_eq!(
        aapl.weighted_avg_cost(),
        before.positions["AAPL"].weighted_avg_cost()
    );

    assert_eq!(reloaded.archived.len(), 1);
    assert_eq!(reloaded.archived[0].status, PositionStatus::Stopped);
    assert!(reloaded.archived[0].closure.is_some());
}

#[test]
fn reloaded_ledger_keeps_enforcing_rules() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let path = path.to_str().unwrap();

    {
        let ledger = open_ledger(path);
        ledger.open("AMD", "AMD", dec!(100), dec!(1000), "").unwrap();
        for price in [dec!(90), dec!(85), dec!(80)] {
            ledger.add_entry("AMD", price, dec!(200), "").unwrap();
        }
    }

    let ledger = open_ledger(path);
    let err = ledger.add_entry("AMD", dec!(75), dec!(200), "").unwrap_err();
    assert_eq!(err.code(), "averaging_limit_reached");
    let err = ledger.open("AMD", "AMD", dec!(75), dec!(200), "").unwrap_err();
    assert_eq!(err.code(), "position_already_open");
}

fn arb_fill() -> impl Strategy<Value = (Decimal, Decimal)> {
    (100u32..100_000, 100u32..5_000_000)
        .prop_map(|(price_cents, amount_cents)| {
            (Decimal::new(price_cents as i64, 2), Decimal::new(amount_cents as i64, 2))
        })
}

proptest! {
    /// weighted_avg_cost * total_shares stays equal to total_invested for any add sequence.
    #[test]
    fn cost_basis_identity_holds(fills in prop::collection::vec(arb_fill(), 1..8)) {
        let store = SqliteStore::open_in_memory().unwrap();
        let ledger = PositionLedger::new(Box::new(store), 16).unwrap();

        let (price, amount) = fills[0];
        ledger.open("PROP", "Prop", price, amount, "").unwrap();
        for (price, amount) in &fills[1..] {
            ledger.add_entry("PROP", *price, *amount, "").unwrap();
        }

        let position = ledger.get("PROP").unwrap().unwrap();
        let expected_invested: Decimal = fills.iter().map(|(_, a)| *a).sum();
        prop_assert_eq!(position.total_invested(), expected_invested);

        let reconstructed = position.weighted_avg_cost() * position.total_shares();
        prop_assert!((reconstructed - expected_invested).abs() < dec!(0.000001));

        let shares: Decimal = position.entries.iter().map(|e| e.shares).sum();
        prop_assert_eq!(position.total_shares(), shares);

        let ordinals: Vec<u32> = position.entries.iter().map(|e| e.ordinal).collect();
        prop_assert_eq!(ordinals, (0..fills.len() as u32).collect::<Vec<_>>());
    }
}
