//! End-to-end decision flow: gate, votes, consensus, ledger effect.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;
use tribunal::council::test_support::{ScriptedAdvisor, SlowAdvisor};
use tribunal::council::Advisor;
use tribunal::ledger::SqliteStore;
use tribunal::models::{
    ActionKind, AdvisorAction, AveragingContext, FundamentalsSnapshot, MarketRegime,
    PositionStatus, TribunalConfig,
};
use tribunal::{build_engine_with, DecisionEngine, DecisionRequest, EngineError, LedgerEffect};

fn scripted(id: &str, action: AdvisorAction, confidence: Decimal) -> Arc<dyn Advisor> {
    Arc::new(ScriptedAdvisor::new(id, action, confidence))
}

fn unanimous(action: AdvisorAction) -> Vec<Arc<dyn Advisor>> {
    ["technical", "fundamental", "risk"]
        .into_iter()
        .map(|id| scripted(id, action, dec!(0.8)))
        .collect()
}

fn engine(advisors: Vec<Arc<dyn Advisor>>) -> DecisionEngine {
    let store = SqliteStore::open_in_memory().unwrap();
    build_engine_with(&TribunalConfig::default(), advisors, Box::new(store)).unwrap()
}

fn request(instrument: &str, kind: ActionKind, price: Decimal) -> DecisionRequest {
    let mut request = DecisionRequest::new(instrument, kind);
    request.price = Some(price);
    request
}

fn pristine() -> AveragingContext {
    AveragingContext {
        fundamentals: Some(FundamentalsSnapshot {
            sentiment: dec!(0.3),
            supply_chain_risk: dec!(0.1),
            policy_risk: dec!(10),
        }),
        regime: Some(MarketRegime::Sideways),
    }
}

#[tokio::test]
async fn approved_entry_opens_a_position() {
    let engine = engine(unanimous(AdvisorAction::Buy));
    let mut req = request("AAPL", ActionKind::Entry, dec!(150));
    req.amount = Some(dec!(10000));
    req.instrument_name = Some("Apple Inc.".to_string());

    let outcome = engine.decide(&req, &CancellationToken::new()).await.unwrap();

    assert!(outcome.decision.approved);
    assert!(outcome.averaging.is_none());
    match &outcome.ledger_effect {
        LedgerEffect::Opened { position } => {
            assert_eq!(position.name, "Apple Inc.");
            assert_eq!(position.total_invested(), dec!(10000));
        }
        other => panic!("expected Opened, got {other:?}"),
    }
    assert!(engine.ledger().get("AAPL").unwrap().unwrap().is_open());
}

#[tokio::test]
async fn second_entry_is_refused_with_a_reason_code() {
    let engine = engine(unanimous(AdvisorAction::Buy));
    let mut req = request("AAPL", ActionKind::Entry, dec!(150));
    req.amount = Some(dec!(1000));

    engine.decide(&req, &CancellationToken::new()).await.unwrap();
    let outcome = engine.decide(&req, &CancellationToken::new()).await.unwrap();

    assert!(outcome.decision.approved);
    assert_eq!(
        outcome.ledger_effect,
        LedgerEffect::Rejected {
            code: "position_already_open".to_string(),
            reason: "Position already open: AAPL".to_string(),
        }
    );
}

#[tokio::test]
async fn approved_entry_without_amount_is_refused() {
    let engine = engine(unanimous(AdvisorAction::Buy));
    let outcome = engine
        .decide(&request("AAPL", ActionKind::Entry, dec!(150)), &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(
        outcome.ledger_effect,
        LedgerEffect::Rejected { ref code, .. } if code == "invalid_entry"
    ));
    assert!(engine.ledger().get("AAPL").unwrap().is_none());
}

#[tokio::test]
async fn averaging_gate_short_circuits_the_vote() {
    let tech = Arc::new(ScriptedAdvisor::new("technical", AdvisorAction::Buy, dec!(0.9)));
    let advisors: Vec<Arc<dyn Advisor>> = vec![tech.clone()];
    let engine = engine(advisors);
    engine
        .ledger()
        .open("NVDA", "Nvidia", dec!(100), dec!(10000), "")
        .unwrap();

    // -5% is not enough of a drop
    let mut req = request("NVDA", ActionKind::AveragingAdd, dec!(95));
    req.averaging_context = Some(pristine());
    let outcome = engine.decide(&req, &CancellationToken::new()).await.unwrap();

    assert!(!outcome.decision.approved);
    assert!(outcome.decision.votes.is_empty());
    assert_eq!(outcome.decision.metadata["gated"], true);
    assert!(!outcome.averaging.as_ref().unwrap().should_add);
    assert_eq!(outcome.ledger_effect, LedgerEffect::NotApplicable);
    assert_eq!(tech.calls(), 0);
    assert_eq!(engine.statistics().total_decisions, 0);
    assert!(engine.history().is_empty());
}

#[tokio::test]
async fn averaging_without_a_position_is_gated() {
    let engine = engine(unanimous(AdvisorAction::Buy));
    let outcome = engine
        .decide(
            &request("NVDA", ActionKind::AveragingAdd, dec!(80)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!outcome.decision.approved);
    assert_eq!(outcome.decision.metadata["gated"], true);
}

#[tokio::test]
async fn approved_averaging_adds_the_recommended_amount() {
    let engine = engine(unanimous(AdvisorAction::Buy));
    engine
        .ledger()
        .open("NVDA", "Nvidia", dec!(100), dec!(10000), "")
        .unwrap();

    let mut req = request("NVDA", ActionKind::AveragingAdd, dec!(80));
    req.averaging_context = Some(pristine());
    let outcome = engine.decide(&req, &CancellationToken::new()).await.unwrap();

    let gate = outcome.averaging.as_ref().unwrap();
    assert!(gate.should_add);
    assert_eq!(gate.recommended_amount, Some(dec!(5000)));
    assert!(outcome.decision.approved);
    assert_eq!(outcome.decision.requirement, 3);

    match &outcome.ledger_effect {
        LedgerEffect::Added { position } => {
            assert_eq!(position.entries.len(), 2);
            assert_eq!(position.entries[1].amount, dec!(5000));
            assert_eq!(position.entries[1].ordinal, 1);
            assert_eq!(position.total_invested(), dec!(15000));
        }
        other => panic!("expected Added, got {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_averaging_adds_apply_only_once() {
    let engine = engine(unanimous(AdvisorAction::Buy));
    engine
        .ledger()
        .open("NVDA", "Nvidia", dec!(100), dec!(1000), "")
        .unwrap();

    let mut req = request("NVDA", ActionKind::AveragingAdd, dec!(88));
    req.averaging_context = Some(pristine());
    let cancel = CancellationToken::new();
    let (first, second) = tokio::join!(engine.decide(&req, &cancel), engine.decide(&req, &cancel));
    let (first, second) = (first.unwrap(), second.unwrap());

    assert!(first.averaging.as_ref().unwrap().should_add);
    assert!(second.averaging.as_ref().unwrap().should_add);
    assert!(first.decision.approved && second.decision.approved);

    let effects = [&first.ledger_effect, &second.ledger_effect];
    let added = effects
        .iter()
        .filter(|e| matches!(e, LedgerEffect::Added { .. }))
        .count();
    let stale = effects
        .iter()
        .filter(|e| matches!(e, LedgerEffect::Rejected { code, .. } if code == "stale_gate"))
        .count();
    assert_eq!((added, stale), (1, 1), "effects: {effects:?}");

    let position = engine.ledger().get("NVDA").unwrap().unwrap();
    assert_eq!(position.entries.len(), 2);

    // A fresh request is gated against the position as it now stands.
    let outcome = engine.decide(&req, &cancel).await.unwrap();
    assert!(!outcome.averaging.as_ref().unwrap().should_add);
    assert_eq!(outcome.ledger_effect, LedgerEffect::NotApplicable);
}

#[tokio::test]
async fn averaging_needs_unanimity_even_after_the_gate() {
    let engine = engine(vec![
        scripted("technical", AdvisorAction::Buy, dec!(0.9)),
        scripted("fundamental", AdvisorAction::Buy, dec!(0.8)),
        scripted("risk", AdvisorAction::Hold, dec!(0.6)),
    ]);
    engine
        .ledger()
        .open("NVDA", "Nvidia", dec!(100), dec!(10000), "")
        .unwrap();

    let mut req = request("NVDA", ActionKind::AveragingAdd, dec!(80));
    req.averaging_context = Some(pristine());
    let outcome = engine.decide(&req, &CancellationToken::new()).await.unwrap();

    assert!(outcome.averaging.as_ref().unwrap().should_add);
    assert_eq!(outcome.decision.approve_count, 2);
    assert!(!outcome.decision.approved);
    assert_eq!(outcome.ledger_effect, LedgerEffect::NotApplicable);
    assert_eq!(engine.ledger().get("NVDA").unwrap().unwrap().entries.len(), 1);
}

#[tokio::test]
async fn single_approval_triggers_stop_loss() {
    let engine = engine(vec![
        scripted("technical", AdvisorAction::Sell, dec!(0.5)),
        scripted("fundamental", AdvisorAction::Buy, dec!(0.8)),
        scripted("risk", AdvisorAction::Hold, dec!(0.6)),
    ]);
    engine
        .ledger()
        .open("TSLA", "Tesla", dec!(200), dec!(2000), "")
        .unwrap();

    let outcome = engine
        .decide(
            &request("TSLA", ActionKind::from("stop-loss"), dec!(170)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.decision.approved);
    match outcome.ledger_effect {
        LedgerEffect::Closed { status, realized } => {
            assert_eq!(status, PositionStatus::Stopped);
            assert_eq!(realized.realized_pnl, dec!(-300));
            assert_eq!(realized.realized_pnl_percent, dec!(-15));
        }
        other => panic!("expected Closed, got {other:?}"),
    }
}

#[tokio::test]
async fn approved_exit_without_position_is_refused() {
    let engine = engine(unanimous(AdvisorAction::Sell));
    let outcome = engine
        .decide(&request("AMD", ActionKind::Exit, dec!(90)), &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.decision.approved);
    assert!(matches!(
        outcome.ledger_effect,
        LedgerEffect::Rejected { ref code, .. } if code == "position_not_open"
    ));
}

#[tokio::test]
async fn custom_kind_never_touches_the_ledger() {
    let engine = engine(unanimous(AdvisorAction::Buy));
    let outcome = engine
        .decide(
            &request("SPY", ActionKind::from("rebalance"), dec!(500)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.decision.approved);
    assert_eq!(outcome.ledger_effect, LedgerEffect::NotApplicable);
}

#[tokio::test]
async fn cancelled_request_records_nothing() {
    let engine = engine(vec![
        scripted("technical", AdvisorAction::Buy, dec!(0.9)),
        Arc::new(SlowAdvisor::new("risk", Duration::from_secs(30))),
    ]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let mut req = request("AAPL", ActionKind::Entry, dec!(150));
    req.amount = Some(dec!(1000));
    let err = engine.decide(&req, &cancel).await.unwrap_err();

    assert!(matches!(err, EngineError::Cancelled));
    assert_eq!(engine.statistics().total_decisions, 0);
    assert!(engine.history().is_empty());
    assert!(engine.ledger().get("AAPL").unwrap().is_none());
}

#[tokio::test]
async fn empty_council_dry_run_never_approves() {
    let engine = engine(vec![]);
    let outcome = engine
        .decide(
            &request("AAPL", ActionKind::EmergencyExit, dec!(100)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!outcome.decision.approved);
    assert_eq!(outcome.decision.abstain_count, 1);
    assert_eq!(outcome.ledger_effect, LedgerEffect::NotApplicable);
    assert_eq!(engine.statistics().total_decisions, 1);
}

#[tokio::test]
async fn ledger_context_is_offered_to_advisors_by_default() {
    let engine = engine(unanimous(AdvisorAction::Hold));
    engine
        .ledger()
        .open("AAPL", "Apple", dec!(100), dec!(1000), "")
        .unwrap();

    let outcome = engine
        .decide(&request("AAPL", ActionKind::Exit, dec!(90)), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!outcome.decision.approved);
    assert_eq!(outcome.decision.reject_count, 3);
}

#[tokio::test]
async fn configured_claude_binary_reaches_the_advisors() {
    let mut config = TribunalConfig::default();
    config.advisors.claude_binary = "/nonexistent/tribunal-claude".to_string();
    let advisors = tribunal::build_advisors(&config).unwrap();
    let store = SqliteStore::open_in_memory().unwrap();
    let engine = build_engine_with(&config, advisors, Box::new(store)).unwrap();

    let outcome = engine
        .decide(&request("AAPL", ActionKind::Entry, dec!(150)), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.decision.votes.len(), 3);
    assert_eq!(outcome.decision.abstain_count, 3);
    assert!(outcome
        .decision
        .votes
        .values()
        .all(|v| v.rationale.contains("/nonexistent/tribunal-claude")));
}

#[test]
fn duplicate_advisor_ids_are_a_config_error() {
    let store = SqliteStore::open_in_memory().unwrap();
    let advisors = vec![
        scripted("risk", AdvisorAction::Buy, dec!(0.8)),
        scripted("risk", AdvisorAction::Sell, dec!(0.8)),
    ];
    let result = build_engine_with(&TribunalConfig::default(), advisors, Box::new(store));
    assert!(matches!(result, Err(EngineError::Config(_))));
}

#[test]
fn build_engine_creates_the_ledger_directory() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = TribunalConfig::default();
    config.ledger.sqlite_path = dir
        .path()
        .join("nested/ledger.db")
        .to_string_lossy()
        .into_owned();

    let engine = tribunal::build_engine(&config).unwrap();
    assert_eq!(engine.collector().advisor_count(), 3);
    assert!(dir.path().join("nested/ledger.db").exists());
}

#[test]
fn unknown_role_is_a_config_error() {
    let mut config = TribunalConfig::default();
    config.advisors.advisors[0].role = "astrology".to_string();
    assert!(matches!(
        tribunal::build_advisors(&config),
        Err(EngineError::Config(_))
    ));
}

#[test]
fn request_json_accepts_hyphenated_kinds_and_numbers() {
    let json = r#"{
        "instrument_id": "NVDA",
        "action_kind": "averaging-add",
        "price": 118.5,
        "averaging_context": {
            "fundamentals": {"sentiment": "0.2", "supply_chain_risk": 0.3, "policy_risk": 20},
            "regime": "bear"
        }
    }"#;
    let req: DecisionRequest = serde_json::from_str(json).unwrap();
    assert_eq!(req.action_kind, ActionKind::AveragingAdd);
    assert_eq!(req.price, Some(dec!(118.5)));
    assert_eq!(
        req.averaging_context.unwrap().regime,
        Some(MarketRegime::Bear)
    );
    assert!(req.features.is_null());
}
