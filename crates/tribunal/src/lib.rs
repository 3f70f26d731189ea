//! Tribunal - multi-advisor consensus decisions over a position ledger.
//!
//! Advisors vote on a proposed action (entry, exit, stop-loss, averaging
//! add, ...), votes are tallied under per-action quorum rules, and approved
//! actions are applied to a durable cost-basis ledger. Averaging adds are
//! screened by a local gate before any advisor is asked.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use tribunal::{build_engine, DecisionRequest};
//! use tribunal::models::{ActionKind, TribunalConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), tribunal::EngineError> {
//! let engine = build_engine(&TribunalConfig::default())?;
//! let mut request = DecisionRequest::new("AAPL", ActionKind::StopLoss);
//! request.price = Some(rust_decimal::Decimal::new(14210, 2));
//! let outcome = engine.decide(&request, &CancellationToken::new()).await?;
//! println!("approved: {}", outcome.decision.approved);
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;

pub use tribunal_council as council;
pub use tribunal_ledger as ledger;
pub use tribunal_models as models;

pub use engine::{DecisionEngine, DecisionOutcome, DecisionRequest, LedgerEffect};
pub use error::EngineError;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tribunal_council::prompts::get_advisor_prompt;
use tribunal_council::{
    Advisor, ClaudeAdvisor, CollectTimeouts, ConsensusAggregator, VoteCollector, VotingPolicy,
};
use tribunal_ledger::{AveragingStrategy, LedgerStore, PositionLedger, SqliteStore};
use tribunal_models::TribunalConfig;

/// Claude-backed advisors for every enabled entry in the config.
pub fn build_advisors(config: &TribunalConfig) -> Result<Vec<Arc<dyn Advisor>>, EngineError> {
    let timeout = Duration::from_secs(config.advisors.per_advisor_timeout_seconds);
    let mut seen = BTreeSet::new();
    let mut advisors: Vec<Arc<dyn Advisor>> = Vec::new();

    for advisor in config.advisors.advisors.iter().filter(|a| a.enabled) {
        if !seen.insert(advisor.id.as_str()) {
            return Err(EngineError::Config(format!(
                "duplicate advisor id: {}",
                advisor.id
            )));
        }
        if get_advisor_prompt(&advisor.role).is_none() {
            return Err(EngineError::Config(format!(
                "advisor {} has unknown role: {}",
                advisor.id, advisor.role
            )));
        }
        let model = advisor
            .model
            .clone()
            .unwrap_or_else(|| config.advisors.default_model.clone());
        advisors.push(Arc::new(
            ClaudeAdvisor::new(advisor.id.clone(), advisor.role.clone(), model, timeout)
                .with_binary(config.advisors.claude_binary.clone()),
        ));
    }

    Ok(advisors)
}

/// Open the SQLite ledger named in the config, creating its directory if needed.
pub fn open_ledger_store(config: &TribunalConfig) -> Result<SqliteStore, EngineError> {
    let path = &config.ledger.sqlite_path;
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(SqliteStore::open(path)?)
}

/// Build a DecisionEngine from configuration, with Claude-backed advisors
/// and the configured SQLite ledger.
pub fn build_engine(config: &TribunalConfig) -> Result<DecisionEngine, EngineError> {
    let advisors = build_advisors(config)?;
    let store = open_ledger_store(config)?;
    build_engine_with(config, advisors, Box::new(store))
}

/// Build a DecisionEngine from explicit advisors and ledger storage.
pub fn build_engine_with(
    config: &TribunalConfig,
    advisors: Vec<Arc<dyn Advisor>>,
    store: Box<dyn LedgerStore>,
) -> Result<DecisionEngine, EngineError> {
    let mut seen = BTreeSet::new();
    if let Some(dup) = advisors.iter().find(|a| !seen.insert(a.id().to_string())) {
        return Err(EngineError::Config(format!(
            "duplicate advisor id: {}",
            dup.id()
        )));
    }

    let weights: BTreeMap<String, _> = config
        .advisors
        .advisors
        .iter()
        .map(|a| (a.id.clone(), a.weight))
        .collect();

    let policy =
        VotingPolicy::with_overrides(advisors.len() as u32, config.voting.overrides.clone());
    let aggregator = ConsensusAggregator::new(policy, config.consensus.history_capacity)
        .with_weights(weights);

    let collector = VoteCollector::new(
        advisors,
        CollectTimeouts {
            per_advisor: Duration::from_secs(config.advisors.per_advisor_timeout_seconds),
            total: Duration::from_secs(config.advisors.total_timeout_seconds),
        },
    );

    let ledger = PositionLedger::new(store, config.averaging.max_averaging_count)?;
    let averaging = AveragingStrategy::new(config.averaging.clone());

    Ok(DecisionEngine::new(
        collector,
        aggregator,
        Arc::new(ledger),
        averaging,
    ))
}
