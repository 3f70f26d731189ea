use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Top-level configuration for Tribunal.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TribunalConfig {
    #[serde(default)]
    pub advisors: AdvisorsConfig,
    #[serde(default)]
    pub voting: VotingConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub averaging: AveragingConfig,
}

/// Configuration for the advisor fan-out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdvisorsConfig {
    /// Per-advisor call timeout in seconds.
    #[serde(default = "default_advisor_timeout")]
    pub per_advisor_timeout_seconds: u64,
    /// Upper bound for collecting every vote of one request.
    #[serde(default = "default_total_timeout")]
    pub total_timeout_seconds: u64,
    /// Default model for Claude-backed advisors.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Claude CLI executable, looked up on PATH unless absolute.
    #[serde(default = "default_claude_binary")]
    pub claude_binary: String,
    #[serde(default)]
    pub advisors: Vec<AdvisorConfig>,
}

impl Default for AdvisorsConfig {
    fn default() -> Self {
        Self {
            per_advisor_timeout_seconds: default_advisor_timeout(),
            total_timeout_seconds: default_total_timeout(),
            default_model: default_model(),
            claude_binary: default_claude_binary(),
            advisors: ["technical", "fundamental", "risk"]
                .into_iter()
                .map(|role| AdvisorConfig {
                    id: role.to_string(),
                    role: role.to_string(),
                    model: None,
                    weight: Decimal::ONE,
                    enabled: true,
                })
                .collect(),
        }
    }
}

/// Configuration for a single advisor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdvisorConfig {
    pub id: String,
    /// Selects the system prompt; passed to the advisor on every call.
    pub role: String,
    /// Override model for this advisor. Falls back to `AdvisorsConfig::default_model`.
    #[serde(default)]
    pub model: Option<String>,
    /// Display-only weight applied to `weighted_confidence`; never affects quorum.
    #[serde(default = "default_weight")]
    pub weight: Decimal,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Minimum approvals rule for an action kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuorumRule {
    /// One approval suffices.
    Any,
    /// More than half of the advisors.
    Majority,
    /// Every advisor.
    Unanimous,
    AtLeast(u32),
}

/// Per-kind quorum overrides on top of the built-in policy table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VotingConfig {
    /// Keyed by action kind (`entry`, `averaging_add`, ...).
    #[serde(default)]
    pub overrides: BTreeMap<String, QuorumRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsensusConfig {
    /// How many recent decisions the aggregator keeps in memory.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerConfig {
    /// Path to the SQLite ledger database.
    #[serde(default = "default_ledger_path")]
    pub sqlite_path: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_ledger_path(),
        }
    }
}

/// Thresholds for the local averaging-down gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AveragingConfig {
    /// Maximum averaging adds per position. Also caps ledger entry ordinals.
    #[serde(default = "default_max_averaging")]
    pub max_averaging_count: u32,
    /// Minimum drop below average cost (percent) before an add is considered.
    #[serde(default = "default_min_drop")]
    pub min_drop_percent: Decimal,
    /// Drops beyond this (percent) are treated as capitulation.
    #[serde(default = "default_max_loss")]
    pub max_loss_percent: Decimal,
    /// Fraction of invested capital per add, indexed by averaging count.
    #[serde(default = "default_fraction_schedule")]
    pub fraction_schedule: Vec<Decimal>,
    /// Fraction used once the schedule is exhausted.
    #[serde(default = "default_tail_fraction")]
    pub tail_fraction: Decimal,
    #[serde(default)]
    pub fundamentals: FundamentalsBands,
}

impl Default for AveragingConfig {
    fn default() -> Self {
        Self {
            max_averaging_count: default_max_averaging(),
            min_drop_percent: default_min_drop(),
            max_loss_percent: default_max_loss(),
            fraction_schedule: default_fraction_schedule(),
            tail_fraction: default_tail_fraction(),
            fundamentals: FundamentalsBands::default(),
        }
    }
}

/// Hard bands reject an add outright; soft bands only add risk factors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FundamentalsBands {
    pub sentiment_hard_floor: Decimal,
    pub sentiment_soft_floor: Decimal,
    pub supply_chain_hard_ceiling: Decimal,
    pub supply_chain_soft_ceiling: Decimal,
    pub policy_risk_hard_ceiling: Decimal,
    pub policy_risk_soft_ceiling: Decimal,
}

impl Default for FundamentalsBands {
    fn default() -> Self {
        Self {
            sentiment_hard_floor: Decimal::new(-5, 1),
            sentiment_soft_floor: Decimal::new(-2, 1),
            supply_chain_hard_ceiling: Decimal::new(7, 1),
            supply_chain_soft_ceiling: Decimal::new(5, 1),
            policy_risk_hard_ceiling: Decimal::from(60),
            policy_risk_soft_ceiling: Decimal::from(40),
        }
    }
}

fn default_advisor_timeout() -> u64 {
    30
}
fn default_total_timeout() -> u64 {
    90
}
fn default_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}
fn default_claude_binary() -> String {
    "claude".to_string()
}
fn default_weight() -> Decimal {
    Decimal::ONE
}
fn default_true() -> bool {
    true
}
fn default_history_capacity() -> usize {
    100
}
fn default_ledger_path() -> String {
    "data/tribunal_ledger.db".to_string()
}
fn default_max_averaging() -> u32 {
    3
}
fn default_min_drop() -> Decimal {
    Decimal::from(10)
}
fn default_max_loss() -> Decimal {
    Decimal::from(30)
}
fn default_fraction_schedule() -> Vec<Decimal> {
    vec![Decimal::new(50, 2), Decimal::new(33, 2), Decimal::new(25, 2)]
}
fn default_tail_fraction() -> Decimal {
    Decimal::new(20, 2)
}
