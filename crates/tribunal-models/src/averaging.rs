use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Externally supplied fundamentals scores for the averaging gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FundamentalsSnapshot {
    /// News/social sentiment, -1.0 (bearish) to 1.0 (bullish).
    pub sentiment: Decimal,
    /// 0.0 to 1.0.
    pub supply_chain_risk: Decimal,
    /// 0 to 100.
    pub policy_risk: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    Bull,
    Sideways,
    Bear,
    HighVolatility,
}

impl MarketRegime {
    /// Regimes in which adding to a loser is considered acceptable.
    pub fn favors_averaging(&self) -> bool {
        matches!(self, MarketRegime::Bull | MarketRegime::Sideways)
    }
}

/// Context the caller gathers before asking whether to average down.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AveragingContext {
    pub fundamentals: Option<FundamentalsSnapshot>,
    pub regime: Option<MarketRegime>,
}

/// Advisory outcome of the local averaging gate. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AveragingDecision {
    pub should_add: bool,
    pub rationale: String,
    /// Fraction of the capital already invested to commit on this add.
    pub recommended_fraction: Option<Decimal>,
    pub recommended_amount: Option<Decimal>,
    pub confidence: Option<Decimal>,
    pub risk_factors: Vec<String>,
}

impl AveragingDecision {
    pub fn reject(rationale: impl Into<String>, risk_factors: Vec<String>) -> Self {
        Self {
            should_add: false,
            rationale: rationale.into(),
            recommended_fraction: None,
            recommended_amount: None,
            confidence: None,
            risk_factors,
        }
    }
}
