use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::ActionKind;

/// What the caller knows about the instrument when asking for a decision.
/// Shared by every advisor queried for the request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DecisionContext {
    pub instrument_id: String,
    #[serde(default)]
    pub features: serde_json::Value,
    #[serde(default)]
    pub market_context: Option<serde_json::Value>,
    #[serde(default)]
    pub portfolio_context: Option<serde_json::Value>,
}

/// Request sent to one advisor (serialized as JSON for remote advisors).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdvisorRequest {
    pub request_id: Uuid,
    pub instrument_id: String,
    pub action_kind: ActionKind,
    /// The advisor's configured role (e.g., "technical", "fundamental", "risk").
    pub role: String,
    /// Instrument features the caller has on hand (price history, indicators, ...).
    pub features: serde_json::Value,
    pub market_context: Option<serde_json::Value>,
    pub portfolio_context: Option<serde_json::Value>,
}

/// Generic directional opinion, independent of the proposed action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdvisorAction {
    Buy,
    Sell,
    Hold,
}

/// Raw judgment returned by an advisor, before it is reinterpreted as a vote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdvisorJudgment {
    pub action: AdvisorAction,
    /// 0.0 to 1.0 confidence in `action`.
    pub confidence: Decimal,
    pub rationale: String,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    /// Optional 0.0 to 1.0 overall risk estimate.
    #[serde(default)]
    pub risk_score: Option<Decimal>,
}
