use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::ActionKind;

pub const DECISION_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VoteDecision {
    Approve,
    Reject,
    Abstain,
}

/// One advisor's normalized vote on one request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vote {
    pub advisor_id: String,
    pub decision: VoteDecision,
    /// 0.0 to 1.0. Always zero for an abstention caused by a failure.
    pub confidence: Decimal,
    pub rationale: String,
    pub risk_score: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl Vote {
    /// The vote recorded when an advisor could not produce a usable judgment.
    pub fn abstain(advisor_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            advisor_id: advisor_id.into(),
            decision: VoteDecision::Abstain,
            confidence: Decimal::ZERO,
            rationale: reason.into(),
            risk_score: None,
            timestamp: Utc::now(),
        }
    }
}

/// Coarse bucket describing how broad the approval was.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusTier {
    None,
    Weak,
    Strong,
    Unanimous,
}

/// The tallied outcome of one decision request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionResult {
    pub id: Uuid,
    pub schema_version: u32,
    pub instrument_id: String,
    pub action_kind: ActionKind,
    pub approved: bool,
    /// Keyed by advisor id; ordered so serialized output is stable.
    pub votes: BTreeMap<String, Vote>,
    pub approve_count: u32,
    pub reject_count: u32,
    pub abstain_count: u32,
    pub consensus_tier: ConsensusTier,
    pub avg_confidence: Decimal,
    pub avg_risk_score: Option<Decimal>,
    /// Approvals the voting policy required for `action_kind`.
    pub requirement: u32,
    pub decided_at: DateTime<Utc>,
    pub processing_time_ms: u64,
    pub metadata: serde_json::Value,
}

impl DecisionResult {
    pub fn advisors_queried(&self) -> u32 {
        self.votes.len() as u32
    }
}
