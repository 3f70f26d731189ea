use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};
use tribunal_models::decision::DECISION_SCHEMA_VERSION;
use tribunal_models::{ActionKind, ConsensusTier, DecisionResult, Vote, VoteDecision};
use uuid::Uuid;

use crate::policy::VotingPolicy;
use crate::statistics::{StatisticsSnapshot, StatisticsTracker};

/// Tier for `approve_count` approvals out of `advisor_count` votes.
///
/// Unanimous when every vote approves, Strong from two thirds (rounded up),
/// Weak from a single approval. Zero approvals, or zero votes, is None.
pub fn consensus_tier(approve_count: u32, advisor_count: u32) -> ConsensusTier {
    if approve_count == 0 || advisor_count == 0 {
        ConsensusTier::None
    } else if approve_count >= advisor_count {
        ConsensusTier::Unanimous
    } else if 3 * approve_count >= 2 * advisor_count {
        ConsensusTier::Strong
    } else {
        ConsensusTier::Weak
    }
}

fn mean(values: impl Iterator<Item = Decimal>) -> Option<Decimal> {
    let (sum, count) = values.fold((Decimal::ZERO, 0u32), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / Decimal::from(count))
}

/// Tallies votes into decisions and keeps the recent-decision history.
pub struct ConsensusAggregator {
    policy: VotingPolicy,
    weights: BTreeMap<String, Decimal>,
    statistics: StatisticsTracker,
    history: Mutex<VecDeque<DecisionResult>>,
    capacity: usize,
}

impl ConsensusAggregator {
    pub fn new(policy: VotingPolicy, history_capacity: usize) -> Self {
        Self {
            policy,
            weights: BTreeMap::new(),
            statistics: StatisticsTracker::new(),
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            capacity: history_capacity,
        }
    }

    /// Per-advisor display weights for `weighted_confidence`. Missing ids weigh 1.
    pub fn with_weights(mut self, weights: BTreeMap<String, Decimal>) -> Self {
        self.weights = weights;
        self
    }

    pub fn policy(&self) -> &VotingPolicy {
        &self.policy
    }

    /// Build the decision for `votes` without touching history or statistics.
    pub fn tally(
        &self,
        instrument_id: &str,
        action_kind: &ActionKind,
        votes: BTreeMap<String, Vote>,
        elapsed: Duration,
    ) -> DecisionResult {
        let count = |d: VoteDecision| votes.values().filter(|v| v.decision == d).count() as u32;
        let approve_count = count(VoteDecision::Approve);
        let reject_count = count(VoteDecision::Reject);
        let abstain_count = count(VoteDecision::Abstain);
        let advisors_queried = votes.len() as u32;

        let requirement = self.policy.requirement(action_kind);
        let approved = approve_count >= requirement;

        let avg_confidence = mean(votes.values().map(|v| v.confidence)).unwrap_or(Decimal::ZERO);
        let avg_risk_score = mean(votes.values().filter_map(|v| v.risk_score));

        let (weighted_sum, weight_total) =
            votes
                .values()
                .fold((Decimal::ZERO, Decimal::ZERO), |(sum, total), vote| {
                    let weight = self
                        .weights
                        .get(&vote.advisor_id)
                        .copied()
                        .unwrap_or(Decimal::ONE);
                    (sum + weight * vote.confidence, total + weight)
                });
        let weighted_confidence = if weight_total > Decimal::ZERO {
            weighted_sum / weight_total
        } else {
            Decimal::ZERO
        };

        let abstained: Vec<&str> = votes
            .values()
            .filter(|v| v.decision == VoteDecision::Abstain)
            .map(|v| v.advisor_id.as_str())
            .collect();
        let metadata = serde_json::json!({
            "advisors_queried": advisors_queried,
            "weighted_confidence": weighted_confidence.round_dp(4),
            "abstained": abstained,
        });

        DecisionResult {
            id: Uuid::new_v4(),
            schema_version: DECISION_SCHEMA_VERSION,
            instrument_id: instrument_id.to_string(),
            action_kind: action_kind.clone(),
            approved,
            consensus_tier: consensus_tier(approve_count, advisors_queried),
            votes,
            approve_count,
            reject_count,
            abstain_count,
            avg_confidence,
            avg_risk_score,
            requirement,
            decided_at: Utc::now(),
            processing_time_ms: elapsed.as_millis() as u64,
            metadata,
        }
    }

    /// Tally `votes`, record the outcome in statistics, and append it to history.
    pub fn aggregate(
        &self,
        instrument_id: &str,
        action_kind: &ActionKind,
        votes: BTreeMap<String, Vote>,
        elapsed: Duration,
    ) -> DecisionResult {
        let result = self.tally(instrument_id, action_kind, votes, elapsed);

        info!(
            instrument = %result.instrument_id,
            action = %result.action_kind,
            approved = result.approved,
            approve = result.approve_count,
            reject = result.reject_count,
            abstain = result.abstain_count,
            requirement = result.requirement,
            tier = ?result.consensus_tier,
            "Consensus reached"
        );

        self.statistics.record(&result);

        if self.capacity > 0 {
            let mut history = self.history_guard();
            if history.len() >= self.capacity {
                history.pop_front();
            }
            history.push_back(result.clone());
        }

        result
    }

    /// Recent decisions, oldest first.
    pub fn history(&self) -> Vec<DecisionResult> {
        self.history_guard().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<DecisionResult> {
        self.history_guard().back().cloned()
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.snapshot()
    }

    fn history_guard(&self) -> MutexGuard<'_, VecDeque<DecisionResult>> {
        self.history.lock().unwrap_or_else(|poisoned| {
            warn!("Decision history lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
