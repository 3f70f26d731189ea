use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;
use tribunal_models::{DecisionResult, VoteDecision};

/// Smoothing factor for the per-advisor agreement EMA.
pub const AGREEMENT_EMA_ALPHA: f64 = 0.1;
/// Smoothing factor for the processing latency EMA.
pub const LATENCY_EMA_ALPHA: f64 = 0.1;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActionKindCounts {
    pub total: u64,
    pub approved: u64,
}

/// Point-in-time copy of the running counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatisticsSnapshot {
    pub total_decisions: u64,
    pub approved_count: u64,
    pub rejected_count: u64,
    /// approved / total, or 0 before the first decision.
    pub approval_rate: f64,
    pub per_action_kind: BTreeMap<String, ActionKindCounts>,
    /// EMA of "this advisor's vote matched the majority vote", per advisor id.
    /// The majority is taken over approve and reject votes; abstentions and
    /// tied decisions do not move the average.
    pub advisor_agreement: BTreeMap<String, f64>,
    pub avg_processing_ms: f64,
}

/// Running decision counters. Written by the consensus aggregator only.
#[derive(Debug, Default)]
pub struct StatisticsTracker {
    inner: Mutex<StatisticsSnapshot>,
}

fn ema(previous: Option<f64>, sample: f64, alpha: f64) -> f64 {
    match previous {
        Some(prev) => alpha * sample + (1.0 - alpha) * prev,
        None => sample,
    }
}

/// Approve or Reject, whichever has strictly more votes.
fn majority_vote(result: &DecisionResult) -> Option<VoteDecision> {
    let approve = result
        .votes
        .values()
        .filter(|v| v.decision == VoteDecision::Approve)
        .count();
    let reject = result
        .votes
        .values()
        .filter(|v| v.decision == VoteDecision::Reject)
        .count();
    match approve.cmp(&reject) {
        std::cmp::Ordering::Greater => Some(VoteDecision::Approve),
        std::cmp::Ordering::Less => Some(VoteDecision::Reject),
        std::cmp::Ordering::Equal => None,
    }
}

impl StatisticsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, result: &DecisionResult) {
        let mut stats = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Statistics lock poisoned, recovering");
                poisoned.into_inner()
            }
        };

        stats.total_decisions += 1;
        if result.approved {
            stats.approved_count += 1;
        } else {
            stats.rejected_count += 1;
        }
        stats.approval_rate = stats.approved_count as f64 / stats.total_decisions as f64;

        let kind = stats
            .per_action_kind
            .entry(result.action_kind.as_str().to_string())
            .or_default();
        kind.total += 1;
        if result.approved {
            kind.approved += 1;
        }

        if let Some(majority) = majority_vote(result) {
            for (advisor_id, vote) in &result.votes {
                if vote.decision == VoteDecision::Abstain {
                    continue;
                }
                let sample = if vote.decision == majority { 1.0 } else { 0.0 };
                let previous = stats.advisor_agreement.get(advisor_id).copied();
                stats
                    .advisor_agreement
                    .insert(advisor_id.clone(), ema(previous, sample, AGREEMENT_EMA_ALPHA));
            }
        }

        let previous = (stats.total_decisions > 1).then_some(stats.avg_processing_ms);
        stats.avg_processing_ms = ema(
            previous,
            result.processing_time_ms as f64,
            LATENCY_EMA_ALPHA,
        );
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use tribunal_models::{ActionKind, ConsensusTier, Vote};
    use uuid::Uuid;

    fn vote(id: &str, decision: VoteDecision) -> Vote {
        Vote {
            advisor_id: id.to_string(),
            decision,
            confidence: Decimal::new(7, 1),
            rationale: String::new(),
            risk_score: None,
            timestamp: Utc::now(),
        }
    }

    fn result(kind: ActionKind, approved: bool, votes: Vec<Vote>, ms: u64) -> DecisionResult {
        DecisionResult {
            id: Uuid::new_v4(),
            schema_version: 1,
            instrument_id: "AAPL".to_string(),
            action_kind: kind,
            approved,
            votes: votes.into_iter().map(|v| (v.advisor_id.clone(), v)).collect(),
            approve_count: 0,
            reject_count: 0,
            abstain_count: 0,
            consensus_tier: ConsensusTier::None,
            avg_confidence: Decimal::ZERO,
            avg_risk_score: None,
            requirement: 1,
            decided_at: Utc::now(),
            processing_time_ms: ms,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn empty_snapshot() {
        let stats = StatisticsTracker::new().snapshot();
        assert_eq!(stats.total_decisions, 0);
        assert_eq!(stats.approval_rate, 0.0);
        assert!(stats.advisor_agreement.is_empty());
    }

    #[test]
    fn counts_and_rates() {
        let tracker = StatisticsTracker::new();
        tracker.record(&result(ActionKind::Entry, true, vec![], 100));
        tracker.record(&result(ActionKind::Entry, false, vec![], 100));
        tracker.record(&result(ActionKind::StopLoss, true, vec![], 100));
        tracker.record(&result(ActionKind::StopLoss, true, vec![], 100));

        let stats = tracker.snapshot();
        assert_eq!(stats.total_decisions, 4);
        assert_eq!(stats.approved_count, 3);
        assert_eq!(stats.rejected_count, 1);
        assert!((stats.approval_rate - 0.75).abs() < 1e-12);
        assert_eq!(
            stats.per_action_kind["entry"],
            ActionKindCounts { total: 2, approved: 1 }
        );
        assert_eq!(
            stats.per_action_kind["stop_loss"],
            ActionKindCounts { total: 2, approved: 2 }
        );
    }

    #[test]
    fn agreement_ema_seeds_then_smooths() {
        let tracker = StatisticsTracker::new();
        tracker.record(&result(
            ActionKind::Entry,
            true,
            vec![
                vote("a", VoteDecision::Approve),
                vote("b", VoteDecision::Reject),
                vote("c", VoteDecision::Abstain),
                vote("d", VoteDecision::Approve),
            ],
            10,
        ));
        let first = tracker.snapshot();
        assert_eq!(first.advisor_agreement["a"], 1.0);
        assert_eq!(first.advisor_agreement["b"], 0.0);
        assert!(!first.advisor_agreement.contains_key("c"));

        tracker.record(&result(
            ActionKind::Entry,
            false,
            vec![
                vote("a", VoteDecision::Approve),
                vote("b", VoteDecision::Reject),
                vote("d", VoteDecision::Reject),
            ],
            10,
        ));
        let second = tracker.snapshot();
        assert!((second.advisor_agreement["a"] - 0.9).abs() < 1e-12);
        assert!((second.advisor_agreement["b"] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn agreement_follows_majority_not_outcome() {
        // emergency exit approved by a lone approver against two rejections
        let tracker = StatisticsTracker::new();
        tracker.record(&result(
            ActionKind::EmergencyExit,
            true,
            vec![
                vote("technical", VoteDecision::Approve),
                vote("fundamental", VoteDecision::Reject),
                vote("risk", VoteDecision::Reject),
            ],
            10,
        ));
        let stats = tracker.snapshot();
        assert_eq!(stats.advisor_agreement["technical"], 0.0);
        assert_eq!(stats.advisor_agreement["fundamental"], 1.0);
        assert_eq!(stats.advisor_agreement["risk"], 1.0);
    }

    #[test]
    fn tied_votes_leave_agreement_untouched() {
        let tracker = StatisticsTracker::new();
        tracker.record(&result(
            ActionKind::Entry,
            false,
            vec![vote("a", VoteDecision::Approve), vote("b", VoteDecision::Reject)],
            10,
        ));
        assert!(tracker.snapshot().advisor_agreement.is_empty());
    }

    #[test]
    fn latency_ema() {
        let tracker = StatisticsTracker::new();
        tracker.record(&result(ActionKind::Exit, true, vec![], 200));
        assert_eq!(tracker.snapshot().avg_processing_ms, 200.0);
        tracker.record(&result(ActionKind::Exit, true, vec![], 100));
        assert!((tracker.snapshot().avg_processing_ms - 190.0).abs() < 1e-9);
    }
}
