use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tribunal_models::{
    ActionKind, AdvisorAction, AdvisorJudgment, AdvisorRequest, DecisionContext, Vote,
    VoteDecision,
};
use uuid::Uuid;

use crate::advisor::Advisor;
use crate::error::{AdvisorError, CouncilError};
use crate::parser::validate_judgment;

/// Identity of the synthetic vote produced when no advisors are configured.
pub const DRY_RUN_ADVISOR_ID: &str = "dry_run";

/// Minimum confidence for an approving vote on most action kinds.
const APPROVE_CONFIDENCE: Decimal = Decimal::from_parts(6, 0, 0, false, 1);
/// Averaging adds need a stronger buy.
const AVERAGING_CONFIDENCE: Decimal = Decimal::from_parts(7, 0, 0, false, 1);
/// A defensive exit is approved once an advisor flags this many risks.
const EXIT_RISK_FACTOR_TRIGGER: usize = 2;
/// An averaging add is rejected once an advisor flags more risks than this.
const AVERAGING_MAX_RISK_FACTORS: usize = 1;

/// Time limits for one collection round.
#[derive(Debug, Clone, Copy)]
pub struct CollectTimeouts {
    pub per_advisor: Duration,
    pub total: Duration,
}

impl Default for CollectTimeouts {
    fn default() -> Self {
        Self {
            per_advisor: Duration::from_secs(30),
            total: Duration::from_secs(90),
        }
    }
}

/// Fans a request out to every advisor and gathers one vote per advisor.
///
/// Advisor ids must be unique; votes are keyed by id.
pub struct VoteCollector {
    advisors: Vec<Arc<dyn Advisor>>,
    timeouts: CollectTimeouts,
}

impl VoteCollector {
    pub fn new(advisors: Vec<Arc<dyn Advisor>>, timeouts: CollectTimeouts) -> Self {
        Self { advisors, timeouts }
    }

    pub fn advisor_count(&self) -> usize {
        self.advisors.len()
    }

    pub fn advisor_ids(&self) -> Vec<String> {
        self.advisors.iter().map(|a| a.id().to_string()).collect()
    }

    pub fn timeouts(&self) -> CollectTimeouts {
        self.timeouts
    }

    /// Query every advisor concurrently and return their normalized votes.
    ///
    /// Each advisor call is bounded by the per-advisor timeout and the whole
    /// round by the total timeout; any failure becomes an abstention, so the
    /// map always holds one entry per advisor. If `cancel` fires first, all
    /// in-flight calls are aborted and `CouncilError::Cancelled` is returned.
    pub async fn collect(
        &self,
        context: &DecisionContext,
        action_kind: &ActionKind,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, Vote>, CouncilError> {
        if cancel.is_cancelled() {
            return Err(CouncilError::Cancelled);
        }

        if self.advisors.is_empty() {
            info!(instrument = %context.instrument_id, action = %action_kind, "No advisors configured, dry run");
            return Ok(dry_run_votes());
        }

        let start = Instant::now();
        let request_id = Uuid::new_v4();
        let per_advisor = self.timeouts.per_advisor;

        let mut pending = Vec::with_capacity(self.advisors.len());
        for advisor in &self.advisors {
            let advisor = Arc::clone(advisor);
            let request = AdvisorRequest {
                request_id,
                instrument_id: context.instrument_id.clone(),
                action_kind: action_kind.clone(),
                role: advisor.role().to_string(),
                features: context.features.clone(),
                market_context: context.market_context.clone(),
                portfolio_context: context.portfolio_context.clone(),
            };

            let id = advisor.id().to_string();
            let handle = tokio::spawn(async move {
                let call_start = Instant::now();
                let result = tokio::time::timeout(per_advisor, advisor.analyze(&request))
                    .await
                    .unwrap_or(Err(AdvisorError::Timeout(per_advisor.as_secs())));
                (result, call_start.elapsed())
            });
            pending.push((id, handle));
        }

        let aborts: Vec<_> = pending.iter().map(|(_, h)| h.abort_handle()).collect();
        let deadline = tokio::time::Instant::now() + self.timeouts.total;

        let gather = async {
            let mut votes = BTreeMap::new();
            for (id, mut handle) in pending {
                let vote = match tokio::time::timeout_at(deadline, &mut handle).await {
                    Ok(Ok((Ok(judgment), elapsed))) => {
                        let vote = normalize(&id, action_kind, &judgment);
                        info!(
                            advisor = %id,
                            action = ?judgment.action,
                            vote = ?vote.decision,
                            confidence = %vote.confidence,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "Advisor voted"
                        );
                        vote
                    }
                    Ok(Ok((Err(e), elapsed))) => {
                        warn!(advisor = %id, error = %e, elapsed_ms = elapsed.as_millis() as u64, "Advisor failed, abstaining");
                        Vote::abstain(&id, format!("advisor failed: {e}"))
                    }
                    Ok(Err(e)) => {
                        error!(advisor = %id, error = %e, "Advisor task panicked, abstaining");
                        Vote::abstain(&id, format!("advisor task failed: {e}"))
                    }
                    Err(_) => {
                        handle.abort();
                        warn!(advisor = %id, total_timeout_s = self.timeouts.total.as_secs(), "Advisor missed the overall deadline, abstaining");
                        Vote::abstain(&id, "no vote before the overall deadline")
                    }
                };
                votes.insert(id, vote);
            }
            votes
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                for abort in &aborts {
                    abort.abort();
                }
                info!(
                    instrument = %context.instrument_id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Decision request cancelled, advisor calls aborted"
                );
                Err(CouncilError::Cancelled)
            }
            votes = gather => Ok(votes),
        }
    }
}

/// The single abstention returned when the council is empty.
pub fn dry_run_votes() -> BTreeMap<String, Vote> {
    BTreeMap::from([(
        DRY_RUN_ADVISOR_ID.to_string(),
        Vote::abstain(DRY_RUN_ADVISOR_ID, "dry run: no advisors configured"),
    )])
}

/// Reinterpret an advisor's generic view as a vote on `action_kind`.
///
/// | kind                          | approve when                                   |
/// |-------------------------------|------------------------------------------------|
/// | stop_loss, emergency_exit     | sell, or at least two risk factors             |
/// | averaging_add                 | buy, confidence >= 0.7, at most one risk factor|
/// | entry                         | buy, confidence >= 0.6                         |
/// | exit, take_profit             | sell, confidence >= 0.6                        |
/// | other                         | confidence >= 0.6                              |
///
/// Anything else rejects. An out-of-range judgment abstains.
pub fn normalize(advisor_id: &str, action_kind: &ActionKind, judgment: &AdvisorJudgment) -> Vote {
    if let Err(e) = validate_judgment(judgment) {
        warn!(advisor = %advisor_id, error = %e, "Discarding malformed judgment");
        return Vote::abstain(advisor_id, format!("malformed judgment: {e}"));
    }

    let action = judgment.action;
    let confidence = judgment.confidence;
    let risks = judgment.risk_factors.len();

    let approve = match action_kind {
        ActionKind::StopLoss | ActionKind::EmergencyExit => {
            action == AdvisorAction::Sell || risks >= EXIT_RISK_FACTOR_TRIGGER
        }
        ActionKind::AveragingAdd => {
            action == AdvisorAction::Buy
                && confidence >= AVERAGING_CONFIDENCE
                && risks <= AVERAGING_MAX_RISK_FACTORS
        }
        ActionKind::Entry => action == AdvisorAction::Buy && confidence >= APPROVE_CONFIDENCE,
        ActionKind::Exit | ActionKind::TakeProfit => {
            action == AdvisorAction::Sell && confidence >= APPROVE_CONFIDENCE
        }
        ActionKind::Other(_) => confidence >= APPROVE_CONFIDENCE,
    };

    Vote {
        advisor_id: advisor_id.to_string(),
        decision: if approve {
            VoteDecision::Approve
        } else {
            VoteDecision::Reject
        },
        confidence,
        rationale: judgment.rationale.clone(),
        risk_score: judgment.risk_score,
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        FailingAdvisor, PanickingAdvisor, ScriptedAdvisor, SlowAdvisor,
    };
    use rust_decimal_macros::dec;

    fn judgment(action: AdvisorAction, confidence: Decimal, risks: usize) -> AdvisorJudgment {
        AdvisorJudgment {
            action,
            confidence,
            rationale: "test".to_string(),
            risk_factors: (0..risks).map(|i| format!("risk {i}")).collect(),
            risk_score: None,
        }
    }

    fn decision(kind: ActionKind, j: AdvisorJudgment) -> VoteDecision {
        normalize("a", &kind, &j).decision
    }

    fn context() -> DecisionContext {
        DecisionContext {
            instrument_id: "AAPL".to_string(),
            features: serde_json::json!({"rsi_14": 45.0}),
            ..DecisionContext::default()
        }
    }

    fn timeouts(per_ms: u64, total_ms: u64) -> CollectTimeouts {
        CollectTimeouts {
            per_advisor: Duration::from_millis(per_ms),
            total: Duration::from_millis(total_ms),
        }
    }

    #[test]
    fn defensive_exit_mapping() {
        use AdvisorAction::*;
        for kind in [ActionKind::StopLoss, ActionKind::EmergencyExit] {
            assert_eq!(decision(kind.clone(), judgment(Sell, dec!(0.1), 0)), VoteDecision::Approve);
            assert_eq!(decision(kind.clone(), judgment(Hold, dec!(0.9), 2)), VoteDecision::Approve);
            assert_eq!(decision(kind.clone(), judgment(Buy, dec!(0.9), 1)), VoteDecision::Reject);
        }
    }

    #[test]
    fn averaging_add_mapping() {
        use AdvisorAction::*;
        let kind = ActionKind::AveragingAdd;
        assert_eq!(decision(kind.clone(), judgment(Buy, dec!(0.7), 1)), VoteDecision::Approve);
        assert_eq!(decision(kind.clone(), judgment(Buy, dec!(0.69), 0)), VoteDecision::Reject);
        assert_eq!(decision(kind.clone(), judgment(Buy, dec!(0.9), 2)), VoteDecision::Reject);
        assert_eq!(decision(kind, judgment(Hold, dec!(0.9), 0)), VoteDecision::Reject);
    }

    #[test]
    fn entry_and_exit_mapping() {
        use AdvisorAction::*;
        assert_eq!(decision(ActionKind::Entry, judgment(Buy, dec!(0.6), 3)), VoteDecision::Approve);
        assert_eq!(decision(ActionKind::Entry, judgment(Buy, dec!(0.59), 0)), VoteDecision::Reject);
        assert_eq!(decision(ActionKind::Entry, judgment(Sell, dec!(0.9), 0)), VoteDecision::Reject);
        assert_eq!(decision(ActionKind::Exit, judgment(Sell, dec!(0.6), 0)), VoteDecision::Approve);
        assert_eq!(decision(ActionKind::TakeProfit, judgment(Sell, dec!(0.8), 0)), VoteDecision::Approve);
        assert_eq!(decision(ActionKind::TakeProfit, judgment(Hold, dec!(0.8), 0)), VoteDecision::Reject);
    }

    #[test]
    fn other_kind_approves_on_confidence_alone() {
        use AdvisorAction::*;
        let kind = ActionKind::Other("rebalance".to_string());
        assert_eq!(decision(kind.clone(), judgment(Buy, dec!(0.6), 0)), VoteDecision::Approve);
        assert_eq!(decision(kind.clone(), judgment(Sell, dec!(0.6), 0)), VoteDecision::Approve);
        assert_eq!(decision(kind.clone(), judgment(Hold, dec!(0.9), 0)), VoteDecision::Approve);
        assert_eq!(decision(kind, judgment(Buy, dec!(0.59), 0)), VoteDecision::Reject);
    }

    #[test]
    fn out_of_range_judgment_abstains() {
        let vote = normalize("a", &ActionKind::Entry, &judgment(AdvisorAction::Buy, dec!(1.2), 0));
        assert_eq!(vote.decision, VoteDecision::Abstain);
        assert_eq!(vote.confidence, Decimal::ZERO);
        assert!(vote.rationale.starts_with("malformed judgment"));
    }

    #[test]
    fn normalized_vote_keeps_confidence_and_risk() {
        let mut j = judgment(AdvisorAction::Buy, dec!(0.8), 0);
        j.risk_score = Some(dec!(0.3));
        let vote = normalize("tech", &ActionKind::Entry, &j);
        assert_eq!(vote.advisor_id, "tech");
        assert_eq!(vote.confidence, dec!(0.8));
        assert_eq!(vote.risk_score, Some(dec!(0.3)));
    }

    #[tokio::test]
    async fn empty_council_is_a_dry_run() {
        let collector = VoteCollector::new(vec![], CollectTimeouts::default());
        let votes = collector
            .collect(&context(), &ActionKind::Entry, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[DRY_RUN_ADVISOR_ID].decision, VoteDecision::Abstain);
    }

    #[tokio::test]
    async fn one_vote_per_advisor_with_failures_abstaining() {
        let advisors: Vec<Arc<dyn Advisor>> = vec![
            Arc::new(ScriptedAdvisor::new("tech", AdvisorAction::Buy, dec!(0.8))),
            Arc::new(FailingAdvisor::new("fund")),
            Arc::new(PanickingAdvisor::new("risk")),
        ];
        let collector = VoteCollector::new(advisors, timeouts(500, 2_000));
        let votes = collector
            .collect(&context(), &ActionKind::Entry, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(votes.len(), 3);
        assert_eq!(votes["tech"].decision, VoteDecision::Approve);
        assert_eq!(votes["fund"].decision, VoteDecision::Abstain);
        assert_eq!(votes["risk"].decision, VoteDecision::Abstain);
        assert_eq!(votes["risk"].confidence, Decimal::ZERO);
    }

    #[tokio::test]
    async fn per_advisor_timeout_abstains_without_blocking_others() {
        let advisors: Vec<Arc<dyn Advisor>> = vec![
            Arc::new(ScriptedAdvisor::new("fast", AdvisorAction::Buy, dec!(0.9))),
            Arc::new(SlowAdvisor::new("slow", Duration::from_secs(30))),
        ];
        let collector = VoteCollector::new(advisors, timeouts(50, 5_000));
        let start = Instant::now();
        let votes = collector
            .collect(&context(), &ActionKind::Entry, &CancellationToken::new())
            .await
            .unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(votes["fast"].decision, VoteDecision::Approve);
        assert_eq!(votes["slow"].decision, VoteDecision::Abstain);
        assert!(votes["slow"].rationale.contains("timed out"));
    }

    #[tokio::test]
    async fn total_deadline_caps_the_round() {
        let advisors: Vec<Arc<dyn Advisor>> = vec![
            Arc::new(SlowAdvisor::new("slow_a", Duration::from_secs(30))),
            Arc::new(SlowAdvisor::new("slow_b", Duration::from_secs(30))),
        ];
        let collector = VoteCollector::new(advisors, timeouts(10_000, 100));
        let start = Instant::now();
        let votes = collector
            .collect(&context(), &ActionKind::Exit, &CancellationToken::new())
            .await
            .unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(votes.values().all(|v| v.decision == VoteDecision::Abstain));
        assert!(votes["slow_a"].rationale.contains("overall deadline"));
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_calls() {
        let slow = Arc::new(SlowAdvisor::new("slow", Duration::from_secs(30)));
        let advisors: Vec<Arc<dyn Advisor>> = vec![slow.clone()];
        let collector = VoteCollector::new(advisors, CollectTimeouts::default());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result = collector.collect(&context(), &ActionKind::Entry, &cancel).await;
        assert_eq!(result.unwrap_err(), CouncilError::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(slow.completed(), 0);
    }

    #[tokio::test]
    async fn already_cancelled_token_queries_nobody() {
        let scripted = Arc::new(ScriptedAdvisor::new("tech", AdvisorAction::Buy, dec!(0.8)));
        let advisors: Vec<Arc<dyn Advisor>> = vec![scripted.clone()];
        let collector = VoteCollector::new(advisors, CollectTimeouts::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = collector.collect(&context(), &ActionKind::Entry, &cancel).await;
        assert_eq!(result.unwrap_err(), CouncilError::Cancelled);
        assert_eq!(scripted.calls(), 0);
    }
}
