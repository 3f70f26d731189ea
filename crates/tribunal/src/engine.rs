use std::sync::Arc;
use std::time::Instant;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tribunal_council::{ConsensusAggregator, StatisticsSnapshot, VoteCollector};
use tribunal_ledger::{AveragingStrategy, LedgerError, PositionLedger};
use tribunal_models::{
    ActionKind, AveragingContext, AveragingDecision, CloseReason, DecisionContext,
    DecisionResult, Position, PositionStatus, RealizedPnl,
};

use crate::error::EngineError;

/// One decision request as accepted by [`DecisionEngine::decide`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionRequest {
    pub instrument_id: String,
    /// Display name used when an approved entry opens a position.
    #[serde(default)]
    pub instrument_name: Option<String>,
    pub action_kind: ActionKind,
    /// Current or fill price. Required for ledger effects and the averaging gate.
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Capital to commit on entry. For averaging adds, defaults to the gate's recommendation.
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub features: serde_json::Value,
    #[serde(default)]
    pub market_context: Option<serde_json::Value>,
    #[serde(default)]
    pub portfolio_context: Option<serde_json::Value>,
    #[serde(default)]
    pub averaging_context: Option<AveragingContext>,
}

impl DecisionRequest {
    pub fn new(instrument_id: impl Into<String>, action_kind: ActionKind) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            instrument_name: None,
            action_kind,
            price: None,
            amount: None,
            rationale: None,
            features: serde_json::Value::Null,
            market_context: None,
            portfolio_context: None,
            averaging_context: None,
        }
    }
}

/// What an approved decision did to the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum LedgerEffect {
    /// Not approved, or the action kind does not touch positions.
    NotApplicable,
    Opened { position: Position },
    Added { position: Position },
    Closed {
        status: PositionStatus,
        realized: RealizedPnl,
    },
    /// Approved, but the ledger refused the change.
    Rejected { code: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionOutcome {
    pub decision: DecisionResult,
    /// Present for averaging adds: the local gate's verdict.
    pub averaging: Option<AveragingDecision>,
    pub ledger_effect: LedgerEffect,
}

/// Runs the decision flow: averaging gate, vote collection, consensus, ledger.
///
/// Constructed once at startup and shared by reference; every component it
/// holds is safe to use from concurrent requests.
pub struct DecisionEngine {
    collector: VoteCollector,
    aggregator: ConsensusAggregator,
    ledger: Arc<PositionLedger>,
    averaging: AveragingStrategy,
}

impl DecisionEngine {
    pub fn new(
        collector: VoteCollector,
        aggregator: ConsensusAggregator,
        ledger: Arc<PositionLedger>,
        averaging: AveragingStrategy,
    ) -> Self {
        Self {
            collector,
            aggregator,
            ledger,
            averaging,
        }
    }

    pub fn ledger(&self) -> &Arc<PositionLedger> {
        &self.ledger
    }

    pub fn collector(&self) -> &VoteCollector {
        &self.collector
    }

    pub fn aggregator(&self) -> &ConsensusAggregator {
        &self.aggregator
    }

    pub fn averaging(&self) -> &AveragingStrategy {
        &self.averaging
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.aggregator.statistics()
    }

    pub fn history(&self) -> Vec<DecisionResult> {
        self.aggregator.history()
    }

    /// Decide on `request` and apply the approved ledger change, if any.
    ///
    /// Returns `EngineError::Cancelled` if `cancel` fires while votes are being
    /// collected; nothing is recorded in that case. Ledger policy refusals are
    /// reported as [`LedgerEffect::Rejected`]; storage failures are errors.
    pub async fn decide(
        &self,
        request: &DecisionRequest,
        cancel: &CancellationToken,
    ) -> Result<DecisionOutcome, EngineError> {
        let start = Instant::now();
        let kind = &request.action_kind;
        info!(instrument = %request.instrument_id, action = %kind, "Decision requested");

        let position = self.ledger.get(&request.instrument_id)?;

        let averaging = if *kind == ActionKind::AveragingAdd {
            let gate = self.averaging_gate(request, position.as_ref());
            if !gate.should_add {
                info!(
                    instrument = %request.instrument_id,
                    rationale = %gate.rationale,
                    "Averaging gate rejected, skipping vote"
                );
                let decision = self.gated_result(request, &gate, start);
                return Ok(DecisionOutcome {
                    decision,
                    averaging: Some(gate),
                    ledger_effect: LedgerEffect::NotApplicable,
                });
            }
            Some(gate)
        } else {
            None
        };

        let context = DecisionContext {
            instrument_id: request.instrument_id.clone(),
            features: request.features.clone(),
            market_context: request.market_context.clone(),
            portfolio_context: request
                .portfolio_context
                .clone()
                .or_else(|| position_context(position.as_ref(), request.price)),
        };

        let votes = self.collector.collect(&context, kind, cancel).await?;
        let decision = self
            .aggregator
            .aggregate(&request.instrument_id, kind, votes, start.elapsed());

        let ledger_effect = if decision.approved && kind.mutates_position() {
            self.apply(request, position.as_ref(), averaging.as_ref(), &decision)?
        } else {
            LedgerEffect::NotApplicable
        };

        Ok(DecisionOutcome {
            decision,
            averaging,
            ledger_effect,
        })
    }

    fn averaging_gate(
        &self,
        request: &DecisionRequest,
        position: Option<&Position>,
    ) -> AveragingDecision {
        let Some(position) = position else {
            return AveragingDecision::reject(
                format!("no position for {}", request.instrument_id),
                Vec::new(),
            );
        };
        let Some(price) = request.price else {
            return AveragingDecision::reject(
                "current price required to evaluate averaging",
                Vec::new(),
            );
        };
        let context = request.averaging_context.clone().unwrap_or_default();
        self.averaging
            .evaluate(&request.instrument_id, price, position, &context)
    }

    /// Unapproved, vote-less result for a request the averaging gate stopped.
    /// Not recorded in statistics or history.
    fn gated_result(
        &self,
        request: &DecisionRequest,
        gate: &AveragingDecision,
        start: Instant,
    ) -> DecisionResult {
        let mut result = self.aggregator.tally(
            &request.instrument_id,
            &request.action_kind,
            Default::default(),
            start.elapsed(),
        );
        result.metadata = serde_json::json!({
            "gated": true,
            "gate_rationale": gate.rationale,
            "risk_factors": gate.risk_factors,
        });
        result
    }

    /// `evaluated` is the position the averaging gate saw. An averaging add is
    /// only applied if the ledger still holds that exact position.
    fn apply(
        &self,
        request: &DecisionRequest,
        evaluated: Option<&Position>,
        averaging: Option<&AveragingDecision>,
        decision: &DecisionResult,
    ) -> Result<LedgerEffect, EngineError> {
        let id = &request.instrument_id;
        let rationale = request.rationale.clone().unwrap_or_else(|| {
            format!(
                "approved by council ({:?}, decision {})",
                decision.consensus_tier, decision.id
            )
        });

        let Some(price) = request.price else {
            return Ok(missing_input("price"));
        };

        let outcome = match &request.action_kind {
            ActionKind::Entry => {
                let Some(amount) = request.amount else {
                    return Ok(missing_input("amount"));
                };
                let name = request.instrument_name.as_deref().unwrap_or(id);
                self.ledger
                    .open(id, name, price, amount, &rationale)
                    .map(|position| LedgerEffect::Opened { position })
            }
            ActionKind::AveragingAdd => {
                let Some(amount) = request
                    .amount
                    .or_else(|| averaging.and_then(|a| a.recommended_amount))
                else {
                    return Ok(missing_input("amount"));
                };
                let added = match evaluated {
                    Some(seen) => self
                        .ledger
                        .add_entry_if_unchanged(id, seen, price, amount, &rationale),
                    None => self.ledger.add_entry(id, price, amount, &rationale),
                };
                added.map(|position| LedgerEffect::Added { position })
            }
            kind => {
                let Some(reason) = close_reason(kind) else {
                    return Ok(LedgerEffect::NotApplicable);
                };
                self.ledger
                    .close(id, price, reason)
                    .map(|realized| LedgerEffect::Closed {
                        status: reason.terminal_status(),
                        realized,
                    })
            }
        };

        match outcome {
            Ok(effect) => Ok(effect),
            Err(e) if e.is_policy_violation() => {
                warn!(instrument = %id, code = e.code(), error = %e, "Approved decision refused by ledger");
                Ok(LedgerEffect::Rejected {
                    code: e.code().to_string(),
                    reason: e.to_string(),
                })
            }
            Err(e) => {
                error!(instrument = %id, decision = %decision.id, error = %e, "Ledger write failed");
                Err(EngineError::Ledger(e))
            }
        }
    }
}

fn close_reason(kind: &ActionKind) -> Option<CloseReason> {
    match kind {
        ActionKind::Exit => Some(CloseReason::Exit),
        ActionKind::TakeProfit => Some(CloseReason::TakeProfit),
        ActionKind::StopLoss => Some(CloseReason::StopLoss),
        ActionKind::EmergencyExit => Some(CloseReason::EmergencyExit),
        _ => None,
    }
}

fn missing_input(field: &str) -> LedgerEffect {
    let err = LedgerError::InvalidEntry(format!("approved request has no {field}"));
    LedgerEffect::Rejected {
        code: err.code().to_string(),
        reason: err.to_string(),
    }
}

/// Default portfolio context: the ledger's view of the instrument.
fn position_context(position: Option<&Position>, price: Option<Decimal>) -> Option<serde_json::Value> {
    let position = position.filter(|p| p.is_open())?;
    let mut context = serde_json::json!({ "position": position.summary() });
    if let Some(price) = price {
        context["unrealized"] = serde_json::json!(position.unrealized_pnl(price));
        context["drawdown_percent"] = serde_json::json!(position.drawdown_percent(price));
    }
    Some(context)
}
