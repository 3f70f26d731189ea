//! Local averaging-down gate.
//!
//! Runs a short, ordered series of cheap checks to decide whether a losing
//! position is even eligible for another add before any advisor is consulted.
//! The result is advisory: an averaging add still needs the voting policy's
//! approval, and this module never touches the ledger.

use rust_decimal::Decimal;
use tracing::debug;
use tribunal_models::averaging::{AveragingContext, AveragingDecision, FundamentalsSnapshot};
use tribunal_models::config::AveragingConfig;
use tribunal_models::position::Position;

const BASE_CONFIDENCE: Decimal = Decimal::from_parts(5, 0, 0, false, 1);
const FUNDAMENTALS_DELTA: Decimal = Decimal::from_parts(2, 0, 0, false, 1);
const REGIME_DELTA: Decimal = Decimal::from_parts(1, 0, 0, false, 1);
const SENTIMENT_DELTA: Decimal = Decimal::from_parts(1, 0, 0, false, 1);
const DRAWDOWN_BONUS: Decimal = Decimal::from_parts(15, 0, 0, false, 2);
/// Drops between the minimum drop and this percent earn the full bonus.
const IDEAL_DRAWDOWN_CEILING: Decimal = Decimal::from_parts(20, 0, 0, false, 0);

pub struct AveragingStrategy {
    config: AveragingConfig,
}

/// Outcome of the fundamentals gate when no hard band was breached.
enum FundamentalsVerdict {
    Pass,
    SoftFail,
    Unavailable,
}

impl AveragingStrategy {
    pub fn new(config: AveragingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AveragingConfig {
        &self.config
    }

    /// Decide whether `position` may be averaged down at `current_price`.
    pub fn evaluate(
        &self,
        instrument_id: &str,
        current_price: Decimal,
        position: &Position,
        context: &AveragingContext,
    ) -> AveragingDecision {
        let mut risk_factors = Vec::new();

        if !position.is_open() {
            return AveragingDecision::reject(
                format!("position {instrument_id} is {}", position.status),
                risk_factors,
            );
        }

        // 1. Max-count gate
        let count = position.averaging_count();
        if count >= self.config.max_averaging_count {
            return AveragingDecision::reject(
                format!(
                    "averaging limit reached ({count}/{})",
                    self.config.max_averaging_count
                ),
                risk_factors,
            );
        }

        // 2. Drawdown gate
        let drawdown = position.drawdown_percent(current_price);
        if drawdown > -self.config.min_drop_percent {
            return AveragingDecision::reject(
                format!(
                    "insufficient drop: {}% vs required -{}%",
                    drawdown.round_dp(2),
                    self.config.min_drop_percent
                ),
                risk_factors,
            );
        }

        // 3. Capitulation gate
        let drop = -drawdown;
        if drop > self.config.max_loss_percent {
            return AveragingDecision::reject(
                format!(
                    "drawdown {}% exceeds max tolerable loss {}%",
                    drop.round_dp(2),
                    self.config.max_loss_percent
                ),
                risk_factors,
            );
        }

        // 4. Fundamentals gate
        let verdict = match &context.fundamentals {
            Some(f) => match self.check_fundamentals(f, &mut risk_factors) {
                Ok(verdict) => verdict,
                Err(reason) => return AveragingDecision::reject(reason, risk_factors),
            },
            None => {
                risk_factors.push("fundamentals unavailable".to_string());
                FundamentalsVerdict::Unavailable
            }
        };

        // 5. Regime gate (soft only)
        let regime_pass = context.regime.map(|regime| {
            let pass = regime.favors_averaging();
            if !pass {
                risk_factors.push(format!("unfavorable market regime: {regime:?}"));
            }
            pass
        });

        let mut confidence = BASE_CONFIDENCE;
        match verdict {
            FundamentalsVerdict::Pass => confidence += FUNDAMENTALS_DELTA,
            FundamentalsVerdict::SoftFail => confidence -= FUNDAMENTALS_DELTA,
            FundamentalsVerdict::Unavailable => {}
        }
        match regime_pass {
            Some(true) => confidence += REGIME_DELTA,
            Some(false) => confidence -= REGIME_DELTA,
            None => {}
        }
        confidence += self.drawdown_bonus(drop);
        if let Some(f) = &context.fundamentals {
            if f.sentiment > Decimal::ZERO {
                confidence += SENTIMENT_DELTA;
            } else if f.sentiment < Decimal::ZERO {
                confidence -= SENTIMENT_DELTA;
            }
        }
        let confidence = confidence.clamp(Decimal::ZERO, Decimal::ONE);

        let fraction = self.fraction_for(count);
        let amount = fraction * position.total_invested();

        debug!(
            instrument = %instrument_id,
            drawdown = %drawdown.round_dp(2),
            count,
            confidence = %confidence,
            risk_factors = risk_factors.len(),
            "Averaging gates passed"
        );

        AveragingDecision {
            should_add: true,
            rationale: format!(
                "drawdown {}% within averaging band; add #{} at {}% of invested",
                drawdown.round_dp(2),
                count + 1,
                (fraction * Decimal::ONE_HUNDRED).normalize()
            ),
            recommended_fraction: Some(fraction),
            recommended_amount: Some(amount),
            confidence: Some(confidence),
            risk_factors,
        }
    }

    /// Fraction of invested capital for the add following `count` prior adds.
    /// Each later add is smaller than the one before.
    pub fn fraction_for(&self, count: u32) -> Decimal {
        self.config
            .fraction_schedule
            .get(count as usize)
            .copied()
            .unwrap_or(self.config.tail_fraction)
    }

    fn check_fundamentals(
        &self,
        f: &FundamentalsSnapshot,
        risk_factors: &mut Vec<String>,
    ) -> Result<FundamentalsVerdict, String> {
        let bands = &self.config.fundamentals;

        if f.sentiment < bands.sentiment_hard_floor {
            return Err(format!("sentiment {} below hard floor", f.sentiment));
        }
        if f.supply_chain_risk > bands.supply_chain_hard_ceiling {
            return Err(format!(
                "supply-chain risk {} above hard ceiling",
                f.supply_chain_risk
            ));
        }
        if f.policy_risk > bands.policy_risk_hard_ceiling {
            return Err(format!("policy risk {} above hard ceiling", f.policy_risk));
        }

        let before = risk_factors.len();
        if f.sentiment < bands.sentiment_soft_floor {
            risk_factors.push(format!("weak sentiment ({})", f.sentiment));
        }
        if f.supply_chain_risk > bands.supply_chain_soft_ceiling {
            risk_factors.push(format!("elevated supply-chain risk ({})", f.supply_chain_risk));
        }
        if f.policy_risk > bands.policy_risk_soft_ceiling {
            risk_factors.push(format!("elevated policy risk ({})", f.policy_risk));
        }

        if risk_factors.len() > before {
            Ok(FundamentalsVerdict::SoftFail)
        } else {
            Ok(FundamentalsVerdict::Pass)
        }
    }

    /// Full bonus inside the ideal band, tapering linearly to zero at the max loss.
    fn drawdown_bonus(&self, drop: Decimal) -> Decimal {
        if drop <= IDEAL_DRAWDOWN_CEILING {
            return DRAWDOWN_BONUS;
        }
        let span = self.config.max_loss_percent - IDEAL_DRAWDOWN_CEILING;
        if span <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let remaining = (self.config.max_loss_percent - drop).max(Decimal::ZERO);
        DRAWDOWN_BONUS * remaining / span
    }
}
