use std::collections::BTreeMap;

use tribunal_models::{ActionKind, QuorumRule};

/// Minimum approvals per action kind, for a fixed council size.
///
/// Defensive exits need one approval, averaging adds need every advisor, and
/// everything else needs a strict majority. Config overrides replace the
/// built-in rule for a kind. The requirement is never below one, so an empty
/// council can never approve anything.
#[derive(Debug, Clone)]
pub struct VotingPolicy {
    advisor_count: u32,
    overrides: BTreeMap<String, QuorumRule>,
}

impl VotingPolicy {
    pub fn new(advisor_count: u32) -> Self {
        Self::with_overrides(advisor_count, BTreeMap::new())
    }

    pub fn with_overrides(advisor_count: u32, overrides: BTreeMap<String, QuorumRule>) -> Self {
        Self {
            advisor_count,
            overrides,
        }
    }

    pub fn advisor_count(&self) -> u32 {
        self.advisor_count
    }

    /// The built-in rule, ignoring overrides.
    pub fn default_rule(kind: &ActionKind) -> QuorumRule {
        match kind {
            ActionKind::EmergencyExit | ActionKind::StopLoss => QuorumRule::Any,
            ActionKind::AveragingAdd => QuorumRule::Unanimous,
            ActionKind::Entry | ActionKind::Exit | ActionKind::TakeProfit => QuorumRule::Majority,
            ActionKind::Other(_) => QuorumRule::Majority,
        }
    }

    pub fn rule_for(&self, kind: &ActionKind) -> QuorumRule {
        self.overrides
            .get(kind.as_str())
            .copied()
            .unwrap_or_else(|| Self::default_rule(kind))
    }

    /// Approvals needed for `kind`. Always at least one; `at_least(k)` is
    /// capped at the council size so it stays reachable.
    pub fn requirement(&self, kind: &ActionKind) -> u32 {
        let n = self.advisor_count;
        let raw = match self.rule_for(kind) {
            QuorumRule::Any => 1,
            QuorumRule::Majority => n / 2 + 1,
            QuorumRule::Unanimous => n,
            QuorumRule::AtLeast(k) => k.min(n),
        };
        raw.max(1)
    }

    pub fn is_approved(&self, kind: &ActionKind, approve_count: u32) -> bool {
        approve_count >= self.requirement(kind)
    }
}
