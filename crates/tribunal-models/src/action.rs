use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of action a decision request proposes against a position.
///
/// Serialized as a snake_case string. Hyphenated spellings (`emergency-exit`)
/// and the `dca` shorthand are accepted on input. Unrecognized kinds are kept
/// verbatim in [`ActionKind::Other`] so the voting policy can fall back to its
/// default rule instead of failing the request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionKind {
    /// Open a new position.
    Entry,
    /// Regular exit of an open position.
    Exit,
    TakeProfit,
    StopLoss,
    /// Defensive exit triggered by an adverse event.
    EmergencyExit,
    /// Add to an existing losing position (DCA).
    AveragingAdd,
    Other(String),
}

impl ActionKind {
    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::Entry => "entry",
            ActionKind::Exit => "exit",
            ActionKind::TakeProfit => "take_profit",
            ActionKind::StopLoss => "stop_loss",
            ActionKind::EmergencyExit => "emergency_exit",
            ActionKind::AveragingAdd => "averaging_add",
            ActionKind::Other(kind) => kind,
        }
    }

    /// Exits where a missed exit costs more than an unnecessary one.
    pub fn is_defensive_exit(&self) -> bool {
        matches!(self, ActionKind::StopLoss | ActionKind::EmergencyExit)
    }

    pub fn is_exit(&self) -> bool {
        matches!(
            self,
            ActionKind::Exit
                | ActionKind::TakeProfit
                | ActionKind::StopLoss
                | ActionKind::EmergencyExit
        )
    }

    /// Whether an approved decision of this kind changes ledger state.
    pub fn mutates_position(&self) -> bool {
        matches!(self, ActionKind::Entry | ActionKind::AveragingAdd) || self.is_exit()
    }
}

impl From<&str> for ActionKind {
    fn from(value: &str) -> Self {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "entry" | "buy" => ActionKind::Entry,
            "exit" | "sell" => ActionKind::Exit,
            "take_profit" => ActionKind::TakeProfit,
            "stop_loss" => ActionKind::StopLoss,
            "emergency_exit" => ActionKind::EmergencyExit,
            "averaging_add" | "dca" | "average_down" => ActionKind::AveragingAdd,
            _ => ActionKind::Other(normalized),
        }
    }
}

impl From<String> for ActionKind {
    fn from(value: String) -> Self {
        ActionKind::from(value.as_str())
    }
}

impl From<ActionKind> for String {
    fn from(value: ActionKind) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
