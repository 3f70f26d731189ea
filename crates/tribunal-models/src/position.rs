use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Version of the persisted ledger snapshot layout.
pub const LEDGER_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
    /// Closed by a stop-loss or emergency exit.
    Stopped,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
            PositionStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a position was closed. Stop-style reasons leave the position `Stopped`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    TakeProfit,
    Manual,
    Exit,
    StopLoss,
    EmergencyExit,
}

impl CloseReason {
    pub fn terminal_status(&self) -> PositionStatus {
        match self {
            CloseReason::StopLoss | CloseReason::EmergencyExit => PositionStatus::Stopped,
            CloseReason::TakeProfit | CloseReason::Manual | CloseReason::Exit => {
                PositionStatus::Closed
            }
        }
    }
}

/// One filled buy. Entries are never edited once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionEntry {
    /// 0 for the opening entry, 1.. for each averaging add.
    pub ordinal: u32,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    /// Capital committed by this entry.
    pub amount: Decimal,
    /// `amount / price`.
    pub shares: Decimal,
    pub rationale: String,
}

impl PositionEntry {
    /// `None` when `price` is zero or `amount / price` does not fit a `Decimal`.
    pub fn new(
        ordinal: u32,
        price: Decimal,
        amount: Decimal,
        rationale: impl Into<String>,
    ) -> Option<Self> {
        Some(Self {
            ordinal,
            timestamp: Utc::now(),
            price,
            amount,
            shares: amount.checked_div(price)?,
            rationale: rationale.into(),
        })
    }
}

/// Fields frozen when a position is closed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionClosure {
    pub closed_at: DateTime<Utc>,
    pub exit_price: Decimal,
    pub reason: CloseReason,
    pub realized_pnl: Decimal,
    pub realized_pnl_percent: Decimal,
}

/// Cost-basis record for one instrument.
///
/// Totals are derived from `entries` on every read; nothing cached can drift
/// from the entry list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub instrument_id: String,
    pub name: String,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub entries: Vec<PositionEntry>,
    pub closure: Option<PositionClosure>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn total_shares(&self) -> Decimal {
        self.entries.iter().map(|e| e.shares).sum()
    }

    pub fn total_invested(&self) -> Decimal {
        self.entries.iter().map(|e| e.amount).sum()
    }

    pub fn weighted_avg_cost(&self) -> Decimal {
        let shares = self.total_shares();
        if shares.is_zero() {
            return Decimal::ZERO;
        }
        self.total_invested() / shares
    }

    /// `(total_shares, total_invested)` computed without overflow, or `None` if
    /// either total (or the average cost) does not fit a `Decimal`.
    pub fn checked_totals(&self) -> Option<(Decimal, Decimal)> {
        let mut shares = Decimal::ZERO;
        let mut invested = Decimal::ZERO;
        for entry in &self.entries {
            shares = shares.checked_add(entry.shares)?;
            invested = invested.checked_add(entry.amount)?;
        }
        if !shares.is_zero() {
            invested.checked_div(shares)?;
        }
        Some((shares, invested))
    }

    /// Number of averaging adds made after the opening entry.
    pub fn averaging_count(&self) -> u32 {
        self.entries.len().saturating_sub(1) as u32
    }

    pub fn next_ordinal(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Mark-to-market at `current_price`. Zeroed for positions that are not open.
    pub fn unrealized_pnl(&self, current_price: Decimal) -> UnrealizedPnl {
        if !self.is_open() {
            return UnrealizedPnl::default();
        }
        let invested = self.total_invested();
        let current_value = self.total_shares().saturating_mul(current_price);
        let amount = current_value.saturating_sub(invested);
        let percent = saturating_percent(amount, invested);
        UnrealizedPnl {
            amount,
            percent,
            current_value,
        }
    }

    /// Signed percent distance of `current_price` from the average cost.
    pub fn drawdown_percent(&self, current_price: Decimal) -> Decimal {
        let avg_cost = self.weighted_avg_cost();
        if avg_cost.is_zero() {
            return Decimal::ZERO;
        }
        saturating_percent(current_price.saturating_sub(avg_cost), avg_cost)
    }

    pub fn realized_pnl(&self) -> Option<RealizedPnl> {
        self.closure.as_ref().map(|c| RealizedPnl {
            realized_pnl: c.realized_pnl,
            realized_pnl_percent: c.realized_pnl_percent,
        })
    }

    pub fn summary(&self) -> PositionSummary {
        PositionSummary {
            instrument_id: self.instrument_id.clone(),
            name: self.name.clone(),
            status: self.status,
            entry_count: self.entries.len(),
            averaging_count: self.averaging_count(),
            total_shares: self.total_shares(),
            total_invested: self.total_invested(),
            weighted_avg_cost: self.weighted_avg_cost(),
            realized_pnl: self.closure.as_ref().map(|c| c.realized_pnl),
        }
    }
}

/// `part / whole * 100`, clamped to the `Decimal` range. Zero when `whole` is zero.
fn saturating_percent(part: Decimal, whole: Decimal) -> Decimal {
    if whole.is_zero() {
        return Decimal::ZERO;
    }
    match part.checked_div(whole) {
        Some(ratio) => ratio.saturating_mul(Decimal::ONE_HUNDRED),
        None if part.is_sign_negative() != whole.is_sign_negative() => Decimal::MIN,
        None => Decimal::MAX,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UnrealizedPnl {
    pub amount: Decimal,
    pub percent: Decimal,
    pub current_value: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RealizedPnl {
    pub realized_pnl: Decimal,
    pub realized_pnl_percent: Decimal,
}

/// Read-only view with derived totals, for dashboards and CLI output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionSummary {
    pub instrument_id: String,
    pub name: String,
    pub status: PositionStatus,
    pub entry_count: usize,
    pub averaging_count: u32,
    pub total_shares: Decimal,
    pub total_invested: Decimal,
    pub weighted_avg_cost: Decimal,
    pub realized_pnl: Option<Decimal>,
}

/// Versioned, keyed image of the whole ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerSnapshot {
    pub schema_version: u32,
    /// Current position per instrument (open, or the most recent closed one).
    pub positions: BTreeMap<String, Position>,
    /// Closed positions displaced by a later re-open, oldest first.
    pub archived: Vec<Position>,
}

impl Default for LedgerSnapshot {
    fn default() -> Self {
        Self {
            schema_version: LEDGER_SCHEMA_VERSION,
            positions: BTreeMap::new(),
            archived: Vec::new(),
        }
    }
}
