use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};
use tribunal_models::position::{
    CloseReason, LedgerSnapshot, Position, PositionClosure, PositionEntry, PositionStatus,
    RealizedPnl, UnrealizedPnl,
};

use crate::error::LedgerError;
use crate::store::{LedgerCommit, LedgerStore};

/// Authoritative cost-basis ledger, one current position per instrument.
///
/// Every mutation is built on a copy of the position, committed to the store,
/// and only then published in memory; a failed commit leaves the in-memory
/// state exactly as it was. Mutations on the same instrument are serialized by
/// a per-instrument lock, different instruments only contend on the short
/// store commit.
pub struct PositionLedger {
    store: Mutex<Box<dyn LedgerStore>>,
    state: RwLock<LedgerSnapshot>,
    instrument_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    max_averaging_count: u32,
}

impl PositionLedger {
    /// Load the ledger from `store`. `max_averaging_count` caps adds per position.
    pub fn new(store: Box<dyn LedgerStore>, max_averaging_count: u32) -> Result<Self, LedgerError> {
        let snapshot = store.load()?;
        info!(
            positions = snapshot.positions.len(),
            archived = snapshot.archived.len(),
            "Ledger loaded"
        );
        Ok(Self {
            store: Mutex::new(store),
            state: RwLock::new(snapshot),
            instrument_locks: Mutex::new(HashMap::new()),
            max_averaging_count,
        })
    }

    /// Open a new position with its first filled entry.
    pub fn open(
        &self,
        instrument_id: &str,
        name: &str,
        price: Decimal,
        amount: Decimal,
        rationale: &str,
    ) -> Result<Position, LedgerError> {
        let entry = new_entry(price, amount, rationale)?;
        let lock = self.instrument_lock(instrument_id)?;
        let _guard = hold(&lock);

        let previous = self.get(instrument_id)?;
        let archive = match previous {
            Some(p) if p.is_open() => return Err(LedgerError::AlreadyOpen(instrument_id.to_string())),
            other => other,
        };

        let position = Position {
            instrument_id: instrument_id.to_string(),
            name: name.to_string(),
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            entries: vec![entry],
            closure: None,
        };

        self.commit(LedgerCommit {
            position: position.clone(),
            archive,
        })?;

        info!(
            instrument = %instrument_id,
            price = %price,
            amount = %amount,
            shares = %position.total_shares(),
            "Position opened"
        );
        Ok(position)
    }

    /// Append an averaging entry to an open position.
    pub fn add_entry(
        &self,
        instrument_id: &str,
        price: Decimal,
        amount: Decimal,
        rationale: &str,
    ) -> Result<Position, LedgerError> {
        self.append(instrument_id, None, price, amount, rationale)
    }

    /// Append an averaging entry, provided the position is still the one the
    /// averaging gate evaluated: same opening time and same number of entries.
    /// Otherwise fails with [`LedgerError::StaleGate`].
    pub fn add_entry_if_unchanged(
        &self,
        instrument_id: &str,
        evaluated: &Position,
        price: Decimal,
        amount: Decimal,
        rationale: &str,
    ) -> Result<Position, LedgerError> {
        self.append(instrument_id, Some(evaluated), price, amount, rationale)
    }

    fn append(
        &self,
        instrument_id: &str,
        evaluated: Option<&Position>,
        price: Decimal,
        amount: Decimal,
        rationale: &str,
    ) -> Result<Position, LedgerError> {
        let mut entry = new_entry(price, amount, rationale)?;
        let lock = self.instrument_lock(instrument_id)?;
        let _guard = hold(&lock);

        let mut position = self.require_open(instrument_id)?;
        if let Some(evaluated) = evaluated {
            if evaluated.opened_at != position.opened_at
                || evaluated.entries.len() != position.entries.len()
            {
                return Err(LedgerError::StaleGate {
                    instrument_id: instrument_id.to_string(),
                    expected: evaluated.entries.len(),
                    found: position.entries.len(),
                });
            }
        }

        let ordinal = position.next_ordinal();
        if ordinal > self.max_averaging_count {
            return Err(LedgerError::AveragingLimit {
                instrument_id: instrument_id.to_string(),
                max: self.max_averaging_count,
            });
        }
        entry.ordinal = ordinal;
        position.entries.push(entry);
        if position.checked_totals().is_none() {
            return Err(LedgerError::InvalidEntry(format!(
                "adding {amount} at {price} overflows the position totals"
            )));
        }

        self.commit(LedgerCommit {
            position: position.clone(),
            archive: None,
        })?;

        info!(
            instrument = %instrument_id,
            ordinal,
            price = %price,
            amount = %amount,
            avg_cost = %position.weighted_avg_cost(),
            "Averaging entry added"
        );
        Ok(position)
    }

    /// Close an open position at `exit_price`, freezing its realized PnL.
    pub fn close(
        &self,
        instrument_id: &str,
        exit_price: Decimal,
        reason: CloseReason,
    ) -> Result<RealizedPnl, LedgerError> {
        if exit_price <= Decimal::ZERO {
            return Err(LedgerError::InvalidEntry(format!(
                "exit price must be positive, got {exit_price}"
            )));
        }
        let lock = self.instrument_lock(instrument_id)?;
        let _guard = hold(&lock);

        let mut position = self.require_open(instrument_id)?;
        let realized = realize(&position, exit_price).ok_or_else(|| {
            LedgerError::InvalidEntry(format!(
                "exit at {exit_price} overflows the realized PnL of {instrument_id}"
            ))
        })?;

        position.status = reason.terminal_status();
        position.closure = Some(PositionClosure {
            closed_at: Utc::now(),
            exit_price,
            reason,
            realized_pnl: realized.realized_pnl,
            realized_pnl_percent: realized.realized_pnl_percent,
        });

        self.commit(LedgerCommit {
            position,
            archive: None,
        })?;

        info!(
            instrument = %instrument_id,
            exit_price = %exit_price,
            reason = ?reason,
            realized_pnl = %realized.realized_pnl,
            "Position closed"
        );
        Ok(realized)
    }

    /// Mark-to-market of the current position. Zeroed when nothing is open.
    pub fn unrealized_pnl(
        &self,
        instrument_id: &str,
        current_price: Decimal,
    ) -> Result<UnrealizedPnl, LedgerError> {
        Ok(self
            .get(instrument_id)?
            .map(|p| p.unrealized_pnl(current_price))
            .unwrap_or_default())
    }

    /// Current position for an instrument (open, or the most recent closed one).
    pub fn get(&self, instrument_id: &str) -> Result<Option<Position>, LedgerError> {
        let state = self.read_state()?;
        Ok(state.positions.get(instrument_id).cloned())
    }

    pub fn open_positions(&self) -> Result<Vec<Position>, LedgerError> {
        let state = self.read_state()?;
        Ok(state
            .positions
            .values()
            .filter(|p| p.is_open())
            .cloned()
            .collect())
    }

    /// Closed and stopped positions: archived ones first, then current ones.
    pub fn closed_positions(&self) -> Result<Vec<Position>, LedgerError> {
        let state = self.read_state()?;
        Ok(state
            .archived
            .iter()
            .chain(state.positions.values().filter(|p| !p.is_open()))
            .cloned()
            .collect())
    }

    pub fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError> {
        Ok(self.read_state()?.clone())
    }

    pub fn max_averaging_count(&self) -> u32 {
        self.max_averaging_count
    }

    fn require_open(&self, instrument_id: &str) -> Result<Position, LedgerError> {
        match self.get(instrument_id)? {
            Some(p) if p.is_open() => Ok(p),
            _ => Err(LedgerError::NotOpen(instrument_id.to_string())),
        }
    }

    /// Persist `commit`, then publish it. Both the store lock and the state
    /// write guard are taken before touching disk, so a commit that reaches the
    /// store always reaches memory too, in the same order.
    fn commit(&self, commit: LedgerCommit) -> Result<(), LedgerError> {
        let mut store = self
            .store
            .lock()
            .map_err(|e| LedgerError::Unavailable(format!("store mutex poisoned: {e}")))?;
        let mut state = self
            .state
            .write()
            .map_err(|e| LedgerError::Unavailable(format!("ledger state poisoned: {e}")))?;

        if let Err(e) = store.commit(&commit) {
            warn!(
                instrument = %commit.position.instrument_id,
                error = %e,
                "Ledger commit failed, in-memory state unchanged"
            );
            return Err(e);
        }

        if let Some(archived) = commit.archive {
            state.archived.push(archived);
        }
        state
            .positions
            .insert(commit.position.instrument_id.clone(), commit.position);
        Ok(())
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, LedgerSnapshot>, LedgerError> {
        self.state
            .read()
            .map_err(|e| LedgerError::Unavailable(format!("ledger state poisoned: {e}")))
    }

    /// Lock handle for one instrument. Handles nobody else holds are dropped
    /// from the table first, so it only tracks instruments in use.
    fn instrument_lock(&self, instrument_id: &str) -> Result<Arc<Mutex<()>>, LedgerError> {
        let mut locks = self
            .instrument_locks
            .lock()
            .map_err(|e| LedgerError::Unavailable(format!("lock table poisoned: {e}")))?;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(Arc::clone(
            locks.entry(instrument_id.to_string()).or_default(),
        ))
    }
}

/// The instrument locks guard no data, so a poisoned one is still usable.
fn hold(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Validated entry with a placeholder ordinal.
fn new_entry(price: Decimal, amount: Decimal, rationale: &str) -> Result<PositionEntry, LedgerError> {
    if price <= Decimal::ZERO {
        return Err(LedgerError::InvalidEntry(format!(
            "price must be positive, got {price}"
        )));
    }
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidEntry(format!(
            "amount must be positive, got {amount}"
        )));
    }
    PositionEntry::new(0, price, amount, rationale).ok_or_else(|| {
        LedgerError::InvalidEntry(format!("{amount} at {price} is not a representable share count"))
    })
}

fn realize(position: &Position, exit_price: Decimal) -> Option<RealizedPnl> {
    let (shares, invested) = position.checked_totals()?;
    let realized_pnl = shares.checked_mul(exit_price)?.checked_sub(invested)?;
    let realized_pnl_percent = if invested.is_zero() {
        Decimal::ZERO
    } else {
        realized_pnl
            .checked_div(invested)?
            .checked_mul(Decimal::ONE_HUNDRED)?
    };
    Some(RealizedPnl {
        realized_pnl,
        realized_pnl_percent,
    })
}
