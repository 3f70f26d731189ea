use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Position already open: {0}")]
    AlreadyOpen(String),

    #[error("No open position: {0}")]
    NotOpen(String),

    #[error("Averaging limit reached for {instrument_id}: at most {max} adds")]
    AveragingLimit { instrument_id: String, max: u32 },

    #[error("Position {instrument_id} changed since the averaging gate ran ({expected} entries expected, {found} found)")]
    StaleGate {
        instrument_id: String,
        expected: usize,
        found: usize,
    },

    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported ledger schema version {found} (expected {expected})")]
    SchemaVersion { found: u32, expected: u32 },

    #[error("Ledger not available: {0}")]
    Unavailable(String),
}

impl LedgerError {
    /// Stable reason code for callers and logs.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::AlreadyOpen(_) => "position_already_open",
            LedgerError::NotOpen(_) => "position_not_open",
            LedgerError::AveragingLimit { .. } => "averaging_limit_reached",
            LedgerError::StaleGate { .. } => "stale_gate",
            LedgerError::InvalidEntry(_) => "invalid_entry",
            LedgerError::Sqlite(_) | LedgerError::Json(_) => "storage_failure",
            LedgerError::SchemaVersion { .. } => "schema_version_mismatch",
            LedgerError::Unavailable(_) => "ledger_unavailable",
        }
    }

    /// True when the operation was refused by ledger rules rather than failing in storage.
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            LedgerError::AlreadyOpen(_)
                | LedgerError::NotOpen(_)
                | LedgerError::AveragingLimit { .. }
                | LedgerError::StaleGate { .. }
                | LedgerError::InvalidEntry(_)
        )
    }
}
