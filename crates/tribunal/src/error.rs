use thiserror::Error;
use tribunal_ledger::LedgerError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Decision request cancelled")]
    Cancelled,

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tribunal_council::CouncilError> for EngineError {
    fn from(err: tribunal_council::CouncilError) -> Self {
        match err {
            tribunal_council::CouncilError::Cancelled => EngineError::Cancelled,
        }
    }
}
