pub mod averaging;
pub mod error;
pub mod ledger;
pub mod store;

pub use averaging::AveragingStrategy;
pub use error::LedgerError;
pub use ledger::PositionLedger;
pub use store::{LedgerCommit, LedgerStore, SqliteStore};
