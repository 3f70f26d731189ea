use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use tribunal_models::ledger_schema::{PositionRow, LEDGER_TABLE_DDL, SCHEMA_VERSION_KEY};
use tribunal_models::position::{LedgerSnapshot, Position, LEDGER_SCHEMA_VERSION};

use crate::error::LedgerError;

/// One atomic ledger change: the new image of a position, plus the closed
/// position it displaces when an instrument is re-opened.
#[derive(Debug, Clone)]
pub struct LedgerCommit {
    pub position: Position,
    pub archive: Option<Position>,
}

/// Durable backing for [`crate::PositionLedger`].
///
/// `commit` must be all-or-nothing: either every part of the change is
/// durable when it returns `Ok`, or none of it is.
pub trait LedgerStore: Send {
    fn load(&self) -> Result<LedgerSnapshot, LedgerError>;
    fn commit(&mut self, commit: &LedgerCommit) -> Result<(), LedgerError>;
}

/// SQLite-backed ledger store.
///
/// Each commit runs in a single transaction with `synchronous = FULL`, so a
/// crash leaves either the previous or the new image of the position on disk.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the ledger database. Enables WAL and checks the schema version.
    pub fn open(path: &str) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        Self::init(conn)
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(LEDGER_TABLE_DDL)?;

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM ledger_meta WHERE key = ?1",
                rusqlite::params![SCHEMA_VERSION_KEY],
                |row| row.get(0),
            )
            .optional()?;

        match stored {
            None => {
                conn.execute(
                    "INSERT INTO ledger_meta (key, value) VALUES (?1, ?2)",
                    rusqlite::params![SCHEMA_VERSION_KEY, LEDGER_SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(value) => {
                let found: u32 = value.parse().map_err(|_| LedgerError::SchemaVersion {
                    found: 0,
                    expected: LEDGER_SCHEMA_VERSION,
                })?;
                if found != LEDGER_SCHEMA_VERSION {
                    return Err(LedgerError::SchemaVersion {
                        found,
                        expected: LEDGER_SCHEMA_VERSION,
                    });
                }
            }
        }

        Ok(Self { conn })
    }

    fn position_rows(&self) -> Result<Vec<PositionRow>, LedgerError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT instrument_id, status, position_json, updated_at FROM positions",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(PositionRow {
                    instrument_id: row.get(0)?,
                    status: row.get(1)?,
                    position_json: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Count positions with the given status (`open`, `closed`, `stopped`).
    pub fn count_by_status(&self, status: &str) -> Result<usize, LedgerError> {
        let count: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM positions WHERE status = ?1",
            rusqlite::params![status],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl LedgerStore for SqliteStore {
    fn load(&self) -> Result<LedgerSnapshot, LedgerError> {
        let mut positions = BTreeMap::new();
        for row in self.position_rows()? {
            let position: Position = serde_json::from_str(&row.position_json)?;
            positions.insert(row.instrument_id, position);
        }

        let mut stmt = self
            .conn
            .prepare_cached("SELECT position_json FROM archived_positions ORDER BY seq ASC")?;
        let archived = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?
            .iter()
            .map(|json| serde_json::from_str(json))
            .collect::<Result<Vec<Position>, _>>()?;

        Ok(LedgerSnapshot {
            schema_version: LEDGER_SCHEMA_VERSION,
            positions,
            archived,
        })
    }

    fn commit(&mut self, commit: &LedgerCommit) -> Result<(), LedgerError> {
        let now = Utc::now().to_rfc3339();
        let position_json = serde_json::to_string(&commit.position)?;
        let archive_json = commit
            .archive
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let tx = self.conn.transaction()?;
        if let (Some(archived), Some(json)) = (&commit.archive, &archive_json) {
            tx.execute(
                "INSERT INTO archived_positions (instrument_id, position_json, archived_at) \
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![archived.instrument_id, json, now],
            )?;
        }
        tx.execute(
            "INSERT OR REPLACE INTO positions (instrument_id, status, position_json, updated_at) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                commit.position.instrument_id,
                commit.position.status.as_str(),
                position_json,
                now,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }
}
