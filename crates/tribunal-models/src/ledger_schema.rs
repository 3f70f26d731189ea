/// SQLite layout of the persisted position ledger.
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS ledger_meta (
///     key    TEXT PRIMARY KEY,
///     value  TEXT NOT NULL
/// );
///
/// CREATE TABLE IF NOT EXISTS positions (
///     instrument_id  TEXT PRIMARY KEY,
///     status         TEXT NOT NULL,
///     position_json  TEXT NOT NULL,
///     updated_at     TEXT NOT NULL
/// );
///
/// CREATE TABLE IF NOT EXISTS archived_positions (
///     seq            INTEGER PRIMARY KEY AUTOINCREMENT,
///     instrument_id  TEXT NOT NULL,
///     position_json  TEXT NOT NULL,
///     archived_at    TEXT NOT NULL
/// );
/// ```
///
/// `position_json` holds the serialized `Position` including its full entry
/// list; the `status` column duplicates it only for querying.
pub const LEDGER_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS ledger_meta (
    key    TEXT PRIMARY KEY,
    value  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS positions (
    instrument_id  TEXT PRIMARY KEY,
    status         TEXT NOT NULL,
    position_json  TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS archived_positions (
    seq            INTEGER PRIMARY KEY AUTOINCREMENT,
    instrument_id  TEXT NOT NULL,
    position_json  TEXT NOT NULL,
    archived_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status);
CREATE INDEX IF NOT EXISTS idx_archived_instrument ON archived_positions(instrument_id);
";

/// `ledger_meta` key holding the snapshot schema version.
pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// A raw `positions` row as read from SQLite.
#[derive(Debug, Clone)]
pub struct PositionRow {
    pub instrument_id: String,
    pub status: String,
    pub position_json: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ddl_declares_all_tables() {
        for table in ["ledger_meta", "positions", "archived_positions"] {
            assert!(
                LEDGER_TABLE_DDL.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")),
                "missing table {table}"
            );
        }
    }
}
