//! Embedded schema and connection setup.
//!
//! The `attendance` primary key on (identity_id, day) is load-bearing:
//! it is the atomic check-and-insert the ledger relies on. Do not relax
//! it to an index.

use crate::error::StoreResult;
use rusqlite::Connection;
use std::time::Duration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id           TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    email        TEXT NOT NULL UNIQUE,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS descriptors (
    id           INTEGER PRIMARY KEY,
    identity_id  TEXT NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
    vector       BLOB NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_descriptors_identity
    ON descriptors(identity_id);

CREATE TABLE IF NOT EXISTS attendance (
    identity_id  TEXT NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
    day          TEXT NOT NULL,
    status       TEXT NOT NULL,
    recorded_at  TEXT NOT NULL,
    PRIMARY KEY (identity_id, day)
);
";

/// Prepare a connection: bounded lock waits, WAL, enforced foreign keys,
/// and the schema itself. Run on every connection before first use.
pub fn init(conn: &Connection, busy_timeout_ms: u64) -> StoreResult<()> {
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
