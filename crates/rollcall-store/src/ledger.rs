//! Attendance ledger: append-only, at most one presence record per
//! identity per calendar day.
//!
//! `record_presence` is a single conflict-target INSERT. The primary key
//! on (identity_id, day) is the check-and-insert: concurrent callers for
//! the same key cannot both create a row, and unrelated keys never
//! contend beyond SQLite's bounded write lock.

use crate::error::{StoreError, StoreResult};
use crate::registry::{parse_timestamp, parse_uuid};
use chrono::{DateTime, NaiveDate, Utc};
use rollcall_core::types::{AttendanceRecord, AttendanceStatus};
use rusqlite::{params, Connection};
use uuid::Uuid;

/// Result of a presence-recording attempt.
#[derive(Debug, Clone, Copy)]
pub struct RecordOutcome {
    /// True when this call created the day's record; false when it
    /// already existed (idempotent success, not an error).
    pub created: bool,
}

pub fn record_presence(
    conn: &Connection,
    identity_id: Uuid,
    day: NaiveDate,
    recorded_at: DateTime<Utc>,
) -> StoreResult<RecordOutcome> {
    let changed = conn.execute(
        "INSERT INTO attendance (identity_id, day, status, recorded_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(identity_id, day) DO NOTHING",
        params![
            identity_id.to_string(),
            day.to_string(),
            status_to_db(AttendanceStatus::Present),
            recorded_at.to_rfc3339()
        ],
    )?;
    Ok(RecordOutcome {
        created: changed == 1,
    })
}

pub fn has_recorded(conn: &Connection, identity_id: Uuid, day: NaiveDate) -> StoreResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM attendance WHERE identity_id = ?1 AND day = ?2",
        params![identity_id.to_string(), day.to_string()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Attendance history for one identity, most recent day first.
pub fn history(conn: &Connection, identity_id: Uuid) -> StoreResult<Vec<AttendanceRecord>> {
    let mut stmt = conn.prepare(
        "SELECT identity_id, day, status, recorded_at
         FROM attendance
         WHERE identity_id = ?1
         ORDER BY day DESC",
    )?;
    let mut rows = stmt.query(params![identity_id.to_string()])?;
    let mut records = Vec::new();

    while let Some(row) = rows.next()? {
        let identity_id = parse_uuid(&row.get::<_, String>(0)?, "attendance.identity_id")?;
        let day_text: String = row.get(1)?;
        let day = day_text.parse::<NaiveDate>().map_err(|_| {
            StoreError::InvalidData(format!("invalid day `{day_text}` in attendance.day"))
        })?;
        let status = parse_status(&row.get::<_, String>(2)?)?;
        let recorded_at = parse_timestamp(&row.get::<_, String>(3)?, "attendance.recorded_at")?;
        records.push(AttendanceRecord {
            identity_id,
            day,
            status,
            recorded_at,
        });
    }

    Ok(records)
}

pub fn count_for_day(conn: &Connection, day: NaiveDate) -> StoreResult<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM attendance WHERE day = ?1",
        params![day.to_string()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

fn status_to_db(status: AttendanceStatus) -> &'static str {
    match status {
        AttendanceStatus::Present => "present",
    }
}

fn parse_status(value: &str) -> StoreResult<AttendanceStatus> {
    match value {
        "present" => Ok(AttendanceStatus::Present),
        other => Err(StoreError::InvalidData(format!(
            "invalid status `{other}` in attendance.status"
        ))),
    }
}
