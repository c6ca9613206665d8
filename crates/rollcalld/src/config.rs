use chrono::{FixedOffset, NaiveDate, Offset, Utc};
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Maximum Euclidean distance for an accepted match.
    pub match_threshold: f32,
    /// Expected descriptor length L (a property of the extraction model).
    pub descriptor_len: usize,
    /// Fixed timezone policy used to derive the calendar day.
    pub utc_offset: FixedOffset,
    /// Bound on any single store operation, in seconds.
    pub store_timeout_secs: u64,
    /// SQLite lock wait bound, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let offset_minutes = env_i32("ROLLCALL_UTC_OFFSET_MINUTES", 0).clamp(-840, 840);
        let utc_offset = FixedOffset::east_opt(offset_minutes * 60).unwrap_or_else(|| Utc.fix());

        Self {
            db_path,
            match_threshold: env_f32("ROLLCALL_MATCH_THRESHOLD", 0.6),
            descriptor_len: env_usize("ROLLCALL_DESCRIPTOR_LEN", 128),
            utc_offset,
            store_timeout_secs: env_u64("ROLLCALL_STORE_TIMEOUT_SECS", 5),
            busy_timeout_ms: env_u64("ROLLCALL_BUSY_TIMEOUT_MS", 5000),
        }
    }

    /// Current calendar day under the fixed timezone policy.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.utc_offset).date_naive()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i32(key: &str, default: i32) -> i32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
