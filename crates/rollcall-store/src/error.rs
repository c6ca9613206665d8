use thiserror::Error;
use uuid::Uuid;

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence failures, split along the retry boundary: `Unavailable`
/// is safe to retry with backoff, everything else is not.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity with email `{0}` already enrolled")]
    DuplicateIdentity(String),
    #[error("identity not found: {0}")]
    IdentityNotFound(Uuid),
    /// The database was busy or locked past the configured wait bound.
    #[error("store unavailable: {0}")]
    Unavailable(rusqlite::Error),
    /// Persisted state failed to parse. Rejected rather than masked.
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
    #[error("sqlite: {0}")]
    Sqlite(rusqlite::Error),
}

impl StoreError {
    /// Whether a caller may retry the failed operation with backoff.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked) => {
                Self::Unavailable(err)
            }
            _ => Self::Sqlite(err),
        }
    }
}

/// Detect a UNIQUE constraint failure on a specific column, e.g.
/// `identities.email`.
pub(crate) fn is_unique_violation(err: &rusqlite::Error, column: &str) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, Some(message))
            if code.code == rusqlite::ErrorCode::ConstraintViolation && message.contains(column)
    )
}
