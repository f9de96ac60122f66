//! Error types for status store operations.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors returned by [`StatusStore`](super::StatusStore) and
/// [`KillRegistry`](super::KillRegistry) operations.
///
/// A missing record is never an error; lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum StatusStoreError {
    /// Another writer inserted the same uuid between our lookup and insert.
    #[error("Status {uuid} was created concurrently by another writer")]
    Conflict { uuid: String },

    /// The backing database can't be reached (busy, locked, unopenable, I/O failure).
    #[error("Status store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("Invalid job options: {0}")]
    InvalidOptions(#[from] serde_json::Error),
}

pub type StatusResult<T> = Result<T, StatusStoreError>;

impl StatusStoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StatusStoreError::Conflict { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StatusStoreError::Unavailable { .. })
    }

    pub(crate) fn lock_poisoned() -> Self {
        StatusStoreError::Unavailable {
            reason: "connection lock poisoned".to_string(),
        }
    }

    /// Classify an insert failure, turning a uniqueness violation into [`Self::Conflict`].
    pub(crate) fn from_insert(uuid: &str, err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
                StatusStoreError::Conflict {
                    uuid: uuid.to_string(),
                }
            }
            _ => err.into(),
        }
    }
}

impl From<rusqlite::Error> for StatusStoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(
                    e.code,
                    ErrorCode::DatabaseBusy
                        | ErrorCode::DatabaseLocked
                        | ErrorCode::CannotOpen
                        | ErrorCode::SystemIoFailure
                        | ErrorCode::NotADatabase
                ) =>
            {
                StatusStoreError::Unavailable {
                    reason: err.to_string(),
                }
            }
            _ => StatusStoreError::Database(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    fn sqlite_failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(code), None)
    }

    #[test]
    fn test_busy_and_locked_are_unavailable() {
        assert!(StatusStoreError::from(sqlite_failure(ffi::SQLITE_BUSY)).is_unavailable());
        assert!(StatusStoreError::from(sqlite_failure(ffi::SQLITE_LOCKED)).is_unavailable());
        assert!(StatusStoreError::from(sqlite_failure(ffi::SQLITE_CANTOPEN)).is_unavailable());
        assert!(StatusStoreError::from(sqlite_failure(ffi::SQLITE_IOERR)).is_unavailable());
    }

    #[test]
    fn test_other_failures_are_database_errors() {
        let err = StatusStoreError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, StatusStoreError::Database(_)));
        assert!(!err.is_unavailable());
    }

    #[test]
    fn test_constraint_violation_on_insert_is_conflict() {
        let err = StatusStoreError::from_insert("abc", sqlite_failure(ffi::SQLITE_CONSTRAINT));
        assert!(err.is_conflict());
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_insert_busy_stays_unavailable() {
        let err = StatusStoreError::from_insert("abc", sqlite_failure(ffi::SQLITE_BUSY));
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_lock_poisoned_is_unavailable() {
        assert!(StatusStoreError::lock_poisoned().is_unavailable());
    }
}
