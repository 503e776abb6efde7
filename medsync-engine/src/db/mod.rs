//! Database operations for medsync-engine
//!
//! Free-function query modules per table. Schema creation lives in
//! medsync-common so tests can initialize in-memory databases the same
//! way the binary does.

pub mod checkpoints;
pub mod jobs;
pub mod locks;
pub mod records;

use crate::error::SyncError;

/// Map a database error onto the engine taxonomy
///
/// SQLITE_BUSY / SQLITE_LOCKED during a batch write is the SQLite shape of
/// a write conflict; everything else stays a database error.
pub fn classify_db_error(error: sqlx::Error) -> SyncError {
    if let sqlx::Error::Database(ref db_error) = error {
        let message = db_error.message().to_lowercase();
        if message.contains("locked") || message.contains("busy") {
            return SyncError::WriteConflict(db_error.message().to_string());
        }
    }
    SyncError::Database(error)
}
