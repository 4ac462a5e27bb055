// error.rs — Error types for the ledger.

use thiserror::Error;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The underlying SQLite operation failed. Immutability-trigger aborts
    /// also surface here, as constraint failures raised by the store.
    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A JSON column failed to serialize or parse.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored column held a value that no longer parses (timestamp, uuid,
    /// or enum tag). Only possible if something wrote around the store.
    #[error("corrupt value in column '{column}': {value}")]
    CorruptColumn { column: String, value: String },

    /// An insert collided with an existing manifest_id. The orchestrator
    /// regenerates the id and retries once.
    #[error("manifest id already exists")]
    DuplicateManifest,
}

impl LedgerError {
    /// Classify a raw rusqlite error, promoting manifest primary-key
    /// collisions to [`LedgerError::DuplicateManifest`].
    pub(crate) fn from_insert(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(e, Some(message)) = &err {
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && message.contains("manifests.manifest_id")
            {
                return LedgerError::DuplicateManifest;
            }
        }
        LedgerError::Sqlite(err)
    }
}
