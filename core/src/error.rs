use std::path::PathBuf;

use thiserror::Error;

/// Structural failures of a store. Missing records are never an error: update
/// and remove on an unknown id are silent no-ops.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open store at {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to migrate store schema: {0}")]
    Migration(#[source] rusqlite::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("timestamp {0} cannot be stored")]
    TimestampOutOfRange(chrono::DateTime<chrono::Utc>),

    #[error("sync is disabled: the store was opened without a sync container")]
    SyncDisabled,

    #[error("store lock poisoned")]
    LockPoisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Why a persisted or synced record could not be turned back into an entity.
/// Read paths log these and skip the record.
#[derive(Debug, Error)]
pub(crate) enum DecodeError {
    #[error("invalid uuid '{0}'")]
    Uuid(String),

    #[error("timestamp out of range: {0}")]
    Timestamp(i64),

    #[error(transparent)]
    Variant(#[from] crate::models::UnknownVariant),

    #[error("invalid JSON column: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unreadable column: {0}")]
    Column(#[from] rusqlite::Error),
}
