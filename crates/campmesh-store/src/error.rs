use thiserror::Error;

/// Everything that can go wrong between the engine snapshot and the SQLite file.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("No platform data directory for the camp database")]
    NoDataDir,

    #[error("Cannot prepare database location: {0}")]
    Io(#[from] std::io::Error),

    /// Lookup by id matched no row.
    #[error("No such record")]
    NotFound,

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Stored id is not a UUID: {0}")]
    Uuid(#[from] uuid::Error),

    #[error("Stored timestamp is not RFC 3339: {0}")]
    ChronoParse(#[from] chrono::ParseError),

    /// `read_by` and similar JSON columns.
    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unknown enum tag, or a setting the snapshot needs is missing.
    #[error("Invalid stored value: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
