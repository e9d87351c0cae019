//! Error types for EarthFS operations

/// Structured error kinds shared by the ingestion engine and the pull
/// pipeline.
///
/// `KeyExists` is load-bearing: the index writer treats it as success on
/// secondary-index rows (idempotent re-ingest) and as fatal on the primary
/// meta-file row.
#[derive(Debug, thiserror::Error)]
pub enum EfsError {
    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("key already exists")]
    KeyExists,

    #[error("invalid content URI: {0}")]
    InvalidUri(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("corrupt index entry: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Config(String),
}
