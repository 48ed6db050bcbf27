use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("mirror failed: {0}")]
    Mirror(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("no valid metadata keys in {0}")]
    NoMetadata(String),

    #[error("queue {0} does not exist")]
    InvalidQueue(String),
}

pub type Result<T> = std::result::Result<T, Error>;
