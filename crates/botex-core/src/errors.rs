use crate::auth::StoreError;

/// Core error type for the dispatcher.
///
/// Adapter crates map their transport errors into `External` so the core can
/// log and report failures uniformly. Denials and capacity limits are not
/// errors; they travel as values.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),

    #[error("command failed: {0}")]
    Command(String),
}

pub type Result<T> = std::result::Result<T, Error>;
