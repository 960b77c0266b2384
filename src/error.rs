//! Error type shared by the board engine and its adapters.

use thiserror::Error;

pub type BoardResult<T> = Result<T, BoardError>;

#[derive(Debug, Error)]
pub enum BoardError {
    /// A column's status key has no backend status identifier.
    #[error("unknown status '{0}'")]
    UnknownStatus(String),

    #[error("order not found: {0}")]
    UnknownOrder(String),

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    /// The status update was rejected by the order backend.
    #[error("backend rejected update: {0}")]
    Backend(String),

    /// A status update for this order is already in flight.
    #[error("order is busy: {0}")]
    Busy(String),

    #[error("sqlite: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("http: {0}")]
    Http(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("lock poisoned: {0}")]
    Lock(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl BoardError {
    /// Whether the error came from the order backend rather than local state.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Http(_))
    }
}
