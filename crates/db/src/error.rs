use ledger_core::{CorrelationError, FileState, ParseError};
use rusqlite::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("time parse error: {0}")]
    TimeParse(#[from] chrono::ParseError),
    #[error("decimal parse error: {0}")]
    Decimal(#[from] rust_decimal::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("uuid error: {0}")]
    Uuid(#[from] uuid::Error),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("file {report_name} cannot move from {from} to {to}")]
    InvalidTransition {
        report_name: String,
        from: FileState,
        to: FileState,
    },
}

impl DbError {
    /// Lock contention that is expected to clear on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
