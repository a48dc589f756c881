use ledger_core::ParseError;
use thiserror::Error;

use crate::orchestrator::Stage;
use crate::providers::ProviderAccessError;

/// Failure of one pipeline stage for one report file.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("db error: {0}")]
    Db(#[from] ledger_db::DbError),
    #[error("ingest error: {0}")]
    Ingest(#[from] ingest::IngestError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderAccessError),
    #[error("stage {stage} did not finish within {timeout_secs}s")]
    StageTimeout { stage: Stage, timeout_secs: u64 },
    #[error("stage {stage} worker stopped: {message}")]
    Worker { stage: Stage, message: String },
    #[error("file {0} is not part of the manifest")]
    UnknownFile(String),
    #[error("pipeline cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Lock and busy errors are worth another attempt; data problems,
    /// missing files and allocation mismatches are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Db(err) => err.is_transient(),
            Self::Ingest(err) => err.is_transient(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("db error: {0}")]
    Db(#[from] ledger_db::DbError),
    #[error("ingest error: {0}")]
    Ingest(#[from] ingest::IngestError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderAccessError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid value: {0}")]
    Parse(#[from] ParseError),
    #[error("config error: {0}")]
    Config(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
