use std::io;
use std::path::PathBuf;

use chrono::NaiveDate;
use ledger_core::{Compression, Provider, TenantSchema};
use ledger_db::{DbError, RawTable};
use serde::Serialize;

/// Everything needed to normalize one report file of a manifest.
#[derive(Debug, Clone)]
pub struct NormalizeRequest {
    pub schema: TenantSchema,
    pub provider: Provider,
    pub manifest_id: i64,
    pub report_name: String,
    pub report_path: PathBuf,
    pub compression: Compression,
}

/// Outcome of loading one report file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizationResult {
    #[serde(serialize_with = "serialize_table")]
    pub table: RawTable,
    pub rows_loaded: usize,
    /// Records the CSV reader could not frame; never loaded.
    pub rows_skipped: u64,
    /// Individual fields stored NULL because they failed coercion.
    pub fields_nulled: u64,
    pub usage_start: Option<NaiveDate>,
    pub usage_end: Option<NaiveDate>,
    pub checksum: String,
}

fn serialize_table<S: serde::Serializer>(table: &RawTable, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(table.table_name())
}

/// Errors emitted by the report normalizer.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("report file not found: {}", .0.display())]
    ReportNotFound(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("report {0} has no header row")]
    MissingHeader(String),
    #[error("manifest error in {}: {message}", .path.display())]
    Manifest { path: PathBuf, message: String },
    #[error("load error: {0}")]
    Load(#[from] DbError),
}

impl IngestError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Load(err) => err.is_transient(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
