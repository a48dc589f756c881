mod coerce;
mod columns;
mod discovery;
mod parser;
mod pipeline;
mod types;

pub use coerce::{coerce_field, parse_labels, parse_timestamp};
pub use columns::{
    AWS_LINE_ITEM, AZURE_LINE_ITEM, ColumnSpec, ColumnType, OCP_STORAGE_LINE_ITEM,
    OCP_USAGE_LINE_ITEM, TableSchema, schema_for,
};
pub use discovery::{MANIFEST_FILE_NAME, discover_manifests};
pub use parser::{ParsedReport, parse_report};
pub use pipeline::{normalize, remove_processed_file, scratch_path};
pub use types::{IngestError, NormalizationResult, NormalizeRequest, Result};
