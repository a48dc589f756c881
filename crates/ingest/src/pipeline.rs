use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use flate2::read::GzDecoder;
use ledger_core::Compression;
use ledger_db::{Db, LoadStats, RawBatch};
use sha2::{Digest, Sha256};

use crate::parser::parse_report;
use crate::types::{IngestError, NormalizationResult, NormalizeRequest, Result};

const SCRATCH_SUFFIX: &str = ".decompressed";

/// Sibling path a compressed report is decompressed into.
pub fn scratch_path(report_path: &Path) -> PathBuf {
    let mut name = report_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(SCRATCH_SUFFIX);
    report_path.with_file_name(name)
}

fn file_checksum(path: &Path) -> io::Result<String> {
    let mut file = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn decompress(report_path: &Path, scratch: &Path) -> io::Result<()> {
    let mut decoder = GzDecoder::new(BufReader::new(File::open(report_path)?));
    let mut out = BufWriter::new(File::create(scratch)?);
    io::copy(&mut decoder, &mut out)?;
    out.flush()
}

/// Parse one report file and replace its rows in the provider's raw table.
/// The file moves to `normalized` in the same transaction as the load.
pub fn normalize(db: &mut Db, request: &NormalizeRequest) -> Result<NormalizationResult> {
    let started = Instant::now();
    let path = &request.report_path;
    if !path.is_file() {
        return Err(IngestError::ReportNotFound(path.clone()));
    }
    let checksum = file_checksum(path)?;

    let (parse_path, scratch) = match request.compression {
        Compression::Gzip => {
            let scratch = scratch_path(path);
            decompress(path, &scratch)?;
            (scratch.clone(), Some(scratch))
        }
        Compression::None => (path.clone(), None),
    };
    let parsed = parse_report(
        BufReader::new(File::open(&parse_path)?),
        &request.report_name,
        &request.provider,
    )?;

    let batch = RawBatch {
        table: parsed.table,
        provider_uuid: request.provider.uuid,
        manifest_id: request.manifest_id,
        source_file: request.report_name.clone(),
        columns: parsed.columns,
        rows: parsed.rows,
    };
    let stats = LoadStats {
        rows_skipped: parsed.rows_skipped,
        fields_nulled: parsed.fields_nulled,
        checksum: Some(checksum.clone()),
    };
    let rows_loaded = db.load_report_rows(&request.report_name, &[batch], &stats)?;

    if let Some(scratch) = scratch {
        if let Err(err) = fs::remove_file(&scratch) {
            tracing::warn!(path = %scratch.display(), error = %err, "failed to remove scratch file");
        }
    }
    if parsed.fields_nulled > 0 || parsed.rows_skipped > 0 {
        tracing::warn!(
            schema = request.schema.as_str(),
            manifest_id = request.manifest_id,
            file = request.report_name.as_str(),
            fields_nulled = parsed.fields_nulled,
            rows_skipped = parsed.rows_skipped,
            "report loaded with dropped values"
        );
    }
    tracing::info!(
        schema = request.schema.as_str(),
        provider_uuid = %request.provider.uuid,
        manifest_id = request.manifest_id,
        file = request.report_name.as_str(),
        table = parsed.table.table_name(),
        rows = rows_loaded,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "report normalized"
    );

    Ok(NormalizationResult {
        table: parsed.table,
        rows_loaded,
        rows_skipped: parsed.rows_skipped,
        fields_nulled: parsed.fields_nulled,
        usage_start: parsed.usage_start,
        usage_end: parsed.usage_end,
        checksum,
    })
}

/// Remove a processed report and any scratch file left next to it.
/// Returns whether the report itself was removed.
pub fn remove_processed_file(report_path: &Path) -> Result<bool> {
    let scratch = scratch_path(report_path);
    if scratch.exists() {
        fs::remove_file(&scratch)?;
    }
    match fs::remove_file(report_path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_file_sits_next_to_report() {
        let path = Path::new("/data/reports/cur-1.csv.gz");
        assert_eq!(
            scratch_path(path),
            PathBuf::from("/data/reports/cur-1.csv.gz.decompressed")
        );
    }
}
