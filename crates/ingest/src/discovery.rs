use std::fs;
use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDate;
use ledger_core::{Compression, ManifestInput};
use serde::Deserialize;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::types::{IngestError, Result};

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestFile {
    assembly_id: String,
    billing_period: BillingPeriod,
    report_keys: Vec<String>,
    #[serde(default)]
    compression: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BillingPeriod {
    start: String,
    end: String,
}

/// A billing period bound is either a plain date (inclusive) or a report
/// stamp such as `20190401T000000.000Z`, where a midnight end bound is
/// exclusive.
fn parse_period_bound(value: &str, is_end: bool) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(day) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(day);
    }
    let (date, time) = value.split_once('T')?;
    if date.len() != 8 || !date.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    let day = NaiveDate::from_ymd_opt(
        date[0..4].parse().ok()?,
        date[4..6].parse().ok()?,
        date[6..8].parse().ok()?,
    )?;
    let midnight = time
        .trim_end_matches('Z')
        .bytes()
        .all(|byte| byte == b'0' || byte == b'.');
    if is_end && midnight {
        return day.pred_opt();
    }
    Some(day)
}

fn report_file_name(key: &str) -> Option<String> {
    Path::new(key)
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

fn infer_compression(report_files: &[String]) -> Compression {
    if report_files.iter().any(|name| name.ends_with(".gz")) {
        Compression::Gzip
    } else {
        Compression::None
    }
}

fn read_manifest(path: &Path, provider_uuid: Uuid) -> Result<ManifestInput> {
    let manifest_error = |message: String| IngestError::Manifest {
        path: path.to_path_buf(),
        message,
    };
    let contents = fs::read_to_string(path)?;
    let file: ManifestFile =
        serde_json::from_str(&contents).map_err(|err| manifest_error(err.to_string()))?;
    let billing_period_start = parse_period_bound(&file.billing_period.start, false)
        .ok_or_else(|| manifest_error(format!("bad period start {}", file.billing_period.start)))?;
    let billing_period_end = parse_period_bound(&file.billing_period.end, true)
        .ok_or_else(|| manifest_error(format!("bad period end {}", file.billing_period.end)))?;
    if billing_period_end < billing_period_start {
        return Err(manifest_error("billing period ends before it starts".to_string()));
    }
    let report_files = file
        .report_keys
        .iter()
        .filter_map(|key| report_file_name(key))
        .collect::<Vec<_>>();
    if report_files.is_empty() {
        return Err(manifest_error("manifest lists no report files".to_string()));
    }
    let compression = match file.compression.as_deref() {
        Some(value) => {
            Compression::from_str(value).map_err(|err| manifest_error(err.to_string()))?
        }
        None => infer_compression(&report_files),
    };
    let report_dir = path
        .parent()
        .map(|dir| dir.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(ManifestInput {
        provider_uuid,
        assembly_id: file.assembly_id,
        billing_period_start,
        billing_period_end,
        report_dir,
        report_files,
        compression,
    })
}

/// Walk a local report directory and describe every manifest found in it.
/// Unreadable or malformed manifests are logged and skipped.
pub fn discover_manifests(dir: &Path, provider_uuid: Uuid) -> Result<Vec<ManifestInput>> {
    if !dir.is_dir() {
        return Err(IngestError::ReportNotFound(dir.to_path_buf()));
    }
    let mut manifests = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false).into_iter() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || entry.file_name() != MANIFEST_FILE_NAME {
            continue;
        }
        match read_manifest(entry.path(), provider_uuid) {
            Ok(manifest) => manifests.push(manifest),
            Err(err) => {
                tracing::warn!(path = %entry.path().display(), error = %err, "skipping manifest");
            }
        }
    }
    manifests.sort_by(|a, b| {
        (a.billing_period_start, &a.assembly_id).cmp(&(b.billing_period_start, &b.assembly_id))
    });
    tracing::info!(
        provider_uuid = %provider_uuid,
        dir = %dir.display(),
        manifests = manifests.len(),
        "manifest discovery finished"
    );
    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_bounds_accept_dates_and_report_stamps() {
        assert_eq!(
            parse_period_bound("2019-03-31", true),
            NaiveDate::from_ymd_opt(2019, 3, 31)
        );
        assert_eq!(
            parse_period_bound("20190301T000000.000Z", false),
            NaiveDate::from_ymd_opt(2019, 3, 1)
        );
        assert_eq!(
            parse_period_bound("20190401T000000.000Z", true),
            NaiveDate::from_ymd_opt(2019, 3, 31)
        );
        assert_eq!(parse_period_bound("March", false), None);
    }

    #[test]
    fn compression_follows_report_extension() {
        assert_eq!(
            infer_compression(&["a.csv.gz".to_string()]),
            Compression::Gzip
        );
        assert_eq!(infer_compression(&["a.csv".to_string()]), Compression::None);
        assert_eq!(
            report_file_name("/cur/20190301-20190401/abc/cur-1.csv.gz").as_deref(),
            Some("cur-1.csv.gz")
        );
    }
}
