use std::str::FromStr;

use chrono::{NaiveDate, SecondsFormat, Utc};
use ledger_core::{FileStats, Manifest, Provider, Tags};
use rust_decimal::Decimal;
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use crate::error::Result;

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn fmt_date(day: NaiveDate) -> String {
    day.format(DATE_FORMAT).to_string()
}

pub(crate) fn parse_date(value: &str) -> Result<NaiveDate> {
    Ok(NaiveDate::parse_from_str(value, DATE_FORMAT)?)
}

pub(crate) fn decimal_text(value: Decimal) -> String {
    value.normalize().to_string()
}

pub(crate) fn parse_decimal(value: Option<&str>) -> Result<Option<Decimal>> {
    match value {
        Some(text) if !text.is_empty() => Ok(Some(Decimal::from_str(text)?)),
        _ => Ok(None),
    }
}

pub(crate) fn parse_tags(value: Option<&str>) -> Result<Tags> {
    match value {
        Some(text) if !text.is_empty() => Ok(serde_json::from_str(text)?),
        _ => Ok(Tags::new()),
    }
}

fn conversion<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parsed<T>(row: &Row<'_>, idx: usize) -> std::result::Result<T, rusqlite::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse::<T>().map_err(|err| conversion(idx, err))
}

fn json<T>(row: &Row<'_>, idx: usize) -> std::result::Result<T, rusqlite::Error>
where
    T: serde::de::DeserializeOwned,
{
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|err| conversion(idx, err))
}

fn date(row: &Row<'_>, idx: usize) -> std::result::Result<NaiveDate, rusqlite::Error> {
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, DATE_FORMAT).map_err(|err| conversion(idx, err))
}

pub(crate) const PROVIDER_COLUMNS: &str =
    "uuid, name, provider_type, credential, source, setup_complete, created_at";

pub(crate) fn row_to_provider(row: &Row<'_>) -> std::result::Result<Provider, rusqlite::Error> {
    Ok(Provider {
        uuid: parsed::<Uuid>(row, 0)?,
        name: row.get(1)?,
        provider_type: parsed(row, 2)?,
        credential: json(row, 3)?,
        source: json(row, 4)?,
        setup_complete: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
    })
}

pub(crate) const MANIFEST_COLUMNS: &str = r#"
  id, provider_uuid, assembly_id, billing_period_start, billing_period_end,
  report_dir, report_files, compression, num_total_files, num_processed_files,
  manifest_creation_datetime, manifest_updated_datetime
"#;

pub(crate) fn row_to_manifest(row: &Row<'_>) -> std::result::Result<Manifest, rusqlite::Error> {
    Ok(Manifest {
        id: row.get(0)?,
        provider_uuid: parsed::<Uuid>(row, 1)?,
        assembly_id: row.get(2)?,
        billing_period_start: date(row, 3)?,
        billing_period_end: date(row, 4)?,
        report_dir: row.get(5)?,
        report_files: json(row, 6)?,
        compression: parsed(row, 7)?,
        num_total_files: row.get::<_, i64>(8)? as u32,
        num_processed_files: row.get::<_, i64>(9)? as u32,
        manifest_creation_datetime: row.get(10)?,
        manifest_updated_datetime: row.get(11)?,
    })
}

pub(crate) const FILE_STATS_COLUMNS: &str = r#"
  manifest_id, report_name, status, committed_state, attempts,
  last_started_datetime, last_completed_datetime, rows_loaded, rows_skipped,
  fields_nulled, checksum, last_error
"#;

pub(crate) fn row_to_file_stats(row: &Row<'_>) -> std::result::Result<FileStats, rusqlite::Error> {
    Ok(FileStats {
        manifest_id: row.get(0)?,
        report_name: row.get(1)?,
        status: parsed(row, 2)?,
        committed_state: parsed(row, 3)?,
        attempts: row.get::<_, i64>(4)? as u32,
        last_started_datetime: row.get(5)?,
        last_completed_datetime: row.get(6)?,
        rows_loaded: row.get::<_, i64>(7)? as u64,
        rows_skipped: row.get::<_, i64>(8)? as u64,
        fields_nulled: row.get::<_, i64>(9)? as u64,
        checksum: row.get(10)?,
        last_error: row.get(11)?,
    })
}
