use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use ledger_core::{ProviderType, Tags};
use rust_decimal::Decimal;
use rusqlite::ToSql;
use rusqlite::types::{ToSqlOutput, Value};
use uuid::Uuid;

/// Provider-specific table that receives normalized report rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawTable {
    AwsLineItem,
    AzureLineItem,
    OcpUsageLineItem,
    OcpStorageLineItem,
}

impl RawTable {
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::AwsLineItem => "aws_line_item",
            Self::AzureLineItem => "azure_line_item",
            Self::OcpUsageLineItem => "ocp_usage_line_item",
            Self::OcpStorageLineItem => "ocp_storage_line_item",
        }
    }

    pub fn daily_table_name(&self) -> &'static str {
        match self {
            Self::AwsLineItem => "aws_line_item_daily",
            Self::AzureLineItem => "azure_line_item_daily",
            Self::OcpUsageLineItem => "ocp_usage_line_item_daily",
            Self::OcpStorageLineItem => "ocp_storage_line_item_daily",
        }
    }

    /// Raw tables a provider's reports land in.
    pub fn for_provider(provider_type: ProviderType) -> &'static [RawTable] {
        match provider_type {
            ProviderType::Aws | ProviderType::AwsLocal => &[Self::AwsLineItem],
            ProviderType::Azure | ProviderType::AzureLocal => &[Self::AzureLineItem],
            ProviderType::Ocp => &[Self::OcpUsageLineItem, Self::OcpStorageLineItem],
        }
    }
}

/// A coerced report field ready to bind into an insert.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Json(Tags),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self {
            Self::Null => Value::Null,
            Self::Text(value) => return Ok(ToSqlOutput::from(value.as_str())),
            Self::Integer(value) => Value::Integer(*value),
            Self::Decimal(value) => Value::Text(value.normalize().to_string()),
            Self::Timestamp(value) => {
                Value::Text(value.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            Self::Date(value) => Value::Text(value.format("%Y-%m-%d").to_string()),
            Self::Json(value) => Value::Text(
                serde_json::to_string(value)
                    .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?,
            ),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

/// One report file's worth of coerced rows for a single raw table.
#[derive(Debug, Clone)]
pub struct RawBatch {
    pub table: RawTable,
    pub provider_uuid: Uuid,
    pub manifest_id: i64,
    pub source_file: String,
    pub columns: Vec<&'static str>,
    pub rows: Vec<Vec<FieldValue>>,
}

/// Counters recorded next to a file once its rows are loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub rows_skipped: u64,
    pub fields_nulled: u64,
    pub checksum: Option<String>,
}
