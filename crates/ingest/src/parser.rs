use std::io::Read;

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use ledger_core::{Provider, Tags};
use ledger_db::{FieldValue, RawTable};
use rayon::prelude::*;

use crate::coerce::coerce_field;
use crate::columns::{TableSchema, schema_for};
use crate::types::{IngestError, Result};

const UTF8_BOM: char = '\u{feff}';
const USAGE_START_COLUMN: &str = "usage_start";

/// Coerced rows of one report, ready to be bound into a bulk insert.
#[derive(Debug, Clone)]
pub struct ParsedReport {
    pub table: RawTable,
    pub columns: Vec<&'static str>,
    pub rows: Vec<Vec<FieldValue>>,
    pub rows_skipped: u64,
    pub fields_nulled: u64,
    pub usage_start: Option<NaiveDate>,
    pub usage_end: Option<NaiveDate>,
}

struct ColumnPlan<'a> {
    schema: &'static TableSchema,
    positions: Vec<Option<usize>>,
    tag_positions: Vec<(usize, String)>,
    injected: Vec<&'a str>,
}

impl<'a> ColumnPlan<'a> {
    fn new(schema: &'static TableSchema, headers: &[String], provider: &'a Provider) -> Self {
        let positions = schema
            .columns
            .iter()
            .map(|spec| {
                headers
                    .iter()
                    .position(|header| header.eq_ignore_ascii_case(spec.header))
            })
            .collect::<Vec<_>>();
        let tag_positions = schema
            .tag_prefix
            .map(|(prefix, _)| {
                headers
                    .iter()
                    .enumerate()
                    .filter_map(|(idx, header)| {
                        header
                            .strip_prefix(prefix)
                            .filter(|key| !key.is_empty())
                            .map(|key| (idx, key.to_string()))
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        // Cluster reports do not name their cluster; rows are stamped with it.
        let injected = match provider.cluster_id() {
            Some(cluster_id) => vec![cluster_id, provider.name.as_str()],
            None => Vec::new(),
        };
        Self {
            schema,
            positions,
            tag_positions,
            injected,
        }
    }

    fn column_names(&self) -> Vec<&'static str> {
        let mut names = self.schema.column_names();
        if !self.injected.is_empty() {
            names.extend(["cluster_id", "cluster_alias"]);
        }
        names
    }

    fn coerce(&self, record: &StringRecord) -> (Vec<FieldValue>, u64) {
        let mut nulled = 0u64;
        let mut row = Vec::with_capacity(self.positions.len() + 3);
        for (spec, position) in self.schema.columns.iter().zip(&self.positions) {
            let Some(raw) = position.and_then(|idx| record.get(idx)) else {
                row.push(FieldValue::Null);
                continue;
            };
            match coerce_field(spec.kind, raw) {
                Some(value) => row.push(value),
                None => {
                    tracing::debug!(
                        column = spec.column,
                        value = raw,
                        "field failed coercion; storing null"
                    );
                    nulled += 1;
                    row.push(FieldValue::Null);
                }
            }
        }
        if self.schema.tag_prefix.is_some() {
            let tags = self
                .tag_positions
                .iter()
                .filter_map(|(idx, key)| {
                    let value = record.get(*idx)?.trim();
                    (!value.is_empty()).then(|| (key.clone(), value.to_string()))
                })
                .collect::<Tags>();
            row.push(FieldValue::Json(tags));
        }
        row.extend(
            self.injected
                .iter()
                .map(|value| FieldValue::Text((*value).to_string())),
        );
        (row, nulled)
    }
}

/// Parse a CSV report for `provider`. Records whose width differs from the
/// header row are skipped; fields that fail coercion become NULL.
pub fn parse_report<R: Read>(reader: R, report_name: &str, provider: &Provider) -> Result<ParsedReport> {
    let mut csv_reader = ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = csv_reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            let header = header.trim();
            if idx == 0 {
                header.trim_start_matches(UTF8_BOM).to_string()
            } else {
                header.to_string()
            }
        })
        .collect::<Vec<_>>();
    if headers.iter().all(|header| header.is_empty()) {
        return Err(IngestError::MissingHeader(report_name.to_string()));
    }

    let schema = schema_for(provider.provider_type, &headers);
    let plan = ColumnPlan::new(schema, &headers, provider);

    let mut records = Vec::new();
    let mut rows_skipped = 0u64;
    for (line, record) in csv_reader.records().enumerate() {
        match record {
            Ok(record) if record.len() == headers.len() => records.push(record),
            Ok(record) => {
                tracing::debug!(
                    file = report_name,
                    record = line + 1,
                    width = record.len(),
                    expected = headers.len(),
                    "skipping malformed record"
                );
                rows_skipped += 1;
            }
            Err(err) if err.is_io_error() => return Err(err.into()),
            Err(err) => {
                tracing::debug!(file = report_name, error = %err, "skipping unreadable record");
                rows_skipped += 1;
            }
        }
    }

    let coerced = records
        .par_iter()
        .map(|record| plan.coerce(record))
        .collect::<Vec<_>>();

    let columns = plan.column_names();
    let start_idx = columns
        .iter()
        .position(|column| *column == USAGE_START_COLUMN);
    let mut rows = Vec::with_capacity(coerced.len());
    let mut fields_nulled = 0u64;
    let mut usage_start: Option<NaiveDate> = None;
    let mut usage_end: Option<NaiveDate> = None;
    for (row, nulled) in coerced {
        fields_nulled += nulled;
        if let Some(FieldValue::Timestamp(start)) = start_idx.and_then(|idx| row.get(idx)) {
            let day = start.date_naive();
            usage_start = Some(usage_start.map_or(day, |current| current.min(day)));
            usage_end = Some(usage_end.map_or(day, |current| current.max(day)));
        }
        rows.push(row);
    }

    Ok(ParsedReport {
        table: schema.table,
        columns,
        rows,
        rows_skipped,
        fields_nulled,
        usage_start,
        usage_end,
    })
}

#[cfg(test)]
mod tests {
    use ledger_core::{Credential, ProviderType, SourceName};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;

    fn provider(provider_type: ProviderType, credential: Credential) -> Provider {
        Provider {
            uuid: Uuid::nil(),
            name: "alias".to_string(),
            provider_type,
            credential,
            source: SourceName::None,
            setup_complete: false,
            created_at: "2019-03-01T00:00:00Z".to_string(),
        }
    }

    fn aws() -> Provider {
        provider(
            ProviderType::AwsLocal,
            Credential::RoleArn {
                role_arn: "arn:aws:iam::111111111111:role/CostManagement".to_string(),
            },
        )
    }

    const AWS_HEADER: &str = "lineItem/UsageStartDate,lineItem/UsageEndDate,lineItem/ProductCode,lineItem/UnblendedCost,resourceTags/user:app,resourceTags/user:env";

    #[test]
    fn folds_tag_headers_into_one_column() {
        let csv = format!(
            "{AWS_HEADER}\n2019-03-01T00:00:00Z,2019-03-01T01:00:00Z,AmazonEC2,1.25,web,\n"
        );
        let parsed = parse_report(csv.as_bytes(), "r.csv", &aws()).expect("parse");

        assert_eq!(parsed.table, RawTable::AwsLineItem);
        assert_eq!(parsed.rows.len(), 1);
        let tags_idx = parsed.columns.len() - 1;
        assert_eq!(parsed.columns[tags_idx], "tags");
        let mut expected = Tags::new();
        expected.insert("app".to_string(), "web".to_string());
        assert_eq!(parsed.rows[0][tags_idx], FieldValue::Json(expected));
        let cost_idx = parsed
            .columns
            .iter()
            .position(|column| *column == "unblended_cost")
            .expect("cost column");
        assert_eq!(parsed.rows[0][cost_idx], FieldValue::Decimal(dec!(1.25)));
    }

    #[test]
    fn counts_bad_fields_and_skips_ragged_records() {
        let csv = format!(
            "{AWS_HEADER}\n\
             2019-03-01T00:00:00Z,2019-03-01T01:00:00Z,AmazonEC2,abc,,\n\
             2019-03-02T00:00:00Z,2019-03-02T01:00:00Z,AmazonEC2\n\
             2019-03-03T00:00:00Z,2019-03-03T01:00:00Z,AmazonS3,2,,\n"
        );
        let parsed = parse_report(csv.as_bytes(), "r.csv", &aws()).expect("parse");

        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows_skipped, 1);
        assert_eq!(parsed.fields_nulled, 1);
        assert_eq!(parsed.usage_start, NaiveDate::from_ymd_opt(2019, 3, 1));
        assert_eq!(parsed.usage_end, NaiveDate::from_ymd_opt(2019, 3, 3));
    }

    #[test]
    fn cluster_rows_carry_cluster_identity() {
        let ocp = provider(
            ProviderType::Ocp,
            Credential::Cluster {
                cluster_id: "my-ocp-cluster-1".to_string(),
            },
        );
        let csv = "interval_start,interval_end,namespace,pod,node,pod_labels\n\
                   2019-03-01 00:00:00 +0000 UTC,2019-03-01 01:00:00 +0000 UTC,billing,pod-1,node-1,label_app:web\n";
        let parsed = parse_report(csv.as_bytes(), "usage.csv", &ocp).expect("parse");

        assert_eq!(parsed.table, RawTable::OcpUsageLineItem);
        let row = &parsed.rows[0];
        assert_eq!(
            row[parsed.columns.len() - 2],
            FieldValue::Text("my-ocp-cluster-1".to_string())
        );
        assert_eq!(row[parsed.columns.len() - 1], FieldValue::Text("alias".to_string()));
    }

    #[test]
    fn empty_report_is_missing_header() {
        let err = parse_report("".as_bytes(), "empty.csv", &aws()).expect_err("no header");
        assert!(matches!(err, IngestError::MissingHeader(_)));
    }
}
