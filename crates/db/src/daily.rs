use std::collections::BTreeMap;

use chrono::NaiveDate;
use ledger_core::{FileState, Provider, ProviderType, Tags};
use rust_decimal::Decimal;
use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};
use uuid::Uuid;

use crate::Db;
use crate::error::{DbError, Result};
use crate::helpers::{decimal_text, fmt_date, parse_date, parse_decimal, parse_tags};
use crate::manifests::set_file_status;
use crate::summary::populate_daily_summary;
use crate::types::RawTable;

/// How a raw table collapses into its daily table.
///
/// Rows sharing the day and every `keys` column become one daily row:
/// `sums` are added, `first` keeps the first non-null value in load order,
/// and each `tags` map is merged in load order with later values winning.
struct DailySpec {
    table: RawTable,
    keys: &'static [&'static str],
    first: &'static [&'static str],
    sums: &'static [&'static str],
    tags: &'static [&'static str],
}

const AWS_DAILY: DailySpec = DailySpec {
    table: RawTable::AwsLineItem,
    keys: &["usage_account_id", "product_code", "usage_type", "resource_id"],
    first: &["operation", "availability_zone", "unit", "currency_code"],
    sums: &["usage_amount", "unblended_cost", "blended_cost"],
    tags: &["tags"],
};

const AZURE_DAILY: DailySpec = DailySpec {
    table: RawTable::AzureLineItem,
    keys: &["subscription_guid", "service_name", "resource_location", "instance_id"],
    first: &["resource_type", "currency", "unit_of_measure"],
    sums: &["usage_quantity", "pretax_cost"],
    tags: &["tags"],
};

const OCP_USAGE_DAILY: DailySpec = DailySpec {
    table: RawTable::OcpUsageLineItem,
    keys: &["cluster_id", "namespace", "node", "pod", "resource_id"],
    first: &[
        "cluster_alias",
        "node_capacity_cpu_cores",
        "node_capacity_memory_bytes",
    ],
    sums: &[
        "pod_usage_cpu_core_seconds",
        "pod_request_cpu_core_seconds",
        "pod_limit_cpu_core_seconds",
        "pod_usage_memory_byte_seconds",
        "pod_request_memory_byte_seconds",
        "pod_limit_memory_byte_seconds",
    ],
    tags: &["pod_labels"],
};

const OCP_STORAGE_DAILY: DailySpec = DailySpec {
    table: RawTable::OcpStorageLineItem,
    keys: &[
        "cluster_id",
        "namespace",
        "node",
        "persistentvolumeclaim",
        "persistentvolume",
        "storageclass",
    ],
    first: &["cluster_alias", "persistentvolumeclaim_capacity_bytes"],
    sums: &[
        "persistentvolumeclaim_capacity_byte_seconds",
        "volume_request_storage_byte_seconds",
        "persistentvolumeclaim_usage_byte_seconds",
    ],
    tags: &["persistentvolume_labels", "persistentvolumeclaim_labels"],
};

fn spec_for(table: RawTable) -> &'static DailySpec {
    match table {
        RawTable::AwsLineItem => &AWS_DAILY,
        RawTable::AzureLineItem => &AZURE_DAILY,
        RawTable::OcpUsageLineItem => &OCP_USAGE_DAILY,
        RawTable::OcpStorageLineItem => &OCP_STORAGE_DAILY,
    }
}

/// A daily line item as stored, with its columns by name.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyRow {
    pub table: RawTable,
    pub id: i64,
    pub usage_start: NaiveDate,
    pub usage_end: NaiveDate,
    pub keys: Vec<(String, Option<String>)>,
    pub sums: Vec<(String, Option<Decimal>)>,
    pub tags: Vec<(String, Tags)>,
}

impl DailyRow {
    pub fn key(&self, column: &str) -> Option<&str> {
        self.keys
            .iter()
            .find(|(name, _)| name == column)
            .and_then(|(_, value)| value.as_deref())
    }

    pub fn sum(&self, column: &str) -> Option<Decimal> {
        self.sums
            .iter()
            .find(|(name, _)| name == column)
            .and_then(|(_, value)| *value)
    }
}

/// Counts from rebuilding one file's daily slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DailyRebuild {
    pub deleted: usize,
    pub daily_rows: usize,
    pub summary_rows: usize,
}

#[derive(Default)]
struct Group {
    first: Vec<Value>,
    sums: Vec<Option<Decimal>>,
    tags: Vec<Tags>,
}

impl Db {
    /// Roll raw line items up to one row per key and day for `[start, end]`.
    ///
    /// Existing daily rows in the range are not touched; call
    /// [`Db::delete_daily_range`] first when rebuilding.
    pub fn aggregate_daily(
        &mut self,
        provider_uuid: Uuid,
        provider_type: ProviderType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<usize> {
        let tx = self.write_tx()?;
        let count = aggregate_daily(&tx, provider_uuid, provider_type, start, end)?;
        tx.commit()?;
        Ok(count)
    }

    /// Remove a provider's daily rows, and the correlation rows pointing at
    /// them, for `[start, end]`.
    pub fn delete_daily_range(
        &mut self,
        provider_uuid: Uuid,
        provider_type: ProviderType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<usize> {
        let tx = self.write_tx()?;
        let count = delete_daily_range(&tx, provider_uuid, provider_type, start, end)?;
        tx.commit()?;
        Ok(count)
    }

    /// Rebuild the daily and summary rows a report file covers and move the
    /// file to `aggregated`, atomically.
    pub fn rebuild_daily(
        &mut self,
        provider: &Provider,
        manifest_id: i64,
        report_name: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<DailyRebuild> {
        let tx = self.write_tx()?;
        let deleted = delete_daily_range(&tx, provider.uuid, provider.provider_type, start, end)?;
        let daily_rows =
            aggregate_daily(&tx, provider.uuid, provider.provider_type, start, end)?;
        let summary_rows = populate_daily_summary(&tx, provider, start, end)?;
        set_file_status(&tx, manifest_id, report_name, FileState::Aggregated)?;
        tx.commit()?;
        Ok(DailyRebuild {
            deleted,
            daily_rows,
            summary_rows,
        })
    }

    /// Earliest and latest raw usage day loaded for a provider.
    pub fn usage_period_bounds(
        &self,
        provider_uuid: Uuid,
        provider_type: ProviderType,
    ) -> Result<Option<(NaiveDate, NaiveDate)>> {
        let mut bounds = None;
        for table in RawTable::for_provider(provider_type) {
            let sql = format!(
                r#"
                SELECT MIN(substr(usage_start, 1, 10)), MAX(substr(usage_start, 1, 10))
                FROM {} WHERE provider_uuid = ?1 AND usage_start IS NOT NULL
                "#,
                table.table_name()
            );
            let found: (Option<String>, Option<String>) = self
                .conn
                .query_row(&sql, params![provider_uuid.to_string()], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?;
            bounds = widen(bounds, found)?;
        }
        Ok(bounds)
    }

    /// Earliest and latest usage day among the rows one report file loaded.
    pub fn file_usage_bounds(
        &self,
        provider_type: ProviderType,
        manifest_id: i64,
        source_file: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate)>> {
        let mut bounds = None;
        for table in RawTable::for_provider(provider_type) {
            let sql = format!(
                r#"
                SELECT MIN(substr(usage_start, 1, 10)), MAX(substr(usage_start, 1, 10))
                FROM {} WHERE manifest_id = ?1 AND source_file = ?2 AND usage_start IS NOT NULL
                "#,
                table.table_name()
            );
            let found: (Option<String>, Option<String>) = self
                .conn
                .query_row(&sql, params![manifest_id, source_file], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?;
            bounds = widen(bounds, found)?;
        }
        Ok(bounds)
    }

    pub fn daily_rows_for_day(
        &self,
        provider_uuid: Uuid,
        provider_type: ProviderType,
        day: NaiveDate,
    ) -> Result<Vec<DailyRow>> {
        let mut rows = Vec::new();
        for table in RawTable::for_provider(provider_type) {
            let spec = spec_for(*table);
            let columns = spec
                .keys
                .iter()
                .chain(spec.sums.iter())
                .chain(spec.tags.iter())
                .copied()
                .collect::<Vec<_>>();
            let sql = format!(
                "SELECT id, usage_start, usage_end, {} FROM {} WHERE provider_uuid = ?1 AND usage_start = ?2 ORDER BY id",
                columns.join(", "),
                table.daily_table_name()
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let mut result = stmt.query(params![provider_uuid.to_string(), fmt_date(day)])?;
            while let Some(row) = result.next()? {
                let usage_start: String = row.get(1)?;
                let usage_end: String = row.get(2)?;
                let mut idx = 3;
                let mut keys = Vec::with_capacity(spec.keys.len());
                for column in spec.keys {
                    keys.push((column.to_string(), row.get::<_, Option<String>>(idx)?));
                    idx += 1;
                }
                let mut sums = Vec::with_capacity(spec.sums.len());
                for column in spec.sums {
                    let text: Option<String> = row.get(idx)?;
                    sums.push((column.to_string(), parse_decimal(text.as_deref())?));
                    idx += 1;
                }
                let mut tags = Vec::with_capacity(spec.tags.len());
                for column in spec.tags {
                    let text: Option<String> = row.get(idx)?;
                    tags.push((column.to_string(), parse_tags(text.as_deref())?));
                    idx += 1;
                }
                rows.push(DailyRow {
                    table: *table,
                    id: row.get(0)?,
                    usage_start: parse_date(&usage_start)?,
                    usage_end: parse_date(&usage_end)?,
                    keys,
                    sums,
                    tags,
                });
            }
        }
        Ok(rows)
    }

    /// Exact total of a summed raw column for one provider and day.
    pub fn raw_total_for_day(
        &self,
        table: RawTable,
        provider_uuid: Uuid,
        day: NaiveDate,
        column: &str,
    ) -> Result<Decimal> {
        check_sum_column(table, column)?;
        let sql = format!(
            "SELECT {column} FROM {} WHERE provider_uuid = ?1 AND substr(usage_start, 1, 10) = ?2",
            table.table_name()
        );
        column_total(&self.conn, &sql, provider_uuid, day)
    }

    /// Exact total of a summed daily column for one provider and day.
    pub fn daily_total_for_day(
        &self,
        table: RawTable,
        provider_uuid: Uuid,
        day: NaiveDate,
        column: &str,
    ) -> Result<Decimal> {
        check_sum_column(table, column)?;
        let sql = format!(
            "SELECT {column} FROM {} WHERE provider_uuid = ?1 AND usage_start = ?2",
            table.daily_table_name()
        );
        column_total(&self.conn, &sql, provider_uuid, day)
    }
}

fn check_sum_column(table: RawTable, column: &str) -> Result<()> {
    if spec_for(table).sums.contains(&column) {
        Ok(())
    } else {
        Err(DbError::NotFound(format!(
            "summed column {column} on {}",
            table.table_name()
        )))
    }
}

fn column_total(conn: &Connection, sql: &str, provider_uuid: Uuid, day: NaiveDate) -> Result<Decimal> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params![provider_uuid.to_string(), fmt_date(day)])?;
    let mut total = Decimal::ZERO;
    while let Some(row) = rows.next()? {
        let text: Option<String> = row.get(0)?;
        total += parse_decimal(text.as_deref())?.unwrap_or_default();
    }
    Ok(total)
}

fn widen(
    bounds: Option<(NaiveDate, NaiveDate)>,
    found: (Option<String>, Option<String>),
) -> Result<Option<(NaiveDate, NaiveDate)>> {
    let (Some(min), Some(max)) = found else {
        return Ok(bounds);
    };
    let (min, max) = (parse_date(&min)?, parse_date(&max)?);
    Ok(Some(match bounds {
        Some((start, end)) => (start.min(min), end.max(max)),
        None => (min, max),
    }))
}

pub(crate) fn aggregate_daily(
    conn: &Connection,
    provider_uuid: Uuid,
    provider_type: ProviderType,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<usize> {
    let mut inserted = 0usize;
    for table in RawTable::for_provider(provider_type) {
        inserted += aggregate_table(conn, spec_for(*table), provider_uuid, start, end)?;
    }
    tracing::debug!(
        provider_uuid = %provider_uuid,
        start = %start,
        end = %end,
        rows = inserted,
        "daily rows aggregated"
    );
    Ok(inserted)
}

fn aggregate_table(
    conn: &Connection,
    spec: &DailySpec,
    provider_uuid: Uuid,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<usize> {
    let columns = spec
        .keys
        .iter()
        .chain(spec.first.iter())
        .chain(spec.sums.iter())
        .chain(spec.tags.iter())
        .copied()
        .collect::<Vec<_>>();
    let select = format!(
        r#"
        SELECT substr(usage_start, 1, 10), {}
        FROM {}
        WHERE provider_uuid = ?1
          AND usage_start IS NOT NULL
          AND substr(usage_start, 1, 10) BETWEEN ?2 AND ?3
        ORDER BY id
        "#,
        columns.join(", "),
        spec.table.table_name()
    );

    let mut groups: BTreeMap<(String, Vec<Option<String>>), Group> = BTreeMap::new();
    {
        let mut stmt = conn.prepare(&select)?;
        let mut rows = stmt.query(params![
            provider_uuid.to_string(),
            fmt_date(start),
            fmt_date(end)
        ])?;
        while let Some(row) = rows.next()? {
            let day: String = row.get(0)?;
            let mut idx = 1;
            let mut key = Vec::with_capacity(spec.keys.len());
            for _ in spec.keys {
                key.push(row.get::<_, Option<String>>(idx)?);
                idx += 1;
            }
            let group = groups.entry((day, key)).or_insert_with(|| Group {
                first: vec![Value::Null; spec.first.len()],
                sums: vec![None; spec.sums.len()],
                tags: vec![Tags::new(); spec.tags.len()],
            });
            for slot in group.first.iter_mut() {
                let value: Value = row.get(idx)?;
                if *slot == Value::Null {
                    *slot = value;
                }
                idx += 1;
            }
            for slot in group.sums.iter_mut() {
                let text: Option<String> = row.get(idx)?;
                if let Some(amount) = parse_decimal(text.as_deref())? {
                    *slot = Some(slot.unwrap_or_default() + amount);
                }
                idx += 1;
            }
            for slot in group.tags.iter_mut() {
                let text: Option<String> = row.get(idx)?;
                slot.extend(parse_tags(text.as_deref())?);
                idx += 1;
            }
        }
    }

    let mut target = vec!["provider_uuid", "usage_start", "usage_end"];
    target.extend(columns.iter().copied());
    let placeholders = (1..=target.len())
        .map(|idx| format!("?{idx}"))
        .collect::<Vec<_>>()
        .join(", ");
    let insert = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        spec.table.daily_table_name(),
        target.join(", "),
        placeholders
    );
    let mut stmt = conn.prepare(&insert)?;
    let uuid = provider_uuid.to_string();
    let mut inserted = 0usize;
    for ((day, key), group) in groups {
        let mut values: Vec<Value> = Vec::with_capacity(target.len());
        values.push(Value::Text(uuid.clone()));
        values.push(Value::Text(day.clone()));
        values.push(Value::Text(day));
        values.extend(key.into_iter().map(|value| match value {
            Some(text) => Value::Text(text),
            None => Value::Null,
        }));
        values.extend(group.first);
        values.extend(group.sums.into_iter().map(|sum| match sum {
            Some(amount) => Value::Text(decimal_text(amount)),
            None => Value::Null,
        }));
        for tags in group.tags {
            values.push(Value::Text(serde_json::to_string(&tags)?));
        }
        inserted += stmt.execute(params_from_iter(values))?;
    }
    Ok(inserted)
}

pub(crate) fn delete_daily_range(
    conn: &Connection,
    provider_uuid: Uuid,
    provider_type: ProviderType,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<usize> {
    let uuid = provider_uuid.to_string();
    let (start, end) = (fmt_date(start), fmt_date(end));
    let mut deleted = 0usize;
    for table in RawTable::for_provider(provider_type) {
        let sql = format!(
            "DELETE FROM {} WHERE provider_uuid = ?1 AND usage_start BETWEEN ?2 AND ?3",
            table.daily_table_name()
        );
        deleted += conn.execute(&sql, params![uuid, start, end])?;
    }
    conn.execute(
        r#"
        DELETE FROM ocp_cloud_line_item_daily
        WHERE (cluster_provider_uuid = ?1 OR cloud_provider_uuid = ?1)
          AND usage_start BETWEEN ?2 AND ?3
        "#,
        params![uuid, start, end],
    )?;
    Ok(deleted)
}
