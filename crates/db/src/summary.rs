use std::collections::BTreeMap;

use chrono::NaiveDate;
use ledger_core::{ClusterMetrics, DEFAULT_COST_UNITS, DailySummary, Provider, ProviderType};
use rust_decimal::Decimal;
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use crate::Db;
use crate::error::Result;
use crate::helpers::{decimal_text, fmt_date, parse_date, parse_decimal};

const DEFAULT_USAGE_UNITS: &str = "Hrs";
const CLUSTER_USAGE_UNITS: &str = "Core-Hours";
const SECONDS_PER_HOUR: Decimal = Decimal::from_parts(3600, 0, 0, false, 0);
const BYTES_PER_GIGABYTE: Decimal = Decimal::from_parts(1_073_741_824, 0, 0, false, 0);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SummaryKey {
    day: String,
    account: String,
    dimension: String,
    resource_type: String,
    cost_units: String,
    usage_units: String,
}

#[derive(Debug, Clone, Default)]
struct SummaryTotals {
    infrastructure_cost: Decimal,
    usage: Decimal,
    cluster: Option<ClusterTotals>,
}

/// Raw second and byte-second sums of a cluster namespace, converted once
/// the group is complete.
#[derive(Debug, Clone, Default)]
struct ClusterTotals {
    usage_cpu_seconds: Decimal,
    request_cpu_seconds: Decimal,
    limit_cpu_seconds: Decimal,
    usage_memory_byte_seconds: Decimal,
    request_memory_byte_seconds: Decimal,
    limit_memory_byte_seconds: Decimal,
    /// Largest capacity seen per node: (cores, bytes).
    nodes: BTreeMap<String, (Decimal, Decimal)>,
}

impl ClusterTotals {
    fn metrics(&self) -> ClusterMetrics {
        let hours = |seconds: Decimal| seconds / SECONDS_PER_HOUR;
        let gigabyte_hours = |byte_seconds: Decimal| byte_seconds / SECONDS_PER_HOUR / BYTES_PER_GIGABYTE;
        ClusterMetrics {
            pod_usage_cpu_core_hours: hours(self.usage_cpu_seconds),
            pod_request_cpu_core_hours: hours(self.request_cpu_seconds),
            pod_limit_cpu_core_hours: hours(self.limit_cpu_seconds),
            pod_usage_memory_gigabyte_hours: gigabyte_hours(self.usage_memory_byte_seconds),
            pod_request_memory_gigabyte_hours: gigabyte_hours(self.request_memory_byte_seconds),
            pod_limit_memory_gigabyte_hours: gigabyte_hours(self.limit_memory_byte_seconds),
            node_capacity_cpu_cores: self.nodes.values().map(|(cores, _)| *cores).sum(),
            node_capacity_memory_gigabytes: self
                .nodes
                .values()
                .map(|(_, bytes)| *bytes / BYTES_PER_GIGABYTE)
                .sum(),
        }
    }
}

impl Db {
    /// Rebuild a provider's summary rows for `[start, end]`.
    pub fn populate_daily_summary(
        &mut self,
        provider: &Provider,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<usize> {
        let tx = self.write_tx()?;
        let count = populate_daily_summary(&tx, provider, start, end)?;
        tx.commit()?;
        Ok(count)
    }

    pub fn summary_rows(&self, provider_uuid: Option<Uuid>) -> Result<Vec<DailySummary>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT provider_uuid, source, usage_start, usage_end, account, dimension, resource_type,
                   cost, infrastructure_cost, derived_cost, usage, cost_units, usage_units,
                   pod_usage_cpu_core_hours, pod_request_cpu_core_hours, pod_limit_cpu_core_hours,
                   pod_usage_memory_gigabyte_hours, pod_request_memory_gigabyte_hours,
                   pod_limit_memory_gigabyte_hours, node_capacity_cpu_cores,
                   node_capacity_memory_gigabytes
            FROM line_item_daily_summary
            WHERE (?1 IS NULL OR provider_uuid = ?1)
            ORDER BY usage_start, source, account, dimension, resource_type, id
            "#,
        )?;
        let mut rows = stmt.query(params![provider_uuid.map(|uuid| uuid.to_string())])?;
        let mut summaries = Vec::new();
        while let Some(row) = rows.next()? {
            summaries.push(row_to_summary(row)?);
        }
        Ok(summaries)
    }
}

fn row_to_summary(row: &Row<'_>) -> Result<DailySummary> {
    let provider_uuid: String = row.get(0)?;
    let usage_start: String = row.get(2)?;
    let usage_end: String = row.get(3)?;
    let amount = |idx: usize| -> Result<Decimal> {
        let text: String = row.get(idx)?;
        Ok(parse_decimal(Some(&text))?.unwrap_or_default())
    };
    let metric = |idx: usize| -> Result<Option<Decimal>> {
        let text: Option<String> = row.get(idx)?;
        parse_decimal(text.as_deref())
    };
    let cluster_metrics = match metric(13)? {
        Some(pod_usage_cpu_core_hours) => Some(ClusterMetrics {
            pod_usage_cpu_core_hours,
            pod_request_cpu_core_hours: metric(14)?.unwrap_or_default(),
            pod_limit_cpu_core_hours: metric(15)?.unwrap_or_default(),
            pod_usage_memory_gigabyte_hours: metric(16)?.unwrap_or_default(),
            pod_request_memory_gigabyte_hours: metric(17)?.unwrap_or_default(),
            pod_limit_memory_gigabyte_hours: metric(18)?.unwrap_or_default(),
            node_capacity_cpu_cores: metric(19)?.unwrap_or_default(),
            node_capacity_memory_gigabytes: metric(20)?.unwrap_or_default(),
        }),
        None => None,
    };
    Ok(DailySummary {
        provider_uuid: provider_uuid.parse()?,
        source: row.get(1)?,
        usage_start: parse_date(&usage_start)?,
        usage_end: parse_date(&usage_end)?,
        account: row.get(4)?,
        dimension: row.get(5)?,
        resource_type: row.get(6)?,
        cost: amount(7)?,
        infrastructure_cost: amount(8)?,
        derived_cost: amount(9)?,
        usage: amount(10)?,
        cost_units: row.get(11)?,
        usage_units: row.get(12)?,
        cluster_metrics,
    })
}

pub(crate) fn populate_daily_summary(
    conn: &Connection,
    provider: &Provider,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<usize> {
    let uuid = provider.uuid.to_string();
    let range = (fmt_date(start), fmt_date(end));
    conn.execute(
        "DELETE FROM line_item_daily_summary WHERE provider_uuid = ?1 AND usage_start BETWEEN ?2 AND ?3",
        params![uuid, range.0, range.1],
    )?;

    let groups = match provider.provider_type {
        ProviderType::Aws | ProviderType::AwsLocal => cloud_groups(
            conn,
            r#"
            SELECT usage_start, usage_account_id, product_code, usage_type, currency_code, unit,
                   unblended_cost, usage_amount
            FROM aws_line_item_daily
            WHERE provider_uuid = ?1 AND usage_start BETWEEN ?2 AND ?3
            "#,
            &uuid,
            &range,
        )?,
        ProviderType::Azure | ProviderType::AzureLocal => cloud_groups(
            conn,
            r#"
            SELECT usage_start, subscription_guid, service_name, resource_type, currency,
                   unit_of_measure, pretax_cost, usage_quantity
            FROM azure_line_item_daily
            WHERE provider_uuid = ?1 AND usage_start BETWEEN ?2 AND ?3
            "#,
            &uuid,
            &range,
        )?,
        ProviderType::Ocp => cluster_groups(conn, &uuid, &range)?,
    };

    let mut stmt = conn.prepare(
        r#"
        INSERT INTO line_item_daily_summary (
          provider_uuid, source, usage_start, usage_end, account, dimension, resource_type,
          cost, infrastructure_cost, derived_cost, usage, cost_units, usage_units,
          pod_usage_cpu_core_hours, pod_request_cpu_core_hours, pod_limit_cpu_core_hours,
          pod_usage_memory_gigabyte_hours, pod_request_memory_gigabyte_hours,
          pod_limit_memory_gigabyte_hours, node_capacity_cpu_cores, node_capacity_memory_gigabytes
        ) VALUES (?1, ?2, ?3, ?3, ?4, ?5, ?6, ?7, ?7, ?8, ?9, ?10, ?11,
                  ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
        "#,
    )?;
    let zero = decimal_text(Decimal::ZERO);
    let mut inserted = 0usize;
    for (key, totals) in groups {
        let metrics = totals.cluster.as_ref().map(ClusterTotals::metrics);
        let metrics = metrics.as_ref();
        let text = |value: Option<Decimal>| value.map(decimal_text);
        inserted += stmt.execute(params![
            uuid,
            provider.provider_type.as_str(),
            key.day,
            key.account,
            key.dimension,
            key.resource_type,
            decimal_text(totals.infrastructure_cost),
            zero,
            decimal_text(totals.usage),
            key.cost_units,
            key.usage_units,
            text(metrics.map(|m| m.pod_usage_cpu_core_hours)),
            text(metrics.map(|m| m.pod_request_cpu_core_hours)),
            text(metrics.map(|m| m.pod_limit_cpu_core_hours)),
            text(metrics.map(|m| m.pod_usage_memory_gigabyte_hours)),
            text(metrics.map(|m| m.pod_request_memory_gigabyte_hours)),
            text(metrics.map(|m| m.pod_limit_memory_gigabyte_hours)),
            text(metrics.map(|m| m.node_capacity_cpu_cores)),
            text(metrics.map(|m| m.node_capacity_memory_gigabytes)),
        ])?;
    }
    tracing::debug!(
        provider_uuid = %provider.uuid,
        source = provider.provider_type.as_str(),
        rows = inserted,
        "daily summary populated"
    );
    Ok(inserted)
}

fn non_empty(value: Option<String>, fallback: &str) -> String {
    value
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// Cloud rows: one per (day, account, service, resource type, units).
fn cloud_groups(
    conn: &Connection,
    sql: &str,
    uuid: &str,
    range: &(String, String),
) -> Result<BTreeMap<SummaryKey, SummaryTotals>> {
    let mut groups: BTreeMap<SummaryKey, SummaryTotals> = BTreeMap::new();
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params![uuid, range.0, range.1])?;
    while let Some(row) = rows.next()? {
        let key = SummaryKey {
            day: row.get(0)?,
            account: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            dimension: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            resource_type: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            cost_units: non_empty(row.get(4)?, DEFAULT_COST_UNITS),
            usage_units: non_empty(row.get(5)?, DEFAULT_USAGE_UNITS),
        };
        let cost: Option<String> = row.get(6)?;
        let usage: Option<String> = row.get(7)?;
        let totals = groups.entry(key).or_default();
        totals.infrastructure_cost += parse_decimal(cost.as_deref())?.unwrap_or_default();
        totals.usage += parse_decimal(usage.as_deref())?.unwrap_or_default();
    }
    Ok(groups)
}

/// Cluster rows: one per (cluster, namespace, day) seen in either usage or
/// storage, with pod metrics in core-hours and gigabyte-hours and
/// infrastructure cost from any correlation already stored for that day.
fn cluster_groups(
    conn: &Connection,
    uuid: &str,
    range: &(String, String),
) -> Result<BTreeMap<SummaryKey, SummaryTotals>> {
    let key = |day: String, cluster: Option<String>, namespace: Option<String>| SummaryKey {
        day,
        account: cluster.unwrap_or_default(),
        dimension: namespace.unwrap_or_default(),
        resource_type: String::new(),
        cost_units: DEFAULT_COST_UNITS.to_string(),
        usage_units: CLUSTER_USAGE_UNITS.to_string(),
    };
    let mut groups: BTreeMap<SummaryKey, SummaryTotals> = BTreeMap::new();
    {
        let mut stmt = conn.prepare(
            r#"
            SELECT usage_start, cluster_id, namespace, node,
                   pod_usage_cpu_core_seconds, pod_request_cpu_core_seconds,
                   pod_limit_cpu_core_seconds, pod_usage_memory_byte_seconds,
                   pod_request_memory_byte_seconds, pod_limit_memory_byte_seconds,
                   node_capacity_cpu_cores, node_capacity_memory_bytes
            FROM ocp_usage_line_item_daily
            WHERE provider_uuid = ?1 AND usage_start BETWEEN ?2 AND ?3
            "#,
        )?;
        let mut rows = stmt.query(params![uuid, range.0, range.1])?;
        while let Some(row) = rows.next()? {
            let value = |idx: usize| -> Result<Decimal> {
                let text: Option<String> = row.get(idx)?;
                Ok(parse_decimal(text.as_deref())?.unwrap_or_default())
            };
            let totals = groups
                .entry(key(row.get(0)?, row.get(1)?, row.get(2)?))
                .or_default();
            let cluster = totals.cluster.get_or_insert_with(ClusterTotals::default);
            cluster.usage_cpu_seconds += value(4)?;
            cluster.request_cpu_seconds += value(5)?;
            cluster.limit_cpu_seconds += value(6)?;
            cluster.usage_memory_byte_seconds += value(7)?;
            cluster.request_memory_byte_seconds += value(8)?;
            cluster.limit_memory_byte_seconds += value(9)?;
            let node: Option<String> = row.get(3)?;
            let capacity = cluster.nodes.entry(node.unwrap_or_default()).or_default();
            capacity.0 = capacity.0.max(value(10)?);
            capacity.1 = capacity.1.max(value(11)?);
            totals.usage = cluster.usage_cpu_seconds / SECONDS_PER_HOUR;
        }
    }
    {
        let mut stmt = conn.prepare(
            r#"
            SELECT DISTINCT usage_start, cluster_id, namespace
            FROM ocp_storage_line_item_daily
            WHERE provider_uuid = ?1 AND usage_start BETWEEN ?2 AND ?3
            "#,
        )?;
        let mut rows = stmt.query(params![uuid, range.0, range.1])?;
        while let Some(row) = rows.next()? {
            groups
                .entry(key(row.get(0)?, row.get(1)?, row.get(2)?))
                .or_default()
                .cluster
                .get_or_insert_with(ClusterTotals::default);
        }
    }
    for ((day, cluster_id, namespace), cost) in allocated_by_namespace(conn, uuid, range)? {
        if let Some(totals) = groups.get_mut(&key(day, Some(cluster_id), Some(namespace))) {
            totals.infrastructure_cost += cost;
        }
    }
    Ok(groups)
}

fn allocated_by_namespace(
    conn: &Connection,
    cluster_provider_uuid: &str,
    range: &(String, String),
) -> Result<BTreeMap<(String, String, String), Decimal>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT usage_start, cluster_id, namespace, allocated_cost
        FROM ocp_cloud_line_item_daily
        WHERE cluster_provider_uuid = ?1 AND usage_start BETWEEN ?2 AND ?3
        "#,
    )?;
    let mut rows = stmt.query(params![cluster_provider_uuid, range.0, range.1])?;
    let mut allocated: BTreeMap<(String, String, String), Decimal> = BTreeMap::new();
    while let Some(row) = rows.next()? {
        let cost: String = row.get(3)?;
        *allocated
            .entry((row.get(0)?, row.get(1)?, row.get(2)?))
            .or_default() += parse_decimal(Some(&cost))?.unwrap_or_default();
    }
    Ok(allocated)
}

/// Recompute infrastructure and total cost on a cluster's summary rows for
/// one day from the correlation rows stored for it.
pub(crate) fn refresh_cluster_costs(
    conn: &Connection,
    cluster_provider_uuid: Uuid,
    day: NaiveDate,
) -> Result<usize> {
    let uuid = cluster_provider_uuid.to_string();
    let day_text = fmt_date(day);
    let allocated = allocated_by_namespace(conn, &uuid, &(day_text.clone(), day_text.clone()))?;

    let mut current = Vec::new();
    {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, account, dimension, derived_cost
            FROM line_item_daily_summary
            WHERE provider_uuid = ?1 AND usage_start = ?2
            "#,
        )?;
        let mut rows = stmt.query(params![uuid, day_text])?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let account: String = row.get(1)?;
            let dimension: String = row.get(2)?;
            let derived: String = row.get(3)?;
            current.push((id, account, dimension, parse_decimal(Some(&derived))?.unwrap_or_default()));
        }
    }

    let mut stmt = conn.prepare(
        "UPDATE line_item_daily_summary SET infrastructure_cost = ?2, cost = ?3 WHERE id = ?1",
    )?;
    let mut updated = 0usize;
    for (id, account, dimension, derived) in current {
        let infrastructure = allocated
            .get(&(day_text.clone(), account, dimension))
            .copied()
            .unwrap_or_default();
        updated += stmt.execute(params![
            id,
            decimal_text(infrastructure),
            decimal_text(infrastructure + derived)
        ])?;
    }
    Ok(updated)
}
