use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use ledger_core::{
    ClusterStorageItem, ClusterUsageItem, CloudDailyItem, CorrelationMatch, CorrelationRecord,
    InfraType, MatchKind, Provider, match_day,
};
use rust_decimal::Decimal;
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::Db;
use crate::error::Result;
use crate::helpers::{decimal_text, fmt_date, parse_date, parse_decimal, parse_tags};
use crate::summary::refresh_cluster_costs;

/// What one day's correlation of a cloud provider with its clusters stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrelationOutcome {
    pub cloud_items: usize,
    pub matched_items: usize,
    pub match_rows: usize,
    pub allocated_cost: Decimal,
}

impl Db {
    /// Correlate one day of a cloud provider against all of its clusters at
    /// once and replace the matches stored for that cloud provider and day.
    ///
    /// The clusters are matched together so a cloud item shared by several
    /// clusters is split once across all of them. Runs in its own
    /// transaction: an allocation that does not add up rolls the whole day
    /// back and leaves earlier days as they were.
    pub fn correlate_day(
        &mut self,
        clusters: &[Provider],
        cloud: &Provider,
        day: NaiveDate,
    ) -> Result<CorrelationOutcome> {
        let tx = self.write_tx()?;
        let cloud_items = load_cloud_items(&tx, cloud, day)?;
        let mut usage_items = Vec::new();
        let mut storage_items = Vec::new();
        let mut owners: HashMap<(MatchKind, i64), Uuid> = HashMap::new();
        for cluster in clusters {
            for item in load_usage_items(&tx, cluster, day)? {
                owners.insert((MatchKind::ResourceId, item.id), cluster.uuid);
                usage_items.push(item);
            }
            for item in load_storage_items(&tx, cluster, day)? {
                owners.insert((MatchKind::Tag, item.id), cluster.uuid);
                storage_items.push(item);
            }
        }
        let records = match_day(day, &cloud_items, &usage_items, &storage_items)?;

        let day_text = fmt_date(day);
        let mut affected: BTreeSet<Uuid> = clusters.iter().map(|cluster| cluster.uuid).collect();
        {
            let mut stmt = tx.prepare(
                r#"
                SELECT DISTINCT cluster_provider_uuid FROM ocp_cloud_line_item_daily
                WHERE cloud_provider_uuid = ?1 AND usage_start = ?2
                "#,
            )?;
            let mut rows = stmt.query(params![cloud.uuid.to_string(), day_text])?;
            while let Some(row) = rows.next()? {
                let stored: String = row.get(0)?;
                affected.insert(Uuid::parse_str(&stored)?);
            }
        }
        tx.execute(
            "DELETE FROM ocp_cloud_line_item_daily WHERE cloud_provider_uuid = ?1 AND usage_start = ?2",
            params![cloud.uuid.to_string(), day_text],
        )?;
        let mut outcome = CorrelationOutcome {
            cloud_items: records.len(),
            ..CorrelationOutcome::default()
        };
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO ocp_cloud_line_item_daily (
                  cluster_provider_uuid, cloud_provider_uuid, usage_start, cloud_item_id,
                  resource_id, cloud_cost, shared_projects, match_kind, cluster_item_id,
                  cluster_id, namespace, node, allocated_cost
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
            )?;
            for record in records.iter().filter(|record| !record.matches.is_empty()) {
                outcome.matched_items += 1;
                outcome.allocated_cost += record.allocated_total();
                for matched in &record.matches {
                    let Some(owner) = owners.get(&(matched.kind, matched.cluster_item_id)) else {
                        continue;
                    };
                    outcome.match_rows += stmt.execute(params![
                        owner.to_string(),
                        cloud.uuid.to_string(),
                        day_text,
                        record.cloud_item_id,
                        record.resource_id,
                        decimal_text(record.cloud_cost),
                        record.shared_projects as i64,
                        matched.kind.as_str(),
                        matched.cluster_item_id,
                        matched.cluster_id,
                        matched.namespace,
                        matched.node,
                        decimal_text(matched.allocated_cost),
                    ])?;
                }
            }
        }
        for cluster_uuid in &affected {
            refresh_cluster_costs(&tx, *cluster_uuid, day)?;
        }
        tx.commit()?;
        tracing::debug!(
            cloud = %cloud.uuid,
            clusters = clusters.len(),
            day = %day,
            matched = outcome.matched_items,
            "correlation stored"
        );
        Ok(outcome)
    }

    /// Stored correlation for a cluster provider and day, one record per
    /// matched cloud line item.
    pub fn ocp_cloud_line_item_daily(
        &self,
        cluster: &Provider,
        day: NaiveDate,
    ) -> Result<Vec<CorrelationRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT usage_start, cloud_item_id, resource_id, cloud_cost, shared_projects,
                   match_kind, cluster_item_id, cluster_id, namespace, node, allocated_cost
            FROM ocp_cloud_line_item_daily
            WHERE cluster_provider_uuid = ?1 AND usage_start = ?2
            ORDER BY cloud_provider_uuid, cloud_item_id, id
            "#,
        )?;
        let mut rows = stmt.query(params![cluster.uuid.to_string(), fmt_date(day)])?;
        let mut records: Vec<CorrelationRecord> = Vec::new();
        while let Some(row) = rows.next()? {
            let usage_start: String = row.get(0)?;
            let cloud_item_id: i64 = row.get(1)?;
            let cloud_cost: String = row.get(3)?;
            let kind: String = row.get(5)?;
            let allocated: String = row.get(10)?;
            let matched = CorrelationMatch {
                cluster_item_id: row.get(6)?,
                kind: if kind == MatchKind::ResourceId.as_str() {
                    MatchKind::ResourceId
                } else {
                    MatchKind::Tag
                },
                cluster_id: row.get(7)?,
                namespace: row.get(8)?,
                node: row.get(9)?,
                allocated_cost: parse_decimal(Some(&allocated))?.unwrap_or_default(),
            };
            match records.last_mut() {
                Some(record) if record.cloud_item_id == cloud_item_id => {
                    record.matches.push(matched);
                }
                _ => records.push(CorrelationRecord {
                    usage_start: parse_date(&usage_start)?,
                    cloud_item_id,
                    resource_id: row.get(2)?,
                    cloud_cost: parse_decimal(Some(&cloud_cost))?.unwrap_or_default(),
                    shared_projects: row.get::<_, i64>(4)? as u32,
                    matches: vec![matched],
                }),
            }
        }
        Ok(records)
    }

    /// Whether any of the cluster's pods ran on a resource billed by `infra`.
    pub fn cluster_runs_on(&self, cluster: &Provider, infra: InfraType) -> Result<bool> {
        let Some(join) = infra_join(infra) else {
            return Ok(false);
        };
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {join} WHERE {OVERLAP} AND o.provider_uuid = ?1)"
        );
        let found: i64 = self
            .conn
            .query_row(&sql, params![cluster.uuid.to_string()], |row| row.get(0))?;
        Ok(found != 0)
    }

    /// Cluster ids with pods on resources billed by `infra`.
    pub fn clusters_on_infra(&self, infra: InfraType) -> Result<Vec<String>> {
        let Some(join) = infra_join(infra) else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT DISTINCT o.cluster_id FROM {join} WHERE {OVERLAP} AND o.cluster_id IS NOT NULL ORDER BY o.cluster_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<std::result::Result<Vec<String>, _>>()
            .map_err(Into::into)
    }
}

const OVERLAP: &str = "o.resource_id IS NOT NULL AND o.resource_id <> ''";

fn infra_join(infra: InfraType) -> Option<&'static str> {
    match infra {
        InfraType::Aws => Some(
            r#"ocp_usage_line_item_daily o
               JOIN aws_line_item_daily c
                 ON c.resource_id = o.resource_id AND c.usage_start = o.usage_start
"#,
        ),
        InfraType::Azure => Some(
            r#"ocp_usage_line_item_daily o
               JOIN azure_line_item_daily c
                 ON c.instance_id = o.resource_id AND c.usage_start = o.usage_start
"#,
        ),
        InfraType::Unknown => None,
    }
}

fn load_cloud_items(conn: &Connection, cloud: &Provider, day: NaiveDate) -> Result<Vec<CloudDailyItem>> {
    let sql = match cloud.provider_type.infra_type() {
        InfraType::Aws => {
            r#"
            SELECT id, usage_start, resource_id, unblended_cost, tags
            FROM aws_line_item_daily WHERE provider_uuid = ?1 AND usage_start = ?2
            ORDER BY id
            "#
        }
        InfraType::Azure => {
            r#"
            SELECT id, usage_start, instance_id, pretax_cost, tags
            FROM azure_line_item_daily WHERE provider_uuid = ?1 AND usage_start = ?2
            ORDER BY id
            "#
        }
        InfraType::Unknown => return Ok(Vec::new()),
    };
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params![cloud.uuid.to_string(), fmt_date(day)])?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        let usage_start: String = row.get(1)?;
        let cost: Option<String> = row.get(3)?;
        let tags: Option<String> = row.get(4)?;
        items.push(CloudDailyItem {
            id: row.get(0)?,
            usage_start: parse_date(&usage_start)?,
            resource_id: row.get(2)?,
            cost: parse_decimal(cost.as_deref())?.unwrap_or_default(),
            tags: parse_tags(tags.as_deref())?,
        });
    }
    Ok(items)
}

fn load_usage_items(conn: &Connection, cluster: &Provider, day: NaiveDate) -> Result<Vec<ClusterUsageItem>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, usage_start, cluster_id, cluster_alias, namespace, node, resource_id
        FROM ocp_usage_line_item_daily WHERE provider_uuid = ?1 AND usage_start = ?2
        ORDER BY id
        "#,
    )?;
    let mut rows = stmt.query(params![cluster.uuid.to_string(), fmt_date(day)])?;
    let fallback_cluster = cluster.cluster_id().unwrap_or_default();
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        let usage_start: String = row.get(1)?;
        items.push(ClusterUsageItem {
            id: row.get(0)?,
            usage_start: parse_date(&usage_start)?,
            cluster_id: row
                .get::<_, Option<String>>(2)?
                .unwrap_or_else(|| fallback_cluster.to_string()),
            cluster_alias: row.get(3)?,
            namespace: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            node: row.get(5)?,
            resource_id: row.get(6)?,
        });
    }
    Ok(items)
}

fn load_storage_items(
    conn: &Connection,
    cluster: &Provider,
    day: NaiveDate,
) -> Result<Vec<ClusterStorageItem>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, usage_start, cluster_id, cluster_alias, namespace, node,
               persistentvolume_labels, persistentvolumeclaim_labels
        FROM ocp_storage_line_item_daily WHERE provider_uuid = ?1 AND usage_start = ?2
        ORDER BY id
        "#,
    )?;
    let mut rows = stmt.query(params![cluster.uuid.to_string(), fmt_date(day)])?;
    let fallback_cluster = cluster.cluster_id().unwrap_or_default();
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        let usage_start: String = row.get(1)?;
        let pv_labels: Option<String> = row.get(6)?;
        let pvc_labels: Option<String> = row.get(7)?;
        items.push(ClusterStorageItem {
            id: row.get(0)?,
            usage_start: parse_date(&usage_start)?,
            cluster_id: row
                .get::<_, Option<String>>(2)?
                .unwrap_or_else(|| fallback_cluster.to_string()),
            cluster_alias: row.get(3)?,
            namespace: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            node: row.get(5)?,
            persistentvolume_labels: parse_tags(pv_labels.as_deref())?,
            persistentvolumeclaim_labels: parse_tags(pvc_labels.as_deref())?,
        });
    }
    Ok(items)
}
