//! Matching of cluster usage to the cloud line items that produced it.
//!
//! Two joins feed a [`CorrelationRecord`]:
//!
//! * resource join: a cloud item whose resource id equals a cluster pod
//!   item's resource id on the same day;
//! * tag join: a cloud item whose tags satisfy any rule of the OR chain
//!   against a cluster persistent volume item of the same day:
//!   1. a tag key/value equal to a PV or PVC label key/value,
//!   2. `openshift_cluster` equal to the cluster alias,
//!   3. `openshift_node` equal to the node,
//!   4. `openshift_project` equal to the namespace.
//!
//! All comparisons are lowercase. A cloud item claimed by the resource join
//! is not offered to the tag join, so its cost is split exactly once.
//!
//! The cloud cost is divided evenly across the distinct cluster namespaces
//! that matched (`shared_projects`), then evenly across the matched items of
//! each namespace. Shares are truncated to [`ALLOCATION_SCALE`] places and
//! the remainder lands on the first namespace/item in sort order, so the
//! shares always add back to the original cost.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::{
    ClusterStorageItem, ClusterUsageItem, CloudDailyItem, CorrelationMatch, CorrelationRecord,
    MatchKind,
};

pub const RESERVED_CLUSTER_TAG: &str = "openshift_cluster";
pub const RESERVED_NODE_TAG: &str = "openshift_node";
pub const RESERVED_PROJECT_TAG: &str = "openshift_project";

/// Decimal places kept on each allocated share before remainder placement.
pub const ALLOCATION_SCALE: u32 = 10;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CorrelationError {
    #[error(
        "allocation for cloud line item {cloud_item_id} on {usage_start} sums to {allocated}, expected {expected}"
    )]
    AllocationMismatch {
        cloud_item_id: i64,
        usage_start: NaiveDate,
        expected: Decimal,
        allocated: Decimal,
    },
}

struct Candidate<'a> {
    item_id: i64,
    kind: MatchKind,
    cluster_id: &'a str,
    namespace: &'a str,
    node: Option<&'a str>,
}

struct LoweredStorage<'a> {
    item: &'a ClusterStorageItem,
    labels: BTreeSet<(String, String)>,
    alias: Option<String>,
    node: Option<String>,
    namespace: String,
}

impl<'a> LoweredStorage<'a> {
    fn new(item: &'a ClusterStorageItem) -> Self {
        let labels = item
            .persistentvolume_labels
            .iter()
            .chain(item.persistentvolumeclaim_labels.iter())
            .map(|(key, value)| (key.to_lowercase(), value.to_lowercase()))
            .collect();
        Self {
            item,
            labels,
            alias: item.cluster_alias.as_deref().map(str::to_lowercase),
            node: item.node.as_deref().map(str::to_lowercase),
            namespace: item.namespace.to_lowercase(),
        }
    }

    fn matches(&self, tags: &[(String, String)]) -> bool {
        tags.iter().any(|(key, value)| {
            self.labels.contains(&(key.clone(), value.clone()))
                || (key == RESERVED_CLUSTER_TAG && self.alias.as_deref() == Some(value.as_str()))
                || (key == RESERVED_NODE_TAG && self.node.as_deref() == Some(value.as_str()))
                || (key == RESERVED_PROJECT_TAG && self.namespace == *value)
        })
    }
}

/// Correlate one day of cloud line items with one day of cluster items.
///
/// Every cloud item of `day` yields a record; items with no match carry an
/// empty `matches` list and `shared_projects == 0`.
pub fn match_day(
    day: NaiveDate,
    cloud_items: &[CloudDailyItem],
    usage_items: &[ClusterUsageItem],
    storage_items: &[ClusterStorageItem],
) -> Result<Vec<CorrelationRecord>, CorrelationError> {
    let mut by_resource: BTreeMap<&str, Vec<&ClusterUsageItem>> = BTreeMap::new();
    for item in usage_items.iter().filter(|item| item.usage_start == day) {
        if let Some(resource_id) = item.resource_id.as_deref().filter(|id| !id.is_empty()) {
            by_resource.entry(resource_id).or_default().push(item);
        }
    }
    let storage = storage_items
        .iter()
        .filter(|item| item.usage_start == day)
        .map(LoweredStorage::new)
        .collect::<Vec<_>>();

    let mut cloud = cloud_items
        .iter()
        .filter(|item| item.usage_start == day)
        .collect::<Vec<_>>();
    cloud.sort_by_key(|item| item.id);

    let mut records = Vec::with_capacity(cloud.len());
    for item in cloud {
        let mut candidates = item
            .resource_id
            .as_deref()
            .and_then(|resource_id| by_resource.get(resource_id))
            .map(|matched| {
                matched
                    .iter()
                    .map(|usage| Candidate {
                        item_id: usage.id,
                        kind: MatchKind::ResourceId,
                        cluster_id: &usage.cluster_id,
                        namespace: &usage.namespace,
                        node: usage.node.as_deref(),
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        if candidates.is_empty() && !item.tags.is_empty() {
            let tags = item
                .tags
                .iter()
                .map(|(key, value)| (key.to_lowercase(), value.to_lowercase()))
                .collect::<Vec<_>>();
            candidates = storage
                .iter()
                .filter(|lowered| lowered.matches(&tags))
                .map(|lowered| Candidate {
                    item_id: lowered.item.id,
                    kind: MatchKind::Tag,
                    cluster_id: &lowered.item.cluster_id,
                    namespace: &lowered.item.namespace,
                    node: lowered.item.node.as_deref(),
                })
                .collect();
        }

        let record = allocate(item, candidates);
        verify_allocation(&record)?;
        records.push(record);
    }
    Ok(records)
}

fn allocate(item: &CloudDailyItem, candidates: Vec<Candidate<'_>>) -> CorrelationRecord {
    let mut by_namespace: BTreeMap<(&str, &str), BTreeMap<(MatchKind, i64), Candidate<'_>>> =
        BTreeMap::new();
    for candidate in candidates {
        by_namespace
            .entry((candidate.cluster_id, candidate.namespace))
            .or_default()
            .entry((candidate.kind, candidate.item_id))
            .or_insert(candidate);
    }

    let shared_projects = by_namespace.len();
    let namespace_shares = split_evenly(item.cost, shared_projects);
    let mut matches = Vec::new();
    for (((_, namespace), members), share) in by_namespace.into_iter().zip(namespace_shares) {
        let item_shares = split_evenly(share, members.len());
        for (candidate, allocated_cost) in members.into_values().zip(item_shares) {
            matches.push(CorrelationMatch {
                cluster_item_id: candidate.item_id,
                kind: candidate.kind,
                cluster_id: candidate.cluster_id.to_string(),
                namespace: namespace.to_string(),
                node: candidate.node.map(str::to_string),
                allocated_cost,
            });
        }
    }

    CorrelationRecord {
        usage_start: item.usage_start,
        cloud_item_id: item.id,
        resource_id: item.resource_id.clone(),
        cloud_cost: item.cost,
        shared_projects: shared_projects as u32,
        matches,
    }
}

/// Split `total` into `parts` shares that add up to exactly `total`.
pub fn split_evenly(total: Decimal, parts: usize) -> Vec<Decimal> {
    if parts == 0 {
        return Vec::new();
    }
    let count = Decimal::from(parts as u64);
    let base = (total / count).round_dp_with_strategy(ALLOCATION_SCALE, RoundingStrategy::ToZero);
    let mut shares = vec![base; parts];
    shares[0] += total - base * count;
    shares
}

/// A matched record must hand out exactly the cloud cost it started with.
pub fn verify_allocation(record: &CorrelationRecord) -> Result<(), CorrelationError> {
    if record.matches.is_empty() {
        return Ok(());
    }
    let allocated = record.allocated_total();
    if allocated != record.cloud_cost {
        return Err(CorrelationError::AllocationMismatch {
            cloud_item_id: record.cloud_item_id,
            usage_start: record.usage_start,
            expected: record.cloud_cost,
            allocated,
        });
    }
    Ok(())
}
