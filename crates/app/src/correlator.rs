use chrono::NaiveDate;
use ledger_core::{InfraType, Provider, ProviderType, days_between};
use ledger_db::Db;
use rust_decimal::Decimal;

use crate::error::PipelineError;
use crate::providers::ProviderAccessor;

/// A cloud provider and every cluster provider detected on its
/// infrastructure; the unit one day of correlation runs over.
#[derive(Debug, Clone)]
pub struct CorrelationGroup {
    pub cloud: Provider,
    pub clusters: Vec<Provider>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrelationSummary {
    pub groups: usize,
    pub days: usize,
    pub matched_items: usize,
    pub allocated_cost: Decimal,
}

/// Correlation groups that involve `provider`.
///
/// A cluster joins a group for every cloud provider of the infrastructure it
/// was detected on, alongside the other clusters detected there. A cloud
/// provider forms one group with the clusters detected on its
/// infrastructure.
pub fn correlation_groups(
    db: &Db,
    provider: &Provider,
) -> Result<Vec<CorrelationGroup>, PipelineError> {
    let accessor = ProviderAccessor::new(ProviderType::Ocp);
    if provider.provider_type.is_cluster() {
        let infra = accessor.infrastructure_type_in(provider.uuid, db)?;
        if infra == InfraType::Unknown {
            return Ok(Vec::new());
        }
        let mut clusters = clusters_on(db, infra)?;
        if !clusters.iter().any(|cluster| cluster.uuid == provider.uuid) {
            clusters.push(provider.clone());
        }
        let clouds = db.list_providers_of(infra.cloud_provider_types())?;
        return Ok(clouds
            .into_iter()
            .map(|cloud| CorrelationGroup {
                cloud,
                clusters: clusters.clone(),
            })
            .collect());
    }

    let clusters = clusters_on(db, provider.provider_type.infra_type())?;
    if clusters.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![CorrelationGroup {
        cloud: provider.clone(),
        clusters,
    }])
}

fn clusters_on(db: &Db, infra: InfraType) -> Result<Vec<Provider>, PipelineError> {
    let cluster_ids = ProviderAccessor::new(ProviderType::Ocp).infrastructure_key_list_in(infra, db)?;
    if cluster_ids.is_empty() {
        return Ok(Vec::new());
    }
    Ok(db
        .list_providers_of(&[ProviderType::Ocp])?
        .into_iter()
        .filter(|cluster| {
            cluster
                .cluster_id()
                .is_some_and(|id| cluster_ids.iter().any(|key| key == id))
        })
        .collect())
}

/// Correlate every group involving `provider` for each day of `[start, end]`.
///
/// Each day commits on its own; a day whose allocation does not add up
/// stops the run with the earlier days kept.
pub fn correlate_range(
    db: &mut Db,
    provider: &Provider,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<CorrelationSummary, PipelineError> {
    let groups = correlation_groups(db, provider)?;
    let days = days_between(start, end);
    let mut summary = CorrelationSummary {
        groups: groups.len(),
        days: days.len(),
        ..CorrelationSummary::default()
    };
    for group in &groups {
        for day in &days {
            let outcome = db.correlate_day(&group.clusters, &group.cloud, *day)?;
            summary.matched_items += outcome.matched_items;
            summary.allocated_cost += outcome.allocated_cost;
            tracing::debug!(
                cloud = %group.cloud.uuid,
                clusters = group.clusters.len(),
                day = %day,
                matched = outcome.matched_items,
                "day correlated"
            );
        }
    }
    Ok(summary)
}
