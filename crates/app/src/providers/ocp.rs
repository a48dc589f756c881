use ledger_core::{Credential, InfraType, SourceName};
use ledger_db::Db;
use uuid::Uuid;

use super::{AccessResult, ProviderAccessError, ProviderService};

const DETECTABLE_INFRA: [InfraType; 2] = [InfraType::Aws, InfraType::Azure];

/// Cluster metering provider. Reports are pushed to us, so there is no
/// bucket to reach; the infrastructure is inferred from matching usage.
pub struct OcpProvider;

impl ProviderService for OcpProvider {
    fn name(&self) -> &'static str {
        "OCP"
    }

    fn cost_usage_source_is_reachable(
        &self,
        credential: &Credential,
        source: &SourceName,
    ) -> AccessResult<bool> {
        let Credential::Cluster { cluster_id } = credential else {
            return Err(ProviderAccessError::access(self.name(), "a cluster id is required"));
        };
        if cluster_id.trim().is_empty() {
            return Err(ProviderAccessError::access(self.name(), "cluster id is empty"));
        }
        if !matches!(source, SourceName::None) {
            return Err(ProviderAccessError::access(
                self.name(),
                "cluster providers do not take a report source",
            ));
        }
        Ok(true)
    }

    fn infra_type_implementation(
        &self,
        provider_uuid: Uuid,
        db: &Db,
    ) -> AccessResult<Option<InfraType>> {
        let storage = |err: ledger_db::DbError| ProviderAccessError::access(self.name(), err.to_string());
        let Some(cluster) = db.get_provider(provider_uuid).map_err(storage)? else {
            tracing::warn!(provider_uuid = %provider_uuid, "cluster provider not found");
            return Ok(None);
        };
        for infra in DETECTABLE_INFRA {
            if db.cluster_runs_on(&cluster, infra).map_err(storage)? {
                return Ok(Some(infra));
            }
        }
        Ok(None)
    }

    fn infra_key_list_implementation(
        &self,
        infra: InfraType,
        db: &Db,
    ) -> AccessResult<Vec<String>> {
        db.clusters_on_infra(infra)
            .map_err(|err| ProviderAccessError::access(self.name(), err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_needs_an_id_and_no_bucket() {
        let cluster = Credential::Cluster {
            cluster_id: "my-ocp-cluster-1".to_string(),
        };
        assert!(
            OcpProvider
                .cost_usage_source_is_reachable(&cluster, &SourceName::None)
                .expect("reachable")
        );
        let bucket = SourceName::Bucket {
            bucket: "cost-reports".to_string(),
        };
        assert!(OcpProvider.cost_usage_source_is_reachable(&cluster, &bucket).is_err());
        let empty = Credential::Cluster {
            cluster_id: " ".to_string(),
        };
        assert!(
            OcpProvider
                .cost_usage_source_is_reachable(&empty, &SourceName::None)
                .is_err()
        );
    }
}
