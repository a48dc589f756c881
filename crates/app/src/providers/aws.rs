use std::sync::LazyLock;

use ledger_core::{Credential, InfraType, SourceName};
use ledger_db::Db;
use regex::Regex;
use uuid::Uuid;

use super::local::local_dir_is_readable;
use super::{AccessResult, ProviderAccessError, ProviderService, is_match};

static ROLE_ARN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^arn:aws(-[a-z]+)*:iam::\d{12}:role/[A-Za-z0-9+=,.@_/-]{1,512}$").ok()
});

static BUCKET_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$").ok());

fn check_role_arn(service: &'static str, credential: &Credential) -> AccessResult<()> {
    let Credential::RoleArn { role_arn } = credential else {
        return Err(ProviderAccessError::access(service, "a role ARN is required"));
    };
    if !is_match(&ROLE_ARN, role_arn) {
        return Err(ProviderAccessError::access(
            service,
            format!("{role_arn} is not a valid role ARN"),
        ));
    }
    Ok(())
}

fn check_bucket(service: &'static str, source: &SourceName) -> AccessResult<()> {
    let SourceName::Bucket { bucket } = source else {
        return Err(ProviderAccessError::access(service, "a report bucket is required"));
    };
    if !is_match(&BUCKET_NAME, bucket) || bucket.contains("..") {
        return Err(ProviderAccessError::access(
            service,
            format!("{bucket} is not a valid bucket name"),
        ));
    }
    Ok(())
}

pub struct AwsProvider;

impl ProviderService for AwsProvider {
    fn name(&self) -> &'static str {
        "AWS"
    }

    fn cost_usage_source_is_reachable(
        &self,
        credential: &Credential,
        source: &SourceName,
    ) -> AccessResult<bool> {
        check_role_arn(self.name(), credential)?;
        check_bucket(self.name(), source)?;
        Ok(true)
    }

    fn infra_type_implementation(&self, _: Uuid, _: &Db) -> AccessResult<Option<InfraType>> {
        Ok(None)
    }

    fn infra_key_list_implementation(&self, _: InfraType, _: &Db) -> AccessResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Reads exported reports from a local directory instead of a bucket.
pub struct AwsLocalProvider;

impl ProviderService for AwsLocalProvider {
    fn name(&self) -> &'static str {
        "AWS-local"
    }

    fn cost_usage_source_is_reachable(
        &self,
        credential: &Credential,
        source: &SourceName,
    ) -> AccessResult<bool> {
        check_role_arn(self.name(), credential)?;
        local_dir_is_readable(self.name(), source)
    }

    fn infra_type_implementation(&self, _: Uuid, _: &Db) -> AccessResult<Option<InfraType>> {
        Ok(None)
    }

    fn infra_key_list_implementation(&self, _: InfraType, _: &Db) -> AccessResult<Vec<String>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(arn: &str) -> Credential {
        Credential::RoleArn {
            role_arn: arn.to_string(),
        }
    }

    fn bucket(name: &str) -> SourceName {
        SourceName::Bucket {
            bucket: name.to_string(),
        }
    }

    #[test]
    fn well_formed_role_and_bucket_are_reachable() {
        let reachable = AwsProvider
            .cost_usage_source_is_reachable(
                &role("arn:aws:iam::589175555555:role/CostManagement"),
                &bucket("cost-usage-bucket"),
            )
            .expect("reachable");
        assert!(reachable);
    }

    #[test]
    fn malformed_role_or_bucket_is_rejected() {
        let good_role = role("arn:aws:iam::589175555555:role/CostManagement");
        assert!(
            AwsProvider
                .cost_usage_source_is_reachable(&role("not-an-arn"), &bucket("cost-usage-bucket"))
                .is_err()
        );
        for name in ["Upper-Case", "ab", "bad..dots", "-leading"] {
            assert!(
                AwsProvider
                    .cost_usage_source_is_reachable(&good_role, &bucket(name))
                    .is_err(),
                "{name}"
            );
        }
        let cluster = Credential::Cluster {
            cluster_id: "c-1".to_string(),
        };
        assert!(
            AwsProvider
                .cost_usage_source_is_reachable(&cluster, &bucket("cost-usage-bucket"))
                .is_err()
        );
    }
}
