use std::sync::LazyLock;

use ledger_core::{Credential, InfraType, SourceName};
use ledger_db::Db;
use regex::Regex;
use uuid::Uuid;

use super::local::local_dir_is_readable;
use super::{AccessResult, ProviderAccessError, ProviderService, is_match};

static STORAGE_ACCOUNT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]{3,24}$").ok());

static CONTAINER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{1,61}[a-z0-9]$").ok());

static RESOURCE_GROUP: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[-\w.()]{0,89}[-\w()]$").ok());

fn check_guid(service: &'static str, field: &str, value: &str) -> AccessResult<()> {
    Uuid::parse_str(value)
        .map(|_| ())
        .map_err(|_| ProviderAccessError::access(service, format!("{field} {value} is not a GUID")))
}

fn check_subscription(service: &'static str, credential: &Credential) -> AccessResult<()> {
    let Credential::Subscription {
        subscription_id,
        tenant_id,
        client_id,
    } = credential
    else {
        return Err(ProviderAccessError::access(
            service,
            "a subscription credential is required",
        ));
    };
    check_guid(service, "subscription_id", subscription_id)?;
    if let Some(tenant_id) = tenant_id {
        check_guid(service, "tenant_id", tenant_id)?;
    }
    if let Some(client_id) = client_id {
        check_guid(service, "client_id", client_id)?;
    }
    Ok(())
}

fn check_storage(service: &'static str, source: &SourceName) -> AccessResult<()> {
    let SourceName::StorageAccount {
        resource_group,
        storage_account,
        container,
    } = source
    else {
        return Err(ProviderAccessError::access(
            service,
            "a storage account is required",
        ));
    };
    if !is_match(&RESOURCE_GROUP, resource_group) {
        return Err(ProviderAccessError::access(
            service,
            format!("{resource_group} is not a valid resource group"),
        ));
    }
    if !is_match(&STORAGE_ACCOUNT, storage_account) {
        return Err(ProviderAccessError::access(
            service,
            format!("{storage_account} is not a valid storage account name"),
        ));
    }
    if let Some(container) = container {
        if !is_match(&CONTAINER, container) || container.contains("--") {
            return Err(ProviderAccessError::access(
                service,
                format!("{container} is not a valid container name"),
            ));
        }
    }
    Ok(())
}

pub struct AzureProvider;

impl ProviderService for AzureProvider {
    fn name(&self) -> &'static str {
        "AZURE"
    }

    fn cost_usage_source_is_reachable(
        &self,
        credential: &Credential,
        source: &SourceName,
    ) -> AccessResult<bool> {
        check_subscription(self.name(), credential)?;
        check_storage(self.name(), source)?;
        Ok(true)
    }

    fn infra_type_implementation(&self, _: Uuid, _: &Db) -> AccessResult<Option<InfraType>> {
        Ok(None)
    }

    fn infra_key_list_implementation(&self, _: InfraType, _: &Db) -> AccessResult<Vec<String>> {
        Ok(Vec::new())
    }
}

pub struct AzureLocalProvider;

impl ProviderService for AzureLocalProvider {
    fn name(&self) -> &'static str {
        "AZURE-local"
    }

    fn cost_usage_source_is_reachable(
        &self,
        credential: &Credential,
        source: &SourceName,
    ) -> AccessResult<bool> {
        check_subscription(self.name(), credential)?;
        local_dir_is_readable(self.name(), source)
    }

    fn infra_type_implementation(&self, _: Uuid, _: &Db) -> AccessResult<Option<InfraType>> {
        Ok(None)
    }

    fn infra_key_list_implementation(&self, _: InfraType, _: &Db) -> AccessResult<Vec<String>> {
        Ok(Vec::new())
    }
}
