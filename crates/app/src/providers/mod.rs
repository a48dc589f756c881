//! Per provider type source validation and infrastructure detection.
//!
//! Each provider type has one [`ProviderService`] implementation;
//! [`ProviderAccessor`] picks it from the closed [`ProviderType`] enum.

mod aws;
mod azure;
mod local;
mod ocp;

use std::str::FromStr;

use ledger_core::{Credential, InfraType, ProviderType, SourceName, TenantSchema};
use ledger_db::{Db, TenantStore};
use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

pub use aws::{AwsLocalProvider, AwsProvider};
pub use azure::{AzureLocalProvider, AzureProvider};
pub use ocp::OcpProvider;

#[derive(Debug, Error)]
pub enum ProviderAccessError {
    #[error("{0} is not a valid provider type")]
    UnknownProviderType(String),
    #[error("{service}: {message}")]
    Access {
        service: &'static str,
        message: String,
    },
}

impl ProviderAccessError {
    pub(crate) fn access(service: &'static str, message: impl Into<String>) -> Self {
        Self::Access {
            service,
            message: message.into(),
        }
    }
}

pub type AccessResult<T> = std::result::Result<T, ProviderAccessError>;

pub trait ProviderService: Send + Sync {
    fn name(&self) -> &'static str;

    /// Check that the credential can reach the report source. Errors say
    /// which part of the credential or source is wrong.
    fn cost_usage_source_is_reachable(
        &self,
        credential: &Credential,
        source: &SourceName,
    ) -> AccessResult<bool>;

    /// Infrastructure this provider runs on, `None` when nothing says so.
    fn infra_type_implementation(
        &self,
        provider_uuid: Uuid,
        db: &Db,
    ) -> AccessResult<Option<InfraType>>;

    /// Keys (cluster ids) of this provider type's sources running on `infra`.
    fn infra_key_list_implementation(&self, infra: InfraType, db: &Db)
    -> AccessResult<Vec<String>>;
}

/// Front door to the provider services.
pub struct ProviderAccessor {
    provider_type: ProviderType,
    service: Box<dyn ProviderService>,
}

impl ProviderAccessor {
    pub fn new(provider_type: ProviderType) -> Self {
        let service: Box<dyn ProviderService> = match provider_type {
            ProviderType::Aws => Box::new(AwsProvider),
            ProviderType::AwsLocal => Box::new(AwsLocalProvider),
            ProviderType::Azure => Box::new(AzureProvider),
            ProviderType::AzureLocal => Box::new(AzureLocalProvider),
            ProviderType::Ocp => Box::new(OcpProvider),
        };
        Self {
            provider_type,
            service,
        }
    }

    /// Accessor for a provider type given by its canonical name, e.g. `AWS`.
    pub fn for_service(service_name: &str) -> AccessResult<Self> {
        let provider_type = ProviderType::from_str(service_name).map_err(|_| {
            tracing::error!(service = service_name, "not a valid provider type");
            ProviderAccessError::UnknownProviderType(service_name.to_string())
        })?;
        Ok(Self::new(provider_type))
    }

    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    pub fn service_name(&self) -> &'static str {
        self.service.name()
    }

    pub fn cost_usage_source_ready(
        &self,
        credential: &Credential,
        source: &SourceName,
    ) -> AccessResult<bool> {
        let reachable = self.service.cost_usage_source_is_reachable(credential, source)?;
        tracing::debug!(service = self.service_name(), reachable, "source checked");
        Ok(reachable)
    }

    /// Infrastructure the provider runs on; `Unknown` when nothing matched.
    pub fn infrastructure_type(
        &self,
        provider_uuid: Uuid,
        store: &TenantStore,
        schema: &TenantSchema,
    ) -> AccessResult<InfraType> {
        let db = self.open(store, schema)?;
        let infra = self.infrastructure_type_in(provider_uuid, &db)?;
        tracing::debug!(
            schema = schema.as_str(),
            provider_uuid = %provider_uuid,
            infra = infra.as_str(),
            "infrastructure type resolved"
        );
        Ok(infra)
    }

    /// Same as [`Self::infrastructure_type`] on an already open tenant db.
    pub fn infrastructure_type_in(&self, provider_uuid: Uuid, db: &Db) -> AccessResult<InfraType> {
        Ok(self
            .service
            .infra_type_implementation(provider_uuid, db)?
            .unwrap_or(InfraType::Unknown))
    }

    pub fn infrastructure_key_list(
        &self,
        infra: InfraType,
        store: &TenantStore,
        schema: &TenantSchema,
    ) -> AccessResult<Vec<String>> {
        let db = self.open(store, schema)?;
        self.infrastructure_key_list_in(infra, &db)
    }

    pub fn infrastructure_key_list_in(&self, infra: InfraType, db: &Db) -> AccessResult<Vec<String>> {
        self.service.infra_key_list_implementation(infra, db)
    }

    fn open(&self, store: &TenantStore, schema: &TenantSchema) -> AccessResult<Db> {
        store
            .open(schema)
            .map_err(|err| ProviderAccessError::access(self.service_name(), err.to_string()))
    }
}

/// Match against a lazily compiled pattern; a pattern that failed to
/// compile matches nothing.
pub(crate) fn is_match(pattern: &Option<Regex>, value: &str) -> bool {
    pattern.as_ref().is_some_and(|regex| regex.is_match(value))
}
