use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod correlation;

pub use correlation::{
    CorrelationError, RESERVED_CLUSTER_TAG, RESERVED_NODE_TAG, RESERVED_PROJECT_TAG, match_day,
    split_evenly, verify_allocation,
};

/// Free-form tag or label map attached to a line item.
pub type Tags = BTreeMap<String, String>;

/// Default currency when a report row carries none.
pub const DEFAULT_COST_UNITS: &str = "USD";

/// Precomputed rollup windows, in days back from the latest usage date.
pub const TIME_SCOPE_VALUES: [i32; 4] = [-1, -2, -10, -30];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("{0} is not a valid provider type")]
    ProviderType(String),
    #[error("invalid tenant schema name: {0}")]
    SchemaName(String),
    #[error("invalid file state: {0}")]
    FileState(String),
    #[error("unsupported compression: {0}")]
    Compression(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProviderType {
    #[serde(rename = "AWS")]
    Aws,
    #[serde(rename = "AWS-local")]
    AwsLocal,
    #[serde(rename = "AZURE")]
    Azure,
    #[serde(rename = "AZURE-local")]
    AzureLocal,
    #[serde(rename = "OCP")]
    Ocp,
}

impl ProviderType {
    pub const ALL: [ProviderType; 5] = [
        ProviderType::Aws,
        ProviderType::AwsLocal,
        ProviderType::Azure,
        ProviderType::AzureLocal,
        ProviderType::Ocp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "AWS",
            Self::AwsLocal => "AWS-local",
            Self::Azure => "AZURE",
            Self::AzureLocal => "AZURE-local",
            Self::Ocp => "OCP",
        }
    }

    pub fn is_cluster(&self) -> bool {
        matches!(self, Self::Ocp)
    }

    /// The cloud family a provider bills under, `Unknown` for clusters.
    pub fn infra_type(&self) -> InfraType {
        match self {
            Self::Aws | Self::AwsLocal => InfraType::Aws,
            Self::Azure | Self::AzureLocal => InfraType::Azure,
            Self::Ocp => InfraType::Unknown,
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| ParseError::ProviderType(value.to_string()))
    }
}

/// Infrastructure a cluster provider is detected to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InfraType {
    #[serde(rename = "AWS")]
    Aws,
    #[serde(rename = "AZURE")]
    Azure,
    Unknown,
}

impl InfraType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "AWS",
            Self::Azure => "AZURE",
            Self::Unknown => "Unknown",
        }
    }

    /// Cloud provider types whose line items can back this infrastructure.
    pub fn cloud_provider_types(&self) -> &'static [ProviderType] {
        match self {
            Self::Aws => &[ProviderType::Aws, ProviderType::AwsLocal],
            Self::Azure => &[ProviderType::Azure, ProviderType::AzureLocal],
            Self::Unknown => &[],
        }
    }
}

impl fmt::Display for InfraType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of an isolated tenant namespace, e.g. `acct10001`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantSchema(String);

impl TenantSchema {
    pub fn new(name: impl Into<String>) -> Result<Self, ParseError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= 63
            && name
                .chars()
                .next()
                .is_some_and(|ch| ch.is_ascii_lowercase())
            && name
                .chars()
                .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_');
        if !valid {
            return Err(ParseError::SchemaName(name));
        }
        Ok(Self(name))
    }

    pub fn from_account(account_id: &str) -> Result<Self, ParseError> {
        Self::new(format!("acct{}", account_id.trim().to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantSchema {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantSchema> for String {
    fn from(value: TenantSchema) -> Self {
        value.0
    }
}

/// Authentication material, shaped by provider type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credential {
    RoleArn {
        role_arn: String,
    },
    Subscription {
        subscription_id: String,
        #[serde(default)]
        tenant_id: Option<String>,
        #[serde(default)]
        client_id: Option<String>,
    },
    Cluster {
        cluster_id: String,
    },
}

/// Where a provider's usage reports are published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceName {
    Bucket {
        bucket: String,
    },
    LocalDir {
        path: String,
    },
    StorageAccount {
        resource_group: String,
        storage_account: String,
        #[serde(default)]
        container: Option<String>,
    },
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub uuid: Uuid,
    pub name: String,
    pub provider_type: ProviderType,
    pub credential: Credential,
    pub source: SourceName,
    pub setup_complete: bool,
    pub created_at: String,
}

impl Provider {
    /// Cluster identifier for cluster providers.
    pub fn cluster_id(&self) -> Option<&str> {
        match &self.credential {
            Credential::Cluster { cluster_id } => Some(cluster_id.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
        }
    }
}

impl FromStr for Compression {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "" | "none" | "plain" => Ok(Self::None),
            "gzip" | "gz" => Ok(Self::Gzip),
            other => Err(ParseError::Compression(other.to_string())),
        }
    }
}

/// A discovered batch of report files for one provider and billing period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: i64,
    pub provider_uuid: Uuid,
    pub assembly_id: String,
    pub billing_period_start: NaiveDate,
    pub billing_period_end: NaiveDate,
    pub report_dir: String,
    pub report_files: Vec<String>,
    pub compression: Compression,
    pub num_total_files: u32,
    pub num_processed_files: u32,
    pub manifest_creation_datetime: String,
    pub manifest_updated_datetime: String,
}

impl Manifest {
    pub fn is_complete(&self) -> bool {
        self.num_processed_files >= self.num_total_files
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        day >= self.billing_period_start && day <= self.billing_period_end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestInput {
    pub provider_uuid: Uuid,
    pub assembly_id: String,
    pub billing_period_start: NaiveDate,
    pub billing_period_end: NaiveDate,
    pub report_dir: String,
    pub report_files: Vec<String>,
    pub compression: Compression,
}

/// Processing state of one manifest file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    Discovered,
    Started,
    Normalized,
    Aggregated,
    Correlated,
    Completed,
    Failed,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Started => "started",
            Self::Normalized => "normalized",
            Self::Aggregated => "aggregated",
            Self::Correlated => "correlated",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Whether the pipeline may move from `self` to `next`.
    pub fn can_advance_to(&self, next: FileState) -> bool {
        match (self, next) {
            (Self::Completed, _) => false,
            (_, Self::Failed) => true,
            (Self::Failed, Self::Started) => true,
            (Self::Aggregated, Self::Completed) => true,
            (current, next) => next as u8 == *current as u8 + 1,
        }
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileState {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "discovered" => Ok(Self::Discovered),
            "started" => Ok(Self::Started),
            "normalized" => Ok(Self::Normalized),
            "aggregated" => Ok(Self::Aggregated),
            "correlated" => Ok(Self::Correlated),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ParseError::FileState(other.to_string())),
        }
    }
}

/// Per-file processing record kept alongside a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStats {
    pub manifest_id: i64,
    pub report_name: String,
    pub status: FileState,
    /// Last stage whose writes committed; retries resume after it.
    pub committed_state: FileState,
    pub attempts: u32,
    pub last_started_datetime: Option<String>,
    pub last_completed_datetime: Option<String>,
    pub rows_loaded: u64,
    pub rows_skipped: u64,
    pub fields_nulled: u64,
    pub checksum: Option<String>,
    pub last_error: Option<String>,
}

/// A cloud daily line item as seen by the correlator.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudDailyItem {
    pub id: i64,
    pub usage_start: NaiveDate,
    pub resource_id: Option<String>,
    pub cost: Decimal,
    pub tags: Tags,
}

/// A cluster pod usage daily line item.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterUsageItem {
    pub id: i64,
    pub usage_start: NaiveDate,
    pub cluster_id: String,
    pub cluster_alias: Option<String>,
    pub namespace: String,
    pub node: Option<String>,
    pub resource_id: Option<String>,
}

/// A cluster persistent volume daily line item.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterStorageItem {
    pub id: i64,
    pub usage_start: NaiveDate,
    pub cluster_id: String,
    pub cluster_alias: Option<String>,
    pub namespace: String,
    pub node: Option<String>,
    pub persistentvolume_labels: Tags,
    pub persistentvolumeclaim_labels: Tags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    ResourceId,
    Tag,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceId => "resource_id",
            Self::Tag => "tag",
        }
    }
}

/// One cluster line item matched to a cloud line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatch {
    pub cluster_item_id: i64,
    pub kind: MatchKind,
    pub cluster_id: String,
    pub namespace: String,
    pub node: Option<String>,
    pub allocated_cost: Decimal,
}

/// A cloud daily line item joined to the cluster items it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRecord {
    pub usage_start: NaiveDate,
    pub cloud_item_id: i64,
    pub resource_id: Option<String>,
    pub cloud_cost: Decimal,
    pub shared_projects: u32,
    pub matches: Vec<CorrelationMatch>,
}

impl CorrelationRecord {
    pub fn allocated_total(&self) -> Decimal {
        self.matches.iter().map(|item| item.allocated_cost).sum()
    }
}

/// Externally queried day-granular cost row.
///
/// `dimension` is the service (product code, Azure service name) for cloud
/// rows and the namespace for cluster rows. `resource_type` narrows a cloud
/// service to its usage type or Azure resource type; cluster rows leave it
/// empty and carry [`ClusterMetrics`] instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub provider_uuid: Uuid,
    pub source: String,
    pub usage_start: NaiveDate,
    pub usage_end: NaiveDate,
    pub account: String,
    pub dimension: String,
    pub resource_type: String,
    pub cost: Decimal,
    pub infrastructure_cost: Decimal,
    pub derived_cost: Decimal,
    pub usage: Decimal,
    pub cost_units: String,
    pub usage_units: String,
    pub cluster_metrics: Option<ClusterMetrics>,
}

/// Pod and node figures of one cluster namespace for one day, in hours and
/// gigabytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterMetrics {
    pub pod_usage_cpu_core_hours: Decimal,
    pub pod_request_cpu_core_hours: Decimal,
    pub pod_limit_cpu_core_hours: Decimal,
    pub pod_usage_memory_gigabyte_hours: Decimal,
    pub pod_request_memory_gigabyte_hours: Decimal,
    pub pod_limit_memory_gigabyte_hours: Decimal,
    /// Summed over the distinct nodes the namespace ran on.
    pub node_capacity_cpu_cores: Decimal,
    pub node_capacity_memory_gigabytes: Decimal,
}

/// Precomputed "last N days" answer for one grouping key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub time_scope_value: i32,
    pub time_scope_units: String,
    pub source: String,
    pub account: String,
    pub dimension: String,
    pub resource_type: String,
    pub cost: Decimal,
    pub infrastructure_cost: Decimal,
    pub derived_cost: Decimal,
    pub usage: Decimal,
    pub cost_units: String,
    pub usage_units: String,
}

/// First day of the window covered by a time scope ending on `latest`.
pub fn time_scope_start(latest: NaiveDate, time_scope_value: i32) -> NaiveDate {
    let days = i64::from(time_scope_value.unsigned_abs().max(1)) - 1;
    latest - chrono::Duration::days(days)
}

/// Inclusive list of calendar days between two dates.
pub fn days_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|day| *day <= end)
        .collect::<Vec<_>>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("date")
    }

    #[test]
    fn provider_type_round_trips_canonical_names() {
        for kind in ProviderType::ALL {
            assert_eq!(kind.as_str().parse::<ProviderType>(), Ok(kind));
        }
        assert_eq!(
            "GCP".parse::<ProviderType>(),
            Err(ParseError::ProviderType("GCP".to_string()))
        );
    }

    #[test]
    fn tenant_schema_derives_from_account() {
        let schema = TenantSchema::from_account("10001").expect("schema");
        assert_eq!(schema.as_str(), "acct10001");
        assert!(TenantSchema::new("../etc").is_err());
        assert!(TenantSchema::new("1abc").is_err());
    }

    #[test]
    fn file_state_allows_only_forward_steps() {
        assert!(FileState::Discovered.can_advance_to(FileState::Started));
        assert!(FileState::Normalized.can_advance_to(FileState::Aggregated));
        assert!(FileState::Aggregated.can_advance_to(FileState::Correlated));
        assert!(FileState::Aggregated.can_advance_to(FileState::Completed));
        assert!(FileState::Normalized.can_advance_to(FileState::Failed));
        assert!(FileState::Failed.can_advance_to(FileState::Started));
        assert!(!FileState::Started.can_advance_to(FileState::Aggregated));
        assert!(!FileState::Completed.can_advance_to(FileState::Failed));
    }

    #[test]
    fn time_scope_windows_end_on_latest_day() {
        let latest = day("2019-03-31");
        assert_eq!(time_scope_start(latest, -1), latest);
        assert_eq!(time_scope_start(latest, -2), day("2019-03-30"));
        assert_eq!(time_scope_start(latest, -10), day("2019-03-22"));
        assert_eq!(time_scope_start(latest, -30), day("2019-03-02"));
    }

    #[test]
    fn days_between_is_inclusive() {
        let days = days_between(day("2019-02-27"), day("2019-03-01"));
        assert_eq!(
            days,
            vec![day("2019-02-27"), day("2019-02-28"), day("2019-03-01")]
        );
        assert!(days_between(day("2019-03-02"), day("2019-03-01")).is_empty());
    }
}
