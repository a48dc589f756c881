use ledger_core::ProviderType;
use ledger_db::RawTable;

/// Target type a report field is coerced to before loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Decimal,
    Integer,
    Timestamp,
    Date,
    /// A key/value map: JSON object or `label_key:value|...`.
    Labels,
}

/// One report header and the raw column it loads into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub header: &'static str,
    pub column: &'static str,
    pub kind: ColumnType,
}

const fn col(header: &'static str, column: &'static str, kind: ColumnType) -> ColumnSpec {
    ColumnSpec {
        header,
        column,
        kind,
    }
}

/// Declared shape of a provider's report and the raw table it fills.
#[derive(Debug)]
pub struct TableSchema {
    pub table: RawTable,
    pub columns: &'static [ColumnSpec],
    /// Headers with this prefix are folded into one labels column, keyed by
    /// the rest of the header.
    pub tag_prefix: Option<(&'static str, &'static str)>,
}

impl TableSchema {
    /// Raw column names in load order, tag column last.
    pub fn column_names(&self) -> Vec<&'static str> {
        let mut names = self
            .columns
            .iter()
            .map(|spec| spec.column)
            .collect::<Vec<_>>();
        if let Some((_, column)) = self.tag_prefix {
            names.push(column);
        }
        names
    }
}

use ColumnType::{Decimal, Labels, Text, Timestamp};

pub static AWS_LINE_ITEM: TableSchema = TableSchema {
    table: RawTable::AwsLineItem,
    columns: &[
        col("lineItem/UsageStartDate", "usage_start", Timestamp),
        col("lineItem/UsageEndDate", "usage_end", Timestamp),
        col("lineItem/UsageAccountId", "usage_account_id", Text),
        col("lineItem/ProductCode", "product_code", Text),
        col("lineItem/UsageType", "usage_type", Text),
        col("lineItem/Operation", "operation", Text),
        col("lineItem/AvailabilityZone", "availability_zone", Text),
        col("lineItem/ResourceId", "resource_id", Text),
        col("lineItem/UsageAmount", "usage_amount", Decimal),
        col("pricing/unit", "unit", Text),
        col("lineItem/UnblendedRate", "unblended_rate", Decimal),
        col("lineItem/UnblendedCost", "unblended_cost", Decimal),
        col("lineItem/BlendedCost", "blended_cost", Decimal),
        col("lineItem/CurrencyCode", "currency_code", Text),
    ],
    tag_prefix: Some(("resourceTags/user:", "tags")),
};

pub static AZURE_LINE_ITEM: TableSchema = TableSchema {
    table: RawTable::AzureLineItem,
    columns: &[
        col("UsageDateTime", "usage_start", Timestamp),
        col("UsageDateTime", "usage_end", Timestamp),
        col("SubscriptionGuid", "subscription_guid", Text),
        col("ServiceName", "service_name", Text),
        col("ResourceLocation", "resource_location", Text),
        col("ResourceType", "resource_type", Text),
        col("InstanceId", "instance_id", Text),
        col("UsageQuantity", "usage_quantity", Decimal),
        col("PreTaxCost", "pretax_cost", Decimal),
        col("Currency", "currency", Text),
        col("UnitOfMeasure", "unit_of_measure", Text),
        col("Tags", "tags", Labels),
    ],
    tag_prefix: None,
};

pub static OCP_USAGE_LINE_ITEM: TableSchema = TableSchema {
    table: RawTable::OcpUsageLineItem,
    columns: &[
        col("interval_start", "usage_start", Timestamp),
        col("interval_end", "usage_end", Timestamp),
        col("namespace", "namespace", Text),
        col("pod", "pod", Text),
        col("node", "node", Text),
        col("resource_id", "resource_id", Text),
        col("pod_usage_cpu_core_seconds", "pod_usage_cpu_core_seconds", Decimal),
        col("pod_request_cpu_core_seconds", "pod_request_cpu_core_seconds", Decimal),
        col("pod_limit_cpu_core_seconds", "pod_limit_cpu_core_seconds", Decimal),
        col("pod_usage_memory_byte_seconds", "pod_usage_memory_byte_seconds", Decimal),
        col("pod_request_memory_byte_seconds", "pod_request_memory_byte_seconds", Decimal),
        col("pod_limit_memory_byte_seconds", "pod_limit_memory_byte_seconds", Decimal),
        col("node_capacity_cpu_cores", "node_capacity_cpu_cores", Decimal),
        col("node_capacity_memory_bytes", "node_capacity_memory_bytes", Decimal),
        col("pod_labels", "pod_labels", Labels),
    ],
    tag_prefix: None,
};

pub static OCP_STORAGE_LINE_ITEM: TableSchema = TableSchema {
    table: RawTable::OcpStorageLineItem,
    columns: &[
        col("interval_start", "usage_start", Timestamp),
        col("interval_end", "usage_end", Timestamp),
        col("namespace", "namespace", Text),
        col("pod", "pod", Text),
        col("node", "node", Text),
        col("persistentvolumeclaim", "persistentvolumeclaim", Text),
        col("persistentvolume", "persistentvolume", Text),
        col("storageclass", "storageclass", Text),
        col(
            "persistentvolumeclaim_capacity_bytes",
            "persistentvolumeclaim_capacity_bytes",
            Decimal,
        ),
        col(
            "persistentvolumeclaim_capacity_byte_seconds",
            "persistentvolumeclaim_capacity_byte_seconds",
            Decimal,
        ),
        col(
            "volume_request_storage_byte_seconds",
            "volume_request_storage_byte_seconds",
            Decimal,
        ),
        col(
            "persistentvolumeclaim_usage_byte_seconds",
            "persistentvolumeclaim_usage_byte_seconds",
            Decimal,
        ),
        col("persistentvolume_labels", "persistentvolume_labels", Labels),
        col("persistentvolumeclaim_labels", "persistentvolumeclaim_labels", Labels),
    ],
    tag_prefix: None,
};

const OCP_STORAGE_MARKER: &str = "persistentvolumeclaim";

/// Pick the declared schema for a provider's report, given its header row.
pub fn schema_for(provider_type: ProviderType, headers: &[String]) -> &'static TableSchema {
    match provider_type {
        ProviderType::Aws | ProviderType::AwsLocal => &AWS_LINE_ITEM,
        ProviderType::Azure | ProviderType::AzureLocal => &AZURE_LINE_ITEM,
        ProviderType::Ocp => {
            if headers.iter().any(|header| header == OCP_STORAGE_MARKER) {
                &OCP_STORAGE_LINE_ITEM
            } else {
                &OCP_USAGE_LINE_ITEM
            }
        }
    }
}
