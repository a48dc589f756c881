#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, Utc};
use ledger_core::{
    Compression, Credential, Manifest, ManifestInput, Provider, ProviderType, SourceName, Tags,
    TenantSchema,
};
use ledger_db::{Db, FieldValue, LoadStats, RawBatch, RawTable, TenantStore};
use rust_decimal::Decimal;
use tempfile::TempDir;
use uuid::Uuid;

pub struct TestDb {
    pub _dir: TempDir,
    pub db: Db,
    pub store: TenantStore,
    pub schema: TenantSchema,
}

pub fn setup_db() -> TestDb {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = TenantStore::new(dir.path());
    let schema = TenantSchema::from_account("10001").expect("schema");
    let db = store.open(&schema).expect("open db");
    TestDb {
        _dir: dir,
        db,
        store,
        schema,
    }
}

pub fn day(value: &str) -> NaiveDate {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("date")
}

pub fn ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .expect("timestamp")
        .with_timezone(&Utc)
}

pub fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

pub fn aws_provider(db: &Db) -> Provider {
    let provider = Provider {
        uuid: Uuid::new_v4(),
        name: "Test AWS".to_string(),
        provider_type: ProviderType::Aws,
        credential: Credential::RoleArn {
            role_arn: "arn:aws:iam::111111111111:role/CostManagement".to_string(),
        },
        source: SourceName::Bucket {
            bucket: "cost-reports".to_string(),
        },
        setup_complete: false,
        created_at: "2019-03-01T00:00:00Z".to_string(),
    };
    db.upsert_provider(&provider).expect("provider");
    provider
}

pub fn ocp_provider(db: &Db, cluster_id: &str) -> Provider {
    let provider = Provider {
        uuid: Uuid::new_v4(),
        name: "Test OCP".to_string(),
        provider_type: ProviderType::Ocp,
        credential: Credential::Cluster {
            cluster_id: cluster_id.to_string(),
        },
        source: SourceName::None,
        setup_complete: false,
        created_at: "2019-03-01T00:00:01Z".to_string(),
    };
    db.upsert_provider(&provider).expect("provider");
    provider
}

pub fn manifest_for(db: &mut Db, provider: &Provider, files: &[&str]) -> Manifest {
    db.upsert_manifest(&ManifestInput {
        provider_uuid: provider.uuid,
        assembly_id: format!("assembly-{}", provider.uuid),
        billing_period_start: day("2019-03-01"),
        billing_period_end: day("2019-03-31"),
        report_dir: "/tmp/reports".to_string(),
        report_files: files.iter().map(|name| name.to_string()).collect(),
        compression: Compression::None,
    })
    .expect("manifest")
}

fn text(value: &str) -> FieldValue {
    FieldValue::Text(value.to_string())
}

fn load(db: &mut Db, manifest: &Manifest, file: &str, table: RawTable, columns: Vec<&'static str>, rows: Vec<Vec<FieldValue>>) {
    db.mark_file_started(manifest.id, file).expect("start");
    let batch = RawBatch {
        table,
        provider_uuid: manifest.provider_uuid,
        manifest_id: manifest.id,
        source_file: file.to_string(),
        columns,
        rows,
    };
    db.load_report_rows(file, &[batch], &LoadStats::default())
        .expect("load rows");
}

pub struct AwsRow<'a> {
    pub start: &'a str,
    pub resource_id: &'a str,
    pub product: &'a str,
    pub cost: Decimal,
    pub amount: Decimal,
    pub tags: Tags,
}

pub fn load_aws_rows(db: &mut Db, manifest: &Manifest, file: &str, rows: &[AwsRow<'_>]) {
    load_aws_rows_of_type(db, manifest, file, "BoxUsage:m5.large", rows);
}

pub fn load_aws_rows_of_type(
    db: &mut Db,
    manifest: &Manifest,
    file: &str,
    usage_type: &str,
    rows: &[AwsRow<'_>],
) {
    let columns = vec![
        "usage_start",
        "usage_end",
        "usage_account_id",
        "product_code",
        "usage_type",
        "resource_id",
        "usage_amount",
        "unit",
        "unblended_cost",
        "currency_code",
        "tags",
    ];
    let values = rows
        .iter()
        .map(|row| {
            vec![
                FieldValue::Timestamp(ts(row.start)),
                FieldValue::Timestamp(ts(row.start) + chrono::Duration::hours(1)),
                text("111111111111"),
                text(row.product),
                text(usage_type),
                text(row.resource_id),
                FieldValue::Decimal(row.amount),
                text("Hrs"),
                FieldValue::Decimal(row.cost),
                text("USD"),
                FieldValue::Json(row.tags.clone()),
            ]
        })
        .collect();
    load(db, manifest, file, RawTable::AwsLineItem, columns, values);
}

#[derive(Default)]
pub struct OcpUsageRow<'a> {
    pub start: &'a str,
    pub namespace: &'a str,
    pub node: &'a str,
    pub pod: &'a str,
    pub resource_id: &'a str,
    pub cpu_seconds: Decimal,
    pub request_cpu_seconds: Decimal,
    pub limit_cpu_seconds: Decimal,
    pub memory_byte_seconds: Decimal,
    pub request_memory_byte_seconds: Decimal,
    pub limit_memory_byte_seconds: Decimal,
    pub node_cpu_cores: Decimal,
    pub node_memory_bytes: Decimal,
}

pub fn load_ocp_usage_rows(
    db: &mut Db,
    manifest: &Manifest,
    file: &str,
    cluster_id: &str,
    rows: &[OcpUsageRow<'_>],
) {
    let columns = vec![
        "usage_start",
        "usage_end",
        "cluster_id",
        "namespace",
        "node",
        "pod",
        "resource_id",
        "pod_usage_cpu_core_seconds",
        "pod_request_cpu_core_seconds",
        "pod_limit_cpu_core_seconds",
        "pod_usage_memory_byte_seconds",
        "pod_request_memory_byte_seconds",
        "pod_limit_memory_byte_seconds",
        "node_capacity_cpu_cores",
        "node_capacity_memory_bytes",
    ];
    let values = rows
        .iter()
        .map(|row| {
            vec![
                FieldValue::Timestamp(ts(row.start)),
                FieldValue::Timestamp(ts(row.start) + chrono::Duration::hours(1)),
                text(cluster_id),
                text(row.namespace),
                text(row.node),
                text(row.pod),
                text(row.resource_id),
                FieldValue::Decimal(row.cpu_seconds),
                FieldValue::Decimal(row.request_cpu_seconds),
                FieldValue::Decimal(row.limit_cpu_seconds),
                FieldValue::Decimal(row.memory_byte_seconds),
                FieldValue::Decimal(row.request_memory_byte_seconds),
                FieldValue::Decimal(row.limit_memory_byte_seconds),
                FieldValue::Decimal(row.node_cpu_cores),
                FieldValue::Decimal(row.node_memory_bytes),
            ]
        })
        .collect();
    load(db, manifest, file, RawTable::OcpUsageLineItem, columns, values);
}

pub struct OcpStorageRow<'a> {
    pub start: &'a str,
    pub namespace: &'a str,
    pub pvc: &'a str,
    pub pv_labels: Tags,
    pub pvc_labels: Tags,
}

pub fn load_ocp_storage_rows(
    db: &mut Db,
    manifest: &Manifest,
    file: &str,
    cluster_id: &str,
    rows: &[OcpStorageRow<'_>],
) {
    let columns = vec![
        "usage_start",
        "usage_end",
        "cluster_id",
        "cluster_alias",
        "namespace",
        "persistentvolumeclaim",
        "persistentvolume",
        "persistentvolume_labels",
        "persistentvolumeclaim_labels",
    ];
    let values = rows
        .iter()
        .map(|row| {
            vec![
                FieldValue::Timestamp(ts(row.start)),
                FieldValue::Timestamp(ts(row.start) + chrono::Duration::hours(1)),
                text(cluster_id),
                text("Test OCP"),
                text(row.namespace),
                text(row.pvc),
                text(&format!("pv-{}", row.pvc)),
                FieldValue::Json(row.pv_labels.clone()),
                FieldValue::Json(row.pvc_labels.clone()),
            ]
        })
        .collect();
    load(db, manifest, file, RawTable::OcpStorageLineItem, columns, values);
}
