#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use ledger_app::{Orchestrator, PipelineConfig};
use ledger_core::{
    Compression, Credential, Manifest, ManifestInput, Provider, ProviderType, SourceName,
    TenantSchema,
};
use ledger_db::{Db, TenantStore};
use tempfile::TempDir;
use uuid::Uuid;

pub const AWS_HEADER: &str = "identity/LineItemId,lineItem/UsageStartDate,lineItem/UsageEndDate,lineItem/UsageAccountId,lineItem/ProductCode,lineItem/ResourceId,lineItem/UsageAmount,lineItem/UnblendedCost,lineItem/CurrencyCode";

pub const OCP_USAGE_HEADER: &str = "interval_start,interval_end,namespace,pod,node,resource_id,pod_usage_cpu_core_seconds,pod_labels";

pub struct TestEnv {
    pub dir: TempDir,
    pub store: TenantStore,
    pub schema: TenantSchema,
    pub orchestrator: Orchestrator,
}

impl TestEnv {
    pub fn db(&self) -> Db {
        self.store.open(&self.schema).expect("open db")
    }

    pub fn reports_dir(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join("reports").join(name);
        fs::create_dir_all(&path).expect("reports dir");
        path
    }

    pub fn write_report(&self, dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).expect("write report");
        path
    }
}

pub fn test_config(dir: &Path) -> PipelineConfig {
    PipelineConfig {
        data_dir: dir.join("db"),
        workers: 2,
        stage_timeout_secs: 30,
        max_attempts: 2,
        backoff_initial_ms: 1,
        backoff_max_ms: 5,
        ..PipelineConfig::default()
    }
}

pub fn setup_env() -> TestEnv {
    setup_env_with(|_| {})
}

pub fn setup_env_with(adjust: impl FnOnce(&mut PipelineConfig)) -> TestEnv {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = test_config(dir.path());
    adjust(&mut config);
    let store = config.tenant_store();
    let schema = TenantSchema::from_account("10001").expect("schema");
    store.open(&schema).expect("migrate");
    let orchestrator = Orchestrator::new(store.clone(), config);
    TestEnv {
        dir,
        store,
        schema,
        orchestrator,
    }
}

pub fn aws_provider(db: &Db, report_dir: &Path) -> Provider {
    let provider = Provider {
        uuid: Uuid::new_v4(),
        name: "Local AWS".to_string(),
        provider_type: ProviderType::AwsLocal,
        credential: Credential::RoleArn {
            role_arn: "arn:aws:iam::111111111111:role/CostManagement".to_string(),
        },
        source: SourceName::LocalDir {
            path: report_dir.to_string_lossy().to_string(),
        },
        setup_complete: false,
        created_at: "2019-03-01T00:00:00Z".to_string(),
    };
    db.upsert_provider(&provider).expect("provider");
    provider
}

pub fn ocp_provider(db: &Db) -> Provider {
    let provider = Provider {
        uuid: Uuid::new_v4(),
        name: "my-cluster".to_string(),
        provider_type: ProviderType::Ocp,
        credential: Credential::Cluster {
            cluster_id: "my-ocp-cluster-1".to_string(),
        },
        source: SourceName::None,
        setup_complete: false,
        created_at: "2019-03-01T00:00:01Z".to_string(),
    };
    db.upsert_provider(&provider).expect("provider");
    provider
}

pub fn march(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 3, day).expect("march day")
}

pub fn register_manifest(
    db: &mut Db,
    provider: &Provider,
    report_dir: &Path,
    files: &[&str],
) -> Manifest {
    db.upsert_manifest(&ManifestInput {
        provider_uuid: provider.uuid,
        assembly_id: format!("assembly-{}", Uuid::new_v4()),
        billing_period_start: march(1),
        billing_period_end: march(31),
        report_dir: report_dir.to_string_lossy().to_string(),
        report_files: files.iter().map(|name| name.to_string()).collect(),
        compression: Compression::None,
    })
    .expect("manifest")
}

/// One AWS line item on the given March day.
pub fn aws_row(id: u32, day: u32, resource: &str, cost: &str) -> String {
    format!(
        "{id},2019-03-{day:02}T00:00:00Z,2019-03-{day:02}T01:00:00Z,111111111111,AmazonEC2,{resource},1,{cost},USD"
    )
}

/// One pod usage row of the test cluster on the given March day.
pub fn ocp_row(day: u32, namespace: &str, pod: &str, resource: &str, cpu_seconds: u32) -> String {
    format!(
        "2019-03-{day:02} 00:00:00 +0000 UTC,2019-03-{day:02} 01:00:00 +0000 UTC,{namespace},{pod},node-1,{resource},{cpu_seconds},label_app:web"
    )
}
