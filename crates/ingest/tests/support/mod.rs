#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::Compression as GzLevel;
use flate2::write::GzEncoder;
use ledger_core::{
    Compression, Credential, Manifest, ManifestInput, Provider, ProviderType, SourceName,
    TenantSchema,
};
use ledger_db::{Db, TenantStore};
use tempfile::TempDir;
use uuid::Uuid;

pub const AWS_HEADER: &str = "identity/LineItemId,lineItem/UsageStartDate,lineItem/UsageEndDate,lineItem/UsageAccountId,lineItem/ProductCode,lineItem/ResourceId,lineItem/UsageAmount,lineItem/UnblendedCost,lineItem/CurrencyCode,resourceTags/user:environment";

pub struct TestEnv {
    pub dir: TempDir,
    pub db: Db,
    pub schema: TenantSchema,
}

impl TestEnv {
    pub fn reports_dir(&self) -> PathBuf {
        let path = self.dir.path().join("reports");
        fs::create_dir_all(&path).expect("reports dir");
        path
    }

    pub fn write_report(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.reports_dir().join(name);
        fs::write(&path, contents).expect("write report");
        path
    }

    pub fn write_gzip_report(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.reports_dir().join(name);
        let file = fs::File::create(&path).expect("create gzip");
        let mut encoder = GzEncoder::new(file, GzLevel::default());
        encoder.write_all(contents.as_bytes()).expect("write gzip");
        encoder.finish().expect("finish gzip");
        path
    }
}

pub fn setup_env() -> TestEnv {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = TenantStore::new(dir.path().join("db"));
    let schema = TenantSchema::from_account("10001").expect("schema");
    let db = store.open(&schema).expect("open db");
    TestEnv { dir, db, schema }
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

pub fn start_manifest(
    db: &mut Db,
    provider: &Provider,
    report_dir: &Path,
    files: &[&str],
    compression: Compression,
) -> Manifest {
    let manifest = db
        .upsert_manifest(&ManifestInput {
            provider_uuid: provider.uuid,
            assembly_id: format!("assembly-{}", Uuid::new_v4()),
            billing_period_start: chrono::NaiveDate::from_ymd_opt(2019, 3, 1).expect("start"),
            billing_period_end: chrono::NaiveDate::from_ymd_opt(2019, 3, 31).expect("end"),
            report_dir: report_dir.to_string_lossy().to_string(),
            report_files: files.iter().map(|name| name.to_string()).collect(),
            compression,
        })
        .expect("manifest");
    for name in files {
        db.mark_file_started(manifest.id, name).expect("start file");
    }
    manifest
}
