mod args;
mod config;
mod dirs;

use std::error::Error;
use std::io;
use std::path::PathBuf;

use clap::Parser;
use ledger_app::{Orchestrator, ProviderAccessor, load_or_create};
use ledger_core::{Credential, Provider, ProviderType, SourceName, TenantSchema};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use uuid::Uuid;

use args::{Cli, Command, ProviderArgs};

type CliResult<T> = Result<T, Box<dyn Error>>;

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let config_file = config::config_path(cli.config.as_deref()).map_err(io::Error::other)?;
    let loaded = load_or_create(&config_file)?;
    if loaded.created {
        tracing::info!(path = %loaded.path.display(), "created default config");
    }
    let mut pipeline = loaded.config;
    pipeline.data_dir = dirs::resolve_data_dir(&loaded.path, &pipeline.data_dir);
    tracing::debug!(data_dir = %pipeline.data_dir.display(), "using data dir");

    let store = pipeline.tenant_store();
    let orchestrator = Orchestrator::new(store.clone(), pipeline);

    match cli.command {
        Command::Validate(provider) => {
            let credential = credential_from(&provider)?;
            let source = source_from(&provider)?;
            let accessor = ProviderAccessor::new(provider.provider_type);
            let reachable = accessor.cost_usage_source_ready(&credential, &source)?;
            print_json(&serde_json::json!({
                "provider_type": provider.provider_type,
                "reachable": reachable,
            }))
        }
        Command::RegisterProvider {
            provider,
            account,
            name,
        } => {
            let schema = TenantSchema::from_account(&account)?;
            let credential = credential_from(&provider)?;
            let source = source_from(&provider)?;
            ProviderAccessor::new(provider.provider_type)
                .cost_usage_source_ready(&credential, &source)?;
            let record = Provider {
                uuid: Uuid::new_v4(),
                name,
                provider_type: provider.provider_type,
                credential,
                source,
                setup_complete: false,
                created_at: chrono::Utc::now().to_rfc3339(),
            };
            store.open(&schema)?.upsert_provider(&record)?;
            tracing::info!(
                schema = schema.as_str(),
                provider_uuid = %record.uuid,
                provider_type = record.provider_type.as_str(),
                "provider registered"
            );
            print_json(&record)
        }
        Command::Discover {
            account,
            provider,
            dir,
        } => {
            let schema = TenantSchema::from_account(&account)?;
            let mut db = store.open(&schema)?;
            let record = db.require_provider(provider)?;
            let dir = match (dir, &record.source) {
                (Some(dir), _) => dir,
                (None, SourceName::LocalDir { path }) => PathBuf::from(path),
                (None, _) => {
                    return Err(missing("provider has no local report directory; pass --dir"));
                }
            };
            let mut manifests = Vec::new();
            for input in ingest::discover_manifests(&dir, record.uuid)? {
                manifests.push(db.upsert_manifest(&input)?);
            }
            print_json(&manifests)
        }
        Command::Process { account, manifest } => {
            let schema = TenantSchema::from_account(&account)?;
            let manifest_ids = match manifest {
                Some(id) => vec![id],
                None => store
                    .open(&schema)?
                    .list_manifests(None)?
                    .into_iter()
                    .filter(|manifest| !manifest.is_complete())
                    .map(|manifest| manifest.id)
                    .collect(),
            };
            let signal_target = orchestrator.clone();
            let watcher = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, stopping after running stages");
                    signal_target.shutdown();
                }
            });
            let mut outcomes = Vec::new();
            for manifest_id in manifest_ids {
                outcomes.push(orchestrator.process_manifest(&schema, manifest_id).await?);
            }
            watcher.abort();
            print_json(&outcomes)
        }
        Command::Rollup { account } => {
            let schema = TenantSchema::from_account(&account)?;
            let rows = orchestrator.build_aggregates(&schema).await?;
            print_json(&serde_json::json!({ "schema": schema.as_str(), "aggregate_rows": rows }))
        }
        Command::Infra { account, provider } => {
            let schema = TenantSchema::from_account(&account)?;
            let record = store.open(&schema)?.require_provider(provider)?;
            let infra = if record.provider_type.is_cluster() {
                ProviderAccessor::new(record.provider_type).infrastructure_type(
                    record.uuid,
                    &store,
                    &schema,
                )?
            } else {
                record.provider_type.infra_type()
            };
            let clusters = ProviderAccessor::new(ProviderType::Ocp)
                .infrastructure_key_list(infra, &store, &schema)?;
            print_json(&serde_json::json!({
                "provider_uuid": record.uuid,
                "infrastructure_type": infra,
                "cluster_ids": clusters,
            }))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn missing(message: &str) -> Box<dyn Error> {
    Box::new(io::Error::new(io::ErrorKind::InvalidInput, message.to_string()))
}

fn required<'a>(value: &'a Option<String>, flag: &str) -> CliResult<&'a str> {
    value
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| missing(&format!("--{flag} is required for this provider type")))
}

fn credential_from(args: &ProviderArgs) -> CliResult<Credential> {
    Ok(match args.provider_type {
        ProviderType::Aws | ProviderType::AwsLocal => Credential::RoleArn {
            role_arn: required(&args.role_arn, "role-arn")?.to_string(),
        },
        ProviderType::Azure | ProviderType::AzureLocal => Credential::Subscription {
            subscription_id: required(&args.subscription_id, "subscription-id")?.to_string(),
            tenant_id: args.tenant_id.clone(),
            client_id: args.client_id.clone(),
        },
        ProviderType::Ocp => Credential::Cluster {
            cluster_id: required(&args.cluster_id, "cluster-id")?.to_string(),
        },
    })
}

fn source_from(args: &ProviderArgs) -> CliResult<SourceName> {
    let local_dir = || -> CliResult<SourceName> {
        let path = args
            .local_dir
            .as_ref()
            .ok_or_else(|| missing("--local-dir is required for this provider type"))?;
        Ok(SourceName::LocalDir {
            path: path.to_string_lossy().to_string(),
        })
    };
    Ok(match args.provider_type {
        ProviderType::Aws => SourceName::Bucket {
            bucket: required(&args.bucket, "bucket")?.to_string(),
        },
        ProviderType::Azure => SourceName::StorageAccount {
            resource_group: required(&args.resource_group, "resource-group")?.to_string(),
            storage_account: required(&args.storage_account, "storage-account")?.to_string(),
            container: args.container.clone(),
        },
        ProviderType::AwsLocal | ProviderType::AzureLocal => local_dir()?,
        ProviderType::Ocp => SourceName::None,
    })
}
