use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use ledger_core::ProviderType;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "cost-ledger", about = "Cloud cost report ingestion and correlation")]
pub struct Cli {
    /// Config file; created with defaults when missing.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check that a provider's credential can reach its report source.
    Validate(ProviderArgs),
    /// Validate and store a provider for a tenant.
    RegisterProvider {
        #[command(flatten)]
        provider: ProviderArgs,
        #[arg(long)]
        account: String,
        #[arg(long)]
        name: String,
    },
    /// Record the manifests found in a provider's local report directory.
    Discover {
        #[arg(long)]
        account: String,
        #[arg(long)]
        provider: Uuid,
        /// Directory to scan instead of the provider's configured one.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Process pending files of one manifest, or of every incomplete one.
    Process {
        #[arg(long)]
        account: String,
        #[arg(long)]
        manifest: Option<i64>,
    },
    /// Rebuild the time-scoped rollups of a tenant.
    Rollup {
        #[arg(long)]
        account: String,
    },
    /// Show what infrastructure a provider runs on.
    Infra {
        #[arg(long)]
        account: String,
        #[arg(long)]
        provider: Uuid,
    },
}

#[derive(Debug, Args)]
pub struct ProviderArgs {
    /// Provider type: AWS, AWS-local, AZURE, AZURE-local or OCP.
    #[arg(long = "type", value_parser = parse_provider_type)]
    pub provider_type: ProviderType,
    #[arg(long)]
    pub role_arn: Option<String>,
    #[arg(long)]
    pub subscription_id: Option<String>,
    #[arg(long)]
    pub tenant_id: Option<String>,
    #[arg(long)]
    pub client_id: Option<String>,
    #[arg(long)]
    pub cluster_id: Option<String>,
    #[arg(long)]
    pub bucket: Option<String>,
    #[arg(long)]
    pub local_dir: Option<PathBuf>,
    #[arg(long)]
    pub resource_group: Option<String>,
    #[arg(long)]
    pub storage_account: Option<String>,
    #[arg(long)]
    pub container: Option<String>,
}

fn parse_provider_type(value: &str) -> Result<ProviderType, String> {
    value.parse().map_err(|_| {
        let known = ProviderType::ALL
            .iter()
            .map(|provider_type| provider_type.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        format!("unknown provider type {value}; expected one of {known}")
    })
}
