use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ledger_db::TenantStore;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::orchestrator::Backoff;

const DEFAULT_DATA_DIR: &str = "cost-ledger-data";

/// Settings for the processing pipeline, read from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding one database file per tenant schema.
    pub data_dir: PathBuf,
    pub workers: usize,
    pub stage_timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_factor: f64,
    /// Fraction of each backoff delay randomized up or down.
    pub backoff_jitter: f64,
    /// How long a stage waits on another writer's lock before the attempt
    /// fails as transient.
    pub busy_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            workers: 4,
            stage_timeout_secs: 900,
            max_attempts: 3,
            backoff_initial_ms: 250,
            backoff_max_ms: 10_000,
            backoff_factor: 2.0,
            backoff_jitter: 0.1,
            busy_timeout_ms: 5_000,
        }
    }
}

impl PipelineConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_initial_ms),
            Duration::from_millis(self.backoff_max_ms),
            self.backoff_factor,
        )
        .with_jitter(self.backoff_jitter)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Tenant databases under `data_dir`, opened with the configured busy
    /// timeout.
    pub fn tenant_store(&self) -> TenantStore {
        TenantStore::new(self.data_dir.clone()).with_busy_timeout(self.busy_timeout())
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(AppError::Config("workers must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(AppError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.stage_timeout_secs == 0 {
            return Err(AppError::Config(
                "stage_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.backoff_factor.is_nan() || self.backoff_factor < 1.0 {
            return Err(AppError::Config(
                "backoff_factor must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(AppError::Config(
                "backoff_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: PipelineConfig,
    pub path: PathBuf,
    pub created: bool,
}

/// Read the config at `path`, writing the defaults there first when the
/// file does not exist yet.
pub fn load_or_create(path: &Path) -> Result<ConfigLoad> {
    if path.exists() {
        let contents = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("read config {}: {}", path.display(), err)))?;
        let config: PipelineConfig = toml::from_str(&contents)
            .map_err(|err| AppError::Config(format!("parse config {}: {}", path.display(), err)))?;
        config.validate()?;
        return Ok(ConfigLoad {
            config,
            path: path.to_path_buf(),
            created: false,
        });
    }

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .map_err(|err| AppError::Config(format!("create config dir {}: {}", dir.display(), err)))?;
    }
    let config = PipelineConfig::default();
    let contents = toml::to_string_pretty(&config)
        .map_err(|err| AppError::Config(format!("serialize config: {}", err)))?;
    fs::write(path, contents)
        .map_err(|err| AppError::Config(format!("write config {}: {}", path.display(), err)))?;
    Ok(ConfigLoad {
        config,
        path: path.to_path_buf(),
        created: true,
    })
}
