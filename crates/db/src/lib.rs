use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ledger_core::TenantSchema;
use rusqlite::{Connection, Transaction, TransactionBehavior};

mod aggregates;
mod correlation;
mod daily;
pub mod error;
mod helpers;
mod manifests;
mod migrations;
mod providers;
mod raw;
mod summary;
pub mod types;

pub use correlation::CorrelationOutcome;
pub use daily::{DailyRebuild, DailyRow};
pub use error::{DbError, Result};
pub use types::{FieldValue, LoadStats, RawBatch, RawTable};

/// How long a connection waits on another writer before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection to one tenant's database.
pub struct Db {
    conn: Connection,
}

impl Db {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_busy_timeout(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.pragma_update(None, "cache_size", -20_000)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self { conn })
    }

    /// Writers take the lock up front so concurrent stages queue on the
    /// busy timeout instead of failing on a lock upgrade.
    fn write_tx(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Raw connection, for tests and ad-hoc inspection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Maps tenant schemas onto their own database files under one root.
///
/// A [`Db`] opened through the store only ever sees a single tenant's
/// tables, so a processing run cannot read or write another tenant's rows.
#[derive(Debug, Clone)]
pub struct TenantStore {
    root: PathBuf,
    busy_timeout: Duration,
}

impl TenantStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, schema: &TenantSchema) -> PathBuf {
        self.root.join(format!("{}.sqlite", schema.as_str()))
    }

    /// Open (creating if needed) the tenant's database with its tables in place.
    pub fn open(&self, schema: &TenantSchema) -> Result<Db> {
        fs::create_dir_all(&self.root)?;
        let mut db = Db::open_with_busy_timeout(self.path_for(schema), self.busy_timeout)?;
        db.migrate()?;
        Ok(db)
    }

    /// Tenant schemas that already have a database file.
    pub fn schemas(&self) -> Result<Vec<TenantSchema>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut schemas = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("sqlite") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if let Ok(schema) = TenantSchema::new(stem) {
                schemas.push(schema);
            }
        }
        schemas.sort();
        Ok(schemas)
    }
}
