use crate::Db;
use crate::error::Result;

const MIGRATION_0001: &str = include_str!("../migrations/0001_init.sql");

const MIGRATIONS: &[(&str, &str)] = &[("0001_init", MIGRATION_0001)];

impl Db {
    /// Create every tenant table that is missing. Safe to run on each open.
    pub fn migrate(&mut self) -> Result<()> {
        let tx = self.write_tx()?;
        for (name, sql) in MIGRATIONS {
            tracing::trace!(migration = *name, "applying migration");
            tx.execute_batch(sql)?;
        }
        tx.commit()?;
        Ok(())
    }
}
