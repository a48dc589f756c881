use ledger_core::{Provider, ProviderType};
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use crate::Db;
use crate::error::{DbError, Result};
use crate::helpers::{PROVIDER_COLUMNS, row_to_provider};

impl Db {
    /// Insert a provider, or refresh its name and credentials when it exists.
    pub fn upsert_provider(&self, provider: &Provider) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO provider (
              uuid, name, provider_type, credential, source, setup_complete, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(uuid) DO UPDATE SET
              name = excluded.name,
              credential = excluded.credential,
              source = excluded.source
            "#,
            params![
                provider.uuid.to_string(),
                provider.name,
                provider.provider_type.as_str(),
                serde_json::to_string(&provider.credential)?,
                serde_json::to_string(&provider.source)?,
                provider.setup_complete as i64,
                provider.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_provider(&self, uuid: Uuid) -> Result<Option<Provider>> {
        let sql = format!("SELECT {PROVIDER_COLUMNS} FROM provider WHERE uuid = ?1");
        self.conn
            .query_row(&sql, params![uuid.to_string()], row_to_provider)
            .optional()
            .map_err(Into::into)
    }

    pub fn require_provider(&self, uuid: Uuid) -> Result<Provider> {
        self.get_provider(uuid)?
            .ok_or_else(|| DbError::NotFound(format!("provider {uuid}")))
    }

    pub fn list_providers(&self) -> Result<Vec<Provider>> {
        let sql = format!("SELECT {PROVIDER_COLUMNS} FROM provider ORDER BY created_at, uuid");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_provider)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn list_providers_of(&self, types: &[ProviderType]) -> Result<Vec<Provider>> {
        Ok(self
            .list_providers()?
            .into_iter()
            .filter(|provider| types.contains(&provider.provider_type))
            .collect())
    }

    pub fn set_setup_complete(&self, uuid: Uuid) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE provider SET setup_complete = 1 WHERE uuid = ?1 AND setup_complete = 0",
            params![uuid.to_string()],
        )?;
        Ok(changed > 0)
    }
}
