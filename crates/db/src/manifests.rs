use ledger_core::{FileState, FileStats, Manifest, ManifestInput};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::Db;
use crate::error::{DbError, Result};
use crate::helpers::{
    FILE_STATS_COLUMNS, MANIFEST_COLUMNS, fmt_date, now_rfc3339, row_to_file_stats,
    row_to_manifest,
};

impl Db {
    /// Record a discovered manifest and one stats row per report file.
    ///
    /// Rediscovering the same `(provider, assembly_id)` keeps the existing
    /// counters and only touches the updated timestamp.
    pub fn upsert_manifest(&mut self, input: &ManifestInput) -> Result<Manifest> {
        let now = now_rfc3339();
        let tx = self.write_tx()?;
        tx.execute(
            r#"
            INSERT INTO report_manifest (
              provider_uuid, assembly_id, billing_period_start, billing_period_end,
              report_dir, report_files, compression, num_total_files,
              num_processed_files, manifest_creation_datetime, manifest_updated_datetime
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?9)
            ON CONFLICT(provider_uuid, assembly_id) DO UPDATE SET
              manifest_updated_datetime = excluded.manifest_updated_datetime
            "#,
            params![
                input.provider_uuid.to_string(),
                input.assembly_id,
                fmt_date(input.billing_period_start),
                fmt_date(input.billing_period_end),
                input.report_dir,
                serde_json::to_string(&input.report_files)?,
                input.compression.as_str(),
                input.report_files.len() as i64,
                now,
            ],
        )?;
        let sql = format!(
            "SELECT {MANIFEST_COLUMNS} FROM report_manifest WHERE provider_uuid = ?1 AND assembly_id = ?2"
        );
        let manifest = tx.query_row(
            &sql,
            params![input.provider_uuid.to_string(), input.assembly_id],
            row_to_manifest,
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO report_stats (manifest_id, report_name) VALUES (?1, ?2)",
            )?;
            for name in &manifest.report_files {
                stmt.execute(params![manifest.id, name])?;
            }
        }
        tx.commit()?;
        tracing::info!(
            manifest_id = manifest.id,
            provider_uuid = %manifest.provider_uuid,
            assembly_id = %manifest.assembly_id,
            files = manifest.num_total_files,
            "manifest recorded"
        );
        Ok(manifest)
    }

    pub fn get_manifest(&self, id: i64) -> Result<Option<Manifest>> {
        load_manifest(&self.conn, id)
    }

    pub fn require_manifest(&self, id: i64) -> Result<Manifest> {
        self.get_manifest(id)?
            .ok_or_else(|| DbError::NotFound(format!("manifest {id}")))
    }

    pub fn list_manifests(&self, provider_uuid: Option<Uuid>) -> Result<Vec<Manifest>> {
        let sql = format!(
            r#"
            SELECT {MANIFEST_COLUMNS} FROM report_manifest
            WHERE (?1 IS NULL OR provider_uuid = ?1)
            ORDER BY billing_period_start, id
            "#
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![provider_uuid.map(|uuid| uuid.to_string())],
            row_to_manifest,
        )?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn is_manifest_complete(&self, id: i64) -> Result<bool> {
        Ok(self.require_manifest(id)?.is_complete())
    }

    pub fn file_stats(&self, manifest_id: i64) -> Result<Vec<FileStats>> {
        let sql = format!(
            "SELECT {FILE_STATS_COLUMNS} FROM report_stats WHERE manifest_id = ?1 ORDER BY report_name"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![manifest_id], row_to_file_stats)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn file_stat(&self, manifest_id: i64, report_name: &str) -> Result<FileStats> {
        load_file_stat(&self.conn, manifest_id, report_name)
    }

    /// Open a new attempt on a file. The committed stage is left alone so
    /// the run resumes after it.
    pub fn mark_file_started(&self, manifest_id: i64, report_name: &str) -> Result<FileStats> {
        let changed = self.conn.execute(
            r#"
            UPDATE report_stats SET
              status = 'started',
              committed_state = CASE committed_state
                WHEN 'discovered' THEN 'started'
                ELSE committed_state
              END,
              attempts = attempts + 1,
              last_started_datetime = ?3,
              last_error = NULL
            WHERE manifest_id = ?1 AND report_name = ?2 AND status <> 'completed'
            "#,
            params![manifest_id, report_name, now_rfc3339()],
        )?;
        let stats = self.file_stat(manifest_id, report_name)?;
        if changed == 0 && stats.status == FileState::Completed {
            return Err(DbError::InvalidTransition {
                report_name: report_name.to_string(),
                from: FileState::Completed,
                to: FileState::Started,
            });
        }
        Ok(stats)
    }

    pub fn set_file_status(
        &self,
        manifest_id: i64,
        report_name: &str,
        next: FileState,
    ) -> Result<()> {
        set_file_status(&self.conn, manifest_id, report_name, next)
    }

    /// Park a file in `failed`; the manifest counters are left untouched.
    pub fn record_file_failure(
        &self,
        manifest_id: i64,
        report_name: &str,
        error: &str,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE report_stats SET status = 'failed', last_error = ?3
            WHERE manifest_id = ?1 AND report_name = ?2 AND status <> 'completed'
            "#,
            params![manifest_id, report_name, error],
        )?;
        Ok(())
    }

    /// Mark a file completed and count it against its manifest, once.
    ///
    /// A second call for an already completed file changes nothing, and the
    /// processed counter never passes the file count.
    pub fn complete_file(&mut self, manifest_id: i64, report_name: &str) -> Result<Manifest> {
        let tx = self.write_tx()?;
        let stats = load_file_stat(&tx, manifest_id, report_name)?;
        if stats.status != FileState::Completed {
            if !stats.committed_state.can_advance_to(FileState::Completed) {
                return Err(DbError::InvalidTransition {
                    report_name: report_name.to_string(),
                    from: stats.committed_state,
                    to: FileState::Completed,
                });
            }
            let now = now_rfc3339();
            tx.execute(
                r#"
                UPDATE report_stats SET
                  status = 'completed',
                  committed_state = 'completed',
                  last_completed_datetime = ?3,
                  last_error = NULL
                WHERE manifest_id = ?1 AND report_name = ?2
                "#,
                params![manifest_id, report_name, now],
            )?;
            tx.execute(
                r#"
                UPDATE report_manifest SET
                  num_processed_files = num_processed_files + 1,
                  manifest_updated_datetime = ?2
                WHERE id = ?1 AND num_processed_files < num_total_files
                "#,
                params![manifest_id, now],
            )?;
        }
        let manifest = load_manifest(&tx, manifest_id)?
            .ok_or_else(|| DbError::NotFound(format!("manifest {manifest_id}")))?;
        tx.commit()?;
        Ok(manifest)
    }
}

fn load_manifest(conn: &Connection, id: i64) -> Result<Option<Manifest>> {
    let sql = format!("SELECT {MANIFEST_COLUMNS} FROM report_manifest WHERE id = ?1");
    conn.query_row(&sql, params![id], row_to_manifest)
        .optional()
        .map_err(Into::into)
}

fn load_file_stat(conn: &Connection, manifest_id: i64, report_name: &str) -> Result<FileStats> {
    let sql = format!(
        "SELECT {FILE_STATS_COLUMNS} FROM report_stats WHERE manifest_id = ?1 AND report_name = ?2"
    );
    conn.query_row(&sql, params![manifest_id, report_name], row_to_file_stats)
        .optional()?
        .ok_or_else(|| DbError::NotFound(format!("report {report_name} of manifest {manifest_id}")))
}

/// Advance a file's committed stage. Repeating the current stage is a no-op.
pub(crate) fn set_file_status(
    conn: &Connection,
    manifest_id: i64,
    report_name: &str,
    next: FileState,
) -> Result<()> {
    if next == FileState::Failed {
        conn.execute(
            "UPDATE report_stats SET status = 'failed' WHERE manifest_id = ?1 AND report_name = ?2 AND status <> 'completed'",
            params![manifest_id, report_name],
        )?;
        return Ok(());
    }
    let stats = load_file_stat(conn, manifest_id, report_name)?;
    if stats.committed_state == next {
        return Ok(());
    }
    if !stats.committed_state.can_advance_to(next) {
        return Err(DbError::InvalidTransition {
            report_name: report_name.to_string(),
            from: stats.committed_state,
            to: next,
        });
    }
    conn.execute(
        r#"
        UPDATE report_stats SET status = ?3, committed_state = ?3
        WHERE manifest_id = ?1 AND report_name = ?2
        "#,
        params![manifest_id, report_name, next.as_str()],
    )?;
    Ok(())
}
