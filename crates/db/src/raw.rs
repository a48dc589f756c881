use std::time::Instant;

use ledger_core::FileState;
use rusqlite::types::ToSql;
use rusqlite::{Connection, params, params_from_iter};

use crate::Db;
use crate::error::Result;
use crate::manifests::set_file_status;
use crate::types::{FieldValue, LoadStats, RawBatch, RawTable};

const INSERT_CHUNK_ROWS: usize = 500;

impl Db {
    /// Replace the rows a report file previously loaded and move the file to
    /// `normalized`, all in one transaction.
    pub fn load_report_rows(
        &mut self,
        report_name: &str,
        batches: &[RawBatch],
        stats: &LoadStats,
    ) -> Result<usize> {
        let started = Instant::now();
        let tx = self.write_tx()?;
        let mut loaded = 0usize;
        let mut manifest_id = None;
        for batch in batches {
            manifest_id = Some(batch.manifest_id);
            delete_file_rows(&tx, batch.table, batch.manifest_id, &batch.source_file)?;
            loaded += insert_rows(&tx, batch)?;
        }
        if let Some(manifest_id) = manifest_id {
            tx.execute(
                r#"
                UPDATE report_stats SET
                  rows_loaded = ?3,
                  rows_skipped = ?4,
                  fields_nulled = ?5,
                  checksum = ?6
                WHERE manifest_id = ?1 AND report_name = ?2
                "#,
                params![
                    manifest_id,
                    report_name,
                    loaded as i64,
                    stats.rows_skipped as i64,
                    stats.fields_nulled as i64,
                    stats.checksum,
                ],
            )?;
            set_file_status(&tx, manifest_id, report_name, FileState::Normalized)?;
        }
        tx.commit()?;
        tracing::debug!(
            file = report_name,
            rows = loaded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "bulk load committed"
        );
        Ok(loaded)
    }

    pub fn raw_row_count(&self, table: RawTable, manifest_id: i64, source_file: &str) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE manifest_id = ?1 AND source_file = ?2",
            table.table_name()
        );
        Ok(self
            .conn
            .query_row(&sql, params![manifest_id, source_file], |row| row.get(0))?)
    }
}

fn delete_file_rows(
    conn: &Connection,
    table: RawTable,
    manifest_id: i64,
    source_file: &str,
) -> Result<usize> {
    let sql = format!(
        "DELETE FROM {} WHERE manifest_id = ?1 AND source_file = ?2",
        table.table_name()
    );
    Ok(conn.execute(&sql, params![manifest_id, source_file])?)
}

fn insert_sql(table: RawTable, columns: &[&str], rows: usize) -> String {
    let width = columns.len() + 3;
    let placeholders = (0..rows)
        .map(|row| {
            let start = row * width + 1;
            let slots = (start..start + width)
                .map(|idx| format!("?{idx}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({slots})")
        })
        .collect::<Vec<_>>()
        .join(",\n");
    format!(
        "INSERT INTO {} (provider_uuid, manifest_id, source_file, {}) VALUES {}",
        table.table_name(),
        columns.join(", "),
        placeholders
    )
}

fn insert_rows(conn: &Connection, batch: &RawBatch) -> Result<usize> {
    if batch.rows.is_empty() {
        return Ok(0);
    }
    let provider_uuid = batch.provider_uuid.to_string();
    let mut inserted = 0usize;
    let mut full_stmt = None;
    for chunk in batch.rows.chunks(INSERT_CHUNK_ROWS) {
        let mut bound: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() * (batch.columns.len() + 3));
        for row in chunk {
            bound.push(&provider_uuid);
            bound.push(&batch.manifest_id);
            bound.push(&batch.source_file);
            bound.extend(row.iter().map(|field: &FieldValue| field as &dyn ToSql));
        }
        if chunk.len() == INSERT_CHUNK_ROWS {
            if full_stmt.is_none() {
                full_stmt = Some(conn.prepare(&insert_sql(
                    batch.table,
                    &batch.columns,
                    INSERT_CHUNK_ROWS,
                ))?);
            }
            if let Some(stmt) = full_stmt.as_mut() {
                inserted += stmt.execute(params_from_iter(bound))?;
            }
        } else {
            let mut stmt = conn.prepare(&insert_sql(batch.table, &batch.columns, chunk.len()))?;
            inserted += stmt.execute(params_from_iter(bound))?;
        }
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_sql_numbers_placeholders_per_row() {
        let sql = insert_sql(RawTable::AwsLineItem, &["usage_start", "unblended_cost"], 2);
        assert!(sql.starts_with(
            "INSERT INTO aws_line_item (provider_uuid, manifest_id, source_file, usage_start, unblended_cost)"
        ));
        assert!(sql.contains("(?1, ?2, ?3, ?4, ?5)"));
        assert!(sql.contains("(?6, ?7, ?8, ?9, ?10)"));
    }
}
