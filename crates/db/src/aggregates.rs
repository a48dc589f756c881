use std::collections::BTreeMap;

use ledger_core::{AggregateRow, TIME_SCOPE_VALUES, time_scope_start};
use rust_decimal::Decimal;
use rusqlite::{OptionalExtension, params};

use crate::Db;
use crate::error::Result;
use crate::helpers::{decimal_text, fmt_date, parse_date, parse_decimal};

const TIME_SCOPE_UNITS: &str = "day";

/// (source, account, dimension, resource_type, cost_units, usage_units)
type GroupKey = (String, String, String, String, String, String);

#[derive(Default)]
struct Totals {
    cost: Decimal,
    infrastructure_cost: Decimal,
    derived_cost: Decimal,
    usage: Decimal,
}

impl Db {
    /// Recompute every time-scope rollup from the daily summary.
    ///
    /// Old rows for the scopes are deleted first, so repeated runs over the
    /// same summary produce the same rows. An empty summary leaves the
    /// rollup table empty and returns zero.
    pub fn build_aggregates(&mut self) -> Result<usize> {
        let tx = self.write_tx()?;
        for value in TIME_SCOPE_VALUES {
            tx.execute(
                "DELETE FROM line_item_aggregates WHERE time_scope_value = ?1",
                params![value],
            )?;
        }
        let latest: Option<String> = tx
            .query_row(
                "SELECT MAX(usage_start) FROM line_item_daily_summary",
                [],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let Some(latest) = latest else {
            tx.commit()?;
            tracing::debug!("no summary rows; rollups cleared");
            return Ok(0);
        };
        let latest = parse_date(&latest)?;

        let mut inserted = 0usize;
        for value in TIME_SCOPE_VALUES {
            let start = time_scope_start(latest, value);
            let mut groups: BTreeMap<GroupKey, Totals> = BTreeMap::new();
            {
                let mut stmt = tx.prepare(
                    r#"
                    SELECT source, account, dimension, resource_type, cost_units, usage_units,
                           cost, infrastructure_cost, derived_cost, usage
                    FROM line_item_daily_summary
                    WHERE usage_start BETWEEN ?1 AND ?2
                    "#,
                )?;
                let mut rows = stmt.query(params![fmt_date(start), fmt_date(latest)])?;
                while let Some(row) = rows.next()? {
                    let key: GroupKey = (
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    );
                    let mut amounts = [Decimal::ZERO; 4];
                    for (offset, amount) in amounts.iter_mut().enumerate() {
                        let text: String = row.get(6 + offset)?;
                        *amount = parse_decimal(Some(&text))?.unwrap_or_default();
                    }
                    let totals = groups.entry(key).or_default();
                    totals.cost += amounts[0];
                    totals.infrastructure_cost += amounts[1];
                    totals.derived_cost += amounts[2];
                    totals.usage += amounts[3];
                }
            }
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO line_item_aggregates (
                  time_scope_value, time_scope_units, source, account, dimension, resource_type,
                  cost, infrastructure_cost, derived_cost, usage, cost_units, usage_units
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
            )?;
            for ((source, account, dimension, resource_type, cost_units, usage_units), totals) in
                groups
            {
                inserted += stmt.execute(params![
                    value,
                    TIME_SCOPE_UNITS,
                    source,
                    account,
                    dimension,
                    resource_type,
                    decimal_text(totals.cost),
                    decimal_text(totals.infrastructure_cost),
                    decimal_text(totals.derived_cost),
                    decimal_text(totals.usage),
                    cost_units,
                    usage_units,
                ])?;
            }
        }
        tx.commit()?;
        tracing::info!(rows = inserted, latest = %latest, "rollups rebuilt");
        Ok(inserted)
    }

    pub fn aggregate_rows(&self, time_scope_value: Option<i32>) -> Result<Vec<AggregateRow>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT time_scope_value, time_scope_units, source, account, dimension, resource_type,
                   cost, infrastructure_cost, derived_cost, usage, cost_units, usage_units
            FROM line_item_aggregates
            WHERE (?1 IS NULL OR time_scope_value = ?1)
            ORDER BY time_scope_value DESC, source, account, dimension, resource_type,
                     cost_units, usage_units
            "#,
        )?;
        let mut rows = stmt.query(params![time_scope_value])?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut amounts = [Decimal::ZERO; 4];
            for (offset, amount) in amounts.iter_mut().enumerate() {
                let text: String = row.get(6 + offset)?;
                *amount = parse_decimal(Some(&text))?.unwrap_or_default();
            }
            result.push(AggregateRow {
                time_scope_value: row.get(0)?,
                time_scope_units: row.get(1)?,
                source: row.get(2)?,
                account: row.get(3)?,
                dimension: row.get(4)?,
                resource_type: row.get(5)?,
                cost: amounts[0],
                infrastructure_cost: amounts[1],
                derived_cost: amounts[2],
                usage: amounts[3],
                cost_units: row.get(10)?,
                usage_units: row.get(11)?,
            });
        }
        Ok(result)
    }
}
