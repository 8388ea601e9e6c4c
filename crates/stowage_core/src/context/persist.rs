//! SQL generation for pending tracker writes.

use crate::error::{StoreError, StoreResult};
use crate::model::field::uuid_value;
use crate::model::ID_COLUMN;
use crate::tracker::{PendingWrite, WriteKind};
use log::debug;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

/// Executes writes in order; the caller owns the surrounding transaction.
pub(super) fn apply_writes(conn: &Connection, writes: &[PendingWrite]) -> StoreResult<()> {
    for write in writes {
        let (sql, params) = write_sql(write);
        let affected = conn.execute(&sql, params_from_iter(params.iter()))?;
        debug!(
            "event=row_write module=context kind={:?} entity={} affected={affected}",
            write.kind,
            write.instance.entity_name()
        );

        if affected == 0 && write.kind != WriteKind::Insert {
            return Err(StoreError::ConcurrencyConflict {
                entity: write.instance.entity_name(),
                id: write.instance.id(),
            });
        }
    }
    Ok(())
}

fn write_sql(write: &PendingWrite) -> (String, Vec<Value>) {
    let table = write.instance.table();
    let id = uuid_value(write.instance.id());

    match write.kind {
        WriteKind::Insert => {
            let mut columns = vec![ID_COLUMN];
            let mut params = vec![id];
            for (name, value) in &write.columns {
                columns.push(*name);
                params.push(value.clone());
            }
            let placeholders = vec!["?"; columns.len()].join(", ");
            (
                format!(
                    "INSERT INTO {table} ({}) VALUES ({placeholders})",
                    columns.join(", ")
                ),
                params,
            )
        }
        WriteKind::Update => {
            let assignments: Vec<String> = write
                .columns
                .iter()
                .map(|(name, _)| format!("{name} = ?"))
                .collect();
            let mut params: Vec<Value> =
                write.columns.iter().map(|(_, value)| value.clone()).collect();
            params.push(id);
            (
                format!(
                    "UPDATE {table} SET {} WHERE {ID_COLUMN} = ?",
                    assignments.join(", ")
                ),
                params,
            )
        }
        WriteKind::Delete => (format!("DELETE FROM {table} WHERE {ID_COLUMN} = ?"), vec![id]),
    }
}
