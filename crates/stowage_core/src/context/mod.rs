//! Database context: one SQLite connection plus its change tracker.
//!
//! # Responsibility
//! - Materialize rows into tracked entity instances (identity-resolved).
//! - Persist pending tracker changes atomically.
//! - Run explicit transactions on the owned connection.
//!
//! # Invariants
//! - A row whose key is already tracked resolves to the tracked instance.
//! - A save either applies every pending write or none of them.
//! - Inside an explicit transaction a save runs under a savepoint, so a
//!   failed save leaves the outer transaction usable.
//! - A save inside a transaction fails on a dangling reference before its
//!   writes are accepted, even though the outer transaction defers them.

mod persist;

use crate::config::IsolationLevel;
use crate::error::{StoreError, StoreResult};
use crate::model::{Entity, EntityId, EntityKey, EntityRef, ID_COLUMN};
use crate::query::{select_sql, CompiledQuery};
use crate::tracker::{ChangeTracker, EntityState};
use log::{debug, info, warn};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use std::time::Instant;
use uuid::Uuid;

const SAVEPOINT: &str = "stowage_save";

#[derive(Debug, Clone, Copy)]
pub(crate) struct OpenTransaction {
    pub isolation: IsolationLevel,
    pub started_at: Instant,
}

pub(crate) struct DbContext {
    conn: Connection,
    tracker: ChangeTracker,
    transaction: Option<OpenTransaction>,
}

impl DbContext {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            tracker: ChangeTracker::new(),
            transaction: None,
        }
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut ChangeTracker {
        &mut self.tracker
    }

    pub fn replace_tracker(&mut self, tracker: ChangeTracker) {
        self.tracker = tracker;
    }

    pub fn has_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Tracked instance for `id`, otherwise the stored row, tracked as
    /// `Unchanged`. Instances pending deletion are reported as missing.
    pub fn find<T: Entity>(&mut self, id: EntityId) -> StoreResult<Option<EntityRef<T>>> {
        let key = EntityKey::of::<T>(id);
        if let Some(entry) = self.tracker.entry(&key) {
            if entry.state() == EntityState::Deleted {
                return Ok(None);
            }
            return Ok(entry.instance().downcast::<T>());
        }

        let sql = format!("{} WHERE {ID_COLUMN} = ?1", select_sql::<T>());
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([id.hyphenated().to_string()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let entity = EntityRef::new(materialize::<T>(row)?);
        drop(rows);
        drop(stmt);

        self.tracker.track(entity.erase(), EntityState::Unchanged);
        Ok(Some(entity))
    }

    /// Runs a compiled row query and resolves each row through the tracker.
    pub fn fetch<T: Entity>(&mut self, compiled: &CompiledQuery) -> StoreResult<Vec<EntityRef<T>>> {
        let started_at = Instant::now();
        let loaded = {
            let mut stmt = self.conn.prepare(&compiled.sql)?;
            let mut rows = stmt.query(params_from_iter(compiled.params.iter()))?;
            let mut loaded = Vec::new();
            while let Some(row) = rows.next()? {
                loaded.push(materialize::<T>(row)?);
            }
            loaded
        };

        let mut resolved = Vec::with_capacity(loaded.len());
        for entity in loaded {
            let key = EntityKey::of::<T>(entity.id());
            match self
                .tracker
                .tracked_instance(&key)
                .and_then(|tracked| tracked.downcast::<T>())
            {
                Some(tracked) => resolved.push(tracked),
                None => {
                    let entity = EntityRef::new(entity);
                    self.tracker.track(entity.erase(), EntityState::Unchanged);
                    resolved.push(entity);
                }
            }
        }

        debug!(
            "event=query_fetch module=context status=ok entity={} rows={} duration_ms={}",
            T::ENTITY_NAME,
            resolved.len(),
            started_at.elapsed().as_millis()
        );
        Ok(resolved)
    }

    pub fn count(&self, compiled: &CompiledQuery) -> StoreResult<u64> {
        let count = self.conn.query_row(
            &compiled.sql,
            params_from_iter(compiled.params.iter()),
            |row| row.get::<_, i64>(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Persists all pending changes and returns the number of rows written.
    pub fn save_changes(&mut self) -> StoreResult<usize> {
        self.tracker.detect_changes();
        let writes = self.tracker.pending_writes();
        if writes.is_empty() {
            return Ok(0);
        }

        let started_at = Instant::now();
        let nested = self.transaction.is_some();
        if nested {
            self.conn.execute_batch(&format!("SAVEPOINT {SAVEPOINT};"))?;
        } else {
            self.conn
                .execute_batch("BEGIN IMMEDIATE; PRAGMA defer_foreign_keys = ON;")?;
        }

        let outcome = persist::apply_writes(&self.conn, &writes)
            .and_then(|()| if nested { self.check_foreign_keys() } else { Ok(()) })
            .and_then(|()| {
                let finish = if nested {
                    format!("RELEASE {SAVEPOINT};")
                } else {
                    "COMMIT;".to_string()
                };
                self.conn.execute_batch(&finish).map_err(StoreError::from)
            });

        match outcome {
            Ok(()) => {
                self.tracker.accept_changes();
                info!(
                    "event=save_changes module=context status=ok rows={} nested={nested} duration_ms={}",
                    writes.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(writes.len())
            }
            Err(err) => {
                let undo = if nested {
                    format!("ROLLBACK TO {SAVEPOINT}; RELEASE {SAVEPOINT};")
                } else {
                    "ROLLBACK;".to_string()
                };
                if !self.conn.is_autocommit() {
                    if let Err(undo_err) = self.conn.execute_batch(&undo) {
                        warn!("event=save_changes module=context status=undo_failed error={undo_err}");
                    }
                }
                info!(
                    "event=save_changes module=context status=error nested={nested} duration_ms={} error={err}",
                    started_at.elapsed().as_millis()
                );
                Err(err)
            }
        }
    }

    /// Deferred foreign keys are only enforced at COMMIT; a savepoint save
    /// checks them itself before its writes are accepted.
    fn check_foreign_keys(&self) -> StoreResult<()> {
        let enforced: i64 = self
            .conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        if enforced == 0 {
            return Ok(());
        }

        let mut stmt = self.conn.prepare("PRAGMA foreign_key_check")?;
        let mut rows = stmt.query([])?;
        let Some(row) = rows.next()? else {
            return Ok(());
        };
        let table: String = row.get(0)?;
        let parent: String = row.get(2)?;
        let detail = format!("a {table} row references a missing {parent} row");
        info!("event=constraint_violation module=context status=detected kind=referential detail={detail}");
        Err(StoreError::ReferentialConstraint { detail })
    }

    pub fn begin(&mut self, isolation: IsolationLevel) -> StoreResult<()> {
        if self.transaction.is_some() {
            return Err(StoreError::TransactionAlreadyActive);
        }
        self.conn.execute_batch(isolation.begin_sql())?;
        if let Err(err) = self.conn.execute_batch("PRAGMA defer_foreign_keys = ON;") {
            let _ = self.conn.execute_batch("ROLLBACK;");
            return Err(err.into());
        }
        self.transaction = Some(OpenTransaction {
            isolation,
            started_at: Instant::now(),
        });
        Ok(())
    }

    /// Commits the open transaction; a no-op when none is open.
    ///
    /// On failure the transaction stays open so the caller may retry or roll back.
    pub fn commit(&mut self) -> StoreResult<()> {
        let Some(open) = self.transaction else {
            return Ok(());
        };
        self.conn.execute_batch("COMMIT;")?;
        self.transaction = None;
        debug!(
            "event=transaction_commit module=context status=ok isolation={} duration_ms={}",
            open.isolation.as_str(),
            open.started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Rolls back the open transaction, if any. The transaction record is
    /// cleared even when SQLite reports an error.
    pub fn rollback(&mut self) -> StoreResult<()> {
        if self.transaction.take().is_none() || self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK;")?;
        Ok(())
    }
}

fn materialize<T: Entity>(row: &Row<'_>) -> StoreResult<T> {
    let raw_id: String = row.get(0)?;
    let id = Uuid::parse_str(&raw_id).map_err(|err| {
        StoreError::InvalidData(format!("{} id `{raw_id}` is not a uuid: {err}", T::ENTITY_NAME))
    })?;

    let mut entity = T::blank(id);
    for (index, field) in T::FIELDS.iter().enumerate() {
        let value: Value = row.get(index + 1)?;
        entity
            .set_field_value(field.name, value)
            .map_err(|err| StoreError::InvalidData(format!("{} {id}: {err}", T::ENTITY_NAME)))?;
    }
    Ok(entity)
}
