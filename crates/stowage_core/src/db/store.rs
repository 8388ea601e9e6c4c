//! Store handle that opens units of work against one database.
//!
//! # Responsibility
//! - Validate the schema once when the store is opened.
//! - Give every unit of work its own connection, logic table and lock.
//!
//! # Invariants
//! - Units of work from one store share the same `LogicRegistry` and
//!   `TransactionLock`; their change trackers are independent.
//! - In-memory stores give each unit of work a separate, empty database.

use crate::config::StoreOptions;
use crate::db::{open_db, open_db_in_memory};
use crate::error::StoreResult;
use crate::logging::init_logging;
use crate::logic::LogicRegistry;
use crate::uow::{TransactionLock, UnitOfWork};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    Memory,
}

#[derive(Debug, Clone)]
pub struct DataStore {
    location: StoreLocation,
    options: StoreOptions,
    logic: Arc<LogicRegistry>,
    lock: TransactionLock,
}

impl DataStore {
    /// Opens (creating if needed) a database file and applies migrations.
    ///
    /// # Side effects
    /// - Starts file logging when `options.log` is set.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> StoreResult<Self> {
        if let Some(log) = &options.log {
            init_logging(log)?;
        }
        let path = path.as_ref().to_path_buf();
        drop(open_db(&path, &options)?);
        info!(
            "event=store_open module=store status=ok path={} isolation={}",
            path.display(),
            options.default_isolation.as_str()
        );
        Ok(Self::with_location(StoreLocation::File(path), options))
    }

    pub fn in_memory(options: StoreOptions) -> Self {
        Self::with_location(StoreLocation::Memory, options)
    }

    fn with_location(location: StoreLocation, options: StoreOptions) -> Self {
        Self {
            location,
            options,
            logic: Arc::new(LogicRegistry::with_defaults()),
            lock: TransactionLock::global(),
        }
    }

    /// Replaces the validation hooks used by future units of work.
    pub fn with_logic(mut self, logic: LogicRegistry) -> Self {
        self.logic = Arc::new(logic);
        self
    }

    /// Scopes transaction serialization to `lock` instead of the global one.
    pub fn with_lock(mut self, lock: TransactionLock) -> Self {
        self.lock = lock;
        self
    }

    pub fn unit_of_work(&self) -> StoreResult<UnitOfWork> {
        let conn = match &self.location {
            StoreLocation::File(path) => open_db(path, &self.options)?,
            StoreLocation::Memory => open_db_in_memory(&self.options)?,
        };
        Ok(UnitOfWork::with_parts(
            conn,
            self.logic.clone(),
            self.lock.clone(),
            self.options.default_isolation,
        ))
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn logic(&self) -> &LogicRegistry {
        &self.logic
    }

    pub fn lock(&self) -> &TransactionLock {
        &self.lock
    }
}
