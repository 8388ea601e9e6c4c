//! Generic data-access core over SQLite.
//! Units of work, typed repositories with identity-map change tracking,
//! a query builder and a patch merge engine.

pub mod config;
mod context;
pub mod db;
pub mod error;
pub mod logging;
pub mod logic;
pub mod model;
pub mod patch;
pub mod query;
pub mod repo;
pub mod service;
pub mod tracker;
pub mod uow;

pub use config::{IsolationLevel, LogOptions, StoreOptions};
pub use db::{DataStore, DbError, StoreLocation};
pub use error::{StoreError, StoreResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use logic::{EntityLogic, LogicRegistry, ValidationError};
pub use model::{Customer, Entity, EntityId, EntityRef, Field, Include, Vehicle, WeakEntityRef};
pub use patch::{FieldInterceptor, PatchDocument, PatchMerge};
pub use query::{Paged, Predicate, Query, SortKey};
pub use repo::{FieldChanges, Repository};
pub use service::EntityService;
pub use tracker::EntityState;
pub use uow::{TransactionLock, UnitOfWork};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
