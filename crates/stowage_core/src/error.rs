//! Store error taxonomy and datastore error translation.
//!
//! # Responsibility
//! - Define the single error type returned by store operations.
//! - Translate SQLite constraint failures into domain error kinds.
//!
//! # Invariants
//! - Constraint translations are logged at info level; every other
//!   datastore failure is logged at error level before propagating.

use crate::db::DbError;
use crate::logging::LoggingError;
use crate::logic::ValidationError;
use crate::model::{EntityId, FieldError};
use log::{error, info};
use rusqlite::ffi;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{operation} requires an entity but none was supplied")]
    NullEntity { operation: &'static str },
    #[error("duplicate key: {detail}")]
    DuplicateKey { detail: String },
    #[error("reference constraint violated: {detail}")]
    ReferentialConstraint { detail: String },
    #[error("cannot begin a transaction while another one is active")]
    TransactionAlreadyActive,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{entity} {id} was changed or removed by another writer")]
    ConcurrencyConflict { entity: &'static str, id: EntityId },
    #[error("{entity} has no field `{field}`")]
    UnknownField { entity: &'static str, field: String },
    #[error("{entity} has no navigation `{path}`")]
    UnknownNavigation { entity: &'static str, path: String },
    #[error("{entity} {id} cannot change its identifier")]
    IdentityChange { entity: &'static str, id: EntityId },
    #[error("invalid value for {entity}: {source}")]
    InvalidField {
        entity: &'static str,
        #[source]
        source: FieldError,
    },
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("unit of work has been released")]
    Disposed,
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error("datastore failure: {0}")]
    Sqlite(rusqlite::Error),
}

impl StoreError {
    /// Whether the error came from writing to the datastore.
    ///
    /// These are the failures `commit_transaction` reports as `false`.
    pub fn is_persistence_failure(&self) -> bool {
        matches!(
            self,
            Self::DuplicateKey { .. }
                | Self::ReferentialConstraint { .. }
                | Self::ConcurrencyConflict { .. }
                | Self::Sqlite(_)
        )
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        translate_sqlite_error(value)
    }
}

pub(crate) fn translate_sqlite_error(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        let detail = message.clone().unwrap_or_else(|| failure.to_string());
        match failure.extended_code {
            ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE => {
                info!("event=constraint_violation module=store status=translated kind=duplicate_key detail={detail}");
                return StoreError::DuplicateKey { detail };
            }
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                info!("event=constraint_violation module=store status=translated kind=referential detail={detail}");
                return StoreError::ReferentialConstraint { detail };
            }
            _ => {}
        }
    }

    error!("event=datastore_failure module=store status=error error={err}");
    StoreError::Sqlite(err)
}
