//! Repository layer: typed data access bound to one unit of work.
//!
//! # Responsibility
//! - Expose CRUD and query operations for one entity type.
//! - Reconcile incoming instances with the unit of work's change tracker.
//!
//! # Invariants
//! - A repository never outlives its unit of work; calls after the unit of
//!   work is dropped fail with `StoreError::Disposed`.

mod repository;

pub use repository::{FieldChanges, PostApplyHook, Repository};
