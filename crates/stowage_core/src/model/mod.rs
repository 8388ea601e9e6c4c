//! Entity model shared by the store, query and patch layers.
//!
//! # Responsibility
//! - Define the `Entity` contract and the handle types built around it.
//! - Provide the concrete entity types persisted by this crate.
//!
//! # Invariants
//! - Every entity is identified by a stable `EntityId`.
//! - Mapped fields are declared statically through `Entity::FIELDS`.
//!
//! # See also
//! - src/db/migrations/0001_init.sql

pub mod customer;
pub mod entity;
pub mod field;
pub mod vehicle;

pub use customer::Customer;
pub use entity::{
    Entity, EntityId, EntityKey, EntityRef, ErasedEntity, Field, FieldValues, Include, WeakEntityRef,
};
pub use field::{FieldDef, FieldError, FieldKind, ID_COLUMN};
pub use vehicle::Vehicle;
