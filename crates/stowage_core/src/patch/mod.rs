//! Patch merge: applying sparse JSON documents to tracked entities.
//!
//! # Responsibility
//! - Convert each document key into a typed field change.
//! - Let a per-field interceptor take over keys it understands.
//! - Validate the merged entity before the changes are accepted.
//!
//! # Invariants
//! - Only fields whose value actually changes are marked modified.
//! - Keys handled by the interceptor never reach the field mapping.
//! - A rejected merge returns an error; nothing is saved by this module.
//!
//! # See also
//! - src/repo/repository.rs (`update_changed_fields`)

mod customer;
mod nested;

pub use customer::CustomerVehiclesInterceptor;
pub use nested::{add_or_update, add_or_update_all};

use crate::error::{StoreError, StoreResult};
use crate::model::field::{json_to_value, uuid_value};
use crate::model::{Entity, EntityRef, ID_COLUMN};
use crate::repo::{FieldChanges, PostApplyHook};
use crate::uow::UnitOfWork;
use log::debug;
use rusqlite::types::Value;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Sparse change document: field name to new value.
pub type PatchDocument = serde_json::Map<String, JsonValue>;

/// Custom handling for individual patch keys.
pub trait FieldInterceptor<T: Entity> {
    /// Returns `true` when the key was fully handled and must be skipped
    /// by the default field mapping.
    fn intercept(
        &self,
        uow: &UnitOfWork,
        entity: &EntityRef<T>,
        field: &str,
        value: &JsonValue,
    ) -> StoreResult<bool>;
}

impl<T, F> FieldInterceptor<T> for F
where
    T: Entity,
    F: Fn(&UnitOfWork, &EntityRef<T>, &str, &JsonValue) -> StoreResult<bool>,
{
    fn intercept(
        &self,
        uow: &UnitOfWork,
        entity: &EntityRef<T>,
        field: &str,
        value: &JsonValue,
    ) -> StoreResult<bool> {
        self(uow, entity, field, value)
    }
}

pub struct PatchMerge<'a, T: Entity> {
    uow: &'a UnitOfWork,
    interceptor: Option<&'a dyn FieldInterceptor<T>>,
}

impl<'a, T: Entity> PatchMerge<'a, T> {
    pub fn new(uow: &'a UnitOfWork) -> Self {
        Self {
            uow,
            interceptor: None,
        }
    }

    pub fn with_interceptor(mut self, interceptor: &'a dyn FieldInterceptor<T>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Merges `changes` into `entity` and validates the result.
    ///
    /// Returns the tracked instance that received the changes.
    ///
    /// # Errors
    /// - `NullEntity` when `entity` is `None`.
    /// - `InvalidField` / `UnknownField` / `IdentityChange` for bad keys.
    /// - `Validation` when the validation hook rejects the merged entity.
    pub fn apply(&self, entity: Option<&EntityRef<T>>, changes: &PatchDocument) -> StoreResult<EntityRef<T>> {
        let entity = entity.ok_or(StoreError::NullEntity { operation: "patch" })?;

        let mut field_changes = FieldChanges::new();
        let mut intercepted = 0usize;
        for (name, value) in changes {
            if let Some(interceptor) = self.interceptor {
                if interceptor.intercept(self.uow, entity, name, value)? {
                    intercepted += 1;
                    continue;
                }
            }
            field_changes.insert(name.clone(), coerce::<T>(name, value)?);
        }

        let uow = self.uow;
        let validate = |merged: &EntityRef<T>| uow.validate(merged);
        let hook: PostApplyHook<'_, T> = &validate;
        let merged = uow
            .repository_for::<T>()
            .update_changed_fields(entity, &field_changes, Some(hook))?;

        debug!(
            "event=patch_merge module=patch status=ok entity={} id={} keys={} intercepted={intercepted}",
            T::ENTITY_NAME,
            merged.id(),
            changes.len()
        );
        Ok(merged)
    }
}

fn coerce<T: Entity>(name: &str, value: &JsonValue) -> StoreResult<Value> {
    if name == ID_COLUMN {
        let id = value
            .as_str()
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| StoreError::InvalidData(format!("`id` must be a uuid string, got {value}")))?;
        return Ok(uuid_value(id));
    }

    match T::field(name) {
        Some(field) => field.coerce_json(value).map_err(|source| StoreError::InvalidField {
            entity: T::ENTITY_NAME,
            source,
        }),
        None => Ok(json_to_value(value)),
    }
}
