//! Upserts of nested child documents, used by field interceptors.

use super::PatchMerge;
use crate::error::{StoreError, StoreResult};
use crate::model::{Entity, EntityId, EntityRef};
use crate::uow::UnitOfWork;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

/// Merges `document` into the stored `C` with the same id, or inserts a
/// new `C` when the id is missing, nil or unknown.
///
/// New instances get a fresh id when the document carries none.
pub fn add_or_update<C>(uow: &UnitOfWork, document: &JsonValue) -> StoreResult<EntityRef<C>>
where
    C: Entity + DeserializeOwned,
{
    let object = document.as_object().ok_or_else(|| {
        StoreError::InvalidData(format!("{} change must be an object", C::ENTITY_NAME))
    })?;

    let candidate: C = serde_json::from_value(document.clone()).map_err(|err| {
        StoreError::InvalidData(format!("{} change is malformed: {err}", C::ENTITY_NAME))
    })?;

    let id = candidate.id();
    if !id.is_nil() {
        if let Some(existing) = uow.get_by_id::<C>(id, &[])? {
            return PatchMerge::<C>::new(uow).apply(Some(&existing), object);
        }
    }

    let entity = EntityRef::new(if id.is_nil() {
        with_fresh_id(&candidate)
    } else {
        candidate
    });
    uow.insert(&entity)?;
    Ok(entity)
}

/// `add_or_update` for each element of a JSON array; `null` yields nothing.
pub fn add_or_update_all<C>(uow: &UnitOfWork, documents: &JsonValue) -> StoreResult<Vec<EntityRef<C>>>
where
    C: Entity + DeserializeOwned,
{
    match documents {
        JsonValue::Null => Ok(Vec::new()),
        JsonValue::Array(items) => items.iter().map(|item| add_or_update::<C>(uow, item)).collect(),
        other => Err(StoreError::InvalidData(format!(
            "{} changes must be an array, got {other}",
            C::ENTITY_NAME
        ))),
    }
}

fn with_fresh_id<C: Entity>(candidate: &C) -> C {
    let mut fresh = C::blank(EntityId::new_v4());
    for field in C::FIELDS {
        if let Some(value) = candidate.field_value(field.name) {
            // Values come from a successfully deserialized `C`.
            let _ = fresh.set_field_value(field.name, value);
        }
    }
    fresh
}
