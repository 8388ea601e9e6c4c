//! Per-entity validation hooks and their registration table.
//!
//! # Responsibility
//! - Define the `EntityLogic` hook contract.
//! - Map entity types to hooks through explicit registration.
//! - Provide reusable rule helpers for hook implementations.
//!
//! # Invariants
//! - Registration is explicit; nothing is discovered at runtime.
//! - Types without a registered hook validate successfully.
//! - Registering a hook for an already registered type replaces it.

mod customer;
mod vehicle;

pub use customer::CustomerLogic;
pub use vehicle::VehicleLogic;

use crate::model::{Customer, Entity, Vehicle};
use crate::uow::UnitOfWork;
use std::any::{Any, TypeId};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Rejected entity, with the offending field when known.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{entity} validation failed: {message}")]
pub struct ValidationError {
    pub entity: &'static str,
    pub field: Option<&'static str>,
    pub message: String,
}

impl ValidationError {
    pub fn new(entity: &'static str, message: impl Into<String>) -> Self {
        Self {
            entity,
            field: None,
            message: message.into(),
        }
    }

    pub fn for_field(entity: &'static str, field: &'static str, message: impl Into<String>) -> Self {
        Self {
            entity,
            field: Some(field),
            message: message.into(),
        }
    }
}

/// Validation hook for one entity type.
///
/// Hooks receive the unit of work so rules can query other rows.
pub trait EntityLogic<T: Entity>: Send + Sync {
    fn validate(&self, entity: &T, uow: &UnitOfWork) -> Result<(), ValidationError>;
}

impl<T, F> EntityLogic<T> for F
where
    T: Entity,
    F: Fn(&T, &UnitOfWork) -> Result<(), ValidationError> + Send + Sync,
{
    fn validate(&self, entity: &T, uow: &UnitOfWork) -> Result<(), ValidationError> {
        self(entity, uow)
    }
}

/// Hook used for types without registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl<T: Entity> EntityLogic<T> for AcceptAll {
    fn validate(&self, _entity: &T, _uow: &UnitOfWork) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Static mapping from entity type to validation hook.
#[derive(Default)]
pub struct LogicRegistry {
    hooks: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    entities: BTreeSet<&'static str>,
}

impl LogicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in hooks for `Customer` and `Vehicle`.
    pub fn with_defaults() -> Self {
        Self::new()
            .with::<Customer, _>(CustomerLogic)
            .with::<Vehicle, _>(VehicleLogic)
    }

    pub fn register<T, L>(&mut self, logic: L) -> &mut Self
    where
        T: Entity,
        L: EntityLogic<T> + 'static,
    {
        let hook: Arc<dyn EntityLogic<T>> = Arc::new(logic);
        self.hooks.insert(TypeId::of::<T>(), Box::new(hook));
        self.entities.insert(T::ENTITY_NAME);
        self
    }

    pub fn with<T, L>(mut self, logic: L) -> Self
    where
        T: Entity,
        L: EntityLogic<T> + 'static,
    {
        self.register::<T, L>(logic);
        self
    }

    /// Hook for `T`, or `AcceptAll` when none is registered.
    pub fn logic_for<T: Entity>(&self) -> Arc<dyn EntityLogic<T>> {
        self.hooks
            .get(&TypeId::of::<T>())
            .and_then(|hook| hook.downcast_ref::<Arc<dyn EntityLogic<T>>>())
            .cloned()
            .unwrap_or_else(|| Arc::new(AcceptAll))
    }

    pub fn is_registered<T: Entity>(&self) -> bool {
        self.hooks.contains_key(&TypeId::of::<T>())
    }

    /// Names of entity types with a registered hook, sorted.
    pub fn registered_entities(&self) -> Vec<&'static str> {
        self.entities.iter().copied().collect()
    }
}

impl fmt::Debug for LogicRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicRegistry")
            .field("entities", &self.entities)
            .finish()
    }
}

/// Requires `values` to be non-blank and, ignoring ASCII case, unique.
///
/// Only the first `count` values are checked; `0` checks all of them.
pub fn ensure_non_blank_and_unique(
    entity: &'static str,
    field: &'static str,
    count: usize,
    values: &[&str],
) -> Result<(), ValidationError> {
    let checked = if count == 0 {
        values
    } else {
        &values[..count.min(values.len())]
    };

    let mut seen = BTreeSet::new();
    for value in checked {
        let normalized = value.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(ValidationError::for_field(entity, field, "values must not be blank"));
        }
        if !seen.insert(normalized) {
            return Err(ValidationError::for_field(
                entity,
                field,
                format!("value `{}` must be unique", value.trim()),
            ));
        }
    }
    Ok(())
}

/// Requires `value` to be non-blank and at most `max_chars` characters.
pub fn ensure_text(
    entity: &'static str,
    field: &'static str,
    value: &str,
    max_chars: usize,
) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::for_field(entity, field, format!("{field} is required")));
    }
    ensure_max_chars(entity, field, value, max_chars)
}

pub fn ensure_max_chars(
    entity: &'static str,
    field: &'static str,
    value: &str,
    max_chars: usize,
) -> Result<(), ValidationError> {
    if value.chars().count() > max_chars {
        return Err(ValidationError::for_field(
            entity,
            field,
            format!("{field} must be at most {max_chars} characters"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_types_accept_everything() {
        let registry = LogicRegistry::new();
        assert!(!registry.is_registered::<Customer>());
        assert!(registry.registered_entities().is_empty());
    }

    #[test]
    fn defaults_cover_builtin_entities() {
        let registry = LogicRegistry::with_defaults();
        assert!(registry.is_registered::<Customer>());
        assert!(registry.is_registered::<Vehicle>());
        assert_eq!(registry.registered_entities(), vec!["customer", "vehicle"]);
    }

    #[test]
    fn registering_again_replaces_the_hook() {
        let mut registry = LogicRegistry::with_defaults();
        registry.register::<Customer, _>(AcceptAll);
        assert_eq!(registry.registered_entities().len(), 2);
    }

    #[test]
    fn non_blank_and_unique_ignores_case() {
        let err = ensure_non_blank_and_unique("tag", "name", 0, &["Red", "red"]).unwrap_err();
        assert_eq!(err.field, Some("name"));
        assert!(err.message.contains("unique"));

        assert!(ensure_non_blank_and_unique("tag", "name", 0, &["red", " "]).is_err());
        assert!(ensure_non_blank_and_unique("tag", "name", 1, &["red", "red"]).is_ok());
    }

    #[test]
    fn text_rules_count_characters_not_bytes() {
        assert!(ensure_text("customer", "first_name", "Zoë", 3).is_ok());
        assert!(ensure_text("customer", "first_name", "Zoë!", 3).is_err());
        assert!(ensure_text("customer", "first_name", "  ", 3).is_err());
    }
}
