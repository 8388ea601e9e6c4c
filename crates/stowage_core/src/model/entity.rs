//! Entity contract and shared instance handles.
//!
//! # Responsibility
//! - Define what a persistable entity type must expose to the store.
//! - Provide `EntityRef`, the shared handle whose pointer identity is the
//!   identity-map notion of "same instance".
//! - Provide `ErasedEntity` so one change tracker can hold many entity types.
//!
//! # Invariants
//! - Every entity has exactly one `EntityId`, stored in column `id`.
//! - Two `EntityRef`s are the same instance only when `ptr_eq` holds;
//!   equal ids on different instances are distinct objects.

use crate::error::StoreResult;
use crate::model::field::{FieldDef, FieldError};
use crate::uow::UnitOfWork;
use rusqlite::types::Value;
use std::any::{Any, TypeId};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};
use uuid::Uuid;

/// Stable entity identifier.
pub type EntityId = Uuid;

/// Snapshot of all mapped field values keyed by column name.
pub type FieldValues = BTreeMap<&'static str, Value>;

/// Contract implemented by every persistable entity type.
pub trait Entity: fmt::Debug + 'static {
    /// Human-readable type name used in logs and errors.
    const ENTITY_NAME: &'static str;
    /// Backing table.
    const TABLE: &'static str;
    /// Mapped fields, excluding `id`, in column order.
    const FIELDS: &'static [FieldDef];

    /// Builds an instance with the given id and default field values.
    fn blank(id: EntityId) -> Self
    where
        Self: Sized;

    fn id(&self) -> EntityId;

    /// Returns the storage value of one mapped field.
    fn field_value(&self, field: &str) -> Option<Value>;

    /// Writes one mapped field from its storage value.
    fn set_field_value(&mut self, field: &str, value: Value) -> Result<(), FieldError>;

    /// Accepts a patch key that is not a mapped field.
    ///
    /// Returns `true` when the key was consumed.
    fn set_unmapped_field(&mut self, _field: &str, _value: &Value) -> bool {
        false
    }

    /// Currently loaded related instances.
    fn navigations(&self) -> Vec<ErasedEntity> {
        Vec::new()
    }

    /// Loads one named navigation through `uow`.
    ///
    /// Returns `false` when `path` is not a navigation of this type.
    fn load_navigation(_entity: &EntityRef<Self>, _path: &str, _uow: &UnitOfWork) -> StoreResult<bool>
    where
        Self: Sized,
    {
        Ok(false)
    }

    fn field(name: &str) -> Option<&'static FieldDef>
    where
        Self: Sized,
    {
        Self::FIELDS.iter().find(|field| field.name == name)
    }
}

/// Identity of one tracked row: entity type plus id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityKey {
    type_id: TypeId,
    id: EntityId,
}

impl EntityKey {
    pub fn of<T: Entity>(id: EntityId) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            id,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn is_type<T: Entity>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

/// Shared, mutable handle to one entity instance.
pub struct EntityRef<T: Entity>(Rc<RefCell<T>>);

impl<T: Entity> EntityRef<T> {
    pub fn new(entity: T) -> Self {
        Self(Rc::new(RefCell::new(entity)))
    }

    /// Borrows the entity.
    ///
    /// Panics if the entity is currently mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    /// Mutably borrows the entity.
    ///
    /// Panics if the entity is currently borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0.borrow_mut()
    }

    pub fn id(&self) -> EntityId {
        self.0.borrow().id()
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::of::<T>(self.id())
    }

    /// Returns whether both handles point at the same instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn erase(&self) -> ErasedEntity {
        ErasedEntity(self.0.clone())
    }

    pub fn downgrade(&self) -> WeakEntityRef<T> {
        WeakEntityRef(Rc::downgrade(&self.0))
    }

    /// Clones the entity into a new, untracked instance.
    pub fn detached_copy(&self) -> Self
    where
        T: Clone,
    {
        Self::new(self.borrow().clone())
    }
}

impl<T: Entity> Clone for EntityRef<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Entity> fmt::Debug for EntityRef<T> {
    // Navigations can form cycles, so only the identity is printed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(entity) => write!(f, "EntityRef({} {})", T::ENTITY_NAME, entity.id()),
            Err(_) => write!(f, "EntityRef({} <borrowed>)", T::ENTITY_NAME),
        }
    }
}

/// Non-owning handle, used for navigations that point back at a parent.
pub struct WeakEntityRef<T: Entity>(Weak<RefCell<T>>);

impl<T: Entity> WeakEntityRef<T> {
    /// The instance, if anything else still holds it.
    pub fn upgrade(&self) -> Option<EntityRef<T>> {
        self.0.upgrade().map(EntityRef)
    }
}

impl<T: Entity> Clone for WeakEntityRef<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Entity> fmt::Debug for WeakEntityRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(entity) => write!(f, "Weak{entity:?}"),
            None => write!(f, "WeakEntityRef({} <dropped>)", T::ENTITY_NAME),
        }
    }
}

trait TrackedObject {
    fn type_key(&self) -> TypeId;
    fn entity_name(&self) -> &'static str;
    fn table(&self) -> &'static str;
    fn fields(&self) -> &'static [FieldDef];
    fn id(&self) -> EntityId;
    fn snapshot(&self) -> FieldValues;
    fn navigations(&self) -> Vec<ErasedEntity>;
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<T: Entity> TrackedObject for RefCell<T> {
    fn type_key(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn entity_name(&self) -> &'static str {
        T::ENTITY_NAME
    }

    fn table(&self) -> &'static str {
        T::TABLE
    }

    fn fields(&self) -> &'static [FieldDef] {
        T::FIELDS
    }

    fn id(&self) -> EntityId {
        self.borrow().id()
    }

    fn snapshot(&self) -> FieldValues {
        let entity = self.borrow();
        T::FIELDS
            .iter()
            .map(|field| {
                (
                    field.name,
                    entity.field_value(field.name).unwrap_or(Value::Null),
                )
            })
            .collect()
    }

    fn navigations(&self) -> Vec<ErasedEntity> {
        self.borrow().navigations()
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// Type-erased entity handle held by the change tracker.
#[derive(Clone)]
pub struct ErasedEntity(Rc<dyn TrackedObject>);

impl ErasedEntity {
    pub fn key(&self) -> EntityKey {
        EntityKey {
            type_id: self.0.type_key(),
            id: self.0.id(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.0.id()
    }

    pub fn entity_name(&self) -> &'static str {
        self.0.entity_name()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::eq(
            Rc::as_ptr(&self.0) as *const (),
            Rc::as_ptr(&other.0) as *const (),
        )
    }

    pub fn downcast<T: Entity>(&self) -> Option<EntityRef<T>> {
        if self.0.type_key() != TypeId::of::<T>() {
            return None;
        }
        self.0
            .clone()
            .into_any()
            .downcast::<RefCell<T>>()
            .ok()
            .map(EntityRef)
    }

    pub(crate) fn table(&self) -> &'static str {
        self.0.table()
    }

    pub(crate) fn fields(&self) -> &'static [FieldDef] {
        self.0.fields()
    }

    pub(crate) fn snapshot(&self) -> FieldValues {
        self.0.snapshot()
    }

    pub(crate) fn navigations(&self) -> Vec<ErasedEntity> {
        self.0.navigations()
    }
}

impl fmt::Debug for ErasedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErasedEntity({} {})", self.entity_name(), self.id())
    }
}

/// Typed reference to one mapped field of `T`, carrying its Rust value type.
pub struct Field<T, V> {
    name: &'static str,
    _marker: PhantomData<fn(&T) -> V>,
}

impl<T, V> Field<T, V> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T, V> Clone for Field<T, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, V> Copy for Field<T, V> {}

impl<T, V> fmt::Debug for Field<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Field({})", self.name)
    }
}

/// Named navigation path of `T` to eager-load.
pub struct Include<T> {
    path: &'static str,
    _marker: PhantomData<fn(&T)>,
}

impl<T> Include<T> {
    pub const fn new(path: &'static str) -> Self {
        Self {
            path,
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &'static str {
        self.path
    }
}

impl<T> Clone for Include<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Include<T> {}

impl<T> PartialEq for Include<T> {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl<T> fmt::Debug for Include<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Include({})", self.path)
    }
}
