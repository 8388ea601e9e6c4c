//! Typed repository over the shared database context.
//!
//! # Responsibility
//! - Look up entities by id and query, resolving through the identity map.
//! - Track inserts, updates and deletes for the next save.
//! - Apply sparse field changes, marking only changed fields dirty.
//!
//! # Invariants
//! - Within one unit of work, one id maps to one instance.
//! - Attaching never moves another tracked instance out of its prior
//!   state unless that instance was itself pending insertion.
//! - Changing an entity's id is rejected.

use crate::context::DbContext;
use crate::error::{StoreError, StoreResult};
use crate::model::field::uuid_value;
use crate::model::{Entity, EntityId, EntityKey, EntityRef, Field, Include, ID_COLUMN};
use crate::query::{Paged, Query};
use crate::tracker::{self, EntityState};
use crate::uow::{UnitOfWork, UowHandle};
use log::debug;
use rusqlite::types::{FromSql, Value, ValueRef};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// Sparse field changes keyed by field name, already in storage form.
pub type FieldChanges = BTreeMap<String, Value>;

/// Hook run after changes are applied and before they are accepted.
pub type PostApplyHook<'a, T> = &'a dyn Fn(&EntityRef<T>) -> StoreResult<()>;

pub struct Repository<T: Entity> {
    uow: UowHandle,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Repository<T> {
    pub(crate) fn new(uow: UowHandle) -> Self {
        Self {
            uow,
            _entity: PhantomData,
        }
    }

    fn unit_of_work(&self) -> StoreResult<UnitOfWork> {
        self.uow
            .upgrade()
            .map(UnitOfWork::from_inner)
            .ok_or(StoreError::Disposed)
    }

    fn with_context<R>(&self, f: impl FnOnce(&mut DbContext) -> StoreResult<R>) -> StoreResult<R> {
        let inner = self.uow.upgrade().ok_or(StoreError::Disposed)?;
        let mut context = inner.context.borrow_mut();
        f(&mut context)
    }

    /// Tracked or stored instance for `id`, with `includes` loaded.
    pub fn find_by_id(&self, id: EntityId, includes: &[Include<T>]) -> StoreResult<Option<EntityRef<T>>> {
        let found = self.with_context(|context| context.find::<T>(id))?;
        if let Some(entity) = &found {
            self.load_includes(entity, includes)?;
        }
        Ok(found)
    }

    /// Loads one navigation of a tracked or detached instance.
    pub fn load(&self, entity: &EntityRef<T>, include: Include<T>) -> StoreResult<()> {
        self.load_includes(entity, &[include])
    }

    fn load_includes(&self, entity: &EntityRef<T>, includes: &[Include<T>]) -> StoreResult<()> {
        if includes.is_empty() {
            return Ok(());
        }
        let uow = self.unit_of_work()?;
        for include in includes {
            if !T::load_navigation(entity, include.path(), &uow)? {
                return Err(StoreError::UnknownNavigation {
                    entity: T::ENTITY_NAME,
                    path: include.path().to_string(),
                });
            }
        }
        Ok(())
    }

    /// New blank instance with a fresh id, tracked as `Added`.
    pub fn create(&self) -> StoreResult<EntityRef<T>> {
        let entity = EntityRef::new(T::blank(EntityId::new_v4()));
        self.with_context(|context| {
            context.tracker_mut().track(entity.erase(), EntityState::Added);
            Ok(())
        })?;
        Ok(entity)
    }

    /// Tracks `entity` as `Added`, along with untracked navigations.
    ///
    /// # Errors
    /// - `DuplicateKey` when another instance with the same id is tracked.
    pub fn insert(&self, entity: &EntityRef<T>) -> StoreResult<()> {
        self.with_context(|context| {
            context
                .tracker_mut()
                .add_graph(&entity.erase())
                .map_err(|conflict| StoreError::DuplicateKey {
                    detail: format!(
                        "an instance of {} {} is already tracked",
                        T::ENTITY_NAME,
                        conflict.id()
                    ),
                })
        })?;
        debug!(
            "event=entity_insert module=repo status=ok entity={} id={}",
            T::ENTITY_NAME,
            entity.id()
        );
        Ok(())
    }

    /// Attaches `entity` as `Modified` and returns the tracked instance.
    ///
    /// When another instance with the same id is already tracked, the
    /// differing field values of `entity` are copied onto it and only those
    /// fields are marked modified.
    pub fn update(&self, entity: &EntityRef<T>) -> StoreResult<EntityRef<T>> {
        let tracked = self.attach_as(entity, EntityState::Modified)?;
        if tracked.ptr_eq(entity) {
            return Ok(tracked);
        }

        let incoming = entity.borrow();
        let current = tracked.borrow();
        let changes: FieldChanges = T::FIELDS
            .iter()
            .filter_map(|field| {
                let value = incoming.field_value(field.name)?;
                (current.field_value(field.name).as_ref() != Some(&value))
                    .then(|| (field.name.to_string(), value))
            })
            .collect();
        drop(current);
        drop(incoming);
        self.update_changed_fields(&tracked, &changes, None)
    }

    /// Marks `entity` for deletion; a pending insert is simply untracked.
    pub fn delete(&self, entity: &EntityRef<T>) -> StoreResult<()> {
        let pending_insert = self.entity_state(entity)? == EntityState::Added;
        let target = if pending_insert {
            entity.clone()
        } else {
            self.attach_as(entity, EntityState::Unchanged)?
        };
        self.with_context(|context| {
            context.tracker_mut().mark_deleted(&target.key());
            Ok(())
        })?;
        debug!(
            "event=entity_delete module=repo status=ok entity={} id={} pending_insert={pending_insert}",
            T::ENTITY_NAME,
            target.id()
        );
        Ok(())
    }

    /// # Errors
    /// - `NullEntity` when no row exists for `id`.
    pub fn delete_by_id(&self, id: EntityId) -> StoreResult<()> {
        let entity = self
            .find_by_id(id, &[])?
            .ok_or(StoreError::NullEntity {
                operation: "delete_by_id",
            })?;
        self.delete(&entity)
    }

    /// Attaches `entity` as `Unchanged` and returns the tracked instance.
    pub fn attach(&self, entity: &EntityRef<T>) -> StoreResult<EntityRef<T>> {
        self.attach_as(entity, EntityState::Unchanged)
    }

    fn attach_as(&self, entity: &EntityRef<T>, target: EntityState) -> StoreResult<EntityRef<T>> {
        self.with_context(|context| {
            let attached = tracker::attach(context.tracker(), &entity.erase(), target);
            let resolved = attached.resolved.downcast::<T>().ok_or_else(|| {
                StoreError::InvalidData(format!(
                    "tracked instance for {} {} has a different type",
                    T::ENTITY_NAME,
                    entity.id()
                ))
            })?;
            debug!(
                "event=entity_attach module=repo entity={} id={} target={} outcome={:?}",
                T::ENTITY_NAME,
                resolved.id(),
                target.as_str(),
                attached.outcome
            );
            if let Some(next) = attached.tracker {
                context.replace_tracker(next);
            }
            Ok(resolved)
        })
    }

    /// Stops tracking this exact instance; returns whether it was tracked.
    pub fn detach(&self, entity: &EntityRef<T>) -> StoreResult<bool> {
        self.with_context(|context| {
            let erased = entity.erase();
            if context.tracker().state_of(&erased) == EntityState::Detached {
                return Ok(false);
            }
            Ok(context.tracker_mut().detach(&erased.key()))
        })
    }

    pub fn entity_state(&self, entity: &EntityRef<T>) -> StoreResult<EntityState> {
        self.with_context(|context| Ok(context.tracker().state_of(&entity.erase())))
    }

    /// Applies `changes` to `entity`, marking only fields whose value
    /// actually changed. A detached instance is attached first, and the
    /// changes land on the instance the identity map resolves to.
    ///
    /// Keys that are not mapped fields go to `Entity::set_unmapped_field`.
    ///
    /// # Errors
    /// - `IdentityChange` when `id` is present with a different value.
    /// - `UnknownField` when a key is neither mapped nor accepted.
    /// - `InvalidField` when a value does not fit its field.
    /// - Any error returned by `post_apply`.
    pub fn update_changed_fields(
        &self,
        entity: &EntityRef<T>,
        changes: &FieldChanges,
        post_apply: Option<PostApplyHook<'_, T>>,
    ) -> StoreResult<EntityRef<T>> {
        let target = match self.entity_state(entity)? {
            EntityState::Detached => self.attach(entity)?,
            _ => entity.clone(),
        };
        let key = target.key();

        let mut changed_fields = Vec::new();
        for (name, value) in changes {
            if name == ID_COLUMN {
                if *value != uuid_value(key.id()) {
                    return Err(StoreError::IdentityChange {
                        entity: T::ENTITY_NAME,
                        id: key.id(),
                    });
                }
                continue;
            }

            match T::field(name) {
                Some(field) => {
                    let mut current = target.borrow_mut();
                    if current.field_value(field.name).as_ref() == Some(value) {
                        continue;
                    }
                    current
                        .set_field_value(field.name, value.clone())
                        .map_err(|source| StoreError::InvalidField {
                            entity: T::ENTITY_NAME,
                            source,
                        })?;
                    changed_fields.push(field.name);
                }
                None => {
                    if !target.borrow_mut().set_unmapped_field(name, value) {
                        return Err(StoreError::UnknownField {
                            entity: T::ENTITY_NAME,
                            field: name.clone(),
                        });
                    }
                }
            }
        }

        self.mark_fields_modified(&key, &changed_fields)?;
        if let Some(hook) = post_apply {
            hook(&target)?;
        }
        debug!(
            "event=entity_patch module=repo status=ok entity={} id={} changed_fields={}",
            T::ENTITY_NAME,
            key.id(),
            changed_fields.join(",")
        );
        Ok(target)
    }

    /// `update_changed_fields` on the instance stored under `id`.
    ///
    /// # Errors
    /// - `NullEntity` when no row exists for `id`.
    pub fn update_changed_fields_by_id(
        &self,
        id: EntityId,
        changes: &FieldChanges,
        post_apply: Option<PostApplyHook<'_, T>>,
    ) -> StoreResult<EntityRef<T>> {
        let entity = self
            .find_by_id(id, &[])?
            .ok_or(StoreError::NullEntity {
                operation: "update_changed_fields_by_id",
            })?;
        self.update_changed_fields(&entity, changes, post_apply)
    }

    fn mark_fields_modified(&self, key: &EntityKey, fields: &[&'static str]) -> StoreResult<()> {
        self.with_context(|context| {
            for field in fields {
                context.tracker_mut().mark_field_modified(key, field);
            }
            Ok(())
        })
    }

    /// Names of fields marked modified.
    ///
    /// `update_changed_fields`, patches and `update` with a copy of a tracked
    /// instance mark only fields whose value changed. `update` of the tracked
    /// instance itself, or of a detached one, marks every mapped field and
    /// writes the whole row.
    ///
    /// Empty for untracked instances and pending inserts.
    pub fn get_modified_field_names(&self, entity: &EntityRef<T>) -> StoreResult<Vec<String>> {
        self.with_context(|context| {
            let erased = entity.erase();
            if context.tracker().state_of(&erased) == EntityState::Detached {
                return Ok(Vec::new());
            }
            Ok(context
                .tracker()
                .modified_fields(&erased.key())
                .into_iter()
                .map(str::to_string)
                .collect())
        })
    }

    /// Value `field` had when the instance was loaded or last saved.
    ///
    /// `None` for untracked instances and pending inserts.
    pub fn get_original_value<V: FromSql>(
        &self,
        entity: &EntityRef<T>,
        field: Field<T, V>,
    ) -> StoreResult<Option<V>> {
        self.with_context(|context| {
            let erased = entity.erase();
            if context.tracker().state_of(&erased) == EntityState::Detached {
                return Ok(None);
            }
            let Some(value) = context.tracker().original_value(&erased.key(), field.name()) else {
                return Ok(None);
            };
            V::column_result(ValueRef::from(value))
                .map(Some)
                .map_err(|err| {
                    StoreError::InvalidData(format!(
                        "original {}.{} cannot be read: {err}",
                        T::ENTITY_NAME,
                        field.name()
                    ))
                })
        })
    }

    pub fn fetch(&self, query: &Query<T>) -> StoreResult<Vec<EntityRef<T>>> {
        let compiled = query.compile()?;
        let entities = self.with_context(|context| context.fetch::<T>(&compiled))?;
        for entity in &entities {
            self.load_includes(entity, query.includes())?;
        }
        Ok(entities)
    }

    pub fn first(&self, query: &Query<T>) -> StoreResult<Option<EntityRef<T>>> {
        let single = query.clone().page(0, 1);
        Ok(self.fetch(&single)?.into_iter().next())
    }

    pub fn count(&self, query: &Query<T>) -> StoreResult<u64> {
        let compiled = query.compile_count()?;
        self.with_context(|context| context.count(&compiled))
    }

    pub fn any(&self, query: &Query<T>) -> StoreResult<bool> {
        Ok(self.count(query)? > 0)
    }

    /// Total match count plus the requested page.
    pub fn fetch_page(&self, query: &Query<T>) -> StoreResult<Paged<T>> {
        let total_results = self.count(query)?;
        let items = self.fetch(query)?;
        Ok(Paged {
            items,
            total_results,
        })
    }

    /// Tracked instances of `T` not pending deletion, in tracking order.
    pub fn local(&self) -> StoreResult<Vec<EntityRef<T>>> {
        self.with_context(|context| {
            Ok(context
                .tracker()
                .entries()
                .filter(|entry| entry.state() != EntityState::Deleted)
                .filter_map(|entry| entry.instance().downcast::<T>())
                .collect())
        })
    }
}

impl<T: Entity> fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &T::ENTITY_NAME)
            .field("released", &(self.uow.strong_count() == 0))
            .finish()
    }
}
