//! Generic entity use-case service.
//!
//! # Responsibility
//! - Provide add/update/patch/delete entry points that save immediately.
//! - Return reloaded instances with the configured navigations loaded.
//!
//! # Invariants
//! - Every write is validated before it is saved.
//! - Writes join an open transaction instead of committing on their own.

use crate::error::{StoreError, StoreResult};
use crate::model::{Entity, EntityId, EntityRef, Include};
use crate::patch::{FieldInterceptor, PatchDocument, PatchMerge};
use crate::query::{Paged, Query};
use crate::uow::UnitOfWork;
use log::info;
use std::time::Instant;

pub struct EntityService<'u, T: Entity> {
    uow: &'u UnitOfWork,
    single_includes: Vec<Include<T>>,
    list_includes: Vec<Include<T>>,
    interceptor: Option<&'u dyn FieldInterceptor<T>>,
}

impl<'u, T: Entity> EntityService<'u, T> {
    pub fn new(uow: &'u UnitOfWork) -> Self {
        Self {
            uow,
            single_includes: Vec::new(),
            list_includes: Vec::new(),
            interceptor: None,
        }
    }

    /// Navigations loaded by `get_by_id` and by every write's reload.
    pub fn with_single_includes(mut self, includes: &[Include<T>]) -> Self {
        self.single_includes = includes.to_vec();
        self
    }

    /// Navigations loaded for every item returned by `get_page`.
    pub fn with_list_includes(mut self, includes: &[Include<T>]) -> Self {
        self.list_includes = includes.to_vec();
        self
    }

    pub fn with_interceptor(mut self, interceptor: &'u dyn FieldInterceptor<T>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    pub fn get_by_id(&self, id: EntityId) -> StoreResult<Option<EntityRef<T>>> {
        self.uow.get_by_id(id, &self.single_includes)
    }

    /// Total count for the filter plus the requested page.
    pub fn get_page(&self, query: Query<T>) -> StoreResult<Paged<T>> {
        let query = self
            .list_includes
            .iter()
            .fold(query, |query, include| query.include(*include));
        self.uow.fetch_page(&query)
    }

    pub fn add(&self, entity: &EntityRef<T>) -> StoreResult<EntityRef<T>> {
        let started_at = Instant::now();
        self.uow.insert(entity)?;
        self.uow.save_changes()?;
        self.log_write("add", entity.id(), started_at);
        self.reload(entity.id())
    }

    pub fn update(&self, entity: &EntityRef<T>) -> StoreResult<EntityRef<T>> {
        let started_at = Instant::now();
        let tracked = self.uow.update(entity)?;
        self.uow.save_changes()?;
        self.log_write("update", tracked.id(), started_at);
        self.reload(tracked.id())
    }

    /// Merges `changes` into the stored entity `id` and saves.
    ///
    /// # Errors
    /// - `NullEntity` when no entity exists for `id`.
    pub fn patch(&self, id: EntityId, changes: &PatchDocument) -> StoreResult<EntityRef<T>> {
        let started_at = Instant::now();
        let existing = self.uow.get_by_id::<T>(id, &[])?;
        let mut merge = PatchMerge::<T>::new(self.uow);
        if let Some(interceptor) = self.interceptor {
            merge = merge.with_interceptor(interceptor);
        }
        merge.apply(existing.as_ref(), changes)?;
        self.uow.save_changes()?;
        self.log_write("patch", id, started_at);
        self.reload(id)
    }

    pub fn delete(&self, id: EntityId) -> StoreResult<()> {
        let started_at = Instant::now();
        self.uow.delete_by_id::<T>(id)?;
        self.uow.save_changes()?;
        self.log_write("delete", id, started_at);
        Ok(())
    }

    fn reload(&self, id: EntityId) -> StoreResult<EntityRef<T>> {
        self.get_by_id(id)?
            .ok_or(StoreError::NullEntity { operation: "reload" })
    }

    fn log_write(&self, operation: &str, id: EntityId, started_at: Instant) {
        info!(
            "event=entity_{operation} module=service status=ok entity={} id={id} duration_ms={}",
            T::ENTITY_NAME,
            started_at.elapsed().as_millis()
        );
    }
}
