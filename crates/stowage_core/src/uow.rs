//! Unit of work: one database context, its repositories and transactions.
//!
//! # Responsibility
//! - Own the context and cache exactly one repository per entity type.
//! - Run the validation hook before inserts and updates.
//! - Manage the explicit transaction lifecycle and post-commit actions.
//!
//! # Invariants
//! - At most one transaction is open per unit of work.
//! - Transaction begin, commit and rollback hold the transaction lock.
//! - Post-commit actions run in registration order only after a successful
//!   commit, and the queue is emptied after every commit attempt.
//! - Dropping the last handle rolls back an open transaction.
//!
//! # See also
//! - src/repo/repository.rs

use crate::config::IsolationLevel;
use crate::context::DbContext;
use crate::error::{StoreError, StoreResult};
use crate::logic::LogicRegistry;
use crate::model::{Entity, EntityId, EntityRef, Include};
use crate::query::{Paged, Query};
use crate::repo::Repository;
use crate::tracker::EntityState;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Instant;

static GLOBAL_TRANSACTION_LOCK: Lazy<TransactionLock> = Lazy::new(TransactionLock::new);

/// Lock serializing transaction boundaries across units of work.
#[derive(Clone, Default)]
pub struct TransactionLock(Arc<Mutex<()>>);

impl TransactionLock {
    /// A new lock, independent from every other lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide lock shared by default.
    pub fn global() -> Self {
        GLOBAL_TRANSACTION_LOCK.clone()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn acquire(&self) -> MutexGuard<'_, ()> {
        self.0.lock()
    }
}

impl fmt::Debug for TransactionLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TransactionLock")
    }
}

type PostCommitAction = Box<dyn FnOnce()>;

pub(crate) struct UowInner {
    pub(crate) context: RefCell<DbContext>,
    repositories: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
    logic: Arc<LogicRegistry>,
    lock: TransactionLock,
    default_isolation: IsolationLevel,
    post_commit: RefCell<Vec<PostCommitAction>>,
}

impl Drop for UowInner {
    fn drop(&mut self) {
        let context = self.context.get_mut();
        if !context.has_transaction() {
            return;
        }
        let _guard = self.lock.acquire();
        match context.rollback() {
            Ok(()) => info!("event=uow_dispose module=uow status=ok rolled_back=true"),
            Err(err) => warn!("event=uow_dispose module=uow status=error rolled_back=false error={err}"),
        }
    }
}

pub struct UnitOfWork {
    inner: Rc<UowInner>,
}

impl UnitOfWork {
    /// Wraps a migrated connection using default logic, the global lock and
    /// `ReadCommitted` as default isolation.
    pub fn new(conn: Connection) -> Self {
        Self::with_parts(
            conn,
            Arc::new(LogicRegistry::with_defaults()),
            TransactionLock::global(),
            IsolationLevel::default(),
        )
    }

    pub fn with_parts(
        conn: Connection,
        logic: Arc<LogicRegistry>,
        lock: TransactionLock,
        default_isolation: IsolationLevel,
    ) -> Self {
        Self {
            inner: Rc::new(UowInner {
                context: RefCell::new(DbContext::new(conn)),
                repositories: RefCell::new(HashMap::new()),
                logic,
                lock,
                default_isolation,
                post_commit: RefCell::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<UowInner>) -> Self {
        Self { inner }
    }

    /// Cached repository for `T`, created on first access.
    pub fn repository_for<T: Entity>(&self) -> Rc<Repository<T>> {
        let mut repositories = self.inner.repositories.borrow_mut();
        if let Some(repository) = repositories
            .get(&TypeId::of::<T>())
            .and_then(|cached| Rc::clone(cached).downcast::<Repository<T>>().ok())
        {
            return repository;
        }

        debug!(
            "event=repository_create module=uow status=ok entity={}",
            T::ENTITY_NAME
        );
        let repository = Rc::new(Repository::<T>::new(Rc::downgrade(&self.inner)));
        repositories.insert(TypeId::of::<T>(), repository.clone());
        repository
    }

    pub fn repository_count(&self) -> usize {
        self.inner.repositories.borrow().len()
    }

    pub fn logic(&self) -> &LogicRegistry {
        &self.inner.logic
    }

    /// Runs the registered validation hook for `T`.
    pub fn validate<T: Entity>(&self, entity: &EntityRef<T>) -> StoreResult<()> {
        let logic = self.inner.logic.logic_for::<T>();
        let result = logic.validate(&entity.borrow(), self);
        if let Err(err) = &result {
            info!(
                "event=validation module=uow status=rejected entity={} id={} error={err}",
                T::ENTITY_NAME,
                entity.id()
            );
        }
        result.map_err(StoreError::from)
    }

    pub fn get_by_id<T: Entity>(&self, id: EntityId, includes: &[Include<T>]) -> StoreResult<Option<EntityRef<T>>> {
        self.repository_for::<T>().find_by_id(id, includes)
    }

    pub fn fetch<T: Entity>(&self, query: &Query<T>) -> StoreResult<Vec<EntityRef<T>>> {
        self.repository_for::<T>().fetch(query)
    }

    pub fn fetch_page<T: Entity>(&self, query: &Query<T>) -> StoreResult<Paged<T>> {
        self.repository_for::<T>().fetch_page(query)
    }

    pub fn count<T: Entity>(&self, query: &Query<T>) -> StoreResult<u64> {
        self.repository_for::<T>().count(query)
    }

    pub fn any<T: Entity>(&self, query: &Query<T>) -> StoreResult<bool> {
        self.repository_for::<T>().any(query)
    }

    /// Validates `entity` and tracks it (with untracked navigations) as `Added`.
    pub fn insert<T: Entity>(&self, entity: &EntityRef<T>) -> StoreResult<()> {
        self.validate(entity)?;
        self.repository_for::<T>().insert(entity)
    }

    /// Validates `entity` and attaches it as `Modified`; returns the tracked instance.
    pub fn update<T: Entity>(&self, entity: &EntityRef<T>) -> StoreResult<EntityRef<T>> {
        self.validate(entity)?;
        self.repository_for::<T>().update(entity)
    }

    pub fn delete<T: Entity>(&self, entity: &EntityRef<T>) -> StoreResult<()> {
        self.repository_for::<T>().delete(entity)
    }

    pub fn delete_by_id<T: Entity>(&self, id: EntityId) -> StoreResult<()> {
        self.repository_for::<T>().delete_by_id(id)
    }

    pub fn entity_state<T: Entity>(&self, entity: &EntityRef<T>) -> StoreResult<EntityState> {
        self.repository_for::<T>().entity_state(entity)
    }

    pub fn create<T: Entity>(&self) -> StoreResult<EntityRef<T>> {
        self.repository_for::<T>().create()
    }

    pub fn attach<T: Entity>(&self, entity: &EntityRef<T>) -> StoreResult<EntityRef<T>> {
        self.repository_for::<T>().attach(entity)
    }

    pub fn detach<T: Entity>(&self, entity: &EntityRef<T>) -> StoreResult<bool> {
        self.repository_for::<T>().detach(entity)
    }

    pub fn local<T: Entity>(&self) -> StoreResult<Vec<EntityRef<T>>> {
        self.repository_for::<T>().local()
    }

    pub fn has_transaction(&self) -> bool {
        self.inner.context.borrow().has_transaction()
    }

    /// Persists every tracked change.
    ///
    /// Inside an explicit transaction the writes join it; otherwise they are
    /// committed at once and the post-commit actions run.
    pub fn save_changes(&self) -> StoreResult<usize> {
        if self.has_transaction() {
            return self.inner.context.borrow_mut().save_changes();
        }

        let outcome = {
            let _guard = self.inner.lock.acquire();
            self.inner.context.borrow_mut().save_changes()
        };
        let actions = self.take_post_commit_actions();
        let written = outcome?;
        run_post_commit_actions(actions);
        Ok(written)
    }

    pub fn begin_transaction(&self) -> StoreResult<()> {
        self.begin_transaction_with(self.inner.default_isolation)
    }

    /// # Errors
    /// - `TransactionAlreadyActive` when a transaction is already open.
    pub fn begin_transaction_with(&self, isolation: IsolationLevel) -> StoreResult<()> {
        let _guard = self.inner.lock.acquire();
        let result = self.inner.context.borrow_mut().begin(isolation);
        match &result {
            Ok(()) => info!(
                "event=transaction_begin module=uow status=ok isolation={}",
                isolation.as_str()
            ),
            Err(err) => info!(
                "event=transaction_begin module=uow status=error isolation={} error={err}",
                isolation.as_str()
            ),
        }
        result
    }

    /// Saves pending changes and commits the open transaction.
    ///
    /// Returns `Ok(false)` on a persistence failure (constraint, conflict or
    /// datastore error); the transaction is then kept open for retry or
    /// rollback. Post-commit actions only run when this returns `Ok(true)`.
    pub fn commit_transaction(&self) -> StoreResult<bool> {
        let started_at = Instant::now();
        let outcome = {
            let _guard = self.inner.lock.acquire();
            let mut context = self.inner.context.borrow_mut();
            context.save_changes().and_then(|_| context.commit())
        };
        let actions = self.take_post_commit_actions();

        match outcome {
            Ok(()) => {
                info!(
                    "event=transaction_commit module=uow status=ok actions={} duration_ms={}",
                    actions.len(),
                    started_at.elapsed().as_millis()
                );
                run_post_commit_actions(actions);
                Ok(true)
            }
            Err(err) if err.is_persistence_failure() => {
                warn!(
                    "event=transaction_commit module=uow status=error transaction_kept={} duration_ms={} error={err}",
                    self.has_transaction(),
                    started_at.elapsed().as_millis()
                );
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Rolls back and forgets the open transaction; discards queued actions.
    pub fn rollback_transaction(&self) -> StoreResult<()> {
        let result = {
            let _guard = self.inner.lock.acquire();
            self.inner.context.borrow_mut().rollback()
        };
        let discarded = self.take_post_commit_actions().len();
        match &result {
            Ok(()) => info!(
                "event=transaction_rollback module=uow status=ok discarded_actions={discarded}"
            ),
            Err(err) => warn!(
                "event=transaction_rollback module=uow status=error discarded_actions={discarded} error={err}"
            ),
        }
        result
    }

    pub fn add_post_commit_action(&self, action: impl FnOnce() + 'static) {
        self.inner.post_commit.borrow_mut().push(Box::new(action));
    }

    pub fn pending_post_commit_actions(&self) -> usize {
        self.inner.post_commit.borrow().len()
    }

    fn take_post_commit_actions(&self) -> Vec<PostCommitAction> {
        std::mem::take(&mut *self.inner.post_commit.borrow_mut())
    }
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("repositories", &self.repository_count())
            .field("has_transaction", &self.has_transaction())
            .finish()
    }
}

fn run_post_commit_actions(actions: Vec<PostCommitAction>) {
    for action in actions {
        action();
    }
}

pub(crate) type UowHandle = Weak<UowInner>;
