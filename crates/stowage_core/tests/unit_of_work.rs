use std::cell::RefCell;
use std::rc::Rc;
use stowage_core::{
    Customer, DataStore, EntityRef, EntityState, IsolationLevel, LogicRegistry, Query, StoreError,
    StoreOptions, TransactionLock, UnitOfWork, ValidationError, Vehicle,
};
use tempfile::TempDir;
use uuid::Uuid;

#[test]
fn repository_is_created_once_per_type() {
    let uow = memory_uow();
    assert_eq!(uow.repository_count(), 0);

    let first = uow.repository_for::<Customer>();
    let second = uow.repository_for::<Customer>();
    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(uow.repository_count(), 1);

    uow.repository_for::<Vehicle>();
    assert_eq!(uow.repository_count(), 2);
}

#[test]
fn begin_twice_fails_with_transaction_already_active() {
    let uow = memory_uow();
    uow.begin_transaction().unwrap();

    let err = uow.begin_transaction().unwrap_err();
    assert!(matches!(err, StoreError::TransactionAlreadyActive));
    assert!(uow.has_transaction());

    uow.rollback_transaction().unwrap();
    assert!(!uow.has_transaction());
    uow.begin_transaction_with(IsolationLevel::Serializable).unwrap();
    uow.rollback_transaction().unwrap();
}

#[test]
fn post_commit_actions_run_in_order_after_commit() {
    let uow = memory_uow();
    let ran = Rc::new(RefCell::new(Vec::new()));
    uow.begin_transaction().unwrap();
    uow.insert(&EntityRef::new(Customer::new("Ada", "Lovelace"))).unwrap();

    for step in 1..=3 {
        let ran = Rc::clone(&ran);
        uow.add_post_commit_action(move || ran.borrow_mut().push(step));
    }
    uow.save_changes().unwrap();
    assert!(ran.borrow().is_empty());
    assert_eq!(uow.pending_post_commit_actions(), 3);

    assert!(uow.commit_transaction().unwrap());
    assert_eq!(*ran.borrow(), vec![1, 2, 3]);
    assert_eq!(uow.pending_post_commit_actions(), 0);
    assert!(!uow.has_transaction());
}

#[test]
fn failed_commit_keeps_transaction_and_skips_actions() {
    let uow = memory_uow();
    let ran = Rc::new(RefCell::new(false));
    uow.begin_transaction().unwrap();

    let orphan = EntityRef::new(Vehicle::new("1HGCM82633A004352", "Honda", "Accord").owned_by(Uuid::new_v4()));
    uow.repository_for::<Vehicle>().insert(&orphan).unwrap();
    let flag = Rc::clone(&ran);
    uow.add_post_commit_action(move || *flag.borrow_mut() = true);

    assert!(!uow.commit_transaction().unwrap());
    assert!(!*ran.borrow());
    assert_eq!(uow.pending_post_commit_actions(), 0);
    assert!(uow.has_transaction());

    uow.rollback_transaction().unwrap();
    assert!(!uow.has_transaction());
    assert_eq!(uow.count(&Query::<Vehicle>::new()).unwrap(), 0);
}

#[test]
fn deleting_referenced_row_in_transaction_stays_pending() {
    let uow = memory_uow();
    let customer = EntityRef::new(Customer::new("Ada", "Lovelace"));
    uow.insert(&customer).unwrap();
    uow.save_changes().unwrap();
    let vehicle = EntityRef::new(Vehicle::new("1HGCM82633A004352", "Honda", "Accord").owned_by(customer.id()));
    uow.insert(&vehicle).unwrap();
    uow.save_changes().unwrap();

    uow.begin_transaction().unwrap();
    uow.delete(&customer).unwrap();
    let err = uow.save_changes().unwrap_err();
    assert!(matches!(err, StoreError::ReferentialConstraint { .. }));
    assert!(!uow.commit_transaction().unwrap());
    assert!(uow.has_transaction());
    assert_eq!(uow.entity_state(&customer).unwrap(), EntityState::Deleted);

    uow.rollback_transaction().unwrap();
    uow.begin_transaction().unwrap();
    uow.delete(&vehicle).unwrap();
    assert!(uow.commit_transaction().unwrap());

    assert_eq!(uow.count(&Query::<Customer>::new()).unwrap(), 0);
    assert_eq!(uow.count(&Query::<Vehicle>::new()).unwrap(), 0);
}

#[test]
fn rollback_discards_writes_and_actions() {
    let uow = memory_uow();
    let ran = Rc::new(RefCell::new(false));
    uow.begin_transaction().unwrap();
    uow.insert(&EntityRef::new(Customer::new("Ada", "Lovelace"))).unwrap();
    uow.save_changes().unwrap();
    assert_eq!(uow.count(&Query::<Customer>::new()).unwrap(), 1);

    let flag = Rc::clone(&ran);
    uow.add_post_commit_action(move || *flag.borrow_mut() = true);
    uow.rollback_transaction().unwrap();

    assert!(!*ran.borrow());
    assert_eq!(uow.pending_post_commit_actions(), 0);
    assert_eq!(uow.count(&Query::<Customer>::new()).unwrap(), 0);
}

#[test]
fn standalone_save_commits_and_runs_actions() {
    let uow = memory_uow();
    let ran = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&ran);
    uow.add_post_commit_action(move || *counter.borrow_mut() += 1);

    uow.insert(&EntityRef::new(Customer::new("Ada", "Lovelace"))).unwrap();
    assert_eq!(uow.save_changes().unwrap(), 1);

    assert_eq!(*ran.borrow(), 1);
    assert_eq!(uow.pending_post_commit_actions(), 0);
    assert!(!uow.has_transaction());
}

#[test]
fn failed_standalone_save_discards_actions() {
    let uow = memory_uow();
    let ran = Rc::new(RefCell::new(false));
    let flag = Rc::clone(&ran);
    uow.add_post_commit_action(move || *flag.borrow_mut() = true);

    let orphan = EntityRef::new(Vehicle::new("1HGCM82633A004352", "Honda", "Accord").owned_by(Uuid::new_v4()));
    uow.repository_for::<Vehicle>().insert(&orphan).unwrap();
    let err = uow.save_changes().unwrap_err();

    assert!(matches!(err, StoreError::ReferentialConstraint { .. }));
    assert!(!*ran.borrow());
    assert_eq!(uow.pending_post_commit_actions(), 0);
    assert_eq!(uow.count(&Query::<Vehicle>::new()).unwrap(), 0);
}

#[test]
fn commit_without_open_transaction_saves_pending_changes() {
    let uow = memory_uow();
    uow.insert(&EntityRef::new(Customer::new("Ada", "Lovelace"))).unwrap();

    assert!(uow.commit_transaction().unwrap());
    assert_eq!(uow.count(&Query::<Customer>::new()).unwrap(), 1);
}

#[test]
fn dropping_unit_of_work_rolls_back_open_transaction() {
    let (_dir, store) = file_store();
    let uow = store.unit_of_work().unwrap();
    uow.begin_transaction().unwrap();
    uow.insert(&EntityRef::new(Customer::new("Ada", "Lovelace"))).unwrap();
    uow.save_changes().unwrap();
    drop(uow);

    let reader = store.unit_of_work().unwrap();
    assert_eq!(reader.count(&Query::<Customer>::new()).unwrap(), 0);
}

#[test]
fn duplicate_primary_key_is_translated() {
    let (_dir, store) = file_store();
    let writer = store.unit_of_work().unwrap();
    let customer = EntityRef::new(Customer::new("Ada", "Lovelace"));
    writer.insert(&customer).unwrap();
    writer.save_changes().unwrap();

    let other = store.unit_of_work().unwrap();
    other
        .repository_for::<Customer>()
        .insert(&customer.detached_copy())
        .unwrap();
    let err = other.save_changes().unwrap_err();
    assert!(matches!(err, StoreError::DuplicateKey { .. }));
}

#[test]
fn duplicate_unique_column_is_translated() {
    let uow = memory_uow();
    let repo = uow.repository_for::<Customer>();
    repo.insert(&EntityRef::new(Customer::new("Ada", "Lovelace").with_email("ada@example.com")))
        .unwrap();
    repo.insert(&EntityRef::new(Customer::new("Augusta", "King").with_email("ADA@example.com")))
        .unwrap();

    let err = uow.save_changes().unwrap_err();
    assert!(matches!(err, StoreError::DuplicateKey { .. }));
    assert!(err.is_persistence_failure());
}

#[test]
fn validation_failure_leaves_tracker_untouched() {
    let uow = memory_uow();
    let blank = EntityRef::new(Customer::new("  ", "Lovelace"));

    let err = uow.insert(&blank).unwrap_err();

    assert!(matches!(err, StoreError::Validation(ref inner) if inner.field == Some("first_name")));
    assert!(uow.local::<Customer>().unwrap().is_empty());
}

#[test]
fn customer_email_must_be_unique_ignoring_case() {
    let uow = memory_uow();
    uow.insert(&EntityRef::new(Customer::new("Ada", "Lovelace").with_email("ada@example.com")))
        .unwrap();
    uow.save_changes().unwrap();

    let err = uow
        .insert(&EntityRef::new(Customer::new("Augusta", "King").with_email("ADA@Example.com")))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let err = uow
        .insert(&EntityRef::new(Customer::new("Augusta", "King").with_email("not-an-address")))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[test]
fn vehicle_requires_existing_owner_and_valid_vin() {
    let uow = memory_uow();
    let orphan = Vehicle::new("1HGCM82633A004352", "Honda", "Accord").owned_by(Uuid::new_v4());
    let err = uow.insert(&EntityRef::new(orphan)).unwrap_err();
    assert!(matches!(err, StoreError::Validation(ref inner) if inner.field == Some("customer_id")));

    let bad_vin = Vehicle::new("IOQ", "Honda", "Accord");
    let err = uow.insert(&EntityRef::new(bad_vin)).unwrap_err();
    assert!(matches!(err, StoreError::Validation(ref inner) if inner.field == Some("vin")));

    let ancient = Vehicle::new("1HGCM82633A004352", "Benz", "Motorwagen").with_model_year(1850);
    let err = uow.insert(&EntityRef::new(ancient)).unwrap_err();
    assert!(matches!(err, StoreError::Validation(ref inner) if inner.field == Some("model_year")));
}

#[test]
fn store_uses_registered_logic() {
    let logic = LogicRegistry::new().with::<Customer, _>(|customer: &Customer, _uow: &UnitOfWork| {
        if customer.last_name == "Forbidden" {
            return Err(ValidationError::for_field("customer", "last_name", "not allowed"));
        }
        Ok(())
    });
    let uow = DataStore::in_memory(StoreOptions::default())
        .with_logic(logic)
        .unit_of_work()
        .unwrap();

    assert!(uow.logic().is_registered::<Customer>());
    assert!(!uow.logic().is_registered::<Vehicle>());
    uow.insert(&EntityRef::new(Customer::new("", "Allowed"))).unwrap();
    let err = uow
        .insert(&EntityRef::new(Customer::new("Ada", "Forbidden")))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[test]
fn stores_share_global_lock_unless_scoped() {
    let shared = DataStore::in_memory(StoreOptions::default());
    assert!(shared.lock().ptr_eq(&TransactionLock::global()));

    let scoped = DataStore::in_memory(StoreOptions::default()).with_lock(TransactionLock::new());
    assert!(!scoped.lock().ptr_eq(&TransactionLock::global()));

    let uow = scoped.unit_of_work().unwrap();
    uow.begin_transaction().unwrap();
    assert!(uow.commit_transaction().unwrap());
}

fn memory_uow() -> UnitOfWork {
    DataStore::in_memory(StoreOptions::default())
        .unit_of_work()
        .unwrap()
}

fn file_store() -> (TempDir, DataStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = DataStore::open(dir.path().join("stowage.db"), StoreOptions::default()).unwrap();
    (dir, store)
}
