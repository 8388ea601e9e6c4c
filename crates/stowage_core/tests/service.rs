use serde_json::json;
use stowage_core::patch::CustomerVehiclesInterceptor;
use stowage_core::{
    Customer, DataStore, EntityRef, EntityService, Predicate, Query, StoreError, StoreOptions,
    UnitOfWork, Vehicle,
};
use uuid::Uuid;

#[test]
fn add_saves_and_returns_reloaded_entity() {
    let uow = memory_uow();
    let service = EntityService::<Customer>::new(&uow);
    let customer = EntityRef::new(Customer::new("Ada", "Lovelace"));

    let added = service.add(&customer).unwrap();

    assert_eq!(added.id(), customer.id());
    assert_eq!(uow.count(&Query::<Customer>::new()).unwrap(), 1);
    assert!(service.get_by_id(customer.id()).unwrap().is_some());
}

#[test]
fn add_rejects_invalid_entity_without_saving() {
    let uow = memory_uow();
    let service = EntityService::<Customer>::new(&uow);

    let err = service
        .add(&EntityRef::new(Customer::new("", "Lovelace")))
        .unwrap_err();

    assert!(matches!(err, StoreError::Validation(_)));
    assert_eq!(uow.count(&Query::<Customer>::new()).unwrap(), 0);
}

#[test]
fn update_persists_detached_changes() {
    let uow = memory_uow();
    let service = EntityService::<Customer>::new(&uow);
    let customer = service
        .add(&EntityRef::new(Customer::new("Ada", "Lovelace")))
        .unwrap();

    let copy = customer.detached_copy();
    copy.borrow_mut().last_name = "King".to_string();
    let updated = service.update(&copy).unwrap();

    assert!(updated.ptr_eq(&customer));
    assert_eq!(updated.borrow().last_name, "King");
}

#[test]
fn patch_with_interceptor_returns_entity_with_navigations() {
    let uow = memory_uow();
    let interceptor = CustomerVehiclesInterceptor;
    let service = EntityService::<Customer>::new(&uow)
        .with_single_includes(&[Customer::VEHICLES])
        .with_interceptor(&interceptor);
    let customer = service
        .add(&EntityRef::new(Customer::new("Ada", "Lovelace")))
        .unwrap();

    let changes = json!({
        "first_name": "Augusta",
        "vehicles": [{ "vin": "1HGCM82633A004352", "make": "Honda", "model": "Accord" }]
    });
    let patched = service
        .patch(customer.id(), changes.as_object().unwrap())
        .unwrap();

    assert_eq!(patched.borrow().first_name, "Augusta");
    assert_eq!(patched.borrow().vehicles.len(), 1);
    assert_eq!(uow.count(&Query::<Vehicle>::new()).unwrap(), 1);
}

#[test]
fn patch_of_unknown_id_is_null_entity() {
    let uow = memory_uow();
    let service = EntityService::<Customer>::new(&uow);

    let err = service
        .patch(Uuid::new_v4(), json!({ "first_name": "x" }).as_object().unwrap())
        .unwrap_err();
    assert!(matches!(err, StoreError::NullEntity { operation: "patch" }));
}

#[test]
fn delete_removes_entity() {
    let uow = memory_uow();
    let service = EntityService::<Customer>::new(&uow);
    let customer = service
        .add(&EntityRef::new(Customer::new("Ada", "Lovelace")))
        .unwrap();

    service.delete(customer.id()).unwrap();

    assert!(service.get_by_id(customer.id()).unwrap().is_none());
    let err = service.delete(customer.id()).unwrap_err();
    assert!(matches!(err, StoreError::NullEntity { .. }));
}

#[test]
fn get_page_applies_list_includes() {
    let uow = memory_uow();
    let customers = EntityService::<Customer>::new(&uow);
    let owner = customers
        .add(&EntityRef::new(Customer::new("Ada", "Lovelace")))
        .unwrap();
    let vehicles = EntityService::<Vehicle>::new(&uow).with_list_includes(&[Vehicle::OWNER]);
    for vin in ["1HGCM82633A004352", "JH4KA7561PC008269"] {
        vehicles
            .add(&EntityRef::new(Vehicle::new(vin, "Honda", "Accord").owned_by(owner.id())))
            .unwrap();
    }

    let page = vehicles
        .get_page(
            Query::<Vehicle>::new()
                .or(Predicate::eq("make", "Honda".to_string()))
                .page(0, 1),
        )
        .unwrap();

    assert_eq!(page.total_results, 2);
    assert_eq!(page.items.len(), 1);
    let loaded_owner = page.items[0].borrow().owner().unwrap();
    assert!(loaded_owner.ptr_eq(&owner));
}

#[test]
fn writes_inside_transaction_wait_for_commit() {
    let uow = memory_uow();
    let service = EntityService::<Customer>::new(&uow);
    uow.begin_transaction().unwrap();

    service
        .add(&EntityRef::new(Customer::new("Ada", "Lovelace")))
        .unwrap();
    assert!(uow.has_transaction());

    uow.rollback_transaction().unwrap();
    assert_eq!(uow.count(&Query::<Customer>::new()).unwrap(), 0);
}

fn memory_uow() -> UnitOfWork {
    DataStore::in_memory(StoreOptions::default())
        .unit_of_work()
        .unwrap()
}
