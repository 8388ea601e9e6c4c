//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `stowage_core` linkage with an in-memory round trip.
//! - Keep output deterministic apart from generated ids.

use serde_json::json;
use stowage_core::{Customer, DataStore, EntityRef, PatchMerge, StoreOptions};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("stowage_core ping={}", stowage_core::ping());
    println!("stowage_core version={}", stowage_core::core_version());

    let store = DataStore::in_memory(StoreOptions::default());
    let uow = store.unit_of_work()?;

    let customer = EntityRef::new(Customer::new("Ada", "Lovelace").with_email("ada@example.com"));
    uow.insert(&customer)?;
    uow.save_changes()?;

    uow.begin_transaction()?;
    let patch = json!({ "first_name": "Augusta Ada" });
    let patch = patch.as_object().cloned().unwrap_or_default();
    PatchMerge::<Customer>::new(&uow).apply(Some(&customer), &patch)?;
    uow.add_post_commit_action(|| println!("post_commit=ran"));
    let committed = uow.commit_transaction()?;

    let reloaded = uow.get_by_id::<Customer>(customer.id(), &[])?;
    let name = reloaded
        .as_ref()
        .map(|entity| entity.borrow().first_name.clone())
        .unwrap_or_default();
    println!("committed={committed} first_name={name}");
    Ok(())
}
