use super::{add_or_update_all, FieldInterceptor};
use crate::error::StoreResult;
use crate::model::{Customer, EntityRef, Vehicle};
use crate::uow::UnitOfWork;
use serde_json::Value as JsonValue;

/// Handles the `vehicles` key of a customer patch: each element is upserted
/// as a vehicle owned by the patched customer, and the loaded navigation is
/// replaced with the result.
#[derive(Debug, Clone, Copy, Default)]
pub struct CustomerVehiclesInterceptor;

impl FieldInterceptor<Customer> for CustomerVehiclesInterceptor {
    fn intercept(
        &self,
        uow: &UnitOfWork,
        customer: &EntityRef<Customer>,
        field: &str,
        value: &JsonValue,
    ) -> StoreResult<bool> {
        if field != "vehicles" {
            return Ok(false);
        }

        let owner = JsonValue::String(customer.id().to_string());
        let documents = match value {
            JsonValue::Array(items) => JsonValue::Array(
                items
                    .iter()
                    .cloned()
                    .map(|mut item| {
                        if let Some(object) = item.as_object_mut() {
                            object.insert(Vehicle::CUSTOMER_ID.name().to_string(), owner.clone());
                        }
                        item
                    })
                    .collect(),
            ),
            other => other.clone(),
        };

        let vehicles = add_or_update_all::<Vehicle>(uow, &documents)?;
        customer.borrow_mut().vehicles = vehicles;
        Ok(true)
    }
}
