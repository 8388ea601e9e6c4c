use super::{ensure_text, EntityLogic, ValidationError};
use crate::model::{Customer, Entity, Vehicle};
use crate::uow::UnitOfWork;
use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

const FIRST_MODEL_YEAR: i64 = 1886;
const MAX_LABEL_CHARS: usize = 128;

// 17 characters, I/O/Q excluded.
static VIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-HJ-NPR-Z0-9]{17}$").expect("valid vin regex"));

#[derive(Debug, Clone, Copy, Default)]
pub struct VehicleLogic;

impl EntityLogic<Vehicle> for VehicleLogic {
    fn validate(&self, vehicle: &Vehicle, uow: &UnitOfWork) -> Result<(), ValidationError> {
        let entity = Vehicle::ENTITY_NAME;
        if !VIN_RE.is_match(&vehicle.vin) {
            return Err(ValidationError::for_field(
                entity,
                "vin",
                format!("`{}` is not a valid 17-character VIN", vehicle.vin),
            ));
        }
        ensure_text(entity, "make", &vehicle.make, MAX_LABEL_CHARS)?;
        ensure_text(entity, "model", &vehicle.model, MAX_LABEL_CHARS)?;

        if let Some(year) = vehicle.model_year {
            let latest = i64::from(Utc::now().year()) + 1;
            if !(FIRST_MODEL_YEAR..=latest).contains(&year) {
                return Err(ValidationError::for_field(
                    entity,
                    "model_year",
                    format!("model_year must be between {FIRST_MODEL_YEAR} and {latest}"),
                ));
            }
        }

        if let Some(customer_id) = vehicle.customer_id {
            let owner = uow
                .get_by_id::<Customer>(customer_id, &[])
                .map_err(|err| {
                    ValidationError::for_field(entity, "customer_id", format!("owner lookup failed: {err}"))
                })?;
            if owner.is_none() {
                return Err(ValidationError::for_field(
                    entity,
                    "customer_id",
                    format!("customer {customer_id} does not exist"),
                ));
            }
        }
        Ok(())
    }
}
