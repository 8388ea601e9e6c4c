//! Customer entity.
//!
//! # Invariants
//! - `first_name` and `last_name` are always present (possibly blank until
//!   validated).
//! - `vehicles` is a navigation and is never persisted through this row.

use crate::error::StoreResult;
use crate::model::entity::{Entity, EntityId, EntityRef, ErasedEntity, Field, Include};
use crate::model::field::{
    self, date_value, opt_text_value, text_value, uuid_value, FieldDef, FieldError, FieldKind,
};
use crate::model::vehicle::Vehicle;
use crate::query::{Predicate, Query};
use crate::uow::UnitOfWork;
use chrono::NaiveDate;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    #[serde(default)]
    pub id: EntityId,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(skip)]
    pub vehicles: Vec<EntityRef<Vehicle>>,
}

impl Customer {
    pub const FIRST_NAME: Field<Customer, String> = Field::new("first_name");
    pub const LAST_NAME: Field<Customer, String> = Field::new("last_name");
    pub const EMAIL: Field<Customer, Option<String>> = Field::new("email");
    pub const DATE_OF_BIRTH: Field<Customer, Option<NaiveDate>> = Field::new("date_of_birth");

    pub const VEHICLES: Include<Customer> = Include::new("vehicles");

    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            ..Self::blank(EntityId::new_v4())
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_date_of_birth(mut self, date_of_birth: NaiveDate) -> Self {
        self.date_of_birth = Some(date_of_birth);
        self
    }
}

impl Entity for Customer {
    const ENTITY_NAME: &'static str = "customer";
    const TABLE: &'static str = "customers";
    const FIELDS: &'static [FieldDef] = &[
        FieldDef::required("first_name", FieldKind::Text),
        FieldDef::required("last_name", FieldKind::Text),
        FieldDef::optional("email", FieldKind::Text),
        FieldDef::optional("date_of_birth", FieldKind::Date),
    ];

    fn blank(id: EntityId) -> Self {
        Self {
            id,
            first_name: String::new(),
            last_name: String::new(),
            email: None,
            date_of_birth: None,
            vehicles: Vec::new(),
        }
    }

    fn id(&self) -> EntityId {
        self.id
    }

    fn field_value(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(uuid_value(self.id)),
            "first_name" => Some(text_value(&self.first_name)),
            "last_name" => Some(text_value(&self.last_name)),
            "email" => Some(opt_text_value(self.email.as_deref())),
            "date_of_birth" => Some(self.date_of_birth.map_or(Value::Null, date_value)),
            _ => None,
        }
    }

    fn set_field_value(&mut self, name: &str, value: Value) -> Result<(), FieldError> {
        match name {
            "first_name" => self.first_name = field::to_text(name, value)?,
            "last_name" => self.last_name = field::to_text(name, value)?,
            "email" => self.email = field::to_opt_text(name, value)?,
            "date_of_birth" => self.date_of_birth = field::to_opt_date(name, value)?,
            _ => {
                return Err(FieldError::TypeMismatch {
                    field: name.to_string(),
                    expected: "mapped field",
                    found: "unknown field".to_string(),
                })
            }
        }
        Ok(())
    }

    fn navigations(&self) -> Vec<ErasedEntity> {
        self.vehicles.iter().map(EntityRef::erase).collect()
    }

    fn load_navigation(entity: &EntityRef<Self>, path: &str, uow: &UnitOfWork) -> StoreResult<bool> {
        match path {
            "vehicles" => {
                let query = Query::<Vehicle>::new()
                    .or(Predicate::eq(Vehicle::CUSTOMER_ID.name(), uuid_value(entity.id())))
                    .order_by("vin");
                let vehicles = uow.fetch(&query)?;
                entity.borrow_mut().vehicles = vehicles;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
