//! Vehicle entity, optionally owned by a customer.

use crate::error::StoreResult;
use crate::model::customer::Customer;
use crate::model::entity::{Entity, EntityId, EntityRef, ErasedEntity, Field, Include, WeakEntityRef};
use crate::model::field::{
    self, bool_value, text_value, uuid_value, FieldDef, FieldError, FieldKind,
};
use crate::uow::UnitOfWork;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    #[serde(default)]
    pub id: EntityId,
    #[serde(default)]
    pub customer_id: Option<EntityId>,
    #[serde(default)]
    pub vin: String,
    #[serde(default)]
    pub make: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub model_year: Option<i64>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Back-reference to the owning customer. Held weakly so a customer
    /// with loaded `vehicles` and its vehicles do not keep each other alive.
    #[serde(skip)]
    pub owner: Option<WeakEntityRef<Customer>>,
}

fn default_active() -> bool {
    true
}

impl Vehicle {
    pub const CUSTOMER_ID: Field<Vehicle, Option<String>> = Field::new("customer_id");
    pub const VIN: Field<Vehicle, String> = Field::new("vin");
    pub const MAKE: Field<Vehicle, String> = Field::new("make");
    pub const MODEL_YEAR: Field<Vehicle, Option<i64>> = Field::new("model_year");
    pub const IS_ACTIVE: Field<Vehicle, bool> = Field::new("is_active");

    pub const OWNER: Include<Vehicle> = Include::new("owner");

    pub fn new(vin: impl Into<String>, make: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            vin: vin.into(),
            make: make.into(),
            model: model.into(),
            ..Self::blank(EntityId::new_v4())
        }
    }

    pub fn owned_by(mut self, customer_id: EntityId) -> Self {
        self.customer_id = Some(customer_id);
        self
    }

    pub fn with_model_year(mut self, model_year: i64) -> Self {
        self.model_year = Some(model_year);
        self
    }

    /// The loaded owner, while some other handle still holds it.
    pub fn owner(&self) -> Option<EntityRef<Customer>> {
        self.owner.as_ref().and_then(WeakEntityRef::upgrade)
    }
}

impl Entity for Vehicle {
    const ENTITY_NAME: &'static str = "vehicle";
    const TABLE: &'static str = "vehicles";
    const FIELDS: &'static [FieldDef] = &[
        FieldDef::optional("customer_id", FieldKind::Uuid),
        FieldDef::required("vin", FieldKind::Text),
        FieldDef::required("make", FieldKind::Text),
        FieldDef::required("model", FieldKind::Text),
        FieldDef::optional("model_year", FieldKind::Integer),
        FieldDef::required("is_active", FieldKind::Boolean),
    ];

    fn blank(id: EntityId) -> Self {
        Self {
            id,
            customer_id: None,
            vin: String::new(),
            make: String::new(),
            model: String::new(),
            model_year: None,
            is_active: true,
            owner: None,
        }
    }

    fn id(&self) -> EntityId {
        self.id
    }

    fn field_value(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(uuid_value(self.id)),
            "customer_id" => Some(self.customer_id.map_or(Value::Null, uuid_value)),
            "vin" => Some(text_value(&self.vin)),
            "make" => Some(text_value(&self.make)),
            "model" => Some(text_value(&self.model)),
            "model_year" => Some(self.model_year.map_or(Value::Null, Value::Integer)),
            "is_active" => Some(bool_value(self.is_active)),
            _ => None,
        }
    }

    fn set_field_value(&mut self, name: &str, value: Value) -> Result<(), FieldError> {
        match name {
            "customer_id" => self.customer_id = field::to_opt_uuid(name, value)?,
            "vin" => self.vin = field::to_text(name, value)?,
            "make" => self.make = field::to_text(name, value)?,
            "model" => self.model = field::to_text(name, value)?,
            "model_year" => self.model_year = field::to_opt_integer(name, value)?,
            "is_active" => self.is_active = field::to_bool(name, value)?,
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
        self.owner().iter().map(EntityRef::erase).collect()
    }

    fn load_navigation(entity: &EntityRef<Self>, path: &str, uow: &UnitOfWork) -> StoreResult<bool> {
        match path {
            "owner" => {
                let customer_id = entity.borrow().customer_id;
                let owner = match customer_id {
                    Some(id) => uow.get_by_id::<Customer>(id, &[])?,
                    None => None,
                };
                entity.borrow_mut().owner = owner.as_ref().map(EntityRef::downgrade);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
