use super::{ensure_max_chars, ensure_text, EntityLogic, ValidationError};
use crate::model::field::uuid_value;
use crate::model::{Customer, Entity};
use crate::query::{Predicate, Query};
use crate::uow::UnitOfWork;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

const MAX_NAME_CHARS: usize = 256;
const MAX_EMAIL_CHARS: usize = 512;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

/// Names are required, email must look like an address and be unused by
/// any other stored customer, and birth dates cannot lie in the future.
#[derive(Debug, Clone, Copy, Default)]
pub struct CustomerLogic;

impl EntityLogic<Customer> for CustomerLogic {
    fn validate(&self, customer: &Customer, uow: &UnitOfWork) -> Result<(), ValidationError> {
        let entity = Customer::ENTITY_NAME;
        ensure_text(entity, "first_name", &customer.first_name, MAX_NAME_CHARS)?;
        ensure_text(entity, "last_name", &customer.last_name, MAX_NAME_CHARS)?;

        if let Some(date_of_birth) = customer.date_of_birth {
            if date_of_birth > Utc::now().date_naive() {
                return Err(ValidationError::for_field(
                    entity,
                    "date_of_birth",
                    "date_of_birth cannot be in the future",
                ));
            }
        }

        let Some(email) = customer.email.as_deref() else {
            return Ok(());
        };
        ensure_max_chars(entity, "email", email, MAX_EMAIL_CHARS)?;
        if !EMAIL_RE.is_match(email) {
            return Err(ValidationError::for_field(
                entity,
                "email",
                format!("`{email}` is not a valid email address"),
            ));
        }

        let taken = Query::<Customer>::new()
            .and(Predicate::eq_ignore_case(Customer::EMAIL.name(), email))
            .and(Predicate::ne("id", uuid_value(customer.id)));
        match uow.any(&taken) {
            Ok(false) => Ok(()),
            Ok(true) => Err(ValidationError::for_field(
                entity,
                "email",
                format!("`{email}` is already used by another customer"),
            )),
            Err(err) => Err(ValidationError::for_field(
                entity,
                "email",
                format!("email uniqueness could not be checked: {err}"),
            )),
        }
    }
}
