//! Use-case services over a unit of work.
//!
//! # Responsibility
//! - Orchestrate validate, save and reload sequences for callers.
//! - Keep callers away from tracker and transaction details.

mod entity_service;

pub use entity_service::EntityService;
