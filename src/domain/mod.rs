//! Domain layer: aggregates, value objects, events and the payment status table.
pub mod aggregates;
pub mod events;
pub mod reconciliation;
pub mod value_objects;
