//! Domain types for internal task representation.
//!
//! [`TaskRecord`] is the registry's internal representation of a task,
//! separate from the caller-facing [`FleetFuture`](crate::session::FleetFuture)
//! handle that refers to it by identifier.

pub mod record;

pub use record::*;
