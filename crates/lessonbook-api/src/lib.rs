//! Domain types for lessonbook
//!
//! This crate defines the data model shared by the store, the engine and
//! the daemon:
//! - Status enums for reservations, payments and lesson sessions
//! - Roles and the request-scoped context passed into every operation
//! - Entities (LessonSlot, Reservation, Payment, LessonSession)
//! - Outcomes returned by the exposed operations

mod models;
mod outcomes;
mod types;

pub use models::*;
pub use outcomes::*;
pub use types::*;
