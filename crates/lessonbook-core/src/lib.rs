//! Reservation engine for lessonbook
//!
//! This crate holds the business rules:
//! - Reservation lifecycle (PENDING_APPROVAL -> APPROVED -> CONFIRMED -> COMPLETED, or CANCELED)
//! - Role-aware cancellation policy and fees
//! - Policy epochs (charge at approval vs. deferred charge)
//! - The deferred charge sweep and its write-once claim

mod engine;
mod epoch;
mod error;
mod policy;
mod scheduler;

pub use engine::*;
pub use epoch::*;
pub use error::*;
pub use policy::*;
