//! Shared utilities for lessonbook
//!
//! This crate provides:
//! - ID types (SlotId, ReservationId, PaymentId, SessionId, UserId)
//! - Time utilities (service clock, hour/minute deltas, charge windows)
//! - Policy constants shared by the cancellation engine and the scheduler
//! - Error types
//! - Default paths for config and data directories

mod error;
mod ids;
mod paths;
mod policy;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use policy::*;
pub use time::*;
