//! Payment gateway and notification interfaces for lessonbook
//!
//! This crate defines the boundary between the reservation engine and the
//! outside world. It contains no vendor wire protocol:
//! - `PaymentGateway`: attach a reusable payment method, charge it later
//! - `Notifier`: fire-and-forget alerts and confirmations
//! - A sandbox gateway for the daemon and mocks for tests

mod mock;
mod notify;
mod sandbox;
mod traits;

pub use mock::*;
pub use notify::*;
pub use sandbox::*;
pub use traits::*;
