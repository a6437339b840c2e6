//! Ride dispatch core
//!
//! Everything the chat front-end needs to run a ride-hailing service lives
//! here, independent of the transport and the database:
//!
//! - [`lifecycle::RideService`] owns the ride state machine and arbitrates
//!   the accept race through conditional store updates.
//! - [`matcher::DriverMatcher`] picks nearby on-duty drivers and sends them
//!   ride offers.
//! - [`fare::FareTable`] prices a trip.
//! - [`accounts::AccountService`] handles registration, roles and driver duty.
//! - [`sweep::MaintenanceService`] expires stale pending rides and prunes old
//!   records.
//!
//! Storage is injected through the traits in [`ports`]; [`memory::MemoryStore`]
//! implements them in process.

pub mod accounts;
pub mod clock;
pub mod config;
pub mod error;
pub mod fare;
pub mod geo;
pub mod lifecycle;
pub mod matcher;
pub mod memory;
pub mod messages;
pub mod models;
pub mod notify;
pub mod ports;
pub mod sweep;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::{DispatchError, DispatchResult};
