//! # Device
//!
//! The explicit device context that ties the dispatch core together: one
//! [`Device`] owns a job table, an interrupt router, a completion bridge and
//! the access counters, and every job operation goes through it.
//!
//! ## Completion path
//!
//! ```text
//! slot interrupt -> top half (queue) -> worker -> Device::signal_slot_interrupt
//!     -> RUNNING -> FINISHED -> CompletionBridge::signal -> waiter wakes
//! ```
//!
//! ## Teardown
//!
//! [`Device::exit`] is the orderly path and refuses while the device is open.
//! [`Device::remove`] is hot removal: waiters are cancelled, queued deferred
//! work drains, then lines and staged transfers are released.

pub mod bus;
pub mod config;
pub mod device;
pub mod registration;
pub mod stats;

pub use bus::DeviceBus;
pub use config::{ConfigError, DeviceConfig, MAX_INTERRUPT_LINES};
pub use device::{AccessGuard, Device};
pub use registration::DeviceRegistration;
pub use stats::{DeviceStats, StatsSnapshot};
