//! # Core Types
//!
//! This crate defines the fundamental types shared by every layer of the
//! accelerator dispatch core.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: Job, kernel, slot and device identifiers are
//!   distinct types and cannot be confused.
//! - **One error taxonomy**: Every fallible operation reports a [`CoreError`].
//! - **Bounded by construction**: Capacities come from [`limits`] and are
//!   fixed at device bring-up.
//!
//! ## Key Types
//!
//! - [`JobId`]: Index of a job record in a device's job table
//! - [`KernelId`]: Which PE program a job targets
//! - [`SlotId`]: Hardware instantiation index of a PE
//! - [`DeviceId`]: Unique identifier for an attached accelerator
//! - [`JobState`]: Job lifecycle state
//! - [`AllocFlags`] / [`CopyDirection`]: Transfer placement and direction

pub mod error;
pub mod flags;
pub mod ids;
pub mod limits;
pub mod state;

pub use error::CoreError;
pub use flags::{AllocFlags, CopyDirection};
pub use ids::{DeviceId, JobId, KernelId, SlotId};
pub use limits::{JOBS_Q_SZ, MAX_ARGS, PLATFORM_INTERRUPTS};
pub use state::JobState;
