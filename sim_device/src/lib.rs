//! # Simulated Device
//!
//! Software stand-ins for the platform collaborators of the dispatch core:
//! an interrupt controller whose lines tests fire by hand, and a device heap
//! with a fixed capacity.
//!
//! ## Philosophy
//!
//! - **Deterministic**: Faults fire exactly where the plan says
//! - **Observable**: Tests can see every registered line and live allocation
//! - **Test-focused**: Not intended for production use

pub mod controller;
pub mod fault_injection;
pub mod memory;

pub use controller::SimInterruptController;
pub use fault_injection::{FaultPlan, IrqFault, MemoryFault};
pub use memory::SimDeviceMemory;
