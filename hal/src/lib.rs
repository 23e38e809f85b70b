//! # Hardware Abstraction Layer (HAL)
//!
//! This crate defines the platform collaborators the dispatch core talks to.
//!
//! ## Philosophy
//!
//! **Bus and platform code must be fully abstracted and swappable.**
//!
//! The core never programs a PCIe or Zynq interrupt controller directly, and
//! never touches a device heap allocator. It goes through these traits, which
//! the bus layer implements for real hardware and `sim_device` implements for
//! tests.
//!
//! ## Design Principles
//!
//! 1. **Trait-based**: Interrupt and memory operations go through traits
//! 2. **Typed errors**: Platform failures keep their error code
//! 3. **Testable**: Both traits can be simulated with fault injection

pub mod interrupts;
pub mod memory;

pub use interrupts::{IrqError, IrqHandler, IrqReturn, InterruptController};
pub use memory::{DeviceHandle, DeviceMemory, MemoryError};
