//! # Interrupt Routing
//!
//! Turns hardware slot interrupts into process-context completion signals.
//!
//! ## Line numbering
//!
//! ```text
//! [0, platform_interrupts)                          platform (non-slot) lines
//! [platform_interrupts, platform_interrupts + N)    one line per hardware slot
//! ```
//!
//! ## Top half / bottom half
//!
//! Every slot line shares one parameterised handler that receives the line's
//! [`work::DeferredWork`] descriptor. The handler only marks the descriptor
//! pending and pushes it onto a bounded queue; it never blocks, allocates or
//! takes a sleeping lock. A small worker pool pops descriptors and calls the
//! device's [`SlotInterruptSink`] in ordinary thread context.

pub mod router;
pub mod work;

pub use router::{InterruptLine, InterruptRouter, LinePurpose};
pub use work::{DeferredQueue, DeferredWork, WorkScheduler};

use core_types::SlotId;

/// Receiver of slot completions, implemented by the device control layer
pub trait SlotInterruptSink: Send + Sync {
    /// Called in process context once per serviced slot interrupt
    fn signal_slot_interrupt(&self, slot: SlotId);
}
