//! Fixed capacities of a device

/// Number of job records per device
pub const JOBS_Q_SZ: usize = 250;

/// Number of argument slots per job
pub const MAX_ARGS: usize = 32;

/// Interrupt lines reserved for platform (non-slot) use
///
/// Slot lines start at this offset.
pub const PLATFORM_INTERRUPTS: usize = 8;
