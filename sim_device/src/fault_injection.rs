//! Deterministic fault injection for testing
//!
//! ## Example
//!
//! ```
//! use sim_device::fault_injection::{FaultPlan, IrqFault, MemoryFault};
//!
//! let plan = FaultPlan::new()
//!     .with_irq_fault(IrqFault::FailRequest { line: 11, code: -16 })
//!     .with_memory_fault(MemoryFault::FailNext { count: 2 });
//! assert_eq!(plan.irq_faults().len(), 1);
//! ```

/// A fault to inject into interrupt registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrqFault {
    /// Refuse `request_irq` for a line with the given platform code
    FailRequest { line: usize, code: i32 },

    /// Report that a line has no vector
    NoVector { line: usize },
}

/// A fault to inject into the device heap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryFault {
    /// Fail the next N allocations as out of memory
    FailNext { count: usize },

    /// Fail the next allocation with a platform error code
    PlatformError { code: i32 },
}

/// A plan describing all faults to inject
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    irq_faults: Vec<IrqFault>,
    memory_faults: Vec<MemoryFault>,
}

impl FaultPlan {
    /// Creates a new empty fault plan
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an interrupt fault to the plan
    pub fn with_irq_fault(mut self, fault: IrqFault) -> Self {
        self.irq_faults.push(fault);
        self
    }

    /// Adds a memory fault to the plan
    pub fn with_memory_fault(mut self, fault: MemoryFault) -> Self {
        self.memory_faults.push(fault);
        self
    }

    pub fn irq_faults(&self) -> &[IrqFault] {
        &self.irq_faults
    }

    pub fn memory_faults(&self) -> &[MemoryFault] {
        &self.memory_faults
    }

    /// Returns the fault planned for `line`, if any
    pub(crate) fn irq_fault_for(&self, line: usize) -> Option<&IrqFault> {
        self.irq_faults.iter().find(|fault| match fault {
            IrqFault::FailRequest { line: l, .. } | IrqFault::NoVector { line: l } => *l == line,
        })
    }
}
