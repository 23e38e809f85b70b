//! Interrupt controller abstraction

use core_types::CoreError;
use std::sync::Arc;
use thiserror::Error;

/// Result of an interrupt handler invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// The interrupt was recognised and serviced
    Handled,
    /// The interrupt was not for this handler
    NotHandled,
}

/// Interrupt handler
///
/// Handlers run in interrupt context. They must not block, allocate, or
/// take sleeping locks.
pub type IrqHandler = Arc<dyn Fn() -> IrqReturn + Send + Sync>;

/// Errors reported by the platform interrupt controller
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IrqError {
    /// The controller has no vector for this line
    #[error("No interrupt vector for line {0}")]
    NoVector(usize),

    /// The platform refused the request
    #[error("Platform interrupt error {code} on vector {vector}")]
    Platform { vector: u32, code: i32 },
}

impl IrqError {
    /// Returns the platform error code
    pub fn code(&self) -> i32 {
        match self {
            // -ENXIO
            IrqError::NoVector(_) => -6,
            IrqError::Platform { code, .. } => *code,
        }
    }
}

impl From<IrqError> for CoreError {
    fn from(err: IrqError) -> Self {
        match err {
            IrqError::NoVector(line) => {
                CoreError::ResourceExhausted(format!("no interrupt vector for line {}", line))
            }
            IrqError::Platform { vector, code } => CoreError::DeviceError {
                code,
                context: format!("request of interrupt vector {} failed", vector),
            },
        }
    }
}

/// Platform interrupt controller
///
/// This trait abstracts the bus-specific interrupt plumbing (MSI-X vectors on
/// PCIe, GIC lines on Zynq). Lines are device-relative; the controller maps
/// each to a system vector.
pub trait InterruptController: Send + Sync {
    /// Returns the system vector for a device-relative line
    fn vector(&self, line: usize) -> Result<u32, IrqError>;

    /// Installs `handler` on `vector`
    ///
    /// # Arguments
    ///
    /// * `vector` - The system interrupt vector
    /// * `name` - Owner name shown by the platform
    /// * `handler` - Function to call when the interrupt occurs
    fn request_irq(&self, vector: u32, name: &str, handler: IrqHandler) -> Result<(), IrqError>;

    /// Removes the handler installed on `vector`
    ///
    /// Returns only once no invocation of the handler is still running.
    fn free_irq(&self, vector: u32);
}
