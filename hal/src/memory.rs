//! Device-addressable memory abstraction

use core_types::{AllocFlags, CoreError};
use std::fmt;
use thiserror::Error;

/// Address of an allocation in accelerator-addressable memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u64);

impl DeviceHandle {
    /// Returns the raw device address
    pub fn addr(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Errors that can occur during device memory operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MemoryError {
    /// Device heap has no room for the request
    #[error("Out of device memory: requested {0} bytes")]
    OutOfMemory(usize),

    /// Zero-length or otherwise unusable request
    #[error("Invalid allocation size: {0}")]
    InvalidSize(usize),

    /// Allocator failure reported by the platform
    #[error("Device memory error {0}")]
    Platform(i32),
}

impl From<MemoryError> for CoreError {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::OutOfMemory(len) => {
                CoreError::ResourceExhausted(format!("device heap cannot hold {} bytes", len))
            }
            MemoryError::InvalidSize(len) => {
                CoreError::InvalidArgument(format!("transfer of {} bytes", len))
            }
            MemoryError::Platform(code) => CoreError::DeviceError {
                code,
                context: "device memory allocation failed".to_string(),
            },
        }
    }
}

/// Device heap operations
///
/// Unlike host allocation this is explicit about placement: callers pass
/// [`AllocFlags`] to select PE-local or shared memory.
pub trait DeviceMemory: Send + Sync {
    /// Allocates `len` bytes of accelerator-addressable memory
    fn allocate(&self, len: usize, flags: AllocFlags) -> Result<DeviceHandle, MemoryError>;

    /// Frees an allocation made by [`DeviceMemory::allocate`]
    fn free(&self, handle: DeviceHandle, len: usize, flags: AllocFlags);
}
