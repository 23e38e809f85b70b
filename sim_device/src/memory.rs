//! Simulated device heap

use crate::fault_injection::{FaultPlan, MemoryFault};
use core_types::AllocFlags;
use hal::{DeviceHandle, DeviceMemory, MemoryError};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Base address of simulated allocations
const HEAP_BASE: u64 = 0x8000_0000;

/// Allocation granule
const ALIGN: u64 = 64;

#[derive(Debug, Default)]
struct HeapState {
    live: BTreeMap<u64, usize>,
    allocated: usize,
    next_addr: u64,
    fail_next: usize,
    platform_error: Option<i32>,
}

/// Bump-addressed device heap with a byte budget
///
/// Addresses are never reused, which makes stale handles easy to spot.
#[derive(Debug)]
pub struct SimDeviceMemory {
    capacity: usize,
    state: Mutex<HeapState>,
}

impl SimDeviceMemory {
    /// Creates a heap that holds at most `capacity` bytes at once
    pub fn new(capacity: usize) -> Self {
        Self::with_faults(capacity, FaultPlan::new())
    }

    /// Creates a heap that applies the memory faults of `plan`
    pub fn with_faults(capacity: usize, plan: FaultPlan) -> Self {
        let mut state = HeapState {
            next_addr: HEAP_BASE,
            ..HeapState::default()
        };
        for fault in plan.memory_faults() {
            match fault {
                MemoryFault::FailNext { count } => state.fail_next += count,
                MemoryFault::PlatformError { code } => state.platform_error = Some(*code),
            }
        }
        Self {
            capacity,
            state: Mutex::new(state),
        }
    }

    /// Makes the next `count` allocations fail
    pub fn fail_next_allocations(&self, count: usize) {
        self.state.lock().fail_next += count;
    }

    /// Bytes currently allocated
    pub fn allocated_bytes(&self) -> usize {
        self.state.lock().allocated
    }

    /// Number of allocations not yet freed
    pub fn live_allocations(&self) -> usize {
        self.state.lock().live.len()
    }
}

impl DeviceMemory for SimDeviceMemory {
    fn allocate(&self, len: usize, _flags: AllocFlags) -> Result<DeviceHandle, MemoryError> {
        if len == 0 {
            return Err(MemoryError::InvalidSize(len));
        }
        let mut state = self.state.lock();
        if let Some(code) = state.platform_error.take() {
            return Err(MemoryError::Platform(code));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(MemoryError::OutOfMemory(len));
        }
        if state.allocated + len > self.capacity {
            return Err(MemoryError::OutOfMemory(len));
        }

        let addr = state.next_addr;
        state.next_addr += (len as u64).div_ceil(ALIGN) * ALIGN;
        state.allocated += len;
        state.live.insert(addr, len);
        Ok(DeviceHandle(addr))
    }

    fn free(&self, handle: DeviceHandle, _len: usize, _flags: AllocFlags) {
        let mut state = self.state.lock();
        if let Some(len) = state.live.remove(&handle.addr()) {
            state.allocated -= len;
        }
    }
}
