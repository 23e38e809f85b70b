//! Staged memory transfers

use core_types::{AllocFlags, CopyDirection, CoreError};
use hal::{DeviceHandle, DeviceMemory};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Host buffer shared between the caller and the job table
///
/// The caller keeps its own clone; lower layers copy into and out of it
/// around the job's execution.
pub type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// Creates a shared buffer holding `bytes`
pub fn shared_buffer(bytes: Vec<u8>) -> SharedBuffer {
    Arc::new(Mutex::new(bytes))
}

/// A host buffer staged on accelerator-addressable memory
///
/// A `Transfer` only exists once its device allocation succeeded, so its
/// device handle is always valid. Dropping it frees the allocation.
pub struct Transfer {
    len: usize,
    data: SharedBuffer,
    alloc_flags: AllocFlags,
    dir_flags: CopyDirection,
    handle: DeviceHandle,
    preloaded: bool,
    memory: Arc<dyn DeviceMemory>,
}

impl Transfer {
    /// Allocates device memory for `len` bytes of `data`
    pub fn stage(
        memory: &Arc<dyn DeviceMemory>,
        len: usize,
        data: SharedBuffer,
        alloc_flags: AllocFlags,
        dir_flags: CopyDirection,
    ) -> Result<Self, CoreError> {
        if len == 0 {
            return Err(CoreError::InvalidArgument(
                "transfer length must be non-zero".to_string(),
            ));
        }
        let available = data.lock().len();
        if available < len {
            return Err(CoreError::InvalidArgument(format!(
                "host buffer holds {} bytes, transfer needs {}",
                available, len
            )));
        }

        let handle = memory.allocate(len, alloc_flags)?;
        log::debug!("staged {} byte transfer at {}", len, handle);
        Ok(Self {
            len,
            data,
            alloc_flags,
            dir_flags,
            handle,
            preloaded: false,
            memory: Arc::clone(memory),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn data(&self) -> &SharedBuffer {
        &self.data
    }

    pub fn alloc_flags(&self) -> AllocFlags {
        self.alloc_flags
    }

    pub fn dir_flags(&self) -> CopyDirection {
        self.dir_flags
    }

    pub fn device_handle(&self) -> DeviceHandle {
        self.handle
    }

    /// Returns whether the destination was populated by the caller
    pub fn is_preloaded(&self) -> bool {
        self.preloaded
    }

    pub(crate) fn set_preloaded(&mut self) {
        self.preloaded = true;
    }

    /// Returns whether a host-to-device copy is due before execution
    pub fn needs_copy_in(&self) -> bool {
        self.dir_flags.copies_in() && !self.preloaded
    }

    /// Returns a cloneable view for the layers performing the copies
    pub fn descriptor(&self) -> TransferDescriptor {
        TransferDescriptor {
            len: self.len,
            data: Arc::clone(&self.data),
            alloc_flags: self.alloc_flags,
            dir_flags: self.dir_flags,
            device_handle: self.handle,
            preloaded: self.preloaded,
        }
    }
}

impl Drop for Transfer {
    fn drop(&mut self) {
        log::debug!("releasing {} byte transfer at {}", self.len, self.handle);
        self.memory.free(self.handle, self.len, self.alloc_flags);
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("len", &self.len)
            .field("alloc_flags", &self.alloc_flags)
            .field("dir_flags", &self.dir_flags)
            .field("handle", &self.handle)
            .field("preloaded", &self.preloaded)
            .finish()
    }
}

/// Snapshot of a staged transfer
#[derive(Debug, Clone)]
pub struct TransferDescriptor {
    pub len: usize,
    pub data: SharedBuffer,
    pub alloc_flags: AllocFlags,
    pub dir_flags: CopyDirection,
    pub device_handle: DeviceHandle,
    pub preloaded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_device::SimDeviceMemory;

    fn heap(capacity: usize) -> (Arc<SimDeviceMemory>, Arc<dyn DeviceMemory>) {
        let sim = Arc::new(SimDeviceMemory::new(capacity));
        let memory: Arc<dyn DeviceMemory> = sim.clone();
        (sim, memory)
    }

    #[test]
    fn test_stage_and_drop_frees() {
        let (sim, memory) = heap(4096);
        let transfer = Transfer::stage(
            &memory,
            256,
            shared_buffer(vec![7; 256]),
            AllocFlags::empty(),
            CopyDirection::TO_DEVICE,
        )
        .unwrap();
        assert_eq!(sim.allocated_bytes(), 256);
        assert!(transfer.needs_copy_in());
        drop(transfer);
        assert_eq!(sim.allocated_bytes(), 0);
    }

    #[test]
    fn test_short_buffer_rejected_without_allocating() {
        let (sim, memory) = heap(4096);
        let result = Transfer::stage(
            &memory,
            64,
            shared_buffer(vec![0; 16]),
            AllocFlags::empty(),
            CopyDirection::BOTH,
        );
        assert!(matches!(result, Err(CoreError::InvalidArgument(_))));
        assert_eq!(sim.live_allocations(), 0);
    }

    #[test]
    fn test_heap_exhaustion_surfaces() {
        let (_sim, memory) = heap(128);
        let result = Transfer::stage(
            &memory,
            512,
            shared_buffer(vec![0; 512]),
            AllocFlags::empty(),
            CopyDirection::FROM_DEVICE,
        );
        assert!(matches!(result, Err(CoreError::ResourceExhausted(_))));
    }

    #[test]
    fn test_preloaded_skips_copy_in() {
        let (_sim, memory) = heap(1024);
        let mut transfer = Transfer::stage(
            &memory,
            32,
            shared_buffer(vec![1; 32]),
            AllocFlags::empty(),
            CopyDirection::BOTH,
        )
        .unwrap();
        transfer.set_preloaded();
        assert!(!transfer.needs_copy_in());
        assert!(transfer.descriptor().preloaded);
    }
}
