//! Transfer placement and direction flags

use bitflags::bitflags;

bitflags! {
    /// Placement hints for device-side allocations
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AllocFlags: u32 {
        /// Allocate in memory local to the PE instead of the shared heap
        const PE_LOCAL = 1 << 0;
    }
}

bitflags! {
    /// Direction of the copies surrounding a job execution
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CopyDirection: u32 {
        /// Copy host buffer to the device before execution
        const TO_DEVICE = 1 << 0;
        /// Copy device buffer back to the host after execution
        const FROM_DEVICE = 1 << 1;
        const BOTH = Self::TO_DEVICE.bits() | Self::FROM_DEVICE.bits();
    }
}

impl CopyDirection {
    /// Returns whether the host buffer must be copied in before execution
    pub fn copies_in(self) -> bool {
        self.contains(CopyDirection::TO_DEVICE)
    }

    /// Returns whether the device buffer must be copied out afterwards
    pub fn copies_out(self) -> bool {
        self.contains(CopyDirection::FROM_DEVICE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_directions() {
        let dir = CopyDirection::BOTH;
        assert!(dir.copies_in());
        assert!(dir.copies_out());
        assert!(!CopyDirection::TO_DEVICE.copies_out());
        assert!(!CopyDirection::FROM_DEVICE.copies_in());
    }

    #[test]
    fn test_default_alloc_flags_empty() {
        assert!(AllocFlags::default().is_empty());
    }
}
