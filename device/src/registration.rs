//! Identity of a device as seen by the bus layer

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bus-level description of an accelerator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub name: String,
    pub vendor_id: u32,
    pub product_id: u32,
    /// Physical base offset of the bitstream's address map
    pub base_offset: u64,
}

impl DeviceRegistration {
    pub fn new(name: impl Into<String>, vendor_id: u32, product_id: u32) -> Self {
        Self {
            name: name.into(),
            vendor_id,
            product_id,
            base_offset: 0,
        }
    }

    pub fn with_base_offset(mut self, base_offset: u64) -> Self {
        self.base_offset = base_offset;
        self
    }
}

impl fmt::Display for DeviceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:04x}:{:04x}] @ {:#x}",
            self.name, self.vendor_id, self.product_id, self.base_offset
        )
    }
}
