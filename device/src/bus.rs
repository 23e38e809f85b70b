//! Bus-level device registry

use crate::config::DeviceConfig;
use crate::device::Device;
use crate::registration::DeviceRegistration;
use core_types::{CoreError, DeviceId};
use hal::{DeviceMemory, InterruptController};
use std::collections::HashMap;
use std::sync::Arc;

/// Devices known to one bus, keyed by id
///
/// Adding a device brings it up; removing it tears it down. The registry is
/// an owned value so several buses can coexist in one process.
#[derive(Default)]
pub struct DeviceBus {
    devices: HashMap<DeviceId, Arc<Device>>,
}

impl DeviceBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates, initialises and registers a device
    ///
    /// A device whose interrupt registration fails is not registered.
    pub fn add(
        &mut self,
        registration: DeviceRegistration,
        config: DeviceConfig,
        controller: Arc<dyn InterruptController>,
        memory: Arc<dyn DeviceMemory>,
    ) -> Result<Arc<Device>, CoreError> {
        let device = Device::new(registration, config, controller, memory)?;
        if let Err(err) = device.init() {
            log::error!("{}: bring-up failed: {}", device.registration(), err);
            device.remove();
            return Err(err);
        }
        log::info!("bus: added {} as {}", device.registration(), device.id());
        self.devices.insert(device.id(), Arc::clone(&device));
        Ok(device)
    }

    pub fn get(&self, id: DeviceId) -> Option<Arc<Device>> {
        self.devices.get(&id).cloned()
    }

    /// Finds a device by its registered name
    pub fn find(&self, name: &str) -> Option<Arc<Device>> {
        self.devices.values().find(|d| d.name() == name).cloned()
    }

    /// Hot-removes a device and forgets it
    pub fn remove(&mut self, id: DeviceId) -> Result<(), CoreError> {
        let device = self.devices.remove(&id).ok_or_else(|| {
            CoreError::InvalidArgument(format!("{} is not on this bus", id))
        })?;
        device.remove();
        log::info!("bus: removed {}", device.registration());
        Ok(())
    }

    /// Removes every device
    pub fn shutdown(&mut self) {
        for (_, device) in self.devices.drain() {
            device.remove();
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn ids(&self) -> Vec<DeviceId> {
        self.devices.keys().copied().collect()
    }
}

impl Drop for DeviceBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}
