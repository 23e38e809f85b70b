//! Resilience Test Utilities
//!
//! Shared bring-up helpers for the integration tests.
//!
//! ## Test Philosophy
//!
//! - **Safety under faults**: invariants hold when registration or staging fails
//! - **Deterministic failures**: all faults are reproducible via FaultPlan
//! - **No leaks**: lines and device memory are returned on every teardown path
//! - **No hangs**: every blocking wait ends in a value or a typed error

use core_types::{CoreError, JobId, JobState, SlotId, PLATFORM_INTERRUPTS};
use device::{Device, DeviceConfig, DeviceRegistration};
use sim_device::{FaultPlan, SimDeviceMemory, SimInterruptController};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// First system vector handed out by the simulated controller
pub const VECTOR_BASE: u32 = 32;

/// Device heap size for test devices
pub const HEAP_BYTES: usize = 1 << 20;

/// A device together with its simulated collaborators
pub struct TestRig {
    pub device: Arc<Device>,
    pub controller: Arc<SimInterruptController>,
    pub memory: Arc<SimDeviceMemory>,
}

impl TestRig {
    /// Raises the interrupt line of `slot`
    pub fn fire_slot(&self, slot: u32) {
        self.controller
            .fire(self.device.line_for_slot(SlotId(slot)));
    }

    /// Acquires a job and drives it to RUNNING on `slot`
    pub fn dispatch(&self, slot: u32) -> Result<JobId, CoreError> {
        let id = self.device.acquire_job()?;
        self.device.set_slot(id, SlotId(slot))?;
        self.device.set_state(id, JobState::Scheduled)?;
        self.device.set_state(id, JobState::Running)?;
        Ok(id)
    }
}

/// Builds an uninitialised device with `slots` slot lines and `plan` applied
pub fn build_rig(config: DeviceConfig, plan: FaultPlan) -> Result<TestRig, CoreError> {
    let controller = Arc::new(SimInterruptController::with_faults(
        VECTOR_BASE,
        PLATFORM_INTERRUPTS + config.slot_interrupts,
        plan.clone(),
    ));
    let memory = Arc::new(SimDeviceMemory::with_faults(HEAP_BYTES, plan));
    let device = Device::new(
        DeviceRegistration::new("resilience", 0x10ee, 0x7038),
        config,
        controller.clone(),
        memory.clone(),
    )?;
    Ok(TestRig {
        device,
        controller,
        memory,
    })
}

/// Builds and initialises a fault-free device with `slots` slots
pub fn test_bootstrap(slots: usize) -> TestRig {
    let rig = build_rig(DeviceConfig::default().with_slots(slots), FaultPlan::new())
        .expect("device construction");
    rig.device.init().expect("device init");
    rig
}

/// Polls `condition` until it holds or five seconds pass
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(5) {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}
