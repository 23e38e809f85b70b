//! Per-device control context

use crate::config::DeviceConfig;
use crate::registration::DeviceRegistration;
use crate::stats::{DeviceStats, StatsSnapshot};
use access::{AccessArbiter, AccessCounts, AccessType};
use completion::CompletionBridge;
use core_types::{
    AllocFlags, CopyDirection, CoreError, DeviceId, JobId, JobState, KernelId, SlotId,
};
use hal::{DeviceMemory, InterruptController, IrqHandler};
use irq::{InterruptLine, InterruptRouter, SlotInterruptSink};
use jobs::{JobTable, SharedBuffer, TransferDescriptor};
use parking_lot::{Mutex, MutexGuard};
use std::sync::{Arc, Weak};
use std::time::Duration;

struct DeviceState {
    jobs: JobTable,
    removed: bool,
}

/// One accelerator: its job table, interrupt lines and access counters
///
/// Every job-table mutation happens under a single device lock. The
/// completion bridge is only touched while that lock is held or after it
/// was dropped, never the other way round.
pub struct Device {
    id: DeviceId,
    registration: DeviceRegistration,
    config: DeviceConfig,
    arbiter: AccessArbiter,
    state: Mutex<DeviceState>,
    router: InterruptRouter,
    completion: CompletionBridge,
    stats: DeviceStats,
}

/// An open reference to a device; closes itself when dropped
pub struct AccessGuard {
    device: Arc<Device>,
    access: AccessType,
}

impl AccessGuard {
    pub fn access(&self) -> AccessType {
        self.access
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Drop for AccessGuard {
    fn drop(&mut self) {
        if let Err(err) = self.device.close(self.access) {
            log::error!("{}: closing {} access failed: {}", self.device.name(), self.access, err);
        }
    }
}

impl Device {
    /// Builds an uninitialised device; call [`Device::init`] to register interrupts
    pub fn new(
        registration: DeviceRegistration,
        config: DeviceConfig,
        controller: Arc<dyn InterruptController>,
        memory: Arc<dyn DeviceMemory>,
    ) -> Result<Arc<Self>, CoreError> {
        config.validate()?;
        let router = InterruptRouter::new(
            registration.name.clone(),
            controller,
            config.platform_interrupts,
            config.slot_interrupts,
            config.deferred_workers,
        );
        Ok(Arc::new(Self {
            id: DeviceId::new(),
            state: Mutex::new(DeviceState {
                jobs: JobTable::new(config.job_capacity, config.max_args, memory),
                removed: false,
            }),
            completion: CompletionBridge::new(config.job_capacity),
            arbiter: AccessArbiter::new(),
            stats: DeviceStats::default(),
            router,
            registration,
            config,
        }))
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.registration.name
    }

    pub fn registration(&self) -> &DeviceRegistration {
        &self.registration
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_removed(&self) -> bool {
        self.state.lock().removed
    }

    fn live_state(&self) -> Result<MutexGuard<'_, DeviceState>, CoreError> {
        let state = self.state.lock();
        if state.removed {
            return Err(CoreError::DeviceRemoved);
        }
        Ok(state)
    }

    /// Registers the slot interrupt lines
    pub fn init(self: &Arc<Self>) -> Result<(), CoreError> {
        if self.is_removed() {
            return Err(CoreError::DeviceRemoved);
        }
        let sink: Weak<dyn SlotInterruptSink> = Arc::downgrade(self) as Weak<dyn SlotInterruptSink>;
        self.router.init(sink)?;
        log::info!(
            "{}: initialised with {} slots and {} job records",
            self.registration,
            self.config.slot_interrupts,
            self.config.job_capacity
        );
        Ok(())
    }

    /// Tears the device down once nobody holds it open
    ///
    /// The idle check and the refusal of new opens happen in one step, so a
    /// concurrent [`Device::open`] either wins and makes this fail with
    /// `ResourceBusy`, or loses with `DeviceRemoved`.
    pub fn exit(&self) -> Result<(), CoreError> {
        self.arbiter.seal().map_err(|err| {
            log::warn!("{}: exit refused: {}", self.name(), err);
            err
        })?;
        self.teardown();
        Ok(())
    }

    /// Forced removal: waiters fail with `DeviceRemoved`, lines are released
    /// after queued deferred work has run, and staged transfers are reclaimed
    pub fn remove(&self) {
        let counts = self.arbiter.force_seal();
        if counts.total() > 0 {
            log::warn!("{}: removed while open: {:?}", self.name(), counts);
        }
        self.teardown();
    }

    fn teardown(&self) {
        self.arbiter.force_seal();
        {
            let mut state = self.state.lock();
            if state.removed {
                return;
            }
            state.removed = true;
        }

        self.completion.cancel_all();
        self.router.exit();

        let released = self.state.lock().jobs.release_all();
        if released > 0 {
            log::debug!("{}: released {} outstanding jobs", self.name(), released);
        }
        log::info!("{}: removed", self.name());
    }

    /// Opens the device under `access`
    ///
    /// Fails with `DeviceRemoved` once the device has exited or was removed.
    pub fn open(self: &Arc<Self>, access: AccessType) -> Result<AccessGuard, CoreError> {
        self.arbiter.acquire(access)?;
        Ok(AccessGuard {
            device: Arc::clone(self),
            access,
        })
    }

    fn close(&self, access: AccessType) -> Result<(), CoreError> {
        self.arbiter.release(access).map(|_| ())
    }

    pub fn access_counts(&self) -> AccessCounts {
        self.arbiter.counts()
    }

    pub fn acquire_job(&self) -> Result<JobId, CoreError> {
        let mut state = self.live_state()?;
        let id = state.jobs.acquire()?;
        self.completion.arm(id)?;
        log::trace!("{}: acquired {}", self.name(), id);
        Ok(id)
    }

    /// Releases `id` from any state; returns the state it was in
    pub fn release_job(&self, id: JobId) -> Result<JobState, CoreError> {
        let mut state = self.live_state()?;
        let prior = state.jobs.release(id)?;
        self.completion.disarm(id)?;
        Ok(prior)
    }

    pub fn state(&self, id: JobId) -> Result<JobState, CoreError> {
        self.live_state()?.jobs.state(id)
    }

    /// Moves `id` to `next`; reaching FINISHED wakes its waiters
    pub fn set_state(&self, id: JobId, next: JobState) -> Result<JobState, CoreError> {
        let mut state = self.live_state()?;
        let prior = state.jobs.set_state(id, next)?;
        if next == JobState::Finished {
            self.finish(id);
        }
        Ok(prior)
    }

    fn finish(&self, id: JobId) {
        self.completion.signal(id);
        self.stats.record_completion();
    }

    pub fn kernel_id(&self, id: JobId) -> Result<KernelId, CoreError> {
        self.live_state()?.jobs.kernel_id(id)
    }

    pub fn set_kernel_id(&self, id: JobId, kernel_id: KernelId) -> Result<(), CoreError> {
        self.live_state()?.jobs.set_kernel_id(id, kernel_id)
    }

    pub fn slot(&self, id: JobId) -> Result<SlotId, CoreError> {
        self.live_state()?.jobs.slot(id)
    }

    pub fn set_slot(&self, id: JobId, slot: SlotId) -> Result<(), CoreError> {
        if slot.index() >= self.config.slot_interrupts {
            return Err(CoreError::InvalidArgument(format!(
                "{} out of range ({} slots)",
                slot, self.config.slot_interrupts
            )));
        }
        self.live_state()?.jobs.set_slot(id, slot)
    }

    pub fn arg_count(&self, id: JobId) -> Result<usize, CoreError> {
        self.live_state()?.jobs.arg_count(id)
    }

    pub fn set_arg(&self, id: JobId, idx: usize, value: &[u8]) -> Result<(), CoreError> {
        self.live_state()?.jobs.set_arg(id, idx, value)
    }

    pub fn get_arg(&self, id: JobId, idx: usize, out: &mut [u8]) -> Result<(), CoreError> {
        self.live_state()?.jobs.get_arg(id, idx, out)
    }

    pub fn is_arg_64bit(&self, id: JobId, idx: usize) -> Result<bool, CoreError> {
        self.live_state()?.jobs.is_arg_64bit(id, idx)
    }

    pub fn set_arg_transfer(
        &self,
        id: JobId,
        idx: usize,
        len: usize,
        data: SharedBuffer,
        alloc_flags: AllocFlags,
        dir_flags: CopyDirection,
    ) -> Result<(), CoreError> {
        self.live_state()?
            .jobs
            .set_arg_transfer(id, idx, len, data, alloc_flags, dir_flags)
    }

    pub fn get_arg_transfer(&self, id: JobId, idx: usize) -> Result<TransferDescriptor, CoreError> {
        Ok(self.live_state()?.jobs.arg_transfer(id, idx)?.descriptor())
    }

    pub fn mark_preloaded(&self, id: JobId, idx: usize) -> Result<(), CoreError> {
        self.live_state()?.jobs.mark_preloaded(id, idx)
    }

    pub fn set_return(&self, id: JobId, value: &[u8]) -> Result<(), CoreError> {
        self.live_state()?.jobs.set_return(id, value)
    }

    pub fn get_return(&self, id: JobId, out: &mut [u8]) -> Result<(), CoreError> {
        self.live_state()?.jobs.get_return(id, out)
    }

    /// Blocks until `id` is FINISHED and returns its return value
    ///
    /// The wait is bound to the acquire cycle observed on entry: if the job
    /// is released (and possibly re-acquired) meanwhile, it fails with
    /// `InvalidState`. Jobs that were never dispatched fail with
    /// `InvalidState`; removal of the device while waiting fails with
    /// `DeviceRemoved`.
    pub fn wait_for_completion(
        &self,
        id: JobId,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, CoreError> {
        let generation = {
            let state = self.live_state()?;
            let current = state.jobs.state(id)?;
            if matches!(current, JobState::Ready | JobState::Requested) {
                return Err(CoreError::InvalidState(format!(
                    "{} is not dispatched ({})",
                    id, current
                )));
            }
            self.completion.generation(id).ok_or_else(|| {
                CoreError::InvalidArgument(format!("{} out of range", id))
            })?
        };

        self.completion.wait_generation(id, generation, timeout)?;

        let state = self.live_state()?;
        if self.completion.generation(id) != Some(generation) {
            return Err(CoreError::InvalidState(format!(
                "{} was released while waiting",
                id
            )));
        }
        state.jobs.return_value(id)
    }

    pub fn request_platform_irq(&self, no: usize, handler: IrqHandler) -> Result<(), CoreError> {
        drop(self.live_state()?);
        self.router.request_platform_irq(no, handler)
    }

    pub fn release_platform_irq(&self, no: usize) -> Result<(), CoreError> {
        self.router.release_platform_irq(no)
    }

    /// System vector of device line `line`, if mapped
    pub fn line_mapping(&self, line: usize) -> Option<u32> {
        self.router.mapping(line)
    }

    pub fn line_for_slot(&self, slot: SlotId) -> usize {
        self.router.line_for_slot(slot)
    }

    pub fn lines(&self) -> Vec<InterruptLine> {
        self.router.lines()
    }

    pub fn interrupts_active(&self) -> bool {
        self.router.is_active()
    }
}

impl SlotInterruptSink for Device {
    fn signal_slot_interrupt(&self, slot: SlotId) {
        let mut state = self.state.lock();
        if state.removed {
            log::debug!("{}: dropping interrupt of {} after removal", self.name(), slot);
            return;
        }
        self.stats.record_slot_interrupt();

        let Some(id) = state.jobs.job_on_slot(slot) else {
            self.stats.record_spurious();
            log::warn!("{}: spurious interrupt on {}", self.name(), slot);
            return;
        };

        if state.jobs.state(id) == Ok(JobState::Scheduled) {
            if let Err(err) = state.jobs.set_state(id, JobState::Running) {
                log::error!("{}: cannot start {}: {}", self.name(), id, err);
                return;
            }
        }
        match state.jobs.set_state(id, JobState::Finished) {
            Ok(_) => {
                log::trace!("{}: {} finished on {}", self.name(), id, slot);
                self.finish(id);
            }
            Err(err) => log::error!("{}: cannot finish {}: {}", self.name(), id, err),
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let removed = self.state.get_mut().removed;
        if !removed {
            self.teardown();
        }
    }
}
