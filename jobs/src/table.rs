//! Fixed-capacity job table

use crate::argument::{Argument, ArgumentStore};
use crate::transfer::{SharedBuffer, Transfer};
use core_types::{AllocFlags, CopyDirection, CoreError, JobId, JobState, KernelId, SlotId};
use hal::DeviceMemory;
use std::sync::Arc;

#[derive(Debug)]
struct JobRecord {
    state: JobState,
    kernel_id: KernelId,
    slot: Option<SlotId>,
    args: ArgumentStore,
}

impl JobRecord {
    fn new(max_args: usize) -> Self {
        Self {
            state: JobState::Ready,
            kernel_id: KernelId::default(),
            slot: None,
            args: ArgumentStore::new(max_args),
        }
    }

    fn reset(&mut self) {
        self.state = JobState::Ready;
        self.kernel_id = KernelId::default();
        self.slot = None;
        self.args.clear();
    }
}

/// Pool of job records with a lifecycle state machine
///
/// Records are allocated once and recycled through [`JobTable::acquire`] and
/// [`JobTable::release`]. The table is not synchronised itself; the owning
/// device serialises every call under its lock.
pub struct JobTable {
    records: Vec<JobRecord>,
    memory: Arc<dyn DeviceMemory>,
}

impl JobTable {
    /// Creates a table of `capacity` READY records with `max_args` slots each
    pub fn new(capacity: usize, max_args: usize, memory: Arc<dyn DeviceMemory>) -> Self {
        Self {
            records: (0..capacity).map(|_| JobRecord::new(max_args)).collect(),
            memory,
        }
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    /// Number of records not in READY state
    pub fn live_count(&self) -> usize {
        self.records.iter().filter(|r| r.state.is_live()).count()
    }

    fn record(&self, id: JobId) -> Result<&JobRecord, CoreError> {
        self.records
            .get(id.index())
            .ok_or_else(|| CoreError::InvalidArgument(format!("{} out of range", id)))
    }

    fn record_mut(&mut self, id: JobId) -> Result<&mut JobRecord, CoreError> {
        self.records
            .get_mut(id.index())
            .ok_or_else(|| CoreError::InvalidArgument(format!("{} out of range", id)))
    }

    fn live(&self, id: JobId) -> Result<&JobRecord, CoreError> {
        let record = self.record(id)?;
        if !record.state.is_live() {
            return Err(CoreError::InvalidState(format!("{} is not acquired", id)));
        }
        Ok(record)
    }

    fn requested_mut(&mut self, id: JobId, operation: &str) -> Result<&mut JobRecord, CoreError> {
        let record = self.record_mut(id)?;
        if !record.state.accepts_arguments() {
            return Err(CoreError::InvalidState(format!(
                "{} of {} in state {}",
                operation, id, record.state
            )));
        }
        Ok(record)
    }

    /// Claims the lowest READY record and marks it REQUESTED
    pub fn acquire(&mut self) -> Result<JobId, CoreError> {
        let (index, record) = self
            .records
            .iter_mut()
            .enumerate()
            .find(|(_, r)| r.state == JobState::Ready)
            .ok_or_else(|| {
                CoreError::ResourceExhausted("no free job record".to_string())
            })?;
        record.state = JobState::Requested;
        Ok(JobId::new(index as u32))
    }

    /// Resets the record to READY, releasing arguments, transfers and return
    ///
    /// Returns the state the job was in. Releasing a READY record is a no-op.
    pub fn release(&mut self, id: JobId) -> Result<JobState, CoreError> {
        let record = self.record_mut(id)?;
        let prior = record.state;
        if prior.is_live() {
            record.reset();
        }
        Ok(prior)
    }

    /// Releases every live record
    pub fn release_all(&mut self) -> usize {
        let mut released = 0;
        for record in self.records.iter_mut().filter(|r| r.state.is_live()) {
            record.reset();
            released += 1;
        }
        released
    }

    pub fn state(&self, id: JobId) -> Result<JobState, CoreError> {
        Ok(self.record(id)?.state)
    }

    /// Moves the job to `next` and returns its prior state
    ///
    /// Only the forward edges of the lifecycle are accepted. Scheduling also
    /// requires an assigned slot that no other job occupies.
    pub fn set_state(&mut self, id: JobId, next: JobState) -> Result<JobState, CoreError> {
        let prior = self.record(id)?.state;
        if !prior.can_transition_to(next) {
            return Err(CoreError::InvalidState(format!(
                "{} cannot move from {} to {}",
                id, prior, next
            )));
        }
        if next == JobState::Scheduled {
            let slot = self.record(id)?.slot.ok_or_else(|| {
                CoreError::InvalidState(format!("{} scheduled without a slot", id))
            })?;
            if let Some(owner) = self.job_on_slot(slot) {
                return Err(CoreError::ResourceBusy(format!(
                    "{} is occupied by {}",
                    slot, owner
                )));
            }
        }
        self.record_mut(id)?.state = next;
        Ok(prior)
    }

    pub fn kernel_id(&self, id: JobId) -> Result<KernelId, CoreError> {
        Ok(self.live(id)?.kernel_id)
    }

    pub fn set_kernel_id(&mut self, id: JobId, kernel_id: KernelId) -> Result<(), CoreError> {
        self.requested_mut(id, "set_kernel_id")?.kernel_id = kernel_id;
        Ok(())
    }

    /// Returns the assigned slot; valid from SCHEDULED onward
    pub fn slot(&self, id: JobId) -> Result<SlotId, CoreError> {
        let record = self.live(id)?;
        match (record.state, record.slot) {
            (JobState::Requested, _) | (_, None) => Err(CoreError::InvalidState(format!(
                "{} has no slot in state {}",
                id, record.state
            ))),
            (_, Some(slot)) => Ok(slot),
        }
    }

    pub fn set_slot(&mut self, id: JobId, slot: SlotId) -> Result<(), CoreError> {
        self.requested_mut(id, "set_slot")?.slot = Some(slot);
        Ok(())
    }

    /// Returns the job currently occupying `slot`
    pub fn job_on_slot(&self, slot: SlotId) -> Option<JobId> {
        self.records
            .iter()
            .position(|r| r.state.occupies_slot() && r.slot == Some(slot))
            .map(|index| JobId::new(index as u32))
    }

    pub fn arg_count(&self, id: JobId) -> Result<usize, CoreError> {
        Ok(self.live(id)?.args.count())
    }

    pub fn set_arg(&mut self, id: JobId, idx: usize, value: &[u8]) -> Result<(), CoreError> {
        self.requested_mut(id, "set_arg")?.args.set_arg(idx, value)
    }

    pub fn get_arg(&self, id: JobId, idx: usize, out: &mut [u8]) -> Result<(), CoreError> {
        self.live(id)?.args.get_arg(idx, out)
    }

    pub fn is_arg_64bit(&self, id: JobId, idx: usize) -> Result<bool, CoreError> {
        self.live(id)?.args.is_arg_64bit(idx)
    }

    pub fn arg(&self, id: JobId, idx: usize) -> Result<&Argument, CoreError> {
        self.live(id)?.args.arg(idx)
    }

    /// Stages `len` bytes of `data` and replaces argument `idx` with it
    ///
    /// The index is validated before anything is allocated; a failed staging
    /// leaves every argument of the job as it was.
    pub fn set_arg_transfer(
        &mut self,
        id: JobId,
        idx: usize,
        len: usize,
        data: SharedBuffer,
        alloc_flags: AllocFlags,
        dir_flags: CopyDirection,
    ) -> Result<(), CoreError> {
        let memory = Arc::clone(&self.memory);
        let record = self.requested_mut(id, "set_arg_transfer")?;
        record.args.arg(idx)?;
        let transfer = Transfer::stage(&memory, len, data, alloc_flags, dir_flags)?;
        record.args.set_arg_transfer(idx, transfer)
    }

    pub fn arg_transfer(&self, id: JobId, idx: usize) -> Result<&Transfer, CoreError> {
        self.live(id)?.args.arg_transfer(idx)
    }

    pub fn mark_preloaded(&mut self, id: JobId, idx: usize) -> Result<(), CoreError> {
        self.requested_mut(id, "mark_preloaded")?.args.mark_preloaded(idx)
    }

    /// Stores the return value; accepted while RUNNING or FINISHED
    pub fn set_return(&mut self, id: JobId, value: &[u8]) -> Result<(), CoreError> {
        let record = self.record_mut(id)?;
        if !matches!(record.state, JobState::Running | JobState::Finished) {
            return Err(CoreError::InvalidState(format!(
                "set_return of {} in state {}",
                id, record.state
            )));
        }
        record.args.set_return(value);
        Ok(())
    }

    /// Copies the return value; valid only once the job is FINISHED
    pub fn get_return(&self, id: JobId, out: &mut [u8]) -> Result<(), CoreError> {
        let record = self.record(id)?;
        if record.state != JobState::Finished {
            return Err(CoreError::InvalidState(format!(
                "return value of {} read in state {}",
                id, record.state
            )));
        }
        record.args.get_return(out)
    }

    /// Returns the whole return value of a FINISHED job
    pub fn return_value(&self, id: JobId) -> Result<Vec<u8>, CoreError> {
        let record = self.record(id)?;
        if record.state != JobState::Finished {
            return Err(CoreError::InvalidState(format!(
                "return value of {} read in state {}",
                id, record.state
            )));
        }
        Ok(record.args.return_value().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::shared_buffer;
    use core_types::{JOBS_Q_SZ, MAX_ARGS};
    use sim_device::SimDeviceMemory;
    use std::collections::HashSet;

    fn table(capacity: usize) -> (JobTable, Arc<SimDeviceMemory>) {
        let sim = Arc::new(SimDeviceMemory::new(1 << 20));
        let memory: Arc<dyn DeviceMemory> = sim.clone();
        (JobTable::new(capacity, MAX_ARGS, memory), sim)
    }

    fn run_to(table: &mut JobTable, id: JobId, state: JobState) {
        table.set_slot(id, SlotId(id.0)).unwrap();
        for next in [JobState::Scheduled, JobState::Running, JobState::Finished] {
            table.set_state(id, next).unwrap();
            if next == state {
                return;
            }
        }
    }

    #[test]
    fn test_capacity_exhaustion() {
        let (mut table, _) = table(JOBS_Q_SZ);
        let ids: HashSet<JobId> = (0..JOBS_Q_SZ).map(|_| table.acquire().unwrap()).collect();
        assert_eq!(ids.len(), JOBS_Q_SZ);
        assert!(matches!(
            table.acquire(),
            Err(CoreError::ResourceExhausted(_))
        ));
        assert_eq!(table.live_count(), JOBS_Q_SZ);
    }

    #[test]
    fn test_release_makes_id_reusable_and_clean() {
        let (mut table, sim) = table(4);
        let id = table.acquire().unwrap();
        table.set_kernel_id(id, KernelId(14)).unwrap();
        table.set_arg(id, 0, &99u32.to_ne_bytes()).unwrap();
        table
            .set_arg_transfer(
                id,
                1,
                128,
                shared_buffer(vec![3; 128]),
                AllocFlags::empty(),
                CopyDirection::BOTH,
            )
            .unwrap();
        run_to(&mut table, id, JobState::Running);
        table.set_return(id, &42u64.to_ne_bytes()).unwrap();
        table.set_state(id, JobState::Finished).unwrap();

        assert_eq!(table.release(id), Ok(JobState::Finished));
        assert_eq!(sim.allocated_bytes(), 0);

        let again = table.acquire().unwrap();
        assert_eq!(again, id);
        assert_eq!(table.kernel_id(again), Ok(KernelId(0)));
        assert_eq!(table.arg_count(again), Ok(0));
        let mut out = [0xffu8; 8];
        table.get_arg(again, 0, &mut out).unwrap();
        assert_eq!(out, [0; 8]);
        assert!(table.arg_transfer(again, 1).is_err());
    }

    #[test]
    fn test_release_ready_is_noop() {
        let (mut table, _) = table(2);
        assert_eq!(table.release(JobId(1)), Ok(JobState::Ready));
        assert_eq!(table.live_count(), 0);
    }

    #[test]
    fn test_out_of_range_id() {
        let (mut table, _) = table(2);
        assert!(matches!(
            table.release(JobId(2)),
            Err(CoreError::InvalidArgument(_))
        ));
        assert!(table.state(JobId(7)).is_err());
    }

    #[test]
    fn test_arguments_frozen_after_scheduling() {
        let (mut table, _) = table(2);
        let id = table.acquire().unwrap();
        run_to(&mut table, id, JobState::Scheduled);
        assert!(matches!(
            table.set_arg(id, 0, &1u32.to_ne_bytes()),
            Err(CoreError::InvalidState(_))
        ));
        assert!(matches!(
            table.set_kernel_id(id, KernelId(2)),
            Err(CoreError::InvalidState(_))
        ));
    }

    #[test]
    fn test_arg_index_beyond_max() {
        let (mut table, _) = table(1);
        let id = table.acquire().unwrap();
        assert!(matches!(
            table.set_arg(id, 40, &1u32.to_ne_bytes()),
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let (mut table, _) = table(2);
        let id = table.acquire().unwrap();
        assert!(table.set_state(id, JobState::Running).is_err());
        assert!(table.set_state(id, JobState::Ready).is_err());
        // scheduling needs a slot
        assert!(table.set_state(id, JobState::Scheduled).is_err());
        assert_eq!(table.state(id), Ok(JobState::Requested));
        assert!(table.set_state(JobId(1), JobState::Scheduled).is_err());
    }

    #[test]
    fn test_set_state_returns_prior() {
        let (mut table, _) = table(1);
        let id = table.acquire().unwrap();
        table.set_slot(id, SlotId(0)).unwrap();
        assert_eq!(table.set_state(id, JobState::Scheduled), Ok(JobState::Requested));
        assert_eq!(table.set_state(id, JobState::Running), Ok(JobState::Scheduled));
        assert_eq!(table.set_state(id, JobState::Finished), Ok(JobState::Running));
    }

    #[test]
    fn test_slot_exclusive_between_live_jobs() {
        let (mut table, _) = table(2);
        let a = table.acquire().unwrap();
        let b = table.acquire().unwrap();
        table.set_slot(a, SlotId(3)).unwrap();
        table.set_slot(b, SlotId(3)).unwrap();
        table.set_state(a, JobState::Scheduled).unwrap();
        assert!(matches!(
            table.set_state(b, JobState::Scheduled),
            Err(CoreError::ResourceBusy(_))
        ));
        assert_eq!(table.job_on_slot(SlotId(3)), Some(a));

        table.set_state(a, JobState::Running).unwrap();
        table.set_state(a, JobState::Finished).unwrap();
        assert_eq!(table.job_on_slot(SlotId(3)), None);
        table.set_state(b, JobState::Scheduled).unwrap();
    }

    #[test]
    fn test_slot_only_visible_once_scheduled() {
        let (mut table, _) = table(1);
        let id = table.acquire().unwrap();
        table.set_slot(id, SlotId(5)).unwrap();
        assert!(matches!(table.slot(id), Err(CoreError::InvalidState(_))));
        table.set_state(id, JobState::Scheduled).unwrap();
        assert_eq!(table.slot(id), Ok(SlotId(5)));
    }

    #[test]
    fn test_return_requires_finished() {
        let (mut table, _) = table(1);
        let id = table.acquire().unwrap();
        assert!(table.set_return(id, &[1]).is_err());
        run_to(&mut table, id, JobState::Running);
        table.set_return(id, &[9, 8, 7, 6]).unwrap();
        let mut out = [0u8; 4];
        assert!(matches!(
            table.get_return(id, &mut out),
            Err(CoreError::InvalidState(_))
        ));
        table.set_state(id, JobState::Finished).unwrap();
        table.get_return(id, &mut out).unwrap();
        assert_eq!(out, [9, 8, 7, 6]);
        assert_eq!(table.return_value(id), Ok(vec![9, 8, 7, 6]));
    }

    #[test]
    fn test_failed_staging_leaves_other_arguments() {
        let sim = Arc::new(SimDeviceMemory::new(256));
        let memory: Arc<dyn DeviceMemory> = sim.clone();
        let mut table = JobTable::new(1, MAX_ARGS, memory);
        let id = table.acquire().unwrap();
        table.set_arg(id, 0, &11u32.to_ne_bytes()).unwrap();
        table.set_arg(id, 1, &12u64.to_ne_bytes()).unwrap();

        let result = table.set_arg_transfer(
            id,
            1,
            4096,
            shared_buffer(vec![0; 4096]),
            AllocFlags::empty(),
            CopyDirection::TO_DEVICE,
        );
        assert!(matches!(result, Err(CoreError::ResourceExhausted(_))));

        let mut out = [0u8; 8];
        table.get_arg(id, 1, &mut out).unwrap();
        assert_eq!(u64::from_ne_bytes(out), 12);
        assert_eq!(table.arg_count(id), Ok(2));
        assert_eq!(sim.live_allocations(), 0);
    }

    #[test]
    fn test_transfer_index_checked_before_allocating() {
        let (mut table, sim) = table(1);
        let id = table.acquire().unwrap();
        let result = table.set_arg_transfer(
            id,
            MAX_ARGS,
            16,
            shared_buffer(vec![0; 16]),
            AllocFlags::empty(),
            CopyDirection::TO_DEVICE,
        );
        assert!(matches!(result, Err(CoreError::InvalidArgument(_))));
        assert_eq!(sim.live_allocations(), 0);
    }

    #[test]
    fn test_mark_preloaded() {
        let (mut table, _) = table(1);
        let id = table.acquire().unwrap();
        table
            .set_arg_transfer(
                id,
                0,
                16,
                shared_buffer(vec![0; 16]),
                AllocFlags::PE_LOCAL,
                CopyDirection::BOTH,
            )
            .unwrap();
        table.mark_preloaded(id, 0).unwrap();
        let transfer = table.arg_transfer(id, 0).unwrap();
        assert!(transfer.is_preloaded());
        assert_eq!(transfer.alloc_flags(), AllocFlags::PE_LOCAL);
        assert!(table.is_arg_64bit(id, 0).unwrap());
    }
}
