//! # Completion
//!
//! The synchronization point callers wait on for a specific job.
//!
//! ## Philosophy
//!
//! - **No lost wakeups**: a signal that arrives before the waiter is kept
//!   until the job is released
//! - **No hangs on removal**: cancelling the bridge unblocks every waiter
//!   with `DeviceRemoved`
//! - **Explicit arming**: only acquired jobs can be waited on
//!
//! ## Core Concepts
//!
//! - [`CompletionBridge::arm`]: job acquired, completion not yet signalled;
//!   starts a new generation of the id
//! - [`CompletionBridge::signal`]: job finished; wakes waiters
//! - [`CompletionBridge::disarm`]: job released; the entry is recycled
//! - [`CompletionBridge::cancel_all`]: device removed

use core_types::{CoreError, JobId};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Per-job completion status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Job not acquired
    Idle,
    /// Acquired; completion not yet signalled
    Pending,
    /// Completion signalled
    Signalled,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    status: Completion,
    generation: u64,
}

#[derive(Debug)]
struct BridgeState {
    entries: Vec<Entry>,
    cancelled: bool,
    waiting: usize,
}

/// Completion signals for every job id of a device
#[derive(Debug)]
pub struct CompletionBridge {
    state: Mutex<BridgeState>,
    cond: Condvar,
}

impl CompletionBridge {
    /// Creates a bridge for job ids `0..capacity`
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BridgeState {
                entries: vec![
                    Entry {
                        status: Completion::Idle,
                        generation: 0,
                    };
                    capacity
                ],
                cancelled: false,
                waiting: 0,
            }),
            cond: Condvar::new(),
        }
    }

    fn entry(entries: &mut [Entry], id: JobId) -> Result<&mut Entry, CoreError> {
        entries
            .get_mut(id.index())
            .ok_or_else(|| CoreError::InvalidArgument(format!("{} out of range", id)))
    }

    /// Marks `id` as awaiting completion and returns its new generation
    pub fn arm(&self, id: JobId) -> Result<u64, CoreError> {
        let mut state = self.state.lock();
        let entry = Self::entry(&mut state.entries, id)?;
        entry.status = Completion::Pending;
        entry.generation += 1;
        Ok(entry.generation)
    }

    /// Generation of the current acquire cycle of `id`
    pub fn generation(&self, id: JobId) -> Option<u64> {
        self.state.lock().entries.get(id.index()).map(|e| e.generation)
    }

    /// Returns `id` to idle; waiters still blocked on it fail with `InvalidState`
    pub fn disarm(&self, id: JobId) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        Self::entry(&mut state.entries, id)?.status = Completion::Idle;
        self.cond.notify_all();
        Ok(())
    }

    /// Signals completion of `id` and wakes its waiters
    ///
    /// Returns `false` when `id` was not armed.
    pub fn signal(&self, id: JobId) -> bool {
        let mut state = self.state.lock();
        match state.entries.get_mut(id.index()) {
            Some(entry) if entry.status == Completion::Pending => {
                entry.status = Completion::Signalled;
                self.cond.notify_all();
                true
            }
            _ => {
                log::warn!("completion signalled for unarmed {}", id);
                false
            }
        }
    }

    pub fn status(&self, id: JobId) -> Option<Completion> {
        self.state.lock().entries.get(id.index()).map(|e| e.status)
    }

    /// Unblocks every waiter with `DeviceRemoved`; later waits fail at once
    pub fn cancel_all(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        log::debug!("completion bridge cancelled with {} waiters", state.waiting);
        self.cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Number of callers currently blocked in [`CompletionBridge::wait`]
    pub fn waiting(&self) -> usize {
        self.state.lock().waiting
    }

    /// Blocks until the current acquire cycle of `id` is signalled
    ///
    /// Fails with `DeviceRemoved` once the bridge is cancelled, `InvalidState`
    /// if the job is not armed or gets released, and `Timeout` when
    /// `timeout` elapses first.
    pub fn wait(&self, id: JobId, timeout: Option<Duration>) -> Result<(), CoreError> {
        let generation = self.generation(id).ok_or_else(|| {
            CoreError::InvalidArgument(format!("{} out of range", id))
        })?;
        self.wait_generation(id, generation, timeout)
    }

    /// Blocks until acquire cycle `generation` of `id` is signalled
    ///
    /// Fails with `InvalidState` as soon as `id` has been released or
    /// re-armed since `generation` was observed.
    pub fn wait_generation(
        &self,
        id: JobId,
        generation: u64,
        timeout: Option<Duration>,
    ) -> Result<(), CoreError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        state.waiting += 1;
        let result = loop {
            if state.cancelled {
                break Err(CoreError::DeviceRemoved);
            }
            match Self::entry(&mut state.entries, id).map(|e| *e) {
                Err(err) => break Err(err),
                Ok(entry) if entry.generation != generation => {
                    break Err(CoreError::InvalidState(format!(
                        "{} was released while waiting",
                        id
                    )))
                }
                Ok(Entry {
                    status: Completion::Signalled,
                    ..
                }) => break Ok(()),
                Ok(Entry {
                    status: Completion::Idle,
                    ..
                }) => {
                    break Err(CoreError::InvalidState(format!("{} is not awaiting completion", id)))
                }
                Ok(_) => {}
            }
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut state, deadline).timed_out()
                        && state.entries[id.index()].status == Completion::Pending
                        && !state.cancelled
                    {
                        break Err(CoreError::Timeout(format!("completion of {}", id)));
                    }
                }
                None => self.cond.wait(&mut state),
            }
        };
        state.waiting -= 1;
        result
    }
}
