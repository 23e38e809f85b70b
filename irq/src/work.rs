//! Bounded deferred-work queue and its worker pool

use crate::SlotInterruptSink;
use core_types::{CoreError, SlotId};
use hal::IrqReturn;
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Poll period of [`DeferredQueue::drain`]
///
/// Top halves may retire work without notifying, so drain re-checks the
/// counter on this period.
const DRAIN_POLL: Duration = Duration::from_millis(5);

/// Per-line deferred work descriptor
///
/// A descriptor is queued at most once at a time; interrupts arriving while
/// it is pending coalesce into the queued run.
pub struct DeferredWork {
    line: usize,
    slot: SlotId,
    pending: AtomicBool,
    sink: Weak<dyn SlotInterruptSink>,
}

impl DeferredWork {
    pub fn new(line: usize, slot: SlotId, sink: Weak<dyn SlotInterruptSink>) -> Self {
        Self {
            line,
            slot,
            pending: AtomicBool::new(false),
            sink,
        }
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    fn run(&self) {
        match self.sink.upgrade() {
            Some(sink) => sink.signal_slot_interrupt(self.slot),
            None => log::debug!("line {}: device gone, dropping completion", self.line),
        }
    }
}

enum Message {
    Run(Arc<DeferredWork>),
    Terminate,
}

#[derive(Default)]
struct QueueShared {
    closed: AtomicBool,
    outstanding: AtomicUsize,
    idle_lock: Mutex<()>,
    idle: Condvar,
}

impl QueueShared {
    fn retire(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _guard = self.idle_lock.lock();
            self.idle.notify_all();
        }
    }
}

/// Interrupt-context handle onto a [`DeferredQueue`]
#[derive(Clone)]
pub struct WorkScheduler {
    sender: SyncSender<Message>,
    shared: Arc<QueueShared>,
}

impl WorkScheduler {
    /// Queues `work` for the worker pool
    ///
    /// Safe in interrupt context: uses only atomics and a non-blocking send
    /// into a preallocated bounded channel.
    pub fn schedule(&self, work: &Arc<DeferredWork>) -> IrqReturn {
        // count first so a concurrent drain either sees us or we see `closed`
        self.shared.outstanding.fetch_add(1, Ordering::SeqCst);
        if self.shared.closed.load(Ordering::SeqCst) {
            self.shared.outstanding.fetch_sub(1, Ordering::SeqCst);
            return IrqReturn::NotHandled;
        }
        if work.pending.swap(true, Ordering::SeqCst) {
            self.shared.outstanding.fetch_sub(1, Ordering::SeqCst);
            return IrqReturn::Handled;
        }
        match self.sender.try_send(Message::Run(Arc::clone(work))) {
            Ok(()) => IrqReturn::Handled,
            Err(_) => {
                work.pending.store(false, Ordering::SeqCst);
                self.shared.outstanding.fetch_sub(1, Ordering::SeqCst);
                IrqReturn::NotHandled
            }
        }
    }
}

/// Bounded queue of deferred work served by a fixed worker pool
pub struct DeferredQueue {
    scheduler: WorkScheduler,
    workers: Vec<JoinHandle<()>>,
}

impl DeferredQueue {
    /// Spawns `workers` threads serving a queue of `depth` entries
    ///
    /// `depth` should cover every descriptor that can be pending at once.
    pub fn new(name: &str, depth: usize, workers: usize) -> Result<Self, CoreError> {
        if workers == 0 {
            return Err(CoreError::InvalidArgument(
                "deferred queue needs at least one worker".to_string(),
            ));
        }
        let (sender, receiver) = mpsc::sync_channel(depth.max(1) + workers);
        let receiver = Arc::new(Mutex::new(receiver));
        let shared = Arc::new(QueueShared::default());

        let mut queue = Self {
            scheduler: WorkScheduler { sender, shared },
            workers: Vec::with_capacity(workers),
        };
        for index in 0..workers {
            let receiver = Arc::clone(&receiver);
            let shared = Arc::clone(&queue.scheduler.shared);
            let spawned = thread::Builder::new()
                .name(format!("{}-irq-{}", name, index))
                .spawn(move || worker_loop(&receiver, &shared));
            match spawned {
                Ok(handle) => queue.workers.push(handle),
                Err(err) => {
                    queue.shutdown();
                    return Err(CoreError::ResourceExhausted(format!(
                        "cannot spawn deferred worker: {}",
                        err
                    )));
                }
            }
        }
        Ok(queue)
    }

    /// Returns a handle for top halves
    pub fn scheduler(&self) -> WorkScheduler {
        self.scheduler.clone()
    }

    /// Number of queued or running work items
    pub fn outstanding(&self) -> usize {
        self.scheduler.shared.outstanding.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.scheduler.shared.closed.load(Ordering::SeqCst)
    }

    /// Refuses further work; already queued work still runs
    pub fn close(&self) {
        self.scheduler.shared.closed.store(true, Ordering::SeqCst);
    }

    /// Blocks until every queued or running work item has completed
    ///
    /// Called from a worker this returns at once, since the caller's own
    /// item can never retire while it waits.
    pub fn drain(&self) {
        if self.is_worker_thread() {
            log::warn!("drain requested from a deferred worker, skipping");
            return;
        }
        let shared = &self.scheduler.shared;
        let mut guard = shared.idle_lock.lock();
        while shared.outstanding.load(Ordering::SeqCst) > 0 {
            shared.idle.wait_for(&mut guard, DRAIN_POLL);
        }
    }

    /// Closes, drains and stops the worker pool
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.close();
        self.drain();
        for _ in &self.workers {
            // terminate messages queue behind any remaining work
            let _ = self.scheduler.sender.send(Message::Terminate);
        }
        let current = thread::current().id();
        for handle in self.workers.drain(..) {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                log::error!("deferred worker panicked during shutdown");
            }
        }
    }

    fn is_worker_thread(&self) -> bool {
        let current = thread::current().id();
        self.workers.iter().any(|h| h.thread().id() == current)
    }
}

impl Drop for DeferredQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: &Mutex<Receiver<Message>>, shared: &QueueShared) {
    loop {
        let message = receiver.lock().recv();
        match message {
            Ok(Message::Run(work)) => {
                // cleared before running so a new interrupt re-queues
                work.pending.store(false, Ordering::SeqCst);
                if panic::catch_unwind(AssertUnwindSafe(|| work.run())).is_err() {
                    log::error!("line {}: deferred work panicked", work.line);
                }
                shared.retire();
            }
            Ok(Message::Terminate) | Err(_) => break,
        }
    }
}
