//! Interrupt line registration and routing

use crate::work::{DeferredQueue, DeferredWork};
use crate::SlotInterruptSink;
use core_types::{CoreError, SlotId};
use hal::{InterruptController, IrqHandler};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// What an interrupt line is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinePurpose {
    /// Platform-level interrupt below the slot base
    Platform,
    /// Completion interrupt of a hardware slot
    Slot(SlotId),
}

/// Snapshot of one interrupt line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptLine {
    pub line: usize,
    /// System vector while registered
    pub vector: Option<u32>,
    pub purpose: LinePurpose,
}

struct RouterState {
    mapping: Vec<Option<u32>>,
    queue: Option<DeferredQueue>,
}

/// Maps a device's interrupt lines to deferred completion work
pub struct InterruptRouter {
    name: String,
    controller: Arc<dyn InterruptController>,
    platform_interrupts: usize,
    slot_count: usize,
    workers: usize,
    state: Mutex<RouterState>,
}

impl InterruptRouter {
    /// Creates a router for `slot_count` slot lines above `platform_interrupts`
    pub fn new(
        name: impl Into<String>,
        controller: Arc<dyn InterruptController>,
        platform_interrupts: usize,
        slot_count: usize,
        workers: usize,
    ) -> Self {
        Self {
            name: name.into(),
            controller,
            platform_interrupts,
            slot_count,
            workers,
            state: Mutex::new(RouterState {
                mapping: vec![None; platform_interrupts + slot_count],
                queue: None,
            }),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn platform_interrupts(&self) -> usize {
        self.platform_interrupts
    }

    /// Device-relative line of `slot`
    pub fn line_for_slot(&self, slot: SlotId) -> usize {
        self.platform_interrupts + slot.index()
    }

    /// Returns whether the slot lines are registered
    pub fn is_active(&self) -> bool {
        self.state.lock().queue.is_some()
    }

    /// System vector of `line`, if registered
    pub fn mapping(&self, line: usize) -> Option<u32> {
        self.state.lock().mapping.get(line).copied().flatten()
    }

    /// Number of registered lines, platform and slot
    pub fn mapped_count(&self) -> usize {
        self.state.lock().mapping.iter().filter(|m| m.is_some()).count()
    }

    /// Snapshot of every line
    pub fn lines(&self) -> Vec<InterruptLine> {
        let state = self.state.lock();
        state
            .mapping
            .iter()
            .enumerate()
            .map(|(line, vector)| InterruptLine {
                line,
                vector: *vector,
                purpose: self.purpose(line),
            })
            .collect()
    }

    fn purpose(&self, line: usize) -> LinePurpose {
        if line < self.platform_interrupts {
            LinePurpose::Platform
        } else {
            LinePurpose::Slot(SlotId((line - self.platform_interrupts) as u32))
        }
    }

    /// Registers every slot line, all or nothing
    ///
    /// On failure at line *k* the lines registered before it are released and
    /// the deferred workers are stopped before the error is returned.
    pub fn init(&self, sink: Weak<dyn SlotInterruptSink>) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        if state.queue.is_some() {
            return Err(CoreError::InvalidState(format!(
                "{}: interrupts already registered",
                self.name
            )));
        }

        log::info!("{}: registering {} interrupts ...", self.name, self.slot_count);
        let mut queue = DeferredQueue::new(&self.name, self.slot_count, self.workers)?;
        let scheduler = queue.scheduler();

        for index in 0..self.slot_count {
            let line = self.platform_interrupts + index;
            let slot = SlotId(index as u32);
            let work = Arc::new(DeferredWork::new(line, slot, sink.clone()));
            let handler: IrqHandler = {
                let scheduler = scheduler.clone();
                Arc::new(move || scheduler.schedule(&work))
            };

            let registered = self.controller.vector(line).and_then(|vector| {
                self.controller
                    .request_irq(vector, &self.name, handler)
                    .map(|()| vector)
            });
            match registered {
                Ok(vector) => {
                    state.mapping[line] = Some(vector);
                    log::debug!(
                        "{}: created mapping from interrupt {} -> {}",
                        self.name,
                        line,
                        vector
                    );
                }
                Err(err) => {
                    log::error!("{}: could not request interrupt {}: {}", self.name, line, err);
                    self.rollback(&mut state.mapping, line);
                    queue.shutdown();
                    return Err(err.into());
                }
            }
        }

        state.queue = Some(queue);
        Ok(())
    }

    fn rollback(&self, mapping: &mut [Option<u32>], failed_line: usize) {
        for line in self.platform_interrupts..failed_line {
            if let Some(vector) = mapping[line].take() {
                self.controller.free_irq(vector);
                log::debug!("{}: rolled back interrupt {} ({})", self.name, line, vector);
            }
        }
    }

    /// Stops routing and releases every mapped line, slot and platform
    ///
    /// Deferred work already queued runs to completion before any line is
    /// freed. Lines that were never mapped are skipped.
    pub fn exit(&self) {
        let mut state = self.state.lock();
        let mut queue = state.queue.take();
        if let Some(queue) = &queue {
            queue.close();
            queue.drain();
        }

        for (line, mapping) in state.mapping.iter_mut().enumerate() {
            if let Some(vector) = mapping.take() {
                log::debug!("{}: freeing interrupt {} with mapping {}", self.name, line, vector);
                self.controller.free_irq(vector);
            }
        }

        if let Some(queue) = queue.as_mut() {
            queue.shutdown();
        }
        log::info!("{}: interrupts deactivated", self.name);
    }

    /// Registers a platform (non-slot) interrupt handler on line `no`
    pub fn request_platform_irq(&self, no: usize, handler: IrqHandler) -> Result<(), CoreError> {
        self.check_platform_line(no)?;
        let mut state = self.state.lock();
        if let Some(vector) = state.mapping[no] {
            return Err(CoreError::ResourceBusy(format!(
                "platform interrupt #{} already mapped to {}",
                no, vector
            )));
        }

        log::debug!("{}: requesting platform irq #{}", self.name, no);
        let vector = self.controller.vector(no)?;
        self.controller
            .request_irq(vector, &self.name, handler)
            .map_err(|err| {
                log::error!("{}: could not request interrupt #{}: {}", self.name, no, err);
                CoreError::from(err)
            })?;
        state.mapping[no] = Some(vector);
        log::debug!("{}: created mapping from interrupt {} -> {}", self.name, no, vector);
        Ok(())
    }

    /// Releases platform line `no`; releasing an unmapped line does nothing
    pub fn release_platform_irq(&self, no: usize) -> Result<(), CoreError> {
        self.check_platform_line(no)?;
        let mut state = self.state.lock();
        match state.mapping[no].take() {
            Some(vector) => {
                log::debug!(
                    "{}: freeing platform interrupt #{} with mapping {}",
                    self.name,
                    no,
                    vector
                );
                self.controller.free_irq(vector);
            }
            None => log::warn!("{}: platform interrupt #{} is not mapped", self.name, no),
        }
        Ok(())
    }

    fn check_platform_line(&self, no: usize) -> Result<(), CoreError> {
        if no >= self.platform_interrupts {
            log::error!(
                "{}: invalid platform interrupt number: {} (must be < {})",
                self.name,
                no,
                self.platform_interrupts
            );
            return Err(CoreError::InvalidArgument(format!(
                "platform interrupt {} out of range (max {})",
                no, self.platform_interrupts
            )));
        }
        Ok(())
    }
}

impl Drop for InterruptRouter {
    fn drop(&mut self) {
        if self.mapped_count() > 0 || self.is_active() {
            self.exit();
        }
    }
}
