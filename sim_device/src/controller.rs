//! Simulated interrupt controller

use crate::fault_injection::{FaultPlan, IrqFault};
use hal::{InterruptController, IrqError, IrqHandler, IrqReturn};
use parking_lot::Mutex;
use std::collections::BTreeMap;

#[derive(Default)]
struct ControllerState {
    handlers: BTreeMap<u32, (String, IrqHandler)>,
    requests: usize,
    frees: usize,
}

/// Interrupt controller whose lines are fired explicitly by tests
///
/// Line `n` maps to vector `vector_base + n` for `n < line_count`.
pub struct SimInterruptController {
    vector_base: u32,
    line_count: usize,
    plan: FaultPlan,
    state: Mutex<ControllerState>,
}

impl SimInterruptController {
    /// Creates a controller with `line_count` lines starting at `vector_base`
    pub fn new(vector_base: u32, line_count: usize) -> Self {
        Self::with_faults(vector_base, line_count, FaultPlan::new())
    }

    /// Creates a controller that applies `plan`
    pub fn with_faults(vector_base: u32, line_count: usize, plan: FaultPlan) -> Self {
        Self {
            vector_base,
            line_count,
            plan,
            state: Mutex::new(ControllerState::default()),
        }
    }

    /// Raises `line` and runs its handler on the calling thread
    ///
    /// Returns `NotHandled` when no handler is installed.
    pub fn fire(&self, line: usize) -> IrqReturn {
        let handler = match self.vector(line) {
            Ok(vector) => self
                .state
                .lock()
                .handlers
                .get(&vector)
                .map(|(_, h)| h.clone()),
            Err(_) => None,
        };
        // the handler runs without the controller lock held
        match handler {
            Some(handler) => handler(),
            None => IrqReturn::NotHandled,
        }
    }

    /// Returns whether a handler is installed on `line`
    pub fn is_registered(&self, line: usize) -> bool {
        match self.vector(line) {
            Ok(vector) => self.state.lock().handlers.contains_key(&vector),
            Err(_) => false,
        }
    }

    /// Number of installed handlers
    pub fn registered_count(&self) -> usize {
        self.state.lock().handlers.len()
    }

    /// Owner name of the handler on `line`
    pub fn owner(&self, line: usize) -> Option<String> {
        let vector = self.vector(line).ok()?;
        self.state
            .lock()
            .handlers
            .get(&vector)
            .map(|(name, _)| name.clone())
    }

    /// Total successful `request_irq` calls
    pub fn request_count(&self) -> usize {
        self.state.lock().requests
    }

    /// Total `free_irq` calls
    pub fn free_count(&self) -> usize {
        self.state.lock().frees
    }
}

impl InterruptController for SimInterruptController {
    fn vector(&self, line: usize) -> Result<u32, IrqError> {
        if line >= self.line_count {
            return Err(IrqError::NoVector(line));
        }
        if let Some(IrqFault::NoVector { .. }) = self.plan.irq_fault_for(line) {
            return Err(IrqError::NoVector(line));
        }
        Ok(self.vector_base + line as u32)
    }

    fn request_irq(&self, vector: u32, name: &str, handler: IrqHandler) -> Result<(), IrqError> {
        let line = vector.wrapping_sub(self.vector_base) as usize;
        if let Some(IrqFault::FailRequest { code, .. }) = self.plan.irq_fault_for(line) {
            return Err(IrqError::Platform {
                vector,
                code: *code,
            });
        }
        let mut state = self.state.lock();
        if state.handlers.contains_key(&vector) {
            // -EBUSY
            return Err(IrqError::Platform { vector, code: -16 });
        }
        state.handlers.insert(vector, (name.to_string(), handler));
        state.requests += 1;
        Ok(())
    }

    fn free_irq(&self, vector: u32) {
        let removed = {
            let mut state = self.state.lock();
            state.frees += 1;
            state.handlers.remove(&vector)
        };
        drop(removed);
    }
}
