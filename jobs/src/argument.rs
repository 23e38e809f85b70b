//! Per-job argument and return storage

use crate::transfer::Transfer;
use core_types::CoreError;

/// A single argument slot
#[derive(Debug, Default)]
pub enum Argument {
    /// Never set since the job was acquired
    #[default]
    Empty,
    /// 32-bit scalar
    U32(u32),
    /// 64-bit scalar
    U64(u64),
    /// Staged buffer; marshaled as its device address
    Transfer(Transfer),
}

impl Argument {
    /// Returns the value marshaled into the PE's argument register
    pub fn raw(&self) -> u64 {
        match self {
            Argument::Empty => 0,
            Argument::U32(v) => u64::from(*v),
            Argument::U64(v) => *v,
            Argument::Transfer(t) => t.device_handle().addr(),
        }
    }

    /// Returns whether the argument occupies a 64-bit register
    ///
    /// Device addresses are 64-bit wide.
    pub fn is_64bit(&self) -> bool {
        matches!(self, Argument::U64(_) | Argument::Transfer(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Argument::Empty)
    }
}

/// Arguments and return buffer of one job record
#[derive(Debug)]
pub struct ArgumentStore {
    args: Vec<Argument>,
    ret: Vec<u8>,
}

impl ArgumentStore {
    /// Creates a store with `max_args` empty slots
    pub fn new(max_args: usize) -> Self {
        Self {
            args: (0..max_args).map(|_| Argument::Empty).collect(),
            ret: Vec::new(),
        }
    }

    pub fn max_args(&self) -> usize {
        self.args.len()
    }

    /// Number of argument slots to marshal: highest populated index + 1
    pub fn count(&self) -> usize {
        self.args
            .iter()
            .rposition(|arg| !arg.is_empty())
            .map_or(0, |idx| idx + 1)
    }

    fn check_index(&self, idx: usize) -> Result<(), CoreError> {
        if idx >= self.args.len() {
            return Err(CoreError::InvalidArgument(format!(
                "argument index {} out of range (max {})",
                idx,
                self.args.len()
            )));
        }
        Ok(())
    }

    /// Returns the argument at `idx`
    pub fn arg(&self, idx: usize) -> Result<&Argument, CoreError> {
        self.check_index(idx)?;
        Ok(&self.args[idx])
    }

    /// Stores a scalar given as raw native-endian bytes
    ///
    /// `value.len()` is the width and must be 4 or 8. A transfer previously
    /// staged at `idx` is released.
    pub fn set_arg(&mut self, idx: usize, value: &[u8]) -> Result<(), CoreError> {
        self.check_index(idx)?;
        let arg = match *value {
            [a, b, c, d] => Argument::U32(u32::from_ne_bytes([a, b, c, d])),
            [a, b, c, d, e, f, g, h] => {
                Argument::U64(u64::from_ne_bytes([a, b, c, d, e, f, g, h]))
            }
            _ => {
                return Err(CoreError::InvalidArgument(format!(
                    "unsupported argument width {}",
                    value.len()
                )))
            }
        };
        self.args[idx] = arg;
        Ok(())
    }

    /// Copies the argument at `idx` into `out` as native-endian bytes
    ///
    /// `out.len()` selects the width (4 or 8); a 64-bit value read with
    /// width 4 yields its low word. Empty slots read as zero.
    pub fn get_arg(&self, idx: usize, out: &mut [u8]) -> Result<(), CoreError> {
        self.check_index(idx)?;
        let raw = self.args[idx].raw();
        match out.len() {
            4 => out.copy_from_slice(&(raw as u32).to_ne_bytes()),
            8 => out.copy_from_slice(&raw.to_ne_bytes()),
            width => {
                return Err(CoreError::InvalidArgument(format!(
                    "unsupported argument width {}",
                    width
                )))
            }
        }
        Ok(())
    }

    /// Returns whether the argument at `idx` is 64 bits wide
    pub fn is_arg_64bit(&self, idx: usize) -> Result<bool, CoreError> {
        Ok(self.arg(idx)?.is_64bit())
    }

    /// Replaces the argument at `idx` with a staged transfer
    ///
    /// The transfer previously staged at `idx`, if any, is released.
    pub fn set_arg_transfer(&mut self, idx: usize, transfer: Transfer) -> Result<(), CoreError> {
        self.check_index(idx)?;
        self.args[idx] = Argument::Transfer(transfer);
        Ok(())
    }

    /// Returns the transfer staged at `idx`
    pub fn arg_transfer(&self, idx: usize) -> Result<&Transfer, CoreError> {
        match self.arg(idx)? {
            Argument::Transfer(t) => Ok(t),
            _ => Err(CoreError::InvalidArgument(format!(
                "argument {} is not a transfer",
                idx
            ))),
        }
    }

    /// Flags the transfer at `idx` as already present on the device
    pub fn mark_preloaded(&mut self, idx: usize) -> Result<(), CoreError> {
        self.check_index(idx)?;
        match &mut self.args[idx] {
            Argument::Transfer(t) => {
                t.set_preloaded();
                Ok(())
            }
            _ => Err(CoreError::InvalidArgument(format!(
                "argument {} is not a transfer",
                idx
            ))),
        }
    }

    /// Stores the return value; its length is fixed by this call
    pub fn set_return(&mut self, value: &[u8]) {
        self.ret.clear();
        self.ret.extend_from_slice(value);
    }

    /// Copies the first `out.len()` bytes of the return value into `out`
    pub fn get_return(&self, out: &mut [u8]) -> Result<(), CoreError> {
        if out.len() > self.ret.len() {
            return Err(CoreError::InvalidArgument(format!(
                "return value holds {} bytes, {} requested",
                self.ret.len(),
                out.len()
            )));
        }
        out.copy_from_slice(&self.ret[..out.len()]);
        Ok(())
    }

    pub fn return_value(&self) -> &[u8] {
        &self.ret
    }

    /// Empties every slot and the return buffer, releasing staged transfers
    pub fn clear(&mut self) {
        for arg in &mut self.args {
            *arg = Argument::Empty;
        }
        self.ret.clear();
    }
}
