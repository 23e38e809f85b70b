//! Device configuration

use core_types::{CoreError, JOBS_Q_SZ, MAX_ARGS, PLATFORM_INTERRUPTS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Upper bound on platform plus slot lines of one device
///
/// Matches the MSI-X table limit of a PCIe function.
pub const MAX_INTERRUPT_LINES: usize = 2048;

/// Errors that can occur while loading or validating a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for CoreError {
    fn from(err: ConfigError) -> Self {
        CoreError::InvalidArgument(err.to_string())
    }
}

/// Capacities fixed at device bring-up
///
/// Missing fields take their defaults, so a config file only needs to name
/// what differs from the hardware defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Number of job records
    pub job_capacity: usize,
    /// Argument slots per job
    pub max_args: usize,
    /// Lines reserved below the slot lines
    pub platform_interrupts: usize,
    /// One line per hardware slot; reported by the bus layer
    pub slot_interrupts: usize,
    /// Threads running interrupt bottom halves
    pub deferred_workers: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            job_capacity: JOBS_Q_SZ,
            max_args: MAX_ARGS,
            platform_interrupts: PLATFORM_INTERRUPTS,
            slot_interrupts: 0,
            deferred_workers: 2,
        }
    }
}

impl DeviceConfig {
    /// Sets the number of slot lines
    pub fn with_slots(mut self, slots: usize) -> Self {
        self.slot_interrupts = slots;
        self
    }

    /// Sets the number of job records
    pub fn with_job_capacity(mut self, capacity: usize) -> Self {
        self.job_capacity = capacity;
        self
    }

    /// Sets the number of bottom-half workers
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.deferred_workers = workers;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.job_capacity == 0 {
            return Err(ConfigError::Invalid("job_capacity must be non-zero".into()));
        }
        if self.job_capacity > u32::MAX as usize {
            return Err(ConfigError::Invalid("job_capacity exceeds job id range".into()));
        }
        if self.max_args == 0 {
            return Err(ConfigError::Invalid("max_args must be non-zero".into()));
        }
        let lines = self
            .platform_interrupts
            .checked_add(self.slot_interrupts)
            .ok_or_else(|| ConfigError::Invalid("interrupt line count overflows".into()))?;
        if lines > MAX_INTERRUPT_LINES {
            return Err(ConfigError::Invalid(format!(
                "{} interrupt lines exceed the limit of {}",
                lines, MAX_INTERRUPT_LINES
            )));
        }
        if self.deferred_workers == 0 {
            return Err(ConfigError::Invalid("deferred_workers must be non-zero".into()));
        }
        Ok(())
    }

    /// Parses and validates a JSON configuration
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Loads a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Writes the configuration to `path`
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
