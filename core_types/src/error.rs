//! Error taxonomy shared by every dispatch component

use thiserror::Error;

/// Errors surfaced to the immediate caller of a core operation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// No free job record or hardware line
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Out-of-range index, unsupported width or bad access type
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted outside its valid job state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Exclusive access requested while other access is held
    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    /// Interrupt or memory registration failed in the platform layer
    #[error("Device error {code}: {context}")]
    DeviceError { code: i32, context: String },

    /// Device torn down while the operation was pending
    #[error("Device removed")]
    DeviceRemoved,

    /// Bounded wait expired
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl CoreError {
    /// Returns whether the caller may retry after backing off
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::ResourceExhausted(_) | CoreError::ResourceBusy(_) | CoreError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CoreError::ResourceExhausted("jobs".into()).is_retryable());
        assert!(CoreError::ResourceBusy("exclusive".into()).is_retryable());
        assert!(!CoreError::InvalidArgument("idx".into()).is_retryable());
        assert!(!CoreError::DeviceRemoved.is_retryable());
    }

    #[test]
    fn test_device_error_display() {
        let err = CoreError::DeviceError {
            code: -22,
            context: "request_irq line 9".into(),
        };
        assert_eq!(err.to_string(), "Device error -22: request_irq line 9");
    }
}
