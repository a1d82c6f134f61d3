//! Error types for GPU accounting.

use thiserror::Error;

/// Errors from device memory queries and placement accounting.
#[derive(Error, Debug)]
pub enum GpuError {
    /// No accelerator is visible to this process.
    #[error("no accelerator visible to this process")]
    NoAccelerator,

    /// Device index does not name a visible device.
    #[error("device {index} out of range: {count} device(s) visible")]
    DeviceOutOfRange { index: usize, count: usize },

    /// The device could be addressed but its counters could not be read.
    #[error("device query failed: {0}")]
    Query(String),

    /// Placement or tensor operation failed.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

impl GpuError {
    /// True for errors the caller can fix by changing the input, e.g. by
    /// skipping GPU accounting on a machine without one.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NoAccelerator | Self::DeviceOutOfRange { .. })
    }
}

pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_classify() {
        assert!(GpuError::NoAccelerator.is_configuration());
        assert!(GpuError::DeviceOutOfRange { index: 2, count: 1 }.is_configuration());
        assert!(!GpuError::Query("driver said no".into()).is_configuration());
    }

    #[test]
    fn error_messages_carry_context() {
        let msg = GpuError::DeviceOutOfRange { index: 3, count: 2 }.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains('2'));
    }
}
