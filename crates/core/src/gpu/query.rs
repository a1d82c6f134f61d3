//! Device memory queries.
//!
//! A [`MemorySnapshot`] is a point-in-time read of one device's counters.
//! Snapshots are recomputed per query and inherently racy: any process on
//! the machine can allocate between two reads. They are advisory inputs for
//! capacity planning, not for admission control, so no locking is done.

use serde::{Deserialize, Serialize};

use super::error::{GpuError, Result};

/// Memory counters for one device at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Total device capacity.
    pub total_bytes: u64,
    /// Bytes currently allocated.
    pub allocated_bytes: u64,
    /// Bytes reserved by a caching allocator but not currently allocated.
    pub reserved_bytes: u64,
}

impl MemorySnapshot {
    /// `total - (allocated + reserved)`, clamped at zero.
    pub fn headroom_bytes(&self) -> u64 {
        self.total_bytes
            .saturating_sub(self.allocated_bytes + self.reserved_bytes)
    }
}

/// Per-device memory counter source.
pub trait DeviceQuery: Send + Sync {
    /// Number of visible devices.
    fn device_count(&self) -> usize;

    /// Counters for one device.
    ///
    /// Fails with a configuration error when the index is out of range or
    /// no accelerator is present.
    fn snapshot(&self, device_index: usize) -> Result<MemorySnapshot>;
}

/// Reject device indices outside the visible range.
pub(crate) fn check_device(index: usize, count: usize) -> Result<()> {
    if count == 0 {
        return Err(GpuError::NoAccelerator);
    }
    if index >= count {
        return Err(GpuError::DeviceOutOfRange { index, count });
    }
    Ok(())
}

/// Counters read from the CUDA driver.
///
/// The driver exposes free/total only, so `allocated` is reported as
/// `total - free` and `reserved` as 0: caching-allocator reservations are
/// indistinguishable from allocations at driver level. Callers that need
/// the split can implement [`DeviceQuery`] against their allocator.
#[cfg(feature = "cuda")]
#[derive(Debug, Default)]
pub struct CudaDeviceQuery;

#[cfg(feature = "cuda")]
impl CudaDeviceQuery {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "cuda")]
impl DeviceQuery for CudaDeviceQuery {
    fn device_count(&self) -> usize {
        cudarc::driver::CudaDevice::count()
            .map(|count| count as usize)
            .unwrap_or(0)
    }

    fn snapshot(&self, device_index: usize) -> Result<MemorySnapshot> {
        check_device(device_index, self.device_count())?;

        // mem_get_info reads the current context, so bind the device first.
        let device = cudarc::driver::CudaDevice::new(device_index)
            .map_err(|e| GpuError::Query(format!("cuInit/cuDeviceGet({device_index}): {e:?}")))?;
        device
            .bind_to_thread()
            .map_err(|e| GpuError::Query(format!("bind device {device_index}: {e:?}")))?;

        let (free, total) = cudarc::driver::result::mem_get_info()
            .map_err(|e| GpuError::Query(format!("cuMemGetInfo({device_index}): {e:?}")))?;

        Ok(MemorySnapshot {
            total_bytes: total as u64,
            allocated_bytes: (total - free) as u64,
            reserved_bytes: 0,
        })
    }
}
