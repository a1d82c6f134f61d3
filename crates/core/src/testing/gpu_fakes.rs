//! Programmable device-query and placement fakes.

use std::sync::{Arc, Mutex};

use crate::gpu::{DevicePlacement, DeviceQuery, GpuError, MemorySnapshot, Result};

/// In-memory device query with counters tests can steer.
///
/// Clones share state, so a clone handed to a [`FakeModel`] moves the same
/// counters an accountant reads.
#[derive(Debug, Clone)]
pub struct FakeDeviceQuery {
    devices: Arc<Mutex<Vec<MemorySnapshot>>>,
}

impl FakeDeviceQuery {
    pub fn new(devices: Vec<MemorySnapshot>) -> Self {
        Self {
            devices: Arc::new(Mutex::new(devices)),
        }
    }

    /// One device with the given counters.
    pub fn single(total_bytes: u64, allocated_bytes: u64, reserved_bytes: u64) -> Self {
        Self::new(vec![MemorySnapshot {
            total_bytes,
            allocated_bytes,
            reserved_bytes,
        }])
    }

    /// Overwrite one device's allocated counter.
    ///
    /// # Panics
    /// Panics if `device_index` names no device.
    pub fn set_allocated(&self, device_index: usize, allocated_bytes: u64) {
        self.devices.lock().unwrap()[device_index].allocated_bytes = allocated_bytes;
    }
}

impl DeviceQuery for FakeDeviceQuery {
    fn device_count(&self) -> usize {
        self.devices.lock().unwrap().len()
    }

    fn snapshot(&self, device_index: usize) -> Result<MemorySnapshot> {
        let devices = self.devices.lock().unwrap();
        if devices.is_empty() {
            return Err(GpuError::NoAccelerator);
        }
        devices
            .get(device_index)
            .copied()
            .ok_or(GpuError::DeviceOutOfRange {
                index: device_index,
                count: devices.len(),
            })
    }
}

/// Model stand-in whose placement bumps the fake query's allocated counter
/// by a fixed footprint, the way a real parameter move would.
#[derive(Debug)]
pub struct FakeModel {
    query: FakeDeviceQuery,
    footprint_bytes: u64,
    /// Device the model currently resides on, if placed.
    pub device: Option<usize>,
}

impl FakeModel {
    pub fn new(query: FakeDeviceQuery, footprint_bytes: u64) -> Self {
        Self {
            query,
            footprint_bytes,
            device: None,
        }
    }
}

impl DevicePlacement for FakeModel {
    fn place_on(&mut self, device_index: usize) -> Result<()> {
        let snapshot = self.query.snapshot(device_index)?;
        self.query
            .set_allocated(device_index, snapshot.allocated_bytes + self.footprint_bytes);
        self.device = Some(device_index);
        Ok(())
    }
}
