//! Memory capacity and headroom accounting.
//!
//! All figures here are advisory snapshots: the device counters are shared
//! with every process on the machine and can move between any two reads.
//! The accounting functions never touch process-group state.

use candle_core::{Device, Tensor};

use super::error::Result;
use super::query::DeviceQuery;

const BYTES_PER_GIB: f64 = (1u64 << 30) as f64;

/// Something whose parameters can be moved onto a device.
///
/// Placement triggered by the accounting operations is not rolled back; the
/// model stays resident on the target device afterward.
pub trait DevicePlacement {
    fn place_on(&mut self, device_index: usize) -> Result<()>;
}

/// Plain tensor bundles move parameter by parameter.
impl DevicePlacement for Vec<Tensor> {
    fn place_on(&mut self, device_index: usize) -> Result<()> {
        let device = Device::new_cuda(device_index)?;
        for tensor in self.iter_mut() {
            *tensor = tensor.to_device(&device)?;
        }
        Ok(())
    }
}

/// Capacity and headroom accounting over a [`DeviceQuery`].
pub struct MemoryAccountant<Q: DeviceQuery> {
    query: Q,
}

impl<Q: DeviceQuery> MemoryAccountant<Q> {
    pub fn new(query: Q) -> Self {
        Self { query }
    }

    pub fn query(&self) -> &Q {
        &self.query
    }

    /// Number of visible devices.
    pub fn device_count(&self) -> usize {
        self.query.device_count()
    }

    /// Headroom in bytes for one device: `total - (allocated + reserved)`.
    pub fn available_memory_bytes(&self, device_index: usize) -> Result<u64> {
        Ok(self.query.snapshot(device_index)?.headroom_bytes())
    }

    /// Headroom in GiB for one device.
    ///
    /// Fails with a configuration error if the device index is out of range
    /// or no accelerator is present.
    pub fn available_memory(&self, device_index: usize) -> Result<f64> {
        Ok(self.available_memory_bytes(device_index)? as f64 / BYTES_PER_GIB)
    }

    /// Total capacity in GiB summed across every visible device.
    pub fn total_memory_all_devices(&self) -> Result<f64> {
        let mut total = 0u64;
        for device in 0..self.query.device_count() {
            total += self.query.snapshot(device)?.total_bytes;
        }
        Ok(total as f64 / BYTES_PER_GIB)
    }

    /// Headroom in GiB summed across every visible device.
    pub fn total_available_memory_all_devices(&self) -> Result<f64> {
        let mut total = 0.0;
        for device in 0..self.query.device_count() {
            total += self.available_memory(device)?;
        }
        Ok(total)
    }

    /// Allocated-counter delta in bytes around placing `model` on a device.
    ///
    /// Samples the allocated counter immediately before and after placement
    /// and returns the difference. The model stays resident on the device
    /// afterward. Other allocators on the machine can perturb the delta; it
    /// is an estimate.
    pub fn model_memory_consumption<M: DevicePlacement>(
        &self,
        model: &mut M,
        device_index: usize,
    ) -> Result<u64> {
        let before = self.query.snapshot(device_index)?.allocated_bytes;
        model.place_on(device_index)?;
        let after = self.query.snapshot(device_index)?.allocated_bytes;

        let consumed = after.saturating_sub(before);
        tracing::debug!(
            device = device_index,
            bytes = consumed,
            "model placement consumed"
        );
        Ok(consumed)
    }

    /// Estimated headroom in GiB once `model` is resident on the device.
    ///
    /// Composes the headroom sampled before placement with the placement
    /// delta; it does not re-read the counters after placement, so the
    /// result is an estimate rather than a live reading. The model stays
    /// resident, as with [`model_memory_consumption`](Self::model_memory_consumption).
    pub fn available_memory_after_load<M: DevicePlacement>(
        &self,
        model: &mut M,
        device_index: usize,
    ) -> Result<f64> {
        let before = self.available_memory(device_index)?;
        let consumed = self.model_memory_consumption(model, device_index)?;
        Ok(before - consumed as f64 / BYTES_PER_GIB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{GpuError, MemorySnapshot};
    use crate::testing::{FakeDeviceQuery, FakeModel};

    const GIB: u64 = 1 << 30;

    #[test]
    fn available_memory_is_idempotent_without_allocation() {
        let accountant = MemoryAccountant::new(FakeDeviceQuery::single(4 * GIB, GIB, GIB / 2));
        let first = accountant.available_memory(0).unwrap();
        let second = accountant.available_memory(0).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, 2.5);
    }

    #[test]
    fn out_of_range_device_is_a_configuration_error() {
        let accountant = MemoryAccountant::new(FakeDeviceQuery::single(4 * GIB, 0, 0));
        let err = accountant.available_memory(1).unwrap_err();
        assert!(err.is_configuration());
        assert!(matches!(
            err,
            GpuError::DeviceOutOfRange { index: 1, count: 1 }
        ));
    }

    #[test]
    fn absent_accelerator_is_a_configuration_error() {
        let accountant = MemoryAccountant::new(FakeDeviceQuery::new(Vec::new()));
        assert!(matches!(
            accountant.available_memory(0).unwrap_err(),
            GpuError::NoAccelerator
        ));
        // Whole-fleet sums over zero devices are zero, not errors.
        assert_eq!(accountant.total_memory_all_devices().unwrap(), 0.0);
    }

    #[test]
    fn totals_sum_across_devices() {
        let accountant = MemoryAccountant::new(FakeDeviceQuery::new(vec![
            MemorySnapshot {
                total_bytes: 4 * GIB,
                allocated_bytes: GIB,
                reserved_bytes: 0,
            },
            MemorySnapshot {
                total_bytes: 8 * GIB,
                allocated_bytes: 2 * GIB,
                reserved_bytes: GIB,
            },
        ]));
        assert_eq!(accountant.total_memory_all_devices().unwrap(), 12.0);
        assert_eq!(accountant.total_available_memory_all_devices().unwrap(), 8.0);
    }

    #[test]
    fn consumption_is_the_allocated_counter_delta() {
        let query = FakeDeviceQuery::single(4 * GIB, 100, 0);
        let accountant = MemoryAccountant::new(query.clone());
        let mut model = FakeModel::new(query, 80);

        assert_eq!(accountant.model_memory_consumption(&mut model, 0).unwrap(), 80);
        assert_eq!(model.device, Some(0));
        // The placement is not rolled back.
        assert_eq!(
            accountant.query().snapshot(0).unwrap().allocated_bytes,
            180
        );
    }

    #[test]
    fn after_load_estimate_is_headroom_before_minus_delta() {
        let query = FakeDeviceQuery::single(4 * GIB, 100, 0);
        let accountant = MemoryAccountant::new(query.clone());

        let before = accountant.available_memory(0).unwrap();
        let mut model = FakeModel::new(query, 80);
        let after = accountant.available_memory_after_load(&mut model, 0).unwrap();

        assert_eq!(after, before - 80.0 / (GIB as f64));
        assert_eq!(model.device, Some(0));
    }
}
