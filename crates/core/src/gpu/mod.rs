//! GPU memory capacity and headroom accounting.
//!
//! Reports per-device memory counters and derives available headroom,
//! before and after a hypothetical model placement:
//! - [`DeviceQuery`] - per-device counter source ([`CudaDeviceQuery`] under
//!   the `cuda` feature)
//! - [`MemoryAccountant`] - headroom, fleet totals, placement-delta estimates
//! - [`DevicePlacement`] - "move your parameters to device D" seam
//!
//! Independent of the `distributed` module; nothing here touches
//! process-group state.

mod accounting;
mod error;
mod query;

pub use accounting::{DevicePlacement, MemoryAccountant};
pub use error::{GpuError, Result};
#[cfg(feature = "cuda")]
pub use query::CudaDeviceQuery;
pub use query::{DeviceQuery, MemorySnapshot};
