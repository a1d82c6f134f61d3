//! Ring collectives over pluggable peer transports.
//!
//! This module provides the process-group plumbing for multi-process
//! tensor exchange:
//! - [`ProcessGroup`] - membership (rank, world size, ring neighbors)
//! - [`PeerChannel`] - point-to-point transport seam with completion handles
//! - [`Communicator`] - ring all-reduce and chunked all-gather on top of it
//!
//! # Architecture
//!
//! - Single process: every collective degenerates to the identity
//!   (world_size=1 bypass).
//! - Multiple ranks in one process: [`ChannelMesh`], one rank per thread.
//! - Multiple OS processes: [`TcpMesh`], rendezvoused through rank 0.
//!
//! # Usage
//!
//! ```ignore
//! use tensorlink_core::distributed::{Communicator, DistributedConfig, ReduceOp, TcpMesh};
//!
//! let config = DistributedConfig::from_env()?;
//! let comm = Communicator::new(TcpMesh::rendezvous(&config)?);
//! comm.reduce(&mut tensor, ReduceOp::Sum)?;
//! ```

mod channel;
mod collective;
mod error;
mod launcher;
mod process_group;
mod tcp;
mod transport;
mod wire;

pub use channel::ChannelMesh;
pub use collective::{Communicator, ReduceOp};
pub use error::{DistributedError, Result};
pub use launcher::{is_worker_process, spawn_workers, wait_for_workers, DistributedConfig};
pub use process_group::{LocalProcessGroup, ProcessGroup};
pub use tcp::TcpMesh;
pub use transport::{PeerChannel, RecvHandle, SendHandle};
