//! Multi-process bootstrap and coordination.
//!
//! # Environment Variables
//!
//! The launcher uses standard distributed training environment variables:
//! - `RANK`: Global rank of this process (0..WORLD_SIZE)
//! - `WORLD_SIZE`: Total number of processes
//! - `LOCAL_RANK`: Local rank on this node (for multi-node setups)
//! - `MASTER_ADDR`: Address of rank 0 for rendezvous (default: 127.0.0.1)
//! - `MASTER_PORT`: Port for rendezvous (default: 29500)
//!
//! # Usage
//!
//! ```ignore
//! use tensorlink_core::distributed::{DistributedConfig, TcpMesh};
//!
//! let config = DistributedConfig::from_env()?;
//! if config.is_distributed() {
//!     let mesh = TcpMesh::rendezvous(&config)?;
//! }
//! ```

use std::env;
use std::process::{Child, Command};

use super::error::{DistributedError, Result};

/// Distributed configuration, validated at construction.
#[derive(Debug, Clone)]
pub struct DistributedConfig {
    /// Global rank of this process.
    pub rank: usize,
    /// Total number of processes.
    pub world_size: usize,
    /// Local rank on this node.
    pub local_rank: usize,
    /// Master address for rendezvous.
    pub master_addr: String,
    /// Master port for rendezvous.
    pub master_port: u16,
}

impl DistributedConfig {
    pub fn new(
        rank: usize,
        world_size: usize,
        local_rank: usize,
        master_addr: impl Into<String>,
        master_port: u16,
    ) -> Result<Self> {
        // Also rejects world_size == 0.
        if rank >= world_size {
            return Err(DistributedError::InvalidRank { rank, world_size });
        }
        Ok(Self {
            rank,
            world_size,
            local_rank,
            master_addr: master_addr.into(),
            master_port,
        })
    }

    /// Read the configuration from environment variables.
    ///
    /// Falls back to single-process defaults for anything unset, then
    /// validates the result.
    pub fn from_env() -> Result<Self> {
        let rank = env::var("RANK")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let world_size = env::var("WORLD_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);

        let local_rank = env::var("LOCAL_RANK")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(rank);

        let master_addr = env::var("MASTER_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());

        let master_port = env::var("MASTER_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(29500);

        Self::new(rank, world_size, local_rank, master_addr, master_port)
    }

    /// Configuration for single-process execution.
    pub fn single_process() -> Self {
        Self {
            rank: 0,
            world_size: 1,
            local_rank: 0,
            master_addr: "127.0.0.1".to_string(),
            master_port: 29500,
        }
    }

    /// Whether more than one process participates.
    pub fn is_distributed(&self) -> bool {
        self.world_size > 1
    }

    /// Accelerator device ordinal for this rank.
    ///
    /// Uses LOCAL_RANK so each rank on a node maps to a distinct device.
    pub fn device_index(&self) -> usize {
        self.local_rank
    }
}

/// Return `true` when this process is a spawned worker (RANK > 0).
///
/// Called at the top of a launcher binary to branch into the worker code
/// path instead of the coordinator path.
pub fn is_worker_process() -> bool {
    env::var("RANK")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .map(|r| r > 0)
        .unwrap_or(false)
}

/// Spawn `world_size - 1` worker processes (ranks 1..world_size).
///
/// Each worker is a re-execution of the current binary with the same CLI
/// arguments plus the standard distributed environment variables. Workers
/// detect their role via [`is_worker_process`].
///
/// Returns handles to the spawned children so the coordinator can wait for
/// them on shutdown.
///
/// # Panics
/// Panics if `world_size < 2` (there are no workers to spawn).
pub fn spawn_workers(world_size: usize, master_port: u16) -> Result<Vec<Child>> {
    assert!(world_size > 1, "no workers to spawn for world_size=1");

    let current_exe = env::current_exe()?;

    // Forward the same CLI arguments to every worker so they parse the same
    // configuration as the coordinator.
    let args: Vec<std::ffi::OsString> = env::args_os().skip(1).collect();

    let mut workers = Vec::with_capacity(world_size - 1);
    for rank in 1..world_size {
        tracing::info!(rank, world_size, master_port, "spawning worker");

        let child = Command::new(&current_exe)
            .args(&args)
            .env("RANK", rank.to_string())
            .env("WORLD_SIZE", world_size.to_string())
            // Single-node assumption: LOCAL_RANK == RANK maps each worker to
            // a distinct device ordinal.
            .env("LOCAL_RANK", rank.to_string())
            .env("MASTER_ADDR", "127.0.0.1")
            .env("MASTER_PORT", master_port.to_string())
            .spawn()
            .map_err(|source| DistributedError::Spawn { rank, source })?;

        workers.push(child);
    }

    tracing::info!(count = world_size - 1, "all workers spawned");
    Ok(workers)
}

/// Wait for all worker processes to exit and collect their exit statuses.
///
/// Non-zero exit codes are logged as warnings but do not fail the call; by
/// the time the coordinator waits, the work either completed or the failure
/// already surfaced through the collective that hit it.
pub fn wait_for_workers(mut workers: Vec<Child>) {
    for (i, child) in workers.iter_mut().enumerate() {
        match child.wait() {
            Ok(status) if status.success() => {
                tracing::debug!(rank = i + 1, "worker exited cleanly");
            }
            Ok(status) => {
                tracing::warn!(rank = i + 1, ?status, "worker exited with non-zero status");
            }
            Err(e) => {
                tracing::warn!(rank = i + 1, error = %e, "error waiting for worker");
            }
        }
    }
}
