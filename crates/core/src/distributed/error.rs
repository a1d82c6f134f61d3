//! Error types for distributed operations.
//!
//! Variants fall into two families the caller is expected to branch on:
//! configuration errors (bad input, detected before any communication,
//! retriable after fixing the input) and communication errors (a peer
//! exchange failed mid-collective; the in-flight buffer is poisoned and the
//! group must be re-established before retrying).

use thiserror::Error;

/// Errors that can occur during distributed operations.
#[derive(Error, Debug)]
pub enum DistributedError {
    /// Rank is out of valid range for the process group.
    #[error("invalid rank {rank}: must be < world_size {world_size}")]
    InvalidRank { rank: usize, world_size: usize },

    /// Peer index does not name another rank in the group.
    #[error("invalid peer {peer}: not another rank in world_size {world_size}")]
    InvalidPeer { peer: usize, world_size: usize },

    /// Gather destination does not have one slot per rank.
    #[error("gather destination holds {actual} slot(s), world_size is {expected}")]
    GatherDestination { expected: usize, actual: usize },

    /// A received payload does not match the byte size the call-site
    /// shape/dtype contract implies.
    #[error("payload holds {actual} byte(s), expected {expected} for shape {shape:?}")]
    PayloadSize {
        expected: usize,
        actual: usize,
        shape: Vec<usize>,
    },

    /// The link to a peer went away mid-operation.
    #[error("peer {peer} channel closed mid-operation")]
    ChannelClosed { peer: usize },

    /// Rendezvous with the master rank failed.
    #[error("rendezvous failed: {0}")]
    Rendezvous(String),

    /// I/O failure on a peer link.
    #[error("peer link i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// Worker process could not be spawned.
    #[error("failed to spawn worker rank {rank}")]
    Spawn {
        rank: usize,
        #[source]
        source: std::io::Error,
    },

    /// Underlying tensor operation failed.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

impl DistributedError {
    /// True for errors detected before any communication was attempted.
    /// The caller can fix the input and retry the call.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidRank { .. } | Self::InvalidPeer { .. } | Self::GatherDestination { .. }
        )
    }

    /// True for failures of an in-flight exchange. The buffer passed to the
    /// failed call must not be reused; the group has to be re-established
    /// before retrying.
    pub fn is_communication(&self) -> bool {
        matches!(
            self,
            Self::PayloadSize { .. } | Self::ChannelClosed { .. } | Self::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DistributedError>;
