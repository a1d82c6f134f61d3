//! Point-to-point transport seam for the collectives.
//!
//! A [`PeerChannel`] is the process-group collaborator the communicator is
//! built on: non-blocking send/receive of byte payloads between ranks, each
//! returning a completion handle, plus a synchronous all-gather primitive
//! and a barrier (both default-implemented on top of the point-to-point
//! pair; backends with a faster native path override them).
//!
//! Payloads are opaque byte buffers. Shape and dtype of the tensors they
//! carry are fixed by the call-site contract, not negotiated per message.

use super::error::{DistributedError, Result};
use super::process_group::ProcessGroup;

/// Completion handle for a non-blocking send.
///
/// Dropping the handle without calling [`wait`](Self::wait) does not cancel
/// the send; it only discards the completion notification.
pub struct SendHandle {
    waiter: Option<Box<dyn FnOnce() -> Result<()> + Send>>,
}

impl SendHandle {
    /// A send that already completed when it was issued.
    pub fn ready() -> Self {
        Self { waiter: None }
    }

    /// A send whose completion is observed by the given closure.
    pub fn pending(waiter: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        Self {
            waiter: Some(Box::new(waiter)),
        }
    }

    /// Block until the payload has been handed to the peer link.
    pub fn wait(self) -> Result<()> {
        match self.waiter {
            Some(waiter) => waiter(),
            None => Ok(()),
        }
    }
}

/// Completion handle for a non-blocking receive.
pub struct RecvHandle {
    waiter: Box<dyn FnOnce() -> Result<Vec<u8>> + Send>,
}

impl RecvHandle {
    pub fn pending(waiter: impl FnOnce() -> Result<Vec<u8>> + Send + 'static) -> Self {
        Self {
            waiter: Box::new(waiter),
        }
    }

    /// Block until a payload from the peer arrives, and take ownership of it.
    pub fn wait(self) -> Result<Vec<u8>> {
        (self.waiter)()
    }
}

/// Full-mesh peer transport between the ranks of a process group.
///
/// All operations are blocking from the calling rank's perspective once
/// their handle is waited on; this layer adds no timeout or cancellation.
pub trait PeerChannel: ProcessGroup {
    /// Begin sending `payload` to `peer`. The transport takes ownership of
    /// the bytes; the caller must not assume delivery until the returned
    /// handle has been waited on.
    fn isend(&self, peer: usize, payload: Vec<u8>) -> Result<SendHandle>;

    /// Begin receiving the next payload from `peer`.
    fn irecv(&self, peer: usize) -> Result<RecvHandle>;

    /// Exchange `payload` with every rank. Returns one entry per rank,
    /// indexed by rank; the local slot holds `payload` itself.
    ///
    /// The default implementation is a direct exchange over the
    /// point-to-point pair. Backends with a lower-overhead native gather
    /// override this; both must produce identical logical results.
    fn all_gather(&self, payload: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        let world_size = self.world_size();
        let rank = self.rank();
        if world_size == 1 {
            return Ok(vec![payload]);
        }

        let mut sends = Vec::with_capacity(world_size - 1);
        let mut recvs = Vec::with_capacity(world_size - 1);
        for peer in (0..world_size).filter(|&p| p != rank) {
            sends.push(self.isend(peer, payload.clone())?);
            recvs.push((peer, self.irecv(peer)?));
        }

        let mut out = vec![Vec::new(); world_size];
        out[rank] = payload;
        for (peer, handle) in recvs {
            out[peer] = handle.wait()?;
        }
        for handle in sends {
            handle.wait()?;
        }
        Ok(out)
    }

    /// Block until every rank has entered the barrier.
    fn barrier(&self) -> Result<()> {
        self.all_gather(Vec::new()).map(|_| ())
    }
}

/// Reject peer indices that do not name another rank in the group.
pub(crate) fn check_peer(rank: usize, world_size: usize, peer: usize) -> Result<()> {
    if peer >= world_size || peer == rank {
        return Err(DistributedError::InvalidPeer { peer, world_size });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_send_completes() {
        assert!(SendHandle::ready().wait().is_ok());
    }

    #[test]
    fn pending_handles_run_their_waiter() {
        let send = SendHandle::pending(|| Ok(()));
        assert!(send.wait().is_ok());

        let recv = RecvHandle::pending(|| Ok(vec![1, 2, 3]));
        assert_eq!(recv.wait().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn self_and_out_of_range_peers_rejected() {
        assert!(matches!(
            check_peer(1, 4, 1),
            Err(DistributedError::InvalidPeer { peer: 1, .. })
        ));
        assert!(matches!(
            check_peer(1, 4, 4),
            Err(DistributedError::InvalidPeer { peer: 4, .. })
        ));
        assert!(check_peer(1, 4, 0).is_ok());
    }
}
