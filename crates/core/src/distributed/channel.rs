//! In-process mesh transport over `std::sync::mpsc`.
//!
//! One rank per thread, one unbounded channel per ordered rank pair. This
//! is the host-memory backend used by tests and by single-node callers that
//! drive ranks on threads; the cross-process equivalent is
//! [`TcpMesh`](super::tcp::TcpMesh).
//!
//! Sends complete at issue time (the queue is unbounded), so a
//! [`SendHandle`] from this mesh is always immediately ready. Message order
//! per link is FIFO.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

use super::error::{DistributedError, Result};
use super::process_group::ProcessGroup;
use super::transport::{check_peer, PeerChannel, RecvHandle, SendHandle};

/// One rank's handle to an in-process full mesh.
pub struct ChannelMesh {
    rank: usize,
    world_size: usize,
    /// Sender toward each peer; own slot is `None`.
    to_peer: Vec<Option<Sender<Vec<u8>>>>,
    /// Receiver from each peer; own slot is `None`.
    from_peer: Vec<Option<Arc<Mutex<Receiver<Vec<u8>>>>>>,
}

impl ChannelMesh {
    /// Build a full mesh for `world_size` ranks and return one handle per
    /// rank, indexed by rank. Handles are moved onto their rank's thread.
    ///
    /// # Panics
    /// Panics if `world_size` is 0.
    pub fn mesh(world_size: usize) -> Vec<ChannelMesh> {
        assert!(world_size > 0, "world_size must be > 0");

        // links[src][dst] carries src -> dst traffic.
        let mut senders: Vec<Vec<Option<Sender<Vec<u8>>>>> = (0..world_size)
            .map(|_| (0..world_size).map(|_| None).collect())
            .collect();
        let mut receivers: Vec<Vec<Option<Arc<Mutex<Receiver<Vec<u8>>>>>>> = (0..world_size)
            .map(|_| (0..world_size).map(|_| None).collect())
            .collect();

        for src in 0..world_size {
            for dst in 0..world_size {
                if src == dst {
                    continue;
                }
                let (tx, rx) = channel();
                senders[src][dst] = Some(tx);
                receivers[dst][src] = Some(Arc::new(Mutex::new(rx)));
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (to_peer, from_peer))| ChannelMesh {
                rank,
                world_size,
                to_peer,
                from_peer,
            })
            .collect()
    }
}

impl ProcessGroup for ChannelMesh {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn local_rank(&self) -> usize {
        self.rank
    }
}

impl PeerChannel for ChannelMesh {
    fn isend(&self, peer: usize, payload: Vec<u8>) -> Result<SendHandle> {
        check_peer(self.rank, self.world_size, peer)?;
        let sender = self.to_peer[peer]
            .as_ref()
            .expect("mesh invariant: non-self slot populated");
        sender
            .send(payload)
            .map_err(|_| DistributedError::ChannelClosed { peer })?;
        Ok(SendHandle::ready())
    }

    fn irecv(&self, peer: usize) -> Result<RecvHandle> {
        check_peer(self.rank, self.world_size, peer)?;
        let receiver = Arc::clone(
            self.from_peer[peer]
                .as_ref()
                .expect("mesh invariant: non-self slot populated"),
        );
        Ok(RecvHandle::pending(move || {
            receiver
                .lock()
                .unwrap()
                .recv()
                .map_err(|_| DistributedError::ChannelClosed { peer })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn pairwise_exchange() {
        let mut ranks = ChannelMesh::mesh(2);
        let b = ranks.pop().unwrap();
        let a = ranks.pop().unwrap();

        let handle = thread::spawn(move || {
            let send = b.isend(0, vec![1, 1]).unwrap();
            let got = b.irecv(0).unwrap().wait().unwrap();
            send.wait().unwrap();
            got
        });

        let send = a.isend(1, vec![0, 0]).unwrap();
        let got = a.irecv(1).unwrap().wait().unwrap();
        send.wait().unwrap();

        assert_eq!(got, vec![1, 1]);
        assert_eq!(handle.join().unwrap(), vec![0, 0]);
    }

    #[test]
    fn send_to_self_is_invalid() {
        let mut ranks = ChannelMesh::mesh(2);
        let a = ranks.remove(0);
        assert!(matches!(
            a.isend(0, vec![]),
            Err(DistributedError::InvalidPeer { peer: 0, .. })
        ));
    }

    #[test]
    fn recv_from_dropped_peer_reports_closed_channel() {
        let mut ranks = ChannelMesh::mesh(2);
        let b = ranks.pop().unwrap();
        drop(ranks); // rank 0 gone without sending anything

        let err = b.irecv(0).unwrap().wait().unwrap_err();
        assert!(matches!(err, DistributedError::ChannelClosed { peer: 0 }));
    }

    #[test]
    fn all_gather_collects_by_rank() {
        let ranks = ChannelMesh::mesh(3);
        let handles: Vec<_> = ranks
            .into_iter()
            .map(|mesh| {
                thread::spawn(move || {
                    let payload = vec![mesh.rank() as u8];
                    mesh.all_gather(payload).unwrap()
                })
            })
            .collect();

        for handle in handles {
            let gathered = handle.join().unwrap();
            assert_eq!(gathered, vec![vec![0], vec![1], vec![2]]);
        }
    }

    #[test]
    fn barrier_releases_all_ranks() {
        let ranks = ChannelMesh::mesh(4);
        let handles: Vec<_> = ranks
            .into_iter()
            .map(|mesh| thread::spawn(move || mesh.barrier().unwrap()))
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn single_rank_mesh_gathers_itself() {
        let mesh = ChannelMesh::mesh(1).pop().unwrap();
        assert_eq!(mesh.all_gather(vec![7]).unwrap(), vec![vec![7]]);
    }
}
