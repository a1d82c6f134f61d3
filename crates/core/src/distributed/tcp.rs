//! Cross-process mesh transport over TCP.
//!
//! Ranks rendezvous through rank 0: every rank binds a mesh listener on an
//! ephemeral port, enrolls its address with the master, and receives the
//! full address table back. The socket mesh is then built pairwise, each
//! rank connecting to lower ranks and accepting from higher ones.
//!
//! Frames on every link are length-prefixed (little-endian u64). Outbound
//! traffic to each peer is serviced by a dedicated writer thread, so a rank
//! can genuinely have a send and a receive in flight at once; completion
//! handles are fulfilled through `mpsc` channels.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{DistributedError, Result};
use super::launcher::DistributedConfig;
use super::process_group::ProcessGroup;
use super::transport::{check_peer, PeerChannel, RecvHandle, SendHandle};

const CONNECT_RETRIES: usize = 30;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

/// Rendezvous enrollment: a rank announcing where its mesh listener lives.
#[derive(Debug, Serialize, Deserialize)]
struct Enroll {
    rank: usize,
    addr: String,
}

/// Rendezvous reply: every rank's mesh address, indexed by rank.
#[derive(Debug, Serialize, Deserialize)]
struct AddressTable {
    addrs: Vec<String>,
}

/// Link handshake: the connecting rank identifying itself.
#[derive(Debug, Serialize, Deserialize)]
struct Peer {
    rank: usize,
}

fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> std::io::Result<()> {
    stream.write_all(&(payload.len() as u64).to_le_bytes())?;
    stream.write_all(payload)
}

fn read_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut len = [0u8; 8];
    stream.read_exact(&mut len)?;
    let mut payload = vec![0u8; u64::from_le_bytes(len) as usize];
    stream.read_exact(&mut payload)?;
    Ok(payload)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| DistributedError::Rendezvous(format!("frame encode failed: {e}")))
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| DistributedError::Rendezvous(format!("frame decode failed: {e}")))
}

fn connect_with_retry(addr: &str) -> Result<TcpStream> {
    for attempt in 0..CONNECT_RETRIES {
        match TcpStream::connect(addr) {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt < CONNECT_RETRIES - 1 => {
                tracing::trace!(attempt, addr = %addr, error = %e, "retrying connection");
                thread::sleep(CONNECT_BACKOFF);
            }
            Err(e) => {
                return Err(DistributedError::Rendezvous(format!(
                    "failed to connect to {addr} after {CONNECT_RETRIES} attempts: {e}"
                )));
            }
        }
    }
    unreachable!()
}

/// One send queued onto a peer's writer thread.
struct Outbound {
    payload: Vec<u8>,
    done: Sender<Result<()>>,
}

fn spawn_writer(mut stream: TcpStream, queue: Receiver<Outbound>) -> JoinHandle<()> {
    thread::spawn(move || {
        for Outbound { payload, done } in queue {
            let result = write_frame(&mut stream, &payload).map_err(DistributedError::Io);
            // The handle may have been dropped without waiting.
            let _ = done.send(result);
        }
    })
}

/// One rank's handle to a full mesh of TCP links across processes.
pub struct TcpMesh {
    rank: usize,
    world_size: usize,
    local_rank: usize,
    /// Read side of the link to each peer; own slot is `None`.
    readers: Vec<Option<Arc<Mutex<TcpStream>>>>,
    /// Outbound queue toward each peer's writer thread; own slot is `None`.
    writers: Vec<Option<Sender<Outbound>>>,
    writer_threads: Vec<JoinHandle<()>>,
}

impl TcpMesh {
    /// Rendezvous through rank 0 and build the socket mesh.
    ///
    /// Blocks until every rank has enrolled and every pairwise link is
    /// established. Connection attempts retry with a fixed backoff; a rank
    /// that never shows up surfaces as a rendezvous error once the retries
    /// are exhausted.
    pub fn rendezvous(config: &DistributedConfig) -> Result<Self> {
        if config.world_size == 1 {
            return Ok(Self {
                rank: 0,
                world_size: 1,
                local_rank: config.local_rank,
                readers: vec![None],
                writers: vec![None],
                writer_threads: Vec::new(),
            });
        }

        let listener = TcpListener::bind(("0.0.0.0", 0))?;
        let mesh_port = listener.local_addr()?.port();

        let addrs = if config.rank == 0 {
            serve_address_table(config, mesh_port)?
        } else {
            enroll_with_master(config, mesh_port)?
        };

        tracing::debug!(
            rank = config.rank,
            world_size = config.world_size,
            "address table exchanged, building mesh links"
        );

        let mut links: Vec<Option<TcpStream>> = (0..config.world_size).map(|_| None).collect();

        // Connect to lower ranks, identifying ourselves on each link.
        for peer in 0..config.rank {
            let mut stream = connect_with_retry(&addrs[peer])?;
            stream.set_nodelay(true)?;
            write_frame(&mut stream, &encode(&Peer { rank: config.rank })?)?;
            links[peer] = Some(stream);
        }

        // Accept from higher ranks; the handshake frame says which.
        for _ in config.rank + 1..config.world_size {
            let (mut stream, _) = listener.accept()?;
            stream.set_nodelay(true)?;
            let peer: Peer = decode(&read_frame(&mut stream)?)?;
            if peer.rank <= config.rank || peer.rank >= config.world_size {
                return Err(DistributedError::Rendezvous(format!(
                    "unexpected link handshake from rank {}",
                    peer.rank
                )));
            }
            if links[peer.rank].is_some() {
                return Err(DistributedError::Rendezvous(format!(
                    "duplicate link from rank {}",
                    peer.rank
                )));
            }
            links[peer.rank] = Some(stream);
        }

        let mut readers = Vec::with_capacity(config.world_size);
        let mut writers = Vec::with_capacity(config.world_size);
        let mut writer_threads = Vec::with_capacity(config.world_size - 1);
        for link in links {
            match link {
                Some(stream) => {
                    let write_half = stream.try_clone()?;
                    let (tx, rx) = channel();
                    writer_threads.push(spawn_writer(write_half, rx));
                    readers.push(Some(Arc::new(Mutex::new(stream))));
                    writers.push(Some(tx));
                }
                None => {
                    readers.push(None);
                    writers.push(None);
                }
            }
        }

        tracing::info!(
            rank = config.rank,
            world_size = config.world_size,
            "tcp mesh established"
        );

        Ok(Self {
            rank: config.rank,
            world_size: config.world_size,
            local_rank: config.local_rank,
            readers,
            writers,
            writer_threads,
        })
    }
}

/// Rank 0: collect every rank's mesh address, then serve the full table.
fn serve_address_table(config: &DistributedConfig, mesh_port: u16) -> Result<Vec<String>> {
    let listener = TcpListener::bind(("0.0.0.0", config.master_port)).map_err(|e| {
        DistributedError::Rendezvous(format!(
            "failed to bind master port {}: {e}",
            config.master_port
        ))
    })?;

    tracing::debug!(port = config.master_port, "master listening for enrollments");

    let mut addrs = vec![String::new(); config.world_size];
    // Peers reach rank 0 at the same host they rendezvoused with.
    addrs[0] = format!("{}:{}", config.master_addr, mesh_port);

    let mut enrolled: Vec<TcpStream> = Vec::with_capacity(config.world_size - 1);
    while enrolled.len() < config.world_size - 1 {
        let (mut stream, from) = listener.accept()?;
        let enroll: Enroll = decode(&read_frame(&mut stream)?)?;
        if enroll.rank == 0 || enroll.rank >= config.world_size {
            return Err(DistributedError::Rendezvous(format!(
                "enrollment from invalid rank {} (world_size {})",
                enroll.rank, config.world_size
            )));
        }
        if !addrs[enroll.rank].is_empty() {
            return Err(DistributedError::Rendezvous(format!(
                "rank {} enrolled twice",
                enroll.rank
            )));
        }
        tracing::trace!(rank = enroll.rank, addr = %enroll.addr, from = %from, "rank enrolled");
        addrs[enroll.rank] = enroll.addr;
        enrolled.push(stream);
    }

    let table = encode(&AddressTable {
        addrs: addrs.clone(),
    })?;
    for stream in enrolled.iter_mut() {
        write_frame(stream, &table)?;
    }

    tracing::debug!(count = config.world_size - 1, "address table served");
    Ok(addrs)
}

/// Ranks 1..: enroll the local mesh listener and read the table back.
fn enroll_with_master(config: &DistributedConfig, mesh_port: u16) -> Result<Vec<String>> {
    let master = format!("{}:{}", config.master_addr, config.master_port);
    let mut stream = connect_with_retry(&master)?;

    // The address peers can reach us at is the one this connection came from.
    let local_ip = stream.local_addr()?.ip();
    write_frame(
        &mut stream,
        &encode(&Enroll {
            rank: config.rank,
            addr: format!("{local_ip}:{mesh_port}"),
        })?,
    )?;

    let table: AddressTable = decode(&read_frame(&mut stream)?)?;
    if table.addrs.len() != config.world_size {
        return Err(DistributedError::Rendezvous(format!(
            "address table holds {} entries, world_size is {}",
            table.addrs.len(),
            config.world_size
        )));
    }
    Ok(table.addrs)
}

impl ProcessGroup for TcpMesh {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn local_rank(&self) -> usize {
        self.local_rank
    }
}

impl PeerChannel for TcpMesh {
    fn isend(&self, peer: usize, payload: Vec<u8>) -> Result<SendHandle> {
        check_peer(self.rank, self.world_size, peer)?;
        let queue = self.writers[peer]
            .as_ref()
            .expect("mesh invariant: non-self slot populated");
        let (done_tx, done_rx) = channel();
        queue
            .send(Outbound {
                payload,
                done: done_tx,
            })
            .map_err(|_| DistributedError::ChannelClosed { peer })?;
        Ok(SendHandle::pending(move || {
            done_rx
                .recv()
                .map_err(|_| DistributedError::ChannelClosed { peer })?
        }))
    }

    fn irecv(&self, peer: usize) -> Result<RecvHandle> {
        check_peer(self.rank, self.world_size, peer)?;
        let stream = Arc::clone(
            self.readers[peer]
                .as_ref()
                .expect("mesh invariant: non-self slot populated"),
        );
        Ok(RecvHandle::pending(move || {
            let mut guard = stream.lock().unwrap();
            read_frame(&mut guard).map_err(DistributedError::Io)
        }))
    }
}

impl Drop for TcpMesh {
    fn drop(&mut self) {
        // Closing the queues lets the writer threads drain and exit.
        self.writers.clear();
        for handle in self.writer_threads.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_port() -> u16 {
        TcpListener::bind(("127.0.0.1", 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn loopback_config(rank: usize, world_size: usize, port: u16) -> DistributedConfig {
        DistributedConfig::new(rank, world_size, rank, "127.0.0.1", port).unwrap()
    }

    #[test]
    fn single_rank_mesh_needs_no_sockets() {
        let config = DistributedConfig::single_process();
        let mesh = TcpMesh::rendezvous(&config).unwrap();
        assert_eq!(mesh.world_size(), 1);
        assert_eq!(mesh.all_gather(vec![9]).unwrap(), vec![vec![9]]);
    }

    #[test]
    fn rendezvous_and_all_gather_over_loopback() {
        let port = free_port();
        let world_size = 3;

        let handles: Vec<_> = (0..world_size)
            .map(|rank| {
                thread::spawn(move || {
                    let mesh =
                        TcpMesh::rendezvous(&loopback_config(rank, world_size, port)).unwrap();
                    mesh.all_gather(vec![rank as u8]).unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), vec![vec![0], vec![1], vec![2]]);
        }
    }

    #[test]
    fn pairwise_send_and_receive_overlap() {
        let port = free_port();

        let peer = thread::spawn(move || {
            let mesh = TcpMesh::rendezvous(&loopback_config(1, 2, port)).unwrap();
            let send = mesh.isend(0, vec![1; 64]).unwrap();
            let got = mesh.irecv(0).unwrap().wait().unwrap();
            send.wait().unwrap();
            got
        });

        let mesh = TcpMesh::rendezvous(&loopback_config(0, 2, port)).unwrap();
        let send = mesh.isend(1, vec![0; 64]).unwrap();
        let got = mesh.irecv(1).unwrap().wait().unwrap();
        send.wait().unwrap();

        assert_eq!(got, vec![1; 64]);
        assert_eq!(peer.join().unwrap(), vec![0; 64]);
    }

    #[test]
    fn barrier_over_loopback() {
        let port = free_port();
        let world_size = 4;

        let handles: Vec<_> = (0..world_size)
            .map(|rank| {
                thread::spawn(move || {
                    let mesh =
                        TcpMesh::rendezvous(&loopback_config(rank, world_size, port)).unwrap();
                    mesh.barrier().unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
