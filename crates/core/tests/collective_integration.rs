//! End-to-end collective tests over both transports.
//!
//! Drives the public API only: ranks on threads exchanging real tensors
//! through an in-process mesh and through TCP sockets on loopback.

use std::net::TcpListener;
use std::thread;

use candle_core::{DType, Device, Tensor};
use tensorlink_core::distributed::{
    ChannelMesh, Communicator, DistributedConfig, ProcessGroup, ReduceOp, TcpMesh,
};

fn free_port() -> u16 {
    TcpListener::bind(("127.0.0.1", 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn scalar(tensor: &Tensor) -> f32 {
    tensor.to_vec1::<f32>().unwrap()[0]
}

#[test]
fn ring_reduce_over_tcp_loopback() {
    let port = free_port();
    let world_size = 3;

    let handles: Vec<_> = (0..world_size)
        .map(|rank| {
            thread::spawn(move || {
                let config =
                    DistributedConfig::new(rank, world_size, rank, "127.0.0.1", port).unwrap();
                let comm = Communicator::new(TcpMesh::rendezvous(&config).unwrap());

                let mut tensor = Tensor::new(&[rank as f32], &Device::Cpu).unwrap();
                comm.reduce(&mut tensor, ReduceOp::Sum).unwrap();
                scalar(&tensor)
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 3.0);
    }
}

#[test]
fn gather_over_tcp_matches_rank_order() {
    let port = free_port();
    let world_size = 3;

    let handles: Vec<_> = (0..world_size)
        .map(|rank| {
            thread::spawn(move || {
                let config =
                    DistributedConfig::new(rank, world_size, rank, "127.0.0.1", port).unwrap();
                let comm = Communicator::new(TcpMesh::rendezvous(&config).unwrap());

                let tensor = Tensor::new(&[rank as f32, -(rank as f32)], &Device::Cpu).unwrap();
                let mut out =
                    vec![Tensor::zeros(2, DType::F32, &Device::Cpu).unwrap(); world_size];
                comm.gather(&tensor, &mut out).unwrap();
                out.iter()
                    .map(|t| t.to_vec1::<f32>().unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for handle in handles {
        let gathered = handle.join().unwrap();
        assert_eq!(
            gathered,
            vec![vec![0.0, -0.0], vec![1.0, -1.0], vec![2.0, -2.0]]
        );
    }
}

#[test]
fn reduce_then_gather_compose_over_channel_mesh() {
    let world_size = 4;
    let expected_sum: f32 = (0..world_size).map(|r| r as f32).sum();

    let handles: Vec<_> = ChannelMesh::mesh(world_size)
        .into_iter()
        .map(|mesh| {
            thread::spawn(move || {
                let rank = mesh.rank();
                let comm = Communicator::new(mesh);

                let mut tensor = Tensor::new(&[rank as f32], &Device::Cpu).unwrap();
                comm.reduce(&mut tensor, ReduceOp::Sum).unwrap();

                let mut out =
                    vec![Tensor::zeros(1, DType::F32, &Device::Cpu).unwrap(); world_size];
                comm.gather(&tensor, &mut out).unwrap();
                out.iter().map(scalar).collect::<Vec<_>>()
            })
        })
        .collect();

    // After the reduce every rank holds the same sum, so the gather must
    // yield world_size copies of it at every rank.
    for handle in handles {
        assert_eq!(handle.join().unwrap(), vec![expected_sum; world_size]);
    }
}
