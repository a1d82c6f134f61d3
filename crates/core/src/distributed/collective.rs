//! Ring collectives over a peer transport.
//!
//! The [`Communicator`] combines (reduce) or collects (gather) per-rank
//! tensors across all ranks of a process group. It holds no state between
//! calls beyond the transport handle; every operation is self-contained.
//!
//! All ranks participating in one collective call must supply tensors of
//! identical shape and dtype. That is a call-site contract, not something
//! negotiated per message; a violation surfaces as a payload-size error on
//! the receiving side.

use candle_core::Tensor;

use super::error::{DistributedError, Result};
use super::process_group::ProcessGroup;
use super::transport::PeerChannel;
use super::wire;

/// Reduction operations for collective primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// Element-wise sum.
    Sum,
    /// Element-wise product.
    Product,
    /// Element-wise maximum.
    Max,
    /// Element-wise minimum.
    Min,
}

impl ReduceOp {
    /// Combine two tensors of identical shape/dtype element-wise.
    fn combine(self, accum: &Tensor, incoming: &Tensor) -> Result<Tensor> {
        let out = match self {
            Self::Sum => accum.add(incoming)?,
            Self::Product => accum.mul(incoming)?,
            Self::Max => accum.maximum(incoming)?,
            Self::Min => accum.minimum(incoming)?,
        };
        Ok(out)
    }
}

/// Collective communicator over a full-mesh peer transport.
///
/// Operations are synchronous and blocking from the calling rank's
/// perspective; a hang in one rank hangs every rank waiting on it. This
/// layer adds no timeout or cancellation of its own.
pub struct Communicator<C: PeerChannel> {
    channel: C,
}

impl<C: PeerChannel> Communicator<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    /// The underlying transport / process group.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn rank(&self) -> usize {
        self.channel.rank()
    }

    pub fn world_size(&self) -> usize {
        self.channel.world_size()
    }

    /// Ring all-reduce: overwrite `tensor` in place with the reduction of
    /// every rank's tensor under `op`.
    ///
    /// Ranks are arranged in a ring by index. For `world_size - 1`
    /// iterations each rank sends its relay payload right and receives one
    /// from the left, folding the received tensor into an accumulator. The
    /// ring schedule is deterministic per call; the combine order is
    /// schedule-defined, so floating-point results agree across ranks only
    /// up to reassociation.
    ///
    /// The relay payload is never aliased with an in-flight send: the
    /// transport receives its own copy of the bytes, and the send handle is
    /// waited on before the just-received buffer becomes the next relay.
    ///
    /// On a communication error the tensor's state is undefined and it must
    /// not be reused; the group has to be re-established before retrying.
    pub fn reduce(&self, tensor: &mut Tensor, op: ReduceOp) -> Result<()> {
        let world_size = self.channel.world_size();
        if world_size == 1 {
            return Ok(());
        }

        let shape = tensor.dims().to_vec();
        let dtype = tensor.dtype();
        let device = tensor.device().clone();
        let left = self.channel.left_neighbor();
        let right = self.channel.right_neighbor();

        let mut accum = tensor.clone();
        let mut relay = wire::to_bytes(tensor)?;

        for _ in 1..world_size {
            let send = self.channel.isend(right, relay.clone())?;
            let recv = self.channel.irecv(left)?;

            let received = recv.wait()?;
            send.wait()?;

            let incoming = wire::from_bytes(&received, &shape, dtype, &device)?;
            accum = op.combine(&accum, &incoming)?;
            relay = received;
        }

        *tensor = accum;
        Ok(())
    }

    /// All-reduce via the transport's native gather primitive.
    ///
    /// Same contract as [`reduce`](Self::reduce), opaque algorithm: the
    /// transport collects every rank's tensor and the reduction is folded in
    /// rank order. Backends with a true native reduction override the gather
    /// primitive; the combine order here differs from the ring schedule,
    /// which is within the implementation-defined contract.
    pub fn reduce_native(&self, tensor: &mut Tensor, op: ReduceOp) -> Result<()> {
        if self.channel.is_single() {
            return Ok(());
        }

        let shape = tensor.dims().to_vec();
        let dtype = tensor.dtype();
        let device = tensor.device().clone();

        let gathered = self.channel.all_gather(wire::to_bytes(tensor)?)?;

        let mut accum: Option<Tensor> = None;
        for payload in &gathered {
            let incoming = wire::from_bytes(payload, &shape, dtype, &device)?;
            accum = Some(match accum {
                None => incoming,
                Some(acc) => op.combine(&acc, &incoming)?,
            });
        }

        // world_size >= 1, so the fold saw at least one payload.
        *tensor = accum.expect("all_gather returned no payloads");
        Ok(())
    }

    /// Chunked all-gather: fill `out` with every rank's tensor, indexed by
    /// rank. The local rank's slot receives its own input unchanged.
    ///
    /// `out` must hold exactly `world_size` slots; a mismatch fails with a
    /// configuration error before anything is put on the wire.
    ///
    /// Host tensors travel as a flattened view and are reshaped back on
    /// arrival; accelerator tensors are decoded straight onto their device
    /// at full shape. Both paths produce identical logical results.
    pub fn gather(&self, tensor: &Tensor, out: &mut [Tensor]) -> Result<()> {
        let world_size = self.channel.world_size();
        if out.len() != world_size {
            return Err(DistributedError::GatherDestination {
                expected: world_size,
                actual: out.len(),
            });
        }

        let rank = self.channel.rank();
        if world_size == 1 {
            out[0] = tensor.clone();
            return Ok(());
        }

        let shape = tensor.dims().to_vec();
        let dtype = tensor.dtype();
        let device = tensor.device().clone();

        let gathered = self.channel.all_gather(wire::to_bytes(tensor)?)?;

        if device.is_cuda() || device.is_metal() {
            // Device path: one decode per segment, placed at full shape.
            for (peer, payload) in gathered.iter().enumerate() {
                if peer == rank {
                    continue;
                }
                out[peer] = wire::from_bytes(payload, &shape, dtype, &device)?;
            }
        } else {
            // Host path: rebuild the flat view, then reshape to the
            // call-site shape.
            let elem_count: usize = shape.iter().product();
            for (peer, payload) in gathered.iter().enumerate() {
                if peer == rank {
                    continue;
                }
                let flat = wire::from_bytes(payload, &[elem_count], dtype, &device)?;
                out[peer] = flat.reshape(shape.clone())?;
            }
        }

        out[rank] = tensor.clone();
        Ok(())
    }
}
