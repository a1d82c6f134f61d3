//! Flat little-endian byte encoding for tensors on the peer links.
//!
//! A buffer travels as its flattened element bytes only; shape and dtype
//! are fixed by the collective call-site contract on both sides. Decoding
//! validates the payload length against that contract before building the
//! tensor.

use candle_core::{DType, Device, Tensor};
use half::{bf16, f16};

use super::error::{DistributedError, Result};

/// Encode a tensor as its flattened little-endian element bytes.
pub(crate) fn to_bytes(tensor: &Tensor) -> Result<Vec<u8>> {
    let flat = tensor.flatten_all()?;
    let mut buf = Vec::with_capacity(flat.elem_count() * flat.dtype().size_in_bytes());
    match flat.dtype() {
        DType::U8 => buf.extend_from_slice(&flat.to_vec1::<u8>()?),
        DType::U32 => {
            for x in flat.to_vec1::<u32>()? {
                buf.extend_from_slice(&x.to_le_bytes());
            }
        }
        DType::I64 => {
            for x in flat.to_vec1::<i64>()? {
                buf.extend_from_slice(&x.to_le_bytes());
            }
        }
        DType::F16 => {
            for x in flat.to_vec1::<f16>()? {
                buf.extend_from_slice(&x.to_le_bytes());
            }
        }
        DType::BF16 => {
            for x in flat.to_vec1::<bf16>()? {
                buf.extend_from_slice(&x.to_le_bytes());
            }
        }
        DType::F32 => {
            for x in flat.to_vec1::<f32>()? {
                buf.extend_from_slice(&x.to_le_bytes());
            }
        }
        DType::F64 => {
            for x in flat.to_vec1::<f64>()? {
                buf.extend_from_slice(&x.to_le_bytes());
            }
        }
    }
    Ok(buf)
}

/// Decode a flat payload back into a tensor of the contract shape/dtype.
pub(crate) fn from_bytes(
    bytes: &[u8],
    shape: &[usize],
    dtype: DType,
    device: &Device,
) -> Result<Tensor> {
    let elem_count: usize = shape.iter().product();
    let expected = elem_count * dtype.size_in_bytes();
    if bytes.len() != expected {
        return Err(DistributedError::PayloadSize {
            expected,
            actual: bytes.len(),
            shape: shape.to_vec(),
        });
    }

    let tensor = match dtype {
        DType::U8 => Tensor::from_vec(bytes.to_vec(), shape.to_vec(), device)?,
        DType::U32 => {
            let data: Vec<u32> = bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
                .collect();
            Tensor::from_vec(data, shape.to_vec(), device)?
        }
        DType::I64 => {
            let data: Vec<i64> = bytes
                .chunks_exact(8)
                .map(|c| i64::from_le_bytes(c.try_into().unwrap()))
                .collect();
            Tensor::from_vec(data, shape.to_vec(), device)?
        }
        DType::F16 => {
            let data: Vec<f16> = bytes
                .chunks_exact(2)
                .map(|c| f16::from_le_bytes(c.try_into().unwrap()))
                .collect();
            Tensor::from_vec(data, shape.to_vec(), device)?
        }
        DType::BF16 => {
            let data: Vec<bf16> = bytes
                .chunks_exact(2)
                .map(|c| bf16::from_le_bytes(c.try_into().unwrap()))
                .collect();
            Tensor::from_vec(data, shape.to_vec(), device)?
        }
        DType::F32 => {
            let data: Vec<f32> = bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
                .collect();
            Tensor::from_vec(data, shape.to_vec(), device)?
        }
        DType::F64 => {
            let data: Vec<f64> = bytes
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
                .collect();
            Tensor::from_vec(data, shape.to_vec(), device)?
        }
    };
    Ok(tensor)
}
