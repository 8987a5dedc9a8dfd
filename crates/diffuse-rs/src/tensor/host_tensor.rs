//! Host-backed tensor used by the eager path, the bridge, and tests.

use std::sync::Arc;

use anyhow::{bail, Result};
use rand::Rng;

use super::{dtype::DType, shape::Shape};

/// Host tensor with reference-counted storage.
///
/// Cloning shares the underlying buffer, which is what lets the bridge move
/// values across the eager/compiled boundary without copying payload bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    data: TensorData,
}

#[derive(Debug, Clone, PartialEq)]
enum TensorData {
    F32(Arc<Vec<f32>>),
    I64(Arc<Vec<i64>>),
}

impl Tensor {
    /// Constructs an `F32` tensor from raw values, validating the length against the shape.
    pub fn from_vec(shape: Shape, data: Vec<f32>) -> Result<Self> {
        if data.len() != shape.num_elements() {
            bail!(
                "tensor data length ({}) does not match shape {:?}",
                data.len(),
                shape.dims()
            );
        }
        Ok(Tensor {
            shape,
            data: TensorData::F32(Arc::new(data)),
        })
    }

    /// Constructs an `I64` tensor, validating the length against the shape.
    pub fn from_i64(shape: Shape, data: Vec<i64>) -> Result<Self> {
        if data.len() != shape.num_elements() {
            bail!(
                "tensor data length ({}) does not match shape {:?}",
                data.len(),
                shape.dims()
            );
        }
        Ok(Tensor {
            shape,
            data: TensorData::I64(Arc::new(data)),
        })
    }

    /// Single-element `I64` tensor, the usual carrier for diffusion timesteps.
    pub fn scalar_i64(value: i64) -> Self {
        Tensor {
            shape: Shape::new(vec![1]),
            data: TensorData::I64(Arc::new(vec![value])),
        }
    }

    /// Returns a zero-initialized `F32` tensor of the requested shape.
    pub fn zeros(shape: Shape) -> Self {
        let len = shape.num_elements();
        Tensor {
            shape,
            data: TensorData::F32(Arc::new(vec![0.0; len])),
        }
    }

    /// Returns a zero-initialized tensor of the requested shape and dtype.
    pub fn zeros_with(shape: Shape, dtype: DType) -> Self {
        let len = shape.num_elements();
        let data = match dtype {
            DType::F32 => TensorData::F32(Arc::new(vec![0.0; len])),
            DType::I64 => TensorData::I64(Arc::new(vec![0; len])),
        };
        Tensor { shape, data }
    }

    /// Samples from `N(0, std^2)` using the Box-Muller transform.
    pub fn randn(shape: Shape, std: f32, rng: &mut impl Rng) -> Self {
        let len = shape.num_elements();
        let mut values = Vec::with_capacity(len);
        while values.len() < len {
            let u1: f32 = rng.gen::<f32>().max(f32::MIN_POSITIVE);
            let u2: f32 = rng.gen::<f32>();
            let r = (-2.0 * u1.ln()).sqrt();
            let theta = 2.0 * std::f32::consts::PI * u2;
            values.push(r * theta.cos() * std);
            if values.len() < len {
                values.push(r * theta.sin() * std);
            }
        }
        Tensor {
            shape,
            data: TensorData::F32(Arc::new(values)),
        }
    }

    /// Provides access to the tensor shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the scalar dtype of the tensor payload.
    pub fn dtype(&self) -> DType {
        match self.data {
            TensorData::F32(_) => DType::F32,
            TensorData::I64(_) => DType::I64,
        }
    }

    /// Returns the total number of elements stored in the tensor.
    pub fn len(&self) -> usize {
        self.shape.num_elements()
    }

    /// Reports whether the tensor contains zero elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrows the underlying `f32` data slice, panicking if the dtype differs.
    pub fn data(&self) -> &[f32] {
        match &self.data {
            TensorData::F32(values) => values,
            TensorData::I64(_) => panic!("tensor data is not stored as f32"),
        }
    }

    /// Borrows the underlying `i64` data slice, panicking if the dtype differs.
    pub fn data_i64(&self) -> &[i64] {
        match &self.data {
            TensorData::I64(values) => values,
            TensorData::F32(_) => panic!("tensor data is not stored as i64"),
        }
    }

    /// Applies `f` elementwise to an `F32` tensor, producing a fresh tensor.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Result<Self> {
        match &self.data {
            TensorData::F32(values) => Tensor::from_vec(
                self.shape.clone(),
                values.iter().copied().map(f).collect(),
            ),
            TensorData::I64(_) => bail!("map requires an f32 tensor"),
        }
    }

    /// Serializes the payload as little-endian bytes for the state format.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match &self.data {
            TensorData::F32(values) => {
                let mut bytes = Vec::with_capacity(values.len() * 4);
                for value in values.iter() {
                    bytes.extend_from_slice(&value.to_le_bytes());
                }
                bytes
            }
            TensorData::I64(values) => {
                let mut bytes = Vec::with_capacity(values.len() * 8);
                for value in values.iter() {
                    bytes.extend_from_slice(&value.to_le_bytes());
                }
                bytes
            }
        }
    }

    /// Reconstructs a tensor from little-endian bytes written by [`Tensor::to_le_bytes`].
    pub fn from_le_bytes(shape: Shape, dtype: DType, bytes: &[u8]) -> Result<Self> {
        let expected = shape.num_elements() * dtype.size_in_bytes();
        if bytes.len() != expected {
            bail!(
                "tensor payload is {} bytes, expected {} for shape {:?} and dtype {:?}",
                bytes.len(),
                expected,
                shape.dims(),
                dtype
            );
        }
        match dtype {
            DType::F32 => {
                let data = bytes
                    .chunks_exact(4)
                    .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                    .collect();
                Tensor::from_vec(shape, data)
            }
            DType::I64 => {
                let data = bytes
                    .chunks_exact(8)
                    .map(|chunk| {
                        i64::from_le_bytes([
                            chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6],
                            chunk[7],
                        ])
                    })
                    .collect();
                Tensor::from_i64(shape, data)
            }
        }
    }
}
