use crate::buffer::{Buffer, HostElement};
use crate::device::DeviceKind;
use crate::error::OpError;
use crate::shape::{Shape, VarDesc};
use crate::types::DType;

/// A bound tensor: concrete dims, data type, device kind and storage.
///
/// Cloning is cheap, host data sits behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Tensor {
    shape: Vec<usize>,
    dtype: DType,
    device: DeviceKind,
    buffer: Buffer,
}

impl Tensor {
    /// Creates a host tensor from row-major data.
    ///
    /// # Errors
    /// Returns `OpError::TensorCreationError` if `data.len()` does not match the
    /// number of elements of `shape`.
    pub fn from_vec<T: HostElement>(data: Vec<T>, shape: Vec<usize>) -> Result<Self, OpError> {
        let numel: usize = shape.iter().product();
        if data.len() != numel {
            return Err(OpError::TensorCreationError {
                data_len: data.len(),
                shape,
            });
        }
        Ok(Tensor {
            shape,
            dtype: T::DTYPE,
            device: DeviceKind::CPU,
            buffer: Buffer::Cpu(T::wrap(data)),
        })
    }

    pub fn from_vec_f32(data: Vec<f32>, shape: Vec<usize>) -> Result<Self, OpError> {
        Self::from_vec(data, shape)
    }

    pub fn from_vec_f64(data: Vec<f64>, shape: Vec<usize>) -> Result<Self, OpError> {
        Self::from_vec(data, shape)
    }

    /// A metadata-only tensor. Enough for shape inference and dispatch, not for
    /// reading data.
    pub fn placeholder(shape: Vec<usize>, dtype: DType, device: DeviceKind) -> Self {
        Tensor {
            shape,
            dtype,
            device,
            buffer: Buffer::Released,
        }
    }

    /// A tensor whose storage lives in externally managed device memory.
    pub fn on_gpu(shape: Vec<usize>, dtype: DType) -> Self {
        let len = shape.iter().product();
        Tensor {
            shape,
            dtype,
            device: DeviceKind::GPU,
            buffer: Buffer::Gpu { len },
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> DeviceKind {
        self.device
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_materialized(&self) -> bool {
        self.buffer.is_materialized()
    }

    /// Shape/dtype descriptor with every dimension static.
    pub fn desc(&self) -> VarDesc {
        VarDesc::new(Shape::from_concrete(&self.shape), self.dtype)
    }

    /// Same metadata, contents dropped.
    pub fn released(&self) -> Tensor {
        Tensor::placeholder(self.shape.clone(), self.dtype, self.device)
    }

    /// Borrows host data as `&[T]`.
    ///
    /// # Errors
    /// Returns `OpError::InternalError` when the tensor is not a host tensor of
    /// element type `T`, or its contents were released.
    pub fn as_slice<T: HostElement>(&self) -> Result<&[T], OpError> {
        match &self.buffer {
            Buffer::Cpu(cpu) => T::slice(cpu).ok_or_else(|| {
                OpError::InternalError(format!(
                    "Tensor holds {} data, requested {}",
                    self.dtype,
                    T::DTYPE
                ))
            }),
            Buffer::Gpu { .. } => Err(OpError::InternalError(
                "Tensor data lives on GPU and cannot be read on the host".to_string(),
            )),
            Buffer::Released => Err(OpError::InternalError(
                "Tensor contents were released; only metadata is available".to_string(),
            )),
        }
    }

    /// Copies host data out as a `Vec<T>`.
    pub fn to_vec<T: HostElement>(&self) -> Result<Vec<T>, OpError> {
        self.as_slice::<T>().map(|s| s.to_vec())
    }
}

#[cfg(test)]
#[path = "tensor_test.rs"]
mod tests;
