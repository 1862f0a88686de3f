use std::fmt::Debug;
use std::sync::Arc;

use num_traits::Float;

use crate::types::DType;

/// Storage behind a [`Tensor`](crate::tensor::Tensor).
///
/// The operator core never allocates these itself: kernels produce them and the
/// execution scope owns them. The core only reads tensor metadata, except when
/// it releases a no-need-buffer variable.
#[derive(Debug, Clone)]
pub enum Buffer {
    /// Data resides on the host.
    Cpu(CpuBuffer),
    /// Placeholder for device memory managed outside this crate.
    Gpu { len: usize },
    /// Contents were dropped (or never materialized); only metadata remains.
    Released,
}

/// Host buffers, one variant per element type that has host kernels.
#[derive(Debug, Clone)]
pub enum CpuBuffer {
    F32(Arc<Vec<f32>>),
    F64(Arc<Vec<f64>>),
}

impl Buffer {
    pub fn is_materialized(&self) -> bool {
        !matches!(self, Buffer::Released)
    }
}

/// Element types that can live in a [`CpuBuffer`]. Host kernels are written
/// once, generically over this trait.
pub trait HostElement: Float + Debug + Send + Sync + 'static {
    const DTYPE: DType;

    fn slice(buffer: &CpuBuffer) -> Option<&[Self]>;

    fn wrap(data: Vec<Self>) -> CpuBuffer;
}

impl HostElement for f32 {
    const DTYPE: DType = DType::F32;

    fn slice(buffer: &CpuBuffer) -> Option<&[Self]> {
        match buffer {
            CpuBuffer::F32(data) => Some(data.as_slice()),
            _ => None,
        }
    }

    fn wrap(data: Vec<Self>) -> CpuBuffer {
        CpuBuffer::F32(Arc::new(data))
    }
}

impl HostElement for f64 {
    const DTYPE: DType = DType::F64;

    fn slice(buffer: &CpuBuffer) -> Option<&[Self]> {
        match buffer {
            CpuBuffer::F64(data) => Some(data.as_slice()),
            _ => None,
        }
    }

    fn wrap(data: Vec<Self>) -> CpuBuffer {
        CpuBuffer::F64(Arc::new(data))
    }
}
