//! # Loss Functions
//!
//! Element-wise losses followed by a [`Reduction`](crate::ops::Reduction).
//! Each loss ships a forward and a `_grad` operator type with CPU kernels for
//! `float32` and `float64`.

use crate::buffer::HostElement;
use crate::error::{OpError, SchemaViolationKind};
use crate::infer_shape::InferShapeContext;
use crate::ops::reduction::{Reduction, REDUCTION_ATTR};
use crate::tensor::Tensor;

pub mod kldiv_loss;
pub mod mse_loss;

/// Parses the `reduction` attribute during shape inference. Values outside
/// `allowed` are rejected with the allowed set attached.
pub(crate) fn reduction_for_inference(
    ctx: &InferShapeContext<'_>,
    allowed: &[&str],
) -> Result<Reduction, OpError> {
    let value = ctx.attr_str(REDUCTION_ATTR)?;
    let invalid = || {
        OpError::schema(
            ctx.op_type(),
            SchemaViolationKind::InvalidAttributeValue {
                name: REDUCTION_ATTR.to_string(),
                value: value.to_string(),
                allowed: allowed.iter().map(|a| a.to_string()).collect(),
            },
        )
    };
    if !allowed.contains(&value) {
        return Err(invalid());
    }
    value.parse().map_err(|_| invalid())
}

/// Host data of a kernel input; any storage problem becomes a `KernelFailure`.
pub(crate) fn host_data<'t, T: HostElement>(
    op_type: &str,
    slot: &str,
    tensor: &'t Tensor,
) -> Result<&'t [T], OpError> {
    tensor
        .as_slice::<T>()
        .map_err(|e| OpError::kernel_failure(op_type, format!("input '{}': {}", slot, e)))
}

/// Size of dimension 0, the batch size for `batchmean`.
pub(crate) fn batch_size(shape: &[usize]) -> usize {
    shape.first().copied().unwrap_or(1)
}

/// Checks that an upstream loss gradient matches the loss shape implied by
/// `reduction` for an input with `numel` elements.
pub(crate) fn check_loss_grad_len(
    op_type: &str,
    reduction: Reduction,
    numel: usize,
    grad_len: usize,
) -> Result<(), OpError> {
    let expected = match reduction {
        Reduction::None => numel,
        _ => 1,
    };
    if grad_len != expected {
        return Err(OpError::kernel_failure(
            op_type,
            format!(
                "loss gradient has {} elements, reduction '{}' needs {}",
                grad_len, reduction, expected
            ),
        ));
    }
    Ok(())
}
