use crate::attribute::{AttrType, AttrValue};
use crate::buffer::HostElement;
use crate::device::DeviceKind;
use crate::error::OpError;
use crate::grad::{grad_var_name, GradMaker, GradMakerContext};
use crate::infer_shape::InferShapeContext;
use crate::kernel::KernelContext;
use crate::node::OperatorNode;
use crate::ops::loss::{batch_size, check_loss_grad_len, host_data, reduction_for_inference};
use crate::ops::reduction::{Reduction, REDUCTION_ATTR};
use crate::registry::{CatalogBuilder, OperatorDef};
use crate::schema::Schema;
use crate::tensor::Tensor;
use crate::types::DType;
use log::trace;
use std::sync::Arc;

pub const KLDIV_LOSS: &str = "kldiv_loss";
pub const KLDIV_LOSS_GRAD: &str = "kldiv_loss_grad";

const REDUCTIONS: [&str; 4] = ["none", "batchmean", "mean", "sum"];

// --- Schemas ---

fn forward_schema() -> Result<Schema, OpError> {
    Schema::builder(KLDIV_LOSS)
        .input("X", "Log-probabilities, any shape.")
        .input("Target", "Probabilities, same shape as X.")
        .no_grad()
        .output("Loss", "Element-wise loss for 'none', otherwise a [1] tensor.")
        .attr(REDUCTION_ATTR, AttrType::Str, "One of 'none' | 'batchmean' | 'mean' | 'sum'.")
        .default(AttrValue::from("mean"))
        .one_of(REDUCTIONS)
        .comment(
            "Kullback-Leibler divergence between Target and X, where X holds \
             log-probabilities: l = t * (ln t - x) for t > 0, else 0.",
        )
        .build()
}

fn grad_schema() -> Result<Schema, OpError> {
    Schema::builder(KLDIV_LOSS_GRAD)
        .input("X", "Forward input X.")
        .input("Target", "Forward input Target.")
        .input(&grad_var_name("Loss"), "Gradient of the forward Loss.")
        .output(&grad_var_name("X"), "Gradient of X.")
        .dispensable()
        .attr(REDUCTION_ATTR, AttrType::Str, "Reduction of the forward op.")
        .default(AttrValue::from("mean"))
        .one_of(REDUCTIONS)
        .build()
}

// --- Shape Rules ---

fn infer_kldiv_loss(ctx: &mut InferShapeContext<'_>) -> Result<(), OpError> {
    ctx.check_same_dims("X", "Target")?;
    ctx.check_same_dtype("X", "Target")?;
    let reduction = reduction_for_inference(ctx, &REDUCTIONS)?;
    let shape = reduction.output_shape(ctx.input_shape("X")?);
    let dtype = ctx.input_dtype("X")?;
    ctx.set_output_shape("Loss", shape, dtype)
}

fn infer_kldiv_loss_grad(ctx: &mut InferShapeContext<'_>) -> Result<(), OpError> {
    let loss_grad = grad_var_name("Loss");
    ctx.input_desc("Target")?;
    ctx.input_desc(&loss_grad)?;
    let x_grad = grad_var_name("X");
    if ctx.has_output(&x_grad) {
        ctx.share_desc("X", &x_grad)?;
    }
    Ok(())
}

// --- Gradient Maker ---

fn make_kldiv_loss_grad(ctx: &GradMakerContext<'_>) -> Result<Vec<OperatorNode>, OpError> {
    let node = OperatorNode::builder(ctx.grad_op_type())
        .input("X", ctx.input("X"))
        .input("Target", ctx.input("Target"))
        .input(grad_var_name("Loss"), ctx.output_grad("Loss"))
        .output(grad_var_name("X"), ctx.input_grad("X"))
        .attrs(ctx.attrs().clone())
        .build();
    Ok(vec![node])
}

// --- CPU Kernels ---

fn kldiv_loss_kernel<T: HostElement>(ctx: &mut KernelContext<'_>) -> Result<(), OpError> {
    let reduction = Reduction::from_kernel_attr(ctx)?;
    let x = ctx.input("X")?;
    let target = ctx.input("Target")?;
    let xs = host_data::<T>(ctx.op_type(), "X", x)?;
    let ts = host_data::<T>(ctx.op_type(), "Target", target)?;
    if xs.len() != ts.len() {
        return Err(OpError::kernel_failure(
            ctx.op_type(),
            format!("X has {} elements, Target has {}", xs.len(), ts.len()),
        ));
    }

    let loss: Vec<T> = xs
        .iter()
        .zip(ts)
        .map(|(&x, &t)| if t > T::zero() { t * (t.ln() - x) } else { T::zero() })
        .collect();
    let dims = match reduction {
        Reduction::None => x.shape().to_vec(),
        _ => vec![1],
    };
    trace!("kldiv_loss: {} elements, reduction '{}'", loss.len(), reduction);
    let out = Tensor::from_vec(reduction.apply(loss, batch_size(x.shape())), dims)?;
    ctx.set_output("Loss", out);
    Ok(())
}

fn kldiv_loss_grad_kernel<T: HostElement>(ctx: &mut KernelContext<'_>) -> Result<(), OpError> {
    let x_grad = grad_var_name("X");
    if !ctx.has_output(&x_grad) {
        return Ok(());
    }
    let reduction = Reduction::from_kernel_attr(ctx)?;
    let target = ctx.input("Target")?;
    let loss_grad = ctx.input(&grad_var_name("Loss"))?;
    let ts = host_data::<T>(ctx.op_type(), "Target", target)?;
    let ds = host_data::<T>(ctx.op_type(), "Loss@GRAD", loss_grad)?;
    check_loss_grad_len(ctx.op_type(), reduction, ts.len(), ds.len())?;

    let scale: T = reduction.grad_scale(ts.len(), batch_size(target.shape()));
    let dx: Vec<T> = ts
        .iter()
        .enumerate()
        .map(|(i, &t)| {
            let d = if reduction == Reduction::None { ds[i] } else { ds[0] };
            if t > T::zero() {
                -t * d * scale
            } else {
                T::zero()
            }
        })
        .collect();
    let out = Tensor::from_vec(dx, target.shape().to_vec())?;
    ctx.set_output(&x_grad, out);
    Ok(())
}

/// Registers `kldiv_loss` and `kldiv_loss_grad`.
///
/// The backward op reads its kernel dtype from `Loss@GRAD` and marks `Target`
/// no-need-buffer.
pub fn register(builder: &mut CatalogBuilder) -> Result<(), OpError> {
    let forward = OperatorDef::new(forward_schema()?, Arc::new(infer_kldiv_loss))
        .grad_maker(GradMaker::Custom(Arc::new(make_kldiv_loss_grad)))
        .kernel(DeviceKind::CPU, DType::F32, Arc::new(kldiv_loss_kernel::<f32>))
        .kernel(DeviceKind::CPU, DType::F64, Arc::new(kldiv_loss_kernel::<f64>));
    builder.register(forward)?;

    let backward = OperatorDef::new(grad_schema()?, Arc::new(infer_kldiv_loss_grad))
        .no_need_buffer(["Target"])
        .kernel_dtype_slot(&grad_var_name("Loss"))
        .kernel(DeviceKind::CPU, DType::F32, Arc::new(kldiv_loss_grad_kernel::<f32>))
        .kernel(DeviceKind::CPU, DType::F64, Arc::new(kldiv_loss_grad_kernel::<f64>));
    builder.register(backward)
}

#[cfg(test)]
#[path = "kldiv_loss_test.rs"]
mod tests;
