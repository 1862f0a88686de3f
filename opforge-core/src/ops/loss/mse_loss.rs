use crate::attribute::{AttrType, AttrValue};
use crate::buffer::HostElement;
use crate::device::DeviceKind;
use crate::error::OpError;
use crate::grad::{grad_var_name, GradMaker};
use crate::infer_shape::InferShapeContext;
use crate::kernel::KernelContext;
use crate::ops::loss::{batch_size, check_loss_grad_len, host_data, reduction_for_inference};
use crate::ops::reduction::{Reduction, REDUCTION_ATTR};
use crate::registry::{CatalogBuilder, OperatorDef};
use crate::schema::Schema;
use crate::tensor::Tensor;
use crate::types::DType;
use std::sync::Arc;

pub const MSE_LOSS: &str = "mse_loss";
pub const MSE_LOSS_GRAD: &str = "mse_loss_grad";

const REDUCTIONS: [&str; 3] = ["none", "mean", "sum"];

fn forward_schema() -> Result<Schema, OpError> {
    Schema::builder(MSE_LOSS)
        .input("X", "Predictions.")
        .input("Label", "Ground truth, same shape as X.")
        .no_grad()
        .output("Out", "Squared error, reduced according to 'reduction'.")
        .attr(REDUCTION_ATTR, AttrType::Str, "One of 'none' | 'mean' | 'sum'.")
        .default(AttrValue::from("mean"))
        .one_of(REDUCTIONS)
        .comment("Mean squared error: l = (x - y)^2.")
        .build()
}

// Wired by the default gradient maker, hence the forward output `Out` among
// the inputs.
fn grad_schema() -> Result<Schema, OpError> {
    Schema::builder(MSE_LOSS_GRAD)
        .input("X", "Forward input X.")
        .input("Label", "Forward input Label.")
        .input("Out", "Forward output.")
        .input(&grad_var_name("Out"), "Gradient of the forward output.")
        .output(&grad_var_name("X"), "Gradient of X.")
        .dispensable()
        .attr(REDUCTION_ATTR, AttrType::Str, "Reduction of the forward op.")
        .default(AttrValue::from("mean"))
        .one_of(REDUCTIONS)
        .build()
}

fn infer_mse_loss(ctx: &mut InferShapeContext<'_>) -> Result<(), OpError> {
    ctx.check_same_dims("X", "Label")?;
    ctx.check_same_dtype("X", "Label")?;
    let reduction = reduction_for_inference(ctx, &REDUCTIONS)?;
    let shape = reduction.output_shape(ctx.input_shape("X")?);
    let dtype = ctx.input_dtype("X")?;
    ctx.set_output_shape("Out", shape, dtype)
}

fn infer_mse_loss_grad(ctx: &mut InferShapeContext<'_>) -> Result<(), OpError> {
    ctx.check_same_dims("X", "Label")?;
    ctx.input_desc(&grad_var_name("Out"))?;
    let x_grad = grad_var_name("X");
    if ctx.has_output(&x_grad) {
        ctx.share_desc("X", &x_grad)?;
    }
    Ok(())
}

fn mse_loss_kernel<T: HostElement>(ctx: &mut KernelContext<'_>) -> Result<(), OpError> {
    let reduction = Reduction::from_kernel_attr(ctx)?;
    let x = ctx.input("X")?;
    let xs = host_data::<T>(ctx.op_type(), "X", x)?;
    let ys = host_data::<T>(ctx.op_type(), "Label", ctx.input("Label")?)?;
    if xs.len() != ys.len() {
        return Err(OpError::kernel_failure(
            ctx.op_type(),
            format!("X has {} elements, Label has {}", xs.len(), ys.len()),
        ));
    }

    let loss: Vec<T> = xs.iter().zip(ys).map(|(&x, &y)| (x - y) * (x - y)).collect();
    let dims = match reduction {
        Reduction::None => x.shape().to_vec(),
        _ => vec![1],
    };
    let out = Tensor::from_vec(reduction.apply(loss, batch_size(x.shape())), dims)?;
    ctx.set_output("Out", out);
    Ok(())
}

fn mse_loss_grad_kernel<T: HostElement>(ctx: &mut KernelContext<'_>) -> Result<(), OpError> {
    let x_grad = grad_var_name("X");
    if !ctx.has_output(&x_grad) {
        return Ok(());
    }
    let reduction = Reduction::from_kernel_attr(ctx)?;
    let x = ctx.input("X")?;
    let xs = host_data::<T>(ctx.op_type(), "X", x)?;
    let ys = host_data::<T>(ctx.op_type(), "Label", ctx.input("Label")?)?;
    let ds = host_data::<T>(ctx.op_type(), "Out@GRAD", ctx.input(&grad_var_name("Out"))?)?;
    check_loss_grad_len(ctx.op_type(), reduction, xs.len(), ds.len())?;

    let two = T::one() + T::one();
    let scale: T = reduction.grad_scale(xs.len(), batch_size(x.shape()));
    let dx: Vec<T> = xs
        .iter()
        .zip(ys)
        .enumerate()
        .map(|(i, (&x, &y))| {
            let d = if reduction == Reduction::None { ds[i] } else { ds[0] };
            two * (x - y) * d * scale
        })
        .collect();
    let out = Tensor::from_vec(dx, x.shape().to_vec())?;
    ctx.set_output(&x_grad, out);
    Ok(())
}

/// Registers `mse_loss` and `mse_loss_grad`. The backward op never reads the
/// forward output, so `Out` is no-need-buffer.
pub fn register(builder: &mut CatalogBuilder) -> Result<(), OpError> {
    let forward = OperatorDef::new(forward_schema()?, Arc::new(infer_mse_loss))
        .grad_maker(GradMaker::Default)
        .kernel(DeviceKind::CPU, DType::F32, Arc::new(mse_loss_kernel::<f32>))
        .kernel(DeviceKind::CPU, DType::F64, Arc::new(mse_loss_kernel::<f64>));
    builder.register(forward)?;

    let backward = OperatorDef::new(grad_schema()?, Arc::new(infer_mse_loss_grad))
        .no_need_buffer(["Out"])
        .kernel(DeviceKind::CPU, DType::F32, Arc::new(mse_loss_grad_kernel::<f32>))
        .kernel(DeviceKind::CPU, DType::F64, Arc::new(mse_loss_grad_kernel::<f64>));
    builder.register(backward)
}

#[cfg(test)]
#[path = "mse_loss_test.rs"]
mod tests;
