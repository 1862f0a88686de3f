use super::*;
use crate::attribute::{attrs, AttributeMap};
use crate::error::SchemaViolationKind;
use crate::node::OperatorNode;
use crate::registry::Catalog;
use crate::infer_shape::{run_infer_shape, CheckPhase, InferShapeFn};
use crate::shape::{SymbolTable, VarDesc};
use crate::utils::testing::{check_tensor_near, slot_tensors};
use std::collections::BTreeMap;

fn catalog() -> Result<Catalog, OpError> {
    let mut builder = CatalogBuilder::new();
    register(&mut builder)?;
    builder.build()
}

fn reduction_attrs(reduction: &str) -> AttributeMap {
    attrs([(REDUCTION_ATTR, AttrValue::from(reduction))])
}

fn descs(slot: &str, dims: Vec<i64>, dtype: DType) -> BTreeMap<String, Vec<VarDesc>> {
    let mut map = BTreeMap::new();
    map.insert(slot.to_string(), vec![VarDesc::new(dims, dtype)]);
    map
}

#[test]
fn test_batchmean_not_allowed() -> Result<(), OpError> {
    let err = forward_schema()?.validate(&reduction_attrs("batchmean")).unwrap_err();
    assert!(matches!(
        err,
        OpError::SchemaViolation {
            violation: SchemaViolationKind::InvalidAttributeValue { .. },
            ..
        }
    ));
    Ok(())
}

#[test]
fn test_inference_rejects_batchmean_with_allowed_set() {
    let node = OperatorNode::builder(MSE_LOSS)
        .input("X", ["x"])
        .input("Label", ["y"])
        .output("Out", ["out"])
        .attr(REDUCTION_ATTR, AttrValue::from("batchmean"))
        .build();
    let mut table = SymbolTable::new();
    table.insert("x", VarDesc::new(vec![4], DType::F32));
    table.insert("y", VarDesc::new(vec![4], DType::F32));
    let rule: InferShapeFn = Arc::new(infer_mse_loss);
    let err = run_infer_shape(&rule, &node, &table, CheckPhase::Runtime).unwrap_err();
    match err {
        OpError::SchemaViolation {
            violation: SchemaViolationKind::InvalidAttributeValue { allowed, .. },
            ..
        } => assert_eq!(allowed, vec!["none", "mean", "sum"]),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_forward_kernel_mean() -> Result<(), OpError> {
    let attrs = reduction_attrs("mean");
    let x = Tensor::from_vec_f32(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2])?;
    let y = Tensor::from_vec_f32(vec![1.5, 2.5, 2.0, 6.0], vec![2, 2])?;
    let mut ctx = KernelContext::new(
        MSE_LOSS,
        DeviceKind::CPU,
        &attrs,
        slot_tensors([("X", x), ("Label", y)]),
        descs("Out", vec![1], DType::F32),
    );
    mse_loss_kernel::<f32>(&mut ctx)?;
    let outputs = ctx.into_outputs();
    // (0.25 + 0.25 + 1 + 4) / 4
    check_tensor_near(&outputs["Out"][0], &[1], &[1.375f32], 1e-6);
    Ok(())
}

#[test]
fn test_forward_kernel_none() -> Result<(), OpError> {
    let attrs = reduction_attrs("none");
    let x = Tensor::from_vec_f64(vec![1.0, -1.0, 0.5], vec![3])?;
    let y = Tensor::from_vec_f64(vec![0.0, 1.0, 0.5], vec![3])?;
    let mut ctx = KernelContext::new(
        MSE_LOSS,
        DeviceKind::CPU,
        &attrs,
        slot_tensors([("X", x), ("Label", y)]),
        descs("Out", vec![3], DType::F64),
    );
    mse_loss_kernel::<f64>(&mut ctx)?;
    check_tensor_near(&ctx.into_outputs()["Out"][0], &[3], &[1.0, 4.0, 0.0], 1e-12);
    Ok(())
}

#[test]
fn test_grad_kernel_sum() -> Result<(), OpError> {
    let attrs = reduction_attrs("sum");
    let x = Tensor::from_vec_f32(vec![1.0, 2.0], vec![2])?;
    let y = Tensor::from_vec_f32(vec![0.0, 4.0], vec![2])?;
    let out = Tensor::placeholder(vec![1], DType::F32, DeviceKind::CPU);
    let dout = Tensor::from_vec_f32(vec![0.5], vec![1])?;
    let mut ctx = KernelContext::new(
        MSE_LOSS_GRAD,
        DeviceKind::CPU,
        &attrs,
        slot_tensors([("X", x), ("Label", y), ("Out", out), ("Out@GRAD", dout)]),
        descs("X@GRAD", vec![2], DType::F32),
    );
    mse_loss_grad_kernel::<f32>(&mut ctx)?;
    // 2 * (x - y) * 0.5
    check_tensor_near(&ctx.into_outputs()["X@GRAD"][0], &[2], &[1.0f32, -2.0], 1e-6);
    Ok(())
}

#[test]
fn test_grad_kernel_skips_unbound_output() -> Result<(), OpError> {
    let attrs = reduction_attrs("sum");
    let mut ctx = KernelContext::new(
        MSE_LOSS_GRAD,
        DeviceKind::CPU,
        &attrs,
        BTreeMap::new(),
        BTreeMap::new(),
    );
    mse_loss_grad_kernel::<f64>(&mut ctx)?;
    assert!(ctx.into_outputs().is_empty());
    Ok(())
}

#[test]
fn test_default_gradient_wiring() -> Result<(), OpError> {
    let catalog = catalog()?;
    let forward = OperatorNode::builder(MSE_LOSS)
        .input("X", ["pred"])
        .input("Label", ["label"])
        .output("Out", ["err"])
        .attr(REDUCTION_ATTR, AttrValue::from("sum"))
        .build();
    let mut output_grads = BTreeMap::new();
    output_grads.insert("err".to_string(), "d_err".to_string());

    let spec = catalog.build_gradient(&forward, &output_grads)?;
    let node = &spec.nodes[0];
    assert_eq!(node.op_type(), MSE_LOSS_GRAD);
    assert_eq!(node.input("X"), ["pred".to_string()]);
    assert_eq!(node.input("Label"), ["label".to_string()]);
    assert_eq!(node.input("Out"), ["err".to_string()]);
    assert_eq!(node.input("Out@GRAD"), ["d_err".to_string()]);
    assert_eq!(node.output("X@GRAD"), ["pred@GRAD".to_string()]);
    assert!(!node.has_output("Label@GRAD"));
    assert_eq!(spec.no_need_buffer_vars().into_iter().collect::<Vec<_>>(), vec!["err".to_string()]);
    Ok(())
}
