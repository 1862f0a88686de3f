use super::*;
use crate::attribute::{attrs, AttributeMap};
use crate::error::{SchemaViolationKind, ShapeMismatchDetail};
use crate::infer_shape::{run_infer_shape, CheckPhase};
use crate::registry::Catalog;
use crate::shape::{Shape, SymbolTable, VarDesc};
use crate::utils::testing::{check_tensor_near, slot_tensors};
use approx::assert_relative_eq;
use std::collections::BTreeMap;

fn catalog() -> Result<Catalog, OpError> {
    let mut builder = CatalogBuilder::new();
    register(&mut builder)?;
    builder.build()
}

fn forward_node(reduction: &str) -> OperatorNode {
    OperatorNode::builder(KLDIV_LOSS)
        .input("X", ["x"])
        .input("Target", ["target"])
        .output("Loss", ["loss"])
        .attr(REDUCTION_ATTR, AttrValue::from(reduction))
        .build()
}

fn vars(x: Vec<i64>, target: Vec<i64>) -> SymbolTable {
    let mut table = SymbolTable::new();
    table.insert("x", VarDesc::new(x, DType::F32));
    table.insert("target", VarDesc::new(target, DType::F32));
    table
}

fn infer(node: &OperatorNode, table: &SymbolTable) -> Result<BTreeMap<String, VarDesc>, OpError> {
    let rule: crate::infer_shape::InferShapeFn = Arc::new(infer_kldiv_loss);
    run_infer_shape(&rule, node, table, CheckPhase::Static)
}

fn reduction_attrs(reduction: &str) -> AttributeMap {
    attrs([(REDUCTION_ATTR, AttrValue::from(reduction))])
}

fn output_descs(slot: &str, dims: Vec<i64>, dtype: DType) -> BTreeMap<String, Vec<VarDesc>> {
    let mut descs = BTreeMap::new();
    descs.insert(slot.to_string(), vec![VarDesc::new(dims, dtype)]);
    descs
}

// --- Schema ---

#[test]
fn test_reduction_defaults_to_mean() -> Result<(), OpError> {
    let schema = forward_schema()?;
    let validated = schema.validate(&AttributeMap::new())?;
    assert_eq!(validated[REDUCTION_ATTR], AttrValue::from("mean"));
    Ok(())
}

#[test]
fn test_invalid_reduction_rejected_by_schema() -> Result<(), OpError> {
    let schema = forward_schema()?;
    let err = schema.validate(&reduction_attrs("invalid_value")).unwrap_err();
    match err {
        OpError::SchemaViolation {
            op_type,
            violation: SchemaViolationKind::InvalidAttributeValue { name, value, .. },
        } => {
            assert_eq!(op_type, KLDIV_LOSS);
            assert_eq!(name, REDUCTION_ATTR);
            assert_eq!(value, "invalid_value");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    Ok(())
}

#[test]
fn test_inference_reports_allowed_reductions() {
    let err = infer(&forward_node("median"), &vars(vec![2, 3], vec![2, 3])).unwrap_err();
    assert_eq!(
        err,
        OpError::SchemaViolation {
            op_type: KLDIV_LOSS.to_string(),
            violation: SchemaViolationKind::InvalidAttributeValue {
                name: REDUCTION_ATTR.to_string(),
                value: "median".to_string(),
                allowed: vec![
                    "none".to_string(),
                    "batchmean".to_string(),
                    "mean".to_string(),
                    "sum".to_string()
                ],
            },
        }
    );
    assert!(err.to_string().contains("batchmean"));
}

#[test]
fn test_target_is_not_differentiable() -> Result<(), OpError> {
    let schema = forward_schema()?;
    let names: Vec<&str> = schema.differentiable_inputs().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["X"]);
    Ok(())
}

// --- Shape Rule ---

#[test]
fn test_infer_none_keeps_input_shape() -> Result<(), OpError> {
    let outputs = infer(&forward_node("none"), &vars(vec![4, 10], vec![4, 10]))?;
    assert_eq!(outputs["loss"], VarDesc::new(vec![4, 10], DType::F32));
    Ok(())
}

#[test]
fn test_infer_reduced_is_one_element() -> Result<(), OpError> {
    for reduction in ["mean", "sum", "batchmean"] {
        let outputs = infer(&forward_node(reduction), &vars(vec![4, 10], vec![4, 10]))?;
        assert_eq!(outputs["loss"].shape, Shape::new(vec![1]));
    }
    Ok(())
}

#[test]
fn test_infer_dim_mismatch() {
    let err = infer(&forward_node("none"), &vars(vec![4, 10], vec![4, 5])).unwrap_err();
    assert_eq!(
        err,
        OpError::ShapeMismatch {
            op_type: KLDIV_LOSS.to_string(),
            phase: CheckPhase::Static,
            detail: ShapeMismatchDetail::Dim {
                index: 1,
                lhs: "X".to_string(),
                lhs_dim: 10,
                rhs: "Target".to_string(),
                rhs_dim: 5,
            },
        }
    );
}

#[test]
fn test_infer_dtype_mismatch() {
    let mut table = vars(vec![4], vec![4]);
    table.insert("target", VarDesc::new(vec![4], DType::F64));
    let err = infer(&forward_node("sum"), &table).unwrap_err();
    assert!(matches!(
        err,
        OpError::ShapeMismatch {
            detail: ShapeMismatchDetail::DType { .. },
            ..
        }
    ));
}

// --- Kernels ---

#[test]
fn test_forward_kernel_none_f32() -> Result<(), OpError> {
    let reduction = reduction_attrs("none");
    let x = Tensor::from_vec_f32(vec![-1.0, -2.0, -0.5, 0.0], vec![2, 2])?;
    let t = Tensor::from_vec_f32(vec![0.5, 0.0, 1.0, 0.25], vec![2, 2])?;
    let mut ctx = KernelContext::new(
        KLDIV_LOSS,
        DeviceKind::CPU,
        &reduction,
        slot_tensors([("X", x), ("Target", t)]),
        output_descs("Loss", vec![2, 2], DType::F32),
    );
    kldiv_loss_kernel::<f32>(&mut ctx)?;
    let outputs = ctx.into_outputs();
    let expected = [
        0.5 * (0.5f32.ln() + 1.0),
        0.0,
        1.0 * (0.0 + 0.5),
        0.25 * 0.25f32.ln(),
    ];
    check_tensor_near(&outputs["Loss"][0], &[2, 2], &expected, 1e-6);
    Ok(())
}

#[test]
fn test_forward_kernel_reductions_f64() -> Result<(), OpError> {
    let x = Tensor::from_vec_f64(vec![-1.0, -1.0, -1.0, -1.0], vec![2, 2])?;
    let t = Tensor::from_vec_f64(vec![1.0, 1.0, 1.0, 1.0], vec![2, 2])?;
    // Each element contributes 1 * (ln 1 + 1) = 1.
    for (reduction, expected) in [("sum", 4.0), ("mean", 1.0), ("batchmean", 2.0)] {
        let attrs = reduction_attrs(reduction);
        let mut ctx = KernelContext::new(
            KLDIV_LOSS,
            DeviceKind::CPU,
            &attrs,
            slot_tensors([("X", x.clone()), ("Target", t.clone())]),
            output_descs("Loss", vec![1], DType::F64),
        );
        kldiv_loss_kernel::<f64>(&mut ctx)?;
        let outputs = ctx.into_outputs();
        let loss = &outputs["Loss"][0];
        assert_eq!(loss.shape(), &[1]);
        assert_relative_eq!(loss.as_slice::<f64>()?[0], expected, epsilon = 1e-12);
    }
    Ok(())
}

#[test]
fn test_forward_kernel_unknown_reduction_is_kernel_failure() -> Result<(), OpError> {
    let attrs = reduction_attrs("median");
    let x = Tensor::from_vec_f32(vec![0.0], vec![1])?;
    let mut ctx = KernelContext::new(
        KLDIV_LOSS,
        DeviceKind::CPU,
        &attrs,
        slot_tensors([("X", x.clone()), ("Target", x)]),
        output_descs("Loss", vec![1], DType::F32),
    );
    let err = kldiv_loss_kernel::<f32>(&mut ctx).unwrap_err();
    assert!(matches!(err, OpError::KernelFailure { ref op_type, .. } if op_type == KLDIV_LOSS));
    Ok(())
}

#[test]
fn test_forward_kernel_wrong_element_type() -> Result<(), OpError> {
    let attrs = reduction_attrs("sum");
    let x = Tensor::from_vec_f64(vec![0.0], vec![1])?;
    let mut ctx = KernelContext::new(
        KLDIV_LOSS,
        DeviceKind::CPU,
        &attrs,
        slot_tensors([("X", x.clone()), ("Target", x)]),
        output_descs("Loss", vec![1], DType::F32),
    );
    assert!(matches!(
        kldiv_loss_kernel::<f32>(&mut ctx),
        Err(OpError::KernelFailure { .. })
    ));
    Ok(())
}

#[test]
fn test_grad_kernel_mean() -> Result<(), OpError> {
    let attrs = reduction_attrs("mean");
    let x = Tensor::from_vec_f32(vec![-1.0, -2.0, -3.0, -4.0], vec![2, 2])?;
    let t = Tensor::from_vec_f32(vec![0.1, 0.2, 0.0, 0.4], vec![2, 2])?;
    let dl = Tensor::from_vec_f32(vec![2.0], vec![1])?;
    let mut ctx = KernelContext::new(
        KLDIV_LOSS_GRAD,
        DeviceKind::CPU,
        &attrs,
        slot_tensors([("X", x), ("Target", t), ("Loss@GRAD", dl)]),
        output_descs("X@GRAD", vec![2, 2], DType::F32),
    );
    kldiv_loss_grad_kernel::<f32>(&mut ctx)?;
    let outputs = ctx.into_outputs();
    // dx = -t * dl / numel
    check_tensor_near(&outputs["X@GRAD"][0], &[2, 2], &[-0.05f32, -0.1, 0.0, -0.2], 1e-6);
    Ok(())
}

#[test]
fn test_grad_kernel_none_uses_elementwise_loss_grad() -> Result<(), OpError> {
    let attrs = reduction_attrs("none");
    let t = Tensor::from_vec_f64(vec![0.5, 0.25], vec![2])?;
    let dl = Tensor::from_vec_f64(vec![1.0, 4.0], vec![2])?;
    let mut ctx = KernelContext::new(
        KLDIV_LOSS_GRAD,
        DeviceKind::CPU,
        &attrs,
        slot_tensors([("X", t.released()), ("Target", t), ("Loss@GRAD", dl)]),
        output_descs("X@GRAD", vec![2], DType::F64),
    );
    kldiv_loss_grad_kernel::<f64>(&mut ctx)?;
    let outputs = ctx.into_outputs();
    check_tensor_near(&outputs["X@GRAD"][0], &[2], &[-0.5, -1.0], 1e-12);
    Ok(())
}

#[test]
fn test_grad_kernel_rejects_mismatched_loss_grad() -> Result<(), OpError> {
    let attrs = reduction_attrs("none");
    let t = Tensor::from_vec_f32(vec![0.5, 0.25, 0.25], vec![3])?;
    let dl = Tensor::from_vec_f32(vec![1.0], vec![1])?;
    let mut ctx = KernelContext::new(
        KLDIV_LOSS_GRAD,
        DeviceKind::CPU,
        &attrs,
        slot_tensors([("Target", t), ("Loss@GRAD", dl)]),
        output_descs("X@GRAD", vec![3], DType::F32),
    );
    assert!(matches!(
        kldiv_loss_grad_kernel::<f32>(&mut ctx),
        Err(OpError::KernelFailure { .. })
    ));
    Ok(())
}

// --- Registration and Gradient ---

#[test]
fn test_register_adds_both_types_and_kernels() -> Result<(), OpError> {
    let catalog = catalog()?;
    assert_eq!(catalog.op_types(), vec![KLDIV_LOSS, KLDIV_LOSS_GRAD]);
    assert_eq!(catalog.kernels().keys_for(KLDIV_LOSS).len(), 2);
    assert_eq!(catalog.kernels().keys_for(KLDIV_LOSS_GRAD).len(), 2);
    assert_eq!(catalog.lookup(KLDIV_LOSS_GRAD)?.kernel_dtype_slot(), Some("Loss@GRAD"));
    assert_eq!(catalog.lookup(KLDIV_LOSS)?.kernel_dtype_slot(), Some("X"));
    Ok(())
}

#[test]
fn test_gradient_wiring() -> Result<(), OpError> {
    let catalog = catalog()?;
    let forward = forward_node("mean");
    let mut output_grads = BTreeMap::new();
    output_grads.insert("loss".to_string(), "loss@GRAD".to_string());

    let spec = catalog.build_gradient(&forward, &output_grads)?;
    assert_eq!(spec.nodes.len(), 1);
    let node = &spec.nodes[0];
    assert_eq!(node.op_type(), KLDIV_LOSS_GRAD);
    assert_eq!(node.input("X"), ["x".to_string()]);
    assert_eq!(node.input("Target"), ["target".to_string()]);
    assert_eq!(node.input("Loss@GRAD"), ["loss@GRAD".to_string()]);
    assert_eq!(node.output("X@GRAD"), ["x@GRAD".to_string()]);
    assert!(!node.has_output("Target@GRAD"));
    assert_eq!(node.attr(REDUCTION_ATTR), Some(&AttrValue::from("mean")));
    assert!(spec.no_need_buffer[0].contains("Target"));
    assert_eq!(spec.input_grad("x"), Some("x@GRAD"));
    assert_eq!(spec.input_grad("target"), None);
    Ok(())
}
