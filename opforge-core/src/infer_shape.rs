//! # Shape/Type Inference
//!
//! Each operator type registers an [`InferShapeFn`]. It runs twice in a node's
//! life:
//!
//! - at graph construction ([`CheckPhase::Static`]) over declared descriptors,
//!   where dimensions may be [`DYNAMIC_DIM`](crate::shape::DYNAMIC_DIM);
//! - right before the kernel runs ([`CheckPhase::Runtime`]) over the concrete
//!   metadata of the bound tensors.
//!
//! Ranks are compared in both phases. Dimension values are compared at
//! `Static` only when both are known, and always at `Runtime`. A static check
//! therefore never rejects a graph that could be valid once shapes are bound,
//! and the runtime check never lets a real mismatch through.
//!
//! Output descriptors are collected in the context and handed back by
//! [`InferShapeContext::into_outputs`]; the caller commits them only when the
//! whole inference succeeded.

use crate::attribute::{AttrValue, AttributeMap};
use crate::error::{OpError, SchemaViolationKind, ShapeMismatchDetail};
use crate::grad::is_empty_var;
use crate::node::OperatorNode;
use crate::shape::{is_dynamic, Shape, SymbolTable, VarDesc};
use crate::types::DType;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Operator-specific shape/type rule.
pub type InferShapeFn = Arc<dyn Fn(&mut InferShapeContext<'_>) -> Result<(), OpError> + Send + Sync>;

/// When an inference runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckPhase {
    /// Graph construction: lenient on dynamic dimensions.
    Static,
    /// Right before kernel launch: every dimension is concrete and checked.
    Runtime,
}

impl fmt::Display for CheckPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckPhase::Static => write!(f, "static"),
            CheckPhase::Runtime => write!(f, "runtime"),
        }
    }
}

/// View over one node and a symbol table for the duration of one inference.
pub struct InferShapeContext<'a> {
    node: &'a OperatorNode,
    vars: &'a SymbolTable,
    phase: CheckPhase,
    outputs: BTreeMap<String, VarDesc>,
}

impl<'a> InferShapeContext<'a> {
    pub fn new(node: &'a OperatorNode, vars: &'a SymbolTable, phase: CheckPhase) -> Self {
        InferShapeContext {
            node,
            vars,
            phase,
            outputs: BTreeMap::new(),
        }
    }

    pub fn op_type(&self) -> &str {
        self.node.op_type()
    }

    pub fn node(&self) -> &OperatorNode {
        self.node
    }

    pub fn phase(&self) -> CheckPhase {
        self.phase
    }

    pub fn is_runtime(&self) -> bool {
        self.phase == CheckPhase::Runtime
    }

    pub fn attrs(&self) -> &AttributeMap {
        self.node.attrs()
    }

    /// # Errors
    /// `SchemaViolation(MissingAttribute)` if the node does not carry `name`.
    pub fn attr(&self, name: &str) -> Result<&AttrValue, OpError> {
        self.node.attr(name).ok_or_else(|| {
            OpError::schema(
                self.op_type(),
                SchemaViolationKind::MissingAttribute {
                    name: name.to_string(),
                },
            )
        })
    }

    pub fn attr_str(&self, name: &str) -> Result<&str, OpError> {
        let value = self.attr(name)?;
        value.as_str().ok_or_else(|| {
            OpError::schema(
                self.op_type(),
                SchemaViolationKind::AttributeTypeMismatch {
                    name: name.to_string(),
                    expected: crate::attribute::AttrType::Str,
                    actual: value.attr_type(),
                },
            )
        })
    }

    /// The slot is bound and every bound variable has a descriptor.
    pub fn has_input(&self, slot: &str) -> bool {
        let vars = self.node.input(slot);
        !vars.is_empty() && vars.iter().all(|v| self.vars.contains(v))
    }

    pub fn has_output(&self, slot: &str) -> bool {
        self.node.has_output(slot)
    }

    /// Descriptor of the first variable bound to `slot`.
    ///
    /// # Errors
    /// `ShapeMismatch(MissingInput)` if the slot is unbound or its variable is
    /// absent from the symbol table.
    pub fn input_desc(&self, slot: &str) -> Result<&VarDesc, OpError> {
        self.node
            .input(slot)
            .first()
            .and_then(|var| self.vars.get(var))
            .ok_or_else(|| self.missing_input(slot))
    }

    /// Descriptors of every variable bound to a duplicable slot.
    pub fn input_descs(&self, slot: &str) -> Result<Vec<&VarDesc>, OpError> {
        let vars = self.node.input(slot);
        if vars.is_empty() {
            return Err(self.missing_input(slot));
        }
        vars.iter()
            .map(|v| self.vars.get(v).ok_or_else(|| self.missing_input(slot)))
            .collect()
    }

    pub fn input_shape(&self, slot: &str) -> Result<&Shape, OpError> {
        self.input_desc(slot).map(|d| &d.shape)
    }

    pub fn input_dtype(&self, slot: &str) -> Result<DType, OpError> {
        self.input_desc(slot).map(|d| d.dtype)
    }

    /// Records `desc` for every variable bound to output `slot`, skipping
    /// [`EMPTY_VAR_NAME`](crate::grad::EMPTY_VAR_NAME) placeholders.
    ///
    /// # Errors
    /// `ShapeMismatch(MissingOutput)` if the slot is unbound.
    pub fn set_output(&mut self, slot: &str, desc: VarDesc) -> Result<(), OpError> {
        let vars = self.node.output(slot);
        if vars.is_empty() {
            return Err(self.mismatch(ShapeMismatchDetail::MissingOutput {
                slot: slot.to_string(),
            }));
        }
        for var in vars.iter().filter(|v| !is_empty_var(v)) {
            self.outputs.insert(var.clone(), desc.clone());
        }
        Ok(())
    }

    pub fn set_output_shape(&mut self, slot: &str, shape: Shape, dtype: DType) -> Result<(), OpError> {
        self.set_output(slot, VarDesc { shape, dtype })
    }

    /// Output gets exactly the input's shape and dtype.
    pub fn share_desc(&mut self, input: &str, output: &str) -> Result<(), OpError> {
        let desc = self.input_desc(input)?.clone();
        self.set_output(output, desc)
    }

    /// Ranks of two inputs must be equal. Checked in every phase.
    pub fn check_same_rank(&self, lhs: &str, rhs: &str) -> Result<(), OpError> {
        let lhs_rank = self.input_shape(lhs)?.rank();
        let rhs_rank = self.input_shape(rhs)?.rank();
        if lhs_rank != rhs_rank {
            return Err(self.mismatch(ShapeMismatchDetail::Rank {
                lhs: lhs.to_string(),
                lhs_rank,
                rhs: rhs.to_string(),
                rhs_rank,
            }));
        }
        Ok(())
    }

    /// Two inputs must have the same rank and the same dimensions.
    ///
    /// At `Static`, a dimension is compared only when both sides are known.
    pub fn check_same_dims(&self, lhs: &str, rhs: &str) -> Result<(), OpError> {
        self.check_same_rank(lhs, rhs)?;
        let lhs_shape = self.input_shape(lhs)?;
        let rhs_shape = self.input_shape(rhs)?;
        for (index, (&l, &r)) in lhs_shape.dims().iter().zip(rhs_shape.dims()).enumerate() {
            let comparable = self.is_runtime() || (!is_dynamic(l) && !is_dynamic(r));
            if comparable && l != r {
                return Err(self.mismatch(ShapeMismatchDetail::Dim {
                    index,
                    lhs: lhs.to_string(),
                    lhs_dim: l,
                    rhs: rhs.to_string(),
                    rhs_dim: r,
                }));
            }
        }
        Ok(())
    }

    pub fn check_same_dtype(&self, lhs: &str, rhs: &str) -> Result<(), OpError> {
        let lhs_dtype = self.input_dtype(lhs)?;
        let rhs_dtype = self.input_dtype(rhs)?;
        if lhs_dtype != rhs_dtype {
            return Err(self.mismatch(ShapeMismatchDetail::DType {
                lhs: lhs.to_string(),
                lhs_dtype,
                rhs: rhs.to_string(),
                rhs_dtype,
            }));
        }
        Ok(())
    }

    /// A `ShapeMismatch` for this node and phase.
    pub fn mismatch(&self, detail: ShapeMismatchDetail) -> OpError {
        OpError::ShapeMismatch {
            op_type: self.op_type().to_string(),
            phase: self.phase,
            detail,
        }
    }

    /// Output variable -> inferred descriptor.
    pub fn into_outputs(self) -> BTreeMap<String, VarDesc> {
        self.outputs
    }

    fn missing_input(&self, slot: &str) -> OpError {
        self.mismatch(ShapeMismatchDetail::MissingInput {
            slot: slot.to_string(),
        })
    }
}

/// Runs `rule` for `node` and returns the inferred output descriptors.
pub(crate) fn run_infer_shape(
    rule: &InferShapeFn,
    node: &OperatorNode,
    vars: &SymbolTable,
    phase: CheckPhase,
) -> Result<BTreeMap<String, VarDesc>, OpError> {
    let mut ctx = InferShapeContext::new(node, vars, phase);
    rule(&mut ctx)?;
    Ok(ctx.into_outputs())
}

#[cfg(test)]
#[path = "infer_shape_test.rs"]
mod tests;
