//! # Gradient Graph Builder
//!
//! Turns one forward [`OperatorNode`] into the backward node(s) computing the
//! gradients of its differentiable inputs.
//!
//! Wiring rules shared by every maker:
//!
//! - forward inputs/outputs are reused by variable name;
//! - the gradient of a forward output is the caller-supplied name for that
//!   output variable;
//! - the gradient of a forward input `v` is the fresh variable `v@GRAD`, and
//!   only exists for inputs that are differentiable and not excluded;
//! - in a duplicable slot where only some variables are excluded, the excluded
//!   positions are bound to [`EMPTY_VAR_NAME`] so the remaining gradients keep
//!   their positions. Nothing is ever written to that name;
//! - the forward attribute map is copied verbatim.

use crate::attribute::AttributeMap;
use crate::error::OpError;
use crate::node::OperatorNode;
use crate::registry::Catalog;
use crate::schema::Schema;
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Suffix appended to a variable name to name its gradient.
pub const GRAD_SUFFIX: &str = "@GRAD";

/// Placeholder bound to a gradient position nobody asked for.
pub const EMPTY_VAR_NAME: &str = "@EMPTY@";

/// Marker inserted between a gradient name and its counter when the plain
/// name is already taken.
pub const RENAME_SUFFIX: &str = "@RENAME@";

pub fn is_empty_var(var: &str) -> bool {
    var == EMPTY_VAR_NAME
}

/// `x@GRAD`, 2 -> `x@GRAD@RENAME@2`.
pub fn renamed_grad_var(grad: &str, n: usize) -> String {
    format!("{}{}{}", grad, RENAME_SUFFIX, n)
}

/// `x` -> `x@GRAD`.
pub fn grad_var_name(var: &str) -> String {
    format!("{}{}", var, GRAD_SUFFIX)
}

/// `kldiv_loss` -> `kldiv_loss_grad`.
pub fn grad_op_type(op_type: &str) -> String {
    format!("{}_grad", op_type)
}

/// Operator-specific backward construction.
pub type GradMakerFn = Arc<dyn Fn(&GradMakerContext<'_>) -> Result<Vec<OperatorNode>, OpError> + Send + Sync>;

/// How an operator type builds its backward nodes.
#[derive(Clone)]
pub enum GradMaker {
    /// One `<op>_grad` node wired with every forward input, every forward
    /// output, every output gradient and every input gradient.
    Default,
    Custom(GradMakerFn),
}

impl fmt::Debug for GradMaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GradMaker::Default => write!(f, "GradMaker::Default"),
            GradMaker::Custom(_) => write!(f, "GradMaker::Custom(..)"),
        }
    }
}

/// Read access to the forward node and the gradient request.
pub struct GradMakerContext<'a> {
    forward: &'a OperatorNode,
    schema: &'a Schema,
    output_grads: &'a BTreeMap<String, String>,
    no_grad_vars: &'a BTreeSet<String>,
}

impl<'a> GradMakerContext<'a> {
    pub fn new(
        forward: &'a OperatorNode,
        schema: &'a Schema,
        output_grads: &'a BTreeMap<String, String>,
        no_grad_vars: &'a BTreeSet<String>,
    ) -> Self {
        GradMakerContext {
            forward,
            schema,
            output_grads,
            no_grad_vars,
        }
    }

    pub fn forward(&self) -> &OperatorNode {
        self.forward
    }

    pub fn attrs(&self) -> &AttributeMap {
        self.forward.attrs()
    }

    pub fn grad_op_type(&self) -> String {
        grad_op_type(self.forward.op_type())
    }

    /// Forward variables bound to input `slot`.
    pub fn input(&self, slot: &str) -> Vec<String> {
        self.forward.input(slot).to_vec()
    }

    /// Forward variables bound to output `slot`.
    pub fn output(&self, slot: &str) -> Vec<String> {
        self.forward.output(slot).to_vec()
    }

    /// Caller-supplied gradient names for the variables of output `slot`.
    pub fn output_grad(&self, slot: &str) -> Vec<String> {
        self.forward
            .output(slot)
            .iter()
            .filter_map(|v| self.output_grads.get(v).cloned())
            .collect()
    }

    /// Fresh gradient names for input `slot`; empty when the slot is declared
    /// `no_grad` or all of its variables were excluded by the request.
    /// Excluded variables of a partially excluded slot map to
    /// [`EMPTY_VAR_NAME`].
    pub fn input_grad(&self, slot: &str) -> Vec<String> {
        let differentiable = self.schema.input(slot).map_or(false, |d| !d.no_grad);
        let vars = self.forward.input(slot);
        if !differentiable || vars.iter().all(|v| self.no_grad_vars.contains(v)) {
            return Vec::new();
        }
        vars.iter()
            .map(|v| {
                if self.no_grad_vars.contains(v) {
                    EMPTY_VAR_NAME.to_string()
                } else {
                    grad_var_name(v)
                }
            })
            .collect()
    }
}

/// Output of a gradient request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GradientSpec {
    pub nodes: Vec<OperatorNode>,
    /// Per backward node: input slots whose contents need not be retained.
    pub no_need_buffer: Vec<BTreeSet<String>>,
    /// Forward input variable -> its gradient variable.
    pub input_grads: BTreeMap<String, String>,
}

impl GradientSpec {
    /// Variables bound to no-need-buffer slots across all backward nodes.
    pub fn no_need_buffer_vars(&self) -> BTreeSet<String> {
        self.nodes
            .iter()
            .zip(&self.no_need_buffer)
            .flat_map(|(node, slots)| slots.iter().flat_map(move |s| node.input(s).iter().cloned()))
            .collect()
    }

    pub fn input_grad(&self, forward_var: &str) -> Option<&str> {
        self.input_grads.get(forward_var).map(String::as_str)
    }

    /// Rebinds the gradient of `forward_var` to `new_name` in every backward
    /// node that writes it.
    pub fn rename_input_grad(&mut self, forward_var: &str, new_name: &str) {
        let old = match self.input_grads.get_mut(forward_var) {
            Some(grad) => std::mem::replace(grad, new_name.to_string()),
            None => return,
        };
        for node in &mut self.nodes {
            *node = node.rename_output_var(&old, new_name);
        }
    }
}

/// The [`GradMaker::Default`] wiring.
pub fn make_default_grad(ctx: &GradMakerContext<'_>) -> Result<Vec<OperatorNode>, OpError> {
    let mut builder = OperatorNode::builder(ctx.grad_op_type()).attrs(ctx.attrs().clone());
    for slot in ctx.schema.inputs() {
        builder = builder.input(slot.name.as_str(), ctx.input(&slot.name));
    }
    for slot in ctx.schema.outputs() {
        builder = builder.input(slot.name.as_str(), ctx.output(&slot.name));
        if !slot.no_grad {
            builder = builder.input(grad_var_name(&slot.name), ctx.output_grad(&slot.name));
        }
    }
    for slot in ctx.schema.differentiable_inputs() {
        builder = builder.output(grad_var_name(&slot.name), ctx.input_grad(&slot.name));
    }
    Ok(vec![builder.build()])
}

pub(crate) fn build_gradient(
    catalog: &Catalog,
    forward: &OperatorNode,
    output_grads: &BTreeMap<String, String>,
    no_grad_vars: &BTreeSet<String>,
) -> Result<GradientSpec, OpError> {
    let info = catalog.lookup(forward.op_type())?;
    let maker = info.grad_maker().ok_or_else(|| OpError::NotDifferentiable {
        op_type: forward.op_type().to_string(),
    })?;

    let missing: Vec<String> = info
        .schema()
        .differentiable_outputs()
        .flat_map(|slot| forward.output(&slot.name).iter())
        .filter(|var| !output_grads.contains_key(*var))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(OpError::IncompleteGradientRequest {
            op_type: forward.op_type().to_string(),
            missing,
        });
    }

    let ctx = GradMakerContext::new(forward, info.schema(), output_grads, no_grad_vars);
    let raw_nodes = match maker {
        GradMaker::Default => make_default_grad(&ctx)?,
        GradMaker::Custom(make) => make(&ctx)?,
    };

    let mut spec = GradientSpec::default();
    for raw in raw_nodes {
        let grad_info = catalog.lookup(raw.op_type())?;
        let grad_schema = grad_info.schema();
        let attrs = grad_schema.validate(raw.attrs())?;
        grad_schema.validate_bindings(raw.inputs(), raw.outputs())?;
        let node = raw.with_attrs(attrs);

        let no_need_buffer: BTreeSet<String> = grad_info
            .no_need_buffer()
            .iter()
            .filter(|slot| node.has_input(slot))
            .cloned()
            .collect();

        for var in forward.input_vars() {
            let grad = grad_var_name(var);
            if node.output_vars().any(|o| o == grad) {
                spec.input_grads.insert(var.to_string(), grad);
            }
        }

        debug!("Built backward node {} for {}", node, forward.op_type());
        spec.nodes.push(node);
        spec.no_need_buffer.push(no_need_buffer);
    }

    if spec.input_grads.is_empty() {
        warn!(
            "Gradient of '{}' produces no input gradient; every input is non-differentiable or excluded",
            forward.op_type()
        );
    }
    Ok(spec)
}

#[cfg(test)]
#[path = "grad_test.rs"]
mod tests;
