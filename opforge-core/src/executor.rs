//! # Execution
//!
//! Runs validated nodes against an [`ExecutionContext`]. For one node:
//!
//! 1. every bound input variable must be present in the scope;
//! 2. shape inference reruns over the bound tensors' concrete metadata with
//!    strict dimension checks, so no kernel ever sees inconsistent inputs;
//! 3. the kernel is selected by `(op type, device, dtype)` and invoked;
//! 4. the produced tensors are checked against the inferred descriptors and
//!    written to the scope together, or not at all.
//!
//! With [`ExecutorConfig::release_no_need_buffers`], [`Executor::run`] drops
//! the contents of variables bound to a no-need-buffer slot once the last node
//! of the graph reading them has run.

use crate::config::ExecutorConfig;
use crate::error::{OpError, ShapeMismatchDetail};
use crate::grad::is_empty_var;
use crate::graph::Graph;
use crate::infer_shape::{run_infer_shape, CheckPhase};
use crate::kernel::KernelContext;
use crate::node::OperatorNode;
use crate::registry::Catalog;
use crate::scope::ExecutionContext;
use crate::shape::{is_dynamic, VarDesc};
use crate::tensor::Tensor;
use log::{debug, trace};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
pub struct Executor<'c> {
    catalog: &'c Catalog,
    config: ExecutorConfig,
}

impl<'c> Executor<'c> {
    pub fn new(catalog: &'c Catalog) -> Self {
        Self::with_config(catalog, ExecutorConfig::default())
    }

    pub fn with_config(catalog: &'c Catalog, config: ExecutorConfig) -> Self {
        Executor { catalog, config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Runs every node of `graph` in order. Stops at the first failure; outputs
    /// of nodes that already ran stay in the scope.
    pub fn run(&self, graph: &Graph<'_>, ctx: &mut ExecutionContext) -> Result<(), OpError> {
        let releases = if self.config.release_no_need_buffers {
            self.release_plan(graph.nodes())?
        } else {
            BTreeMap::new()
        };
        for (index, node) in graph.nodes().iter().enumerate() {
            self.run_node(node, ctx)?;
            for var in releases.get(&index).into_iter().flatten() {
                if let Some(tensor) = ctx.scope.find_var(var) {
                    let released = tensor.released();
                    debug!("Releasing buffer of '{}' after {} {}", var, index, node.op_type());
                    ctx.scope.set_var(var.as_str(), released);
                }
            }
        }
        Ok(())
    }

    /// Node index -> variables to release after it runs. A variable bound to a
    /// no-need-buffer slot is released after the last node reading it.
    fn release_plan(&self, nodes: &[OperatorNode]) -> Result<BTreeMap<usize, Vec<String>>, OpError> {
        let mut candidates = BTreeSet::new();
        for node in nodes {
            let info = self.catalog.lookup(node.op_type())?;
            for slot in info.no_need_buffer() {
                for var in node.input(slot) {
                    if !node.output_vars().any(|o| o == var) {
                        candidates.insert(var.as_str());
                    }
                }
            }
        }

        let mut last_read: BTreeMap<&str, usize> = BTreeMap::new();
        for (index, node) in nodes.iter().enumerate() {
            for var in node.input_vars() {
                last_read.insert(var, index);
            }
        }

        let mut plan: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for var in candidates {
            if let Some(&read) = last_read.get(var) {
                plan.entry(read).or_default().push(var.to_string());
            }
        }
        Ok(plan)
    }

    /// Runs one node.
    ///
    /// # Errors
    /// `UnboundVariable`, runtime `ShapeMismatch`, `NoKernelFound`, or
    /// `KernelFailure`. On error the scope is unchanged.
    pub fn run_node(&self, node: &OperatorNode, ctx: &mut ExecutionContext) -> Result<(), OpError> {
        let info = self.catalog.lookup(node.op_type())?;

        for var in node.input_vars() {
            if !ctx.scope.contains(var) {
                return Err(OpError::UnboundVariable {
                    op_type: node.op_type().to_string(),
                    name: var.to_string(),
                });
            }
        }

        let table = ctx.scope.symbol_table(node.input_vars());
        let inferred = run_infer_shape(info.infer_shape(), node, &table, CheckPhase::Runtime)?;

        let key = self.catalog.kernel_key(node, ctx)?;
        let kernel = self.catalog.kernels().select(&key)?;

        let inputs = bound_inputs(node, ctx);
        let output_descs: BTreeMap<String, Vec<VarDesc>> = node
            .outputs()
            .iter()
            .map(|(slot, vars)| {
                let descs: Vec<VarDesc> = vars.iter().filter_map(|v| inferred.get(v).cloned()).collect();
                (slot.clone(), descs)
            })
            .collect();

        debug!("Launching kernel {}", key);
        let mut kernel_ctx = KernelContext::new(node.op_type(), ctx.device, node.attrs(), inputs, output_descs);
        kernel(&mut kernel_ctx)?;
        let produced = kernel_ctx.into_outputs();

        let writes = self.collect_writes(node, &inferred, produced)?;
        for (var, tensor) in writes {
            trace!("{} -> {}", node.op_type(), var);
            ctx.scope.set_var(var, tensor);
        }
        Ok(())
    }

    /// Pairs produced tensors with their output variables, verifying them when
    /// configured to.
    fn collect_writes(
        &self,
        node: &OperatorNode,
        inferred: &BTreeMap<String, VarDesc>,
        mut produced: BTreeMap<String, Vec<Tensor>>,
    ) -> Result<Vec<(String, Tensor)>, OpError> {
        let op_type = node.op_type();
        if let Some(slot) = produced.keys().find(|s| !node.has_output(s)) {
            return Err(OpError::kernel_failure(
                op_type,
                format!("kernel wrote undeclared output slot '{}'", slot),
            ));
        }

        let mut writes = Vec::new();
        for (slot, vars) in node.outputs() {
            let tensors = produced.remove(slot).unwrap_or_default();
            if tensors.len() != vars.len() {
                return Err(OpError::kernel_failure(
                    op_type,
                    format!(
                        "output slot '{}' binds {} variables, kernel produced {} tensors",
                        slot,
                        vars.len(),
                        tensors.len()
                    ),
                ));
            }
            for (var, tensor) in vars.iter().zip(tensors) {
                if is_empty_var(var) {
                    continue;
                }
                if self.config.verify_outputs {
                    if let Some(expected) = inferred.get(var) {
                        verify_output(op_type, slot, expected, &tensor)?;
                    }
                }
                writes.push((var.clone(), tensor));
            }
        }
        Ok(writes)
    }
}

fn bound_inputs(node: &OperatorNode, ctx: &ExecutionContext) -> BTreeMap<String, Vec<Tensor>> {
    node.inputs()
        .iter()
        .map(|(slot, vars)| {
            let tensors: Vec<Tensor> = vars
                .iter()
                .filter_map(|v| ctx.scope.find_var(v).cloned())
                .collect();
            (slot.clone(), tensors)
        })
        .collect()
}

/// A produced tensor matches when dtype and rank agree and every static
/// expected dimension is equal.
fn verify_output(op_type: &str, slot: &str, expected: &VarDesc, tensor: &Tensor) -> Result<(), OpError> {
    let actual = tensor.desc();
    let dims_match = expected.shape.rank() == actual.shape.rank()
        && expected
            .shape
            .dims()
            .iter()
            .zip(actual.shape.dims())
            .all(|(&e, &a)| is_dynamic(e) || e == a);
    if dims_match && expected.dtype == actual.dtype {
        return Ok(());
    }
    Err(OpError::ShapeMismatch {
        op_type: op_type.to_string(),
        phase: CheckPhase::Runtime,
        detail: ShapeMismatchDetail::Output {
            slot: slot.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        },
    })
}

#[cfg(test)]
#[path = "executor_test.rs"]
mod tests;
