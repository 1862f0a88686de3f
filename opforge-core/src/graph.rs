//! # Graph-building API
//!
//! A [`Graph`] is an ordered list of validated [`OperatorNode`]s plus the
//! symbol table of every variable they touch. Each mutation either succeeds
//! completely or leaves the graph as it was.

use crate::attribute::AttributeMap;
use crate::error::OpError;
use crate::grad::{renamed_grad_var, GradientSpec};
use crate::infer_shape::{run_infer_shape, CheckPhase};
use crate::node::{OperatorNode, SlotMap};
use crate::registry::Catalog;
use crate::shape::{Shape, SymbolTable, VarDesc};
use crate::types::DType;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Position of a node in its [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Graph<'c> {
    catalog: &'c Catalog,
    vars: SymbolTable,
    nodes: Vec<OperatorNode>,
}

impl<'c> Graph<'c> {
    pub fn new(catalog: &'c Catalog) -> Self {
        Graph {
            catalog,
            vars: SymbolTable::new(),
            nodes: Vec::new(),
        }
    }

    pub fn catalog(&self) -> &'c Catalog {
        self.catalog
    }

    /// Declares (or redeclares) a graph input. Dims may be
    /// [`DYNAMIC_DIM`](crate::shape::DYNAMIC_DIM).
    pub fn declare_var(&mut self, name: &str, shape: impl Into<Shape>, dtype: DType) {
        self.vars.insert(name, VarDesc::new(shape, dtype));
    }

    /// Validates and appends a new operator instance.
    ///
    /// Steps: look up the type, validate attributes (defaults filled in) and
    /// slot bindings against its schema, run static shape inference, then
    /// record the inferred output descriptors.
    ///
    /// # Errors
    /// `UnknownOperatorType`, `SchemaViolation` or `ShapeMismatch`; the graph is
    /// unchanged.
    pub fn create_operator(
        &mut self,
        op_type: &str,
        attrs: AttributeMap,
        inputs: SlotMap,
        outputs: SlotMap,
    ) -> Result<NodeId, OpError> {
        self.add_node(OperatorNode::new(op_type, inputs, outputs, attrs))
    }

    /// Like [`create_operator`](Self::create_operator) for a node assembled
    /// with [`OperatorNode::builder`].
    pub fn add_node(&mut self, node: OperatorNode) -> Result<NodeId, OpError> {
        let node = self.validate(&node)?;
        let inferred = self.infer_static(&node, &self.vars)?;
        for (name, desc) in inferred {
            self.vars.insert(name, desc);
        }
        Ok(self.push(node))
    }

    /// Appends the backward nodes of node `id`.
    ///
    /// `output_grads` maps forward output variables to their gradient
    /// variables. Gradient variables not declared yet take their output's
    /// descriptor.
    pub fn request_gradient(
        &mut self,
        id: NodeId,
        output_grads: &BTreeMap<String, String>,
    ) -> Result<GradientSpec, OpError> {
        self.request_gradient_with(id, output_grads, &BTreeSet::new())
    }

    /// Like [`request_gradient`](Self::request_gradient); inputs bound only to
    /// variables in `no_grad_vars` get no gradient.
    ///
    /// An input gradient whose plain name `v@GRAD` is already declared or
    /// written by an earlier node is renamed to the first free
    /// `v@GRAD@RENAME@<n>`; [`GradientSpec::input_grads`] reports the name
    /// actually used.
    pub fn request_gradient_with(
        &mut self,
        id: NodeId,
        output_grads: &BTreeMap<String, String>,
        no_grad_vars: &BTreeSet<String>,
    ) -> Result<GradientSpec, OpError> {
        let forward = self
            .node(id)
            .cloned()
            .ok_or_else(|| OpError::InternalError(format!("Graph has no node {}", id)))?;
        let mut spec = self.catalog.build_gradient_with(&forward, output_grads, no_grad_vars)?;
        self.rename_taken_grads(&mut spec);

        let mut staged = self.vars.clone();
        for var in forward.output_vars() {
            let grad = match output_grads.get(var) {
                Some(grad) => grad,
                None => continue,
            };
            if staged.contains(grad) {
                continue;
            }
            if let Some(desc) = self.vars.get(var) {
                staged.insert(grad.as_str(), desc.clone());
            }
        }
        for node in &spec.nodes {
            for (name, desc) in self.infer_static(node, &staged)? {
                staged.insert(name, desc);
            }
        }

        self.vars = staged;
        for node in &spec.nodes {
            self.push(node.clone());
        }
        Ok(spec)
    }

    pub fn nodes(&self) -> &[OperatorNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&OperatorNode> {
        self.nodes.get(id.0)
    }

    pub fn var(&self, name: &str) -> Option<&VarDesc> {
        self.vars.get(name)
    }

    pub fn vars(&self) -> &SymbolTable {
        &self.vars
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn validate(&self, node: &OperatorNode) -> Result<OperatorNode, OpError> {
        let schema = self.catalog.lookup(node.op_type())?.schema();
        let attrs = schema.validate(node.attrs())?;
        schema.validate_bindings(node.inputs(), node.outputs())?;
        Ok(node.with_attrs(attrs))
    }

    fn infer_static(
        &self,
        node: &OperatorNode,
        vars: &SymbolTable,
    ) -> Result<BTreeMap<String, VarDesc>, OpError> {
        let info = self.catalog.lookup(node.op_type())?;
        run_infer_shape(info.infer_shape(), node, vars, CheckPhase::Static)
    }

    fn is_taken(&self, name: &str) -> bool {
        self.vars.contains(name) || self.nodes.iter().any(|n| n.output_vars().any(|o| o == name))
    }

    fn rename_taken_grads(&self, spec: &mut GradientSpec) {
        let grads: Vec<(String, String)> = spec
            .input_grads
            .iter()
            .map(|(var, grad)| (var.clone(), grad.clone()))
            .collect();
        for (var, grad) in grads {
            if !self.is_taken(&grad) {
                continue;
            }
            let mut n = 1;
            let mut fresh = renamed_grad_var(&grad, n);
            while self.is_taken(&fresh) || spec.input_grads.values().any(|g| *g == fresh) {
                n += 1;
                fresh = renamed_grad_var(&grad, n);
            }
            debug!("Gradient '{}' already exists; writing '{}' instead", grad, fresh);
            spec.rename_input_grad(&var, &fresh);
        }
    }

    fn push(&mut self, node: OperatorNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        debug!("Appended node {} {}", id, node);
        self.nodes.push(node);
        id
    }
}

#[cfg(test)]
#[path = "graph_test.rs"]
mod tests;
