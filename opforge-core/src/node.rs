//! Operator nodes: one operator instance in a computation graph.

use crate::attribute::{AttrValue, AttributeMap};
use std::collections::BTreeMap;
use std::fmt;

/// Slot name -> bound variable names.
pub type SlotMap = BTreeMap<String, Vec<String>>;

/// An operator instance: type, slot bindings (by variable name) and attributes.
///
/// Nodes are immutable. The `with_*` methods return a modified copy, so a graph
/// rewrite never changes a node that other code may still hold.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorNode {
    op_type: String,
    inputs: SlotMap,
    outputs: SlotMap,
    attrs: AttributeMap,
}

impl OperatorNode {
    pub fn new(op_type: impl Into<String>, inputs: SlotMap, outputs: SlotMap, attrs: AttributeMap) -> Self {
        OperatorNode {
            op_type: op_type.into(),
            inputs,
            outputs,
            attrs,
        }
    }

    pub fn builder(op_type: impl Into<String>) -> NodeBuilder {
        NodeBuilder {
            node: OperatorNode::new(op_type, SlotMap::new(), SlotMap::new(), AttributeMap::new()),
        }
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn inputs(&self) -> &SlotMap {
        &self.inputs
    }

    pub fn outputs(&self) -> &SlotMap {
        &self.outputs
    }

    pub fn attrs(&self) -> &AttributeMap {
        &self.attrs
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    /// Variables bound to an input slot; empty when the slot is unbound.
    pub fn input(&self, slot: &str) -> &[String] {
        self.inputs.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Variables bound to an output slot; empty when the slot is unbound.
    pub fn output(&self, slot: &str) -> &[String] {
        self.outputs.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_input(&self, slot: &str) -> bool {
        !self.input(slot).is_empty()
    }

    pub fn has_output(&self, slot: &str) -> bool {
        !self.output(slot).is_empty()
    }

    /// Every variable read by this node, in slot order.
    pub fn input_vars(&self) -> impl Iterator<Item = &str> {
        self.inputs.values().flatten().map(String::as_str)
    }

    /// Every variable written by this node, in slot order.
    pub fn output_vars(&self) -> impl Iterator<Item = &str> {
        self.outputs.values().flatten().map(String::as_str)
    }

    pub fn with_attr(&self, name: impl Into<String>, value: AttrValue) -> Self {
        let mut node = self.clone();
        node.attrs.insert(name.into(), value);
        node
    }

    pub fn with_attrs(&self, attrs: AttributeMap) -> Self {
        let mut node = self.clone();
        node.attrs = attrs;
        node
    }

    pub fn with_input<I, S>(&self, slot: impl Into<String>, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut node = self.clone();
        set_slot(&mut node.inputs, slot.into(), vars);
        node
    }

    pub fn with_output<I, S>(&self, slot: impl Into<String>, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut node = self.clone();
        set_slot(&mut node.outputs, slot.into(), vars);
        node
    }

    /// Replaces every output binding of `from` with `to`.
    pub fn rename_output_var(&self, from: &str, to: &str) -> Self {
        let mut node = self.clone();
        for var in node.outputs.values_mut().flatten() {
            if var == from {
                *var = to.to_string();
            }
        }
        node
    }
}

impl fmt::Display for OperatorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.op_type)?;
        write_slots(f, &self.inputs)?;
        write!(f, ") -> (")?;
        write_slots(f, &self.outputs)?;
        write!(f, ")")
    }
}

fn write_slots(f: &mut fmt::Formatter<'_>, slots: &SlotMap) -> fmt::Result {
    for (i, (slot, vars)) in slots.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}={:?}", slot, vars)?;
    }
    Ok(())
}

// An empty variable list removes the slot instead of binding nothing.
fn set_slot<I, S>(slots: &mut SlotMap, slot: String, vars: I)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let vars: Vec<String> = vars.into_iter().map(Into::into).collect();
    if vars.is_empty() {
        slots.remove(&slot);
    } else {
        slots.insert(slot, vars);
    }
}

/// Assembles an [`OperatorNode`] slot by slot; used by gradient makers and tests.
#[derive(Debug, Clone)]
pub struct NodeBuilder {
    node: OperatorNode,
}

impl NodeBuilder {
    pub fn input<I, S>(mut self, slot: impl Into<String>, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        set_slot(&mut self.node.inputs, slot.into(), vars);
        self
    }

    pub fn output<I, S>(mut self, slot: impl Into<String>, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        set_slot(&mut self.node.outputs, slot.into(), vars);
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: AttrValue) -> Self {
        self.node.attrs.insert(name.into(), value);
        self
    }

    pub fn attrs(mut self, attrs: AttributeMap) -> Self {
        self.node.attrs = attrs;
        self
    }

    pub fn build(self) -> OperatorNode {
        self.node
    }
}

#[cfg(test)]
#[path = "node_test.rs"]
mod tests;
