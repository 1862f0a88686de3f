//! Execution-time collaborators: the variable scope and the execution context.

use crate::device::DeviceKind;
use crate::shape::SymbolTable;
use crate::tensor::Tensor;
use std::collections::HashMap;

/// Owns the tensors bound to variable names for one execution.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: HashMap<String, Tensor>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `tensor` to `name`, returning the previously bound tensor.
    pub fn set_var(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.vars.insert(name.into(), tensor)
    }

    pub fn find_var(&self, name: &str) -> Option<&Tensor> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Concrete descriptors of the named variables that are bound.
    pub(crate) fn symbol_table<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> SymbolTable {
        let mut table = SymbolTable::new();
        for name in names {
            if let Some(tensor) = self.vars.get(name) {
                table.insert(name, tensor.desc());
            }
        }
        table
    }
}

/// The device an execution runs on plus the scope holding its tensors.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub device: DeviceKind,
    pub scope: Scope,
}

impl ExecutionContext {
    pub fn new(device: DeviceKind) -> Self {
        ExecutionContext {
            device,
            scope: Scope::new(),
        }
    }
}
