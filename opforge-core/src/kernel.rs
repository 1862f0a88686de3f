//! # Kernel Dispatch Table
//!
//! A kernel is one concrete implementation of an operator type for a
//! `(device kind, data type)` pair. Kernels are stored type-erased in a
//! [`KernelTable`] keyed by [`KernelKey`] and selected at execution time; a
//! missing key is reported as `NoKernelFound`, never papered over by converting
//! data or switching device.

use crate::attribute::{AttrType, AttrValue, AttributeMap};
use crate::device::DeviceKind;
use crate::error::{OpError, SchemaViolationKind};
use crate::shape::VarDesc;
use crate::tensor::Tensor;
use crate::types::DType;
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Identifies one registered kernel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KernelKey {
    pub op_type: String,
    pub device: DeviceKind,
    pub dtype: DType,
}

impl KernelKey {
    pub fn new(op_type: impl Into<String>, device: DeviceKind, dtype: DType) -> Self {
        KernelKey {
            op_type: op_type.into(),
            device,
            dtype,
        }
    }
}

impl fmt::Display for KernelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}, {}]", self.op_type, self.device, self.dtype)
    }
}

/// A type-erased kernel. It reads inputs and attributes from the context and
/// stores its outputs with [`KernelContext::set_output`].
pub type KernelFn = Arc<dyn Fn(&mut KernelContext<'_>) -> Result<(), OpError> + Send + Sync>;

/// Everything a kernel sees during one invocation.
pub struct KernelContext<'a> {
    op_type: &'a str,
    device: DeviceKind,
    attrs: &'a AttributeMap,
    inputs: BTreeMap<String, Vec<Tensor>>,
    output_descs: BTreeMap<String, Vec<VarDesc>>,
    outputs: BTreeMap<String, Vec<Tensor>>,
}

impl<'a> KernelContext<'a> {
    /// `output_descs` holds the runtime-inferred descriptors of each output slot.
    pub fn new(
        op_type: &'a str,
        device: DeviceKind,
        attrs: &'a AttributeMap,
        inputs: BTreeMap<String, Vec<Tensor>>,
        output_descs: BTreeMap<String, Vec<VarDesc>>,
    ) -> Self {
        KernelContext {
            op_type,
            device,
            attrs,
            inputs,
            output_descs,
            outputs: BTreeMap::new(),
        }
    }

    pub fn op_type(&self) -> &str {
        self.op_type
    }

    pub fn device(&self) -> DeviceKind {
        self.device
    }

    pub fn attrs(&self) -> &AttributeMap {
        self.attrs
    }

    pub fn attr(&self, name: &str) -> Result<&AttrValue, OpError> {
        self.attrs.get(name).ok_or_else(|| {
            OpError::schema(
                self.op_type,
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
                self.op_type,
                SchemaViolationKind::AttributeTypeMismatch {
                    name: name.to_string(),
                    expected: AttrType::Str,
                    actual: value.attr_type(),
                },
            )
        })
    }

    pub fn has_input(&self, slot: &str) -> bool {
        self.inputs.get(slot).map_or(false, |v| !v.is_empty())
    }

    /// First tensor bound to `slot`.
    pub fn input(&self, slot: &str) -> Result<&Tensor, OpError> {
        self.inputs
            .get(slot)
            .and_then(|v| v.first())
            .ok_or_else(|| OpError::kernel_failure(self.op_type, format!("input slot '{}' is not bound", slot)))
    }

    pub fn inputs(&self, slot: &str) -> &[Tensor] {
        self.inputs.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_output(&self, slot: &str) -> bool {
        self.output_descs.get(slot).map_or(false, |v| !v.is_empty())
    }

    /// Runtime-inferred descriptor of the first variable bound to `slot`.
    pub fn output_desc(&self, slot: &str) -> Result<&VarDesc, OpError> {
        self.output_descs
            .get(slot)
            .and_then(|v| v.first())
            .ok_or_else(|| OpError::kernel_failure(self.op_type, format!("output slot '{}' is not bound", slot)))
    }

    /// Stores the result for a single-variable output slot.
    pub fn set_output(&mut self, slot: &str, tensor: Tensor) {
        self.outputs.insert(slot.to_string(), vec![tensor]);
    }

    pub fn set_outputs(&mut self, slot: &str, tensors: Vec<Tensor>) {
        self.outputs.insert(slot.to_string(), tensors);
    }

    /// Output slot -> tensors produced by the kernel.
    pub fn into_outputs(self) -> BTreeMap<String, Vec<Tensor>> {
        self.outputs
    }
}

/// `KernelKey` -> kernel function.
#[derive(Clone, Default)]
pub struct KernelTable {
    kernels: HashMap<KernelKey, KernelFn>,
}

impl fmt::Debug for KernelTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelTable")
            .field("keys", &self.keys())
            .finish()
    }
}

impl KernelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts one kernel.
    ///
    /// # Errors
    /// `OpError::DuplicateKernel` if the key is taken; the table is unchanged.
    pub fn register_kernel(
        &mut self,
        op_type: &str,
        device: DeviceKind,
        dtype: DType,
        kernel: KernelFn,
    ) -> Result<(), OpError> {
        let key = KernelKey::new(op_type, device, dtype);
        if self.kernels.contains_key(&key) {
            return Err(OpError::DuplicateKernel { key });
        }
        debug!("Registered kernel {}", key);
        self.kernels.insert(key, kernel);
        Ok(())
    }

    pub fn contains(&self, key: &KernelKey) -> bool {
        self.kernels.contains_key(key)
    }

    /// # Errors
    /// `OpError::NoKernelFound` listing the keys registered for the same op type.
    pub fn select(&self, key: &KernelKey) -> Result<&KernelFn, OpError> {
        self.kernels.get(key).ok_or_else(|| OpError::NoKernelFound {
            key: key.clone(),
            available: self.keys_for(&key.op_type),
        })
    }

    /// Registered keys for one op type, sorted.
    pub fn keys_for(&self, op_type: &str) -> Vec<KernelKey> {
        let mut keys: Vec<KernelKey> = self
            .kernels
            .keys()
            .filter(|k| k.op_type == op_type)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Every registered key, sorted.
    pub fn keys(&self) -> Vec<KernelKey> {
        let mut keys: Vec<KernelKey> = self.kernels.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

#[cfg(test)]
#[path = "kernel_test.rs"]
mod tests;
