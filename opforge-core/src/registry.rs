//! # Operator Registry / Catalog
//!
//! Registration happens in two phases:
//!
//! 1. **Initialization**: a mutable [`CatalogBuilder`] receives one
//!    [`OperatorDef`] per operator type plus any standalone kernels, in any
//!    order. Conflicts (`DuplicateOperatorType`, `DuplicateKernel`) are
//!    programming errors and abort initialization.
//! 2. **Use**: [`CatalogBuilder::build`] is the quiescence barrier. It checks
//!    that every kernel belongs to a registered operator type and returns an
//!    immutable [`Catalog`], which is `Send + Sync` and needs no locking.
//!
//! The process-wide catalog is built once from [`ops::register_all`] by
//! [`init_global`]. Tests construct their own catalogs.
//!
//! [`ops::register_all`]: crate::ops::register_all

use crate::device::DeviceKind;
use crate::error::OpError;
use crate::grad::{self, GradMaker, GradientSpec};
use crate::infer_shape::InferShapeFn;
use crate::kernel::{KernelFn, KernelKey, KernelTable};
use crate::node::OperatorNode;
use crate::scope::ExecutionContext;
use crate::schema::Schema;
use crate::types::DType;
use log::{debug, info, trace};
use once_cell::sync::OnceCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// The capability bundle of one operator type as stored in the catalog.
#[derive(Clone)]
pub struct OpInfo {
    schema: Schema,
    infer_shape: InferShapeFn,
    grad_maker: Option<GradMaker>,
    no_need_buffer: BTreeSet<String>,
    kernel_dtype_slot: Option<String>,
}

impl fmt::Debug for OpInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpInfo")
            .field("op_type", &self.schema.op_type())
            .field("grad_maker", &self.grad_maker)
            .field("no_need_buffer", &self.no_need_buffer)
            .field("kernel_dtype_slot", &self.kernel_dtype_slot)
            .finish()
    }
}

impl OpInfo {
    pub fn op_type(&self) -> &str {
        self.schema.op_type()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn infer_shape(&self) -> &InferShapeFn {
        &self.infer_shape
    }

    pub fn grad_maker(&self) -> Option<&GradMaker> {
        self.grad_maker.as_ref()
    }

    /// Input slots whose tensor contents this op never reads.
    pub fn no_need_buffer(&self) -> &BTreeSet<String> {
        &self.no_need_buffer
    }

    /// Input slot whose dtype selects the kernel: the declared one, else the
    /// first declared input.
    pub fn kernel_dtype_slot(&self) -> Option<&str> {
        self.kernel_dtype_slot
            .as_deref()
            .or_else(|| self.schema.inputs().first().map(|s| s.name.as_str()))
    }
}

/// Everything one operator type contributes at registration.
pub struct OperatorDef {
    info: OpInfo,
    kernels: Vec<(DeviceKind, DType, KernelFn)>,
}

impl OperatorDef {
    pub fn new(schema: Schema, infer_shape: InferShapeFn) -> Self {
        OperatorDef {
            info: OpInfo {
                schema,
                infer_shape,
                grad_maker: None,
                no_need_buffer: BTreeSet::new(),
                kernel_dtype_slot: None,
            },
            kernels: Vec::new(),
        }
    }

    pub fn op_type(&self) -> &str {
        self.info.op_type()
    }

    pub fn grad_maker(mut self, maker: GradMaker) -> Self {
        self.info.grad_maker = Some(maker);
        self
    }

    pub fn no_need_buffer<I, S>(mut self, slots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.info.no_need_buffer = slots.into_iter().map(Into::into).collect();
        self
    }

    pub fn kernel_dtype_slot(mut self, slot: &str) -> Self {
        self.info.kernel_dtype_slot = Some(slot.to_string());
        self
    }

    pub fn kernel(mut self, device: DeviceKind, dtype: DType, kernel: KernelFn) -> Self {
        self.kernels.push((device, dtype, kernel));
        self
    }
}

/// Mutable registration phase of a [`Catalog`].
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    ops: HashMap<String, OpInfo>,
    kernels: KernelTable,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an operator type with its kernels.
    ///
    /// # Errors
    /// `DuplicateOperatorType` if the type exists, `DuplicateKernel` if any of its
    /// kernel keys exists (or repeats within `def`), `SchemaViolation` if a
    /// no-need-buffer or kernel dtype slot is not a declared input. On error the
    /// builder is unchanged.
    pub fn register(&mut self, def: OperatorDef) -> Result<(), OpError> {
        let op_type = def.op_type().to_string();
        if self.ops.contains_key(&op_type) {
            return Err(OpError::DuplicateOperatorType { op_type });
        }

        let schema = def.info.schema();
        let declared_slots = def
            .info
            .no_need_buffer
            .iter()
            .chain(def.info.kernel_dtype_slot.iter());
        for slot in declared_slots {
            if schema.input(slot).is_none() {
                return Err(OpError::schema(
                    &op_type,
                    crate::error::SchemaViolationKind::UnknownSlot { slot: slot.clone() },
                ));
            }
        }

        let mut keys = BTreeSet::new();
        for (device, dtype, _) in &def.kernels {
            let key = KernelKey::new(op_type.as_str(), *device, *dtype);
            if self.kernels.contains(&key) || !keys.insert(key.clone()) {
                return Err(OpError::DuplicateKernel { key });
            }
        }

        for (device, dtype, kernel) in def.kernels {
            self.kernels.register_kernel(&op_type, device, dtype, kernel)?;
        }
        debug!("Registered operator '{}'", op_type);
        self.ops.insert(op_type, def.info);
        Ok(())
    }

    /// Registers a kernel on its own. The operator type may be registered
    /// before or after; [`build`](Self::build) checks it exists.
    pub fn register_kernel(
        &mut self,
        op_type: &str,
        device: DeviceKind,
        dtype: DType,
        kernel: KernelFn,
    ) -> Result<(), OpError> {
        self.kernels.register_kernel(op_type, device, dtype, kernel)
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.ops.contains_key(op_type)
    }

    /// Ends registration.
    ///
    /// # Errors
    /// `UnknownOperatorType` for a kernel whose operator type never registered.
    pub fn build(self) -> Result<Catalog, OpError> {
        for key in self.kernels.keys() {
            if !self.ops.contains_key(&key.op_type) {
                return Err(OpError::UnknownOperatorType {
                    op_type: key.op_type,
                });
            }
        }
        info!(
            "Operator catalog sealed: {} operator types, {} kernels",
            self.ops.len(),
            self.kernels.len()
        );
        Ok(Catalog {
            ops: self.ops,
            kernels: self.kernels,
        })
    }
}

/// Immutable operator catalog.
#[derive(Debug)]
pub struct Catalog {
    ops: HashMap<String, OpInfo>,
    kernels: KernelTable,
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    /// # Errors
    /// `OpError::UnknownOperatorType` if `op_type` was never registered.
    pub fn lookup(&self, op_type: &str) -> Result<&OpInfo, OpError> {
        self.ops.get(op_type).ok_or_else(|| OpError::UnknownOperatorType {
            op_type: op_type.to_string(),
        })
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.ops.contains_key(op_type)
    }

    /// Registered operator types, sorted.
    pub fn op_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.ops.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn kernels(&self) -> &KernelTable {
        &self.kernels
    }

    /// Kernel key for `node` in `ctx`: op type, context device, and the dtype
    /// of the tensor bound to the op's kernel dtype slot.
    pub fn kernel_key(&self, node: &OperatorNode, ctx: &ExecutionContext) -> Result<KernelKey, OpError> {
        let info = self.lookup(node.op_type())?;
        let slot = info.kernel_dtype_slot().ok_or_else(|| {
            OpError::InternalError(format!(
                "Operator '{}' declares no input to take the kernel dtype from",
                node.op_type()
            ))
        })?;
        let var = node.input(slot).first().ok_or_else(|| {
            OpError::schema(
                node.op_type(),
                crate::error::SchemaViolationKind::MissingSlot {
                    slot: slot.to_string(),
                },
            )
        })?;
        let tensor = ctx.scope.find_var(var).ok_or_else(|| OpError::UnboundVariable {
            op_type: node.op_type().to_string(),
            name: var.clone(),
        })?;
        Ok(KernelKey::new(node.op_type(), ctx.device, tensor.dtype()))
    }

    /// Selects the kernel for `node` in `ctx`.
    ///
    /// # Errors
    /// `NoKernelFound` when the exact key is not registered. No dtype or device
    /// fallback is attempted.
    pub fn dispatch(&self, node: &OperatorNode, ctx: &ExecutionContext) -> Result<&KernelFn, OpError> {
        let key = self.kernel_key(node, ctx)?;
        trace!("Dispatching {}", key);
        self.kernels.select(&key)
    }

    /// Builds the backward nodes of `forward`.
    ///
    /// `output_grads` maps each differentiable forward output variable to the
    /// name of its gradient variable.
    pub fn build_gradient(
        &self,
        forward: &OperatorNode,
        output_grads: &BTreeMap<String, String>,
    ) -> Result<GradientSpec, OpError> {
        grad::build_gradient(self, forward, output_grads, &BTreeSet::new())
    }

    /// Like [`build_gradient`](Self::build_gradient); inputs bound only to
    /// variables in `no_grad_vars` get no gradient output.
    pub fn build_gradient_with(
        &self,
        forward: &OperatorNode,
        output_grads: &BTreeMap<String, String>,
        no_grad_vars: &BTreeSet<String>,
    ) -> Result<GradientSpec, OpError> {
        grad::build_gradient(self, forward, output_grads, no_grad_vars)
    }
}

static GLOBAL_CATALOG: OnceCell<Catalog> = OnceCell::new();

/// Builds the process-wide catalog from [`ops::register_all`] on first call.
///
/// Later calls return the same instance. A registration error is returned on
/// every call until one succeeds, since nothing is stored on failure.
///
/// [`ops::register_all`]: crate::ops::register_all
pub fn init_global() -> Result<&'static Catalog, OpError> {
    GLOBAL_CATALOG.get_or_try_init(|| {
        debug!("Initializing global operator catalog...");
        let mut builder = CatalogBuilder::new();
        crate::ops::register_all(&mut builder)?;
        builder.build()
    })
}

/// The process-wide catalog.
///
/// # Panics
/// Panics if registration fails. Registration errors are programming errors in
/// the shipped operator set, so the process cannot continue.
pub fn global() -> &'static Catalog {
    match init_global() {
        Ok(catalog) => catalog,
        Err(e) => panic!("Failed to initialize the operator catalog: {}", e),
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
