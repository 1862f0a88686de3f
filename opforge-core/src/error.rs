use crate::attribute::AttrType;
use crate::infer_shape::CheckPhase;
use crate::kernel::KernelKey;
use crate::types::DType;
use thiserror::Error;

/// Custom error type for the opforge operator core.
///
/// Variants follow three propagation classes:
/// * registration errors (`DuplicateOperatorType`, `DuplicateKernel`) are programming
///   errors and abort catalog initialization (see [`OpError::is_fatal`]);
/// * graph-construction errors (`SchemaViolation`, static `ShapeMismatch`,
///   `IncompleteGradientRequest`, `NotDifferentiable`, `UnknownOperatorType`) are
///   returned to the graph-building caller;
/// * execution errors (runtime `ShapeMismatch`, `NoKernelFound`, `UnboundVariable`,
///   `KernelFailure`) abort the single execution request. Nothing is retried.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum OpError {
    #[error("Schema violation in operator '{op_type}': {violation}")]
    SchemaViolation {
        op_type: String,
        violation: SchemaViolationKind,
    },

    #[error("Shape mismatch in operator '{op_type}' ({phase} check): {detail}")]
    ShapeMismatch {
        op_type: String,
        phase: CheckPhase,
        detail: ShapeMismatchDetail,
    },

    #[error("Operator type '{op_type}' is already registered")]
    DuplicateOperatorType { op_type: String },

    #[error("Kernel {key} is already registered")]
    DuplicateKernel { key: KernelKey },

    #[error("Operator type '{op_type}' is not registered")]
    UnknownOperatorType { op_type: String },

    #[error("No kernel registered for {key} (available: {available:?})")]
    NoKernelFound {
        key: KernelKey,
        available: Vec<KernelKey>,
    },

    #[error("Gradient request for operator '{op_type}' does not cover differentiable outputs {missing:?}")]
    IncompleteGradientRequest { op_type: String, missing: Vec<String> },

    #[error("Operator '{op_type}' has no gradient maker")]
    NotDifferentiable { op_type: String },

    #[error("Variable '{name}' used by operator '{op_type}' is not bound in the execution scope")]
    UnboundVariable { op_type: String, name: String },

    #[error("Kernel for operator '{op_type}' failed: {message}")]
    KernelFailure { op_type: String, message: String },

    #[error("Tensor creation error: data length {data_len} does not match shape {shape:?}")]
    TensorCreationError { data_len: usize, shape: Vec<usize> },

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl OpError {
    /// Returns `true` for registration conflicts, which indicate a programming error
    /// in the operator set and must abort initialization.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OpError::DuplicateOperatorType { .. } | OpError::DuplicateKernel { .. }
        )
    }

    pub(crate) fn schema(op_type: &str, violation: SchemaViolationKind) -> Self {
        OpError::SchemaViolation {
            op_type: op_type.to_string(),
            violation,
        }
    }

    pub(crate) fn kernel_failure(op_type: &str, message: impl Into<String>) -> Self {
        OpError::KernelFailure {
            op_type: op_type.to_string(),
            message: message.into(),
        }
    }
}

/// What exactly was wrong with an attribute map, a slot binding or a declaration.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum SchemaViolationKind {
    #[error("required attribute '{name}' is missing and has no default")]
    MissingAttribute { name: String },

    #[error("attribute '{name}' is not declared")]
    UnknownAttribute { name: String },

    #[error("attribute '{name}' expects {expected}, got {actual}")]
    AttributeTypeMismatch {
        name: String,
        expected: AttrType,
        actual: AttrType,
    },

    #[error("attribute '{name}' = {value:?} is not one of {allowed:?}")]
    InvalidAttributeValue {
        name: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("required slot '{slot}' is not bound")]
    MissingSlot { slot: String },

    #[error("slot '{slot}' is not declared")]
    UnknownSlot { slot: String },

    #[error("slot '{slot}' binds {actual} variables but is not duplicable")]
    SlotArity { slot: String, actual: usize },

    #[error("slot '{slot}' binds an empty variable name")]
    EmptyVariableName { slot: String },

    #[error("'{name}' is declared more than once")]
    DuplicateDeclaration { name: String },
}

/// Which shape or dtype relation failed during inference.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum ShapeMismatchDetail {
    #[error("input slot '{slot}' is absent")]
    MissingInput { slot: String },

    #[error("output slot '{slot}' is not bound")]
    MissingOutput { slot: String },

    #[error("rank of '{lhs}' ({lhs_rank}) != rank of '{rhs}' ({rhs_rank})")]
    Rank {
        lhs: String,
        lhs_rank: usize,
        rhs: String,
        rhs_rank: usize,
    },

    #[error("'{lhs}' dimension[{index}] ({lhs_dim}) != '{rhs}' dimension[{index}] ({rhs_dim})")]
    Dim {
        index: usize,
        lhs: String,
        lhs_dim: i64,
        rhs: String,
        rhs_dim: i64,
    },

    #[error("dtype of '{lhs}' ({lhs_dtype}) != dtype of '{rhs}' ({rhs_dtype})")]
    DType {
        lhs: String,
        lhs_dtype: DType,
        rhs: String,
        rhs_dtype: DType,
    },

    #[error("output '{slot}' expected {expected}, kernel produced {actual}")]
    Output {
        slot: String,
        expected: String,
        actual: String,
    },
}
