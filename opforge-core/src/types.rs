use std::fmt;

/// Defines the possible data types for tensor elements.
///
/// The dtype of an operator's kernel dtype slot selects the kernel at dispatch
/// time, so every variant is a valid dispatch key even when no host buffer
/// representation exists for it (e.g. `F16`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DType {
    /// 16-bit IEEE half precision.
    F16,
    /// 16-bit brain floating point.
    BF16,
    /// 32-bit floating-point type.
    F32,
    /// 64-bit floating-point type.
    F64,
    /// 32-bit integer type.
    I32,
    /// 64-bit integer type.
    I64,
    /// Boolean type (true/false values).
    Bool,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F16 => "float16",
            DType::BF16 => "bfloat16",
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::Bool => "bool",
        };
        write!(f, "{}", name)
    }
}
