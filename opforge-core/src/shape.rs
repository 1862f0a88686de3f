//! Symbolic shapes and the variable symbol table used by shape inference.

use crate::types::DType;
use std::collections::BTreeMap;
use std::fmt;

/// Sentinel for a dimension whose size is only known once tensors are bound.
///
/// Any negative dimension is treated as dynamic; `-1` is the canonical value.
pub const DYNAMIC_DIM: i64 = -1;

/// An ordered sequence of dimension sizes. The rank is always known, individual
/// dimensions may be [`DYNAMIC_DIM`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    dims: Vec<i64>,
}

impl Shape {
    pub fn new(dims: Vec<i64>) -> Self {
        Shape { dims }
    }

    /// The one-element shape `[1]` used for reduced (scalar) results.
    pub fn scalar() -> Self {
        Shape { dims: vec![1] }
    }

    /// Builds a fully static shape from the concrete dims of a bound tensor.
    pub fn from_concrete(dims: &[usize]) -> Self {
        Shape {
            dims: dims.iter().map(|&d| d as i64).collect(),
        }
    }

    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }
}

impl From<Vec<i64>> for Shape {
    fn from(dims: Vec<i64>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[i64]> for Shape {
    fn from(dims: &[i64]) -> Self {
        Shape::new(dims.to_vec())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if is_dynamic(*d) {
                write!(f, "?")?;
            } else {
                write!(f, "{}", d)?;
            }
        }
        write!(f, "]")
    }
}

pub(crate) fn is_dynamic(dim: i64) -> bool {
    dim < 0
}

/// Shape and dtype of one variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarDesc {
    pub shape: Shape,
    pub dtype: DType,
}

impl VarDesc {
    pub fn new(shape: impl Into<Shape>, dtype: DType) -> Self {
        VarDesc {
            shape: shape.into(),
            dtype,
        }
    }
}

impl fmt::Display for VarDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.dtype, self.shape)
    }
}

/// Variable name -> descriptor. At graph-construction time it holds declared
/// (possibly dynamic) descriptors; at execution time it is rebuilt from the
/// concrete metadata of bound tensors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolTable {
    vars: BTreeMap<String, VarDesc>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, desc: VarDesc) -> Option<VarDesc> {
        self.vars.insert(name.into(), desc)
    }

    pub fn get(&self, name: &str) -> Option<&VarDesc> {
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

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VarDesc)> {
        self.vars.iter()
    }
}

#[cfg(test)]
#[path = "shape_test.rs"]
mod tests;
