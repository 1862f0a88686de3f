//! Typed operator attributes.

use std::collections::BTreeMap;
use std::fmt;

/// Declared type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrType {
    Str,
    Int,
    Float,
    Bool,
    Strs,
    Ints,
    Floats,
    Bools,
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttrType::Str => "string",
            AttrType::Int => "int",
            AttrType::Float => "float",
            AttrType::Bool => "bool",
            AttrType::Strs => "list<string>",
            AttrType::Ints => "list<int>",
            AttrType::Floats => "list<float>",
            AttrType::Bools => "list<bool>",
        };
        write!(f, "{}", name)
    }
}

/// A typed attribute value. Lists are homogeneous by construction.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Strs(Vec<String>),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Bools(Vec<bool>),
}

impl AttrValue {
    pub fn attr_type(&self) -> AttrType {
        match self {
            AttrValue::Str(_) => AttrType::Str,
            AttrValue::Int(_) => AttrType::Int,
            AttrValue::Float(_) => AttrType::Float,
            AttrValue::Bool(_) => AttrType::Bool,
            AttrValue::Strs(_) => AttrType::Strs,
            AttrValue::Ints(_) => AttrType::Ints,
            AttrValue::Floats(_) => AttrType::Floats,
            AttrValue::Bools(_) => AttrType::Bools,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttrValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// String members checked against an enumerated set: the value itself for
    /// `Str`, every element for `Strs`, nothing otherwise.
    pub(crate) fn string_members(&self) -> Vec<&str> {
        match self {
            AttrValue::Str(s) => vec![s.as_str()],
            AttrValue::Strs(list) => list.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(v: Vec<String>) -> Self {
        AttrValue::Strs(v)
    }
}

impl From<Vec<i64>> for AttrValue {
    fn from(v: Vec<i64>) -> Self {
        AttrValue::Ints(v)
    }
}

impl From<Vec<f64>> for AttrValue {
    fn from(v: Vec<f64>) -> Self {
        AttrValue::Floats(v)
    }
}

impl From<Vec<bool>> for AttrValue {
    fn from(v: Vec<bool>) -> Self {
        AttrValue::Bools(v)
    }
}

/// Attribute name -> value, ordered so that node comparisons and debug output
/// are deterministic.
pub type AttributeMap = BTreeMap<String, AttrValue>;

/// Builds an [`AttributeMap`] from `(name, value)` pairs.
///
/// ```
/// use opforge_core::attribute::{attrs, AttrValue};
/// let map = attrs([("reduction", AttrValue::from("sum"))]);
/// assert_eq!(map["reduction"].as_str(), Some("sum"));
/// ```
pub fn attrs<I, K>(pairs: I) -> AttributeMap
where
    I: IntoIterator<Item = (K, AttrValue)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
#[path = "attribute_test.rs"]
mod tests;
