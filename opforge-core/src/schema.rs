//! # Operator Schemas
//!
//! A [`Schema`] declares the input slots, output slots and attributes of one
//! operator type. Schemas are assembled with a [`SchemaBuilder`] while the
//! operator registers itself and are immutable afterwards.
//!
//! Modifiers (`dispensable`, `duplicable`, `no_grad`, `default`, `one_of`)
//! apply to the most recent declaration:
//!
//! ```
//! use opforge_core::attribute::{AttrType, AttrValue};
//! use opforge_core::schema::Schema;
//!
//! let schema = Schema::builder("scale")
//!     .input("X", "input tensor")
//!     .output("Out", "scaled tensor")
//!     .attr("factor", AttrType::Float, "multiplier")
//!     .default(AttrValue::Float(1.0))
//!     .build()
//!     .unwrap();
//! assert!(schema.attr("factor").is_some());
//! ```

use crate::attribute::{AttrType, AttrValue, AttributeMap};
use crate::error::{OpError, SchemaViolationKind};
use crate::node::SlotMap;
use std::collections::BTreeSet;

/// Declaration of one input or output slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotDecl {
    pub name: String,
    pub description: String,
    /// The slot may be left unbound.
    pub dispensable: bool,
    /// The slot may bind more than one variable.
    pub duplicable: bool,
    /// Inputs: no gradient is produced for it. Outputs: never differentiated.
    pub no_grad: bool,
}

impl SlotDecl {
    fn new(name: &str, description: &str) -> Self {
        SlotDecl {
            name: name.to_string(),
            description: description.to_string(),
            dispensable: false,
            duplicable: false,
            no_grad: false,
        }
    }
}

/// Declaration of one attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrDecl {
    pub name: String,
    pub attr_type: AttrType,
    pub description: String,
    pub default: Option<AttrValue>,
    /// Enumerated set for `Str`/`Strs` attributes.
    pub allowed: Option<Vec<String>>,
}

impl AttrDecl {
    /// Checks one supplied value against this declaration.
    fn check(&self, op_type: &str, value: &AttrValue) -> Result<(), OpError> {
        let actual = value.attr_type();
        if actual != self.attr_type {
            return Err(OpError::schema(
                op_type,
                SchemaViolationKind::AttributeTypeMismatch {
                    name: self.name.clone(),
                    expected: self.attr_type,
                    actual,
                },
            ));
        }
        if let Some(allowed) = &self.allowed {
            for member in value.string_members() {
                if !allowed.iter().any(|a| a == member) {
                    return Err(OpError::schema(
                        op_type,
                        SchemaViolationKind::InvalidAttributeValue {
                            name: self.name.clone(),
                            value: member.to_string(),
                            allowed: allowed.clone(),
                        },
                    ));
                }
            }
        }
        Ok(())
    }
}

/// The declared interface of an operator type.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    op_type: String,
    inputs: Vec<SlotDecl>,
    outputs: Vec<SlotDecl>,
    attrs: Vec<AttrDecl>,
    comment: String,
}

impl Schema {
    pub fn builder(op_type: &str) -> SchemaBuilder {
        SchemaBuilder::new(op_type)
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn inputs(&self) -> &[SlotDecl] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[SlotDecl] {
        &self.outputs
    }

    pub fn attrs(&self) -> &[AttrDecl] {
        &self.attrs
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn input(&self, name: &str) -> Option<&SlotDecl> {
        self.inputs.iter().find(|s| s.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&SlotDecl> {
        self.outputs.iter().find(|s| s.name == name)
    }

    pub fn attr(&self, name: &str) -> Option<&AttrDecl> {
        self.attrs.iter().find(|a| a.name == name)
    }

    /// Input slots that receive a gradient.
    pub fn differentiable_inputs(&self) -> impl Iterator<Item = &SlotDecl> {
        self.inputs.iter().filter(|s| !s.no_grad)
    }

    /// Output slots whose gradient must be supplied to build a backward node.
    pub fn differentiable_outputs(&self) -> impl Iterator<Item = &SlotDecl> {
        self.outputs.iter().filter(|s| !s.no_grad)
    }

    /// Validates an attribute map and returns it with defaults filled in.
    ///
    /// # Errors
    /// `OpError::SchemaViolation` when an attribute is undeclared, has the wrong
    /// type, lies outside its enumerated set, or is required and missing.
    pub fn validate(&self, attrs: &AttributeMap) -> Result<AttributeMap, OpError> {
        for (name, value) in attrs {
            let decl = self.attr(name).ok_or_else(|| {
                OpError::schema(
                    &self.op_type,
                    SchemaViolationKind::UnknownAttribute { name: name.clone() },
                )
            })?;
            decl.check(&self.op_type, value)?;
        }

        let mut completed = attrs.clone();
        for decl in &self.attrs {
            if completed.contains_key(&decl.name) {
                continue;
            }
            match &decl.default {
                Some(default) => {
                    completed.insert(decl.name.clone(), default.clone());
                }
                None => {
                    return Err(OpError::schema(
                        &self.op_type,
                        SchemaViolationKind::MissingAttribute {
                            name: decl.name.clone(),
                        },
                    ))
                }
            }
        }
        Ok(completed)
    }

    /// Validates slot bindings: every required slot bound, nothing undeclared,
    /// non-duplicable slots bound to exactly one non-empty variable name.
    pub fn validate_bindings(&self, inputs: &SlotMap, outputs: &SlotMap) -> Result<(), OpError> {
        self.check_slots(&self.inputs, inputs)?;
        self.check_slots(&self.outputs, outputs)
    }

    fn check_slots(&self, decls: &[SlotDecl], bound: &SlotMap) -> Result<(), OpError> {
        for slot in bound.keys() {
            if !decls.iter().any(|d| &d.name == slot) {
                return Err(OpError::schema(
                    &self.op_type,
                    SchemaViolationKind::UnknownSlot { slot: slot.clone() },
                ));
            }
        }
        for decl in decls {
            let vars = bound.get(&decl.name).map(Vec::as_slice).unwrap_or(&[]);
            if vars.is_empty() {
                if decl.dispensable {
                    continue;
                }
                return Err(OpError::schema(
                    &self.op_type,
                    SchemaViolationKind::MissingSlot {
                        slot: decl.name.clone(),
                    },
                ));
            }
            if vars.len() > 1 && !decl.duplicable {
                return Err(OpError::schema(
                    &self.op_type,
                    SchemaViolationKind::SlotArity {
                        slot: decl.name.clone(),
                        actual: vars.len(),
                    },
                ));
            }
            if vars.iter().any(|v| v.is_empty()) {
                return Err(OpError::schema(
                    &self.op_type,
                    SchemaViolationKind::EmptyVariableName {
                        slot: decl.name.clone(),
                    },
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum LastDecl {
    Input,
    Output,
    Attr,
}

/// Accumulates declarations for one operator type.
#[derive(Debug)]
pub struct SchemaBuilder {
    schema: Schema,
    names: BTreeSet<String>,
    last: Option<LastDecl>,
    error: Option<OpError>,
}

impl SchemaBuilder {
    fn new(op_type: &str) -> Self {
        SchemaBuilder {
            schema: Schema {
                op_type: op_type.to_string(),
                inputs: Vec::new(),
                outputs: Vec::new(),
                attrs: Vec::new(),
                comment: String::new(),
            },
            names: BTreeSet::new(),
            last: None,
            error: None,
        }
    }

    pub fn input(mut self, name: &str, description: &str) -> Self {
        if self.claim(name) {
            self.schema.inputs.push(SlotDecl::new(name, description));
            self.last = Some(LastDecl::Input);
        }
        self
    }

    pub fn output(mut self, name: &str, description: &str) -> Self {
        if self.claim(name) {
            self.schema.outputs.push(SlotDecl::new(name, description));
            self.last = Some(LastDecl::Output);
        }
        self
    }

    pub fn attr(mut self, name: &str, attr_type: AttrType, description: &str) -> Self {
        if self.claim(name) {
            self.schema.attrs.push(AttrDecl {
                name: name.to_string(),
                attr_type,
                description: description.to_string(),
                default: None,
                allowed: None,
            });
            self.last = Some(LastDecl::Attr);
        }
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.schema.comment = comment.trim().to_string();
        self
    }

    pub fn dispensable(self) -> Self {
        self.update_slot("dispensable", |s| s.dispensable = true)
    }

    pub fn duplicable(self) -> Self {
        self.update_slot("duplicable", |s| s.duplicable = true)
    }

    pub fn no_grad(self) -> Self {
        self.update_slot("no_grad", |s| s.no_grad = true)
    }

    pub fn default(self, value: AttrValue) -> Self {
        self.update_attr("default", |a| a.default = Some(value))
    }

    /// Restricts a string (or list-of-string) attribute to an enumerated set.
    pub fn one_of<I, S>(self, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed: Vec<String> = allowed.into_iter().map(Into::into).collect();
        self.update_attr("one_of", |a| a.allowed = Some(allowed))
    }

    /// Finishes the schema.
    ///
    /// # Errors
    /// The first declaration error: a repeated name, a misplaced modifier, a
    /// default of the wrong type, or a default outside the enumerated set.
    pub fn build(self) -> Result<Schema, OpError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let schema = self.schema;
        for decl in &schema.attrs {
            if decl.allowed.is_some() && !matches!(decl.attr_type, AttrType::Str | AttrType::Strs) {
                return Err(OpError::InternalError(format!(
                    "Attribute '{}' of '{}' has an enumerated set but type {}",
                    decl.name, schema.op_type, decl.attr_type
                )));
            }
            if let Some(default) = &decl.default {
                decl.check(&schema.op_type, default)?;
            }
        }
        Ok(schema)
    }

    fn claim(&mut self, name: &str) -> bool {
        if self.error.is_some() {
            return false;
        }
        if !self.names.insert(name.to_string()) {
            self.error = Some(OpError::schema(
                &self.schema.op_type,
                SchemaViolationKind::DuplicateDeclaration {
                    name: name.to_string(),
                },
            ));
            return false;
        }
        true
    }

    fn update_slot(mut self, modifier: &str, f: impl FnOnce(&mut SlotDecl)) -> Self {
        let slot = match self.last {
            Some(LastDecl::Input) => self.schema.inputs.last_mut(),
            Some(LastDecl::Output) => self.schema.outputs.last_mut(),
            _ => None,
        };
        match slot {
            Some(slot) => f(slot),
            None => self.misplaced(modifier, "a slot"),
        }
        self
    }

    fn update_attr(mut self, modifier: &str, f: impl FnOnce(&mut AttrDecl)) -> Self {
        let attr = match self.last {
            Some(LastDecl::Attr) => self.schema.attrs.last_mut(),
            _ => None,
        };
        match attr {
            Some(attr) => f(attr),
            None => self.misplaced(modifier, "an attribute"),
        }
        self
    }

    fn misplaced(&mut self, modifier: &str, target: &str) {
        if self.error.is_none() {
            self.error = Some(OpError::InternalError(format!(
                "Schema '{}': modifier '{}' must follow {} declaration",
                self.schema.op_type, modifier, target
            )));
        }
    }
}

#[cfg(test)]
#[path = "schema_test.rs"]
mod tests;
