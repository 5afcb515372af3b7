//! Model definitions and the declaration surface.
//!
//! # Responsibility
//! - Hold a model's technical name, table name, ordered fields, constraint
//!   bindings and the named methods computed fields and actions refer to.
//!
//! # Invariants
//! - The table name is the technical name with `.` replaced by `_`.
//! - Field order is declaration order; it drives column order in DDL.
//! - Definitions are immutable once the registry is built.

use crate::db::Value;
use crate::env::{Environment, ModelHandle};
use crate::error::OrmResult;
use crate::model::field::{Field, FieldKind, Junction};
use crate::model::record::Record;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};

/// Derivation function behind a computed field.
pub type ComputeFn = fn(&Record, &Environment<'_>) -> OrmResult<Value>;

/// Validation function behind a constraint binding.
///
/// Return `Err(ValidationError::new(..).into())` to reject the record.
pub type ConstraintFn = fn(&Record, &Environment<'_>) -> OrmResult<()>;

/// Business method invoked through [`ModelHandle::call`].
pub type ActionFn = fn(&ModelHandle<'_>, &mut Record) -> OrmResult<()>;

/// Validation function bound to the fields that trigger it.
#[derive(Clone)]
pub struct ConstraintBinding {
    pub name: String,
    pub fields: Vec<String>,
    pub check: ConstraintFn,
}

impl ConstraintBinding {
    /// Returns whether any of `touched` is one of this binding's triggers.
    pub fn is_triggered_by<'a>(&self, mut touched: impl Iterator<Item = &'a str>) -> bool {
        touched.any(|field| self.fields.iter().any(|trigger| trigger == field))
    }
}

impl Debug for ConstraintBinding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstraintBinding")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .finish()
    }
}

/// Named schema unit: one table plus its relations and behavior.
#[derive(Clone)]
pub struct ModelDefinition {
    name: String,
    table: String,
    fields: Vec<(String, Field)>,
    constraints: Vec<ConstraintBinding>,
    computes: BTreeMap<String, ComputeFn>,
    actions: BTreeMap<String, ActionFn>,
}

impl ModelDefinition {
    /// Starts a declaration for the model `name` (e.g. `sale.order`).
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table: table_name_for(&name),
            name,
            fields: Vec::new(),
            constraints: Vec::new(),
            computes: BTreeMap::new(),
            actions: BTreeMap::new(),
        }
    }

    /// Declares a field. A repeated name replaces the earlier declaration.
    pub fn with_field(mut self, name: impl Into<String>, field: Field) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = field,
            None => self.fields.push((name, field)),
        }
        self
    }

    /// Binds the method a computed field names.
    pub fn with_compute(mut self, method: impl Into<String>, compute: ComputeFn) -> Self {
        self.computes.insert(method.into(), compute);
        self
    }

    /// Binds a validation function to its triggering fields.
    pub fn with_constraint(
        mut self,
        name: impl Into<String>,
        fields: &[&str],
        check: ConstraintFn,
    ) -> Self {
        self.constraints.push(ConstraintBinding {
            name: name.into(),
            fields: fields.iter().map(|field| (*field).to_string()).collect(),
            check,
        });
        self
    }

    pub fn with_action(mut self, name: impl Into<String>, action: ActionFn) -> Self {
        self.actions.insert(name.into(), action);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields
            .iter()
            .map(|(name, field)| (name.as_str(), field))
    }

    /// Fields that own a base-table column, in declaration order.
    pub fn stored_fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields().filter(|(_, field)| field.is_stored())
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, field)| field)
    }

    pub fn constraints(&self) -> &[ConstraintBinding] {
        &self.constraints
    }

    pub fn compute_fn(&self, method: &str) -> Option<ComputeFn> {
        self.computes.get(method).copied()
    }

    pub fn action_fn(&self, name: &str) -> Option<ActionFn> {
        self.actions.get(name).copied()
    }

    pub(crate) fn set_junction(&mut self, field_name: &str, resolved: Junction) {
        if let Some((_, field)) = self.fields.iter_mut().find(|(name, _)| name == field_name) {
            if let FieldKind::ManyToMany { junction, .. } = &mut field.kind {
                *junction = Some(resolved);
            }
        }
    }
}

impl Debug for ModelDefinition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelDefinition")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("fields", &self.fields)
            .field("constraints", &self.constraints)
            .field("computes", &self.computes.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Derives the base-table name from a technical model name.
pub fn table_name_for(model_name: &str) -> String {
    model_name.replace('.', "_")
}
