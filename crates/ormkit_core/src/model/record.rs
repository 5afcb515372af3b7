//! Live record instances and lazy attribute resolution.
//!
//! # Responsibility
//! - Hold one persisted row: model, identifier and stored values.
//! - Resolve any field by name through one accessor that dispatches on the
//!   field kind.
//!
//! # Invariants
//! - Stored values always reflect the last committed write through this
//!   instance.
//! - Reverse-collection and many-to-many reads query on every access.
//! - Computed values are cached for the lifetime of the instance and are NOT
//!   invalidated by later writes to the fields they read. Fetch the record
//!   again to observe a fresh value.
//! - After deletion every accessor that needs the row fails with
//!   `RecordDeleted`.

use crate::db::{RecordId, Value};
use crate::env::Environment;
use crate::error::{OrmError, OrmResult};
use crate::model::definition::ModelDefinition;
use crate::model::field::FieldKind;
use crate::repo::relation_repo;
use crate::search::domain::{Domain, Operator};
use log::debug;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Resolved value of one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Stored scalar, reference identifier or computed value.
    Scalar(Value),
    /// Related records of a reverse-collection or many-to-many field.
    Records(Vec<Record>),
}

impl FieldValue {
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Self::Scalar(value) => Some(value),
            Self::Records(_) => None,
        }
    }

    pub fn into_records(self) -> Option<Vec<Record>> {
        match self {
            Self::Records(records) => Some(records),
            Self::Scalar(_) => None,
        }
    }
}

/// One persisted instance of a model.
#[derive(Debug, Clone)]
pub struct Record {
    model: Arc<ModelDefinition>,
    id: RecordId,
    values: BTreeMap<String, Value>,
    cache: RefCell<BTreeMap<String, Value>>,
    computing: RefCell<BTreeSet<String>>,
    deleted: bool,
}

impl Record {
    pub(crate) fn from_parts(
        model: Arc<ModelDefinition>,
        id: RecordId,
        values: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            model,
            id,
            values,
            cache: RefCell::new(BTreeMap::new()),
            computing: RefCell::new(BTreeSet::new()),
            deleted: false,
        }
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn model(&self) -> &Arc<ModelDefinition> {
        &self.model
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Stored value of a scalar or reference field, without touching storage.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Stored values keyed by field name, excluding `id`.
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Plain `field -> value` export of the stored state, including `id`.
    pub fn to_values(&self) -> BTreeMap<String, Value> {
        let mut exported = self.values.clone();
        exported.insert("id".to_string(), Value::Integer(self.id));
        exported
    }

    /// Cached computed value, if this instance already derived it.
    pub fn cached(&self, name: &str) -> Option<Value> {
        self.cache.borrow().get(name).cloned()
    }

    /// Resolves one field by name.
    ///
    /// `id` resolves to the identifier. Stored fields return their value,
    /// relational collections query `env`, computed fields derive and cache.
    ///
    /// # Errors
    /// - `RecordDeleted` after [`crate::env::ModelHandle::delete`].
    /// - `UnknownField` when `name` is not declared on the model.
    /// - `ComputeCycle` when a computed field re-enters itself.
    pub fn get(&self, env: &Environment<'_>, name: &str) -> OrmResult<FieldValue> {
        self.ensure_live()?;
        if name == "id" {
            return Ok(FieldValue::Scalar(Value::Integer(self.id)));
        }

        let field = self.model.field(name).ok_or_else(|| OrmError::UnknownField {
            model: self.model.name().to_string(),
            field: name.to_string(),
        })?;

        match &field.kind {
            FieldKind::Text
            | FieldKind::Integer
            | FieldKind::Float
            | FieldKind::Boolean
            | FieldKind::Selection { .. }
            | FieldKind::Reference { .. } => Ok(FieldValue::Scalar(
                self.values.get(name).cloned().unwrap_or(Value::Null),
            )),
            FieldKind::ReverseCollection { target, inverse } => {
                let domain = Domain::new().filter(inverse.as_str(), Operator::Eq, self.id);
                let records = env.model(target)?.search(&domain)?;
                Ok(FieldValue::Records(records))
            }
            FieldKind::ManyToMany { target, junction } => {
                let junction = junction.as_ref().ok_or_else(|| {
                    OrmError::InvalidSchema(format!(
                        "{}.{}: junction names were never resolved",
                        self.model.name(),
                        name
                    ))
                })?;
                let partners = relation_repo::partner_ids(env.connection(), junction, self.id)?;
                let records = env.model(target)?.fetch_many(&partners)?;
                Ok(FieldValue::Records(records))
            }
            FieldKind::Computed { method } => self.compute(env, name, method).map(FieldValue::Scalar),
        }
    }

    /// Like [`Record::get`] for fields that resolve to one value.
    pub fn get_value(&self, env: &Environment<'_>, name: &str) -> OrmResult<Value> {
        match self.get(env, name)? {
            FieldValue::Scalar(value) => Ok(value),
            FieldValue::Records(_) => Err(self.shape_error(name, "resolves to records, not a value")),
        }
    }

    /// Like [`Record::get`] for reverse-collection and many-to-many fields.
    pub fn get_records(&self, env: &Environment<'_>, name: &str) -> OrmResult<Vec<Record>> {
        match self.get(env, name)? {
            FieldValue::Records(records) => Ok(records),
            FieldValue::Scalar(_) => Err(self.shape_error(name, "resolves to a value, not records")),
        }
    }

    /// Fetches the record a reference field points to.
    ///
    /// Returns `None` when the reference is null or its target row is gone.
    pub fn reference(&self, env: &Environment<'_>, name: &str) -> OrmResult<Option<Record>> {
        self.ensure_live()?;
        let target = match self.model.field(name).map(|field| &field.kind) {
            Some(FieldKind::Reference { target }) => target,
            Some(_) => return Err(self.shape_error(name, "is not a reference field")),
            None => {
                return Err(OrmError::UnknownField {
                    model: self.model.name().to_string(),
                    field: name.to_string(),
                })
            }
        };

        match self.values.get(name).and_then(Value::as_i64) {
            Some(id) => env.model(target)?.fetch(id),
            None => Ok(None),
        }
    }

    pub(crate) fn ensure_live(&self) -> OrmResult<()> {
        if self.deleted {
            return Err(OrmError::RecordDeleted {
                model: self.model.name().to_string(),
                id: self.id,
            });
        }
        Ok(())
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.deleted = true;
        self.cache.borrow_mut().clear();
    }

    /// Copy with `updates` applied and nothing cached, for pre-commit checks.
    pub(crate) fn with_updates(&self, updates: &[(String, Value)]) -> Record {
        let mut values = self.values.clone();
        for (name, value) in updates {
            values.insert(name.clone(), value.clone());
        }
        Record::from_parts(Arc::clone(&self.model), self.id, values)
    }

    /// Applies committed values. The computed cache is left as is.
    pub(crate) fn apply_updates(&mut self, updates: Vec<(String, Value)>) {
        for (name, value) in updates {
            self.values.insert(name, value);
        }
    }

    fn compute(&self, env: &Environment<'_>, name: &str, method: &str) -> OrmResult<Value> {
        if let Some(value) = self.cache.borrow().get(name) {
            return Ok(value.clone());
        }

        if !self.computing.borrow_mut().insert(name.to_string()) {
            return Err(OrmError::ComputeCycle {
                model: self.model.name().to_string(),
                field: name.to_string(),
            });
        }
        let result = match self.model.compute_fn(method) {
            Some(compute) => compute(self, env),
            None => Err(OrmError::UnknownMethod {
                model: self.model.name().to_string(),
                method: method.to_string(),
            }),
        };
        self.computing.borrow_mut().remove(name);

        let value = result?;
        debug!(
            "event=field_compute module=record status=ok model={} id={} field={}",
            self.model.name(),
            self.id,
            name
        );
        self.cache
            .borrow_mut()
            .insert(name.to_string(), value.clone());
        Ok(value)
    }

    fn shape_error(&self, name: &str, message: &str) -> OrmError {
        OrmError::InvalidValue {
            model: self.model.name().to_string(),
            field: name.to_string(),
            message: message.to_string(),
        }
    }
}

/// Records compare by model, identifier and stored values; caches are ignored.
impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.model.name() == other.model.name()
            && self.id == other.id
            && self.values == other.values
    }
}
