//! Execution context and the record engine surface.
//!
//! # Responsibility
//! - Bind a frozen [`Registry`] to one connection.
//! - Expose create/search/fetch/write/delete and junction writes per model
//!   through [`ModelHandle`].
//!
//! # Invariants
//! - One transaction per create, write or junction write; constraints run
//!   inside it and any failure rolls it back.
//! - Inside a caller's transaction the operation runs under a savepoint, and a
//!   failure undoes only that operation.
//! - A failed write leaves the caller's [`Record`] unmodified.
//! - Reads never open transactions.
//! - Records are handed out only after their transaction commits.
//!
//! # See also
//! - `crate::constraint` for trigger selection.
//! - `crate::repo` for statement text.

use crate::constraint::run_constraints;
use crate::db::{schema, with_transaction, RecordId, SqlConnection, Value};
use crate::error::{OrmError, OrmResult};
use crate::model::definition::ModelDefinition;
use crate::model::field::{FieldKind, Junction};
use crate::model::record::Record;
use crate::model::registry::Registry;
use crate::repo::{record_repo, relation_repo};
use crate::search::domain::{translate, Domain};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Instant;

/// Registry and connection shared by every operation of one session.
#[derive(Clone, Copy)]
pub struct Environment<'a> {
    registry: &'a Registry,
    conn: &'a dyn SqlConnection,
}

impl<'a> Environment<'a> {
    pub fn new(registry: &'a Registry, conn: &'a dyn SqlConnection) -> Self {
        Self { registry, conn }
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn connection(&self) -> &'a dyn SqlConnection {
        self.conn
    }

    /// Binds the model `name` to this context.
    ///
    /// # Errors
    /// - `UnknownModel` when `name` is not registered.
    pub fn model(&self, name: &str) -> OrmResult<ModelHandle<'_>> {
        let model = self.registry.get(name)?;
        Ok(ModelHandle { env: self, model })
    }

    /// Creates every table of the registry that does not exist yet.
    pub fn materialize_schema(&self) -> OrmResult<()> {
        schema::materialize(self.conn, self.registry)
    }
}

/// One model bound to an [`Environment`].
pub struct ModelHandle<'env> {
    env: &'env Environment<'env>,
    model: Arc<ModelDefinition>,
}

impl<'env> ModelHandle<'env> {
    pub fn name(&self) -> &str {
        self.model.name()
    }

    pub fn definition(&self) -> &Arc<ModelDefinition> {
        &self.model
    }

    pub fn environment(&self) -> &'env Environment<'env> {
        self.env
    }

    /// Persists a new record and returns it after commit.
    ///
    /// Unknown keys, `id` and keys naming reverse-collection, many-to-many or
    /// computed fields are skipped with a warning. Constraints triggered by
    /// the written keys run before commit.
    ///
    /// # Errors
    /// - `InvalidValue` when a value does not fit its field kind.
    /// - `Validation` when a constraint rejects the record; no row remains.
    /// - `Db` for storage failures, e.g. a dangling reference.
    pub fn create(&self, values: &[(&str, Value)]) -> OrmResult<Record> {
        let started_at = Instant::now();
        let prepared = self.prepare_values(values)?;
        let touched: Vec<String> = prepared.iter().map(|(name, _)| name.clone()).collect();
        let conn = self.env.connection();

        let result: OrmResult<Record> = with_transaction(conn, || {
            let id = record_repo::insert_row(conn, &self.model, &prepared)?;
            let record = self.fetch(id)?.ok_or_else(|| OrmError::NotFound {
                model: self.model.name().to_string(),
                id,
            })?;
            run_constraints(self.env, &record, &touched)?;
            Ok(record)
        });

        match &result {
            Ok(record) => info!(
                "event=record_create module=env status=ok model={} id={} fields={} duration_ms={}",
                self.model.name(),
                record.id(),
                touched.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=record_create module=env status=error model={} fields={} duration_ms={} error={}",
                self.model.name(),
                touched.len(),
                started_at.elapsed().as_millis(),
                error_code(err)
            ),
        }
        result
    }

    /// Returns every record matching `domain`, in identifier order.
    pub fn search(&self, domain: &Domain) -> OrmResult<Vec<Record>> {
        let predicate = translate(&self.model, domain)?;
        let records = record_repo::select_where(self.env.connection(), &self.model, &predicate)?;
        debug!(
            "event=record_search module=env status=ok model={} conditions={} rows={}",
            self.model.name(),
            domain.len(),
            records.len()
        );
        Ok(records)
    }

    /// Fetches one record; `None` when no row has this identifier.
    pub fn fetch(&self, id: RecordId) -> OrmResult<Option<Record>> {
        let records = record_repo::select_by_ids(self.env.connection(), &self.model, &[id])?;
        Ok(records.into_iter().next())
    }

    /// Fetches the existing records among `ids`, in identifier order.
    ///
    /// Duplicates and unknown identifiers are dropped. An empty slice issues
    /// no query.
    pub fn fetch_many(&self, ids: &[RecordId]) -> OrmResult<Vec<Record>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        record_repo::select_by_ids(self.env.connection(), &self.model, ids)
    }

    /// Updates stored fields of `record` in one statement.
    ///
    /// Keys are filtered like [`ModelHandle::create`]. On success the
    /// record's stored values are updated; computed values it already
    /// cached are kept. On failure the record is left untouched.
    ///
    /// # Errors
    /// - `ModelMismatch` when `record` belongs to another model.
    /// - `RecordDeleted` when `record` was deleted.
    /// - `NotFound` when its row vanished.
    /// - `InvalidValue`, `Validation` and `Db` as for create.
    pub fn write(&self, record: &mut Record, values: &[(&str, Value)]) -> OrmResult<()> {
        let started_at = Instant::now();
        self.ensure_owns(record)?;
        record.ensure_live()?;
        let prepared = self.prepare_values(values)?;
        if prepared.is_empty() {
            debug!(
                "event=record_write module=env status=skipped model={} id={} reason=no_stored_fields",
                self.model.name(),
                record.id()
            );
            return Ok(());
        }
        let touched: Vec<String> = prepared.iter().map(|(name, _)| name.clone()).collect();
        let conn = self.env.connection();

        let result: OrmResult<()> = with_transaction(conn, || {
            let affected = record_repo::update_row(conn, &self.model, record.id(), &prepared)?;
            if affected == 0 {
                return Err(OrmError::NotFound {
                    model: self.model.name().to_string(),
                    id: record.id(),
                });
            }
            let candidate = record.with_updates(&prepared);
            run_constraints(self.env, &candidate, &touched)
        });

        match result {
            Ok(()) => {
                record.apply_updates(prepared);
                info!(
                    "event=record_write module=env status=ok model={} id={} fields={} duration_ms={}",
                    self.model.name(),
                    record.id(),
                    touched.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                warn!(
                    "event=record_write module=env status=error model={} id={} fields={} duration_ms={} error={}",
                    self.model.name(),
                    record.id(),
                    touched.len(),
                    started_at.elapsed().as_millis(),
                    error_code(&err)
                );
                Err(err)
            }
        }
    }

    /// Removes the row of `record` and marks the instance deleted.
    ///
    /// Junction rows go with it through cascading delete. Records of other
    /// models still referencing it make the storage layer refuse the delete.
    pub fn delete(&self, record: &mut Record) -> OrmResult<()> {
        self.ensure_owns(record)?;
        record.ensure_live()?;

        let affected = record_repo::delete_row(self.env.connection(), &self.model, record.id())?;
        if affected == 0 {
            return Err(OrmError::NotFound {
                model: self.model.name().to_string(),
                id: record.id(),
            });
        }
        record.mark_deleted();
        info!(
            "event=record_delete module=env status=ok model={} id={}",
            self.model.name(),
            record.id()
        );
        Ok(())
    }

    /// Links `record` to `partners` through the many-to-many field `field`.
    ///
    /// Existing pairs are kept. Returns how many pairs were added.
    pub fn link(&self, record: &Record, field: &str, partners: &[RecordId]) -> OrmResult<usize> {
        let junction = self.junction_for(record, field)?;
        let conn = self.env.connection();
        let added = with_transaction(conn, || {
            relation_repo::insert_links(conn, junction, record.id(), partners)
        })?;
        self.log_links("link", record, field, added);
        Ok(added)
    }

    /// Removes the given pairs; returns how many existed.
    pub fn unlink(&self, record: &Record, field: &str, partners: &[RecordId]) -> OrmResult<usize> {
        let junction = self.junction_for(record, field)?;
        let conn = self.env.connection();
        let removed = with_transaction(conn, || {
            relation_repo::delete_links(conn, junction, record.id(), partners)
        })?;
        self.log_links("unlink", record, field, removed);
        Ok(removed)
    }

    /// Replaces the whole partner set of `record` for `field`.
    pub fn set_links(&self, record: &Record, field: &str, partners: &[RecordId]) -> OrmResult<()> {
        let junction = self.junction_for(record, field)?;
        let conn = self.env.connection();
        let linked = with_transaction(conn, || {
            relation_repo::clear_links(conn, junction, record.id())?;
            relation_repo::insert_links(conn, junction, record.id(), partners)
        })?;
        self.log_links("set_links", record, field, linked);
        Ok(())
    }

    /// Invokes the business method `action` declared on this model.
    ///
    /// # Errors
    /// - `UnknownMethod` when the model declares no such action.
    /// - Whatever the action returns.
    pub fn call(&self, record: &mut Record, action: &str) -> OrmResult<()> {
        self.ensure_owns(record)?;
        record.ensure_live()?;
        let run = self
            .model
            .action_fn(action)
            .ok_or_else(|| OrmError::UnknownMethod {
                model: self.model.name().to_string(),
                method: action.to_string(),
            })?;
        debug!(
            "event=action_call module=env status=start model={} id={} action={}",
            self.model.name(),
            record.id(),
            action
        );
        run(self, record)
    }

    fn prepare_values(&self, values: &[(&str, Value)]) -> OrmResult<Vec<(String, Value)>> {
        let mut prepared: Vec<(String, Value)> = Vec::with_capacity(values.len());
        for (name, value) in values {
            let Some(field) = self.model.field(name) else {
                warn!(
                    "event=value_skip module=env status=ignored model={} field={} reason={}",
                    self.model.name(),
                    name,
                    if *name == "id" { "identifier" } else { "unknown_field" }
                );
                continue;
            };
            if !field.is_stored() {
                warn!(
                    "event=value_skip module=env status=ignored model={} field={} reason=not_stored kind={}",
                    self.model.name(),
                    name,
                    field.kind_name()
                );
                continue;
            }

            let coerced = record_repo::coerce_for_write(&self.model, name, field, value.clone())?;
            match prepared.iter_mut().find(|(existing, _)| existing.as_str() == *name) {
                Some(slot) => slot.1 = coerced,
                None => prepared.push(((*name).to_string(), coerced)),
            }
        }
        Ok(prepared)
    }

    fn ensure_owns(&self, record: &Record) -> OrmResult<()> {
        if record.model_name() != self.model.name() {
            return Err(OrmError::ModelMismatch {
                expected: self.model.name().to_string(),
                actual: record.model_name().to_string(),
            });
        }
        Ok(())
    }

    fn junction_for(&self, record: &Record, field: &str) -> OrmResult<&Junction> {
        self.ensure_owns(record)?;
        record.ensure_live()?;
        match self.model.field(field).map(|declared| &declared.kind) {
            Some(FieldKind::ManyToMany {
                junction: Some(junction),
                ..
            }) => Ok(junction),
            Some(_) => Err(OrmError::InvalidValue {
                model: self.model.name().to_string(),
                field: field.to_string(),
                message: "junction writes need a many-to-many field".to_string(),
            }),
            None => Err(OrmError::UnknownField {
                model: self.model.name().to_string(),
                field: field.to_string(),
            }),
        }
    }

    fn log_links(&self, operation: &str, record: &Record, field: &str, rows: usize) {
        info!(
            "event=junction_write module=env status=ok op={} model={} id={} field={} rows={}",
            operation,
            self.model.name(),
            record.id(),
            field,
            rows
        );
    }
}

fn error_code(err: &OrmError) -> &'static str {
    match err {
        OrmError::Validation(_) => "validation_failed",
        OrmError::InvalidValue { .. } => "invalid_value",
        OrmError::Db(_) => "storage_failed",
        OrmError::NotFound { .. } => "not_found",
        _ => "usage_error",
    }
}
