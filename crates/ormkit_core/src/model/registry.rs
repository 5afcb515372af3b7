//! Schema registry.
//!
//! # Responsibility
//! - Collect model definitions at startup and validate them as a whole.
//! - Resolve model names to definitions for relationship targets.
//!
//! # Invariants
//! - A built [`Registry`] is never mutated; it is shared by reference.
//! - Every relational target named by a field is registered.
//! - Both sides of a many-to-many pair name the same junction table with
//!   swapped columns.

use crate::error::{OrmError, OrmResult};
use crate::model::definition::{table_name_for, ModelDefinition};
use crate::model::field::{FieldKind, Junction};
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;

static MODEL_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z_][a-z0-9_]*(\.[a-z_][a-z0-9_]*)*$").expect("valid model name regex")
});
static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("valid identifier regex"));

const RESERVED_FIELD_NAMES: &[&str] = &["id"];

/// Collects definitions before the registry is frozen.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    models: Vec<ModelDefinition>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one model after checking its own names.
    ///
    /// Cross-model checks run in [`RegistryBuilder::build`].
    pub fn register(&mut self, model: ModelDefinition) -> OrmResult<&mut Self> {
        if !MODEL_NAME_RE.is_match(model.name()) {
            return Err(OrmError::InvalidSchema(format!(
                "model name `{}` must be dotted lowercase identifiers",
                model.name()
            )));
        }
        if self.models.iter().any(|existing| existing.name() == model.name()) {
            return Err(OrmError::InvalidSchema(format!(
                "model `{}` is already registered",
                model.name()
            )));
        }
        if let Some(clash) = self
            .models
            .iter()
            .find(|existing| existing.table() == model.table())
        {
            return Err(OrmError::InvalidSchema(format!(
                "models `{}` and `{}` map to the same table `{}`",
                clash.name(),
                model.name(),
                model.table()
            )));
        }

        check_local_fields(&model)?;
        debug!(
            "event=model_register module=registry status=ok model={} fields={}",
            model.name(),
            model.fields().count()
        );
        self.models.push(model);
        Ok(self)
    }

    /// Validates relations, fills junction defaults and freezes the registry.
    pub fn build(mut self) -> OrmResult<Registry> {
        for model in &self.models {
            check_targets(model, &self.models)?;
        }
        resolve_junctions(&mut self.models)?;

        let mut order = Vec::with_capacity(self.models.len());
        let mut models = BTreeMap::new();
        for model in self.models {
            order.push(model.name().to_string());
            models.insert(model.name().to_string(), Arc::new(model));
        }

        info!(
            "event=registry_build module=registry status=ok models={}",
            order.len()
        );
        Ok(Registry { models, order })
    }
}

/// Frozen mapping from model name to definition.
#[derive(Debug)]
pub struct Registry {
    models: BTreeMap<String, Arc<ModelDefinition>>,
    order: Vec<String>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Resolves one model by technical name.
    pub fn get(&self, name: &str) -> OrmResult<Arc<ModelDefinition>> {
        self.models
            .get(name.trim())
            .cloned()
            .ok_or_else(|| OrmError::UnknownModel(name.trim().to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name.trim())
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Model names in registration order.
    pub fn model_names(&self) -> &[String] {
        &self.order
    }

    /// Definitions in registration order.
    pub fn models(&self) -> impl Iterator<Item = &Arc<ModelDefinition>> {
        self.order.iter().filter_map(|name| self.models.get(name))
    }
}

fn check_local_fields(model: &ModelDefinition) -> OrmResult<()> {
    for (name, field) in model.fields() {
        if !IDENTIFIER_RE.is_match(name) {
            return Err(schema_error(model, name, "field names must be lowercase identifiers"));
        }
        if RESERVED_FIELD_NAMES.contains(&name) {
            return Err(schema_error(model, name, "field name is reserved"));
        }

        match &field.kind {
            FieldKind::Selection { options } if options.is_empty() => {
                return Err(schema_error(model, name, "selection needs at least one option"));
            }
            FieldKind::Computed { method } if model.compute_fn(method).is_none() => {
                return Err(OrmError::UnknownMethod {
                    model: model.name().to_string(),
                    method: method.clone(),
                });
            }
            FieldKind::ManyToMany {
                junction: Some(junction),
                ..
            } => {
                for identifier in [&junction.table, &junction.column1, &junction.column2] {
                    if !IDENTIFIER_RE.is_match(identifier) {
                        return Err(schema_error(
                            model,
                            name,
                            "junction table and columns must be lowercase identifiers",
                        ));
                    }
                }
                if junction.column1 == junction.column2 {
                    return Err(schema_error(model, name, "junction columns must differ"));
                }
            }
            _ => {}
        }
    }

    for binding in model.constraints() {
        if binding.fields.is_empty() {
            return Err(OrmError::InvalidSchema(format!(
                "constraint `{}` on `{}` has no triggering fields",
                binding.name,
                model.name()
            )));
        }
        for trigger in &binding.fields {
            match model.field(trigger) {
                None => {
                    return Err(OrmError::UnknownField {
                        model: model.name().to_string(),
                        field: trigger.clone(),
                    });
                }
                // Writes never touch non-stored fields, so the binding could not fire.
                Some(field) if !field.is_stored() => {
                    return Err(schema_error(
                        model,
                        trigger,
                        &format!("constraint `{}` must trigger on stored fields", binding.name),
                    ));
                }
                Some(_) => {}
            }
        }
    }

    Ok(())
}

fn check_targets(model: &ModelDefinition, all: &[ModelDefinition]) -> OrmResult<()> {
    let find = |name: &str| all.iter().find(|candidate| candidate.name() == name);

    for (name, field) in model.fields() {
        let Some(target_name) = field.target() else {
            continue;
        };
        let target = find(target_name).ok_or_else(|| OrmError::UnknownModel(target_name.to_string()))?;

        if let FieldKind::ReverseCollection { inverse, .. } = &field.kind {
            match target.field(inverse).map(|inverse_field| &inverse_field.kind) {
                Some(FieldKind::Reference { target: back }) if back == model.name() => {}
                Some(_) => {
                    return Err(schema_error(
                        model,
                        name,
                        &format!("`{target_name}.{inverse}` is not a reference back to this model"),
                    ));
                }
                None => {
                    return Err(OrmError::UnknownField {
                        model: target_name.to_string(),
                        field: inverse.clone(),
                    });
                }
            }
        }
    }

    Ok(())
}

fn resolve_junctions(models: &mut [ModelDefinition]) -> OrmResult<()> {
    let mut resolved: Vec<(usize, String, Junction)> = Vec::new();
    for (index, model) in models.iter().enumerate() {
        for (name, field) in model.fields() {
            let FieldKind::ManyToMany { target, junction } = &field.kind else {
                continue;
            };
            let junction = match junction {
                Some(explicit) => explicit.clone(),
                None => default_junction(model, name, target)?,
            };
            resolved.push((index, name.to_string(), junction));
        }
    }

    // Each junction table may be declared by at most two fields on the two
    // endpoint models, and those declarations must mirror each other.
    let mut by_table: BTreeMap<&str, Vec<(usize, &str, &Junction)>> = BTreeMap::new();
    for (index, name, junction) in &resolved {
        by_table
            .entry(junction.table.as_str())
            .or_default()
            .push((*index, name.as_str(), junction));
    }
    for (table, sides) in &by_table {
        match sides.as_slice() {
            [_] => {}
            [(left_index, left_name, left), (right_index, right_name, right)] => {
                let left_model = &models[*left_index];
                let right_model = &models[*right_index];
                let pairs_up = left_model
                    .field(left_name)
                    .and_then(|field| field.target())
                    == Some(right_model.name())
                    && right_model.field(right_name).and_then(|field| field.target())
                        == Some(left_model.name());
                if !pairs_up || !left.mirrors(right) {
                    return Err(OrmError::InvalidSchema(format!(
                        "junction `{table}` is declared by `{}.{}` and `{}.{}` without swapped columns",
                        left_model.name(),
                        left_name,
                        right_model.name(),
                        right_name
                    )));
                }
            }
            _ => {
                return Err(OrmError::InvalidSchema(format!(
                    "junction `{table}` is declared by more than two fields"
                )));
            }
        }
    }

    for (index, name, junction) in resolved {
        models[index].set_junction(&name, junction);
    }
    Ok(())
}

fn default_junction(model: &ModelDefinition, field_name: &str, target: &str) -> OrmResult<Junction> {
    let own_table = model.table();
    let target_table = table_name_for(target);
    if own_table == target_table {
        return Err(schema_error(
            model,
            field_name,
            "self-referential many-to-many must name its junction columns",
        ));
    }

    let (low, high) = if own_table < target_table.as_str() {
        (own_table, target_table.as_str())
    } else {
        (target_table.as_str(), own_table)
    };
    Ok(Junction::new(
        format!("{low}_{high}_rel"),
        format!("{own_table}_id"),
        format!("{target_table}_id"),
    ))
}

fn schema_error(model: &ModelDefinition, field: &str, message: &str) -> OrmError {
    OrmError::InvalidSchema(format!("{}.{}: {}", model.name(), field, message))
}

#[cfg(test)]
mod tests {
    use super::{Registry, RegistryBuilder};
    use crate::error::OrmError;
    use crate::model::definition::ModelDefinition;
    use crate::model::field::{Field, FieldKind, Junction};

    fn category() -> ModelDefinition {
        ModelDefinition::new("product.category")
            .with_field("name", Field::text("Name"))
            .with_field(
                "product_ids",
                Field::reverse_collection("Products", "product.product", "category_id"),
            )
    }

    fn product() -> ModelDefinition {
        ModelDefinition::new("product.product")
            .with_field("name", Field::text("Name"))
            .with_field("category_id", Field::reference("Category", "product.category"))
    }

    fn build(models: Vec<ModelDefinition>) -> Result<Registry, OrmError> {
        let mut builder = RegistryBuilder::new();
        for model in models {
            builder.register(model)?;
        }
        builder.build()
    }

    #[test]
    fn registers_and_resolves_models() {
        let registry = build(vec![category(), product()]).expect("registry should build");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.model_names(), ["product.category", "product.product"]);
        assert_eq!(
            registry.get(" product.product ").expect("model should resolve").table(),
            "product_product"
        );
    }

    #[test]
    fn unknown_model_lookup_is_an_error() {
        let registry = build(vec![category(), product()]).expect("registry should build");
        assert!(matches!(
            registry.get("sale.order"),
            Err(OrmError::UnknownModel(name)) if name == "sale.order"
        ));
    }

    #[test]
    fn rejects_duplicate_and_malformed_names() {
        let mut builder = RegistryBuilder::new();
        builder.register(product()).expect("first model should register");
        assert!(matches!(
            builder.register(product()),
            Err(OrmError::InvalidSchema(_))
        ));
        assert!(matches!(
            builder.register(ModelDefinition::new("Sale Order")),
            Err(OrmError::InvalidSchema(_))
        ));
        assert!(matches!(
            builder.register(
                ModelDefinition::new("res.partner").with_field("id", Field::integer("Id"))
            ),
            Err(OrmError::InvalidSchema(_))
        ));
    }

    #[test]
    fn rejects_missing_relation_targets() {
        let err = build(vec![product()]).expect_err("missing target must fail");
        assert!(matches!(err, OrmError::UnknownModel(name) if name == "product.category"));
    }

    #[test]
    fn rejects_reverse_collection_without_matching_reference() {
        let broken_product = ModelDefinition::new("product.product")
            .with_field("name", Field::text("Name"))
            .with_field("category_id", Field::integer("Category"));
        let err = build(vec![category(), broken_product]).expect_err("inverse must be a reference");
        assert!(matches!(err, OrmError::InvalidSchema(_)));
    }

    #[test]
    fn rejects_computed_field_without_method() {
        let line = ModelDefinition::new("sale.order.line")
            .with_field("subtotal", Field::computed("Subtotal", "compute_subtotal"));
        let err = build(vec![line]).expect_err("missing compute method must fail");
        assert!(matches!(err, OrmError::UnknownMethod { method, .. } if method == "compute_subtotal"));
    }

    #[test]
    fn rejects_constraint_on_unknown_field() {
        let template = ModelDefinition::new("product.template")
            .with_field("cost_price", Field::float("Cost"))
            .with_constraint("check_prices", &["sale_price"], |_, _| Ok(()));
        let err = build(vec![template]).expect_err("unknown trigger must fail");
        assert!(matches!(err, OrmError::UnknownField { field, .. } if field == "sale_price"));
    }

    #[test]
    fn rejects_constraint_on_non_stored_field() {
        let template = ModelDefinition::new("product.template")
            .with_field("cost_price", Field::float("Cost"))
            .with_field("margin", Field::computed("Margin", "compute_margin"))
            .with_compute("compute_margin", |_, _| Ok(crate::db::Value::Float(0.0)))
            .with_constraint("check_margin", &["margin"], |_, _| {
                Err(crate::error::ValidationError::new("margin too low").into())
            });
        let err = build(vec![template]).expect_err("computed trigger must fail");
        assert!(
            matches!(&err, OrmError::InvalidSchema(message) if message.contains("product.template.margin"))
        );

        let category = ModelDefinition::new("product.category")
            .with_field("name", Field::text("Name"))
            .with_field(
                "product_ids",
                Field::reverse_collection("Products", "product.product", "category_id"),
            )
            .with_constraint("check_products", &["name", "product_ids"], |_, _| Ok(()));
        let product = ModelDefinition::new("product.product")
            .with_field("category_id", Field::reference("Category", "product.category"));
        let err = build(vec![category, product]).expect_err("reverse trigger must fail");
        assert!(matches!(err, OrmError::InvalidSchema(_)));
    }

    #[test]
    fn fills_symmetric_default_junction_names() {
        let student = ModelDefinition::new("school.student")
            .with_field("name", Field::text("Name"))
            .with_field("course_ids", Field::many_to_many("Courses", "school.course"));
        let course = ModelDefinition::new("school.course")
            .with_field("name", Field::text("Name"))
            .with_field("student_ids", Field::many_to_many("Students", "school.student"));

        let registry = build(vec![student, course]).expect("registry should build");
        let student = registry.get("school.student").expect("student model");
        let course = registry.get("school.course").expect("course model");

        let junction_of = |kind: &FieldKind| match kind {
            FieldKind::ManyToMany { junction, .. } => junction.clone(),
            _ => None,
        };
        let left = junction_of(&student.field("course_ids").expect("field").kind)
            .expect("junction resolved");
        let right = junction_of(&course.field("student_ids").expect("field").kind)
            .expect("junction resolved");

        assert_eq!(
            left,
            Junction::new("school_course_school_student_rel", "school_student_id", "school_course_id")
        );
        assert!(left.mirrors(&right));
    }

    #[test]
    fn rejects_junction_declarations_that_do_not_mirror() {
        let student = ModelDefinition::new("school.student").with_field(
            "course_ids",
            Field::many_to_many("Courses", "school.course").with_junction(
                "student_course_rel",
                "student_id",
                "course_id",
            ),
        );
        let course = ModelDefinition::new("school.course").with_field(
            "student_ids",
            Field::many_to_many("Students", "school.student").with_junction(
                "student_course_rel",
                "student_id",
                "course_id",
            ),
        );

        let err = build(vec![student, course]).expect_err("unswapped columns must fail");
        assert!(matches!(err, OrmError::InvalidSchema(_)));
    }

    #[test]
    fn self_referential_many_to_many_requires_explicit_columns() {
        let partner = ModelDefinition::new("res.partner")
            .with_field("friend_ids", Field::many_to_many("Friends", "res.partner"));
        assert!(matches!(
            build(vec![partner]),
            Err(OrmError::InvalidSchema(_))
        ));
    }

    #[test]
    fn selection_needs_options() {
        let order = ModelDefinition::new("sale.order")
            .with_field("state", Field::selection("Status", Vec::<(String, String)>::new()));
        assert!(matches!(
            build(vec![order]),
            Err(OrmError::InvalidSchema(_))
        ));
    }
}
