//! Domain filters and their translation to SQL predicates.
//!
//! # Responsibility
//! - Represent an AND-combined list of `(field, operator, value)` conditions.
//! - Translate it into a parametrized `WHERE` clause for one model.
//!
//! # Invariants
//! - Comparands are always bound parameters, never interpolated text.
//! - Only `id` and stored columns are filterable; anything else fails before
//!   a statement is built.
//! - An empty domain selects every row.

use crate::db::{quote_ident, Value};
use crate::error::{OrmError, OrmResult};
use crate::model::definition::ModelDefinition;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Like,
}

impl Operator {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Like => "LIKE",
        }
    }
}

impl FromStr for Operator {
    type Err = OrmError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "=" => Ok(Self::Eq),
            "!=" | "<>" => Ok(Self::Ne),
            "<" => Ok(Self::Lt),
            ">" => Ok(Self::Gt),
            "<=" => Ok(Self::Le),
            ">=" => Ok(Self::Ge),
            "like" => Ok(Self::Like),
            _ => Err(OrmError::UnsupportedOperator(raw.to_string())),
        }
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sql())
    }
}

/// One elementary `(field, operator, value)` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

/// Ordered conditions combined with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Domain {
    conditions: Vec<Condition>,
}

impl Domain {
    /// Empty domain: no restriction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one condition.
    pub fn filter(
        mut self,
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            operator,
            value: value.into(),
        });
        self
    }

    /// Builds a domain from string-operator triples such as
    /// `("price", ">=", Value::Float(100.0))`.
    ///
    /// # Errors
    /// - `UnsupportedOperator` for operators outside `= != < > <= >= like`.
    pub fn parse(triples: &[(&str, &str, Value)]) -> OrmResult<Self> {
        let mut domain = Self::new();
        for (field, operator, value) in triples {
            domain = domain.filter(*field, operator.parse::<Operator>()?, value.clone());
        }
        Ok(domain)
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }
}

/// Translated `WHERE` clause and its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub clause: String,
    pub params: Vec<Value>,
}

/// Translates `domain` against the columns of `model`.
///
/// # Errors
/// - `UnknownField` for names the model does not declare.
/// - `UnfilterableField` for relational collections and computed fields.
/// - `InvalidValue` for `Null` with an ordering operator or `like` with a
///   non-text pattern.
pub fn translate(model: &ModelDefinition, domain: &Domain) -> OrmResult<Predicate> {
    if domain.is_empty() {
        return Ok(Predicate {
            clause: "1 = 1".to_string(),
            params: Vec::new(),
        });
    }

    let mut clauses = Vec::with_capacity(domain.len());
    let mut params = Vec::with_capacity(domain.len());
    for condition in domain.conditions() {
        check_filterable(model, &condition.field)?;
        let column = quote_ident(&condition.field);

        match (condition.operator, &condition.value) {
            (Operator::Eq, Value::Null) => clauses.push(format!("{column} IS NULL")),
            (Operator::Ne, Value::Null) => clauses.push(format!("{column} IS NOT NULL")),
            (operator, Value::Null) => {
                return Err(invalid(
                    model,
                    &condition.field,
                    format!("`{operator}` cannot compare against null"),
                ));
            }
            (Operator::Like, value) if value.as_str().is_none() => {
                return Err(invalid(
                    model,
                    &condition.field,
                    format!("`like` needs a text pattern, got {}", value.type_name()),
                ));
            }
            (operator, value) => {
                clauses.push(format!("{column} {} ?", operator.sql()));
                params.push(value.clone());
            }
        }
    }

    Ok(Predicate {
        clause: clauses.join(" AND "),
        params,
    })
}

fn check_filterable(model: &ModelDefinition, name: &str) -> OrmResult<()> {
    if name == "id" {
        return Ok(());
    }
    match model.field(name) {
        Some(field) if field.is_stored() => Ok(()),
        Some(_) => Err(OrmError::UnfilterableField {
            model: model.name().to_string(),
            field: name.to_string(),
        }),
        None => Err(OrmError::UnknownField {
            model: model.name().to_string(),
            field: name.to_string(),
        }),
    }
}

fn invalid(model: &ModelDefinition, field: &str, message: String) -> OrmError {
    OrmError::InvalidValue {
        model: model.name().to_string(),
        field: field.to_string(),
        message,
    }
}
