//! ORM error types.
//!
//! # Invariants
//! - Empty fetch/search results are never errors.
//! - `Validation` is reserved for constraint rejections; every other variant
//!   is a usage, schema or storage failure.

use crate::db::{DbError, RecordId};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type OrmResult<T> = Result<T, OrmError>;

/// Rejection raised by a constraint function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "validation failed: {}", self.message)
    }
}

impl Error for ValidationError {}

#[derive(Debug)]
pub enum OrmError {
    UnknownModel(String),
    UnknownField {
        model: String,
        field: String,
    },
    /// Filter names a relational or computed field.
    UnfilterableField {
        model: String,
        field: String,
    },
    UnsupportedOperator(String),
    InvalidValue {
        model: String,
        field: String,
        message: String,
    },
    Validation(ValidationError),
    Db(DbError),
    /// Write or delete addressed a row that no longer exists.
    NotFound {
        model: String,
        id: RecordId,
    },
    RecordDeleted {
        model: String,
        id: RecordId,
    },
    ModelMismatch {
        expected: String,
        actual: String,
    },
    InvalidSchema(String),
    UnknownMethod {
        model: String,
        method: String,
    },
    ComputeCycle {
        model: String,
        field: String,
    },
    InvalidData(String),
    MissingRequiredTable(String),
    MissingRequiredColumn {
        table: String,
        column: String,
    },
}

impl OrmError {
    /// Returns whether this is a constraint rejection.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl Display for OrmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownModel(name) => write!(f, "model not found in registry: {name}"),
            Self::UnknownField { model, field } => {
                write!(f, "model `{model}` has no field `{field}`")
            }
            Self::UnfilterableField { model, field } => write!(
                f,
                "field `{field}` of model `{model}` has no column and cannot be filtered"
            ),
            Self::UnsupportedOperator(operator) => {
                write!(f, "unsupported domain operator `{operator}`")
            }
            Self::InvalidValue {
                model,
                field,
                message,
            } => write!(f, "invalid value for `{model}.{field}`: {message}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { model, id } => write!(f, "record not found: {model}({id})"),
            Self::RecordDeleted { model, id } => {
                write!(f, "record {model}({id}) has been deleted")
            }
            Self::ModelMismatch { expected, actual } => write!(
                f,
                "record belongs to model `{actual}`, expected `{expected}`"
            ),
            Self::InvalidSchema(message) => write!(f, "invalid model declaration: {message}"),
            Self::UnknownMethod { model, method } => {
                write!(f, "model `{model}` declares no method `{method}`")
            }
            Self::ComputeCycle { model, field } => write!(
                f,
                "computed field `{model}.{field}` depends on itself"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::MissingRequiredTable(table) => write!(f, "required table missing: {table}"),
            Self::MissingRequiredColumn { table, column } => {
                write!(f, "required column missing: {table}.{column}")
            }
        }
    }
}

impl Error for OrmError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for OrmError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for OrmError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for OrmError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}
