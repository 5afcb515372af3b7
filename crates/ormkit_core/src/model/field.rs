//! Field descriptors.
//!
//! # Responsibility
//! - Describe one model attribute: kind, label, help text and the
//!   kind-specific metadata for relations and computations.
//! - Classify attributes by how they materialize (column, junction, nothing).
//!
//! # Invariants
//! - Scalar and reference kinds map 1:1 to one base-table column.
//! - Reverse-collection, many-to-many and computed kinds own no column.

/// Junction table linking two models for a many-to-many field.
///
/// `column1` points at the declaring model, `column2` at the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Junction {
    pub table: String,
    pub column1: String,
    pub column2: String,
}

impl Junction {
    pub fn new(
        table: impl Into<String>,
        column1: impl Into<String>,
        column2: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            column1: column1.into(),
            column2: column2.into(),
        }
    }

    /// Returns whether `other` is the same junction seen from the opposite side.
    pub fn mirrors(&self, other: &Junction) -> bool {
        self.table == other.table && self.column1 == other.column2 && self.column2 == other.column1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
    /// Stores the key of one `(key, label)` option.
    Selection { options: Vec<(String, String)> },
    /// Integer foreign key to `target`.
    Reference { target: String },
    /// Records of `target` whose reference field `inverse` points here.
    ReverseCollection { target: String, inverse: String },
    /// Records of `target` linked through a junction table.
    ///
    /// `junction` is `None` until the registry fills in default names.
    ManyToMany {
        target: String,
        junction: Option<Junction>,
    },
    /// Derived by the model method named `method`; never persisted.
    Computed { method: String },
}

/// Declared attribute of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub kind: FieldKind,
    pub label: String,
    pub help: Option<String>,
}

impl Field {
    fn with_kind(kind: FieldKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            help: None,
        }
    }

    pub fn text(label: impl Into<String>) -> Self {
        Self::with_kind(FieldKind::Text, label)
    }

    pub fn integer(label: impl Into<String>) -> Self {
        Self::with_kind(FieldKind::Integer, label)
    }

    pub fn float(label: impl Into<String>) -> Self {
        Self::with_kind(FieldKind::Float, label)
    }

    pub fn boolean(label: impl Into<String>) -> Self {
        Self::with_kind(FieldKind::Boolean, label)
    }

    pub fn selection<K, L>(label: impl Into<String>, options: impl IntoIterator<Item = (K, L)>) -> Self
    where
        K: Into<String>,
        L: Into<String>,
    {
        let options = options
            .into_iter()
            .map(|(key, option_label)| (key.into(), option_label.into()))
            .collect();
        Self::with_kind(FieldKind::Selection { options }, label)
    }

    pub fn reference(label: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_kind(
            FieldKind::Reference {
                target: target.into(),
            },
            label,
        )
    }

    pub fn reverse_collection(
        label: impl Into<String>,
        target: impl Into<String>,
        inverse: impl Into<String>,
    ) -> Self {
        Self::with_kind(
            FieldKind::ReverseCollection {
                target: target.into(),
                inverse: inverse.into(),
            },
            label,
        )
    }

    /// Many-to-many field with registry-derived junction names.
    pub fn many_to_many(label: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_kind(
            FieldKind::ManyToMany {
                target: target.into(),
                junction: None,
            },
            label,
        )
    }

    pub fn computed(label: impl Into<String>, method: impl Into<String>) -> Self {
        Self::with_kind(
            FieldKind::Computed {
                method: method.into(),
            },
            label,
        )
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Names the junction table explicitly. No-op for other kinds.
    pub fn with_junction(
        mut self,
        table: impl Into<String>,
        column1: impl Into<String>,
        column2: impl Into<String>,
    ) -> Self {
        if let FieldKind::ManyToMany { junction, .. } = &mut self.kind {
            *junction = Some(Junction::new(table, column1, column2));
        }
        self
    }

    /// Returns whether this field owns a base-table column.
    pub fn is_stored(&self) -> bool {
        self.column_type().is_some()
    }

    /// SQL column type, or `None` for fields without a column.
    pub fn column_type(&self) -> Option<&'static str> {
        match self.kind {
            FieldKind::Text | FieldKind::Selection { .. } => Some("VARCHAR(255)"),
            FieldKind::Integer | FieldKind::Reference { .. } | FieldKind::Boolean => {
                Some("INTEGER")
            }
            FieldKind::Float => Some("REAL"),
            FieldKind::ReverseCollection { .. }
            | FieldKind::ManyToMany { .. }
            | FieldKind::Computed { .. } => None,
        }
    }

    /// Target model name for relational kinds.
    pub fn target(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Reference { target }
            | FieldKind::ReverseCollection { target, .. }
            | FieldKind::ManyToMany { target, .. } => Some(target.as_str()),
            _ => None,
        }
    }

    /// Short kind name used in logs and messages.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            FieldKind::Text => "text",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Boolean => "boolean",
            FieldKind::Selection { .. } => "selection",
            FieldKind::Reference { .. } => "reference",
            FieldKind::ReverseCollection { .. } => "reverse_collection",
            FieldKind::ManyToMany { .. } => "many_to_many",
            FieldKind::Computed { .. } => "computed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Field, FieldKind, Junction};

    #[test]
    fn only_scalar_and_reference_kinds_are_stored() {
        assert!(Field::text("Name").is_stored());
        assert!(Field::float("Price").is_stored());
        assert!(Field::reference("Category", "product.category").is_stored());
        assert!(!Field::reverse_collection("Products", "product.product", "category_id").is_stored());
        assert!(!Field::many_to_many("Tags", "product.tag").is_stored());
        assert!(!Field::computed("Subtotal", "compute_subtotal").is_stored());
    }

    #[test]
    fn with_junction_only_applies_to_many_to_many() {
        let tags = Field::many_to_many("Tags", "product.tag").with_junction("rel", "a_id", "b_id");
        assert_eq!(
            tags.kind,
            FieldKind::ManyToMany {
                target: "product.tag".to_string(),
                junction: Some(Junction::new("rel", "a_id", "b_id")),
            }
        );

        let name = Field::text("Name").with_junction("rel", "a_id", "b_id");
        assert_eq!(name.kind, FieldKind::Text);
    }

    #[test]
    fn junction_mirror_requires_swapped_columns() {
        let left = Junction::new("rel", "a_id", "b_id");
        assert!(left.mirrors(&Junction::new("rel", "b_id", "a_id")));
        assert!(!left.mirrors(&Junction::new("rel", "a_id", "b_id")));
        assert!(!left.mirrors(&Junction::new("other", "b_id", "a_id")));
    }
}
