//! Metadata matchers and their compilation into engine filters.

use serde_json::Value;

use crate::document::Filter;

/// Comparison applied by one matcher entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `==`
    Equals,
    /// `!=`; a non-null value also requires the field to exist.
    NotEquals,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanEquals,
    /// `<`
    LowerThan,
    /// `<=`
    LowerThanEquals,
    /// Regular expression match on a string field.
    Regex,
    /// Value is one of a list.
    In,
    /// Value is none of a list.
    NotIn,
}

/// Where a matched field lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// A top-level field of the stored document (`event_name`, `created_at`, ...).
    MessageProperty,
    /// A key inside the `metadata` sub-document.
    Metadata,
}

/// One `(field, kind, operator, value)` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataMatch {
    /// Field name, without the `metadata.` prefix.
    pub field: String,
    /// Where the field lives.
    pub field_type: FieldType,
    /// Comparison.
    pub operator: Operator,
    /// Compared value. Arrays expand into one clause per element, except for
    /// `In` and `NotIn` which take the whole list.
    pub value: Value,
}

/// A conjunction of conditions on stored documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataMatcher {
    matches: Vec<MetadataMatch>,
}

impl MetadataMatcher {
    /// A matcher with no conditions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition on a metadata key.
    #[must_use]
    pub fn with_metadata_match(
        self,
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.with_match(field, FieldType::Metadata, operator, value)
    }

    /// Add a condition.
    #[must_use]
    pub fn with_match(
        mut self,
        field: impl Into<String>,
        field_type: FieldType,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.matches.push(MetadataMatch {
            field: field.into(),
            field_type,
            operator,
            value: value.into(),
        });
        self
    }

    /// The conditions in insertion order.
    pub fn data(&self) -> &[MetadataMatch] {
        &self.matches
    }

    /// Whether no conditions were added.
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Compile a matcher into isolated clauses meant to be ANDed together.
pub fn compile_clauses(matcher: Option<&MetadataMatcher>) -> Vec<Filter> {
    let Some(matcher) = matcher else {
        return Vec::new();
    };

    let mut clauses = Vec::new();
    for entry in matcher.data() {
        let path = match entry.field_type {
            FieldType::Metadata => format!("metadata.{}", entry.field),
            FieldType::MessageProperty => entry.field.clone(),
        };

        match entry.operator {
            Operator::In => clauses.push(Filter::In(path, as_list(&entry.value))),
            Operator::NotIn => clauses.push(Filter::Nin(path, as_list(&entry.value))),
            Operator::NotEquals if entry.value.is_null() => {
                clauses.push(Filter::Exists(path, true));
            }
            Operator::NotEquals => {
                clauses.push(Filter::Exists(path.clone(), true));
                for item in as_list(&entry.value) {
                    clauses.push(Filter::Ne(path.clone(), item));
                }
            }
            operator => {
                for item in as_list(&entry.value) {
                    clauses.push(scalar_clause(operator, path.clone(), item));
                }
            }
        }
    }
    clauses
}

fn scalar_clause(operator: Operator, path: String, value: Value) -> Filter {
    match operator {
        Operator::GreaterThan => Filter::Gt(path, value),
        Operator::GreaterThanEquals => Filter::Gte(path, value),
        Operator::LowerThan => Filter::Lt(path, value),
        Operator::LowerThanEquals => Filter::Lte(path, value),
        Operator::Regex => match value {
            Value::String(pattern) => Filter::Regex(path, pattern),
            other => Filter::Regex(path, other.to_string()),
        },
        Operator::NotEquals => Filter::Ne(path, value),
        Operator::In => Filter::In(path, vec![value]),
        Operator::NotIn => Filter::Nin(path, vec![value]),
        Operator::Equals => Filter::Eq(path, value),
    }
}

fn as_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}
