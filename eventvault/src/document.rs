//! Engine-neutral document vocabulary.
//!
//! Core code describes every query, index and update with the types in this
//! module. Engines either evaluate them directly (the in-memory engine) or
//! render them into their native query language (MongoDB).

use serde_json::{Map, Value};

/// A schemaless document.
pub type Document = Map<String, Value>;

/// Build a [`Document`] from a `serde_json::json!` object literal.
///
/// Non-object values produce an empty document.
pub fn document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

/// Resolve a dotted field path (`metadata._aggregate_version`) inside a document.
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = document.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Query predicate over dotted field paths.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals value. `Null` also matches an absent field.
    Eq(String, Value),
    /// Negation of `Eq`: absent fields match unless the value is `Null`.
    Ne(String, Value),
    /// Field is strictly greater than value.
    Gt(String, Value),
    /// Field is greater than or equal to value.
    Gte(String, Value),
    /// Field is strictly less than value.
    Lt(String, Value),
    /// Field is less than or equal to value.
    Lte(String, Value),
    /// String field matches the regular expression.
    Regex(String, String),
    /// Field equals one of the values.
    In(String, Vec<Value>),
    /// Field equals none of the values.
    Nin(String, Vec<Value>),
    /// Field presence test.
    Exists(String, bool),
    /// Every clause matches. An empty conjunction matches everything.
    And(Vec<Filter>),
    /// At least one clause matches.
    Or(Vec<Filter>),
}

impl Filter {
    /// Filter matching every document.
    pub const fn all() -> Self {
        Self::And(Vec::new())
    }

    /// Equality on a field.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    /// Combine with another filter, flattening nested conjunctions.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), other) => {
                left.push(other);
                Self::And(left)
            }
            (this, Self::And(mut right)) => {
                right.insert(0, this);
                Self::And(right)
            }
            (this, other) => Self::And(vec![this, other]),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

/// Options for [`DocumentEngine::find`](crate::engine::DocumentEngine::find).
#[derive(Debug, Clone, PartialEq)]
pub struct FindOptions {
    /// Documents must match this filter.
    pub filter: Filter,
    /// Single-field sort.
    pub sort: Option<(String, SortOrder)>,
    /// Documents to skip after sorting.
    pub skip: usize,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
    /// Top-level fields to return; `None` returns whole documents.
    pub projection: Option<Vec<String>>,
}

impl FindOptions {
    /// Find documents matching `filter`.
    pub const fn new(filter: Filter) -> Self {
        Self {
            filter,
            sort: None,
            skip: 0,
            limit: None,
            projection: None,
        }
    }

    /// Sort by one field.
    #[must_use]
    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some((field.into(), order));
        self
    }

    /// Skip the first `skip` results.
    #[must_use]
    pub const fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Return at most `limit` results.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Only return the listed top-level fields.
    #[must_use]
    pub fn projection<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }
}

/// Index to create on a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name.
    pub name: String,
    /// Indexed field paths, all ascending.
    pub keys: Vec<String>,
    /// Reject documents whose key tuple already exists.
    pub unique: bool,
}

impl IndexSpec {
    /// A unique index over `keys`.
    pub fn unique<I, S>(name: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            keys: keys.into_iter().map(Into::into).collect(),
            unique: true,
        }
    }
}

/// A single-document update: `$set` followed by `$inc`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    /// Fields to overwrite (dotted paths allowed).
    pub set: Document,
    /// Integer fields to increment.
    pub inc: Vec<(String, i64)>,
}

impl Update {
    /// Update that overwrites `field` with `value`.
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::default().and_set(field, value)
    }

    /// Update that increments `field` by `by`.
    pub fn inc(field: impl Into<String>, by: i64) -> Self {
        Self {
            set: Document::new(),
            inc: vec![(field.into(), by)],
        }
    }

    /// Also overwrite `field` with `value`.
    #[must_use]
    pub fn and_set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }
}

/// Outcome of an `update_one` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Documents matched by the filter (0 or 1).
    pub matched: u64,
    /// Documents actually changed.
    pub modified: u64,
}

/// Aggregate used to list the distinct values of one field.
///
/// Equivalent to `$match` → `$group` by `field` → `$sort` ascending →
/// `$skip` → `$limit`.
#[derive(Debug, Clone, PartialEq)]
pub struct DistinctQuery {
    /// Pre-group filter.
    pub filter: Filter,
    /// Grouped field.
    pub field: String,
    /// Groups to skip.
    pub skip: usize,
    /// Maximum number of groups.
    pub limit: usize,
}

/// Kind of change reported by a change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOperation {
    /// A document was inserted.
    Insert,
    /// The feed was invalidated and must be reopened.
    Invalidate,
    /// Anything else the engine reports.
    Other(String),
}

/// One event delivered by a change feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// What happened.
    pub operation: ChangeOperation,
    /// Collection the change happened in.
    pub collection: String,
    /// The inserted document, when the engine supplies it.
    pub full_document: Option<Document>,
    /// Engine clock time of the change, in unix seconds.
    pub cluster_time: i64,
}
