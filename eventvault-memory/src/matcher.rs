//! Evaluation of [`Filter`] trees and [`Update`]s against documents.

use std::cmp::Ordering;

use eventvault::document::{lookup, Document, Filter, Update};
use eventvault::errors::{EngineError, EngineResult};
use fancy_regex::Regex;
use serde_json::{Map, Value};

/// Whether `document` matches `filter`.
pub(crate) fn matches(document: &Document, filter: &Filter) -> EngineResult<bool> {
    Ok(match filter {
        Filter::Eq(field, value) => equals(lookup(document, field), value),
        Filter::Ne(field, value) => !equals(lookup(document, field), value),
        Filter::Gt(field, value) => ordered(lookup(document, field), value, Ordering::is_gt),
        Filter::Gte(field, value) => ordered(lookup(document, field), value, Ordering::is_ge),
        Filter::Lt(field, value) => ordered(lookup(document, field), value, Ordering::is_lt),
        Filter::Lte(field, value) => ordered(lookup(document, field), value, Ordering::is_le),
        Filter::Regex(field, pattern) => {
            let regex = compile(pattern)?;
            match lookup(document, field).and_then(Value::as_str) {
                Some(text) => regex
                    .is_match(text)
                    .map_err(|e| EngineError::InvalidRegex(e.to_string()))?,
                None => false,
            }
        }
        Filter::In(field, values) => {
            let found = lookup(document, field);
            values.iter().any(|value| equals(found, value))
        }
        Filter::Nin(field, values) => {
            let found = lookup(document, field);
            !values.iter().any(|value| equals(found, value))
        }
        Filter::Exists(field, expected) => lookup(document, field).is_some() == *expected,
        Filter::And(clauses) => {
            for clause in clauses {
                if !matches(document, clause)? {
                    return Ok(false);
                }
            }
            true
        }
        Filter::Or(clauses) => {
            for clause in clauses {
                if matches(document, clause)? {
                    return Ok(true);
                }
            }
            false
        }
    })
}

/// Reject filters containing a pattern the regex engine cannot compile.
pub(crate) fn validate(filter: &Filter) -> EngineResult<()> {
    match filter {
        Filter::Regex(_, pattern) => compile(pattern).map(|_| ()),
        Filter::And(clauses) | Filter::Or(clauses) => clauses.iter().try_for_each(validate),
        _ => Ok(()),
    }
}

fn compile(pattern: &str) -> EngineResult<Regex> {
    Regex::new(pattern).map_err(|e| EngineError::InvalidRegex(e.to_string()))
}

/// Equality with document-database semantics: `null` also matches a missing
/// field and numbers compare by value regardless of representation.
pub(crate) fn equals(found: Option<&Value>, expected: &Value) -> bool {
    match (found, expected) {
        (None | Some(Value::Null), Value::Null) => true,
        (None, _) => false,
        (Some(Value::Number(a)), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_f64() == b.as_f64(),
        },
        (Some(found), expected) => found == expected,
    }
}

fn ordered(found: Option<&Value>, bound: &Value, accept: fn(Ordering) -> bool) -> bool {
    match (found, bound) {
        (Some(Value::Number(_)), Value::Number(_)) | (Some(Value::String(_)), Value::String(_)) => {
            found.is_some_and(|value| accept(compare(Some(value), Some(bound))))
        }
        _ => false,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total order used for sorting: missing and `null` first, then numbers,
/// strings, objects, arrays and booleans.
pub(crate) fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Apply `$set` then `$inc` to a copy of `document`.
pub(crate) fn apply_update(document: &Document, update: &Update) -> EngineResult<Document> {
    let mut updated = document.clone();
    for (path, value) in &update.set {
        set_path(&mut updated, path, value.clone())?;
    }
    for (path, by) in &update.inc {
        let current = match lookup(&updated, path) {
            None | Some(Value::Null) => 0,
            Some(value) => value.as_i64().ok_or_else(|| {
                EngineError::backend("update", format!("cannot increment non-integer field {path}"))
            })?,
        };
        let next = current.checked_add(*by).ok_or_else(|| {
            EngineError::backend("update", format!("increment of {path} overflows"))
        })?;
        set_path(&mut updated, path, Value::from(next))?;
    }
    Ok(updated)
}

fn set_path(document: &mut Document, path: &str, value: Value) -> EngineResult<()> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else {
        return Ok(());
    };
    let mut current = document;
    for segment in segments {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if entry.is_null() {
            *entry = Value::Object(Map::new());
        }
        current = entry.as_object_mut().ok_or_else(|| {
            EngineError::backend("update", format!("cannot create field {path} inside a non-object"))
        })?;
    }
    current.insert(last.to_string(), value);
    Ok(())
}

/// Keep only the listed top-level fields (and `_id`).
pub(crate) fn project(document: &Document, fields: &[String]) -> Document {
    document
        .iter()
        .filter(|(key, _)| key.as_str() == "_id" || fields.iter().any(|field| field == *key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventvault::document::document;
    use proptest::prelude::*;
    use serde_json::json;

    fn doc() -> Document {
        document(json!({
            "_id": 3,
            "event_name": "UserRegistered",
            "metadata": {"_aggregate_version": 3, "tenant": "acme"},
            "category": null
        }))
    }

    #[test]
    fn null_equality_matches_missing_fields() {
        assert!(matches(&doc(), &Filter::Eq("missing".into(), Value::Null)).unwrap());
        assert!(matches(&doc(), &Filter::Eq("category".into(), Value::Null)).unwrap());
        assert!(!matches(&doc(), &Filter::Ne("missing".into(), Value::Null)).unwrap());
        assert!(matches(&doc(), &Filter::Ne("missing".into(), json!("x"))).unwrap());
    }

    #[test]
    fn range_filters_only_compare_like_types() {
        assert!(matches(&doc(), &Filter::Gte("_id".into(), json!(3))).unwrap());
        assert!(!matches(&doc(), &Filter::Gt("_id".into(), json!(3))).unwrap());
        assert!(!matches(&doc(), &Filter::Lt("_id".into(), json!("9"))).unwrap());
        assert!(matches(&doc(), &Filter::Lte("metadata._aggregate_version".into(), json!(3.0))).unwrap());
    }

    #[test]
    fn regex_filters_report_invalid_patterns() {
        assert!(matches(&doc(), &Filter::Regex("event_name".into(), "^User".into())).unwrap());
        assert!(matches!(
            matches(&doc(), &Filter::Regex("event_name".into(), "(".into())),
            Err(EngineError::InvalidRegex(_))
        ));
        assert!(validate(&Filter::all().and(Filter::Regex("a".into(), "[".into()))).is_err());
    }

    #[test]
    fn regex_filters_support_lookaround_and_backreferences() {
        let system = document(json!({"name": "$streams"}));
        let not_system = Filter::Regex("name".into(), r"^(?!\$)".into());
        assert!(matches(&doc(), &Filter::Regex("event_name".into(), r"^(?!\$)".into())).unwrap());
        assert!(!matches(&system, &not_system).unwrap());

        let repeated = Filter::Regex("name".into(), r"^(ab)\1$".into());
        assert!(matches(&document(json!({"name": "abab"})), &repeated).unwrap());
        assert!(!matches(&document(json!({"name": "abba"})), &repeated).unwrap());

        assert!(matches!(
            validate(&Filter::Regex("name".into(), "invalid)".into())),
            Err(EngineError::InvalidRegex(_))
        ));
    }

    #[test]
    fn empty_disjunction_matches_nothing() {
        assert!(!matches(&doc(), &Filter::Or(Vec::new())).unwrap());
        assert!(matches(&doc(), &Filter::all()).unwrap());
    }

    #[test]
    fn updates_set_nested_paths_and_increment() {
        let update = Update::inc("seq", 5).and_set("metadata.tenant", "other");
        let updated = apply_update(&doc(), &update).unwrap();
        assert_eq!(updated["seq"], json!(5));
        assert_eq!(updated["metadata"]["tenant"], json!("other"));
        assert_eq!(updated["metadata"]["_aggregate_version"], json!(3));
    }

    #[test]
    fn projection_keeps_id() {
        let projected = project(&doc(), &["event_name".to_string()]);
        assert_eq!(projected.len(), 2);
        assert!(projected.contains_key("_id"));
    }

    #[test]
    fn missing_values_sort_first() {
        assert_eq!(compare(None, Some(&json!(1))), Ordering::Less);
        assert_eq!(compare(Some(&json!("b")), Some(&json!("a"))), Ordering::Greater);
        assert_eq!(compare(Some(&json!(2)), Some(&json!(10))), Ordering::Less);
    }

    proptest! {
        #[test]
        fn integer_ranges_agree_with_native_ordering(a in any::<i64>(), b in any::<i64>()) {
            let row = document(json!({"n": a}));
            prop_assert_eq!(matches(&row, &Filter::Lt("n".into(), json!(b))).unwrap(), a < b);
            prop_assert_eq!(matches(&row, &Filter::Gte("n".into(), json!(b))).unwrap(), a >= b);
            prop_assert_eq!(compare(Some(&json!(a)), Some(&json!(b))), a.cmp(&b));
        }

        #[test]
        fn string_ranges_are_lexicographic(a in "[0-9:T.-]{0,12}", b in "[0-9:T.-]{0,12}") {
            let row = document(json!({"locked_until": a.clone()}));
            prop_assert_eq!(
                matches(&row, &Filter::Lt("locked_until".into(), json!(b.clone()))).unwrap(),
                a < b
            );
        }
    }
}
