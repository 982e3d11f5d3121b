//! Rendering of engine-neutral queries into BSON, and document conversion
//! between `serde_json` and `bson`.

use bson::{doc, Bson, Document as BsonDocument};
use eventvault::document::{Document, Filter, FindOptions, IndexSpec, SortOrder, Update};
use eventvault::errors::{EngineError, EngineResult};
use serde_json::Value;

/// Convert a JSON document into BSON.
pub fn to_bson_document(document: &Document) -> EngineResult<BsonDocument> {
    bson::to_document(document).map_err(|e| EngineError::backend("encode", e))
}

/// Convert a JSON value into BSON.
pub fn to_bson(value: &Value) -> EngineResult<Bson> {
    bson::to_bson(value).map_err(|e| EngineError::backend("encode", e))
}

/// Convert a BSON document into JSON using relaxed extended JSON, so
/// integers stay plain numbers.
pub fn from_bson_document(document: BsonDocument) -> Document {
    match Bson::Document(document).into_relaxed_extjson() {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

/// Convert a BSON value into JSON.
pub fn from_bson(value: Bson) -> Value {
    value.into_relaxed_extjson()
}

fn operator(field: &str, op: &str, value: &Value) -> EngineResult<BsonDocument> {
    let mut inner = BsonDocument::new();
    inner.insert(op, to_bson(value)?);
    let mut clause = BsonDocument::new();
    clause.insert(field, inner);
    Ok(clause)
}

fn list(values: &[Value]) -> EngineResult<Bson> {
    Ok(Bson::Array(values.iter().map(to_bson).collect::<EngineResult<_>>()?))
}

/// Render a filter as a MongoDB query document.
pub fn render_filter(filter: &Filter) -> EngineResult<BsonDocument> {
    match filter {
        Filter::Eq(field, value) => operator(field, "$eq", value),
        Filter::Ne(field, value) => operator(field, "$ne", value),
        Filter::Gt(field, value) => operator(field, "$gt", value),
        Filter::Gte(field, value) => operator(field, "$gte", value),
        Filter::Lt(field, value) => operator(field, "$lt", value),
        Filter::Lte(field, value) => operator(field, "$lte", value),
        Filter::Regex(field, pattern) => {
            let mut clause = BsonDocument::new();
            clause.insert(field, doc! { "$regex": pattern.as_str() });
            Ok(clause)
        }
        Filter::In(field, values) => {
            let values = list(values)?;
            let mut clause = BsonDocument::new();
            clause.insert(field, doc! { "$in": values });
            Ok(clause)
        }
        Filter::Nin(field, values) => {
            let values = list(values)?;
            let mut clause = BsonDocument::new();
            clause.insert(field, doc! { "$nin": values });
            Ok(clause)
        }
        Filter::Exists(field, exists) => {
            let mut clause = BsonDocument::new();
            clause.insert(field, doc! { "$exists": *exists });
            Ok(clause)
        }
        Filter::And(clauses) if clauses.is_empty() => Ok(BsonDocument::new()),
        Filter::And(clauses) => {
            let clauses = render_all(clauses)?;
            Ok(doc! { "$and": clauses })
        }
        // `$or` rejects an empty array; an empty `$in` matches nothing.
        Filter::Or(clauses) if clauses.is_empty() => Ok(doc! { "_id": { "$in": [] } }),
        Filter::Or(clauses) => {
            let clauses = render_all(clauses)?;
            Ok(doc! { "$or": clauses })
        }
    }
}

fn render_all(clauses: &[Filter]) -> EngineResult<Vec<Bson>> {
    clauses
        .iter()
        .map(|clause| render_filter(clause).map(Bson::Document))
        .collect()
}

/// Render an update as `$set` / `$inc` operators.
pub fn render_update(update: &Update) -> EngineResult<BsonDocument> {
    let mut rendered = BsonDocument::new();
    if !update.set.is_empty() {
        rendered.insert("$set", to_bson_document(&update.set)?);
    }
    if !update.inc.is_empty() {
        let inc: BsonDocument = update
            .inc
            .iter()
            .map(|(field, by)| (field.clone(), Bson::Int64(*by)))
            .collect();
        rendered.insert("$inc", inc);
    }
    Ok(rendered)
}

/// Sort document for a find.
pub fn render_sort(options: &FindOptions) -> Option<BsonDocument> {
    options.sort.as_ref().map(|(field, order)| {
        let direction = match order {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        };
        let mut sort = BsonDocument::new();
        sort.insert(field.clone(), direction);
        sort
    })
}

/// Projection document for a find.
pub fn render_projection(options: &FindOptions) -> Option<BsonDocument> {
    options.projection.as_ref().map(|fields| {
        fields
            .iter()
            .map(|field| (field.clone(), Bson::Int32(1)))
            .collect()
    })
}

/// Key document of an index, all fields ascending.
pub fn render_index_keys(index: &IndexSpec) -> BsonDocument {
    index
        .keys
        .iter()
        .map(|key| (key.clone(), Bson::Int32(1)))
        .collect()
}
