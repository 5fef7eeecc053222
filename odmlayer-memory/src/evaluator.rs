//! Native filter evaluation for in-memory document filtering.
//!
//! Filters reach the store already compiled into MongoDB-style documents, so this module
//! interprets that dialect directly: top-level `$and`/`$or`/`$nor`, dotted paths that fan
//! out across arrays, and the field operators the query layer emits.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};
use regex::RegexBuilder;

use odmlayer_core::{
    error::{OdmError, OdmResult},
    expression::SortDirection,
};

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to `f64` so that `Int32`, `Int64`, `Double` and
/// `Decimal128` values compare with each other. Decimals beyond `f64` precision compare
/// approximately.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::Decimal128(value) => match value.to_string().parse::<f64>() {
                Ok(number) => Comparable::Number(number),
                Err(_) => Comparable::Other(bson),
            },
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(
                arr
                    .iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>()
            ),
            Bson::Document(doc) => Comparable::Map(
                doc
                    .iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>()
            ),
            other => Comparable::Other(other),
        }
    }
}

impl Comparable<'_> {
    /// Cross-type sort rank, following the store's native ordering of BSON types.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 1,
            Comparable::Number(_) => 2,
            Comparable::String(_) => 3,
            Comparable::Map(_) => 4,
            Comparable::Array(_) => 5,
            Comparable::Other(_) => 6,
            Comparable::ObjectId(_) => 7,
            Comparable::Bool(_) => 8,
            Comparable::DateTime(_) => 9,
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Orders two records by a list of sort keys. Missing values sort as `null`.
pub(crate) fn compare_records(
    left: &Document,
    right: &Document,
    sort: &[(String, SortDirection)],
) -> Ordering {
    for (key, direction) in sort {
        let a = sort_value(left, key);
        let b = sort_value(right, key);

        let ordering = match a.rank().cmp(&b.rank()) {
            Ordering::Equal => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            ordering => ordering,
        };

        let ordering = match direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

fn sort_value<'a>(document: &'a Document, key: &str) -> Comparable<'a> {
    resolve_path(document, key)
        .into_iter()
        .next()
        .map(Comparable::from)
        .unwrap_or(Comparable::Null)
}

/// Every value reachable through a dotted path. Array elements are traversed
/// transparently; numeric segments index into arrays.
pub(crate) fn resolve_path<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut found = Vec::new();

    if let Some((head, rest)) = segments.split_first() {
        if let Some(value) = document.get(*head) {
            collect_path(value, rest, &mut found);
        }
    }

    found
}

fn collect_path<'a>(value: &'a Bson, segments: &[&str], found: &mut Vec<&'a Bson>) {
    let Some((head, rest)) = segments.split_first() else {
        found.push(value);
        return;
    };

    match value {
        Bson::Document(inner) => {
            if let Some(next) = inner.get(*head) {
                collect_path(next, rest, found);
            }
        }
        Bson::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(next) = items.get(index) {
                    collect_path(next, rest, found);
                }
            }
            for item in items {
                if let Bson::Document(_) = item {
                    collect_path(item, segments, found);
                }
            }
        }
        _ => {}
    }
}

/// Evaluates a native filter document against stored records.
pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Returns `true` when the record satisfies every clause of `filter`.
    pub fn evaluate(&self, filter: &Document) -> OdmResult<bool> {
        for (key, condition) in filter {
            let matched = match key.as_str() {
                "$and" => {
                    let mut matched = true;
                    for clause in clauses(key, condition)? {
                        if !self.evaluate(clause)? {
                            matched = false;
                            break;
                        }
                    }
                    matched
                }
                "$or" => {
                    let mut matched = false;
                    for clause in clauses(key, condition)? {
                        if self.evaluate(clause)? {
                            matched = true;
                            break;
                        }
                    }
                    matched
                }
                "$nor" => {
                    let mut matched = true;
                    for clause in clauses(key, condition)? {
                        if self.evaluate(clause)? {
                            matched = false;
                            break;
                        }
                    }
                    matched
                }
                "$where" => {
                    return Err(OdmError::Backend(
                        "$where predicates are not supported by the in-memory store".to_string(),
                    ));
                }
                other if other.starts_with('$') => {
                    return Err(OdmError::InvalidQuery(format!("unknown top-level operator `{other}`")));
                }
                path => self.evaluate_field(path, condition)?,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Keeps the records matching `filter`, propagating evaluation errors.
    pub fn filter_documents(
        documents: impl IntoIterator<Item = &'a Document>,
        filter: &Document,
    ) -> OdmResult<Vec<Document>> {
        let mut matched = Vec::new();

        for document in documents {
            if DocumentEvaluator::new(document).evaluate(filter)? {
                matched.push(document.clone());
            }
        }

        Ok(matched)
    }

    fn evaluate_field(&self, path: &str, condition: &Bson) -> OdmResult<bool> {
        let values = resolve_path(self.document, path);

        match condition {
            Bson::Document(operators) if is_operator_document(operators) => {
                evaluate_operators(&values, operators)
            }
            Bson::RegularExpression(regex) => {
                matches_regex(&values, regex.pattern.as_str(), regex.options.as_str())
            }
            value => Ok(equals_any(&values, value)),
        }
    }
}

fn clauses<'d>(operator: &str, condition: &'d Bson) -> OdmResult<Vec<&'d Document>> {
    let Bson::Array(items) = condition else {
        return Err(OdmError::InvalidQuery(format!("`{operator}` expects an array of filters")));
    };

    items
        .iter()
        .map(|item| match item {
            Bson::Document(clause) => Ok(clause),
            _ => Err(OdmError::InvalidQuery(format!("`{operator}` expects an array of filters"))),
        })
        .collect()
}

fn is_operator_document(document: &Document) -> bool {
    document
        .keys()
        .next()
        .is_some_and(|key| key.starts_with('$'))
}

fn evaluate_operators(values: &[&Bson], operators: &Document) -> OdmResult<bool> {
    for (operator, operand) in operators {
        let matched = match operator.as_str() {
            "$eq" => equals_any(values, operand),
            "$ne" => !equals_any(values, operand),
            "$gt" => compares(values, operand, |ordering| ordering == Ordering::Greater),
            "$gte" => compares(values, operand, |ordering| ordering != Ordering::Less),
            "$lt" => compares(values, operand, |ordering| ordering == Ordering::Less),
            "$lte" => compares(values, operand, |ordering| ordering != Ordering::Greater),
            "$in" => list(operator, operand)?
                .iter()
                .any(|candidate| equals_any(values, candidate)),
            "$nin" => !list(operator, operand)?
                .iter()
                .any(|candidate| equals_any(values, candidate)),
            "$all" => list(operator, operand)?
                .iter()
                .all(|candidate| equals_any(values, candidate)),
            "$exists" => {
                let should_exist = match operand {
                    Bson::Boolean(flag) => *flag,
                    _ => return Err(OdmError::InvalidQuery("`$exists` expects a boolean".to_string())),
                };
                values.is_empty() != should_exist
            }
            "$size" => {
                let size = match operand {
                    Bson::Int32(size) => i64::from(*size),
                    Bson::Int64(size) => *size,
                    _ => return Err(OdmError::InvalidQuery("`$size` expects an integer".to_string())),
                };
                values
                    .iter()
                    .any(|value| matches!(value, Bson::Array(items) if items.len() as i64 == size))
            }
            "$regex" => {
                let options = match operators.get("$options") {
                    Some(Bson::String(options)) => options.as_str(),
                    _ => "",
                };
                match operand {
                    Bson::String(pattern) => matches_regex(values, pattern, options)?,
                    Bson::RegularExpression(regex) => {
                        matches_regex(values, regex.pattern.as_str(), regex.options.as_str())?
                    }
                    _ => return Err(OdmError::InvalidQuery("`$regex` expects a string".to_string())),
                }
            }
            "$options" => true,
            "$not" => match operand {
                Bson::Document(inner) => !evaluate_operators(values, inner)?,
                Bson::RegularExpression(regex) => {
                    !matches_regex(values, regex.pattern.as_str(), regex.options.as_str())?
                }
                _ => return Err(OdmError::InvalidQuery("`$not` expects an operator document".to_string())),
            },
            other => {
                return Err(OdmError::InvalidQuery(format!("unsupported field operator `{other}`")));
            }
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn list<'d>(operator: &str, operand: &'d Bson) -> OdmResult<&'d Vec<Bson>> {
    match operand {
        Bson::Array(items) => Ok(items),
        _ => Err(OdmError::InvalidQuery(format!("`{operator}` expects an array"))),
    }
}

/// Equality the way the store applies it: a missing field equals `null`, and an array
/// field matches when it equals the operand or contains it.
fn equals_any(values: &[&Bson], operand: &Bson) -> bool {
    let expected = Comparable::from(operand);

    if values.is_empty() {
        return expected == Comparable::Null;
    }

    values.iter().any(|value| {
        let actual = Comparable::from(*value);
        if actual == expected {
            return true;
        }
        match actual {
            Comparable::Array(items) => items.iter().any(|item| item == &expected),
            _ => false,
        }
    })
}

fn compares(values: &[&Bson], operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let expected = Comparable::from(operand);

    values.iter().any(|value| {
        let actual = Comparable::from(*value);
        let candidates = match actual {
            Comparable::Array(items) => items,
            single => vec![single],
        };

        candidates
            .iter()
            .filter_map(|candidate| candidate.partial_cmp(&expected))
            .any(&accept)
    })
}

fn matches_regex(values: &[&Bson], pattern: &str, options: &str) -> OdmResult<bool> {
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| OdmError::InvalidQuery(format!("invalid regular expression `{pattern}`: {e}")))?;

    Ok(values.iter().any(|value| match value {
        Bson::String(text) => regex.is_match(text),
        Bson::Array(items) => items
            .iter()
            .any(|item| matches!(item, Bson::String(text) if regex.is_match(text))),
        _ => false,
    }))
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    fn downfall() -> Document {
        doc! {
            "name": "Downfall",
            "year": 2004,
            "tags": ["war", "history"],
            "producer": { "name": "Bernd", "awards": [{ "name": "Bavarian" }] },
        }
    }

    fn matches(filter: Document) -> bool {
        DocumentEvaluator::new(&downfall()).evaluate(&filter).unwrap()
    }

    #[test]
    fn decimals_compare_with_other_numbers() {
        let price: bson::Decimal128 = "12.50".parse().unwrap();
        let record = doc! { "price": price };
        let evaluate = |filter| DocumentEvaluator::new(&record).evaluate(&filter).unwrap();

        assert!(evaluate(doc! { "price": { "$gt": 12, "$lt": 12.75 } }));
        assert!(evaluate(doc! { "price": { "$eq": 12.5 } }));
        assert!(!evaluate(doc! { "price": { "$gte": 13 } }));
    }

    #[test]
    fn equality_and_comparisons() {
        assert!(matches(doc! { "name": "Downfall" }));
        assert!(matches(doc! { "year": { "$eq": 2004_i64 } }));
        assert!(matches(doc! { "year": { "$gt": 2000, "$lte": 2004.0 } }));
        assert!(!matches(doc! { "year": { "$lt": 2004 } }));
        assert!(!matches(doc! { "year": { "$gt": "2000" } }));
        assert!(matches(doc! { "language": null }));
        assert!(matches(doc! { "language": { "$exists": false } }));
    }

    #[test]
    fn arrays_and_nested_paths() {
        assert!(matches(doc! { "tags": "war" }));
        assert!(matches(doc! { "tags": { "$all": ["war", "history"] } }));
        assert!(matches(doc! { "tags": { "$size": 2 } }));
        assert!(matches(doc! { "tags": { "$nin": ["comedy"] } }));
        assert!(matches(doc! { "producer.name": { "$in": ["Bernd", "Oliver"] } }));
        assert!(matches(doc! { "producer.awards.name": "Bavarian" }));
        assert!(matches(doc! { "tags.1": "history" }));
    }

    #[test]
    fn regex_and_negation() {
        assert!(matches(doc! { "name": { "$regex": "fall$" } }));
        assert!(matches(doc! { "name": { "$regex": "^down", "$options": "i" } }));
        assert!(!matches(doc! { "name": { "$regex": "^down" } }));
        assert!(matches(doc! { "name": { "$not": { "$regex": "^Up" } } }));
        assert!(!matches(doc! { "year": { "$not": { "$eq": 2004 } } }));
    }

    #[test]
    fn combinators() {
        assert!(matches(doc! { "$or": [{ "year": 1999 }, { "name": "Downfall" }] }));
        assert!(!matches(doc! { "$and": [{ "year": 2004 }, { "name": "Other" }] }));
        assert!(matches(doc! { "$nor": [{ "year": 1999 }] }));
    }

    #[test]
    fn unsupported_clauses_are_errors() {
        let empty = Document::new();
        let evaluator = DocumentEvaluator::new(&empty);
        assert!(matches!(
            evaluator.evaluate(&doc! { "$where": "this.year > 2000" }),
            Err(OdmError::Backend(_))
        ));
        assert!(matches!(
            evaluator.evaluate(&doc! { "year": { "$near": 1 } }),
            Err(OdmError::InvalidQuery(_))
        ));
    }

    #[test]
    fn sort_orders_by_type_rank_then_value() {
        let records = [
            doc! { "year": "unknown" },
            doc! { "year": 2004 },
            doc! {},
            doc! { "year": 1999.5 },
        ];
        let mut sorted = records.to_vec();
        sorted.sort_by(|a, b| compare_records(a, b, &[("year".to_string(), SortDirection::Asc)]));

        assert_eq!(sorted, vec![
            doc! {},
            doc! { "year": 1999.5 },
            doc! { "year": 2004 },
            doc! { "year": "unknown" },
        ]);
    }
}
