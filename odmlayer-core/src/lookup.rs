//! Keyword lookup parsing: `field__operator = value` into expressions.
//!
//! Lookups are passed as an ordered [`bson::Document`]. Each key is a field path whose
//! segments are separated by `__`; the rightmost segment names the operator when the key
//! contains a separator, and a key without one is an implicit `exact` lookup.
//!
//! ```ignore
//! let parser = LookupParser::new(&settings, Movie::schema(), "_id");
//! let (filters, sorts) = parser.parse(&doc! {
//!     "year__gt": 2000,
//!     "producer__name__icontains": "lucas",
//!     "name__asc": true,
//! }, false)?;
//! ```

use bson::{Bson, Document};
use tracing::trace;

use crate::{
    error::{OdmError, OdmResult},
    expression::{Expression, SortDirection, SortExpression},
    operators::Q,
    schema::{FieldRef, Schema},
    settings::{LookupOperator, OdmSettings, OperatorCategory},
};

/// Separator between path segments and the operator in a lookup key.
pub const LOOKUP_SEPARATOR: &str = "__";

/// Translates keyword lookups into filter and sort expressions.
#[derive(Debug, Clone, Copy)]
pub struct LookupParser<'a> {
    settings: &'a OdmSettings,
    schema: Schema,
    id_field: &'a str,
}

impl<'a> LookupParser<'a> {
    /// Creates a parser for a document described by `schema` whose primary key is stored
    /// under `id_field`.
    pub fn new(settings: &'a OdmSettings, schema: Schema, id_field: &'a str) -> Self {
        Self {
            settings,
            schema,
            id_field,
        }
    }

    /// Parses every lookup of `lookups`, in order.
    ///
    /// Filter expressions are negated when `exclude` is set; sort expressions never are.
    ///
    /// # Errors
    ///
    /// - [`OdmError::InvalidOperator`] for operators outside the allow-list
    /// - [`OdmError::InvalidField`] for paths the schema does not declare
    /// - [`OdmError::InvalidLookupValue`] for values of the wrong shape
    pub fn parse(
        &self,
        lookups: &Document,
        exclude: bool,
    ) -> OdmResult<(Vec<Expression>, Vec<SortExpression>)> {
        let mut filters = Vec::new();
        let mut sorts = Vec::new();

        for (key, value) in lookups {
            match self.parse_one(key, value)? {
                Parsed::Filter(expression) => {
                    let expression = if exclude {
                        expression.negate()
                    } else {
                        expression
                    };
                    trace!(lookup = %key, expression = ?expression, "parsed filter lookup");
                    filters.push(expression);
                }
                Parsed::Sort(sort) => {
                    trace!(lookup = %key, sort = ?sort, "parsed sort lookup");
                    sorts.push(sort);
                }
            }
        }

        Ok((filters, sorts))
    }

    /// Rewrites a reserved primary-key alias in the first segment of `key`.
    pub fn replace_id(&self, key: &str) -> String {
        let (head, rest) = match key.split_once(LOOKUP_SEPARATOR) {
            Some((head, rest)) => (head, Some(rest)),
            None => (key, None),
        };

        if !self.settings.is_parsed_id(head) {
            return key.to_string();
        }

        match rest {
            Some(rest) => format!("{}{LOOKUP_SEPARATOR}{rest}", self.id_field),
            None => self.id_field.to_string(),
        }
    }

    /// Resolves a dotted path against the schema. The primary-key field is always valid.
    pub fn resolve(&self, path: &str) -> OdmResult<FieldRef> {
        if path == self.id_field {
            return Ok(FieldRef::untyped(path));
        }

        self.schema.field(path)
    }

    fn parse_one(&self, key: &str, value: &Bson) -> OdmResult<Parsed> {
        let key = self.replace_id(key);

        let (path, name) = match key.rsplit_once(LOOKUP_SEPARATOR) {
            Some((path, name)) => (path.replace(LOOKUP_SEPARATOR, "."), name),
            None => (key.clone(), "exact"),
        };

        let operator = self.settings.get_operator(name)?;
        let field = self.resolve(&path)?;
        let lookup = format!("{path}{LOOKUP_SEPARATOR}{name}");

        let expression = match operator.category() {
            OperatorCategory::Order => {
                let requested = if operator == LookupOperator::Asc {
                    SortDirection::Asc
                } else {
                    SortDirection::Desc
                };

                return Ok(Parsed::Sort(SortExpression::new(
                    &field,
                    sort_direction(requested, value),
                )));
            }
            OperatorCategory::List => {
                let values = match value {
                    Bson::Array(values) => values.clone(),
                    other => {
                        return Err(OdmError::invalid_value(
                            lookup,
                            format!(
                                "the operator `{name}` requires the value to be a list, got {:?}",
                                other.element_type()
                            ),
                        ));
                    }
                };

                if operator == LookupOperator::NotIn {
                    Q::not_in(&field, values)
                } else {
                    Q::in_(&field, values)
                }
            }
            OperatorCategory::Comparison => match operator {
                LookupOperator::Gt => Q::gt(&field, value.clone())?,
                LookupOperator::Gte => Q::gte(&field, value.clone())?,
                LookupOperator::Lt => Q::lt(&field, value.clone())?,
                _ => Q::lte(&field, value.clone())?,
            },
            OperatorCategory::Value => value_lookup(operator, &field, &lookup, value)?,
        };

        Ok(Parsed::Filter(expression))
    }
}

/// Builds the expression for a single-value lookup. Anything not listed is an equality.
fn value_lookup(
    operator: LookupOperator,
    field: &FieldRef,
    lookup: &str,
    value: &Bson,
) -> OdmResult<Expression> {
    let expression = match operator {
        LookupOperator::Neq => Q::neq(field, value.clone()),
        LookupOperator::Not => Q::not_eq(field, value.clone()),
        LookupOperator::Contains => Q::contains(field, value.clone()),
        LookupOperator::IContains => Q::icontains(field, value.clone()),
        LookupOperator::Pattern => match value {
            Bson::String(pattern) => Q::pattern(field, pattern.as_str())?,
            Bson::RegularExpression(regex) => match Q::pattern(field, regex.pattern.as_str())? {
                Expression::Compare(comparison) if !regex.options.as_str().is_empty() => {
                    Expression::Compare(comparison.with_options(regex.options.as_str()))
                }
                other => other,
            },
            other => {
                return Err(OdmError::invalid_value(
                    lookup,
                    format!("expected a string or regular expression, got {:?}", other.element_type()),
                ));
            }
        },
        LookupOperator::Where => match value {
            Bson::String(code) => Q::where_(code.as_str()),
            Bson::JavaScriptCode(code) => Q::where_(code.as_str()),
            other => {
                return Err(OdmError::invalid_value(
                    lookup,
                    format!("expected a string, got {:?}", other.element_type()),
                ));
            }
        },
        LookupOperator::Exists => match value {
            Bson::Boolean(flag) => Q::exists(field, *flag),
            other => {
                return Err(OdmError::invalid_value(
                    lookup,
                    format!("expected a boolean, got {:?}", other.element_type()),
                ));
            }
        },
        _ => Q::eq(field, value.clone()),
    };

    Ok(expression)
}

enum Parsed {
    Filter(Expression),
    Sort(SortExpression),
}

/// `asc=true`/`desc=true` keep the requested direction, `asc=false` flips to descending,
/// `desc=false` flips to ascending; anything else sorts ascending.
fn sort_direction(requested: SortDirection, value: &Bson) -> SortDirection {
    if is_truthy(value) {
        requested
    } else if matches!(value, Bson::Boolean(false)) {
        requested.reverse()
    } else {
        SortDirection::Asc
    }
}

fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined => false,
        Bson::Boolean(flag) => *flag,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        Bson::String(s) => !s.is_empty(),
        Bson::Array(items) => !items.is_empty(),
        Bson::Document(doc) => !doc.is_empty(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;
    use crate::schema::{FieldKind, FieldSchema};

    static PRODUCER: Schema = Schema::new("Producer", &[FieldSchema::new("name", FieldKind::String)]);

    static MOVIE: Schema = Schema::new("Movie", &[
        FieldSchema::new("name", FieldKind::String),
        FieldSchema::new("year", FieldKind::Integer),
        FieldSchema::new("language", FieldKind::String),
        FieldSchema::new("producer", FieldKind::Embedded(&PRODUCER)).nullable(),
    ]);

    fn parse(lookups: Document, exclude: bool) -> OdmResult<(Vec<Expression>, Vec<SortExpression>)> {
        let settings = OdmSettings::default();
        LookupParser::new(&settings, MOVIE, "_id").parse(&lookups, exclude)
    }

    #[test]
    fn range_lookups_compile_to_a_merged_clause() {
        let (filters, sorts) = parse(doc! { "year__gt": 2000, "year__lt": 2010 }, false).unwrap();

        assert!(sorts.is_empty());
        assert_eq!(filters, vec![
            Q::gt("year", 2000).unwrap(),
            Q::lt("year", 2010).unwrap(),
        ]);
        assert_eq!(
            Expression::compile_many(&filters).unwrap(),
            doc! { "year": { "$gt": 2000, "$lt": 2010 } }
        );
    }

    #[test]
    fn key_without_operator_is_exact() {
        let (filters, _) = parse(doc! { "name": "Downfall" }, false).unwrap();
        assert_eq!(filters, vec![Q::eq("name", "Downfall")]);
    }

    #[test]
    fn nested_paths_are_joined_with_dots() {
        let (filters, _) = parse(doc! { "producer__name__icontains": "bernd" }, false).unwrap();
        assert_eq!(
            Expression::compile_many(&filters).unwrap(),
            doc! { "producer.name": { "$regex": "bernd", "$options": "i" } }
        );

        let err = parse(doc! { "producer__budget__gt": 10 }, false).unwrap_err();
        assert!(matches!(err, OdmError::InvalidField { ref field, .. } if field == "producer.budget"));
    }

    #[test]
    fn reserved_ids_are_rewritten_before_splitting() {
        let (filters, _) = parse(doc! { "pk__gt": 5, "id": 7 }, false).unwrap();
        assert_eq!(filters, vec![Q::gt("_id", 5).unwrap(), Q::eq("_id", 7)]);
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let err = parse(doc! { "year__between": [1, 2] }, false).unwrap_err();
        assert!(matches!(err, OdmError::InvalidOperator { ref operator, .. } if operator == "between"));
    }

    #[test]
    fn list_lookups_require_a_list() {
        let err = parse(doc! { "year__in": 2004 }, false).unwrap_err();
        assert!(matches!(err, OdmError::InvalidLookupValue { ref lookup, .. } if lookup == "year__in"));

        let (filters, _) = parse(doc! { "year__not_in": [2004, 2002] }, false).unwrap();
        assert_eq!(filters, vec![Q::not_in("year", [2004, 2002])]);
    }

    #[test]
    fn sort_direction_inversion() {
        let sorts = |lookups| parse(lookups, false).unwrap().1;

        assert_eq!(sorts(doc! { "year__asc": false }), sorts(doc! { "year__desc": true }));
        assert_eq!(sorts(doc! { "year__desc": false }), sorts(doc! { "year__asc": true }));
        assert_eq!(sorts(doc! { "year__desc": false }), vec![Q::asc("year")]);
        assert_eq!(sorts(doc! { "year__desc": Bson::Null }), vec![Q::asc("year")]);
        assert_eq!(sorts(doc! { "year__desc": 1 }), vec![Q::desc("year")]);
    }

    #[test]
    fn exclude_negates_filters_only() {
        let (filters, sorts) = parse(doc! { "language__in": ["EN"], "year__desc": true }, true).unwrap();

        assert_eq!(sorts, vec![Q::desc("year")]);
        assert_eq!(
            Expression::compile_many(&filters).unwrap(),
            doc! { "language": { "$not": { "$in": ["EN"] } } }
        );
    }

    #[test]
    fn value_shaped_lookups() {
        let (filters, _) = parse(
            doc! {
                "name__pattern": "^The",
                "language__not": "EN",
                "year__where": "this.year > 2000",
            },
            false,
        )
        .unwrap();

        assert_eq!(
            Expression::compile_many(&filters).unwrap(),
            doc! {
                "name": { "$regex": "^The" },
                "language": { "$not": { "$eq": "EN" } },
                "$where": "this.year > 2000",
            }
        );

        assert!(parse(doc! { "year__pattern": "^2" }, false).is_err());
        assert!(parse(doc! { "year__gt": true }, false).is_err());
    }

    #[test]
    fn custom_names_dispatch_on_the_operator_category() {
        let settings = OdmSettings::builder()
            .operator("within", LookupOperator::In)
            .operator("upto", LookupOperator::Lte)
            .operator("newest", LookupOperator::Desc)
            .build();
        let parser = LookupParser::new(&settings, MOVIE, "_id");

        let (filters, sorts) = parser
            .parse(&doc! { "year__within": [1942, 2004], "year__upto": 2004, "year__newest": true }, false)
            .unwrap();
        assert_eq!(filters, vec![Q::in_("year", [1942, 2004]), Q::lte("year", 2004).unwrap()]);
        assert_eq!(sorts, vec![SortExpression::new("year", SortDirection::Desc)]);

        let err = parser.parse(&doc! { "year__within": 1942 }, false).unwrap_err();
        assert!(matches!(err, OdmError::InvalidLookupValue { ref lookup, .. } if lookup == "year__within"));
    }
}
