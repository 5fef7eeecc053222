//! Field metadata and value validation for documents.
//!
//! A [`Schema`] is a static table of [`FieldSchema`] entries describing the fields a
//! document declares. It answers the questions the query layer needs: does a (possibly
//! dotted) field path exist, what is its declared [`FieldKind`], and is it textual. It also
//! validates and normalizes raw values before they are written to a store.
//!
//! # Example
//!
//! ```ignore
//! use odmlayer::schema::{FieldKind, FieldSchema, Schema};
//!
//! static ADDRESS: Schema = Schema::new("Address", &[
//!     FieldSchema::new("city", FieldKind::String),
//! ]);
//!
//! static PERSON: Schema = Schema::new("Person", &[
//!     FieldSchema::new("name", FieldKind::String),
//!     FieldSchema::new("age", FieldKind::Integer),
//!     FieldSchema::new("address", FieldKind::Embedded(&ADDRESS)).nullable(),
//! ]);
//!
//! let city = PERSON.field("address.city")?;
//! assert!(city.is_textual());
//! ```

use bson::{Bson, Document, oid::ObjectId, spec::BinarySubtype};
use chrono::{DateTime, Utc};

use crate::{
    error::{OdmError, OdmResult},
    expression::{Expression, SortExpression},
    operators::{Pattern, Q},
};

/// Declared type of a document field.
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    /// UTF-8 text. The only kind considered textual.
    String,
    /// 32 or 64 bit integer.
    Integer,
    /// Floating point number.
    Double,
    /// 128 bit decimal (integers and doubles are accepted as-is).
    Decimal,
    /// Boolean flag.
    Boolean,
    /// UTC date and time.
    DateTime,
    /// BSON object id.
    ObjectId,
    /// UUID stored as BSON binary.
    Uuid,
    /// Homogeneous array of the given kind.
    Array(&'static FieldKind),
    /// Embedded document described by its own schema.
    Embedded(&'static Schema),
    /// Any value; no validation is performed.
    Any,
}

impl FieldKind {
    /// Returns a short, human readable name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Integer => "integer",
            FieldKind::Double => "double",
            FieldKind::Decimal => "decimal",
            FieldKind::Boolean => "boolean",
            FieldKind::DateTime => "datetime",
            FieldKind::ObjectId => "object id",
            FieldKind::Uuid => "uuid",
            FieldKind::Array(_) => "array",
            FieldKind::Embedded(_) => "embedded document",
            FieldKind::Any => "any",
        }
    }
}

/// Declaration of a single field.
#[derive(Debug, Clone, Copy)]
pub struct FieldSchema {
    /// Name of the field as stored.
    pub name: &'static str,
    /// Declared kind.
    pub kind: FieldKind,
    /// Whether `null` is an accepted value.
    pub nullable: bool,
}

impl FieldSchema {
    /// Declares a non-nullable field.
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind, nullable: false }
    }

    /// Marks the field as accepting `null`.
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Validates a value against this field, returning its normalized form.
    ///
    /// `path` is the dotted path used in error messages.
    pub fn validate(&self, path: &str, value: &Bson) -> OdmResult<Bson> {
        if matches!(value, Bson::Null) {
            return if self.nullable {
                Ok(Bson::Null)
            } else {
                Err(OdmError::validation(path, "field may not be null"))
            };
        }

        validate_kind(&self.kind, path, value)
    }
}

fn mismatch(path: &str, kind: &FieldKind, value: &Bson) -> OdmError {
    OdmError::validation(
        path,
        format!("expected {}, got {:?}", kind.type_name(), value.element_type()),
    )
}

/// `true` for finite whole numbers inside the `i64` range.
fn is_whole_i64(value: f64) -> bool {
    value.fract() == 0.0 && (i64::MIN as f64..i64::MAX as f64).contains(&value)
}

fn validate_kind(kind: &FieldKind, path: &str, value: &Bson) -> OdmResult<Bson> {
    match (kind, value) {
        (FieldKind::Any, _) => Ok(value.clone()),
        (FieldKind::String, Bson::String(_)) => Ok(value.clone()),
        (FieldKind::Integer, Bson::Int32(_) | Bson::Int64(_)) => Ok(value.clone()),
        (FieldKind::Integer, Bson::Double(d)) if is_whole_i64(*d) => Ok(Bson::Int64(*d as i64)),
        (FieldKind::Integer, Bson::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Bson::Int64)
            .map_err(|_| OdmError::validation(path, format!("`{s}` is not a valid integer"))),
        (FieldKind::Double, Bson::Double(_)) => Ok(value.clone()),
        (FieldKind::Double, Bson::Int32(i)) => Ok(Bson::Double(*i as f64)),
        (FieldKind::Double, Bson::Int64(i)) => Ok(Bson::Double(*i as f64)),
        (FieldKind::Double, Bson::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Bson::Double)
            .map_err(|_| OdmError::validation(path, format!("`{s}` is not a valid number"))),
        (
            FieldKind::Decimal,
            Bson::Decimal128(_) | Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_),
        ) => Ok(value.clone()),
        (FieldKind::Boolean, Bson::Boolean(_)) => Ok(value.clone()),
        (FieldKind::DateTime, Bson::DateTime(_)) => Ok(value.clone()),
        (FieldKind::DateTime, Bson::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Bson::DateTime(bson::DateTime::from_chrono(dt.with_timezone(&Utc))))
            .map_err(|e| OdmError::validation(path, format!("`{s}` is not an RFC 3339 datetime: {e}"))),
        (FieldKind::ObjectId, Bson::ObjectId(_)) => Ok(value.clone()),
        (FieldKind::ObjectId, Bson::String(s)) => ObjectId::parse_str(s)
            .map(Bson::ObjectId)
            .map_err(|_| OdmError::validation(path, format!("`{s}` is not a valid object id"))),
        (FieldKind::Uuid, Bson::Binary(binary)) if binary.subtype == BinarySubtype::Uuid => {
            Ok(value.clone())
        }
        (FieldKind::Uuid, Bson::String(s)) => uuid::Uuid::parse_str(s)
            .map(|u| Bson::from(bson::Uuid::from(u)))
            .map_err(|_| OdmError::validation(path, format!("`{s}` is not a valid uuid"))),
        (FieldKind::Array(inner), Bson::Array(items)) => Ok(Bson::Array(
            items
                .iter()
                .enumerate()
                .map(|(index, item)| validate_kind(inner, &format!("{path}.{index}"), item))
                .collect::<OdmResult<Vec<_>>>()?,
        )),
        (FieldKind::Embedded(schema), Bson::Document(doc)) => {
            Ok(Bson::Document(schema.validate_prefixed(path, doc)?))
        }
        _ => Err(mismatch(path, kind, value)),
    }
}

/// Static description of the fields a document (or embedded document) declares.
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    name: &'static str,
    fields: &'static [FieldSchema],
    strict: bool,
}

impl Schema {
    /// Creates a strict schema: unknown field paths are rejected.
    pub const fn new(name: &'static str, fields: &'static [FieldSchema]) -> Self {
        Self { name, fields, strict: true }
    }

    /// Creates a schema that accepts any field path as an untyped field.
    pub const fn dynamic(name: &'static str) -> Self {
        Self { name, fields: &[], strict: false }
    }

    /// Returns the name of the described document.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Looks up a top-level field by name.
    pub fn get(&self, name: &str) -> Option<&'static FieldSchema> {
        self.fields
            .iter()
            .find(|field| field.name == name)
    }

    /// Resolves a dotted field path into a [`FieldRef`].
    ///
    /// Embedded documents (and arrays of embedded documents) are traversed segment by
    /// segment. Numeric segments index into arrays.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::InvalidField`] naming the full path and the document on which
    /// the missing segment was looked up.
    pub fn field(&self, path: impl AsRef<str>) -> OdmResult<FieldRef> {
        let path = path.as_ref();
        let mut schema = *self;
        let mut kind: Option<FieldKind> = None;

        for segment in path.split('.') {
            if segment.is_empty() {
                return Err(self.invalid(path, schema.name));
            }

            let current = match kind {
                None => match schema.get(segment) {
                    Some(field) => field.kind,
                    None if !schema.strict => FieldKind::Any,
                    None => return Err(self.invalid(path, schema.name)),
                },
                Some(FieldKind::Embedded(embedded)) => {
                    schema = *embedded;
                    match schema.get(segment) {
                        Some(field) => field.kind,
                        None if !schema.strict => FieldKind::Any,
                        None => return Err(self.invalid(path, schema.name)),
                    }
                }
                Some(FieldKind::Array(inner)) if segment.parse::<usize>().is_ok() => *inner,
                Some(FieldKind::Array(FieldKind::Embedded(embedded))) => {
                    schema = **embedded;
                    match schema.get(segment) {
                        Some(field) => field.kind,
                        None if !schema.strict => FieldKind::Any,
                        None => return Err(self.invalid(path, schema.name)),
                    }
                }
                Some(FieldKind::Any) => FieldKind::Any,
                Some(other) => {
                    return Err(OdmError::InvalidField {
                        field: path.to_string(),
                        document: format!("{} ({} has no sub-fields)", self.name, other.type_name()),
                    });
                }
            };

            kind = Some(current);
        }

        match kind {
            Some(kind) => Ok(FieldRef::new(path, kind)),
            None => Err(self.invalid(path, self.name)),
        }
    }

    /// Validates a set of (possibly dotted) field values, returning normalized values.
    ///
    /// # Errors
    ///
    /// [`OdmError::InvalidField`] for unknown fields of a strict schema and
    /// [`OdmError::Validation`] for values that do not fit their declared kind.
    pub fn validate(&self, values: &Document) -> OdmResult<Document> {
        self.validate_prefixed("", values)
    }

    fn validate_prefixed(&self, prefix: &str, values: &Document) -> OdmResult<Document> {
        let mut normalized = Document::new();

        for (key, value) in values {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };

            let checked = match self.get(key) {
                Some(field) => field.validate(&path, value)?,
                None if key.contains('.') => {
                    let field = self.field(key)?;
                    if matches!(value, Bson::Null) {
                        Bson::Null
                    } else {
                        validate_kind(&field.kind, &path, value)?
                    }
                }
                None if !self.strict => value.clone(),
                None => return Err(self.invalid(&path, self.name)),
            };

            normalized.insert(key.clone(), checked);
        }

        Ok(normalized)
    }

    fn invalid(&self, path: &str, document: &str) -> OdmError {
        OdmError::InvalidField {
            field: path.to_string(),
            document: document.to_string(),
        }
    }
}

/// A resolved field descriptor: a dotted path plus its declared kind.
///
/// `FieldRef` values are what [`Schema::field`] hands out and can be used anywhere a
/// field key is expected. They also provide the field-comparison syntax, e.g.
/// `schema.field("year")?.gt(2000)?`.
#[derive(Debug, Clone)]
pub struct FieldRef {
    path: String,
    kind: FieldKind,
}

impl FieldRef {
    /// Creates a descriptor for the given dotted path and kind.
    pub fn new(path: impl Into<String>, kind: FieldKind) -> Self {
        Self { path: path.into(), kind }
    }

    /// Creates a descriptor for a field whose kind is unknown.
    pub fn untyped(path: impl Into<String>) -> Self {
        Self::new(path, FieldKind::Any)
    }

    /// Returns the fully dotted path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the declared kind.
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Returns `true` when the declared kind is [`FieldKind::String`].
    pub fn is_textual(&self) -> bool {
        matches!(self.kind, FieldKind::String)
    }

    /// `field == value`
    pub fn eq(&self, value: impl Into<Bson>) -> Expression {
        Q::eq(self, value)
    }

    /// `field != value`
    pub fn neq(&self, value: impl Into<Bson>) -> Expression {
        Q::neq(self, value)
    }

    /// `field in values`
    pub fn is_in<I, V>(&self, values: I) -> Expression
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        Q::in_(self, values)
    }

    /// `field not in values`
    pub fn not_in<I, V>(&self, values: I) -> Expression
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        Q::not_in(self, values)
    }

    /// `field > value`
    pub fn gt(&self, value: impl Into<Bson>) -> OdmResult<Expression> {
        Q::gt(self, value)
    }

    /// `field >= value`
    pub fn gte(&self, value: impl Into<Bson>) -> OdmResult<Expression> {
        Q::gte(self, value)
    }

    /// `field < value`
    pub fn lt(&self, value: impl Into<Bson>) -> OdmResult<Expression> {
        Q::lt(self, value)
    }

    /// `field <= value`
    pub fn lte(&self, value: impl Into<Bson>) -> OdmResult<Expression> {
        Q::lte(self, value)
    }

    /// See [`Q::contains`].
    pub fn contains(&self, value: impl Into<Bson>) -> Expression {
        Q::contains(self, value)
    }

    /// See [`Q::icontains`].
    pub fn icontains(&self, value: impl Into<Bson>) -> Expression {
        Q::icontains(self, value)
    }

    /// See [`Q::pattern`].
    pub fn pattern(&self, pattern: impl Into<Pattern>) -> OdmResult<Expression> {
        Q::pattern(self, pattern)
    }

    /// Ascending sort on this field.
    pub fn asc(&self) -> SortExpression {
        Q::asc(self)
    }

    /// Descending sort on this field.
    pub fn desc(&self) -> SortExpression {
        Q::desc(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    static PRODUCER: Schema = Schema::new("Producer", &[
        FieldSchema::new("name", FieldKind::String),
        FieldSchema::new("founded", FieldKind::Integer).nullable(),
    ]);

    static AWARD: Schema = Schema::new("Award", &[FieldSchema::new("title", FieldKind::String)]);

    static MOVIE: Schema = Schema::new("Movie", &[
        FieldSchema::new("name", FieldKind::String),
        FieldSchema::new("year", FieldKind::Integer),
        FieldSchema::new("rating", FieldKind::Double).nullable(),
        FieldSchema::new("tags", FieldKind::Array(&FieldKind::String)).nullable(),
        FieldSchema::new("producer", FieldKind::Embedded(&PRODUCER)).nullable(),
        FieldSchema::new("awards", FieldKind::Array(&FieldKind::Embedded(&AWARD))).nullable(),
        FieldSchema::new("released_at", FieldKind::DateTime).nullable(),
    ]);

    #[test]
    fn resolves_nested_paths() {
        let field = MOVIE.field("producer.name").unwrap();
        assert_eq!(field.path(), "producer.name");
        assert!(field.is_textual());

        let field = MOVIE.field("awards.title").unwrap();
        assert!(field.is_textual());

        let field = MOVIE.field("tags.0").unwrap();
        assert!(field.is_textual());
    }

    #[test]
    fn missing_intermediate_segment_is_reported() {
        let err = MOVIE.field("studio.name").unwrap_err();
        match err {
            OdmError::InvalidField { field, document } => {
                assert_eq!(field, "studio.name");
                assert_eq!(document, "Movie");
            }
            other => panic!("unexpected error {other:?}"),
        }

        let err = MOVIE.field("producer.budget").unwrap_err();
        assert!(matches!(err, OdmError::InvalidField { ref document, .. } if document == "Producer"));

        assert!(MOVIE.field("year.value").is_err());
    }

    #[test]
    fn dynamic_schema_accepts_anything() {
        let schema = Schema::dynamic("Anything");
        let field = schema.field("deep.nested.path").unwrap();
        assert!(!field.is_textual());
    }

    #[test]
    fn validation_normalizes_values() {
        let values = MOVIE
            .validate(&doc! { "year": "2004", "rating": 7, "producer": { "name": "Bernd" } })
            .unwrap();

        assert_eq!(values.get("year"), Some(&Bson::Int64(2004)));
        assert_eq!(values.get("rating"), Some(&Bson::Double(7.0)));

        let values = MOVIE
            .validate(&doc! { "released_at": "2004-09-16T00:00:00Z" })
            .unwrap();
        assert!(matches!(values.get("released_at"), Some(Bson::DateTime(_))));
    }

    #[test]
    fn validation_reports_field_path() {
        let err = MOVIE.validate(&doc! { "name": 12 }).unwrap_err();
        assert!(matches!(err, OdmError::Validation { ref field, .. } if field == "name"));

        let err = MOVIE.validate(&doc! { "tags": ["a", 3] }).unwrap_err();
        assert!(matches!(err, OdmError::Validation { ref field, .. } if field == "tags.1"));

        let err = MOVIE.validate(&doc! { "year": Bson::Null }).unwrap_err();
        assert!(matches!(err, OdmError::Validation { ref message, .. } if message.contains("null")));

        let err = MOVIE.validate(&doc! { "budget": 10 }).unwrap_err();
        assert!(matches!(err, OdmError::InvalidField { .. }));
    }

    #[test]
    fn doubles_become_integers_only_when_whole_and_in_range() {
        let values = MOVIE.validate(&doc! { "year": 2004.0 }).unwrap();
        assert_eq!(values.get("year"), Some(&Bson::Int64(2004)));

        for year in [2004.5, 1e19, -1e19, f64::INFINITY, f64::NAN] {
            let err = MOVIE.validate(&doc! { "year": year }).unwrap_err();
            assert!(matches!(err, OdmError::Validation { ref field, .. } if field == "year"));
        }
    }
}
