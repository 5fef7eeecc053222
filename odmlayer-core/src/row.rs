//! Materialization of raw stored records into document instances.
//!
//! Managers are parameterized by a [`Projection`]. Without `only`/`defer` a manager uses
//! [`Full`] and yields fully validated `D` values. After `only`/`defer` it switches to
//! [`Partial`] and yields [`ProxyDocument`]s: reduced instances that tolerate missing
//! required fields and fail loudly when an unloaded field is accessed.

use std::{collections::BTreeSet, fmt, marker::PhantomData};

use bson::{Bson, Document as BsonDocument, de::deserialize_from_bson};
use serde::de::DeserializeOwned;

use crate::{
    document::{Document, DocumentExt},
    error::{OdmError, OdmResult},
};

/// The field restrictions a record is materialized with.
#[derive(Debug, Clone, Copy)]
pub struct FieldSelection<'a> {
    /// Fields to load. Empty unless `only` was used.
    pub only: &'a [String],
    /// Fields to leave out. Empty unless `defer` was used.
    pub defer: &'a [String],
    /// Primary-key storage field.
    pub id_field: &'a str,
    /// Reserved primary-key aliases (`id`, `pk`).
    pub id_aliases: &'a [String],
}

/// Turns raw records into the row type of a manager.
pub trait Projection<D: Document>: Send + Sync + 'static {
    /// The materialized row type.
    type Output: Send + Sync + Clone + 'static;

    /// Materializes a raw record.
    fn materialize(record: BsonDocument, selection: FieldSelection<'_>) -> OdmResult<Self::Output>;

    /// Converts a materialized row back into a plain mapping, as used by `values`.
    fn to_values(row: &Self::Output) -> OdmResult<BsonDocument>;
}

/// Full rows: records are deserialized into `D`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Full;

/// Reduced rows: records are wrapped in a [`ProxyDocument`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Partial;

impl<D: Document> Projection<D> for Full {
    type Output = D;

    fn materialize(record: BsonDocument, _selection: FieldSelection<'_>) -> OdmResult<D> {
        D::from_document(record)
    }

    fn to_values(row: &D) -> OdmResult<BsonDocument> {
        row.to_document()
    }
}

impl<D: Document> Projection<D> for Partial {
    type Output = ProxyDocument<D>;

    fn materialize(record: BsonDocument, selection: FieldSelection<'_>) -> OdmResult<ProxyDocument<D>> {
        Ok(ProxyDocument::from_row(record, selection))
    }

    fn to_values(row: &ProxyDocument<D>) -> OdmResult<BsonDocument> {
        Ok(row.values().clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Loaded {
    Only(BTreeSet<String>),
    AllBut(BTreeSet<String>),
}

/// A reduced document instance produced by `only`/`defer`.
///
/// Accessing a field that was not loaded returns [`OdmError::FieldNotLoaded`] instead of
/// a default value.
pub struct ProxyDocument<D> {
    values: BsonDocument,
    loaded: Loaded,
    id_field: String,
    id_aliases: Vec<String>,
    _document: PhantomData<fn() -> D>,
}

impl<D> Clone for ProxyDocument<D> {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
            loaded: self.loaded.clone(),
            id_field: self.id_field.clone(),
            id_aliases: self.id_aliases.clone(),
            _document: PhantomData,
        }
    }
}

impl<D> fmt::Debug for ProxyDocument<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyDocument")
            .field("values", &self.values)
            .field("loaded", &self.loaded)
            .finish()
    }
}

impl<D: Document> ProxyDocument<D> {
    /// Builds a reduced instance from a raw record.
    ///
    /// With `only`, the primary key and the listed fields are kept. With `defer`, every
    /// field except the listed ones is kept.
    pub fn from_row(record: BsonDocument, selection: FieldSelection<'_>) -> Self {
        let (values, loaded) = if !selection.only.is_empty() {
            let mut fields: BTreeSet<String> = selection.only.iter().cloned().collect();
            fields.insert(selection.id_field.to_string());

            let mut values = BsonDocument::new();
            for field in &fields {
                if let Some(value) = get_path(&record, field) {
                    insert_path(&mut values, field, value.clone());
                }
            }

            (values, Loaded::Only(fields))
        } else {
            let fields: BTreeSet<String> = selection.defer.iter().cloned().collect();

            let mut values = record;
            for field in &fields {
                remove_path(&mut values, field);
            }

            (values, Loaded::AllBut(fields))
        };

        Self {
            values,
            loaded,
            id_field: selection.id_field.to_string(),
            id_aliases: selection.id_aliases.to_vec(),
            _document: PhantomData,
        }
    }

    /// Returns `true` when `field` was loaded.
    pub fn is_loaded(&self, field: &str) -> bool {
        let field = self.canonical(field);
        let mut prefixes = prefixes(&field);

        match &self.loaded {
            Loaded::Only(fields) => prefixes.any(|prefix| fields.contains(prefix)),
            Loaded::AllBut(fields) => !prefixes.any(|prefix| fields.contains(prefix)),
        }
    }

    /// Reads a loaded field. Missing values deserialize from `null`.
    ///
    /// # Errors
    ///
    /// [`OdmError::FieldNotLoaded`] when the field was excluded by `only`/`defer`, and
    /// [`OdmError::Serialization`] when the stored value does not fit `T`.
    pub fn get<T: DeserializeOwned>(&self, field: &str) -> OdmResult<T> {
        if !self.is_loaded(field) {
            return Err(OdmError::FieldNotLoaded {
                field: field.to_string(),
            });
        }

        let value = get_path(&self.values, &self.canonical(field))
            .cloned()
            .unwrap_or(Bson::Null);

        Ok(deserialize_from_bson(value)?)
    }

    /// Reads the primary key.
    pub fn id(&self) -> Option<&Bson> {
        self.values.get(&self.id_field)
    }

    /// The loaded values.
    pub fn values(&self) -> &BsonDocument {
        &self.values
    }

    /// Attempts a fully validated construction from the loaded values.
    pub fn try_into_document(self) -> OdmResult<D> {
        D::from_document(self.values)
    }

    fn canonical(&self, field: &str) -> String {
        if self.id_aliases.iter().any(|alias| alias == field) {
            self.id_field.clone()
        } else {
            field.to_string()
        }
    }
}

fn prefixes(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('.')
        .map(|(index, _)| &path[..index])
        .chain(std::iter::once(path))
}

/// Reads a dotted path out of a document.
pub(crate) fn get_path<'d>(document: &'d BsonDocument, path: &str) -> Option<&'d Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

fn insert_path(document: &mut BsonDocument, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, BsonDocument::new());
            }
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                insert_path(inner, rest, value);
            }
        }
    }
}

fn remove_path(document: &mut BsonDocument, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bson::{doc, oid::ObjectId};
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::schema::{FieldKind, FieldSchema, Schema};

    static MOVIE: Schema = Schema::new("Movie", &[
        FieldSchema::new("name", FieldKind::String),
        FieldSchema::new("year", FieldKind::Integer),
        FieldSchema::new("producer", FieldKind::Any).nullable(),
    ]);

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Movie {
        #[serde(rename = "_id")]
        id: ObjectId,
        name: String,
        year: i32,
    }

    impl Document for Movie {
        fn collection_name() -> &'static str {
            "movies"
        }

        fn schema() -> Schema {
            MOVIE
        }
    }

    fn aliases() -> Vec<String> {
        vec!["id".to_string(), "pk".to_string()]
    }

    fn record() -> BsonDocument {
        doc! {
            "_id": ObjectId::new(),
            "name": "Downfall",
            "year": 2004,
            "producer": { "name": "Bernd", "country": "DE" },
        }
    }

    #[test]
    fn only_loads_listed_fields_and_the_primary_key() {
        let only = vec!["name".to_string()];
        let aliases = aliases();
        let proxy = ProxyDocument::<Movie>::from_row(record(), FieldSelection {
            only: &only,
            defer: &[],
            id_field: "_id",
            id_aliases: &aliases,
        });

        assert_eq!(proxy.get::<String>("name").unwrap(), "Downfall");
        assert!(proxy.get::<ObjectId>("id").is_ok());
        assert!(proxy.get::<ObjectId>("pk").is_ok());
        assert!(proxy.id().is_some());

        let err = proxy.get::<i32>("year").unwrap_err();
        assert!(matches!(err, OdmError::FieldNotLoaded { ref field } if field == "year"));
        assert!(proxy.clone().try_into_document().is_err());
    }

    #[test]
    fn defer_hides_listed_fields() {
        let defer = vec!["year".to_string(), "producer.country".to_string()];
        let aliases = aliases();
        let proxy = ProxyDocument::<Movie>::from_row(record(), FieldSelection {
            only: &[],
            defer: &defer,
            id_field: "_id",
            id_aliases: &aliases,
        });

        assert_eq!(proxy.get::<String>("name").unwrap(), "Downfall");
        assert_eq!(proxy.get::<String>("producer.name").unwrap(), "Bernd");
        assert!(proxy.get::<String>("producer.country").is_err());
        assert!(proxy.get::<i32>("year").is_err());
        assert!(!proxy.values().contains_key("year"));
    }

    #[test]
    fn nested_only_fields_keep_their_shape() {
        let only = vec!["producer.name".to_string()];
        let proxy = ProxyDocument::<Movie>::from_row(record(), FieldSelection {
            only: &only,
            defer: &[],
            id_field: "_id",
            id_aliases: &[],
        });

        assert_eq!(proxy.values().get_document("producer").unwrap(), &doc! { "name": "Bernd" });
        assert!(proxy.get::<String>("producer.country").is_err());
    }

    #[test]
    fn full_rows_are_validated() {
        let selection = FieldSelection {
            only: &[],
            defer: &[],
            id_field: "_id",
            id_aliases: &[],
        };

        let movie = <Full as Projection<Movie>>::materialize(record(), selection).unwrap();
        assert_eq!(movie.year, 2004);

        let values = <Full as Projection<Movie>>::to_values(&movie).unwrap();
        assert_eq!(values.get_str("name").unwrap(), "Downfall");

        assert!(<Full as Projection<Movie>>::materialize(doc! { "name": "x" }, selection).is_err());
    }
}
