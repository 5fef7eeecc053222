//! Core traits for mapped documents and their conversion to and from stored records.
//!
//! A mapped document is a serde type that names its collection and describes its fields
//! through a static [`Schema`]. The schema is what the query layer consults to resolve
//! lookups, dispatch type-aware operators and validate values before they reach a store.

use bson::{Bson, Document as BsonDocument, de::deserialize_from_bson, ser::serialize_to_bson};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    error::{OdmError, OdmResult},
    schema::Schema,
};

/// Core trait that all mapped documents must implement.
///
/// # Example
///
/// ```ignore
/// use odmlayer::{Document, schema::{FieldKind, FieldSchema, Schema}};
/// use bson::oid::ObjectId;
/// use serde::{Serialize, Deserialize};
///
/// static MOVIE: Schema = Schema::new("Movie", &[
///     FieldSchema::new("name", FieldKind::String),
///     FieldSchema::new("year", FieldKind::Integer),
/// ]);
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct Movie {
///     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
///     pub id: Option<ObjectId>,
///     pub name: String,
///     pub year: i32,
/// }
///
/// impl Document for Movie {
///     fn collection_name() -> &'static str {
///         "movies"
///     }
///
///     fn schema() -> Schema {
///         MOVIE
///     }
/// }
/// ```
pub trait Document: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Returns the name of the collection this document belongs to.
    fn collection_name() -> &'static str;

    /// Returns the field schema of this document.
    ///
    /// The primary-key field does not need to be declared.
    fn schema() -> Schema;

    /// Returns the name under which the primary key is stored.
    fn id_field() -> &'static str {
        "_id"
    }
}

/// Conversion helpers, implemented for every [`Document`].
pub trait DocumentExt: Document {
    /// Serializes this document into a stored record.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::Serialization`] if the document does not serialize to a BSON document.
    fn to_document(&self) -> OdmResult<BsonDocument>;

    /// Deserializes a stored record.
    fn from_document(document: BsonDocument) -> OdmResult<Self>;
}

impl<D: Document> DocumentExt for D {
    fn to_document(&self) -> OdmResult<BsonDocument> {
        match serialize_to_bson(self)? {
            Bson::Document(document) => Ok(document),
            other => Err(OdmError::Serialization(format!(
                "{} serialized to {:?} instead of a document",
                D::schema().name(),
                other.element_type()
            ))),
        }
    }

    fn from_document(document: BsonDocument) -> OdmResult<Self> {
        Ok(deserialize_from_bson(Bson::Document(document))?)
    }
}
