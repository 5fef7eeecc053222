//! Error types and result types for object-document mapping operations.
//!
//! Every error raised locally by this crate names the offending field, operator or value.
//! Errors coming from a store backend are never retried or swallowed; they surface as
//! [`OdmError::Backend`] (or [`OdmError::DocumentAlreadyExists`] when the backend can tell).
//! Use [`OdmResult<T>`] as the return type for fallible operations.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors raised while building or executing document queries.
#[derive(Error, Debug)]
pub enum OdmError {
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// A lookup expected exactly one document and found none.
    #[error("No document matching the query was found in collection {0}")]
    DocumentNotFound(String),
    /// A lookup expected exactly one document and found more.
    #[error("Multiple documents matching the query were returned from collection {0}")]
    MultipleDocumentsReturned(String),
    /// A lookup used an operator that is not part of the configured allow-list.
    #[error("`{operator}` is not a valid lookup operator. Valid operators: {valid}")]
    InvalidOperator {
        /// The operator name as written in the lookup.
        operator: String,
        /// Comma separated list of the accepted operators.
        valid: String,
    },
    /// A lookup or operator received a value of the wrong shape.
    #[error("Invalid value for `{lookup}`: {reason}")]
    InvalidLookupValue {
        /// The lookup (or operator) the value was given to.
        lookup: String,
        /// What was wrong with the value.
        reason: String,
    },
    /// A field path does not exist on the document schema.
    #[error("Invalid field `{field}` for document {document}")]
    InvalidField {
        /// The offending field path.
        field: String,
        /// The document (or embedded document) the path was resolved against.
        document: String,
    },
    /// A query was defined in a way that can never be valid (for example `only` with `defer`).
    #[error("Field definition error: {0}")]
    FieldDefinition(String),
    /// A field was accessed on a projected document that did not load it.
    #[error("Field `{field}` was not loaded for this document; it was excluded by only()/defer()")]
    FieldNotLoaded {
        /// The field that was accessed.
        field: String,
    },
    /// A value failed schema validation before any store call was issued.
    #[error("Validation error on `{field}`: {message}")]
    Validation {
        /// The dotted path of the field that failed.
        field: String,
        /// Human readable reason.
        message: String,
    },
    /// A raw or combinator query is malformed.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for object-document mapping operations.
pub type OdmResult<T> = Result<T, OdmError>;

impl OdmError {
    /// Shorthand for building an [`OdmError::Validation`].
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        OdmError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Shorthand for building an [`OdmError::InvalidLookupValue`].
    pub fn invalid_value(lookup: impl Into<String>, reason: impl Into<String>) -> Self {
        OdmError::InvalidLookupValue {
            lookup: lookup.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for the not-found error raised by `get`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, OdmError::DocumentNotFound(_))
    }

    /// Returns `true` for the multiplicity error raised by `get` and `get_or_none`.
    pub fn is_multiple_returned(&self) -> bool {
        matches!(self, OdmError::MultipleDocumentsReturned(_))
    }
}

impl From<BsonError> for OdmError {
    fn from(err: BsonError) -> Self {
        OdmError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for OdmError {
    fn from(err: SerdeJsonError) -> Self {
        OdmError::Serialization(err.to_string())
    }
}
