//! Storage backend abstraction for the object-document mapper.
//!
//! The [`StoreBackend`] trait is the store driver the managers talk to. Filters, updates
//! and sort clauses reach it already compiled into native documents, so a backend only
//! has to execute them.
//!
//! # Examples
//!
//! ```ignore
//! use odmlayer::backend::{FindOptions, StoreBackend};
//! use bson::doc;
//! use futures::TryStreamExt;
//!
//! let backend = MyBackendImpl::new();
//! let cursor = backend
//!     .find("movies", doc! { "year": { "$gt": 2000 } }, FindOptions::default().with_limit(2))
//!     .await?;
//! let rows: Vec<_> = cursor.try_collect().await?;
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::stream::BoxStream;
use std::fmt::Debug;

use crate::{error::OdmResult, expression::SortDirection};

/// A lazily consumed stream of raw stored records.
///
/// A new cursor is created for every materialization call; cursors are not restartable.
pub type DocumentCursor = BoxStream<'static, OdmResult<Document>>;

/// Cursor modifiers applied by [`StoreBackend::find`], in the fixed order
/// filter, sort, skip, limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Ordered `(key, direction)` pairs.
    pub sort: Vec<(String, SortDirection)>,
    /// Number of records to skip. `0` skips nothing.
    pub skip: u64,
    /// Maximum number of records to return. `0` is unbounded.
    pub limit: i64,
    /// Store-side predicate layered on top of the filter (`$where`).
    pub where_clause: Option<Bson>,
}

impl FindOptions {
    /// Sets the sort pairs.
    pub fn with_sort(mut self, sort: Vec<(String, SortDirection)>) -> Self {
        self.sort = sort;
        self
    }

    /// Sets the number of records to skip.
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    /// Sets the maximum number of records to return.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the store-side predicate.
    pub fn with_where(mut self, condition: Bson) -> Self {
        self.where_clause = Some(condition);
        self
    }
}

/// Abstract interface for document store drivers.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks; managers share a single backend by reference.
///
/// # Error Handling
///
/// Driver errors are surfaced as [`OdmError::Backend`](crate::error::OdmError::Backend)
/// and are never retried. Duplicate primary keys should be reported as
/// [`OdmError::DocumentAlreadyExists`](crate::error::OdmError::DocumentAlreadyExists)
/// when the backend can tell them apart.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Opens a cursor over the records matching `filter`.
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> OdmResult<DocumentCursor>;

    /// Counts the records matching `filter`.
    async fn count_documents(&self, collection: &str, filter: Document) -> OdmResult<u64>;

    /// Inserts a record and returns its primary key.
    ///
    /// A record without an `_id` is assigned a new object id.
    async fn insert_one(&self, collection: &str, document: Document) -> OdmResult<Bson>;

    /// Inserts records in order and returns their primary keys.
    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> OdmResult<Vec<Bson>>;

    /// Deletes every record matching `filter` and returns the deleted count.
    async fn delete_many(&self, collection: &str, filter: Document) -> OdmResult<u64>;

    /// Applies an update document (`$set`, ...) to every record matching `filter` and
    /// returns the number of matched records.
    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> OdmResult<u64>;

    /// Atomically updates the first record matching `filter`, inserting one built from the
    /// filter equalities and the update when `upsert` is set and nothing matches.
    ///
    /// Returns the record as it is after the update.
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> OdmResult<Option<Document>>;

    /// Returns the distinct values of `key` across the records matching `filter`.
    async fn distinct(&self, collection: &str, key: &str, filter: Document) -> OdmResult<Vec<Bson>>;

    /// Shuts the backend down, releasing its connections.
    async fn shutdown(self) -> OdmResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend,
{
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> OdmResult<DocumentCursor> {
        (*self)
            .find(collection, filter, options)
            .await
    }

    async fn count_documents(&self, collection: &str, filter: Document) -> OdmResult<u64> {
        (*self)
            .count_documents(collection, filter)
            .await
    }

    async fn insert_one(&self, collection: &str, document: Document) -> OdmResult<Bson> {
        (*self)
            .insert_one(collection, document)
            .await
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> OdmResult<Vec<Bson>> {
        (*self)
            .insert_many(collection, documents)
            .await
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> OdmResult<u64> {
        (*self)
            .delete_many(collection, filter)
            .await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> OdmResult<u64> {
        (*self)
            .update_many(collection, filter, update)
            .await
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> OdmResult<Option<Document>> {
        (*self)
            .find_one_and_update(collection, filter, update, upsert)
            .await
    }

    async fn distinct(&self, collection: &str, key: &str, filter: Document) -> OdmResult<Vec<Bson>> {
        (*self)
            .distinct(collection, key, filter)
            .await
    }
}

/// Factory trait for creating backend instances.
#[async_trait]
pub trait StoreBackendBuilder {
    /// The backend this builder produces.
    type Backend: StoreBackend;

    /// Builds the backend, connecting to the store if needed.
    async fn build(self) -> OdmResult<Self::Backend>;
}
