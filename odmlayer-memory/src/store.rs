//! In-memory storage implementation for document stores.
//!
//! Records are kept per collection in insertion order behind an async-aware read-write
//! lock. Filters are evaluated with [`DocumentEvaluator`].

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use futures::{StreamExt, stream};
use mea::rwlock::RwLock;
use tracing::trace;

use odmlayer_core::{
    backend::{DocumentCursor, FindOptions, StoreBackend, StoreBackendBuilder},
    error::{OdmError, OdmResult},
};

use crate::evaluator::{DocumentEvaluator, compare_records, resolve_path};

type StoreMap = HashMap<String, Vec<Document>>;

/// Thread-safe in-memory document storage backend.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data.
///
/// # Performance
///
/// Queries scan all records of a collection (no indexing).
///
/// # Limitations
///
/// `$where` predicates cannot be evaluated and are reported as backend errors.
///
/// # Example
///
/// ```ignore
/// use odmlayer_memory::InMemoryStore;
/// use odmlayer::backend::{FindOptions, StoreBackend};
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// store.insert_one("movies", doc! { "name": "Downfall", "year": 2004 }).await?;
///
/// let count = store.count_documents("movies", doc! { "year": { "$gt": 2000 } }).await?;
/// assert_eq!(count, 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// collection name -> records in insertion order
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    ///
    /// ```ignore
    /// let store = InMemoryStore::builder().build().await?;
    /// ```
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }
}

fn matching_indices(records: &[Document], filter: &Document) -> OdmResult<Vec<usize>> {
    let mut indices = Vec::new();

    for (index, record) in records.iter().enumerate() {
        if DocumentEvaluator::new(record).evaluate(filter)? {
            indices.push(index);
        }
    }

    Ok(indices)
}

/// Puts `_id` first, assigning a new object id when the record has none.
fn with_primary_key(document: Document) -> (Bson, Document) {
    let id = match document.get("_id") {
        Some(Bson::Null) | None => Bson::ObjectId(ObjectId::new()),
        Some(id) => id.clone(),
    };

    let mut record = Document::new();
    record.insert("_id", id.clone());
    for (key, value) in document {
        if key != "_id" {
            record.insert(key, value);
        }
    }

    (id, record)
}

fn duplicate(id: &Bson, collection: &str) -> OdmError {
    OdmError::DocumentAlreadyExists(id.to_string(), collection.to_string())
}

fn contains_id(records: &[Document], id: &Bson) -> bool {
    records
        .iter()
        .any(|record| record.get("_id") == Some(id))
}

fn set_path(document: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, Document::new());
            }
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                set_path(inner, rest, value);
            }
        }
    }
}

fn unset_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                unset_path(inner, rest);
            }
        }
    }
}

/// Applies an update document. `$setOnInsert` only takes effect when `inserting`.
fn apply_update(record: &mut Document, update: &Document, inserting: bool) -> OdmResult<()> {
    for (operator, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(OdmError::InvalidQuery(format!("`{operator}` expects a document")));
        };

        match operator.as_str() {
            "$set" => {
                for (path, value) in fields {
                    set_path(record, path, value.clone());
                }
            }
            "$setOnInsert" => {
                if inserting {
                    for (path, value) in fields {
                        set_path(record, path, value.clone());
                    }
                }
            }
            "$unset" => {
                for path in fields.keys() {
                    unset_path(record, path);
                }
            }
            other => {
                return Err(OdmError::InvalidQuery(format!("unsupported update operator `{other}`")));
            }
        }
    }

    Ok(())
}

/// The record an upsert starts from: the plain equalities of the filter.
fn upsert_seed(filter: &Document) -> Document {
    let mut seed = Document::new();

    for (key, condition) in filter {
        if key.starts_with('$') {
            continue;
        }

        match condition {
            Bson::Document(operators) if operators.keys().any(|op| op.starts_with('$')) => {
                if let Some(value) = operators.get("$eq") {
                    set_path(&mut seed, key, value.clone());
                }
            }
            value => set_path(&mut seed, key, value.clone()),
        }
    }

    seed
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> OdmResult<DocumentCursor> {
        if options.where_clause.is_some() {
            return Err(OdmError::Backend(
                "$where predicates are not supported by the in-memory store".to_string(),
            ));
        }

        let store = self.store.read().await;
        let records = match store.get(collection) {
            Some(records) => DocumentEvaluator::filter_documents(records, &filter)?,
            None => Vec::new(),
        };
        drop(store);

        let mut records = records;
        if !options.sort.is_empty() {
            records.sort_by(|a, b| compare_records(a, b, &options.sort));
        }

        let limit = if options.limit > 0 {
            usize::try_from(options.limit).unwrap_or(usize::MAX)
        } else {
            usize::MAX
        };

        let records: Vec<OdmResult<Document>> = records
            .into_iter()
            .skip(usize::try_from(options.skip).unwrap_or(usize::MAX))
            .take(limit)
            .map(Ok)
            .collect();

        trace!(collection, rows = records.len(), "in-memory find");
        Ok(stream::iter(records).boxed())
    }

    async fn count_documents(&self, collection: &str, filter: Document) -> OdmResult<u64> {
        let store = self.store.read().await;

        match store.get(collection) {
            Some(records) => Ok(matching_indices(records, &filter)?.len() as u64),
            None => Ok(0),
        }
    }

    async fn insert_one(&self, collection: &str, document: Document) -> OdmResult<Bson> {
        let (id, record) = with_primary_key(document);

        let mut store = self.store.write().await;
        let records = store
            .entry(collection.to_string())
            .or_default();

        if contains_id(records, &id) {
            return Err(duplicate(&id, collection));
        }

        records.push(record);
        Ok(id)
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> OdmResult<Vec<Bson>> {
        let prepared: Vec<(Bson, Document)> = documents
            .into_iter()
            .map(with_primary_key)
            .collect();

        let mut store = self.store.write().await;
        let records = store
            .entry(collection.to_string())
            .or_default();

        for (index, (id, _)) in prepared.iter().enumerate() {
            if contains_id(records, id) || prepared[..index].iter().any(|(other, _)| other == id) {
                return Err(duplicate(id, collection));
            }
        }

        let mut ids = Vec::with_capacity(prepared.len());
        for (id, record) in prepared {
            records.push(record);
            ids.push(id);
        }

        Ok(ids)
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> OdmResult<u64> {
        let mut store = self.store.write().await;
        let Some(records) = store.get_mut(collection) else {
            return Ok(0);
        };

        let doomed = matching_indices(records, &filter)?;
        let mut index = 0;
        records.retain(|_| {
            let keep = doomed.binary_search(&index).is_err();
            index += 1;
            keep
        });

        Ok(doomed.len() as u64)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> OdmResult<u64> {
        let mut store = self.store.write().await;
        let Some(records) = store.get_mut(collection) else {
            return Ok(0);
        };

        let matched = matching_indices(records, &filter)?;
        for index in &matched {
            let mut record = records[*index].clone();
            apply_update(&mut record, &update, false)?;
            records[*index] = record;
        }

        Ok(matched.len() as u64)
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> OdmResult<Option<Document>> {
        let mut store = self.store.write().await;
        let records = store
            .entry(collection.to_string())
            .or_default();

        if let Some(index) = matching_indices(records, &filter)?.first().copied() {
            let mut record = records[index].clone();
            apply_update(&mut record, &update, false)?;
            records[index] = record.clone();
            return Ok(Some(record));
        }

        if !upsert {
            return Ok(None);
        }

        let mut seed = upsert_seed(&filter);
        apply_update(&mut seed, &update, true)?;
        let (id, record) = with_primary_key(seed);

        if contains_id(records, &id) {
            return Err(duplicate(&id, collection));
        }

        trace!(collection, id = %id, "in-memory upsert inserted a record");
        records.push(record.clone());
        Ok(Some(record))
    }

    async fn distinct(&self, collection: &str, key: &str, filter: Document) -> OdmResult<Vec<Bson>> {
        let store = self.store.read().await;
        let Some(records) = store.get(collection) else {
            return Ok(Vec::new());
        };

        let mut values: Vec<Bson> = Vec::new();
        for index in matching_indices(records, &filter)? {
            for value in resolve_path(&records[index], key) {
                let flattened = match value {
                    Bson::Array(items) => items.clone(),
                    single => vec![single.clone()],
                };
                for value in flattened {
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
            }
        }

        Ok(values)
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// ```ignore
/// use odmlayer_memory::InMemoryStore;
/// use odmlayer::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().build().await?;
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds and returns a new [`InMemoryStore`] instance.
    ///
    /// This always succeeds and returns a freshly initialized store.
    async fn build(self) -> OdmResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use futures::TryStreamExt;
    use odmlayer_core::expression::SortDirection;

    use super::*;

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::builder().build().await.unwrap();
        store
            .insert_many("movies", vec![
                doc! { "name": "Downfall", "year": 2004 },
                doc! { "name": "The Two Towers", "year": 2002 },
                doc! { "name": "Casablanca", "year": 1942 },
            ])
            .await
            .unwrap();
        store
    }

    async fn names(store: &InMemoryStore, filter: Document, options: FindOptions) -> Vec<String> {
        store
            .find("movies", filter, options)
            .await
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.get_str("name").unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn find_applies_sort_skip_limit() {
        let store = seeded().await;
        let options = FindOptions::default()
            .with_sort(vec![("year".to_string(), SortDirection::Desc)])
            .with_skip(1)
            .with_limit(1);

        assert_eq!(names(&store, doc! {}, options).await, vec!["The Two Towers"]);
        assert_eq!(
            names(&store, doc! { "year": { "$lt": 2003 } }, FindOptions::default()).await,
            vec!["The Two Towers", "Casablanca"]
        );
    }

    #[tokio::test]
    async fn primary_keys_are_assigned_and_unique() {
        let store = InMemoryStore::new();
        let id = store.insert_one("movies", doc! { "name": "Downfall" }).await.unwrap();
        assert!(matches!(id, Bson::ObjectId(_)));

        let err = store
            .insert_one("movies", doc! { "_id": id.clone(), "name": "Again" })
            .await
            .unwrap_err();
        assert!(matches!(err, OdmError::DocumentAlreadyExists(..)));

        let err = store
            .insert_many("movies", vec![doc! { "_id": 1 }, doc! { "_id": 1 }])
            .await
            .unwrap_err();
        assert!(matches!(err, OdmError::DocumentAlreadyExists(..)));
        assert_eq!(store.count_documents("movies", doc! {}).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_and_delete_report_counts() {
        let store = seeded().await;

        let updated = store
            .update_many("movies", doc! { "year": { "$gt": 2000 } }, doc! { "$set": { "genre": "drama" } })
            .await
            .unwrap();
        assert_eq!(updated, 2);
        assert_eq!(store.count_documents("movies", doc! { "genre": "drama" }).await.unwrap(), 2);

        let deleted = store.delete_many("movies", doc! { "genre": "drama" }).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(names(&store, doc! {}, FindOptions::default()).await, vec!["Casablanca"]);
    }

    #[tokio::test]
    async fn upsert_inserts_once() {
        let store = InMemoryStore::new();
        let update = doc! { "$setOnInsert": { "name": "Downfall", "year": 2004 } };

        let first = store
            .find_one_and_update("movies", doc! { "name": "Downfall" }, update.clone(), true)
            .await
            .unwrap()
            .unwrap();
        let second = store
            .find_one_and_update("movies", doc! { "name": "Downfall" }, update, true)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.get("_id"), second.get("_id"));
        assert_eq!(second.get_i32("year").unwrap(), 2004);
        assert_eq!(store.count_documents("movies", doc! {}).await.unwrap(), 1);

        let missing = store
            .find_one_and_update("movies", doc! { "name": "Other" }, doc! { "$set": { "year": 1 } }, false)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn distinct_flattens_arrays() {
        let store = InMemoryStore::new();
        store
            .insert_many("movies", vec![
                doc! { "tags": ["war", "history"] },
                doc! { "tags": ["war", "drama"] },
            ])
            .await
            .unwrap();

        let tags = store.distinct("movies", "tags", doc! {}).await.unwrap();
        assert_eq!(tags, vec![Bson::from("war"), Bson::from("history"), Bson::from("drama")]);
    }

    #[tokio::test]
    async fn where_clauses_are_rejected() {
        let store = seeded().await;
        let options = FindOptions::default().with_where(Bson::String("this.year > 2000".to_string()));

        assert!(matches!(store.find("movies", doc! {}, options).await, Err(OdmError::Backend(_))));
    }
}
