use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::{StreamExt, TryStreamExt};
use mongodb::{
    Client, Collection as MongoCollection,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, FindOptions as MongoFindOptions, ReturnDocument},
};
use tracing::debug;

use odmlayer_core::{
    backend::{DocumentCursor, FindOptions, StoreBackend, StoreBackendBuilder},
    error::{OdmError, OdmResult},
};

const DUPLICATE_KEY: i32 = 11000;

fn backend_error(error: MongoError) -> OdmError {
    OdmError::Backend(error.to_string())
}

/// Adds a `$where` predicate, keeping one the filter may already carry.
fn layer_where(mut filter: Document, condition: Bson) -> Document {
    if filter.contains_key("$where") {
        return doc! { "$and": [filter, { "$where": condition }] };
    }

    filter.insert("$where", condition);
    filter
}

fn is_duplicate_key(error: &MongoError) -> bool {
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(failure)) => failure.code == DUPLICATE_KEY,
        ErrorKind::InsertMany(failure) => failure
            .write_errors
            .as_ref()
            .is_some_and(|errors| errors.iter().any(|e| e.code == DUPLICATE_KEY)),
        _ => false,
    }
}

#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }

    fn insert_error(&self, error: MongoError, collection: &str, id: Option<&Bson>) -> OdmError {
        if is_duplicate_key(&error) {
            let id = id.map(ToString::to_string).unwrap_or_default();
            OdmError::DocumentAlreadyExists(id, collection.to_string())
        } else {
            backend_error(error)
        }
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> OdmResult<DocumentCursor> {
        let filter = match options.where_clause {
            Some(condition) => layer_where(filter, condition),
            None => filter,
        };

        let mut find_options = MongoFindOptions::default();
        if !options.sort.is_empty() {
            find_options.sort = Some(
                options
                    .sort
                    .iter()
                    .map(|(key, direction)| (key.clone(), Bson::Int32(direction.as_i32())))
                    .collect(),
            );
        }
        if options.skip > 0 {
            find_options.skip = Some(options.skip);
        }
        if options.limit > 0 {
            find_options.limit = Some(options.limit);
        }

        debug!(collection, filter = %filter, "mongodb find");

        Ok(self
            .get_collection(collection)
            .find(filter)
            .with_options(find_options)
            .await
            .map_err(backend_error)?
            .map_err(backend_error)
            .boxed())
    }

    async fn count_documents(&self, collection: &str, filter: Document) -> OdmResult<u64> {
        self.get_collection(collection)
            .count_documents(filter)
            .await
            .map_err(backend_error)
    }

    async fn insert_one(&self, collection: &str, document: Document) -> OdmResult<Bson> {
        let id = document.get("_id").cloned();

        Ok(self
            .get_collection(collection)
            .insert_one(document)
            .await
            .map_err(|e| self.insert_error(e, collection, id.as_ref()))?
            .inserted_id)
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> OdmResult<Vec<Bson>> {
        let count = documents.len();

        let result = self
            .get_collection(collection)
            .insert_many(documents)
            .await
            .map_err(|e| self.insert_error(e, collection, None))?;

        (0..count)
            .map(|index| {
                result
                    .inserted_ids
                    .get(&index)
                    .cloned()
                    .ok_or_else(|| OdmError::Backend(format!("no id returned for inserted document {index}")))
            })
            .collect()
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> OdmResult<u64> {
        Ok(self
            .get_collection(collection)
            .delete_many(filter)
            .await
            .map_err(backend_error)?
            .deleted_count)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> OdmResult<u64> {
        Ok(self
            .get_collection(collection)
            .update_many(filter, update)
            .await
            .map_err(backend_error)?
            .matched_count)
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> OdmResult<Option<Document>> {
        self.get_collection(collection)
            .find_one_and_update(filter, update)
            .upsert(upsert)
            .return_document(ReturnDocument::After)
            .await
            .map_err(backend_error)
    }

    async fn distinct(&self, collection: &str, key: &str, filter: Document) -> OdmResult<Vec<Bson>> {
        self.get_collection(collection)
            .distinct(key, filter)
            .await
            .map_err(backend_error)
    }

    async fn shutdown(self) -> OdmResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> OdmResult<Self::Backend> {
        Ok(MongoDbStore::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(|e| OdmError::Initialization(e.to_string()))?,
            )
            .map_err(|e| OdmError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn where_clause_is_added_to_the_filter() {
        let filter = layer_where(doc! { "year": { "$gt": 2000 } }, Bson::from("this.year > 2002"));
        assert_eq!(filter, doc! { "year": { "$gt": 2000 }, "$where": "this.year > 2002" });
    }

    #[test]
    fn existing_where_is_kept_alongside_the_new_one() {
        let filter = layer_where(
            doc! { "$where": "this.tags.length > 1", "year": 2004 },
            Bson::from("this.year > 2002"),
        );

        assert_eq!(
            filter,
            doc! {
                "$and": [
                    { "$where": "this.tags.length > 1", "year": 2004 },
                    { "$where": "this.year > 2002" },
                ],
            }
        );
    }
}
