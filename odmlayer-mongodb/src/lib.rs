//! MongoDB backend implementation for odmlayer.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait. Filters,
//! sort clauses and updates compiled by the query layer are native MongoDB documents, so
//! they are handed to the driver as they are.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! odmlayer = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Persistent storage** - Data is persisted to MongoDB Atlas or self-hosted MongoDB
//! - **Native queries** - Filters, `$where` predicates and upserts run on MongoDB's query engine
//! - **Async/await** - Fully asynchronous API built on MongoDB's async driver
//!
//! # Example
//!
//! ```ignore
//! use odmlayer::{backend::StoreBackendBuilder, mongodb::MongoDbStore, DocumentStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MongoDbStore::builder("mongodb://localhost:27017", "cinema")
//!         .build()
//!         .await?;
//!     let store = DocumentStore::new(backend);
//!
//!     let movies = store.objects::<Movie>().filter(doc! { "year__gte": 2000 })?.all().await?;
//!
//!     store.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
