//! In-memory document storage backend for odmlayer.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It interprets the native filter documents produced by the query layer and is ideal for
//! development and testing.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Native filters** - `$and`/`$or`/`$nor`, comparisons, `$in`, `$regex`, `$exists`, `$all`, `$size`
//! - **Cursor modifiers** - Multi-key sorting, skip and limit
//! - **Upserts** - `find_one_and_update` with `$set`/`$setOnInsert`
//!
//! # Quick Start
//!
//! ```ignore
//! use odmlayer::{DocumentStore, memory::InMemoryStore};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = InMemoryStore::builder().build().await?;
//!     let store = DocumentStore::new(backend);
//!     let movies = store.objects::<Movie>();
//!
//!     movies.create(&Movie::new("Downfall", 2004)).await?;
//!     let found = movies.get_by(doc! { "name": "Downfall" }).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod evaluator;
pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
