//! Main odmlayer crate providing a Django-style object-document mapper for document stores.
//!
//! This crate is the primary entry point for users of the odmlayer framework. It re-exports
//! the core types and functionality from the sub-crates and provides access to the
//! storage backends.
//!
//! # Features
//!
//! - **Typed documents** - Define your data structures with Serde and describe them with a static schema
//! - **Keyword lookups** - Filter with `field__operator` keys such as `year__gte` or `name__icontains`
//! - **Operator catalog** - Build expressions directly with [`Q`](operators::Q)
//! - **Chainable managers** - Every chain call returns a new query; the original is untouched
//! - **Partial rows** - `only`/`defer` return proxies that fail loudly on unloaded fields
//! - **Multiple backends** - In-memory and MongoDB storage behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use odmlayer::{prelude::*, memory::InMemoryStore, bson::{doc, oid::ObjectId}};
//! use serde::{Serialize, Deserialize};
//!
//! static MOVIE: Schema = Schema::new("Movie", &[
//!     FieldSchema::new("name", FieldKind::String),
//!     FieldSchema::new("year", FieldKind::Integer),
//! ]);
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Movie {
//!     #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
//!     pub id: Option<ObjectId>,
//!     pub name: String,
//!     pub year: i32,
//! }
//!
//! impl Document for Movie {
//!     fn collection_name() -> &'static str { "movies" }
//!     fn schema() -> Schema { MOVIE }
//! }
//!
//! #[tokio::main]
//! async fn main() -> OdmResult<()> {
//!     let store = DocumentStore::new(InMemoryStore::builder().build().await?);
//!     let movies = store.objects::<Movie>();
//!
//!     movies.create(&Movie { id: None, name: "Downfall".into(), year: 2004 }).await?;
//!
//!     let recent = movies
//!         .filter(doc! { "year__gte": 2000 })?
//!         .sort("name", SortDirection::Asc)
//!         .all()
//!         .await?;
//!
//!     let names = movies
//!         .only(["name"])?
//!         .values_list(ValuesOptions::new().fields(["name"]).flat(true))
//!         .await?;
//!
//!     store.shutdown().await
//! }
//! ```
//!
//! # Expressions
//!
//! Lookups and expressions can be mixed freely:
//!
//! ```ignore
//! let year = MOVIE.field("year")?;
//!
//! let classics = movies
//!     .filter_expr(Q::or_([year.lt(1960)?, Q::eq("name", "Downfall")])?)
//!     .exclude(doc! { "name__pattern": "^The" })?
//!     .count()
//!     .await?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - [`mongodb`] - Persistent MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use odmlayer_core::{
    backend, document, error, expression, lookup, manager, operators, page, row, schema, settings, store,
};

pub use odmlayer_core::{document::Document, store::DocumentStore};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use odmlayer_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use odmlayer_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
