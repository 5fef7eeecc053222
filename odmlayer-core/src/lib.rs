//! A document mapper with a chainable, Django-style query interface over document stores.
//!
//! This crate is the core of the odmlayer project and provides:
//!
//! - **Document traits** ([`document`]) - Mapped document types and their conversion to stored records
//! - **Field schemas** ([`schema`]) - Static field descriptions used for lookups and validation
//! - **Expressions** ([`expression`]) - Filter and sort clauses and their compilation to native filters
//! - **Operator catalog** ([`operators`]) - The `Q` constructors for every supported operator
//! - **Lookups** ([`lookup`]) - Parsing of `field__operator` keyword lookups
//! - **Settings** ([`settings`]) - The lookup operator table and primary-key aliases
//! - **Managers** ([`manager`]) - The cloning query builder and its terminal operations
//! - **Rows** ([`row`]) - Materialization of stored records, including `only`/`defer` proxies
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing storage drivers
//! - **Document store** ([`store`]) - Owns a backend and hands out managers
//! - **Pagination** ([`page`]) - Page windows over query results
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use odmlayer::{Document, DocumentStore, schema::{FieldKind, FieldSchema, Schema}};
//! use bson::{doc, oid::ObjectId};
//! use serde::{Serialize, Deserialize};
//!
//! static MOVIE: Schema = Schema::new("Movie", &[
//!     FieldSchema::new("name", FieldKind::String),
//!     FieldSchema::new("year", FieldKind::Integer),
//! ]);
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Movie {
//!     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
//!     pub id: Option<ObjectId>,
//!     pub name: String,
//!     pub year: i32,
//! }
//!
//! impl Document for Movie {
//!     fn collection_name() -> &'static str {
//!         "movies"
//!     }
//!
//!     fn schema() -> Schema {
//!         MOVIE
//!     }
//! }
//!
//! let store = DocumentStore::new(backend);
//! let recent = store
//!     .objects::<Movie>()
//!     .filter(doc! { "year__gt": 2000, "name__icontains": "fall" })?
//!     .all()
//!     .await?;
//! ```

pub mod backend;
pub mod document;
pub mod error;
pub mod expression;
pub mod lookup;
pub mod manager;
pub mod operators;
pub mod page;
pub mod row;
pub mod schema;
pub mod settings;
pub mod store;
