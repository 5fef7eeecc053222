//! Convenient re-exports of commonly used types from odmlayer.
//!
//! ```ignore
//! use odmlayer::prelude::*;
//! ```
//!
//! This provides access to:
//! - Document traits and schemas
//! - Store backends and builders
//! - Managers, expressions and the operator catalog
//! - Error types

pub use odmlayer_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    document::{Document, DocumentExt},
    error::{OdmError, OdmResult},
    expression::{Expression, IntoFieldPath, LogicalOp, Operator, SortDirection, SortExpression},
    manager::{Manager, RawQuery, ValuesList, ValuesOptions},
    operators::{Pattern, Q},
    page::{Page, PaginationParams},
    row::{Full, Partial, ProxyDocument},
    schema::{FieldKind, FieldRef, FieldSchema, Schema},
    settings::{LookupOperator, OdmSettings},
    store::DocumentStore,
};
