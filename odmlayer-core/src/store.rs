//! Main document store interface.
//!
//! A [`DocumentStore`] owns a backend together with the settings that lookups are parsed
//! with, and hands out [`Manager`]s bound to individual document types.
//!
//! # Example
//!
//! ```ignore
//! use odmlayer::store::DocumentStore;
//!
//! let store = DocumentStore::new(backend);
//! let movies = store.objects::<Movie>();
//! let count = movies.filter(doc! { "year__gte": 2000 })?.count().await?;
//! ```

use std::sync::Arc;

use crate::{
    backend::StoreBackend,
    document::Document,
    error::OdmResult,
    manager::Manager,
    settings::OdmSettings,
};

/// A document store bound to a specific backend implementation.
#[derive(Debug)]
pub struct DocumentStore<B: StoreBackend> {
    backend: B,
    settings: Arc<OdmSettings>,
}

impl<B: StoreBackend> DocumentStore<B> {
    /// Creates a new document store with the default settings.
    pub fn new(backend: B) -> Self {
        Self::with_settings(backend, OdmSettings::default())
    }

    /// Creates a new document store with custom settings.
    pub fn with_settings(backend: B, settings: OdmSettings) -> Self {
        Self {
            backend,
            settings: Arc::new(settings),
        }
    }

    /// Returns a fresh manager for the document type `D`.
    ///
    /// The collection is determined by `D::collection_name()`.
    pub fn objects<D: Document>(&self) -> Manager<'_, B, D> {
        Manager::with_settings(&self.backend, self.settings.clone())
    }

    /// Gets a reference to the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The settings shared by every manager of this store.
    pub fn settings(&self) -> &OdmSettings {
        &self.settings
    }

    /// Shuts down the document store and its backend.
    pub async fn shutdown(self) -> OdmResult<()> {
        self.backend.shutdown().await
    }
}
