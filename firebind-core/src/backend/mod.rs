//! Datastore backend interface
//!
//! Documents and collections never talk to a datastore directly. Everything
//! they need (reference resolution, one-shot reads, realtime listeners and
//! writes) goes through a [`Backend`] held by their
//! [`Context`](crate::context::Context).

pub mod memory;

use crate::cell::Subscription;
use crate::error::{BackendResult, Result};
use crate::query::QueryTarget;
use crate::reference::{CollectionRef, DocumentRef};
use crate::snapshot::{DocumentSnapshot, QuerySnapshot};
use async_trait::async_trait;
use serde_json::{Map, Value};

pub use memory::{delete_field, MemoryBackend};

/// Callback receiving document snapshots or listener errors
pub type DocumentListener = Box<dyn Fn(BackendResult<DocumentSnapshot>) + Send + Sync>;

/// Callback receiving query snapshots or listener errors
pub type QueryListener = Box<dyn Fn(BackendResult<QuerySnapshot>) + Send + Sync>;

/// Options for [`Backend::set_document`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Merge into the existing document instead of replacing it
    pub merge: bool,
}

impl SetOptions {
    /// Merging set
    pub fn merge() -> Self {
        Self { merge: true }
    }
}

/// Capabilities a datastore must provide
///
/// Listeners may be invoked synchronously from within `listen_*` (for the
/// initial snapshot) or later from any thread. Dropping the returned
/// [`Subscription`] must stop delivery.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Resolve a collection path
    fn collection_ref(&self, path: &str) -> Result<CollectionRef> {
        CollectionRef::parse(path)
    }

    /// Resolve a document path
    fn document_ref(&self, path: &str) -> Result<DocumentRef> {
        DocumentRef::parse(path)
    }

    /// One-shot read of a collection or query
    async fn list_documents(&self, target: &QueryTarget) -> BackendResult<QuerySnapshot>;

    /// One-shot read of a document; missing documents are not an error
    async fn get_document(&self, reference: &DocumentRef) -> BackendResult<DocumentSnapshot>;

    /// Realtime listener on a collection or query
    fn listen_query(&self, target: &QueryTarget, listener: QueryListener) -> Subscription;

    /// Realtime listener on a document
    fn listen_document(&self, reference: &DocumentRef, listener: DocumentListener) -> Subscription;

    /// Create a document with a generated id
    async fn add_document(
        &self,
        collection: &CollectionRef,
        data: Map<String, Value>,
    ) -> BackendResult<DocumentRef>;

    /// Create or overwrite a document
    async fn set_document(
        &self,
        reference: &DocumentRef,
        data: Map<String, Value>,
        options: SetOptions,
    ) -> BackendResult<()>;

    /// Update fields of an existing document; keys may be dotted paths
    async fn update_document(
        &self,
        reference: &DocumentRef,
        fields: Map<String, Value>,
    ) -> BackendResult<()>;

    /// Delete a document
    async fn delete_document(&self, reference: &DocumentRef) -> BackendResult<()>;

    /// Whether `value` is the marker for "delete this field"
    fn is_delete_sentinel(&self, value: &Value) -> bool;
}
