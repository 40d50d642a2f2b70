//! Snapshots delivered by the backend

use crate::reference::DocumentRef;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Metadata attached to a snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotMetadata {
    /// Served from a local cache rather than confirmed by the server
    pub from_cache: bool,
    /// Contains local writes not yet committed
    pub has_pending_writes: bool,
    /// Last server-side update time of the document
    pub update_time: Option<DateTime<Utc>>,
}

/// State of one document at a point in time
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    reference: DocumentRef,
    data: Option<Map<String, Value>>,
    metadata: SnapshotMetadata,
}

impl DocumentSnapshot {
    /// Snapshot of an existing document
    pub fn new(reference: DocumentRef, data: Map<String, Value>) -> Self {
        Self {
            reference,
            data: Some(data),
            metadata: SnapshotMetadata::default(),
        }
    }

    /// Snapshot of a document that does not exist
    pub fn missing(reference: DocumentRef) -> Self {
        Self {
            reference,
            data: None,
            metadata: SnapshotMetadata::default(),
        }
    }

    /// Replace the metadata
    pub fn with_metadata(mut self, metadata: SnapshotMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Document reference
    pub fn reference(&self) -> &DocumentRef {
        &self.reference
    }

    /// Document id
    pub fn id(&self) -> &str {
        self.reference.id()
    }

    /// Whether the document exists
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    /// Field data, `None` when the document does not exist
    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.data.as_ref()
    }

    /// Snapshot metadata
    pub fn metadata(&self) -> &SnapshotMetadata {
        &self.metadata
    }
}

/// Ordered result of a collection or query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySnapshot {
    docs: Vec<DocumentSnapshot>,
    metadata: SnapshotMetadata,
}

impl QuerySnapshot {
    /// Snapshot from documents in result order
    pub fn new(docs: Vec<DocumentSnapshot>) -> Self {
        Self {
            docs,
            metadata: SnapshotMetadata::default(),
        }
    }

    /// Replace the metadata
    pub fn with_metadata(mut self, metadata: SnapshotMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Documents in result order
    pub fn docs(&self) -> &[DocumentSnapshot] {
        &self.docs
    }

    /// Snapshot metadata
    pub fn metadata(&self) -> &SnapshotMetadata {
        &self.metadata
    }

    /// Number of documents
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Whether the result is empty
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}
