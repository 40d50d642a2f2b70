//! Capabilities a collection needs from the entities it owns

use crate::config::DocumentOptions;
use crate::context::Context;
use crate::error::Result;
use crate::snapshot::DocumentSnapshot;
use std::sync::Arc;

/// An entity a [`Collection`](crate::collection::Collection) can own
///
/// Handles are cheap clones of one shared entity; `ptr_eq` compares
/// identity, not content.
pub trait CollectionEntity: Clone + Send + Sync + 'static {
    /// Document id
    fn id(&self) -> String;

    /// A collection took ownership; returns the new owner count
    fn add_collection_ref(&self) -> usize;

    /// A collection gave up ownership; returns the new owner count
    fn release_collection_ref(&self) -> usize;

    /// Apply a snapshot delivered through the owning collection; returns
    /// whether the entity's data changed
    fn update_from_snapshot(&self, snapshot: &DocumentSnapshot) -> bool;

    /// Whether both handles refer to the same entity
    fn ptr_eq(&self, other: &Self) -> bool;
}

/// Builds an entity for a snapshot that has no entity yet
pub type DocumentFactory<D> =
    Arc<dyn Fn(&DocumentSnapshot, &Context, &DocumentOptions) -> Result<D> + Send + Sync>;
