//! # firebind-core
//!
//! Observation-driven live documents and collections over a remote document
//! store.
//!
//! This crate provides:
//!
//! - **Reactive cells**: observable values whose first and last observers
//!   drive listener activation
//! - **Documents**: live mirrors of single remote documents with schema
//!   validation and writes
//! - **Collections**: live query results reconciled into stable document
//!   identities, with an optional debounce of the initial cached snapshot
//! - **Aggregate collections**: several keyed queries merged into one list,
//!   recycling partitions and documents across query-set changes
//! - **Backends**: the datastore interface and an in-memory implementation
//!
//! ## Lifecycle
//!
//! In [`Mode::Auto`] nothing talks to the backend until something observes
//! an entity (through `observe()` or `subscribe()`). The first observer
//! opens a realtime listener, the last one closes it. Documents owned by a
//! collection never listen on their own; the collection feeds them.

pub mod activation;
pub mod aggregate;
pub mod backend;
pub mod cell;
pub mod collection;
pub mod config;
pub mod context;
pub mod debounce;
pub mod document;
pub mod entity;
pub mod error;
pub mod merge;
pub mod observe;
pub mod query;
pub mod ready;
pub mod reconcile;
pub mod reference;
pub mod schema;
pub mod snapshot;

pub use activation::{Activation, Mode, Transition};
pub use aggregate::{AggregateCollection, AggregateState, QueryDescriptor, QuerySet};
pub use backend::{delete_field, Backend, MemoryBackend, SetOptions};
pub use cell::{CellWatch, ReactiveCell, Subscription};
pub use collection::{Collection, CollectionState};
pub use config::{CollectionOptions, DebounceConfig, DocumentOptions, FirebindConfig};
pub use context::Context;
pub use document::{Document, DocumentState};
pub use entity::{CollectionEntity, DocumentFactory};
pub use error::{BackendError, Error, Result};
pub use observe::{ObservationDelegate, ObservationRefCounter};
pub use query::{Direction, FilterOp, Query, QuerySpec, QueryTarget};
pub use ready::ReadyGate;
pub use reference::{CollectionRef, DocumentRef, Source};
pub use schema::{FieldKind, FieldSchema, Schema, SchemaViolation};
pub use snapshot::{DocumentSnapshot, QuerySnapshot, SnapshotMetadata};
