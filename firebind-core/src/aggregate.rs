//! Aggregate collections
//!
//! An [`AggregateCollection`] merges several [`Collection`]s, one per keyed
//! query produced by a [`QuerySet`], into a single document list.
//!
//! - Sub-collections are recycled by key, so an unchanged key keeps its
//!   collection and listener across query-set changes.
//! - Documents are recycled by id, so a document that moves from one
//!   partition to another keeps its identity.
//! - While a newly added partition is still loading, `docs` keeps serving
//!   the last fully loaded result.
//!
//! The query set is only evaluated and followed while the aggregate itself
//! is observed, mirroring how documents and collections decide to listen.

use crate::cell::{CellWatch, ReactiveCell, Subscription};
use crate::collection::Collection;
use crate::config::CollectionOptions;
use crate::context::Context;
use crate::document::Document;
use crate::entity::{CollectionEntity, DocumentFactory};
use crate::error::Result;
use crate::observe::ObservationDelegate;
use crate::query::QuerySpec;
use crate::reference::{CollectionRef, Source};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// One keyed partition of an aggregate
#[derive(Debug, Clone)]
pub struct QueryDescriptor {
    /// Stable key; equal keys reuse the same sub-collection
    pub key: String,
    /// Query of the partition
    pub query: QuerySpec,
}

impl QueryDescriptor {
    pub fn new(key: impl Into<String>, query: impl Into<QuerySpec>) -> Self {
        Self {
            key: key.into(),
            query: query.into(),
        }
    }
}

type ComputeFn = Arc<dyn Fn() -> Option<Vec<QueryDescriptor>> + Send + Sync>;
type Notify = Box<dyn Fn() + Send + Sync>;
type WatchFn = Arc<dyn Fn(Notify) -> Subscription + Send + Sync>;

/// Reactive producer of query descriptors
///
/// `None` from the producer means "no queries right now" and leaves the
/// current partitions in place.
#[derive(Clone)]
pub struct QuerySet {
    compute: ComputeFn,
    watch: Option<WatchFn>,
}

impl QuerySet {
    /// A fixed list of partitions
    pub fn fixed(descriptors: Vec<QueryDescriptor>) -> Self {
        let descriptors = Arc::new(descriptors);
        Self {
            compute: Arc::new(move || Some((*descriptors).clone())),
            watch: None,
        }
    }

    /// Partitions derived from a reactive input
    pub fn from_cell<I, F>(input: ReactiveCell<I>, map: F) -> Self
    where
        I: Send + Sync + 'static,
        F: Fn(&I) -> Option<Vec<QueryDescriptor>> + Send + Sync + 'static,
    {
        let reader = input.clone();
        Self {
            compute: Arc::new(move || map(&*reader.get())),
            watch: Some(Arc::new(move |notify: Notify| {
                input.subscribe(move |_| notify())
            })),
        }
    }

    fn evaluate(&self) -> Option<Vec<QueryDescriptor>> {
        (self.compute)()
    }
}

impl fmt::Debug for QuerySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySet")
            .field("reactive", &self.watch.is_some())
            .finish()
    }
}

/// Observable state of an [`AggregateCollection`]
#[derive(Debug)]
pub struct AggregateState<D: CollectionEntity> {
    /// Current partitions in descriptor order
    pub cols: Arc<Vec<Collection<D>>>,
    /// Bumped whenever a partition or the partition list changes
    pub revision: u64,
}

impl<D: CollectionEntity> Clone for AggregateState<D> {
    fn clone(&self) -> Self {
        Self {
            cols: self.cols.clone(),
            revision: self.revision,
        }
    }
}

type FilterFn<D> = Arc<dyn Fn(&D) -> bool + Send + Sync>;
type OrderFn<D> = Arc<dyn Fn(&D, &D) -> Ordering + Send + Sync>;

struct AggregateCore<D: CollectionEntity> {
    by_key: HashMap<String, Collection<D>>,
    observed: bool,
    input_watch: Option<Subscription>,
    partition_watches: Vec<Subscription>,
    previous_complete: Option<Arc<Vec<D>>>,
    memo: Option<(u64, Arc<Vec<D>>)>,
    filter: Option<FilterFn<D>>,
    order: Option<OrderFn<D>>,
}

struct AggregateInner<D: CollectionEntity> {
    me: Weak<AggregateInner<D>>,
    ctx: Context,
    source: Source<CollectionRef>,
    options: CollectionOptions,
    factory: DocumentFactory<D>,
    queries: QuerySet,
    recycle: Arc<Mutex<HashMap<String, D>>>,
    state: ReactiveCell<AggregateState<D>>,
    core: Mutex<AggregateCore<D>>,
    recompute_lock: Mutex<()>,
}

/// Union of keyed sub-collections
pub struct AggregateCollection<D: CollectionEntity = Document> {
    inner: Arc<AggregateInner<D>>,
}

impl<D: CollectionEntity> Clone for AggregateCollection<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl AggregateCollection<Document> {
    /// Aggregate of plain documents bound to the default context
    pub fn new(
        source: impl Into<Source<CollectionRef>>,
        queries: QuerySet,
        options: CollectionOptions,
    ) -> Result<Self> {
        Self::with_context(Context::global()?, source, queries, options)
    }

    pub fn with_context(
        ctx: Context,
        source: impl Into<Source<CollectionRef>>,
        queries: QuerySet,
        options: CollectionOptions,
    ) -> Result<Self> {
        Self::with_factory(ctx, source, queries, options, Document::factory())
    }
}

impl<D: CollectionEntity> AggregateCollection<D> {
    /// Aggregate whose partitions build entities with `factory`
    ///
    /// `options` is the template for every partition; its query is replaced
    /// by each descriptor's.
    pub fn with_factory(
        ctx: Context,
        source: impl Into<Source<CollectionRef>>,
        queries: QuerySet,
        options: CollectionOptions,
        factory: DocumentFactory<D>,
    ) -> Result<Self> {
        let source = source.into();
        source.resolve(|path| ctx.backend().collection_ref(path))?;

        let inner = Arc::new_cyclic(|me: &Weak<AggregateInner<D>>| {
            let state = ReactiveCell::new(AggregateState {
                cols: Arc::new(Vec::new()),
                revision: 0,
            });
            let delegate: Weak<dyn ObservationDelegate> = me.clone();
            state.set_delegate(delegate);
            AggregateInner {
                me: me.clone(),
                ctx,
                source,
                options,
                factory,
                queries,
                recycle: Arc::new(Mutex::new(HashMap::new())),
                state,
                core: Mutex::new(AggregateCore {
                    by_key: HashMap::new(),
                    observed: false,
                    input_watch: None,
                    partition_watches: Vec::new(),
                    previous_complete: None,
                    memo: None,
                    filter: None,
                    order: None,
                }),
                recompute_lock: Mutex::new(()),
            }
        });
        Ok(Self { inner })
    }

    /// Keep only documents for which `filter` holds
    pub fn with_filter<F>(self, filter: F) -> Self
    where
        F: Fn(&D) -> bool + Send + Sync + 'static,
    {
        {
            let mut core = self.inner.core.lock();
            core.filter = Some(Arc::new(filter));
            core.memo = None;
        }
        self
    }

    /// Sort the merged documents with `order`
    pub fn with_order<F>(self, order: F) -> Self
    where
        F: Fn(&D, &D) -> Ordering + Send + Sync + 'static,
    {
        {
            let mut core = self.inner.core.lock();
            core.order = Some(Arc::new(order));
            core.memo = None;
        }
        self
    }

    /// Merged documents: partitions in order, hold-over applied, then
    /// filtered and sorted
    pub fn docs(&self) -> Arc<Vec<D>> {
        self.inner.refresh_if_unobserved();
        self.inner.docs()
    }

    pub fn has_docs(&self) -> bool {
        !self.docs().is_empty()
    }

    /// Current partitions in descriptor order
    pub fn cols(&self) -> Arc<Vec<Collection<D>>> {
        self.inner.refresh_if_unobserved();
        self.inner.state.get().cols.clone()
    }

    /// Whether any partition is still waiting for a result
    pub fn is_loading(&self) -> bool {
        self.cols().iter().any(is_pending)
    }

    /// Whether every partition has produced a result
    pub fn is_loaded(&self) -> bool {
        self.cols().iter().all(|col| col.is_loaded())
    }

    /// Observe the aggregate; partitions listen while it is observed
    pub fn observe(&self) -> CellWatch<AggregateState<D>> {
        self.inner.state.watch()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<AggregateState<D>>) + Send + Sync + 'static,
    {
        self.inner.state.subscribe(listener)
    }

    pub fn observed_ref_count(&self) -> usize {
        self.inner.state.observer_count()
    }

    /// Re-evaluate the query set now and notify observers
    ///
    /// Call this when something the filter or order reads has changed.
    pub fn refresh(&self) {
        self.inner.recompute(true);
    }

    pub fn ptr_eq(&self, other: &AggregateCollection<D>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<D: CollectionEntity> fmt::Debug for AggregateCollection<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("AggregateCollection")
            .field("keys", &core.by_key.keys().collect::<Vec<_>>())
            .field("observed", &core.observed)
            .finish()
    }
}

/// Still waiting for a result that will arrive
fn is_pending<D: CollectionEntity>(col: &Collection<D>) -> bool {
    let state = col.state();
    state.is_loading || (!state.is_loaded && col.is_active())
}

impl<D: CollectionEntity> AggregateInner<D> {
    fn refresh_if_unobserved(&self) {
        if !self.core.lock().observed {
            self.recompute(false);
        }
    }

    /// Re-evaluate the query set and rebuild the partition list
    ///
    /// With `touch`, observers are notified even if the partitions are
    /// unchanged.
    fn recompute(&self, touch: bool) {
        let _serial = self.recompute_lock.lock();
        let Some(descriptors) = self.queries.evaluate() else {
            debug!("query set produced nothing, keeping partitions");
            return;
        };

        let current = self.state.get().cols.clone();
        {
            let mut recycle = self.recycle.lock();
            recycle.clear();
            for col in current.iter() {
                for doc in col.docs().iter() {
                    recycle.insert(doc.id(), doc.clone());
                }
            }
        }

        let existing = self.core.lock().by_key.clone();
        let mut by_key = HashMap::with_capacity(descriptors.len());
        let mut cols = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if by_key.contains_key(&descriptor.key) {
                warn!(key = %descriptor.key, "duplicate query key, ignoring");
                continue;
            }
            let col = match existing.get(&descriptor.key) {
                Some(col) => col.clone(),
                None => match self.partition(descriptor.query) {
                    Ok(col) => col,
                    Err(err) => {
                        warn!(key = %descriptor.key, %err, "failed to create partition");
                        continue;
                    }
                },
            };
            by_key.insert(descriptor.key, col.clone());
            cols.push(col);
        }

        if same_partitions(&current, &cols) {
            self.core.lock().by_key = by_key;
            if touch {
                self.state.update(|state| {
                    state.revision += 1;
                    true
                });
            }
            return;
        }

        debug!(partitions = cols.len(), "partition list changed");
        let observed = self.core.lock().observed;
        let watches = if observed {
            cols.iter().map(|col| self.watch_partition(col)).collect()
        } else {
            Vec::new()
        };

        let (previous_keys, previous_watches) = {
            let mut core = self.core.lock();
            let previous_keys = std::mem::replace(&mut core.by_key, by_key);
            let previous_watches = if core.observed {
                std::mem::replace(&mut core.partition_watches, watches)
            } else {
                drop(watches);
                Vec::new()
            };
            (previous_keys, previous_watches)
        };
        drop(previous_watches);

        let cols = Arc::new(cols);
        self.state.update(|state| {
            state.cols = cols;
            state.revision += 1;
            true
        });
        drop(previous_keys);
    }

    fn partition(&self, query: QuerySpec) -> Result<Collection<D>> {
        let options = CollectionOptions {
            query,
            ..self.options.clone()
        };
        let recycle = self.recycle.clone();
        let factory = self.factory.clone();
        let recycling: DocumentFactory<D> = Arc::new(move |snapshot, ctx, options| {
            let reused = recycle.lock().get(snapshot.id()).cloned();
            match reused {
                Some(doc) => {
                    doc.update_from_snapshot(snapshot);
                    Ok(doc)
                }
                None => factory(snapshot, ctx, options),
            }
        });
        Collection::with_factory(self.ctx.clone(), self.source.clone(), options, recycling)
    }

    fn watch_partition(&self, col: &Collection<D>) -> Subscription {
        let me = self.me.clone();
        col.subscribe(move |_| {
            if let Some(inner) = me.upgrade() {
                inner.partition_changed();
            }
        })
    }

    fn partition_changed(&self) {
        self.capture_complete();
        self.state.update(|state| {
            state.revision += 1;
            true
        });
    }

    /// Remember the concatenation if every partition has loaded
    fn capture_complete(&self) {
        let cols = self.state.get().cols.clone();
        if cols.iter().any(is_pending) {
            return;
        }
        let all: Vec<D> = cols.iter().flat_map(|col| col.docs().to_vec()).collect();
        self.core.lock().previous_complete = Some(Arc::new(all));
    }

    fn docs(&self) -> Arc<Vec<D>> {
        let state = self.state.get();
        let (observed, memo, filter, order) = {
            let core = self.core.lock();
            (
                core.observed,
                core.memo.clone(),
                core.filter.clone(),
                core.order.clone(),
            )
        };
        if observed {
            if let Some((revision, docs)) = memo {
                if revision == state.revision {
                    return docs;
                }
            }
        }

        let merged = if state.cols.iter().any(is_pending) {
            let held = self.core.lock().previous_complete.clone();
            match held {
                Some(held) => held,
                None => Arc::new(
                    state
                        .cols
                        .iter()
                        .flat_map(|col| col.docs().to_vec())
                        .collect(),
                ),
            }
        } else {
            let all: Arc<Vec<D>> = Arc::new(
                state
                    .cols
                    .iter()
                    .flat_map(|col| col.docs().to_vec())
                    .collect(),
            );
            self.core.lock().previous_complete = Some(all.clone());
            all
        };

        let result = if filter.is_none() && order.is_none() {
            merged
        } else {
            let mut docs: Vec<D> = match &filter {
                Some(filter) => merged.iter().filter(|&doc| filter(doc)).cloned().collect(),
                None => merged.to_vec(),
            };
            if let Some(order) = &order {
                docs.sort_by(|a, b| order(a, b));
            }
            Arc::new(docs)
        };

        if observed {
            self.core.lock().memo = Some((state.revision, result.clone()));
        }
        result
    }
}

fn same_partitions<D: CollectionEntity>(a: &[Collection<D>], b: &[Collection<D>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.ptr_eq(y))
}

impl<D: CollectionEntity> ObservationDelegate for AggregateInner<D> {
    fn add_observer_ref(&self) {
        self.core.lock().observed = true;

        let input_watch = self.queries.watch.as_ref().map(|watch| {
            let me = self.me.clone();
            watch(Box::new(move || {
                if let Some(inner) = me.upgrade() {
                    if inner.core.lock().observed {
                        inner.recompute(true);
                    }
                }
            }))
        });
        self.recompute(false);

        let cols = self.state.get().cols.clone();
        let watches: Vec<Subscription> = cols.iter().map(|col| self.watch_partition(col)).collect();
        let previous = {
            let mut core = self.core.lock();
            core.input_watch = input_watch;
            std::mem::replace(&mut core.partition_watches, watches)
        };
        drop(previous);
    }

    fn release_observer_ref(&self) {
        let (input_watch, watches) = {
            let mut core = self.core.lock();
            core.observed = false;
            core.memo = None;
            (
                core.input_watch.take(),
                std::mem::take(&mut core.partition_watches),
            )
        };
        drop(input_watch);
        drop(watches);
    }
}
