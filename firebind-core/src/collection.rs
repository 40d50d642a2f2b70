//! Live collections
//!
//! A [`Collection`] mirrors the result of a collection reference plus an
//! optional query. Incoming snapshots are reconciled into entities that keep
//! their identity across snapshots, and the exposed `docs` list is only
//! replaced when its membership or order changes.

use crate::activation::{Activation, Mode, Transition};
use crate::cell::{CellWatch, ReactiveCell, Subscription};
use crate::config::{CollectionOptions, DocumentOptions};
use crate::context::Context;
use crate::debounce::{Debouncer, Offer};
use crate::document::{into_map, validate_data, Document};
use crate::entity::{CollectionEntity, DocumentFactory};
use crate::error::{BackendResult, Error, Result};
use crate::observe::ObservationDelegate;
use crate::query::{QuerySpec, QueryTarget};
use crate::ready::ReadyGate;
use crate::reconcile::{reconcile_entities, same_sequence};
use crate::reference::{CollectionRef, Source};
use crate::snapshot::QuerySnapshot;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Observable state of a [`Collection`]
#[derive(Debug)]
pub struct CollectionState<D> {
    /// Owned entities in snapshot order; replaced only when the sequence changes
    pub docs: Arc<Vec<D>>,
    pub has_docs: bool,
    /// A fetch or listener is waiting for its first result
    pub is_loading: bool,
    /// A result was obtained at least once
    pub is_loaded: bool,
    /// Bumped when an owned document's data changes without `docs` being replaced
    pub content_revision: u64,
    revision: u64,
}

impl<D> Clone for CollectionState<D> {
    fn clone(&self) -> Self {
        Self {
            docs: self.docs.clone(),
            has_docs: self.has_docs,
            is_loading: self.is_loading,
            is_loaded: self.is_loaded,
            content_revision: self.content_revision,
            revision: self.revision,
        }
    }
}

impl<D> Default for CollectionState<D> {
    fn default() -> Self {
        Self {
            docs: Arc::new(Vec::new()),
            has_docs: false,
            is_loading: false,
            is_loaded: false,
            content_revision: 0,
            revision: 0,
        }
    }
}

struct CollectionCore {
    source: Source<CollectionRef>,
    reference: Option<CollectionRef>,
    query: QuerySpec,
    target: Option<QueryTarget>,
    activation: Activation,
    listener: Option<Subscription>,
    generation: u64,
    fetching: bool,
    source_watch: Option<Subscription>,
    debouncer: Debouncer<QuerySnapshot>,
}

struct Reconciler<D> {
    lookup: HashMap<String, D>,
    docs: Arc<Vec<D>>,
    revision: u64,
}

struct CollectionInner<D: CollectionEntity> {
    me: Weak<CollectionInner<D>>,
    ctx: Context,
    document_options: DocumentOptions,
    debug_name: Option<String>,
    debug: bool,
    factory: DocumentFactory<D>,
    state: ReactiveCell<CollectionState<D>>,
    core: Mutex<CollectionCore>,
    reconciler: Mutex<Reconciler<D>>,
    ready: ReadyGate,
}

/// Handle to a live collection
pub struct Collection<D: CollectionEntity = Document> {
    inner: Arc<CollectionInner<D>>,
}

impl<D: CollectionEntity> Clone for Collection<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Collection<Document> {
    /// Collection of plain documents bound to the default context
    pub fn new(
        source: impl Into<Source<CollectionRef>>,
        options: CollectionOptions,
    ) -> Result<Self> {
        Self::with_context(Context::global()?, source, options)
    }

    /// Collection of plain documents bound to `ctx`
    pub fn with_context(
        ctx: Context,
        source: impl Into<Source<CollectionRef>>,
        options: CollectionOptions,
    ) -> Result<Self> {
        Self::with_factory(ctx, source, options, Document::factory())
    }
}

impl<D: CollectionEntity> Collection<D> {
    /// Collection building its entities with `factory`
    pub fn with_factory(
        ctx: Context,
        source: impl Into<Source<CollectionRef>>,
        options: CollectionOptions,
        factory: DocumentFactory<D>,
    ) -> Result<Self> {
        let source = source.into();
        let reference = source.resolve(|path| ctx.backend().collection_ref(path))?;
        let mode = ctx.mode_or_default(options.mode);
        let debouncer = Debouncer::new(
            ctx.debounce_or_default(options.debounce),
            options
                .minimize_updates
                .unwrap_or(ctx.config().minimize_updates),
        );

        let inner = Arc::new_cyclic(|me: &Weak<CollectionInner<D>>| {
            let state = ReactiveCell::new(CollectionState::default());
            let delegate: Weak<dyn ObservationDelegate> = me.clone();
            state.set_delegate(delegate);
            CollectionInner {
                me: me.clone(),
                ctx,
                document_options: options.document,
                debug_name: options.debug_name,
                debug: options.debug,
                factory,
                state,
                core: Mutex::new(CollectionCore {
                    source: Source::None,
                    reference: None,
                    query: options.query,
                    target: None,
                    activation: Activation::new(mode),
                    listener: None,
                    generation: 0,
                    fetching: false,
                    source_watch: None,
                    debouncer,
                }),
                reconciler: Mutex::new(Reconciler {
                    lookup: HashMap::new(),
                    docs: Arc::new(Vec::new()),
                    revision: 0,
                }),
                ready: ReadyGate::new(),
            }
        });

        let watch = source.cell().map(|cell| inner.follow(cell));
        {
            let mut core = inner.core.lock();
            core.source = source;
            core.source_watch = watch;
        }
        inner.rebind(|core| core.reference = reference);

        Ok(Self { inner })
    }

    /// Owned entities in snapshot order
    pub fn docs(&self) -> Arc<Vec<D>> {
        self.inner.state.get().docs.clone()
    }

    pub fn has_docs(&self) -> bool {
        self.inner.state.get().has_docs
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.get().is_loading
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.state.get().is_loaded
    }

    pub fn state(&self) -> Arc<CollectionState<D>> {
        self.inner.state.get()
    }

    /// Observe the collection's state; opens the listener in auto mode
    pub fn observe(&self) -> CellWatch<CollectionState<D>> {
        self.inner.state.watch()
    }

    /// Run `listener` on every state change; opens the listener in auto mode
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<CollectionState<D>>) + Send + Sync + 'static,
    {
        self.inner.state.subscribe(listener)
    }

    /// Resolved collection reference
    pub fn reference(&self) -> Option<CollectionRef> {
        self.inner.core.lock().reference.clone()
    }

    pub fn path(&self) -> Option<String> {
        self.reference().map(|r| r.path().to_string())
    }

    pub fn source(&self) -> Source<CollectionRef> {
        self.inner.core.lock().source.clone()
    }

    /// Replace the source and restart any open listener
    pub fn set_source(&self, source: impl Into<Source<CollectionRef>>) -> Result<()> {
        let source = source.into();
        let reference = source.resolve(|path| self.inner.ctx.backend().collection_ref(path))?;
        let watch = source.cell().map(|cell| self.inner.follow(cell));
        let previous_watch = {
            let mut core = self.inner.core.lock();
            core.source = source;
            std::mem::replace(&mut core.source_watch, watch)
        };
        drop(previous_watch);
        self.inner.rebind(|core| core.reference = reference);
        Ok(())
    }

    pub fn set_ref(&self, reference: Option<CollectionRef>) -> Result<()> {
        match reference {
            Some(reference) => self.set_source(reference),
            None => self.set_source(Source::<CollectionRef>::None),
        }
    }

    pub fn set_path(&self, path: Option<&str>) -> Result<()> {
        self.set_source(path.map(str::to_string))
    }

    /// How the query is derived from the reference
    pub fn query(&self) -> QuerySpec {
        self.inner.core.lock().query.clone()
    }

    /// Replace the query and restart any open listener
    pub fn set_query(&self, query: impl Into<QuerySpec>) {
        let query = query.into();
        self.inner.rebind(|core| core.query = query);
    }

    /// What the collection currently listens to; `None` forces an empty result
    pub fn target(&self) -> Option<QueryTarget> {
        self.inner.core.lock().target.clone()
    }

    pub fn mode(&self) -> Mode {
        self.inner.core.lock().activation.mode()
    }

    pub fn set_mode(&self, mode: Mode) {
        self.inner
            .transition(|core| core.activation.set_mode(mode));
    }

    pub fn set_mode_str(&self, mode: &str) -> Result<()> {
        self.set_mode(mode.parse()?);
        Ok(())
    }

    /// Whether the realtime listener is open
    pub fn is_active(&self) -> bool {
        self.inner.core.lock().activation.is_active()
    }

    pub fn observed_ref_count(&self) -> usize {
        self.inner.state.observer_count()
    }

    /// Read the collection once
    ///
    /// Fails while a listener is open or another fetch is running. A failed
    /// fetch leaves `docs` untouched; loading is cleared and readiness is
    /// settled either way.
    pub async fn fetch(&self) -> Result<()> {
        let target = {
            let mut core = self.inner.core.lock();
            if core.activation.is_active() {
                return Err(Error::AlreadyActive);
            }
            if core.fetching {
                return Err(Error::FetchInProgress);
            }
            let target = core.target.clone().ok_or(Error::NoReference)?;
            core.fetching = true;
            target
        };

        let _guard = FetchGuard(&*self.inner);
        self.inner.ready.mark_not_ready();
        self.inner.set_loading(true);
        self.inner.trace("fetching");

        match self.inner.ctx.backend().list_documents(&target).await {
            Ok(snapshot) => {
                if self.target().as_ref() == Some(&target) {
                    self.inner.reconcile(Some(&snapshot));
                }
                Ok(())
            }
            Err(err) => {
                warn!(query = %target, %err, "collection fetch failed");
                Err(err.into())
            }
        }
    }

    /// Wait until the current fetch or listen cycle has produced a result
    pub async fn ready(&self) {
        self.inner.ready.wait().await
    }

    /// Create a document with a generated id
    ///
    /// The returned document is not owned by the collection; it shows up in
    /// `docs` through the collection's own listener or next fetch.
    pub async fn add(&self, data: Value) -> Result<Document> {
        let data = into_map(data)?;
        let reference = self.reference().ok_or(Error::NoReference)?;
        let backend = self.inner.ctx.backend().clone();
        if self.inner.document_options.schema.is_some() {
            let stripped =
                crate::merge::strip_deletes(&data, |v: &Value| backend.is_delete_sentinel(v));
            validate_data(&self.inner.document_options, &stripped, None)?;
        }
        let created = backend.add_document(&reference, data).await?;
        Document::with_context(
            self.inner.ctx.clone(),
            created,
            self.inner.document_options.clone(),
        )
    }

    pub fn ptr_eq(&self, other: &Collection<D>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn context(&self) -> &Context {
        &self.inner.ctx
    }
}

impl<D: CollectionEntity> fmt::Debug for Collection<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("target", &self.target())
            .field("mode", &self.mode())
            .field("active", &self.is_active())
            .field("docs", &self.docs().len())
            .finish()
    }
}

impl<D: CollectionEntity> CollectionInner<D> {
    fn transition<F>(&self, f: F)
    where
        F: FnOnce(&mut CollectionCore) -> Transition,
    {
        let (plan, previous) = {
            let mut core = self.core.lock();
            let transition = f(&mut core);
            if transition == Transition::None {
                return;
            }
            core.generation += 1;
            let previous = core.listener.take();
            let plan = match transition {
                Transition::Start | Transition::Restart => {
                    core.debouncer.restart();
                    core.target.clone().map(|target| (target, core.generation))
                }
                _ => {
                    core.debouncer.cancel();
                    None
                }
            };
            (plan, previous)
        };
        drop(previous);

        match plan {
            Some((target, generation)) => self.listen(target, generation),
            None => {
                self.trace("stopped listening");
                self.set_loading(false);
                self.ready.mark_ready();
            }
        }
    }

    /// Apply a change to the reference or query and re-derive the target
    fn rebind<F>(&self, f: F)
    where
        F: FnOnce(&mut CollectionCore),
    {
        let mut forced_empty = false;
        self.transition(|core| {
            f(core);
            core.target = core.query.resolve(core.reference.as_ref());
            forced_empty = core.target.is_none();
            core.activation.reference_changed(!forced_empty)
        });
        if forced_empty {
            self.trace("query resolved to nothing, forcing empty result");
            self.reconcile(None);
        }
    }

    fn listen(&self, target: QueryTarget, generation: u64) {
        self.trace("listening");
        self.ready.mark_not_ready();
        self.set_loading(true);

        let me = self.me.clone();
        let subscription = self.ctx.backend().listen_query(
            &target,
            Box::new(move |result| {
                if let Some(inner) = me.upgrade() {
                    inner.on_snapshot(generation, result);
                }
            }),
        );

        let stale = {
            let mut core = self.core.lock();
            if core.generation == generation {
                core.listener = Some(subscription);
                None
            } else {
                Some(subscription)
            }
        };
        drop(stale);
    }

    fn on_snapshot(&self, generation: u64, result: BackendResult<QuerySnapshot>) {
        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(err) => {
                if self.core.lock().generation != generation {
                    return;
                }
                error!(query = ?self.core.lock().target, %err, "collection listener failed");
                self.set_loading(false);
                self.ready.mark_ready();
                return;
            }
        };

        let offer = {
            let mut core = self.core.lock();
            if core.generation != generation {
                return;
            }
            core.debouncer.offer(snapshot)
        };
        match offer {
            Offer::Apply(snapshot) => {
                self.reconcile(Some(&snapshot));
                self.ready.mark_ready();
            }
            Offer::Defer { seq, delay } => self.schedule(generation, seq, delay),
        }
    }

    fn schedule(&self, generation: u64, seq: u64, delay: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime for the snapshot debounce, applying immediately");
            let pending = {
                let mut core = self.core.lock();
                if core.generation != generation {
                    return;
                }
                core.debouncer.flush()
            };
            if let Some(snapshot) = pending {
                self.reconcile(Some(&snapshot));
                self.ready.mark_ready();
            }
            return;
        };

        self.trace("deferring early snapshot");
        let me = self.me.clone();
        let timer = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = me.upgrade() {
                inner.apply_deferred(generation, seq);
            }
        });

        let mut core = self.core.lock();
        if core.generation == generation {
            core.debouncer.arm(seq, timer);
        } else {
            timer.abort();
        }
    }

    fn apply_deferred(&self, generation: u64, seq: u64) {
        let due = {
            let mut core = self.core.lock();
            if core.generation != generation {
                return;
            }
            core.debouncer.take_due(seq)
        };
        if let Some(snapshot) = due {
            self.reconcile(Some(&snapshot));
            self.ready.mark_ready();
        }
    }

    /// Reconcile a snapshot (or a forced empty result) into `docs`
    fn reconcile(&self, snapshot: Option<&QuerySnapshot>) {
        let (docs, updated, revision) = {
            let mut reconciler = self.reconciler.lock();
            let previous = reconciler.docs.clone();
            let next = reconcile_entities(&mut reconciler.lookup, &previous, snapshot, |doc| {
                (self.factory)(doc, &self.ctx, &self.document_options)
            });
            if !same_sequence(&previous, &next.docs) {
                reconciler.docs = Arc::new(next.docs);
            }
            reconciler.revision += 1;
            (reconciler.docs.clone(), next.updated, reconciler.revision)
        };

        let has_docs = !docs.is_empty();
        self.state.update(|state| {
            if revision < state.revision {
                return false;
            }
            state.revision = revision;
            let mut changed = false;
            if !Arc::ptr_eq(&state.docs, &docs) {
                state.docs = docs;
                changed = true;
            } else if updated {
                state.content_revision += 1;
                changed = true;
            }
            if state.has_docs != has_docs || state.is_loading || !state.is_loaded {
                changed = true;
            }
            state.has_docs = has_docs;
            state.is_loading = false;
            state.is_loaded = true;
            changed
        });
        self.trace("applied snapshot");
    }

    fn follow(&self, cell: &ReactiveCell<Option<String>>) -> Subscription {
        let me = self.me.clone();
        cell.subscribe(move |path| {
            let Some(inner) = me.upgrade() else {
                return;
            };
            let reference = match path.as_deref() {
                Some(path) => match inner.ctx.backend().collection_ref(path) {
                    Ok(reference) => Some(reference),
                    Err(err) => {
                        warn!(%path, %err, "source resolved to an invalid path");
                        None
                    }
                },
                None => None,
            };
            inner.rebind(|core| core.reference = reference);
        })
    }

    fn set_loading(&self, loading: bool) {
        self.state.update(|state| {
            let changed = state.is_loading != loading;
            state.is_loading = loading;
            changed
        });
    }

    fn trace(&self, event: &str) {
        let query = self
            .core
            .lock()
            .target
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "<none>".to_string());
        if self.debug || self.ctx.config().debug {
            let name = self.debug_name.as_deref().unwrap_or("Collection");
            info!(%name, %query, "{event}");
        } else {
            debug!(%query, "{event}");
        }
    }
}

impl<D: CollectionEntity> ObservationDelegate for CollectionInner<D> {
    fn add_observer_ref(&self) {
        self.transition(|core| core.activation.add_observer());
    }

    fn release_observer_ref(&self) {
        self.transition(|core| core.activation.release_observer());
    }
}

impl<D: CollectionEntity> Drop for CollectionInner<D> {
    fn drop(&mut self) {
        // Give up ownership so dropped collections don't pin their documents
        let reconciler = self.reconciler.get_mut();
        for doc in reconciler.docs.iter() {
            doc.release_collection_ref();
        }
    }
}

struct FetchGuard<'a, D: CollectionEntity>(&'a CollectionInner<D>);

impl<D: CollectionEntity> Drop for FetchGuard<'_, D> {
    fn drop(&mut self) {
        self.0.core.lock().fetching = false;
        self.0.set_loading(false);
        self.0.ready.mark_ready();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::error::BackendError;
    use crate::query::{Direction, FilterOp, Query};
    use crate::schema::{FieldKind, FieldSchema};
    use serde_json::json;

    fn setup() -> (MemoryBackend, Context) {
        let backend = MemoryBackend::new();
        backend.insert("todos/1", json!({"rank": 1, "done": false})).unwrap();
        backend.insert("todos/2", json!({"rank": 2, "done": true})).unwrap();
        let ctx = Context::new(backend.clone());
        (backend, ctx)
    }

    fn ids(docs: &[Document]) -> Vec<String> {
        docs.iter().filter_map(Document::id).collect()
    }

    #[test]
    fn test_auto_mode_listens_while_observed() {
        let (backend, ctx) = setup();
        let col = Collection::with_context(ctx, "todos", CollectionOptions::default()).unwrap();
        assert!(!col.is_active());

        let watch = col.observe();
        assert!(col.is_active());
        assert_eq!(ids(&col.docs()), vec!["1", "2"]);
        assert!(col.has_docs());
        assert!(col.is_loaded());
        assert!(!col.is_loading());

        drop(watch);
        assert!(!col.is_active());
        assert_eq!(backend.listener_count(), 0);
    }

    #[test]
    fn test_documents_are_owned_and_silent() {
        let (backend, ctx) = setup();
        let col = Collection::with_context(
            ctx,
            "todos",
            CollectionOptions::default().with_mode(Mode::On),
        )
        .unwrap();
        let doc = col.docs()[0].clone();
        assert_eq!(doc.collection_ref_count(), 1);

        // Observing an owned document does not open a second listener
        let _watch = doc.observe();
        assert!(!doc.is_active());
        assert_eq!(backend.listener_count(), 1);

        // Leaving the collection hands listening back to the document
        backend.remove("todos/1").unwrap();
        assert_eq!(doc.collection_ref_count(), 0);
        assert!(doc.is_active());
    }

    #[test]
    fn test_docs_container_is_stable() {
        let (backend, ctx) = setup();
        let col = Collection::with_context(
            ctx,
            "todos",
            CollectionOptions::default().with_mode(Mode::On),
        )
        .unwrap();
        let before = col.docs();

        backend.insert("todos/2", json!({"rank": 2, "done": false})).unwrap();
        assert!(Arc::ptr_eq(&before, &col.docs()));
        assert_eq!(col.docs()[1].data()["done"], json!(false));

        backend.insert("todos/3", json!({"rank": 3, "done": false})).unwrap();
        assert!(!Arc::ptr_eq(&before, &col.docs()));
        assert!(col.docs()[0].ptr_eq(&before[0]));
    }

    #[test]
    fn test_query_changes() {
        let (_backend, ctx) = setup();
        let col = Collection::with_context(
            ctx,
            "todos",
            CollectionOptions::default()
                .with_mode(Mode::On)
                .with_query(QuerySpec::build(|todos| {
                    Some(
                        Query::new(todos.clone())
                            .where_field("done", FilterOp::Eq, json!(false)),
                    )
                })),
        )
        .unwrap();
        assert_eq!(ids(&col.docs()), vec!["1"]);

        col.set_query(
            Query::new(CollectionRef::parse("todos").unwrap()).order_by("rank", Direction::Desc),
        );
        assert_eq!(ids(&col.docs()), vec!["2", "1"]);

        col.set_query(QuerySpec::Empty);
        assert!(col.docs().is_empty());
        assert!(col.is_loaded());
        assert!(!col.is_active());
        assert!(col.target().is_none());
    }

    #[test]
    fn test_path_changes() {
        let (backend, ctx) = setup();
        backend.insert("users/a/todos/x", json!({})).unwrap();
        let col = Collection::with_context(
            ctx,
            "todos",
            CollectionOptions::default().with_mode(Mode::On),
        )
        .unwrap();

        col.set_path(Some("users/a/todos")).unwrap();
        assert_eq!(ids(&col.docs()), vec!["x"]);
        assert_eq!(backend.listener_count(), 1);
        assert!(matches!(
            col.set_path(Some("users/a")),
            Err(Error::InvalidPath { .. })
        ));
        assert_eq!(col.path().as_deref(), Some("users/a/todos"));
    }

    #[tokio::test]
    async fn test_fetch() {
        let (backend, ctx) = setup();
        let col = Collection::with_context(
            ctx,
            "todos",
            CollectionOptions::default().with_mode(Mode::Off),
        )
        .unwrap();
        assert!(col.docs().is_empty());

        col.fetch().await.unwrap();
        assert_eq!(ids(&col.docs()), vec!["1", "2"]);
        col.ready().await;

        backend.set_failure(Some(BackendError::PermissionDenied("todos".into())));
        assert!(col.fetch().await.is_err());
        assert_eq!(col.docs().len(), 2);
        assert!(!col.is_loading());

        col.set_mode(Mode::On);
        assert!(matches!(col.fetch().await, Err(Error::AlreadyActive)));
    }

    #[tokio::test]
    async fn test_add() {
        let (backend, ctx) = setup();
        let col = Collection::with_context(
            ctx,
            "todos",
            CollectionOptions::default()
                .with_mode(Mode::On)
                .with_document(DocumentOptions::default().with_schema(
                    FieldSchema::new().required("rank", FieldKind::Integer),
                )),
        )
        .unwrap();

        let doc = col.add(json!({"rank": 3})).await.unwrap();
        assert_eq!(col.docs().len(), 3);
        assert_eq!(doc.collection_ref_count(), 0);
        assert!(backend.get(&doc.path().unwrap()).is_some());

        let err = col.add(json!({"rank": "high"})).await.unwrap_err();
        assert!(matches!(err, Error::SchemaValidation { field, id, .. } if field == "rank" && id == "<new>"));
        assert_eq!(col.docs().len(), 3);
    }

    #[test]
    fn test_listener_error_keeps_docs() {
        let (backend, ctx) = setup();
        let col = Collection::with_context(
            ctx,
            "todos",
            CollectionOptions::default().with_mode(Mode::On),
        )
        .unwrap();
        backend.broadcast_error(BackendError::Unavailable("offline".into()));
        assert_eq!(col.docs().len(), 2);
        assert!(!col.is_loading());
        assert!(col.is_active());
    }

    #[test]
    fn test_dropping_collection_releases_documents() {
        let (_backend, ctx) = setup();
        let col = Collection::with_context(
            ctx,
            "todos",
            CollectionOptions::default().with_mode(Mode::On),
        )
        .unwrap();
        let doc = col.docs()[0].clone();
        drop(col);
        assert_eq!(doc.collection_ref_count(), 0);
    }
}
