//! Live documents
//!
//! A [`Document`] mirrors one remote document. Its state lives in a
//! [`ReactiveCell`]; observing that cell (through [`Document::observe`] or
//! [`Document::subscribe`]) is what opens the realtime listener in
//! [`Mode::Auto`]. While a collection owns the document, the collection's
//! listener feeds it and its own listener stays closed.

use crate::activation::{Activation, Mode, Transition};
use crate::backend::SetOptions;
use crate::cell::{CellWatch, ReactiveCell, Subscription};
use crate::config::DocumentOptions;
use crate::context::Context;
use crate::entity::{CollectionEntity, DocumentFactory};
use crate::error::{BackendError, BackendResult, Error, Result};
use crate::merge;
use crate::observe::ObservationDelegate;
use crate::ready::ReadyGate;
use crate::reference::{DocumentRef, Source};
use crate::snapshot::DocumentSnapshot;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Observable state of a [`Document`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentState {
    /// Field data; empty when the document does not exist. Only replaced
    /// when the content changes.
    pub data: Arc<Map<String, Value>>,
    /// Whether the document exists
    pub has_data: bool,
    /// Latest snapshot, stored even when the data is unchanged
    pub snapshot: Option<DocumentSnapshot>,
    /// A fetch or listener is waiting for its first result
    pub is_loading: bool,
    /// A result was obtained at least once
    pub is_loaded: bool,
}

struct DocumentCore {
    source: Source<DocumentRef>,
    reference: Option<DocumentRef>,
    activation: Activation,
    listener: Option<Subscription>,
    generation: u64,
    fetching: bool,
    source_watch: Option<Subscription>,
}

struct DocumentInner {
    me: Weak<DocumentInner>,
    ctx: Context,
    options: DocumentOptions,
    state: ReactiveCell<DocumentState>,
    core: Mutex<DocumentCore>,
    ready: ReadyGate,
}

/// Handle to a live document
///
/// Clones share the same document; use [`Document::ptr_eq`] to compare
/// identities.
#[derive(Clone)]
pub struct Document {
    inner: Arc<DocumentInner>,
}

impl Document {
    /// Document bound to the default context
    pub fn new(source: impl Into<Source<DocumentRef>>, options: DocumentOptions) -> Result<Self> {
        Self::with_context(Context::global()?, source, options)
    }

    /// Document bound to `ctx`
    pub fn with_context(
        ctx: Context,
        source: impl Into<Source<DocumentRef>>,
        options: DocumentOptions,
    ) -> Result<Self> {
        let mode = ctx.mode_or_default(options.mode);
        Self::build(ctx, source.into(), options, Activation::new(mode))
    }

    fn build(
        ctx: Context,
        source: Source<DocumentRef>,
        options: DocumentOptions,
        activation: Activation,
    ) -> Result<Self> {
        let reference = resolve_source(&ctx, &source)?;

        let inner = Arc::new_cyclic(|me: &Weak<DocumentInner>| {
            let state = ReactiveCell::new(DocumentState::default());
            let delegate: Weak<dyn ObservationDelegate> = me.clone();
            state.set_delegate(delegate);
            DocumentInner {
                me: me.clone(),
                ctx,
                options,
                state,
                core: Mutex::new(DocumentCore {
                    source: Source::None,
                    reference: None,
                    activation,
                    listener: None,
                    generation: 0,
                    fetching: false,
                    source_watch: None,
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
        inner.transition(|core| {
            core.reference = reference;
            let has_ref = core.reference.is_some();
            ((), core.activation.reference_changed(has_ref))
        });

        Ok(Self { inner })
    }

    /// Document created by a collection for a snapshot it received
    ///
    /// The document stays inactive until the collection takes ownership
    /// through [`CollectionEntity::add_collection_ref`].
    pub fn from_snapshot(
        ctx: &Context,
        options: &DocumentOptions,
        snapshot: &DocumentSnapshot,
    ) -> Result<Self> {
        let mode = ctx.mode_or_default(options.mode);
        let document = Self::build(
            ctx.clone(),
            Source::from(snapshot.reference().clone()),
            options.clone(),
            Activation::claimed(mode),
        )?;
        document.inner.apply_snapshot(snapshot);
        Ok(document)
    }

    /// Factory building plain documents, the default for collections
    pub fn factory() -> DocumentFactory<Document> {
        Arc::new(|snapshot, ctx, options| Document::from_snapshot(ctx, options, snapshot))
    }

    /// Current field data
    pub fn data(&self) -> Arc<Map<String, Value>> {
        self.inner.state.get().data.clone()
    }

    /// Deserialize the current data
    pub fn data_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(Value::Object((*self.data()).clone()))
    }

    pub fn has_data(&self) -> bool {
        self.inner.state.get().has_data
    }

    pub fn snapshot(&self) -> Option<DocumentSnapshot> {
        self.inner.state.get().snapshot.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.get().is_loading
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.state.get().is_loaded
    }

    /// Full current state
    pub fn state(&self) -> Arc<DocumentState> {
        self.inner.state.get()
    }

    /// Observe the document's state; opens the listener in auto mode
    pub fn observe(&self) -> CellWatch<DocumentState> {
        self.inner.state.watch()
    }

    /// Run `listener` on every state change; opens the listener in auto mode
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<DocumentState>) + Send + Sync + 'static,
    {
        self.inner.state.subscribe(listener)
    }

    /// Resolved reference
    pub fn reference(&self) -> Option<DocumentRef> {
        self.inner.core.lock().reference.clone()
    }

    pub fn path(&self) -> Option<String> {
        self.reference().map(|r| r.path().to_string())
    }

    pub fn id(&self) -> Option<String> {
        self.reference().map(|r| r.id().to_string())
    }

    /// Current source
    pub fn source(&self) -> Source<DocumentRef> {
        self.inner.core.lock().source.clone()
    }

    /// Replace the source and restart any open listener
    ///
    /// Fails with [`Error::Ownership`] while a collection owns the document.
    pub fn set_source(&self, source: impl Into<Source<DocumentRef>>) -> Result<()> {
        let source = source.into();
        self.inner.check_unowned()?;
        let reference = resolve_source(&self.inner.ctx, &source)?;
        let watch = source.cell().map(|cell| self.inner.follow(cell));

        let previous_watch = {
            let mut core = self.inner.core.lock();
            if core.activation.owners() > 0 {
                return Err(self.inner.ownership_error(&core));
            }
            core.source = source;
            std::mem::replace(&mut core.source_watch, watch)
        };
        drop(previous_watch);

        self.inner.rebind(reference);
        Ok(())
    }

    pub fn set_ref(&self, reference: Option<DocumentRef>) -> Result<()> {
        match reference {
            Some(reference) => self.set_source(reference),
            None => self.set_source(Source::<DocumentRef>::None),
        }
    }

    pub fn set_path(&self, path: Option<&str>) -> Result<()> {
        self.set_source(path.map(str::to_string))
    }

    pub fn mode(&self) -> Mode {
        self.inner.core.lock().activation.mode()
    }

    pub fn set_mode(&self, mode: Mode) {
        self.inner
            .transition(|core| ((), core.activation.set_mode(mode)));
    }

    /// Parse and apply a mode name
    pub fn set_mode_str(&self, mode: &str) -> Result<()> {
        self.set_mode(mode.parse()?);
        Ok(())
    }

    /// Whether the realtime listener is open
    pub fn is_active(&self) -> bool {
        self.inner.core.lock().activation.is_active()
    }

    /// Number of collections owning the document
    pub fn collection_ref_count(&self) -> usize {
        self.inner.core.lock().activation.owners()
    }

    /// Number of observers of the document's state
    pub fn observed_ref_count(&self) -> usize {
        self.inner.state.observer_count()
    }

    /// Read the document once
    ///
    /// Fails while a listener is open or another fetch is running. A failed
    /// fetch leaves the data untouched; loading is cleared and readiness is
    /// settled either way.
    pub async fn fetch(&self) -> Result<()> {
        let reference = {
            let mut core = self.inner.core.lock();
            if core.activation.is_active() {
                return Err(Error::AlreadyActive);
            }
            if core.fetching {
                return Err(Error::FetchInProgress);
            }
            let reference = core.reference.clone().ok_or(Error::NoReference)?;
            core.fetching = true;
            reference
        };

        let _guard = FetchGuard(&self.inner);
        self.inner.ready.mark_not_ready();
        self.inner.set_loading(true);
        self.inner.trace("fetching");

        match self.inner.ctx.backend().get_document(&reference).await {
            Ok(snapshot) => {
                if self.reference().as_ref() == Some(&reference) {
                    self.inner.apply_snapshot(&snapshot);
                }
                Ok(())
            }
            Err(err) => {
                warn!(path = %reference, %err, "document fetch failed");
                Err(err.into())
            }
        }
    }

    /// Wait until the current fetch or listen cycle has produced a result
    pub async fn ready(&self) {
        self.inner.ready.wait().await
    }

    /// Update fields; keys may be dotted paths
    ///
    /// With a schema, the merged result is validated before anything is
    /// sent to the backend.
    pub async fn update(&self, fields: Value) -> Result<()> {
        let fields = into_map(fields)?;
        let reference = self.reference().ok_or(Error::NoReference)?;
        if self.inner.options.schema.is_some() {
            let backend = self.inner.ctx.backend().clone();
            let merged = merge::apply_update(&self.data(), &fields, |v| {
                backend.is_delete_sentinel(v)
            });
            self.inner.validate(&merged, Some(reference.id()))?;
        }
        self.inner
            .ctx
            .backend()
            .update_document(&reference, fields)
            .await?;
        Ok(())
    }

    /// Write the whole document, or merge into it
    pub async fn set(&self, data: Value, options: SetOptions) -> Result<()> {
        let data = into_map(data)?;
        let reference = self.reference().ok_or(Error::NoReference)?;
        if self.inner.options.schema.is_some() {
            let backend = self.inner.ctx.backend().clone();
            let is_delete = |v: &Value| backend.is_delete_sentinel(v);
            let result = if options.merge {
                merge::merge_set(&self.data(), &data, is_delete)
            } else {
                merge::strip_deletes(&data, is_delete)
            };
            self.inner.validate(&result, Some(reference.id()))?;
        }
        self.inner
            .ctx
            .backend()
            .set_document(&reference, data, options)
            .await?;
        Ok(())
    }

    /// Delete the remote document
    pub async fn delete(&self) -> Result<()> {
        let reference = self.reference().ok_or(Error::NoReference)?;
        self.inner.ctx.backend().delete_document(&reference).await?;
        Ok(())
    }

    /// Whether both handles refer to the same document
    pub fn ptr_eq(&self, other: &Document) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn context(&self) -> &Context {
        &self.inner.ctx
    }
}

impl CollectionEntity for Document {
    fn id(&self) -> String {
        Document::id(self).unwrap_or_default()
    }

    fn add_collection_ref(&self) -> usize {
        self.inner.transition(|core| core.activation.add_owner())
    }

    fn release_collection_ref(&self) -> usize {
        self.inner.transition(|core| core.activation.release_owner())
    }

    fn update_from_snapshot(&self, snapshot: &DocumentSnapshot) -> bool {
        self.inner.apply_snapshot(snapshot)
    }

    fn ptr_eq(&self, other: &Self) -> bool {
        Document::ptr_eq(self, other)
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("path", &self.path())
            .field("mode", &self.mode())
            .field("active", &self.is_active())
            .field("data", &self.data())
            .finish()
    }
}

impl DocumentInner {
    /// Apply an activation change, then open or close the listener outside the lock
    fn transition<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut DocumentCore) -> (R, Transition),
    {
        let (result, plan, previous) = {
            let mut core = self.core.lock();
            let (result, transition) = f(&mut core);
            if transition == Transition::None {
                return result;
            }
            core.generation += 1;
            let previous = core.listener.take();
            let plan = match transition {
                Transition::Start | Transition::Restart => core
                    .reference
                    .clone()
                    .map(|reference| (reference, core.generation)),
                _ => None,
            };
            (result, plan, previous)
        };
        drop(previous);

        match plan {
            Some((reference, generation)) => self.listen(reference, generation),
            None => {
                self.trace("stopped listening");
                self.set_loading(false);
                self.ready.mark_ready();
            }
        }
        result
    }

    fn listen(&self, reference: DocumentRef, generation: u64) {
        self.trace("listening");
        self.ready.mark_not_ready();
        self.set_loading(true);

        let me = self.me.clone();
        let subscription = self.ctx.backend().listen_document(
            &reference,
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

    fn on_snapshot(&self, generation: u64, result: BackendResult<DocumentSnapshot>) {
        if self.core.lock().generation != generation {
            return;
        }
        match result {
            Ok(snapshot) => {
                self.apply_snapshot(&snapshot);
            }
            Err(err) => {
                error!(path = ?self.core.lock().reference, %err, "document listener failed");
                self.set_loading(false);
            }
        }
        self.ready.mark_ready();
    }

    /// Returns whether `data` or `has_data` changed
    fn apply_snapshot(&self, snapshot: &DocumentSnapshot) -> bool {
        let raw = snapshot.data().cloned().unwrap_or_default();
        let data = match self.validate(&raw, Some(snapshot.id())) {
            Ok(()) => raw,
            Err(err) => {
                warn!(path = %snapshot.reference(), %err, "ignoring invalid document data");
                Map::new()
            }
        };
        let exists = snapshot.exists();
        let mut updated = false;
        self.state.update(|state| {
            if *state.data != data {
                state.data = Arc::new(data);
                updated = true;
            }
            updated |= state.has_data != exists;
            state.has_data = exists;
            state.snapshot = Some(snapshot.clone());
            state.is_loading = false;
            state.is_loaded = true;
            true
        });
        self.trace("applied snapshot");
        updated
    }

    /// Swap in a new reference, resetting state when it points elsewhere
    fn rebind(&self, reference: Option<DocumentRef>) {
        let changed = self.core.lock().reference != reference;
        if changed {
            self.state.update(|state| {
                let fresh = DocumentState {
                    data: if state.data.is_empty() {
                        state.data.clone()
                    } else {
                        Arc::default()
                    },
                    ..DocumentState::default()
                };
                if *state == fresh {
                    return false;
                }
                *state = fresh;
                true
            });
        }
        self.transition(|core| {
            core.reference = reference;
            let has_ref = core.reference.is_some();
            ((), core.activation.reference_changed(has_ref))
        });
    }

    /// Re-resolve whenever the source cell changes
    fn follow(&self, cell: &ReactiveCell<Option<String>>) -> Subscription {
        let me = self.me.clone();
        cell.subscribe(move |path| {
            let Some(inner) = me.upgrade() else {
                return;
            };
            if inner.core.lock().activation.owners() > 0 {
                warn!(path = ?path, "ignoring source change of an owned document");
                return;
            }
            let reference = match path.as_deref() {
                Some(path) => match inner.ctx.backend().document_ref(path) {
                    Ok(reference) => Some(reference),
                    Err(err) => {
                        warn!(%path, %err, "source resolved to an invalid path");
                        None
                    }
                },
                None => None,
            };
            inner.rebind(reference);
        })
    }

    fn set_loading(&self, loading: bool) {
        self.state.update(|state| {
            let changed = state.is_loading != loading;
            state.is_loading = loading;
            changed
        });
    }

    fn check_unowned(&self) -> Result<()> {
        let core = self.core.lock();
        if core.activation.owners() > 0 {
            Err(self.ownership_error(&core))
        } else {
            Ok(())
        }
    }

    fn ownership_error(&self, core: &DocumentCore) -> Error {
        Error::Ownership {
            path: core
                .reference
                .as_ref()
                .map(|r| r.path().to_string())
                .unwrap_or_default(),
        }
    }

    fn validate(&self, data: &Map<String, Value>, id: Option<&str>) -> Result<()> {
        validate_data(&self.options, data, id)
    }

    fn trace(&self, event: &str) {
        let path = self.core.lock().reference.clone();
        let path = path.as_ref().map(DocumentRef::path).unwrap_or("<none>");
        if self.options.debug || self.ctx.config().debug {
            info!(name = %type_name(&self.options), %path, "{event}");
        } else {
            debug!(%path, "{event}");
        }
    }
}

impl ObservationDelegate for DocumentInner {
    fn add_observer_ref(&self) {
        self.transition(|core| ((), core.activation.add_observer()));
    }

    fn release_observer_ref(&self) {
        self.transition(|core| ((), core.activation.release_observer()));
    }
}

/// Clears the fetch flags however the fetch ends
struct FetchGuard<'a>(&'a DocumentInner);

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.0.core.lock().fetching = false;
        self.0.set_loading(false);
        self.0.ready.mark_ready();
    }
}

fn resolve_source(ctx: &Context, source: &Source<DocumentRef>) -> Result<Option<DocumentRef>> {
    source.resolve(|path| ctx.backend().document_ref(path))
}

pub(crate) fn type_name(options: &DocumentOptions) -> String {
    options
        .debug_name
        .clone()
        .unwrap_or_else(|| "Document".to_string())
}

/// Run the configured schema, if any, over `data`
pub(crate) fn validate_data(
    options: &DocumentOptions,
    data: &Map<String, Value>,
    id: Option<&str>,
) -> Result<()> {
    let Some(schema) = &options.schema else {
        return Ok(());
    };
    schema
        .validate(data)
        .map_err(|violation| Error::SchemaValidation {
            field: violation.path,
            type_name: type_name(options),
            id: id.unwrap_or("<new>").to_string(),
            message: violation.message,
        })
}

pub(crate) fn into_map(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(BackendError::InvalidArgument(format!(
            "document data must be a map, got {other}"
        ))
        .into()),
    }
}
