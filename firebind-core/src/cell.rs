//! Reactive cells
//!
//! A [`ReactiveCell`] holds a shared value and notifies observers when it is
//! replaced. Observers come in two flavours: [`CellWatch`] for async code
//! (backed by a `tokio::sync::watch` channel) and synchronous listeners
//! registered through [`ReactiveCell::subscribe`]. Both are RAII guards and
//! both count towards the cell's observation reference count, which is what
//! drives listener activation in documents and collections.

use crate::observe::{ObservationDelegate, ObservationRefCounter};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::watch;

type Listener<T> = Arc<dyn Fn(&Arc<T>) + Send + Sync>;

struct Registry<T> {
    refs: ObservationRefCounter,
    next_listener: u64,
    listeners: Vec<(u64, Listener<T>)>,
}

struct Shared<T> {
    tx: watch::Sender<Arc<T>>,
    registry: Mutex<Registry<T>>,
}

/// Observable value with observation hooks
pub struct ReactiveCell<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ReactiveCell<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> ReactiveCell<T> {
    /// Create a cell holding `value`
    pub fn new(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Create a cell holding an already shared value
    pub fn from_arc(value: Arc<T>) -> Self {
        let (tx, _rx) = watch::channel(value);
        Self {
            shared: Arc::new(Shared {
                tx,
                registry: Mutex::new(Registry {
                    refs: ObservationRefCounter::new(),
                    next_listener: 0,
                    listeners: Vec::new(),
                }),
            }),
        }
    }

    /// Current value
    pub fn get(&self) -> Arc<T> {
        self.shared.tx.borrow().clone()
    }

    /// Replace the value and notify observers
    pub fn set(&self, value: T) {
        self.replace(Arc::new(value));
    }

    /// Replace the shared value and notify observers
    pub fn replace(&self, value: Arc<T>) {
        self.shared.tx.send_replace(value.clone());
        self.notify(&value);
    }

    /// Copy-on-write update
    ///
    /// `f` edits a copy of the current value and reports whether it changed
    /// anything. Observers are only notified, and the shared value only
    /// replaced, when it did.
    pub fn update<F>(&self, f: F) -> bool
    where
        T: Clone,
        F: FnOnce(&mut T) -> bool,
    {
        let mut published = None;
        self.shared.tx.send_if_modified(|current| {
            let mut next = (**current).clone();
            if f(&mut next) {
                let next = Arc::new(next);
                *current = next.clone();
                published = Some(next);
                true
            } else {
                false
            }
        });
        match published {
            Some(value) => {
                self.notify(&value);
                true
            }
            None => false,
        }
    }

    /// Number of live watches and subscriptions
    pub fn observer_count(&self) -> usize {
        self.shared.registry.lock().refs.count()
    }

    /// Whether anything is observing the cell
    pub fn is_observed(&self) -> bool {
        self.observer_count() > 0
    }

    /// Register the delegate told about first/last observer transitions
    pub fn set_delegate(&self, delegate: Weak<dyn ObservationDelegate>) {
        self.shared.registry.lock().refs.set_delegate(delegate);
    }

    /// Observe the cell from async code
    pub fn watch(&self) -> CellWatch<T> {
        let rx = self.shared.tx.subscribe();
        self.attach();
        CellWatch {
            cell: self.clone(),
            rx,
        }
    }

    /// Observe the cell with a synchronous listener
    ///
    /// The listener runs on the thread that replaced the value, after the
    /// new value is visible through [`get`](Self::get).
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<T>) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = self.shared.registry.lock();
            registry.next_listener += 1;
            let id = registry.next_listener;
            registry.listeners.push((id, Arc::new(listener)));
            id
        };
        self.attach();

        let cell = self.clone();
        Subscription::new(move || {
            cell.shared
                .registry
                .lock()
                .listeners
                .retain(|(listener_id, _)| *listener_id != id);
            cell.detach();
        })
    }

    /// Whether two handles point at the same cell
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn notify(&self, value: &Arc<T>) {
        let listeners: Vec<Listener<T>> = self
            .shared
            .registry
            .lock()
            .listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(value);
        }
    }

    fn attach(&self) {
        let delegate = self.shared.registry.lock().refs.attach();
        if let Some(delegate) = delegate {
            delegate.add_observer_ref();
        }
    }

    fn detach(&self) {
        let delegate = self.shared.registry.lock().refs.detach();
        if let Some(delegate) = delegate {
            delegate.release_observer_ref();
        }
    }
}

impl<T: Send + Sync + Default + 'static> Default for ReactiveCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug + Send + Sync + 'static> fmt::Debug for ReactiveCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveCell")
            .field("value", &self.get())
            .field("observers", &self.observer_count())
            .finish()
    }
}

/// Async observer of a [`ReactiveCell`]; detaches on drop
pub struct CellWatch<T: Send + Sync + 'static> {
    cell: ReactiveCell<T>,
    rx: watch::Receiver<Arc<T>>,
}

impl<T: Send + Sync + 'static> CellWatch<T> {
    /// Latest value, marking it as seen
    pub fn get(&mut self) -> Arc<T> {
        self.rx.borrow_and_update().clone()
    }

    /// Wait until the value is replaced
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Whether a replacement happened since the last [`get`](Self::get)
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// The observed cell
    pub fn cell(&self) -> &ReactiveCell<T> {
        &self.cell
    }
}

impl<T: Send + Sync + 'static> Drop for CellWatch<T> {
    fn drop(&mut self) {
        self.cell.detach();
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for CellWatch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellWatch").finish_non_exhaustive()
    }
}

/// Cancels an observation or backend listener when dropped
#[must_use = "dropping a Subscription cancels it immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Subscription running `cancel` exactly once when dropped
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Subscription with nothing to cancel
    pub fn empty() -> Self {
        Self { cancel: None }
    }

    /// Cancel now
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("live", &self.cancel.is_some())
            .finish()
    }
}
