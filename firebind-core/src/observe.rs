//! Observation reference counting
//!
//! Bridges "someone is watching this cell" to the owner of the cell. The
//! owner registers itself as an [`ObservationDelegate`]; the counter tells
//! the cell which delegate to call when the observer count crosses zero.

use std::fmt;
use std::sync::{Arc, Weak};

/// Receives observation transitions from a [`ReactiveCell`](crate::cell::ReactiveCell)
pub trait ObservationDelegate: Send + Sync {
    /// The first observer attached
    fn add_observer_ref(&self);

    /// The last observer detached
    fn release_observer_ref(&self);
}

/// Counts observers and hands out the delegate on 0→1 and 1→0 transitions
///
/// The counter never calls the delegate itself: callers take the returned
/// delegate, release their locks, and only then invoke it.
#[derive(Default)]
pub struct ObservationRefCounter {
    count: usize,
    delegate: Option<Weak<dyn ObservationDelegate>>,
}

impl ObservationRefCounter {
    /// Create a counter without a delegate
    pub fn new() -> Self {
        Self::default()
    }

    /// Current number of observers
    pub fn count(&self) -> usize {
        self.count
    }

    /// Register the delegate notified on transitions
    pub fn set_delegate(&mut self, delegate: Weak<dyn ObservationDelegate>) {
        self.delegate = Some(delegate);
    }

    /// Record an observer; returns the delegate if this was the first one
    pub fn attach(&mut self) -> Option<Arc<dyn ObservationDelegate>> {
        self.count += 1;
        if self.count == 1 {
            self.live_delegate()
        } else {
            None
        }
    }

    /// Remove an observer; returns the delegate if this was the last one
    pub fn detach(&mut self) -> Option<Arc<dyn ObservationDelegate>> {
        if self.count == 0 {
            return None;
        }
        self.count -= 1;
        if self.count == 0 {
            self.live_delegate()
        } else {
            None
        }
    }

    fn live_delegate(&self) -> Option<Arc<dyn ObservationDelegate>> {
        self.delegate.as_ref().and_then(Weak::upgrade)
    }
}

impl fmt::Debug for ObservationRefCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationRefCounter")
            .field("count", &self.count)
            .field("has_delegate", &self.delegate.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicIsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        refs: AtomicIsize,
    }

    impl ObservationDelegate for Recorder {
        fn add_observer_ref(&self) {
            self.refs.fetch_add(1, Ordering::SeqCst);
        }

        fn release_observer_ref(&self) {
            self.refs.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_transitions_only_at_zero() {
        let recorder = Arc::new(Recorder::default());
        let weak: Weak<dyn ObservationDelegate> = Arc::downgrade(&recorder) as _;
        let mut counter = ObservationRefCounter::new();
        counter.set_delegate(weak);

        assert!(counter.attach().is_some());
        assert!(counter.attach().is_none());
        assert!(counter.detach().is_none());
        assert!(counter.detach().is_some());
        assert_eq!(counter.count(), 0);

        // Unbalanced detach is ignored
        assert!(counter.detach().is_none());
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_dropped_delegate_is_skipped() {
        let recorder = Arc::new(Recorder::default());
        let mut counter = ObservationRefCounter::new();
        counter.set_delegate(Arc::downgrade(&recorder) as Weak<dyn ObservationDelegate>);
        drop(recorder);

        assert!(counter.attach().is_none());
        assert_eq!(counter.count(), 1);
    }
}
