//! Initial-snapshot debounce
//!
//! Realtime listeners often deliver a cached snapshot right after opening,
//! followed shortly by the server's. When enabled, a [`Debouncer`] holds
//! back snapshots that arrive within the detect threshold of the listener
//! starting and releases only the latest one once the debounce delay passes
//! without a newer arrival. A snapshot arriving after the threshold is
//! applied at once and discards whatever is held.

use crate::config::DebounceConfig;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// What to do with an offered value
#[derive(Debug)]
pub enum Offer<T> {
    /// Apply now
    Apply(T),
    /// Held back; arm a timer for `delay` and call [`Debouncer::take_due`] with `seq`
    Defer { seq: u64, delay: Duration },
}

/// Debounce state for one listener cycle
#[derive(Debug)]
pub struct Debouncer<T> {
    config: DebounceConfig,
    enabled: bool,
    started_at: Option<Instant>,
    settled: bool,
    pending: Option<T>,
    timer: Option<JoinHandle<()>>,
    seq: u64,
}

impl<T> Debouncer<T> {
    pub fn new(config: DebounceConfig, enabled: bool) -> Self {
        Self {
            config,
            enabled,
            started_at: None,
            settled: false,
            pending: None,
            timer: None,
            seq: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// A listener (re)started
    pub fn restart(&mut self) {
        self.cancel();
        self.started_at = Some(Instant::now());
        self.settled = false;
    }

    /// Drop any held value and its timer
    pub fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.pending = None;
        self.seq += 1;
    }

    /// Offer a freshly received value
    pub fn offer(&mut self, value: T) -> Offer<T> {
        if !self.enabled || self.settled {
            return Offer::Apply(value);
        }

        let early = self
            .started_at
            .is_some_and(|started| started.elapsed() < self.config.detect_threshold());
        if !early {
            // Past the threshold: supersedes anything held back
            if let Some(timer) = self.timer.take() {
                timer.abort();
            }
            self.seq += 1;
            self.pending = None;
            self.settled = true;
            return Offer::Apply(value);
        }

        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.seq += 1;
        self.pending = Some(value);
        Offer::Defer {
            seq: self.seq,
            delay: self.config.debounce_delay(),
        }
    }

    /// Keep the timer task so a newer offer can abort it
    pub fn arm(&mut self, seq: u64, timer: JoinHandle<()>) {
        if seq == self.seq {
            self.timer = Some(timer);
        } else {
            timer.abort();
        }
    }

    /// The held value, if `seq` is still the latest deferral
    pub fn take_due(&mut self, seq: u64) -> Option<T> {
        if seq != self.seq {
            return None;
        }
        self.timer = None;
        let value = self.pending.take()?;
        self.settled = true;
        Some(value)
    }

    /// Give up on deferring and hand back the held value
    pub fn flush(&mut self) -> Option<T> {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.seq += 1;
        self.settled = true;
        self.pending.take()
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
