//! Listener activation state machine
//!
//! Decides from mode, observer count, collection ownership and reference
//! presence whether a realtime listener should be open. Transitions are
//! returned to the caller, which performs the subscribe/unsubscribe work
//! after releasing its locks.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// When a document or collection listens for realtime updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Never listen; data only changes through `fetch`
    Off,
    /// Always listen while a reference is available
    On,
    /// Listen while observed
    #[default]
    Auto,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(Mode::Off),
            "on" => Ok(Mode::On),
            "auto" => Ok(Mode::Auto),
            other => Err(Error::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Off => "off",
            Mode::On => "on",
            Mode::Auto => "auto",
        })
    }
}

/// Work the owner must perform after a state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing to do
    None,
    /// Open a listener
    Start,
    /// Close the listener
    Stop,
    /// Close the listener and open a new one for a changed reference
    Restart,
}

/// Activation state of one document or collection
#[derive(Debug, Clone, Default)]
pub struct Activation {
    mode: Mode,
    observed: usize,
    owners: usize,
    claimed: bool,
    has_ref: bool,
    active: bool,
}

impl Activation {
    /// Inactive state in the given mode
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Inactive state for an entity built on behalf of a collection
    ///
    /// Stays suppressed until the first owner attaches, so the entity never
    /// opens a listener of its own in between.
    pub fn claimed(mode: Mode) -> Self {
        Self {
            mode,
            claimed: true,
            ..Self::default()
        }
    }

    /// Current mode
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Number of observers
    pub fn observed(&self) -> usize {
        self.observed
    }

    /// Number of collections owning the entity
    pub fn owners(&self) -> usize {
        self.owners
    }

    /// Whether a reference resolved
    pub fn has_ref(&self) -> bool {
        self.has_ref
    }

    /// Whether a listener is open
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether a listener should be open
    pub fn desired(&self) -> bool {
        if self.owners > 0 || self.claimed || !self.has_ref {
            return false;
        }
        match self.mode {
            Mode::Off => false,
            Mode::On => true,
            Mode::Auto => self.observed > 0,
        }
    }

    /// An observer attached
    pub fn add_observer(&mut self) -> Transition {
        self.observed += 1;
        if self.observed == 1 {
            self.recompute(false)
        } else {
            Transition::None
        }
    }

    /// An observer detached
    pub fn release_observer(&mut self) -> Transition {
        if self.observed == 0 {
            return Transition::None;
        }
        self.observed -= 1;
        if self.observed == 0 {
            self.recompute(false)
        } else {
            Transition::None
        }
    }

    /// A collection took ownership; returns the new owner count
    pub fn add_owner(&mut self) -> (usize, Transition) {
        self.owners += 1;
        self.claimed = false;
        let transition = if self.owners == 1 {
            self.recompute(false)
        } else {
            Transition::None
        };
        (self.owners, transition)
    }

    /// A collection released ownership; returns the new owner count
    pub fn release_owner(&mut self) -> (usize, Transition) {
        if self.owners == 0 {
            return (0, Transition::None);
        }
        self.owners -= 1;
        let transition = if self.owners == 0 {
            self.recompute(false)
        } else {
            Transition::None
        };
        (self.owners, transition)
    }

    /// Switch mode; unchanged modes are a no-op
    pub fn set_mode(&mut self, mode: Mode) -> Transition {
        if self.mode == mode {
            return Transition::None;
        }
        self.mode = mode;
        self.recompute(false)
    }

    /// The reference was replaced; an open listener is always restarted
    pub fn reference_changed(&mut self, has_ref: bool) -> Transition {
        self.has_ref = has_ref;
        self.recompute(true)
    }

    /// Bring `active` in line with `desired`
    pub fn recompute(&mut self, force: bool) -> Transition {
        let desired = self.desired();
        let transition = match (self.active, desired) {
            (false, true) => Transition::Start,
            (true, false) => Transition::Stop,
            (true, true) if force => Transition::Restart,
            _ => Transition::None,
        };
        self.active = desired;
        transition
    }
}
