//! Backend context
//!
//! Every document and collection holds the [`Context`] it was created with.
//! Callers either pass one explicitly (`with_context` constructors) or
//! install a process-wide default once at startup.

use crate::activation::Mode;
use crate::backend::Backend;
use crate::config::{DebounceConfig, FirebindConfig};
use crate::error::{Error, Result};
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

static DEFAULT_CONTEXT: OnceCell<Context> = OnceCell::new();

/// Backend plus process-wide defaults
#[derive(Clone)]
pub struct Context {
    backend: Arc<dyn Backend>,
    config: Arc<FirebindConfig>,
}

impl Context {
    /// Context with default configuration
    pub fn new(backend: impl Backend) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    /// Context over an already shared backend
    pub fn from_arc(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            config: Arc::new(FirebindConfig::default()),
        }
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: FirebindConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn config(&self) -> &FirebindConfig {
        &self.config
    }

    /// `mode`, or the configured default
    pub fn mode_or_default(&self, mode: Option<Mode>) -> Mode {
        mode.unwrap_or(self.config.default_mode)
    }

    /// `debounce`, or the configured default
    pub fn debounce_or_default(&self, debounce: Option<DebounceConfig>) -> DebounceConfig {
        debounce.unwrap_or(self.config.debounce)
    }

    /// Register this context as the process-wide default
    ///
    /// Returns `false` if a default was already installed; the first one wins.
    pub fn install(self) -> bool {
        DEFAULT_CONTEXT.set(self).is_ok()
    }

    /// The process-wide default context
    pub fn global() -> Result<Context> {
        DEFAULT_CONTEXT.get().cloned().ok_or(Error::NoContext)
    }

    /// Whether two contexts share the same backend
    pub fn same_backend(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.backend, &other.backend)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
