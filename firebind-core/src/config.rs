//! Configuration and per-entity options

use crate::activation::Mode;
use crate::query::QuerySpec;
use crate::schema::Schema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// Process-wide defaults, usually loaded from `firebind.yml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirebindConfig {
    /// Mode used when options leave it unset
    #[serde(default)]
    pub default_mode: Mode,

    /// Debounce the initial cached snapshot of collections
    #[serde(default)]
    pub minimize_updates: bool,

    #[serde(default)]
    pub debounce: DebounceConfig,

    /// Emit per-entity debug traces
    #[serde(default)]
    pub debug: bool,
}

impl Default for FirebindConfig {
    fn default() -> Self {
        Self {
            default_mode: Mode::Auto,
            minimize_updates: false,
            debounce: DebounceConfig::default(),
            debug: false,
        }
    }
}

impl FirebindConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }
}

/// Timing of the initial-snapshot debounce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebounceConfig {
    /// Snapshots arriving sooner than this after listening starts are deferred
    #[serde(default = "default_detect_threshold_ms")]
    pub detect_threshold_ms: u64,

    /// How long a deferred snapshot waits for a successor
    #[serde(default = "default_debounce_delay_ms")]
    pub debounce_delay_ms: u64,
}

fn default_detect_threshold_ms() -> u64 {
    50
}

fn default_debounce_delay_ms() -> u64 {
    1000
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            detect_threshold_ms: default_detect_threshold_ms(),
            debounce_delay_ms: default_debounce_delay_ms(),
        }
    }
}

impl DebounceConfig {
    pub fn detect_threshold(&self) -> Duration {
        Duration::from_millis(self.detect_threshold_ms)
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_delay_ms)
    }
}

/// Options for a [`Document`](crate::document::Document)
#[derive(Clone, Default)]
pub struct DocumentOptions {
    /// Listening mode; falls back to the context's default
    pub mode: Option<Mode>,
    /// Validator applied to incoming and outgoing data
    pub schema: Option<Arc<dyn Schema>>,
    /// Name used in errors and traces
    pub debug_name: Option<String>,
    /// Emit debug traces for this document
    pub debug: bool,
}

impl DocumentOptions {
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_schema(mut self, schema: impl Schema + 'static) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    pub fn with_debug_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = Some(name.into());
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

impl fmt::Debug for DocumentOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentOptions")
            .field("mode", &self.mode)
            .field("schema", &self.schema.is_some())
            .field("debug_name", &self.debug_name)
            .field("debug", &self.debug)
            .finish()
    }
}

/// Options for a [`Collection`](crate::collection::Collection)
#[derive(Debug, Clone, Default)]
pub struct CollectionOptions {
    /// Listening mode; falls back to the context's default
    pub mode: Option<Mode>,
    /// How the query is derived from the reference
    pub query: QuerySpec,
    /// Debounce the initial cached snapshot; falls back to the context's default
    pub minimize_updates: Option<bool>,
    /// Debounce timing; falls back to the context's default
    pub debounce: Option<DebounceConfig>,
    /// Options handed to the document factory
    pub document: DocumentOptions,
    /// Name used in traces
    pub debug_name: Option<String>,
    /// Emit debug traces for this collection
    pub debug: bool,
}

impl CollectionOptions {
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_query(mut self, query: impl Into<QuerySpec>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_minimize_updates(mut self, enabled: bool) -> Self {
        self.minimize_updates = Some(enabled);
        self
    }

    pub fn with_debounce(mut self, debounce: DebounceConfig) -> Self {
        self.debounce = Some(debounce);
        self
    }

    pub fn with_document(mut self, document: DocumentOptions) -> Self {
        self.document = document;
        self
    }

    pub fn with_debug_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = Some(name.into());
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}
