//! Scenario file format
//!
//! ```yaml
//! seed:
//!   todos/1: { title: "Write docs", done: false, rank: 1 }
//! views:
//!   - name: open
//!     collection: todos
//!     query:
//!       where: [{ field: done, op: "==", value: false }]
//!       order_by: [{ field: rank }]
//!   - name: first
//!     document: todos/1
//! steps:
//!   - update: { path: todos/1, fields: { done: true } }
//!   - print: open
//! ```

use anyhow::{bail, Result};
use firebind_core::query::{Filter, OrderBy};
use firebind_core::{CollectionRef, Mode, Query};
use firebind_geo::GeoRegion;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Documents written before any view opens, keyed by path
    #[serde(default)]
    pub seed: BTreeMap<String, Value>,

    #[serde(default)]
    pub views: Vec<ViewSpec>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewSpec {
    pub name: String,
    #[serde(default)]
    pub document: Option<String>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub query: Option<QueryYaml>,
    #[serde(default)]
    pub geo: Option<GeoYaml>,
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub minimize_updates: Option<bool>,
}

/// What a view spec describes
pub enum ViewKind<'a> {
    Document(&'a str),
    Collection(&'a str, Option<&'a QueryYaml>),
    Geo(&'a GeoYaml),
}

impl ViewSpec {
    pub fn kind(&self) -> Result<ViewKind<'_>> {
        match (&self.document, &self.collection, &self.geo) {
            (Some(path), None, None) => Ok(ViewKind::Document(path)),
            (None, Some(path), None) => Ok(ViewKind::Collection(path, self.query.as_ref())),
            (None, None, Some(geo)) => Ok(ViewKind::Geo(geo)),
            _ => bail!(
                "view `{}` must set exactly one of document, collection or geo",
                self.name
            ),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryYaml {
    #[serde(default, rename = "where")]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl QueryYaml {
    pub fn build(&self, collection: &CollectionRef) -> Query {
        let mut query = Query::new(collection.clone());
        for filter in &self.filters {
            query = query.where_field(&filter.field, filter.op, filter.value.clone());
        }
        for order in &self.order_by {
            query = query.order_by(&order.field, order.direction);
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        query
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeoYaml {
    pub collection: String,
    #[serde(default)]
    pub region: Option<GeoRegion>,
    #[serde(default = "default_geohash_field")]
    pub field: String,
}

fn default_geohash_field() -> String {
    "geohash".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Write a whole document, or merge into it
    Set {
        path: String,
        data: Value,
        #[serde(default)]
        merge: bool,
    },
    /// Update fields; keys may be dotted paths
    Update { path: String, fields: Value },
    /// Create a document with a generated id
    Add { collection: String, data: Value },
    Delete { path: String },
    /// Let timers run
    WaitMs(u64),
    /// Print one view
    Print(String),
    /// Move a geo view
    Region {
        view: String,
        region: Option<GeoRegion>,
    },
}
