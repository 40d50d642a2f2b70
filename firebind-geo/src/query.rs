//! Region queries over a geohash field
//!
//! A [`GeoQuery`] is an [`AggregateCollection`] whose partitions are the
//! geohash ranges covering the current region. Moving the region keeps the
//! partitions (and their listeners) for ranges that still apply. Range
//! queries match whole cells, so documents outside the region are dropped by
//! a filter afterwards.

use crate::geohash;
use crate::region::{geohash_ranges, GeoRegion, GeohashRange};
use firebind_core::query::field_value;
use firebind_core::{
    AggregateCollection, AggregateState, CellWatch, CollectionOptions, CollectionRef, Context,
    Document, FilterOp, Query, QueryDescriptor, QuerySet, QuerySpec, ReactiveCell, Result,
    Source, Subscription,
};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Decides whether a document belongs to the region
pub type RegionFilter = Arc<dyn Fn(&Document, &GeoRegion) -> bool + Send + Sync>;

/// Options for a [`GeoQuery`]
#[derive(Clone)]
pub struct GeoQueryOptions {
    /// Field holding each document's geohash
    pub field: String,
    /// Template for the partition collections
    pub collection: CollectionOptions,
    /// Replaces the default in-region check
    pub filter_by: Option<RegionFilter>,
}

impl Default for GeoQueryOptions {
    fn default() -> Self {
        Self {
            field: "geohash".to_string(),
            collection: CollectionOptions::default(),
            filter_by: None,
        }
    }
}

impl GeoQueryOptions {
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    pub fn with_collection(mut self, collection: CollectionOptions) -> Self {
        self.collection = collection;
        self
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Document, &GeoRegion) -> bool + Send + Sync + 'static,
    {
        self.filter_by = Some(Arc::new(filter));
        self
    }
}

impl fmt::Debug for GeoQueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeoQueryOptions")
            .field("field", &self.field)
            .field("collection", &self.collection)
            .field("filter_by", &self.filter_by.is_some())
            .finish()
    }
}

/// Live documents inside a map region
#[derive(Clone)]
pub struct GeoQuery {
    aggregate: AggregateCollection,
    region: ReactiveCell<Option<GeoRegion>>,
}

impl GeoQuery {
    /// Query over a fixed starting region
    pub fn new(
        ctx: Context,
        source: impl Into<Source<CollectionRef>>,
        region: Option<GeoRegion>,
        options: GeoQueryOptions,
    ) -> Result<Self> {
        Self::with_region_cell(ctx, source, ReactiveCell::new(region), options)
    }

    /// Query following a region cell
    pub fn with_region_cell(
        ctx: Context,
        source: impl Into<Source<CollectionRef>>,
        region: ReactiveCell<Option<GeoRegion>>,
        options: GeoQueryOptions,
    ) -> Result<Self> {
        let field = options.field.clone();
        let queries = QuerySet::from_cell(region.clone(), move |region| {
            let ranges = region.as_ref().map(geohash_ranges).unwrap_or_default();
            debug!(field = %field, ranges = ranges.len(), "covering region");
            Some(
                ranges
                    .into_iter()
                    .map(|range| range_descriptor(&field, range))
                    .collect(),
            )
        });

        let filter_region = region.clone();
        let field = options.field.clone();
        let filter_by = options.filter_by.clone();
        let aggregate =
            AggregateCollection::with_context(ctx, source, queries, options.collection)?
                .with_filter(move |doc| match *filter_region.get() {
                    Some(region) => match &filter_by {
                        Some(filter) => filter(doc, &region),
                        None => in_region(doc, &field, &region),
                    },
                    None => false,
                });

        Ok(Self { aggregate, region })
    }

    pub fn region(&self) -> Option<GeoRegion> {
        *self.region.get()
    }

    /// Move the query; partitions for ranges that still apply are kept
    pub fn set_region(&self, region: Option<GeoRegion>) {
        self.region.set(region);
    }

    /// Ranges currently queried
    pub fn geohash_ranges(&self) -> Vec<GeohashRange> {
        self.region().as_ref().map(geohash_ranges).unwrap_or_default()
    }

    /// Documents inside the region
    pub fn docs(&self) -> Arc<Vec<Document>> {
        self.aggregate.docs()
    }

    pub fn has_docs(&self) -> bool {
        self.aggregate.has_docs()
    }

    pub fn is_loading(&self) -> bool {
        self.aggregate.is_loading()
    }

    pub fn is_loaded(&self) -> bool {
        self.aggregate.is_loaded()
    }

    /// Observe the query; partitions listen while it is observed
    pub fn observe(&self) -> CellWatch<AggregateState<Document>> {
        self.aggregate.observe()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<AggregateState<Document>>) + Send + Sync + 'static,
    {
        self.aggregate.subscribe(listener)
    }

    /// The underlying aggregate
    pub fn aggregate(&self) -> &AggregateCollection {
        &self.aggregate
    }
}

impl fmt::Debug for GeoQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeoQuery")
            .field("region", &self.region())
            .field("aggregate", &self.aggregate)
            .finish()
    }
}

fn range_descriptor(field: &str, range: GeohashRange) -> QueryDescriptor {
    let key = range.start.clone();
    let field = field.to_string();
    QueryDescriptor::new(
        key,
        QuerySpec::build(move |collection| {
            Some(
                Query::new(collection.clone())
                    .where_field(&field, FilterOp::Ge, Value::String(range.start.clone()))
                    .where_field(&field, FilterOp::Lt, Value::String(range.end.clone())),
            )
        }),
    )
}

/// Default check: the document's geohash decodes to a point inside `region`
fn in_region(doc: &Document, field: &str, region: &GeoRegion) -> bool {
    let data = doc.data();
    let Some(Value::String(hash)) = field_value(&data, field) else {
        return false;
    };
    match geohash::decode(hash) {
        Ok((latitude, longitude)) => region.contains(latitude, longitude),
        Err(_) => false,
    }
}
