use firebind_core::{Context, Document, MemoryBackend};
use firebind_geo::{encode, GeoQuery, GeoQueryOptions, GeoRegion};
use serde_json::json;
use std::sync::Arc;

fn place(backend: &MemoryBackend, id: &str, latitude: f64, longitude: f64) {
    let hash = encode(latitude, longitude, 10).unwrap();
    backend
        .insert(
            &format!("places/{id}"),
            json!({"geohash": hash, "lat": latitude, "lon": longitude}),
        )
        .unwrap();
}

fn seeded() -> MemoryBackend {
    let backend = MemoryBackend::new();
    place(&backend, "dam", 52.373, 4.893);
    place(&backend, "vondelpark", 52.358, 4.868);
    // Same geohash cell as the region, but outside it
    place(&backend, "south", 52.30, 4.80);
    place(&backend, "eiffel", 48.8584, 2.2945);
    backend
}

fn ids(docs: &[Document]) -> Vec<String> {
    let mut ids: Vec<String> = docs.iter().filter_map(Document::id).collect();
    ids.sort();
    ids
}

fn amsterdam() -> GeoRegion {
    GeoRegion::new(52.37, 4.89, 0.05, 0.05)
}

#[test]
fn test_documents_inside_region() {
    let backend = seeded();
    let query = GeoQuery::new(
        Context::new(backend.clone()),
        "places",
        Some(amsterdam()),
        GeoQueryOptions::default(),
    )
    .unwrap();
    let _watch = query.observe();

    assert!(query.is_loaded());
    assert_eq!(ids(&query.docs()), vec!["dam", "vondelpark"]);

    // The out-of-region document is still fetched by its cell's range
    let fetched: usize = query
        .aggregate()
        .cols()
        .iter()
        .map(|col| col.docs().len())
        .sum();
    assert_eq!(fetched, 3);
}

#[test]
fn test_moving_region() {
    let backend = seeded();
    let query = GeoQuery::new(
        Context::new(backend.clone()),
        "places",
        Some(amsterdam()),
        GeoQueryOptions::default(),
    )
    .unwrap();
    let _watch = query.observe();
    let cols = query.aggregate().cols();

    // A small move keeps the partitions but re-filters
    query.set_region(Some(GeoRegion::new(52.38, 4.86, 0.05, 0.05)));
    assert!(Arc::ptr_eq(&cols, &query.aggregate().cols()));
    assert_eq!(ids(&query.docs()), vec!["vondelpark"]);

    query.set_region(Some(GeoRegion::new(48.8584, 2.2945, 0.02, 0.02)));
    assert_eq!(ids(&query.docs()), vec!["eiffel"]);

    query.set_region(None);
    assert!(query.docs().is_empty());
    assert!(query.geohash_ranges().is_empty());
    assert_eq!(backend.listener_count(), 0);
}

#[test]
fn test_document_moving_within_a_cell() {
    let backend = seeded();
    let query = GeoQuery::new(
        Context::new(backend.clone()),
        "places",
        Some(amsterdam()),
        GeoQueryOptions::default(),
    )
    .unwrap();
    let _watch = query.observe();
    assert_eq!(ids(&query.docs()), vec!["dam", "vondelpark"]);

    // Stays under the same range query, now inside the region
    place(&backend, "south", 52.36, 4.88);
    assert_eq!(ids(&query.docs()), vec!["dam", "south", "vondelpark"]);
}

#[test]
fn test_custom_filter_and_field() {
    let backend = MemoryBackend::new();
    backend
        .insert(
            "shops/a",
            json!({"pos": {"hash": encode(52.373, 4.893, 9).unwrap()}, "open": true}),
        )
        .unwrap();
    backend
        .insert(
            "shops/b",
            json!({"pos": {"hash": encode(52.372, 4.892, 9).unwrap()}, "open": false}),
        )
        .unwrap();

    let query = GeoQuery::new(
        Context::new(backend.clone()),
        "shops",
        Some(amsterdam()),
        GeoQueryOptions::default()
            .with_field("pos.hash")
            .with_filter(|doc, _region| doc.data()["open"] == json!(true)),
    )
    .unwrap();
    let _watch = query.observe();
    assert_eq!(ids(&query.docs()), vec!["a"]);
}
