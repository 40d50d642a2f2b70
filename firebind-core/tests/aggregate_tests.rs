//! End-to-end tests for aggregate collections.

mod common;

use common::ManualBackend;
use firebind_core::{
    AggregateCollection, CollectionOptions, CollectionRef, Context, Document, FilterOp,
    MemoryBackend, Query, QueryDescriptor, QuerySet, QueryTarget, ReactiveCell,
};
use serde_json::json;

fn places() -> CollectionRef {
    CollectionRef::parse("places").unwrap()
}

fn shard(key: &str) -> Query {
    Query::new(places()).where_field("shard", FilterOp::Eq, json!(key))
}

fn shard_target(key: &str) -> QueryTarget {
    QueryTarget::Query(shard(key))
}

fn sharded(backend: &ManualBackend, keys: &ReactiveCell<Vec<String>>) -> AggregateCollection {
    let queries = QuerySet::from_cell(keys.clone(), |keys: &Vec<String>| {
        Some(
            keys.iter()
                .map(|key| QueryDescriptor::new(key, shard(key)))
                .collect(),
        )
    });
    AggregateCollection::with_context(
        Context::new(backend.clone()),
        "places",
        queries,
        CollectionOptions::default(),
    )
    .unwrap()
}

fn keys(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn ids(docs: &[Document]) -> Vec<String> {
    docs.iter().filter_map(Document::id).collect()
}

fn find(docs: &[Document], id: &str) -> Document {
    docs.iter()
        .find(|doc| doc.id().as_deref() == Some(id))
        .cloned()
        .unwrap()
}

#[test]
fn test_partitions_listen_while_observed() {
    let backend = ManualBackend::new();
    let input = ReactiveCell::new(keys(&["a", "b"]));
    let aggregate = sharded(&backend, &input);
    assert_eq!(backend.open_listeners(), 0);

    let watch = aggregate.observe();
    assert_eq!(aggregate.cols().len(), 2);
    assert_eq!(backend.open_listeners(), 2);
    assert!(aggregate.is_loading());

    backend.emit(&shard_target("a"), &[("x", json!({"shard": "a"}))]);
    backend.emit(&shard_target("b"), &[("y", json!({"shard": "b"}))]);
    assert!(aggregate.is_loaded());
    assert_eq!(ids(&aggregate.docs()), vec!["x", "y"]);

    drop(watch);
    assert_eq!(backend.open_listeners(), 0);
}

#[test]
fn test_partitions_and_documents_are_recycled() {
    let backend = ManualBackend::new();
    let input = ReactiveCell::new(keys(&["a", "b"]));
    let aggregate = sharded(&backend, &input);
    let _watch = aggregate.observe();

    backend.emit(&shard_target("a"), &[("x", json!({"shard": "a"}))]);
    backend.emit(&shard_target("b"), &[("y", json!({"shard": "b"}))]);
    let (b_before, x_before) = {
        let cols = aggregate.cols();
        (cols[1].clone(), find(&cols[0].docs(), "x"))
    };

    input.set(keys(&["b", "c"]));
    assert_eq!(backend.open_listeners(), 2);
    {
        let cols = aggregate.cols();
        assert_eq!(cols.len(), 2);
        assert!(cols[0].ptr_eq(&b_before));
    }

    // x moved from shard a to shard c
    backend.emit(&shard_target("c"), &[("x", json!({"shard": "c"}))]);
    let cols = aggregate.cols();
    let x_after = find(&cols[1].docs(), "x");
    assert!(x_after.ptr_eq(&x_before));
    assert_eq!(x_after.data()["shard"], json!("c"));
    drop(cols);
    assert_eq!(x_before.collection_ref_count(), 1);
}

#[test]
fn test_loading_partition_holds_previous_result() {
    let backend = ManualBackend::new();
    let input = ReactiveCell::new(keys(&["a"]));
    let aggregate = sharded(&backend, &input);
    let _watch = aggregate.observe();

    backend.emit(
        &shard_target("a"),
        &[("x", json!({"shard": "a"})), ("y", json!({"shard": "a"}))],
    );
    let loaded = aggregate.docs();
    assert_eq!(ids(&loaded), vec!["x", "y"]);

    input.set(keys(&["a", "b"]));
    assert!(aggregate.is_loading());
    assert_eq!(ids(&aggregate.docs()), vec!["x", "y"]);

    backend.emit(&shard_target("b"), &[("z", json!({"shard": "b"}))]);
    assert!(!aggregate.is_loading());
    assert_eq!(ids(&aggregate.docs()), vec!["x", "y", "z"]);
}

#[test]
fn test_filter_and_order() {
    let backend = MemoryBackend::new();
    backend
        .insert("places/p1", json!({"shard": "a", "rank": 3}))
        .unwrap();
    backend
        .insert("places/p2", json!({"shard": "b", "rank": 1}))
        .unwrap();
    backend
        .insert("places/p3", json!({"shard": "b", "rank": 2, "hidden": true}))
        .unwrap();

    let aggregate = AggregateCollection::with_context(
        Context::new(backend.clone()),
        "places",
        QuerySet::fixed(vec![
            QueryDescriptor::new("a", shard("a")),
            QueryDescriptor::new("b", shard("b")),
        ]),
        CollectionOptions::default(),
    )
    .unwrap()
    .with_filter(|doc: &Document| !doc.data().contains_key("hidden"))
    .with_order(|a: &Document, b: &Document| {
        a.data()["rank"].as_i64().cmp(&b.data()["rank"].as_i64())
    });

    let _watch = aggregate.observe();
    assert_eq!(ids(&aggregate.docs()), vec!["p2", "p1"]);

    // Memoized while nothing changes
    let first = aggregate.docs();
    assert!(std::sync::Arc::ptr_eq(&first, &aggregate.docs()));

    backend.remove("places/p3").unwrap();
    backend
        .insert("places/p4", json!({"shard": "a", "rank": 0}))
        .unwrap();
    assert_eq!(ids(&aggregate.docs()), vec!["p4", "p2", "p1"]);
}

#[test]
fn test_field_change_reorders_and_refilters() {
    let backend = MemoryBackend::new();
    backend
        .insert("places/p1", json!({"shard": "a", "rank": 1}))
        .unwrap();
    backend
        .insert("places/p2", json!({"shard": "a", "rank": 2}))
        .unwrap();

    let aggregate = AggregateCollection::with_context(
        Context::new(backend.clone()),
        "places",
        QuerySet::fixed(vec![QueryDescriptor::new("a", shard("a"))]),
        CollectionOptions::default(),
    )
    .unwrap()
    .with_filter(|doc: &Document| !doc.data().contains_key("hidden"))
    .with_order(|a: &Document, b: &Document| {
        a.data()["rank"].as_i64().cmp(&b.data()["rank"].as_i64())
    });

    let _watch = aggregate.observe();
    let container = aggregate.cols()[0].docs();
    assert_eq!(ids(&aggregate.docs()), vec!["p1", "p2"]);

    // Same members, new field values
    backend
        .insert("places/p1", json!({"shard": "a", "rank": 5}))
        .unwrap();
    assert!(std::sync::Arc::ptr_eq(&container, &aggregate.cols()[0].docs()));
    assert_eq!(ids(&aggregate.docs()), vec!["p2", "p1"]);

    backend
        .insert("places/p2", json!({"shard": "a", "rank": 2, "hidden": true}))
        .unwrap();
    assert_eq!(ids(&aggregate.docs()), vec!["p1"]);
}

#[test]
fn test_empty_query_set_keeps_partitions() {
    let backend = ManualBackend::new();
    let input: ReactiveCell<Option<Vec<String>>> = ReactiveCell::new(Some(keys(&["a"])));
    let aggregate = AggregateCollection::with_context(
        Context::new(backend.clone()),
        "places",
        QuerySet::from_cell(input.clone(), |keys: &Option<Vec<String>>| {
            keys.as_ref().map(|keys| {
                keys.iter()
                    .map(|key| QueryDescriptor::new(key, shard(key)))
                    .collect()
            })
        }),
        CollectionOptions::default(),
    )
    .unwrap();

    let _watch = aggregate.observe();
    let before = aggregate.cols();
    input.set(None);
    assert!(std::sync::Arc::ptr_eq(&before, &aggregate.cols()));
}
