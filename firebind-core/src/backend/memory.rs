//! In-process backend
//!
//! A complete [`Backend`] over an in-memory store. Listeners receive their
//! initial snapshot synchronously from `listen_*` and every later change
//! synchronously from the write that caused it, which makes behaviour
//! deterministic in tests and in the CLI's scenario replays. Artificial
//! latency and failure injection simulate a remote datastore.

use super::{Backend, DocumentListener, QueryListener, SetOptions};
use crate::cell::Subscription;
use crate::error::{BackendError, BackendResult, Result};
use crate::merge;
use crate::query::QueryTarget;
use crate::reference::{CollectionRef, DocumentRef};
use crate::snapshot::{DocumentSnapshot, QuerySnapshot, SnapshotMetadata};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const DELETE_MARKER_KEY: &str = "__firebind_op__";

/// Marker value deleting a field in `update` and merging `set`
pub fn delete_field() -> Value {
    json!({ DELETE_MARKER_KEY: "delete" })
}

fn is_delete_marker(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| map.len() == 1 && map.get(DELETE_MARKER_KEY) == Some(&json!("delete")))
}

#[derive(Debug, Clone)]
struct StoredDocument {
    data: Map<String, Value>,
    update_time: DateTime<Utc>,
}

enum Delivery {
    Document(Arc<DocumentListener>, BackendResult<DocumentSnapshot>),
    Query(Arc<QueryListener>, BackendResult<QuerySnapshot>),
}

impl Delivery {
    fn run(self) {
        match self {
            Delivery::Document(listener, result) => listener(result),
            Delivery::Query(listener, result) => listener(result),
        }
    }
}

#[derive(Default)]
struct Store {
    collections: BTreeMap<CollectionRef, BTreeMap<String, StoredDocument>>,
    next_listener: u64,
    document_listeners: BTreeMap<u64, (DocumentRef, Arc<DocumentListener>)>,
    query_listeners: BTreeMap<u64, (QueryTarget, Arc<QueryListener>)>,
    failure: Option<BackendError>,
    latency: Option<Duration>,
}

impl Store {
    fn stored(&self, reference: &DocumentRef) -> Option<&StoredDocument> {
        self.collections
            .get(&reference.parent())
            .and_then(|docs| docs.get(reference.id()))
    }

    fn document_snapshot(&self, reference: &DocumentRef) -> DocumentSnapshot {
        match self.stored(reference) {
            Some(stored) => DocumentSnapshot::new(reference.clone(), stored.data.clone())
                .with_metadata(SnapshotMetadata {
                    update_time: Some(stored.update_time),
                    ..SnapshotMetadata::default()
                }),
            None => DocumentSnapshot::missing(reference.clone()),
        }
    }

    fn query_snapshot(&self, target: &QueryTarget) -> QuerySnapshot {
        let collection = target.collection();
        let Some(docs) = self.collections.get(collection) else {
            return QuerySnapshot::default();
        };

        let mut matching: Vec<(&String, &StoredDocument)> = match target {
            QueryTarget::Collection(_) => docs.iter().collect(),
            QueryTarget::Query(query) => docs
                .iter()
                .filter(|(_, stored)| query.matches(&stored.data))
                .collect(),
        };

        if let QueryTarget::Query(query) = target {
            matching.sort_by(|(a_id, a), (b_id, b)| {
                query.compare((a_id.as_str(), &a.data), (b_id.as_str(), &b.data))
            });
            if let Some(limit) = query.max_results() {
                matching.truncate(limit);
            }
        }

        QuerySnapshot::new(
            matching
                .into_iter()
                .map(|(id, stored)| {
                    DocumentSnapshot::new(collection.doc(id), stored.data.clone()).with_metadata(
                        SnapshotMetadata {
                            update_time: Some(stored.update_time),
                            ..SnapshotMetadata::default()
                        },
                    )
                })
                .collect(),
        )
    }

    /// Store (or remove) a document and collect the notifications it causes
    fn write(&mut self, reference: &DocumentRef, data: Option<Map<String, Value>>) -> Vec<Delivery> {
        let collection = reference.parent();
        match data {
            Some(data) => {
                self.collections.entry(collection.clone()).or_default().insert(
                    reference.id().to_string(),
                    StoredDocument {
                        data,
                        update_time: Utc::now(),
                    },
                );
            }
            None => {
                if let Some(docs) = self.collections.get_mut(&collection) {
                    docs.remove(reference.id());
                    if docs.is_empty() {
                        self.collections.remove(&collection);
                    }
                }
            }
        }

        let mut deliveries = Vec::new();
        for (watched, listener) in self.document_listeners.values() {
            if watched == reference {
                deliveries.push(Delivery::Document(
                    listener.clone(),
                    Ok(self.document_snapshot(watched)),
                ));
            }
        }
        for (target, listener) in self.query_listeners.values() {
            if target.collection() == &collection {
                deliveries.push(Delivery::Query(
                    listener.clone(),
                    Ok(self.query_snapshot(target)),
                ));
            }
        }
        deliveries
    }
}

/// In-memory datastore implementing [`Backend`]
#[derive(Clone, Default)]
pub struct MemoryBackend {
    store: Arc<Mutex<Store>>,
}

impl MemoryBackend {
    /// Empty store without latency
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every async operation by `latency`
    pub fn with_latency(self, latency: Duration) -> Self {
        self.store.lock().latency = Some(latency);
        self
    }

    /// Make every async operation fail with `failure` until cleared
    pub fn set_failure(&self, failure: Option<BackendError>) {
        self.store.lock().failure = failure;
    }

    /// Write a document synchronously, notifying listeners
    pub fn insert(&self, path: &str, data: Value) -> Result<DocumentRef> {
        let reference = DocumentRef::parse(path)?;
        let data = match data {
            Value::Object(map) => map,
            other => {
                return Err(BackendError::InvalidArgument(format!(
                    "document data must be a map, got {other}"
                ))
                .into())
            }
        };
        self.commit(&reference, Some(data));
        Ok(reference)
    }

    /// Delete a document synchronously, notifying listeners
    pub fn remove(&self, path: &str) -> Result<()> {
        let reference = DocumentRef::parse(path)?;
        self.commit(&reference, None);
        Ok(())
    }

    /// Current data of a document
    pub fn get(&self, path: &str) -> Option<Map<String, Value>> {
        let reference = DocumentRef::parse(path).ok()?;
        self.store.lock().stored(&reference).map(|stored| stored.data.clone())
    }

    /// Number of open realtime listeners
    pub fn listener_count(&self) -> usize {
        let store = self.store.lock();
        store.document_listeners.len() + store.query_listeners.len()
    }

    /// Deliver `error` to every open listener
    pub fn broadcast_error(&self, error: BackendError) {
        let deliveries: Vec<Delivery> = {
            let store = self.store.lock();
            store
                .document_listeners
                .values()
                .map(|(_, listener)| Delivery::Document(listener.clone(), Err(error.clone())))
                .chain(
                    store
                        .query_listeners
                        .values()
                        .map(|(_, listener)| Delivery::Query(listener.clone(), Err(error.clone()))),
                )
                .collect()
        };
        deliveries.into_iter().for_each(Delivery::run);
    }

    fn commit(&self, reference: &DocumentRef, data: Option<Map<String, Value>>) {
        let deliveries = self.store.lock().write(reference, data);
        deliveries.into_iter().for_each(Delivery::run);
    }

    /// Read the current data and store its successor under one lock
    fn commit_with<F>(&self, reference: &DocumentRef, next: F) -> BackendResult<()>
    where
        F: FnOnce(Option<&Map<String, Value>>) -> BackendResult<Map<String, Value>>,
    {
        let deliveries = {
            let mut store = self.store.lock();
            let data = next(store.stored(reference).map(|stored| &stored.data))?;
            store.write(reference, Some(data))
        };
        deliveries.into_iter().for_each(Delivery::run);
        Ok(())
    }

    async fn round_trip(&self) -> BackendResult<()> {
        let (latency, failure) = {
            let store = self.store.lock();
            (store.latency, store.failure.clone())
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    fn register<F>(&self, insert: F) -> Subscription
    where
        F: FnOnce(&mut Store, u64) -> Delivery,
    {
        let (id, initial) = {
            let mut store = self.store.lock();
            store.next_listener += 1;
            let id = store.next_listener;
            let initial = insert(&mut store, id);
            (id, initial)
        };
        initial.run();

        let store = Arc::downgrade(&self.store);
        Subscription::new(move || {
            if let Some(store) = store.upgrade() {
                let mut store = store.lock();
                store.document_listeners.remove(&id);
                store.query_listeners.remove(&id);
            }
        })
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn list_documents(&self, target: &QueryTarget) -> BackendResult<QuerySnapshot> {
        self.round_trip().await?;
        Ok(self.store.lock().query_snapshot(target))
    }

    async fn get_document(&self, reference: &DocumentRef) -> BackendResult<DocumentSnapshot> {
        self.round_trip().await?;
        Ok(self.store.lock().document_snapshot(reference))
    }

    fn listen_query(&self, target: &QueryTarget, listener: QueryListener) -> Subscription {
        let target = target.clone();
        self.register(move |store, id| {
            let listener = Arc::new(listener);
            let initial = Ok(store.query_snapshot(&target));
            store.query_listeners.insert(id, (target, listener.clone()));
            Delivery::Query(listener, initial)
        })
    }

    fn listen_document(&self, reference: &DocumentRef, listener: DocumentListener) -> Subscription {
        let reference = reference.clone();
        self.register(move |store, id| {
            let listener = Arc::new(listener);
            let initial = Ok(store.document_snapshot(&reference));
            store
                .document_listeners
                .insert(id, (reference, listener.clone()));
            Delivery::Document(listener, initial)
        })
    }

    async fn add_document(
        &self,
        collection: &CollectionRef,
        data: Map<String, Value>,
    ) -> BackendResult<DocumentRef> {
        self.round_trip().await?;
        let reference = collection.doc(&Uuid::new_v4().simple().to_string());
        self.commit(&reference, Some(merge::strip_deletes(&data, is_delete_marker)));
        Ok(reference)
    }

    async fn set_document(
        &self,
        reference: &DocumentRef,
        data: Map<String, Value>,
        options: SetOptions,
    ) -> BackendResult<()> {
        self.round_trip().await?;
        if !options.merge {
            self.commit(reference, Some(merge::strip_deletes(&data, is_delete_marker)));
            return Ok(());
        }
        self.commit_with(reference, |current| {
            let empty = Map::new();
            Ok(merge::merge_set(
                current.unwrap_or(&empty),
                &data,
                is_delete_marker,
            ))
        })
    }

    async fn update_document(
        &self,
        reference: &DocumentRef,
        fields: Map<String, Value>,
    ) -> BackendResult<()> {
        self.round_trip().await?;
        self.commit_with(reference, |current| {
            let current =
                current.ok_or_else(|| BackendError::NotFound(reference.path().to_string()))?;
            Ok(merge::apply_update(current, &fields, is_delete_marker))
        })
    }

    async fn delete_document(&self, reference: &DocumentRef) -> BackendResult<()> {
        self.round_trip().await?;
        self.commit(reference, None);
        Ok(())
    }

    fn is_delete_sentinel(&self, value: &Value) -> bool {
        is_delete_marker(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Direction, FilterOp, Query};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn todos() -> CollectionRef {
        CollectionRef::parse("todos").unwrap()
    }

    #[tokio::test]
    async fn test_query_evaluation() {
        let backend = MemoryBackend::new();
        backend.insert("todos/a", json!({"rank": 2, "done": false})).unwrap();
        backend.insert("todos/b", json!({"rank": 1, "done": false})).unwrap();
        backend.insert("todos/c", json!({"rank": 3, "done": true})).unwrap();

        let query = Query::new(todos())
            .where_field("done", FilterOp::Eq, json!(false))
            .order_by("rank", Direction::Asc);
        let snapshot = backend
            .list_documents(&QueryTarget::Query(query))
            .await
            .unwrap();
        let ids: Vec<&str> = snapshot.docs().iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let all = backend
            .list_documents(&QueryTarget::Collection(todos()))
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_document_is_not_an_error() {
        let backend = MemoryBackend::new();
        let reference = DocumentRef::parse("todos/none").unwrap();
        let snapshot = backend.get_document(&reference).await.unwrap();
        assert!(!snapshot.exists());
    }

    #[tokio::test]
    async fn test_writes() {
        let backend = MemoryBackend::new();
        let reference = backend
            .add_document(&todos(), json!({"title": "a", "meta": {"x": 1}}).as_object().cloned().unwrap())
            .await
            .unwrap();
        assert_eq!(reference.parent(), todos());

        let mut fields = Map::new();
        fields.insert("meta.x".into(), delete_field());
        fields.insert("done".into(), json!(true));
        backend.update_document(&reference, fields).await.unwrap();
        assert_eq!(
            Value::Object(backend.get(reference.path()).unwrap()),
            json!({"title": "a", "done": true, "meta": {}})
        );

        let missing = DocumentRef::parse("todos/missing").unwrap();
        assert_eq!(
            backend.update_document(&missing, Map::new()).await,
            Err(BackendError::NotFound("todos/missing".into()))
        );

        backend.delete_document(&reference).await.unwrap();
        assert!(backend.get(reference.path()).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_keep_every_field() {
        let backend = MemoryBackend::new();
        backend.insert("todos/1", json!({})).unwrap();
        let reference = todos().doc("1");

        let writers: Vec<_> = (0..32)
            .map(|n| {
                let backend = backend.clone();
                let reference = reference.clone();
                tokio::spawn(async move {
                    let fields = json!({ format!("f{n}"): n });
                    backend
                        .update_document(&reference, fields.as_object().unwrap().clone())
                        .await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let stored = backend.get("todos/1").unwrap();
        assert_eq!(stored.len(), 32);
        assert_eq!(stored["f31"], json!(31));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let backend = MemoryBackend::new();
        backend.set_failure(Some(BackendError::Unavailable("offline".into())));
        let result = backend.list_documents(&QueryTarget::Collection(todos())).await;
        assert!(matches!(result, Err(BackendError::Unavailable(_))));

        backend.set_failure(None);
        assert!(backend.list_documents(&QueryTarget::Collection(todos())).await.is_ok());
    }

    #[test]
    fn test_listeners_receive_initial_and_changes() {
        let backend = MemoryBackend::new();
        backend.insert("todos/a", json!({"n": 1})).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let sub = backend.listen_query(
            &QueryTarget::Collection(todos()),
            Box::new(move |result| {
                assert!(result.is_ok());
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.listener_count(), 1);

        backend.insert("todos/b", json!({"n": 2})).unwrap();
        backend.insert("other/x", json!({"n": 3})).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        drop(sub);
        assert_eq!(backend.listener_count(), 0);
        backend.insert("todos/c", json!({"n": 4})).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_delete_sentinel() {
        let backend = MemoryBackend::new();
        assert!(backend.is_delete_sentinel(&delete_field()));
        assert!(!backend.is_delete_sentinel(&json!({"other": "delete"})));
    }
}
