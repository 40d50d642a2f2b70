//! Shared helpers for integration tests.
//!
//! `ManualBackend` never delivers anything on its own: tests push snapshots
//! to the open listeners explicitly, which makes ordering and timing fully
//! controllable.

#![allow(dead_code)]

use async_trait::async_trait;
use firebind_core::backend::{DocumentListener, QueryListener};
use firebind_core::error::BackendResult;
use firebind_core::{
    Backend, CollectionRef, DocumentRef, DocumentSnapshot, QuerySnapshot,
    QueryTarget, SetOptions, Subscription,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Default)]
struct ManualState {
    next_id: u64,
    query_listeners: Vec<(u64, QueryTarget, Arc<QueryListener>)>,
    document_listeners: Vec<(u64, DocumentRef, Arc<DocumentListener>)>,
    listens: usize,
    calls: Vec<String>,
}

/// Backend whose listeners are driven by the test
#[derive(Clone, Default)]
pub struct ManualBackend {
    state: Arc<Mutex<ManualState>>,
}

impl ManualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently open listeners
    pub fn open_listeners(&self) -> usize {
        let state = self.state.lock();
        state.query_listeners.len() + state.document_listeners.len()
    }

    /// Number of listeners ever opened
    pub fn total_listens(&self) -> usize {
        self.state.lock().listens
    }

    /// Names of the one-shot and write operations called so far
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Deliver `docs` to every listener on exactly `target`
    pub fn emit(&self, target: &QueryTarget, docs: &[(&str, Value)]) {
        let snapshot = query_snapshot(target.collection(), docs);
        let listeners: Vec<Arc<QueryListener>> = self
            .state
            .lock()
            .query_listeners
            .iter()
            .filter(|(_, t, _)| t == target)
            .map(|(_, _, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(Ok(snapshot.clone()));
        }
    }

    /// Deliver a snapshot to every listener on the document at `path`
    pub fn emit_document(&self, path: &str, data: Option<Value>) {
        let reference = DocumentRef::parse(path).unwrap();
        let snapshot = match data {
            Some(data) => DocumentSnapshot::new(reference.clone(), data.as_object().cloned().unwrap()),
            None => DocumentSnapshot::missing(reference.clone()),
        };
        let listeners: Vec<Arc<DocumentListener>> = self
            .state
            .lock()
            .document_listeners
            .iter()
            .filter(|(_, r, _)| r == &reference)
            .map(|(_, _, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(Ok(snapshot.clone()));
        }
    }

    fn record(&self, call: &str) {
        self.state.lock().calls.push(call.to_string());
    }
}

pub fn query_snapshot(collection: &CollectionRef, docs: &[(&str, Value)]) -> QuerySnapshot {
    QuerySnapshot::new(
        docs.iter()
            .map(|(id, data)| {
                DocumentSnapshot::new(collection.doc(id), data.as_object().cloned().unwrap())
            })
            .collect(),
    )
}

#[async_trait]
impl Backend for ManualBackend {
    async fn list_documents(&self, target: &QueryTarget) -> BackendResult<QuerySnapshot> {
        self.record("list_documents");
        Ok(query_snapshot(target.collection(), &[]))
    }

    async fn get_document(&self, reference: &DocumentRef) -> BackendResult<DocumentSnapshot> {
        self.record("get_document");
        Ok(DocumentSnapshot::missing(reference.clone()))
    }

    fn listen_query(&self, target: &QueryTarget, listener: QueryListener) -> Subscription {
        let id = {
            let mut state = self.state.lock();
            state.next_id += 1;
            state.listens += 1;
            let id = state.next_id;
            state
                .query_listeners
                .push((id, target.clone(), Arc::new(listener)));
            id
        };
        let state = self.state.clone();
        Subscription::new(move || {
            state.lock().query_listeners.retain(|(i, _, _)| *i != id);
        })
    }

    fn listen_document(&self, reference: &DocumentRef, listener: DocumentListener) -> Subscription {
        let id = {
            let mut state = self.state.lock();
            state.next_id += 1;
            state.listens += 1;
            let id = state.next_id;
            state
                .document_listeners
                .push((id, reference.clone(), Arc::new(listener)));
            id
        };
        let state = self.state.clone();
        Subscription::new(move || {
            state.lock().document_listeners.retain(|(i, _, _)| *i != id);
        })
    }

    async fn add_document(
        &self,
        collection: &CollectionRef,
        _data: Map<String, Value>,
    ) -> BackendResult<DocumentRef> {
        self.record("add_document");
        Ok(collection.doc("generated"))
    }

    async fn set_document(
        &self,
        _reference: &DocumentRef,
        _data: Map<String, Value>,
        _options: SetOptions,
    ) -> BackendResult<()> {
        self.record("set_document");
        Ok(())
    }

    async fn update_document(
        &self,
        _reference: &DocumentRef,
        _fields: Map<String, Value>,
    ) -> BackendResult<()> {
        self.record("update_document");
        Ok(())
    }

    async fn delete_document(&self, _reference: &DocumentRef) -> BackendResult<()> {
        self.record("delete_document");
        Ok(())
    }

    fn is_delete_sentinel(&self, value: &Value) -> bool {
        value == &Value::String("<delete>".to_string())
    }
}
