//! Collection snapshot reconciliation
//!
//! Turns a query snapshot into an ordered list of entities, reusing the
//! entity already registered for each id so that identities survive across
//! snapshots. Ownership counts are adjusted in both directions: every entity
//! in the new list gains a collection ref, every entity of the previous list
//! loses one.

use crate::entity::CollectionEntity;
use crate::error::Result;
use crate::snapshot::{DocumentSnapshot, QuerySnapshot};
use std::collections::HashMap;
use tracing::warn;

/// Outcome of one reconciliation pass
#[derive(Debug)]
pub struct Reconciled<D> {
    /// Entities in snapshot order
    pub docs: Vec<D>,
    /// Some entity kept from before changed its data in place
    pub updated: bool,
}

/// Reconcile `snapshot` against the entities in `lookup`
///
/// `None` means "force empty". Entities `make` fails to build are logged and
/// left out; they never abort the pass.
pub fn reconcile_entities<D, F>(
    lookup: &mut HashMap<String, D>,
    previous: &[D],
    snapshot: Option<&QuerySnapshot>,
    mut make: F,
) -> Reconciled<D>
where
    D: CollectionEntity,
    F: FnMut(&DocumentSnapshot) -> Result<D>,
{
    let incoming = snapshot.map(QuerySnapshot::docs).unwrap_or_default();
    let mut next = Vec::with_capacity(incoming.len());
    let mut updated = false;

    for doc in incoming {
        let entity = match lookup.get(doc.id()) {
            Some(existing) => {
                updated |= existing.update_from_snapshot(doc);
                existing.clone()
            }
            None => match make(doc) {
                Ok(entity) => {
                    lookup.insert(doc.id().to_string(), entity.clone());
                    entity
                }
                Err(err) => {
                    warn!(path = %doc.reference(), %err, "dropping document from snapshot");
                    continue;
                }
            },
        };
        entity.add_collection_ref();
        next.push(entity);
    }

    for entity in previous {
        if entity.release_collection_ref() == 0 {
            let id = entity.id();
            if lookup.get(&id).is_some_and(|current| current.ptr_eq(entity)) {
                lookup.remove(&id);
            }
        }
    }

    Reconciled {
        docs: next,
        updated,
    }
}

/// Whether two lists hold the same entities in the same order
pub fn same_sequence<D: CollectionEntity>(a: &[D], b: &[D]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.ptr_eq(y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::reference::CollectionRef;
    use parking_lot::Mutex;
    use serde_json::{json, Map, Value};
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct Recorder {
        id: String,
        owners: Mutex<usize>,
        updates: Mutex<Vec<Map<String, Value>>>,
    }

    #[derive(Debug, Clone)]
    struct TestEntity(Arc<Recorder>);

    impl TestEntity {
        fn owners(&self) -> usize {
            *self.0.owners.lock()
        }
    }

    impl CollectionEntity for TestEntity {
        fn id(&self) -> String {
            self.0.id.clone()
        }

        fn add_collection_ref(&self) -> usize {
            let mut owners = self.0.owners.lock();
            *owners += 1;
            *owners
        }

        fn release_collection_ref(&self) -> usize {
            let mut owners = self.0.owners.lock();
            *owners = owners.saturating_sub(1);
            *owners
        }

        fn update_from_snapshot(&self, snapshot: &DocumentSnapshot) -> bool {
            let data = snapshot.data().cloned().unwrap_or_default();
            let mut updates = self.0.updates.lock();
            let changed = updates.last() != Some(&data);
            updates.push(data);
            changed
        }

        fn ptr_eq(&self, other: &Self) -> bool {
            Arc::ptr_eq(&self.0, &other.0)
        }
    }

    fn snapshot(docs: &[(&str, Value)]) -> QuerySnapshot {
        let todos = CollectionRef::parse("todos").unwrap();
        QuerySnapshot::new(
            docs.iter()
                .map(|(id, data)| {
                    DocumentSnapshot::new(todos.doc(id), data.as_object().cloned().unwrap())
                })
                .collect(),
        )
    }

    fn make(doc: &DocumentSnapshot) -> Result<TestEntity> {
        Ok(TestEntity(Arc::new(Recorder {
            id: doc.id().to_string(),
            ..Recorder::default()
        })))
    }

    #[test]
    fn test_identity_is_preserved_for_known_ids() {
        let mut lookup = HashMap::new();
        let first = reconcile_entities(
            &mut lookup,
            &[],
            Some(&snapshot(&[("1", json!({})), ("2", json!({"n": 1}))])),
            make,
        )
        .docs;
        let second = reconcile_entities(
            &mut lookup,
            &first,
            Some(&snapshot(&[("1", json!({})), ("2", json!({"n": 2}))])),
            make,
        )
        .docs;

        assert!(same_sequence(&first, &second));
        assert_eq!(second[1].0.updates.lock().len(), 1);
        assert!(second.iter().all(|e| e.owners() == 1));
    }

    #[test]
    fn test_in_place_changes_are_reported() {
        let mut lookup = HashMap::new();
        let docs = snapshot(&[("1", json!({"n": 1}))]);
        let first = reconcile_entities(&mut lookup, &[], Some(&docs), make).docs;
        let changed = reconcile_entities(&mut lookup, &first, Some(&docs), make);
        assert!(changed.updated);

        let repeated = reconcile_entities(&mut lookup, &changed.docs, Some(&docs), make);
        assert!(!repeated.updated);
        assert!(same_sequence(&first, &repeated.docs));
    }

    #[test]
    fn test_removed_entities_leave_lookup() {
        let mut lookup = HashMap::new();
        let first = reconcile_entities(
            &mut lookup,
            &[],
            Some(&snapshot(&[("1", json!({})), ("2", json!({}))])),
            make,
        )
        .docs;
        let second = reconcile_entities(
            &mut lookup,
            &first,
            Some(&snapshot(&[("2", json!({})), ("3", json!({}))])),
            make,
        )
        .docs;

        assert_eq!(first[0].owners(), 0);
        assert!(!lookup.contains_key("1"));
        assert!(second[0].ptr_eq(&first[1]));
        assert_eq!(lookup.len(), 2);
    }

    #[test]
    fn test_force_empty_releases_everything() {
        let mut lookup = HashMap::new();
        let first =
            reconcile_entities(&mut lookup, &[], Some(&snapshot(&[("1", json!({}))])), make).docs;
        let next = reconcile_entities(&mut lookup, &first, None, make).docs;
        assert!(next.is_empty());
        assert!(lookup.is_empty());
        assert_eq!(first[0].owners(), 0);
    }

    #[test]
    fn test_factory_errors_skip_the_document() {
        let mut lookup = HashMap::new();
        let next = reconcile_entities(
            &mut lookup,
            &[],
            Some(&snapshot(&[("bad", json!({})), ("good", json!({}))])),
            |doc| {
                if doc.id() == "bad" {
                    Err(Error::NoReference)
                } else {
                    make(doc)
                }
            },
        )
        .docs;
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].id(), "good");
    }

    #[test]
    fn test_same_sequence_detects_reorder() {
        let mut lookup = HashMap::new();
        let first = reconcile_entities(
            &mut lookup,
            &[],
            Some(&snapshot(&[("1", json!({})), ("2", json!({}))])),
            make,
        )
        .docs;
        let reordered = vec![first[1].clone(), first[0].clone()];
        assert!(!same_sequence(&first, &reordered));
        assert!(!same_sequence(&first, &first[..1]));
        assert!(same_sequence(&first, &first.clone()));
    }
}
