//! Local application of writes
//!
//! Used to validate the result of an `update` or merging `set` against a
//! schema before anything is sent, and by the in-memory backend to apply
//! the same writes to its store.

use serde_json::{Map, Value};

/// Apply update fields with dotted paths to a copy of `base`
///
/// Values recognized by `is_delete` remove the addressed field.
pub fn apply_update<F>(base: &Map<String, Value>, fields: &Map<String, Value>, is_delete: F) -> Map<String, Value>
where
    F: Fn(&Value) -> bool,
{
    let mut result = base.clone();
    for (path, value) in fields {
        let segments: Vec<&str> = path.split('.').collect();
        set_path(&mut result, &segments, value, &is_delete);
    }
    result
}

/// Deep-merge `patch` into a copy of `base`, as a merging `set` does
pub fn merge_set<F>(base: &Map<String, Value>, patch: &Map<String, Value>, is_delete: F) -> Map<String, Value>
where
    F: Fn(&Value) -> bool,
{
    let mut result = base.clone();
    merge_into(&mut result, patch, &is_delete);
    result
}

/// Copy of `data` with every delete marker removed
pub fn strip_deletes<F>(data: &Map<String, Value>, is_delete: F) -> Map<String, Value>
where
    F: Fn(&Value) -> bool,
{
    merge_set(&Map::new(), data, is_delete)
}

fn merge_into<F>(target: &mut Map<String, Value>, patch: &Map<String, Value>, is_delete: &F)
where
    F: Fn(&Value) -> bool,
{
    for (key, value) in patch {
        if is_delete(value) {
            target.remove(key);
            continue;
        }
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_into(existing, incoming, is_delete);
            }
            (_, Value::Object(incoming)) => {
                let mut fresh = Map::new();
                merge_into(&mut fresh, incoming, is_delete);
                target.insert(key.clone(), Value::Object(fresh));
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

fn set_path<F>(target: &mut Map<String, Value>, path: &[&str], value: &Value, is_delete: &F)
where
    F: Fn(&Value) -> bool,
{
    let Some((head, rest)) = path.split_first() else {
        return;
    };

    if rest.is_empty() {
        if is_delete(value) {
            target.remove(*head);
        } else {
            target.insert(head.to_string(), value.clone());
        }
        return;
    }

    if is_delete(value) && !matches!(target.get(*head), Some(Value::Object(_))) {
        return;
    }
    let child = target
        .entry(head.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !child.is_object() {
        *child = Value::Object(Map::new());
    }
    if let Value::Object(child) = child {
        set_path(child, rest, value, is_delete);
    }
}
