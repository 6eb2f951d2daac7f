//! Include-path hydration with cycle breaking.

use crate::error::QueryResult;
use remora_datastore::LocalDatastore;
use remora_value::{decode_object, ObjectData, Pointer, Value};
use std::collections::HashSet;

fn load_data(store: &LocalDatastore, pointer: &Pointer) -> QueryResult<Option<ObjectData>> {
    let record = match store.get_record(&pointer.identity_key())? {
        Some(record) => record,
        None => return Ok(None),
    };
    let map = match record.as_object() {
        Some(map) => map,
        None => return Ok(None),
    };
    Ok(Some(decode_object(map)?))
}

/// Fully hydrates a value: pointers resolve to their stored records,
/// recursively, with `visited` recording the identity keys already on the
/// current traversal. A pointer whose key is already visited stays a bare
/// pointer — that is the cycle break.
pub fn hydrate_value(
    store: &LocalDatastore,
    value: &Value,
    visited: &mut HashSet<String>,
) -> QueryResult<Value> {
    match value {
        Value::Pointer(pointer) => {
            let key = pointer.identity_key();
            if visited.contains(&key) {
                return Ok(value.clone());
            }
            match load_data(store, pointer)? {
                Some(mut data) => {
                    visited.insert(key.clone());
                    data = hydrate_data(store, data, visited)?;
                    visited.remove(&key);
                    Ok(Value::NestedObject(Box::new(data)))
                }
                None => Ok(value.clone()),
            }
        }
        Value::NestedObject(data) => {
            let hydrated = hydrate_data(store, (**data).clone(), visited)?;
            Ok(Value::NestedObject(Box::new(hydrated)))
        }
        Value::Array(items) => {
            let hydrated: QueryResult<Vec<_>> = items
                .iter()
                .map(|item| hydrate_value(store, item, visited))
                .collect();
            Ok(Value::Array(hydrated?))
        }
        Value::Object(map) => {
            let mut out = std::collections::BTreeMap::new();
            for (k, v) in map {
                out.insert(k.clone(), hydrate_value(store, v, visited)?);
            }
            Ok(Value::Object(out))
        }
        _ => Ok(value.clone()),
    }
}

fn hydrate_data(
    store: &LocalDatastore,
    mut data: ObjectData,
    visited: &mut HashSet<String>,
) -> QueryResult<ObjectData> {
    let attrs: Vec<String> = data.attributes.keys().cloned().collect();
    for attr in attrs {
        let value = data.attributes[&attr].clone();
        let hydrated = hydrate_value(store, &value, visited)?;
        data.attributes.insert(attr, hydrated);
    }
    Ok(data)
}

/// Resolves one include path (`a.b.c`) on a record.
///
/// Each path segment hydrates the pointer(s) at that position; the value
/// at the final segment hydrates fully recursively. Arrays hydrate
/// element-wise at every step.
pub fn resolve_include_path(
    store: &LocalDatastore,
    data: &mut ObjectData,
    path: &str,
) -> QueryResult<()> {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Ok(());
    }
    let mut visited = HashSet::new();
    if let Some(key) = data.identity_key() {
        visited.insert(key);
    }
    resolve_segments(store, data, &segments, &mut visited)
}

fn resolve_segments(
    store: &LocalDatastore,
    data: &mut ObjectData,
    segments: &[&str],
    visited: &mut HashSet<String>,
) -> QueryResult<()> {
    let attr = segments[0];
    let rest = &segments[1..];
    let value = match data.attributes.get(attr) {
        Some(value) => value.clone(),
        None => return Ok(()),
    };
    let resolved = resolve_in_value(store, &value, rest, visited)?;
    data.attributes.insert(attr.to_string(), resolved);
    Ok(())
}

fn resolve_in_value(
    store: &LocalDatastore,
    value: &Value,
    rest: &[&str],
    visited: &mut HashSet<String>,
) -> QueryResult<Value> {
    match value {
        Value::Array(items) => {
            let resolved: QueryResult<Vec<_>> = items
                .iter()
                .map(|item| resolve_in_value(store, item, rest, visited))
                .collect();
            Ok(Value::Array(resolved?))
        }
        Value::Pointer(pointer) => {
            let key = pointer.identity_key();
            if visited.contains(&key) {
                return Ok(value.clone());
            }
            let data = match load_data(store, pointer)? {
                Some(data) => data,
                None => return Ok(value.clone()),
            };
            visited.insert(key.clone());
            let result = finish_segment(store, data, rest, visited)?;
            visited.remove(&key);
            Ok(result)
        }
        Value::NestedObject(data) => {
            finish_segment(store, (**data).clone(), rest, visited)
        }
        _ => Ok(value.clone()),
    }
}

fn finish_segment(
    store: &LocalDatastore,
    mut data: ObjectData,
    rest: &[&str],
    visited: &mut HashSet<String>,
) -> QueryResult<Value> {
    if rest.is_empty() {
        // Final segment: hydrate the whole subtree.
        let data = hydrate_data(store, data, visited)?;
        Ok(Value::NestedObject(Box::new(data)))
    } else {
        resolve_segments(store, &mut data, rest, visited)?;
        Ok(Value::NestedObject(Box::new(data)))
    }
}
