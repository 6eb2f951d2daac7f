//! Object-graph save planning.
//!
//! Unsaved children are discovered transitively through local-pointer
//! references, deduplicated, and scheduled in waves: a wave contains only
//! objects whose referenced children already have (or will now get) server
//! ids, so children always save before their parents. Mutually unsaved
//! objects make the graph unsaveable.

use crate::error::{SyncError, SyncResult};
use remora_state::RemoraObject;
use remora_value::Value;
use std::collections::{HashMap, HashSet};

/// Objects per network request.
pub const MAX_BATCH_SIZE: usize = 20;

/// True if an id string is a local placeholder rather than a server id.
pub fn is_local_id(id: &str) -> bool {
    id.starts_with("local_")
}

/// Collects the local ids referenced by an estimated attribute value.
fn collect_local_refs(value: &Value, out: &mut HashSet<String>) {
    match value {
        Value::Pointer(pointer) => {
            if is_local_id(&pointer.object_id) {
                out.insert(pointer.object_id.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_local_refs(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_local_refs(item, out);
            }
        }
        Value::NestedObject(data) => {
            for item in data.attributes.values() {
                collect_local_refs(item, out);
            }
        }
        _ => {}
    }
}

/// Local ids referenced anywhere in an object's estimated attributes.
pub fn local_refs(object: &RemoraObject) -> SyncResult<HashSet<String>> {
    let mut refs = HashSet::new();
    for value in object.attributes()?.values() {
        collect_local_refs(value, &mut refs);
    }
    Ok(refs)
}

/// Expands the save set with every unsaved object reachable through
/// local-pointer references, deduplicated by identity key.
///
/// `lookup` resolves a local id to its proxy (the context's registry of
/// unsaved objects); references to unknown local ids are left for payload
/// encoding to reject.
pub fn expand_graph(
    roots: &[RemoraObject],
    lookup: &dyn Fn(&str) -> Option<RemoraObject>,
) -> SyncResult<Vec<RemoraObject>> {
    let mut ordered: Vec<RemoraObject> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut frontier: Vec<RemoraObject> = roots.to_vec();

    while let Some(object) = frontier.pop() {
        let key = object.slot_key();
        if !seen.insert(key) {
            continue;
        }
        for local_id in local_refs(&object)? {
            if let Some(child) = lookup(&local_id) {
                frontier.push(child);
            }
        }
        ordered.push(object);
    }
    Ok(ordered)
}

/// Schedules objects into save waves: each wave's members reference no
/// still-unsaved local id outside `resolved`. Children therefore land in
/// earlier waves than their parents. Returns
/// [`SyncError::CannotSaveCycle`] when unsaved objects mutually reference
/// each other.
pub fn plan_waves(
    objects: Vec<RemoraObject>,
    resolved: &HashMap<String, String>,
) -> SyncResult<Vec<Vec<RemoraObject>>> {
    // Ids that will be assigned by earlier waves.
    let mut assigned: HashSet<String> = resolved.keys().cloned().collect();
    let mut remaining = objects;
    let mut waves = Vec::new();

    while !remaining.is_empty() {
        let mut ready = Vec::new();
        let mut deferred = Vec::new();

        for object in remaining {
            let blocked = local_refs(&object)?
                .into_iter()
                .any(|local_id| !assigned.contains(&local_id));
            if blocked {
                deferred.push(object);
            } else {
                ready.push(object);
            }
        }

        if ready.is_empty() {
            return Err(SyncError::CannotSaveCycle);
        }
        for object in &ready {
            let identity = object.identity();
            if identity.is_local() {
                assigned.insert(identity.id.to_string());
            }
        }
        waves.push(ready);
        remaining = deferred;
    }
    Ok(waves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use remora_state::{LocalIdAllocator, StateArena};
    use remora_value::Pointer;
    use std::sync::Arc;

    fn setup() -> (Arc<StateArena>, LocalIdAllocator) {
        (Arc::new(StateArena::new()), LocalIdAllocator::new())
    }

    #[test]
    fn saved_references_do_not_block() {
        let (arena, allocator) = setup();
        let object = RemoraObject::new(Arc::clone(&arena), "Game", &allocator);
        object
            .set("owner", Value::Pointer(Pointer::new("Player", "p1")))
            .unwrap();

        let waves = plan_waves(vec![object], &HashMap::new()).unwrap();
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].len(), 1);
    }

    #[test]
    fn children_save_before_parents() {
        let (arena, allocator) = setup();
        let child = RemoraObject::new(Arc::clone(&arena), "Player", &allocator);
        let parent = RemoraObject::new(Arc::clone(&arena), "Game", &allocator);
        parent
            .set("owner", Value::Pointer(child.to_reference()))
            .unwrap();

        let waves = plan_waves(vec![parent.clone(), child.clone()], &HashMap::new()).unwrap();
        assert_eq!(waves.len(), 2);
        assert_eq!(waves[0][0].class_name(), "Player");
        assert_eq!(waves[1][0].class_name(), "Game");
    }

    #[test]
    fn unsaved_cycle_is_fatal() {
        let (arena, allocator) = setup();
        let a = RemoraObject::new(Arc::clone(&arena), "Node", &allocator);
        let b = RemoraObject::new(Arc::clone(&arena), "Node", &allocator);
        a.set("next", Value::Pointer(b.to_reference())).unwrap();
        b.set("next", Value::Pointer(a.to_reference())).unwrap();

        let result = plan_waves(vec![a, b], &HashMap::new());
        assert!(matches!(result, Err(SyncError::CannotSaveCycle)));
    }

    #[test]
    fn already_resolved_ids_unblock() {
        let (arena, allocator) = setup();
        let parent = RemoraObject::new(Arc::clone(&arena), "Game", &allocator);
        let child = RemoraObject::new(Arc::clone(&arena), "Player", &allocator);
        parent
            .set("owner", Value::Pointer(child.to_reference()))
            .unwrap();

        let child_local = child.identity().id.to_string();
        let resolved = HashMap::from([(child_local, "srv1".to_string())]);

        // The child already saved; the parent is immediately ready.
        let waves = plan_waves(vec![parent], &resolved).unwrap();
        assert_eq!(waves.len(), 1);
    }

    #[test]
    fn expand_graph_pulls_in_unsaved_children() {
        let (arena, allocator) = setup();
        let child = RemoraObject::new(Arc::clone(&arena), "Player", &allocator);
        let parent = RemoraObject::new(Arc::clone(&arena), "Game", &allocator);
        parent
            .set("owner", Value::Pointer(child.to_reference()))
            .unwrap();

        let child_local = child.identity().id.to_string();
        let child_clone = child.clone();
        let lookup = move |id: &str| {
            if id == child_local {
                Some(child_clone.clone())
            } else {
                None
            }
        };

        let expanded = expand_graph(&[parent], &lookup).unwrap();
        assert_eq!(expanded.len(), 2);
    }

    #[test]
    fn expand_graph_deduplicates() {
        let (arena, allocator) = setup();
        let object = RemoraObject::new(Arc::clone(&arena), "Game", &allocator);
        let expanded =
            expand_graph(&[object.clone(), object.clone()], &|_| None).unwrap();
        assert_eq!(expanded.len(), 1);
    }
}
