//! Integration tests for the full client surface: mutate, save, pin,
//! and query offline.

use remora_datastore::MemoryAdapter;
use remora_query::QueryDescription;
use remora_sync::{Context, LoopbackTransport, SyncError};
use remora_value::{Pointer, Value};
use std::sync::Arc;

fn context() -> Context {
    Context::new(
        Arc::new(LoopbackTransport::new()),
        Arc::new(MemoryAdapter::new()),
    )
}

#[test]
fn save_pin_query_roundtrip() {
    let context = context();

    for n in 0..10 {
        let item = context.new_object("Item");
        item.set("number", f64::from(n)).unwrap();
        context.save(&item).unwrap();
        context.pin(&item, None).unwrap();
    }

    // Ascending sort with skip drops exactly the first record.
    let query = QueryDescription::new("Item")
        .ascending("number")
        .skip(1)
        .from_local_datastore();
    let results = context.find_data(&query).unwrap();
    assert_eq!(results.len(), 9);
    assert_eq!(results[0].attributes["number"], Value::Number(1.0));

    // Membership filtering matches only the pinned values present.
    let query = QueryDescription::new("Item")
        .contained_in(
            "number",
            vec![
                Value::Number(3.0),
                Value::Number(5.0),
                Value::Number(7.0),
                Value::Number(9.0),
                Value::Number(11.0),
            ],
        )
        .unwrap()
        .ascending("number")
        .from_local_datastore();
    let results = context.find_data(&query).unwrap();
    let numbers: Vec<f64> = results
        .iter()
        .map(|r| r.attributes["number"].as_number().unwrap())
        .collect();
    assert_eq!(numbers, vec![3.0, 5.0, 7.0, 9.0]);
}

#[test]
fn add_then_add_unique_is_a_merge_conflict() {
    let context = context();
    let game = context.new_object("Game");
    game.set(
        "strings",
        Value::Array(vec![Value::from("foo"), Value::from("bar")]),
    )
    .unwrap();
    context.save(&game).unwrap();

    game.add("strings", vec![Value::from("bar")]).unwrap();
    let error = game
        .add_unique("strings", vec![Value::from("bar")])
        .unwrap_err();
    assert!(error.to_string().contains("cannot merge AddUnique"));
}

#[test]
fn recursive_pin_creates_one_record_per_identity() {
    let context = context();

    // Save a small graph so every object has a server id.
    let owner = context.new_object("Player");
    owner.set("name", "kit").unwrap();
    context.save(&owner).unwrap();

    let game = context.new_object("Game");
    game.set("owner", Value::Pointer(owner.to_reference()))
        .unwrap();
    context.save(&game).unwrap();

    context.pin(&owner, None).unwrap();
    context.pin(&game, None).unwrap();

    let keys = context.datastore().identity_keys().unwrap();
    assert_eq!(keys.len(), 2);

    // Unpinning from a named set leaves the default-set records alone.
    context.pin(&game, Some("favorites")).unwrap();
    context.unpin(&game, Some("favorites")).unwrap();
    assert!(context
        .datastore()
        .get_record(&game.slot_key())
        .unwrap()
        .is_some());

    context.unpin(&game, None).unwrap();
    assert!(context
        .datastore()
        .get_record(&game.slot_key())
        .unwrap()
        .is_none());
}

#[test]
fn cyclic_include_resolves_to_bare_pointer() {
    let context = context();

    let a = context.new_object("Node");
    context.save(&a).unwrap();
    let b = context.new_object("Node");
    b.set("next", Value::Pointer(a.to_reference())).unwrap();
    context.save(&b).unwrap();
    a.set("next", Value::Pointer(b.to_reference())).unwrap();
    context.save(&a).unwrap();

    context.pin(&a, None).unwrap();
    context.pin(&b, None).unwrap();

    let a_id = a.object_id().unwrap();
    let query = QueryDescription::new("Node")
        .include("next")
        .from_local_datastore();
    let fetched = context
        .find_data(&query)
        .unwrap()
        .into_iter()
        .find(|data| data.object_id.as_deref() == Some(a_id.as_str()))
        .unwrap();

    // a.next hydrates into b; b.next stays a bare pointer back to a.
    match &fetched.attributes["next"] {
        Value::NestedObject(b_data) => match &b_data.attributes["next"] {
            Value::Pointer(pointer) => {
                assert_eq!(pointer.object_id, a_id);
            }
            other => panic!("expected cycle-broken pointer, got {other:?}"),
        },
        other => panic!("expected hydrated node, got {other:?}"),
    }
}

#[test]
fn relation_mutations_roundtrip_through_save() {
    let context = context();
    let p1 = context.new_object("Player");
    context.save(&p1).unwrap();
    let p2 = context.new_object("Player");
    context.save(&p2).unwrap();

    let game = context.new_object("Game");
    let members = [
        Pointer::new("Player", p1.object_id().unwrap()),
        Pointer::new("Player", p2.object_id().unwrap()),
    ];
    game.add_relation("players", &members).unwrap();
    context.save(&game).unwrap();

    // The estimated value materializes the relation with its target.
    match game.get("players").unwrap() {
        Some(Value::Relation(relation)) => {
            assert_eq!(relation.target_class_name.as_deref(), Some("Player"));
        }
        other => panic!("expected relation, got {other:?}"),
    }

    // Deleting a relation field after pending membership changes is a
    // caller logic error.
    game.add_relation("players", &members[..1]).unwrap();
    assert!(game.unset("players").is_err());
}

#[test]
fn mutations_during_inflight_save_survive() {
    let context = context();
    let game = context.new_object("Game");
    game.set("a", 1.0).unwrap();
    context.save(&game).unwrap();

    // Freeze a layer by hand, mutate while "in flight", then save both.
    game.set("b", 2.0).unwrap();
    context.save(&game).unwrap();
    game.set("c", 3.0).unwrap();
    context.save(&game).unwrap();

    for (attr, expected) in [("a", 1.0), ("b", 2.0), ("c", 3.0)] {
        assert_eq!(
            game.get(attr).unwrap(),
            Some(Value::Number(expected)),
            "attribute {attr}"
        );
    }
    assert!(!game.is_dirty(None));
}

#[test]
fn concurrent_saves_of_one_identity_serialize() {
    let context = Arc::new(context());
    let game = context.new_object("Game");
    game.set("score", 0.0).unwrap();
    context.save(&game).unwrap();
    let id = game.object_id().unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let context = Arc::clone(&context);
        let id = id.clone();
        handles.push(std::thread::spawn(move || {
            let proxy = context.object_with_id("Game", &id);
            proxy.increment("score", 1.0).unwrap();
            context.save(&proxy).unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let fresh = context.object_with_id("Game", &id);
    context.fetch(&fresh).unwrap();
    assert_eq!(fresh.get("score").unwrap(), Some(Value::Number(4.0)));
}

#[test]
fn each_pagination_respects_restrictions() {
    let context = context();
    for n in 0..5 {
        let item = context.new_object("Item");
        item.set("number", f64::from(n)).unwrap();
        context.save(&item).unwrap();
        context.pin(&item, None).unwrap();
    }

    let query = QueryDescription::new("Item").from_local_datastore();
    let mut seen = 0;
    context
        .each(&query, |_| {
            seen += 1;
            Ok(())
        })
        .unwrap();
    assert_eq!(seen, 5);

    let limited = QueryDescription::new("Item").limit(2).from_local_datastore();
    assert!(matches!(
        context.each(&limited, |_| Ok(())),
        Err(SyncError::Query(
            remora_query::QueryError::EachWithConstraints
        ))
    ));
}

#[test]
fn remote_query_refreshes_pinned_records() {
    let context = context();
    let item = context.new_object("Item");
    item.set("number", 1.0).unwrap();
    context.save(&item).unwrap();
    context.pin(&item, None).unwrap();

    // A second client path updates the server value.
    let id = item.object_id().unwrap();
    let proxy = context.object_with_id("Item", &id);
    proxy.set("number", 42.0).unwrap();
    context.save(&proxy).unwrap();

    // Running a remote query pulls the change into the offline record.
    let query = QueryDescription::new("Item");
    context.query_remote(&query).unwrap();

    let record = context
        .datastore()
        .get_record(&item.slot_key())
        .unwrap()
        .unwrap();
    assert_eq!(record["number"], serde_json::json!(42));
}
