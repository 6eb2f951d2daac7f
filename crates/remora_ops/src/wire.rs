//! Wire encoding of operations.
//!
//! Operations cross the save boundary in the REST `{"__op": ...}` shapes.
//! A `Set` has no tag of its own: its wire form is simply the encoded
//! value. A relation op carrying both adds and removes encodes as a
//! `Batch` of an `AddRelation` and a `RemoveRelation`.

use crate::error::{OpError, OpResult};
use crate::op::{Op, RelationOp};
use remora_value::{decode, encode, Pointer, Value};
use serde_json::json;

/// Encodes an operation into its wire JSON form.
pub fn op_to_wire(op: &Op) -> OpResult<serde_json::Value> {
    match op {
        Op::Set(value) => Ok(encode(value)?),
        Op::Unset => Ok(json!({"__op": "Delete"})),
        Op::Increment(amount) => Ok(json!({"__op": "Increment", "amount": amount})),
        Op::Add(items) => Ok(json!({"__op": "Add", "objects": encode_items(items)?})),
        Op::AddUnique(items) => Ok(json!({"__op": "AddUnique", "objects": encode_items(items)?})),
        Op::Remove(items) => Ok(json!({"__op": "Remove", "objects": encode_items(items)?})),
        Op::Relation(relation) => relation_to_wire(relation),
    }
}

fn encode_items(items: &[Value]) -> OpResult<Vec<serde_json::Value>> {
    items
        .iter()
        .map(|item| encode(item).map_err(OpError::from))
        .collect()
}

fn relation_pointers(relation: &RelationOp, ids: &[String]) -> OpResult<Vec<serde_json::Value>> {
    let target = relation
        .target_class
        .as_ref()
        .ok_or_else(|| OpError::invalid_wire("relation op with members but no target class"))?;
    ids.iter()
        .map(|id| {
            encode(&Value::Pointer(Pointer::new(target.clone(), id.clone())))
                .map_err(OpError::from)
        })
        .collect()
}

fn relation_to_wire(relation: &RelationOp) -> OpResult<serde_json::Value> {
    let adds = if relation.adds.is_empty() {
        None
    } else {
        Some(json!({
            "__op": "AddRelation",
            "objects": relation_pointers(relation, &relation.adds)?,
        }))
    };
    let removes = if relation.removes.is_empty() {
        None
    } else {
        Some(json!({
            "__op": "RemoveRelation",
            "objects": relation_pointers(relation, &relation.removes)?,
        }))
    };

    match (adds, removes) {
        (Some(add), Some(remove)) => Ok(json!({"__op": "Batch", "ops": [add, remove]})),
        (Some(add), None) => Ok(add),
        (None, Some(remove)) => Ok(remove),
        (None, None) => Err(OpError::invalid_wire("empty relation op")),
    }
}

/// Decodes a wire JSON payload into an operation.
///
/// Payloads without an `__op` tag decode as a `Set` of the decoded value.
pub fn op_from_wire(raw: &serde_json::Value) -> OpResult<Op> {
    let map = match raw.as_object() {
        Some(map) if map.contains_key("__op") => map,
        _ => return Ok(Op::Set(decode(raw)?)),
    };

    let tag = map
        .get("__op")
        .and_then(|t| t.as_str())
        .ok_or_else(|| OpError::invalid_wire("__op tag is not a string"))?;

    match tag {
        "Delete" => Ok(Op::Unset),
        "Increment" => {
            let amount = map
                .get("amount")
                .and_then(|a| a.as_f64())
                .ok_or_else(|| OpError::invalid_wire("Increment missing numeric amount"))?;
            Ok(Op::Increment(amount))
        }
        "Add" => Ok(Op::Add(decode_items(map)?)),
        "AddUnique" => Ok(Op::add_unique(decode_items(map)?)),
        "Remove" => Ok(Op::Remove(decode_items(map)?)),
        "AddRelation" => {
            let pointers = decode_pointers(map)?;
            Ok(Op::Relation(RelationOp::new(&pointers, &[])?))
        }
        "RemoveRelation" => {
            let pointers = decode_pointers(map)?;
            Ok(Op::Relation(RelationOp::new(&[], &pointers)?))
        }
        "Batch" => {
            let ops = map
                .get("ops")
                .and_then(|o| o.as_array())
                .ok_or_else(|| OpError::invalid_wire("Batch missing ops array"))?;
            let mut merged: Option<Op> = None;
            for sub in ops {
                let decoded = op_from_wire(sub)?;
                merged = Some(match merged {
                    None => decoded,
                    Some(previous) => decoded.merge_with(Some(&previous))?,
                });
            }
            merged.ok_or_else(|| OpError::invalid_wire("empty Batch op"))
        }
        other => Err(OpError::invalid_wire(format!("unknown __op tag: {other}"))),
    }
}

fn decode_items(map: &serde_json::Map<String, serde_json::Value>) -> OpResult<Vec<Value>> {
    let objects = map
        .get("objects")
        .and_then(|o| o.as_array())
        .ok_or_else(|| OpError::invalid_wire("array op missing objects"))?;
    objects
        .iter()
        .map(|item| decode(item).map_err(OpError::from))
        .collect()
}

fn decode_pointers(map: &serde_json::Map<String, serde_json::Value>) -> OpResult<Vec<Pointer>> {
    decode_items(map)?
        .into_iter()
        .map(|value| match value {
            Value::Pointer(pointer) => Ok(pointer),
            other => Err(OpError::invalid_wire(format!(
                "relation op member is not a pointer: {other:?}"
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ptr(id: &str) -> Pointer {
        Pointer::new("Player", id)
    }

    #[test]
    fn increment_wire_shape() {
        let wire = op_to_wire(&Op::Increment(3.0)).unwrap();
        assert_eq!(wire, json!({"__op": "Increment", "amount": 3.0}));
        assert_eq!(op_from_wire(&wire).unwrap(), Op::Increment(3.0));
    }

    #[test]
    fn unset_wire_shape() {
        let wire = op_to_wire(&Op::Unset).unwrap();
        assert_eq!(wire, json!({"__op": "Delete"}));
        assert_eq!(op_from_wire(&wire).unwrap(), Op::Unset);
    }

    #[test]
    fn set_wire_shape_is_the_bare_value() {
        let wire = op_to_wire(&Op::Set(Value::from("hi"))).unwrap();
        assert_eq!(wire, json!("hi"));
        assert_eq!(op_from_wire(&wire).unwrap(), Op::Set(Value::from("hi")));
    }

    #[test]
    fn array_ops_roundtrip() {
        for op in [
            Op::Add(vec![Value::from("a"), Value::Number(2.0)]),
            Op::add_unique(vec![Value::from("a")]),
            Op::Remove(vec![Value::from("a")]),
        ] {
            let wire = op_to_wire(&op).unwrap();
            assert_eq!(op_from_wire(&wire).unwrap(), op);
        }
    }

    #[test]
    fn relation_add_only_wire_shape() {
        let op = Op::Relation(RelationOp::new(&[ptr("p1"), ptr("p2")], &[]).unwrap());
        let wire = op_to_wire(&op).unwrap();
        assert_eq!(
            wire,
            json!({
                "__op": "AddRelation",
                "objects": [
                    {"__type": "Pointer", "className": "Player", "objectId": "p1"},
                    {"__type": "Pointer", "className": "Player", "objectId": "p2"},
                ],
            })
        );
        assert_eq!(op_from_wire(&wire).unwrap(), op);
    }

    #[test]
    fn relation_with_both_sides_encodes_as_batch() {
        let op = Op::Relation(RelationOp::new(&[ptr("p1")], &[ptr("p2")]).unwrap());
        let wire = op_to_wire(&op).unwrap();

        let ops = wire["ops"].as_array().unwrap();
        assert_eq!(wire["__op"], json!("Batch"));
        assert_eq!(ops[0]["__op"], json!("AddRelation"));
        assert_eq!(ops[1]["__op"], json!("RemoveRelation"));

        assert_eq!(op_from_wire(&wire).unwrap(), op);
    }

    #[test]
    fn unknown_tag_fails() {
        let raw = json!({"__op": "Transmogrify"});
        assert!(matches!(
            op_from_wire(&raw),
            Err(OpError::InvalidWire { .. })
        ));
    }
}
