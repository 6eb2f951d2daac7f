//! Decoding from wire JSON to decoded values.

use crate::error::{ValueError, ValueResult};
use crate::value::{GeoPoint, ObjectData, Pointer, Relation, Value};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::Map;
use std::collections::BTreeMap;

/// Decodes a wire JSON value into a decoded [`Value`].
///
/// Maps carrying a `__type` tag decode into the corresponding typed
/// wrapper; everything else decodes structurally.
pub fn decode(raw: &serde_json::Value) -> ValueResult<Value> {
    match raw {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::Number(n) => n
            .as_f64()
            .map(Value::Number)
            .ok_or_else(|| ValueError::invalid_payload("number out of f64 range")),
        serde_json::Value::String(s) => Ok(Value::String(s.clone())),
        serde_json::Value::Array(items) => {
            let decoded: ValueResult<Vec<_>> = items.iter().map(decode).collect();
            Ok(Value::Array(decoded?))
        }
        serde_json::Value::Object(map) => match map.get("__type").and_then(|t| t.as_str()) {
            Some(tag) => decode_tagged(tag, map),
            None => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), decode(v)?);
                }
                Ok(Value::Object(out))
            }
        },
    }
}

fn decode_tagged(tag: &str, map: &Map<String, serde_json::Value>) -> ValueResult<Value> {
    match tag {
        "Date" => {
            let iso = map
                .get("iso")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ValueError::invalid_payload("Date missing iso field"))?;
            let parsed = DateTime::parse_from_rfc3339(iso)
                .map_err(|_| ValueError::invalid_date(iso))?
                .with_timezone(&Utc);
            Ok(Value::Date(parsed))
        }
        "Bytes" => {
            let b64 = map
                .get("base64")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ValueError::invalid_payload("Bytes missing base64 field"))?;
            let bytes = BASE64.decode(b64).map_err(|_| ValueError::InvalidBase64)?;
            Ok(Value::Bytes(bytes))
        }
        "Pointer" => {
            let class_name = require_str(map, "className", "Pointer")?;
            let object_id = require_str(map, "objectId", "Pointer")?;
            Ok(Value::Pointer(Pointer::new(class_name, object_id)))
        }
        "GeoPoint" => {
            let latitude = require_f64(map, "latitude", "GeoPoint")?;
            let longitude = require_f64(map, "longitude", "GeoPoint")?;
            Ok(Value::GeoPoint(GeoPoint::new(latitude, longitude)?))
        }
        "Relation" => Ok(Value::Relation(
            match map.get("className").and_then(|v| v.as_str()) {
                Some(target) => Relation::new(target),
                None => Relation::unknown(),
            },
        )),
        "Object" => Ok(Value::NestedObject(Box::new(decode_object(map)?))),
        other => Err(ValueError::unknown_wire_type(other)),
    }
}

/// Decodes a full `__type: "Object"` map into [`ObjectData`].
///
/// The tag, class name, and object id are lifted out; every remaining
/// field decodes as an attribute.
pub fn decode_object(map: &Map<String, serde_json::Value>) -> ValueResult<ObjectData> {
    let class_name = require_str(map, "className", "Object")?;
    let mut data = ObjectData::new(class_name);
    data.object_id = map
        .get("objectId")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    for (k, v) in map {
        if k == "__type" || k == "className" || k == "objectId" {
            continue;
        }
        data.attributes.insert(k.clone(), decode(v)?);
    }
    Ok(data)
}

/// Decodes a plain wire JSON object into an attribute map.
///
/// Used for save/fetch response bodies, which carry attributes at the top
/// level without an `__type` tag.
pub fn decode_attributes(
    map: &Map<String, serde_json::Value>,
) -> ValueResult<BTreeMap<String, Value>> {
    let mut out = BTreeMap::new();
    for (k, v) in map {
        out.insert(k.clone(), decode(v)?);
    }
    Ok(out)
}

fn require_str(
    map: &Map<String, serde_json::Value>,
    field: &str,
    context: &str,
) -> ValueResult<String> {
    map.get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ValueError::invalid_payload(format!("{context} missing {field} field")))
}

fn require_f64(
    map: &Map<String, serde_json::Value>,
    field: &str,
    context: &str,
) -> ValueResult<f64> {
    map.get(field)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| ValueError::invalid_payload(format!("{context} missing {field} field")))
}
