//! Encoding from decoded values to wire JSON.

use crate::error::{ValueError, ValueResult};
use crate::value::{ObjectData, Value};
use crate::SENSITIVE_FIELDS;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::SecondsFormat;
use serde_json::{json, Map};

/// Encodes a decoded value into its wire JSON representation.
///
/// Scalars encode directly; typed wrappers encode as `{"__type": ...}`
/// tagged maps; containers encode recursively.
pub fn encode(value: &Value) -> ValueResult<serde_json::Value> {
    match value {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(json!(b)),
        Value::Number(n) => {
            if !n.is_finite() {
                return Err(ValueError::NonFiniteNumber);
            }
            // Integral numbers encode without a fraction so that payloads
            // match what the server itself produces.
            if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
                Ok(json!(*n as i64))
            } else {
                Ok(json!(n))
            }
        }
        Value::String(s) => Ok(json!(s)),
        Value::Bytes(b) => Ok(json!({
            "__type": "Bytes",
            "base64": BASE64.encode(b),
        })),
        Value::Date(d) => Ok(json!({
            "__type": "Date",
            "iso": d.to_rfc3339_opts(SecondsFormat::Millis, true),
        })),
        Value::Pointer(p) => Ok(json!({
            "__type": "Pointer",
            "className": p.class_name,
            "objectId": p.object_id,
        })),
        Value::GeoPoint(g) => Ok(json!({
            "__type": "GeoPoint",
            "latitude": g.latitude(),
            "longitude": g.longitude(),
        })),
        Value::Relation(r) => {
            let mut map = Map::new();
            map.insert("__type".into(), json!("Relation"));
            if let Some(target) = &r.target_class_name {
                map.insert("className".into(), json!(target));
            }
            Ok(serde_json::Value::Object(map))
        }
        Value::Array(items) => {
            let encoded: ValueResult<Vec<_>> = items.iter().map(encode).collect();
            Ok(serde_json::Value::Array(encoded?))
        }
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), encode(v)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        Value::NestedObject(data) => encode_object(data),
    }
}

/// Encodes an attribute map into a wire JSON object.
pub fn encode_attributes(
    attributes: &std::collections::BTreeMap<String, Value>,
) -> ValueResult<serde_json::Value> {
    let mut out = Map::new();
    for (k, v) in attributes {
        out.insert(k.clone(), encode(v)?);
    }
    Ok(serde_json::Value::Object(out))
}

/// The full `__type: "Object"` encoding of an object, as stored by the
/// local datastore and embedded for nested objects.
pub type EncodedObject = serde_json::Value;

fn encode_object(data: &ObjectData) -> ValueResult<EncodedObject> {
    let mut out = Map::new();
    out.insert("__type".into(), json!("Object"));
    out.insert("className".into(), json!(data.class_name));
    if let Some(id) = &data.object_id {
        out.insert("objectId".into(), json!(id));
    }
    for (k, v) in &data.attributes {
        out.insert(k.clone(), encode(v)?);
    }
    Ok(serde_json::Value::Object(out))
}

/// Recursively removes sensitive attributes from an encoded object.
///
/// Applied before a record is written to the local datastore so that
/// credentials never land on disk. Only object-shaped maps are touched;
/// the tag and identity fields are preserved.
pub fn strip_sensitive(encoded: &mut serde_json::Value) {
    match encoded {
        serde_json::Value::Object(map) => {
            for field in SENSITIVE_FIELDS {
                map.remove(*field);
            }
            for (_, v) in map.iter_mut() {
                strip_sensitive(v);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                strip_sensitive(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{GeoPoint, Pointer};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    #[test]
    fn encode_scalars() {
        assert_eq!(encode(&Value::Null).unwrap(), serde_json::Value::Null);
        assert_eq!(encode(&Value::Bool(true)).unwrap(), json!(true));
        assert_eq!(encode(&Value::Number(3.0)).unwrap(), json!(3));
        assert_eq!(encode(&Value::Number(3.5)).unwrap(), json!(3.5));
        assert_eq!(encode(&Value::from("hi")).unwrap(), json!("hi"));
    }

    #[test]
    fn encode_nan_fails() {
        assert!(matches!(
            encode(&Value::Number(f64::NAN)),
            Err(ValueError::NonFiniteNumber)
        ));
    }

    #[test]
    fn encode_date_uses_millisecond_iso() {
        let d = Utc.with_ymd_and_hms(2024, 7, 12, 8, 30, 0).unwrap();
        let encoded = encode(&Value::Date(d)).unwrap();
        assert_eq!(
            encoded,
            json!({"__type": "Date", "iso": "2024-07-12T08:30:00.000Z"})
        );
    }

    #[test]
    fn encode_pointer() {
        let encoded = encode(&Value::Pointer(Pointer::new("Game", "xyz"))).unwrap();
        assert_eq!(
            encoded,
            json!({"__type": "Pointer", "className": "Game", "objectId": "xyz"})
        );
    }

    #[test]
    fn encode_bytes_base64() {
        let encoded = encode(&Value::Bytes(b"hello".to_vec())).unwrap();
        assert_eq!(
            encoded,
            json!({"__type": "Bytes", "base64": "aGVsbG8="})
        );
    }

    #[test]
    fn encode_geo_point() {
        let g = GeoPoint::new(40.0, -30.0).unwrap();
        let encoded = encode(&Value::GeoPoint(g)).unwrap();
        assert_eq!(
            encoded,
            json!({"__type": "GeoPoint", "latitude": 40.0, "longitude": -30.0})
        );
    }

    #[test]
    fn encode_nested_containers() {
        let mut inner = BTreeMap::new();
        inner.insert("count".to_string(), Value::Number(2.0));
        let value = Value::Array(vec![Value::Object(inner), Value::from("x")]);
        assert_eq!(encode(&value).unwrap(), json!([{"count": 2}, "x"]));
    }

    #[test]
    fn strip_sensitive_removes_credentials_recursively() {
        let mut encoded = json!({
            "__type": "Object",
            "className": "_User",
            "objectId": "u1",
            "password": "hunter2",
            "sessionToken": "r:abc",
            "profile": {"password": "nested", "name": "kit"},
        });
        strip_sensitive(&mut encoded);
        assert_eq!(
            encoded,
            json!({
                "__type": "Object",
                "className": "_User",
                "objectId": "u1",
                "profile": {"name": "kit"},
            })
        );
    }
}
