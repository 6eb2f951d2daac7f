//! Value comparison semantics shared by predicates and sorting.

use remora_value::Value;
use std::cmp::Ordering;

/// Orders two values the way the remote engine does: numbers numerically,
/// dates by timestamp, strings lexicographically, booleans false before
/// true. Mismatched or unordered types return `None`.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
        (Value::Date(x), Value::Date(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Equality the way the remote engine compares: pointers and nested
/// objects by identity key, dates by instant, everything else
/// structurally. An array attribute equals a scalar target when any
/// element does.
pub fn equals(attr_value: &Value, target: &Value) -> bool {
    if let Value::Array(items) = attr_value {
        if !matches!(target, Value::Array(_)) {
            return items.iter().any(|item| scalar_equals(item, target));
        }
    }
    scalar_equals(attr_value, target)
}

fn scalar_equals(a: &Value, b: &Value) -> bool {
    match (a.identity_key(), b.identity_key()) {
        (Some(x), Some(y)) => x == y,
        (None, None) => a == b,
        _ => false,
    }
}
