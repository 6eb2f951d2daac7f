//! Stable multi-key sorting of decoded records.

use crate::compare::compare;
use crate::description::SortKey;
use crate::error::{QueryError, QueryResult};
use remora_value::{ObjectData, Value, SENSITIVE_FIELDS};
use std::cmp::Ordering;

fn sort_value(data: &ObjectData, key: &str) -> Option<Value> {
    match key {
        "objectId" => data.object_id.clone().map(Value::String),
        _ => data.attributes.get(key).cloned(),
    }
}

/// Sorts records by the ordered key list, each key independently
/// ascending or descending, stable with respect to earlier keys and to
/// input order.
///
/// Records missing a key sort before records that have it; value pairs
/// the type system cannot order keep their input order.
pub fn sort_records(records: &mut [ObjectData], order: &[SortKey]) -> QueryResult<()> {
    for sort_key in order {
        if SENSITIVE_FIELDS.contains(&sort_key.key.as_str()) {
            return Err(QueryError::UnsupportedSortKey {
                key: sort_key.key.clone(),
            });
        }
    }
    if order.is_empty() {
        return Ok(());
    }

    records.sort_by(|a, b| {
        for sort_key in order {
            let va = sort_value(a, &sort_key.key);
            let vb = sort_value(b, &sort_key.key);
            let ordering = match (&va, &vb) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(va), Some(vb)) => compare(va, vb).unwrap_or(Ordering::Equal),
            };
            let directed = if sort_key.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if directed != Ordering::Equal {
                return directed;
            }
        }
        Ordering::Equal
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(id: &str, number: f64, name: &str) -> ObjectData {
        let mut data = ObjectData::new("Game");
        data.object_id = Some(id.to_string());
        data.attributes
            .insert("number".into(), Value::Number(number));
        data.attributes.insert("name".into(), Value::from(name));
        data
    }

    fn key(name: &str, descending: bool) -> SortKey {
        SortKey {
            key: name.to_string(),
            descending,
        }
    }

    #[test]
    fn single_key_ascending() {
        let mut records = vec![record("a", 3.0, "x"), record("b", 1.0, "y"), record("c", 2.0, "z")];
        sort_records(&mut records, &[key("number", false)]).unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.object_id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn descending_reverses() {
        let mut records = vec![record("a", 1.0, "x"), record("b", 2.0, "y")];
        sort_records(&mut records, &[key("number", true)]).unwrap();
        assert_eq!(records[0].object_id.as_deref(), Some("b"));
    }

    #[test]
    fn later_keys_break_ties_stably() {
        let mut records = vec![
            record("a", 1.0, "zz"),
            record("b", 1.0, "aa"),
            record("c", 0.0, "mm"),
        ];
        sort_records(&mut records, &[key("number", false), key("name", false)]).unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.object_id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn missing_values_sort_first() {
        let mut bare = ObjectData::new("Game");
        bare.object_id = Some("bare".into());
        let mut records = vec![record("a", 1.0, "x"), bare];
        sort_records(&mut records, &[key("number", false)]).unwrap();
        assert_eq!(records[0].object_id.as_deref(), Some("bare"));
    }

    #[test]
    fn sensitive_sort_key_is_rejected() {
        let mut records = vec![record("a", 1.0, "x")];
        let result = sort_records(&mut records, &[key("password", false)]);
        assert!(matches!(
            result,
            Err(QueryError::UnsupportedSortKey { .. })
        ));
    }

    proptest! {
        #[test]
        fn sort_is_stable_under_equal_keys(values in proptest::collection::vec(0i32..3, 1..20)) {
            // Tag each record with its input position; equal sort values
            // must keep input order.
            let mut records: Vec<ObjectData> = values
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    let mut data = record(&format!("r{i}"), f64::from(*v), "n");
                    data.attributes.insert("position".into(), Value::Number(i as f64));
                    data
                })
                .collect();

            sort_records(&mut records, &[key("number", false)]).unwrap();

            for window in records.windows(2) {
                let a = window[0].attributes["number"].as_number().unwrap();
                let b = window[1].attributes["number"].as_number().unwrap();
                prop_assert!(a <= b);
                if a == b {
                    let pa = window[0].attributes["position"].as_number().unwrap();
                    let pb = window[1].attributes["position"].as_number().unwrap();
                    prop_assert!(pa < pb);
                }
            }
        }
    }
}
