//! Predicate-tree matching with remote-engine operator semantics.

use crate::compare::{compare, equals};
use crate::error::{QueryError, QueryResult};
use regex::Regex;
use remora_value::{decode, GeoPoint, ObjectData, Value};
use std::cmp::Ordering;

/// Runs nested sub-queries (`$inQuery`, `$select`, ...) against the same
/// offline source as the enclosing query.
pub trait SubQueryRunner {
    /// Evaluates a sub-query and returns its matching records.
    fn run_sub_query(
        &self,
        class_name: &str,
        where_clause: &serde_json::Value,
    ) -> QueryResult<Vec<ObjectData>>;
}

/// True if a record matches a `where` predicate tree.
pub fn matches_where(
    data: &ObjectData,
    where_clause: &serde_json::Value,
    runner: &dyn SubQueryRunner,
) -> QueryResult<bool> {
    let tree = match where_clause.as_object() {
        Some(tree) => tree,
        None => {
            return Err(QueryError::invalid_constraint(
                "where clause is not an object",
            ))
        }
    };

    for (key, constraint) in tree {
        let matched = match key.as_str() {
            "$or" => any_clause(data, constraint, runner)?,
            "$and" => all_clauses(data, constraint, runner)?,
            "$nor" => !any_clause(data, constraint, runner)?,
            "$relatedTo" => return Err(QueryError::unsupported_operator("$relatedTo")),
            attr => matches_attribute(data, attr, constraint, runner)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clause_list<'a>(constraint: &'a serde_json::Value) -> QueryResult<&'a [serde_json::Value]> {
    constraint
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| QueryError::invalid_constraint("logical operator expects an array"))
}

fn any_clause(
    data: &ObjectData,
    constraint: &serde_json::Value,
    runner: &dyn SubQueryRunner,
) -> QueryResult<bool> {
    for clause in clause_list(constraint)? {
        if matches_where(data, clause, runner)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn all_clauses(
    data: &ObjectData,
    constraint: &serde_json::Value,
    runner: &dyn SubQueryRunner,
) -> QueryResult<bool> {
    for clause in clause_list(constraint)? {
        if !matches_where(data, clause, runner)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn attribute_value(data: &ObjectData, attr: &str) -> Option<Value> {
    match attr {
        "objectId" => data.object_id.clone().map(Value::String),
        _ => data.attributes.get(attr).cloned(),
    }
}

fn is_constraint_object(constraint: &serde_json::Value) -> bool {
    constraint
        .as_object()
        .is_some_and(|map| !map.is_empty() && map.keys().all(|k| k.starts_with('$')))
}

fn matches_attribute(
    data: &ObjectData,
    attr: &str,
    constraint: &serde_json::Value,
    runner: &dyn SubQueryRunner,
) -> QueryResult<bool> {
    let value = attribute_value(data, attr);

    if !is_constraint_object(constraint) {
        // Equality literal. A missing attribute only equals null.
        let target = decode(constraint)?;
        return Ok(match &value {
            Some(value) => equals(value, &target),
            None => target.is_null(),
        });
    }

    let operators = constraint.as_object().expect("checked above");
    for (operator, operand) in operators {
        let matched = match operator.as_str() {
            "$eq" => {
                let target = decode(operand)?;
                value.as_ref().is_some_and(|v| equals(v, &target))
            }
            "$ne" => {
                let target = decode(operand)?;
                !value.as_ref().is_some_and(|v| equals(v, &target))
            }
            "$lt" => ordered(&value, operand, |o| o == Ordering::Less)?,
            "$lte" => ordered(&value, operand, |o| o != Ordering::Greater)?,
            "$gt" => ordered(&value, operand, |o| o == Ordering::Greater)?,
            "$gte" => ordered(&value, operand, |o| o != Ordering::Less)?,
            "$in" => contained_in(&value, operand)?,
            "$nin" => !contained_in(&value, operand)?,
            "$all" => contains_all(&value, operand)?,
            "$containedBy" => contained_by(&value, operand)?,
            "$exists" => {
                let wanted = operand.as_bool().ok_or_else(|| {
                    QueryError::invalid_constraint("$exists expects a boolean")
                })?;
                let present = value.as_ref().is_some_and(|v| !v.is_null());
                present == wanted
            }
            "$regex" => matches_regex(&value, operand, operators.get("$options"))?,
            // Consumed alongside the operator they modify.
            "$options" | "$maxDistance" => true,
            "$nearSphere" => near_sphere(&value, operand, operators.get("$maxDistance"))?,
            "$within" => within_box(&value, operand)?,
            "$geoWithin" => geo_within(&value, operand)?,
            "$select" => select(&value, operand, runner, false)?,
            "$dontSelect" => select(&value, operand, runner, true)?,
            "$inQuery" => in_query(&value, operand, runner)?,
            "$notInQuery" => !in_query(&value, operand, runner)?,
            other => return Err(QueryError::unsupported_operator(other)),
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn ordered(
    value: &Option<Value>,
    operand: &serde_json::Value,
    accept: impl Fn(Ordering) -> bool,
) -> QueryResult<bool> {
    let target = decode(operand)?;
    Ok(match value {
        Some(value) => compare(value, &target).is_some_and(accept),
        None => false,
    })
}

fn decode_list(operand: &serde_json::Value) -> QueryResult<Vec<Value>> {
    let items = operand
        .as_array()
        .ok_or_else(|| QueryError::invalid_constraint("operator expects an array operand"))?;
    items
        .iter()
        .map(|item| decode(item).map_err(QueryError::from))
        .collect()
}

fn contained_in(value: &Option<Value>, operand: &serde_json::Value) -> QueryResult<bool> {
    let candidates = decode_list(operand)?;
    Ok(match value {
        Some(value) => candidates.iter().any(|candidate| equals(value, candidate)),
        None => false,
    })
}

fn contains_all(value: &Option<Value>, operand: &serde_json::Value) -> QueryResult<bool> {
    let required = decode_list(operand)?;
    let items = match value {
        Some(Value::Array(items)) => items,
        _ => return Ok(false),
    };
    Ok(required
        .iter()
        .all(|target| items.iter().any(|item| item.same_element(target))))
}

fn contained_by(value: &Option<Value>, operand: &serde_json::Value) -> QueryResult<bool> {
    let allowed = decode_list(operand)?;
    let items = match value {
        Some(Value::Array(items)) => items,
        _ => return Ok(false),
    };
    Ok(items
        .iter()
        .all(|item| allowed.iter().any(|candidate| item.same_element(candidate))))
}

/// Compiles a `$regex` pattern with `i`/`m`/`x`/`s` modifier flags.
///
/// The `x` (extended) flag strips unescaped whitespace and `#` comments
/// from the pattern before compilation. Unknown flags are an error.
fn build_regex(pattern: &str, options: &str) -> QueryResult<Regex> {
    let mut prefix = String::new();
    let mut extended = false;
    for flag in options.chars() {
        match flag {
            'i' => prefix.push_str("(?i)"),
            'm' => prefix.push_str("(?m)"),
            's' => prefix.push_str("(?s)"),
            'x' => extended = true,
            _ => {
                return Err(QueryError::InvalidRegexOptions {
                    options: options.to_string(),
                })
            }
        }
    }

    let cleaned = if extended {
        strip_extended(pattern)
    } else {
        pattern.to_string()
    };

    Regex::new(&format!("{prefix}{cleaned}")).map_err(|e| QueryError::InvalidRegexPattern {
        message: e.to_string(),
    })
}

fn strip_extended(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push(c);
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '#' => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        break;
                    }
                }
            }
            c if c.is_whitespace() => {}
            c => out.push(c),
        }
    }
    out
}

fn matches_regex(
    value: &Option<Value>,
    operand: &serde_json::Value,
    options: Option<&serde_json::Value>,
) -> QueryResult<bool> {
    let pattern = operand
        .as_str()
        .ok_or_else(|| QueryError::invalid_constraint("$regex expects a string"))?;
    let options = options.and_then(|o| o.as_str()).unwrap_or("");
    let regex = build_regex(pattern, options)?;

    // Matching a non-string value is false, never an error.
    Ok(match value {
        Some(Value::String(s)) => regex.is_match(s),
        _ => false,
    })
}

fn decode_geo(operand: &serde_json::Value) -> QueryResult<GeoPoint> {
    match decode(operand)? {
        Value::GeoPoint(point) => Ok(point),
        other => Err(QueryError::invalid_constraint(format!(
            "expected a geo point, got {other:?}"
        ))),
    }
}

fn near_sphere(
    value: &Option<Value>,
    operand: &serde_json::Value,
    max_distance: Option<&serde_json::Value>,
) -> QueryResult<bool> {
    let center = decode_geo(operand)?;
    let max = max_distance
        .and_then(|d| d.as_f64())
        .unwrap_or(f64::INFINITY);
    Ok(match value {
        Some(Value::GeoPoint(point)) => center.radians_to(point) <= max,
        _ => false,
    })
}

fn within_box(value: &Option<Value>, operand: &serde_json::Value) -> QueryResult<bool> {
    let corners = operand
        .get("$box")
        .and_then(|b| b.as_array())
        .ok_or_else(|| QueryError::invalid_constraint("$within expects a $box"))?;
    if corners.len() != 2 {
        return Err(QueryError::invalid_constraint(
            "$box expects exactly two corners",
        ));
    }
    let southwest = decode_geo(&corners[0])?;
    let northeast = decode_geo(&corners[1])?;

    Ok(match value {
        Some(Value::GeoPoint(point)) => {
            point.latitude() >= southwest.latitude()
                && point.latitude() <= northeast.latitude()
                && point.longitude() >= southwest.longitude()
                && point.longitude() <= northeast.longitude()
        }
        _ => false,
    })
}

fn geo_within(value: &Option<Value>, operand: &serde_json::Value) -> QueryResult<bool> {
    if let Some(polygon) = operand.get("$polygon") {
        let vertices = polygon
            .as_array()
            .ok_or_else(|| QueryError::malformed_polygon("$polygon is not an array"))?;
        if vertices.len() < 3 {
            return Err(QueryError::malformed_polygon(
                "polygon needs at least 3 vertices",
            ));
        }
        let points: QueryResult<Vec<GeoPoint>> = vertices.iter().map(decode_geo).collect();
        let points = points?;
        return Ok(match value {
            Some(Value::GeoPoint(point)) => point_in_polygon(point, &points),
            _ => false,
        });
    }

    if let Some(sphere) = operand.get("$centerSphere") {
        let parts = sphere
            .as_array()
            .ok_or_else(|| QueryError::invalid_constraint("$centerSphere is not an array"))?;
        if parts.len() != 2 {
            return Err(QueryError::invalid_constraint(
                "$centerSphere expects [center, distance]",
            ));
        }
        let center = decode_geo(&parts[0])?;
        let distance = parts[1]
            .as_f64()
            .ok_or_else(|| QueryError::invalid_constraint("$centerSphere distance"))?;
        return Ok(match value {
            Some(Value::GeoPoint(point)) => center.radians_to(point) <= distance,
            _ => false,
        });
    }

    Err(QueryError::invalid_constraint(
        "$geoWithin expects $polygon or $centerSphere",
    ))
}

/// Ray casting over (latitude, longitude) pairs.
fn point_in_polygon(point: &GeoPoint, vertices: &[GeoPoint]) -> bool {
    let (x, y) = (point.longitude(), point.latitude());
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let (xi, yi) = (vertices[i].longitude(), vertices[i].latitude());
        let (xj, yj) = (vertices[j].longitude(), vertices[j].latitude());
        if ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn sub_query_parts(
    operand: &serde_json::Value,
) -> QueryResult<(&str, &serde_json::Value)> {
    let class_name = operand
        .get("className")
        .and_then(|c| c.as_str())
        .ok_or_else(|| QueryError::invalid_constraint("sub-query missing className"))?;
    let where_clause = operand
        .get("where")
        .ok_or_else(|| QueryError::invalid_constraint("sub-query missing where"))?;
    Ok((class_name, where_clause))
}

fn in_query(
    value: &Option<Value>,
    operand: &serde_json::Value,
    runner: &dyn SubQueryRunner,
) -> QueryResult<bool> {
    let (class_name, where_clause) = sub_query_parts(operand)?;
    let results = runner.run_sub_query(class_name, where_clause)?;

    let target_key = match value {
        Some(value) => match value.identity_key() {
            Some(key) => key,
            None => return Ok(false),
        },
        None => return Ok(false),
    };
    Ok(results
        .iter()
        .any(|result| result.identity_key().as_deref() == Some(target_key.as_str())))
}

fn select(
    value: &Option<Value>,
    operand: &serde_json::Value,
    runner: &dyn SubQueryRunner,
    negate: bool,
) -> QueryResult<bool> {
    let key = operand
        .get("key")
        .and_then(|k| k.as_str())
        .ok_or_else(|| QueryError::invalid_constraint("$select missing key"))?;
    let query = operand
        .get("query")
        .ok_or_else(|| QueryError::invalid_constraint("$select missing query"))?;
    let (class_name, where_clause) = sub_query_parts(query)?;
    let results = runner.run_sub_query(class_name, where_clause)?;

    let matched = match value {
        Some(value) => results.iter().any(|result| {
            result
                .attributes
                .get(key)
                .is_some_and(|candidate| equals(value, candidate))
        }),
        None => false,
    };
    Ok(matched != negate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use remora_value::Pointer;
    use serde_json::json;

    struct NoSubQueries;

    impl SubQueryRunner for NoSubQueries {
        fn run_sub_query(
            &self,
            _class_name: &str,
            _where_clause: &serde_json::Value,
        ) -> QueryResult<Vec<ObjectData>> {
            Ok(Vec::new())
        }
    }

    struct FixedResults(Vec<ObjectData>);

    impl SubQueryRunner for FixedResults {
        fn run_sub_query(
            &self,
            _class_name: &str,
            _where_clause: &serde_json::Value,
        ) -> QueryResult<Vec<ObjectData>> {
            Ok(self.0.clone())
        }
    }

    fn record(id: &str, attrs: &[(&str, Value)]) -> ObjectData {
        let mut data = ObjectData::new("Game");
        data.object_id = Some(id.to_string());
        for (k, v) in attrs {
            data.attributes.insert((*k).to_string(), v.clone());
        }
        data
    }

    fn matches(data: &ObjectData, where_clause: serde_json::Value) -> bool {
        matches_where(data, &where_clause, &NoSubQueries).unwrap()
    }

    #[test]
    fn equality_and_missing_attributes() {
        let data = record("g1", &[("score", Value::Number(3.0))]);
        assert!(matches(&data, json!({"score": 3})));
        assert!(!matches(&data, json!({"score": 4})));
        assert!(!matches(&data, json!({"missing": 4})));
        assert!(matches(&data, json!({"missing": null})));
    }

    #[test]
    fn range_operators() {
        let data = record("g1", &[("score", Value::Number(5.0))]);
        assert!(matches(&data, json!({"score": {"$gt": 3, "$lt": 7}})));
        assert!(!matches(&data, json!({"score": {"$gt": 5}})));
        assert!(matches(&data, json!({"score": {"$gte": 5, "$lte": 5}})));
        // Missing attributes never satisfy range constraints.
        assert!(!matches(&data, json!({"missing": {"$lt": 10}})));
    }

    #[test]
    fn mismatched_types_never_order() {
        let data = record("g1", &[("score", Value::from("high"))]);
        assert!(!matches(&data, json!({"score": {"$gt": 3}})));
    }

    #[test]
    fn contained_in_and_not() {
        let data = record("g1", &[("number", Value::Number(3.0))]);
        assert!(matches(&data, json!({"number": {"$in": [3, 5, 7]}})));
        assert!(!matches(&data, json!({"number": {"$in": [4, 6]}})));
        assert!(matches(&data, json!({"number": {"$nin": [4, 6]}})));
        // Missing attribute: $in false, $nin true.
        assert!(!matches(&data, json!({"missing": {"$in": [1]}})));
        assert!(matches(&data, json!({"missing": {"$nin": [1]}})));
    }

    #[test]
    fn in_matches_any_array_element() {
        let data = record(
            "g1",
            &[(
                "tags",
                Value::Array(vec![Value::from("a"), Value::from("b")]),
            )],
        );
        assert!(matches(&data, json!({"tags": {"$in": ["b", "z"]}})));
        assert!(!matches(&data, json!({"tags": {"$in": ["z"]}})));
    }

    #[test]
    fn all_and_contained_by() {
        let data = record(
            "g1",
            &[(
                "tags",
                Value::Array(vec![Value::from("a"), Value::from("b"), Value::from("c")]),
            )],
        );
        assert!(matches(&data, json!({"tags": {"$all": ["a", "c"]}})));
        assert!(!matches(&data, json!({"tags": {"$all": ["a", "z"]}})));
        assert!(matches(
            &data,
            json!({"tags": {"$containedBy": ["a", "b", "c", "d"]}})
        ));
        assert!(!matches(&data, json!({"tags": {"$containedBy": ["a", "b"]}})));
    }

    #[test]
    fn exists_and_does_not_exist() {
        let data = record("g1", &[("present", Value::Number(0.0)), ("nul", Value::Null)]);
        assert!(matches(&data, json!({"present": {"$exists": true}})));
        assert!(matches(&data, json!({"missing": {"$exists": false}})));
        // Null does not exist.
        assert!(matches(&data, json!({"nul": {"$exists": false}})));
    }

    #[test]
    fn regex_flags() {
        let data = record("g1", &[("name", Value::from("Hello World"))]);
        assert!(matches(&data, json!({"name": {"$regex": "^hello", "$options": "i"}})));
        assert!(!matches(&data, json!({"name": {"$regex": "^hello"}})));
        // Extended flag ignores pattern whitespace and comments.
        assert!(matches(
            &data,
            json!({"name": {"$regex": "^Hello # greeting\n \\ World$", "$options": "x"}})
        ));
    }

    #[test]
    fn regex_on_non_string_is_false_not_error() {
        let data = record("g1", &[("score", Value::Number(1.0))]);
        assert!(!matches(&data, json!({"score": {"$regex": "1"}})));
    }

    #[test]
    fn invalid_regex_options_error() {
        let data = record("g1", &[("name", Value::from("x"))]);
        let result = matches_where(
            &data,
            &json!({"name": {"$regex": "x", "$options": "iz"}}),
            &NoSubQueries,
        );
        assert!(matches!(
            result,
            Err(QueryError::InvalidRegexOptions { .. })
        ));
    }

    #[test]
    fn near_sphere_with_max_distance() {
        let here = GeoPoint::new(40.0, -30.0).unwrap();
        let data = record("g1", &[("location", Value::GeoPoint(here))]);
        let center = json!({"__type": "GeoPoint", "latitude": 40.0, "longitude": -30.1});

        assert!(matches(
            &data,
            json!({"location": {"$nearSphere": center, "$maxDistance": 0.01}})
        ));
        assert!(!matches(
            &data,
            json!({"location": {"$nearSphere": center, "$maxDistance": 0.0000001}})
        ));
    }

    #[test]
    fn within_box_bounds() {
        let data = record(
            "g1",
            &[(
                "location",
                Value::GeoPoint(GeoPoint::new(10.0, 10.0).unwrap()),
            )],
        );
        let in_box = json!({"location": {"$within": {"$box": [
            {"__type": "GeoPoint", "latitude": 5.0, "longitude": 5.0},
            {"__type": "GeoPoint", "latitude": 15.0, "longitude": 15.0},
        ]}}});
        let out_box = json!({"location": {"$within": {"$box": [
            {"__type": "GeoPoint", "latitude": 11.0, "longitude": 11.0},
            {"__type": "GeoPoint", "latitude": 15.0, "longitude": 15.0},
        ]}}});
        assert!(matches(&data, in_box));
        assert!(!matches(&data, out_box));
    }

    #[test]
    fn polygon_containment_and_validation() {
        let data = record(
            "g1",
            &[(
                "location",
                Value::GeoPoint(GeoPoint::new(1.0, 1.0).unwrap()),
            )],
        );
        let triangle = json!([
            {"__type": "GeoPoint", "latitude": 0.0, "longitude": 0.0},
            {"__type": "GeoPoint", "latitude": 0.0, "longitude": 4.0},
            {"__type": "GeoPoint", "latitude": 4.0, "longitude": 0.0},
        ]);
        assert!(matches(
            &data,
            json!({"location": {"$geoWithin": {"$polygon": triangle}}})
        ));

        let two_points = json!([
            {"__type": "GeoPoint", "latitude": 0.0, "longitude": 0.0},
            {"__type": "GeoPoint", "latitude": 1.0, "longitude": 1.0},
        ]);
        let result = matches_where(
            &data,
            &json!({"location": {"$geoWithin": {"$polygon": two_points}}}),
            &NoSubQueries,
        );
        assert!(matches!(result, Err(QueryError::MalformedPolygon { .. })));
    }

    #[test]
    fn logical_composition() {
        let data = record("g1", &[("score", Value::Number(5.0))]);
        assert!(matches(
            &data,
            json!({"$or": [{"score": 1}, {"score": {"$gt": 4}}]})
        ));
        assert!(matches(
            &data,
            json!({"$and": [{"score": {"$gt": 4}}, {"score": {"$lt": 6}}]})
        ));
        assert!(matches(&data, json!({"$nor": [{"score": 1}, {"score": 2}]})));
        assert!(!matches(&data, json!({"$nor": [{"score": 5}]})));
    }

    #[test]
    fn in_query_matches_pointer_identity() {
        let data = record(
            "g1",
            &[(
                "owner",
                Value::Pointer(Pointer::new("Player", "p1")),
            )],
        );
        let mut player = ObjectData::new("Player");
        player.object_id = Some("p1".into());
        let runner = FixedResults(vec![player]);

        let clause = json!({"owner": {"$inQuery": {"className": "Player", "where": {}}}});
        assert!(matches_where(&data, &clause, &runner).unwrap());

        let miss = json!({"owner": {"$notInQuery": {"className": "Player", "where": {}}}});
        assert!(!matches_where(&data, &miss, &runner).unwrap());
    }

    #[test]
    fn select_compares_sub_query_key_values() {
        let data = record("g1", &[("city", Value::from("austin"))]);
        let mut hub = ObjectData::new("Hub");
        hub.object_id = Some("h1".into());
        hub.attributes.insert("city".into(), Value::from("austin"));
        let runner = FixedResults(vec![hub]);

        let clause = json!({"city": {"$select": {
            "key": "city",
            "query": {"className": "Hub", "where": {}},
        }}});
        assert!(matches_where(&data, &clause, &runner).unwrap());

        let negated = json!({"city": {"$dontSelect": {
            "key": "city",
            "query": {"className": "Hub", "where": {}},
        }}});
        assert!(!matches_where(&data, &negated, &runner).unwrap());
    }

    #[test]
    fn unknown_operator_errors() {
        let data = record("g1", &[]);
        let result = matches_where(&data, &json!({"a": {"$frobnicate": 1}}), &NoSubQueries);
        assert!(matches!(
            result,
            Err(QueryError::UnsupportedOperator { .. })
        ));
    }

    #[test]
    fn related_to_is_unsupported_offline() {
        let data = record("g1", &[]);
        let clause = json!({"$relatedTo": {
            "object": {"__type": "Pointer", "className": "Game", "objectId": "g1"},
            "key": "players",
        }});
        let result = matches_where(&data, &clause, &NoSubQueries);
        assert!(matches!(
            result,
            Err(QueryError::UnsupportedOperator { .. })
        ));
    }

    #[test]
    fn object_id_is_queryable() {
        let data = record("g5", &[]);
        assert!(matches(&data, json!({"objectId": "g5"})));
        assert!(matches(&data, json!({"objectId": {"$gt": "g4"}})));
        assert!(!matches(&data, json!({"objectId": {"$gt": "g5"}})));
    }
}
