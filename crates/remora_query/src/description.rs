//! Declarative query descriptions.

use remora_value::{encode, GeoPoint, Value, ValueResult};
use serde_json::{json, Map};

/// Which part of the offline cache a query runs against.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum QuerySource {
    /// Every pinned record of the class.
    #[default]
    AllPinned,
    /// Records in the default (unnamed) pin set.
    DefaultPin,
    /// Records in one named pin set.
    NamedPin(String),
}

/// One sort key with direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Attribute to sort by.
    pub key: String,
    /// True for descending order.
    pub descending: bool,
}

/// A declarative query over one class.
///
/// Mirrors the remote query JSON: a `where` predicate tree, a comma-joined
/// `order` list (`-` prefix = descending), `limit`, `skip`, select `keys`,
/// and `include` paths. Builder methods append constraints; constraints on
/// the same attribute merge into one constraint object.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescription {
    /// Class the query targets.
    pub class_name: String,
    /// The `where` predicate tree, in wire JSON form.
    pub where_clause: serde_json::Value,
    /// Sort keys, applied in order, each independently directed.
    pub order: Vec<SortKey>,
    /// Maximum number of results; `None` = no limit.
    pub limit: Option<usize>,
    /// Number of leading results to drop (ignored for `count`).
    pub skip: usize,
    /// Attributes to retain in results; `None` = all.
    pub keys: Option<Vec<String>>,
    /// Dot-separated pointer paths to hydrate.
    pub include: Vec<String>,
    /// The offline source to evaluate against.
    pub source: QuerySource,
}

impl QueryDescription {
    /// Creates an unconstrained query over a class.
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            where_clause: json!({}),
            order: Vec::new(),
            limit: None,
            skip: 0,
            keys: None,
            include: Vec::new(),
            source: QuerySource::AllPinned,
        }
    }

    /// Parses the wire JSON shape (`where`, `order`, `limit`, `skip`,
    /// `keys`, `include`) into a description.
    pub fn from_json(class_name: impl Into<String>, raw: &serde_json::Value) -> Self {
        let mut query = Self::new(class_name);
        if let Some(where_clause) = raw.get("where") {
            query.where_clause = where_clause.clone();
        }
        if let Some(order) = raw.get("order").and_then(|o| o.as_str()) {
            query.order = Self::parse_order(order);
        }
        if let Some(limit) = raw.get("limit").and_then(|l| l.as_i64()) {
            if limit >= 0 {
                query.limit = Some(limit as usize);
            }
        }
        if let Some(skip) = raw.get("skip").and_then(|s| s.as_u64()) {
            query.skip = skip as usize;
        }
        if let Some(keys) = raw.get("keys").and_then(|k| k.as_str()) {
            query.keys = Some(keys.split(',').map(str::to_string).collect());
        }
        if let Some(include) = raw.get("include").and_then(|i| i.as_str()) {
            query.include = include.split(',').map(str::to_string).collect();
        }
        query
    }

    fn parse_order(order: &str) -> Vec<SortKey> {
        order
            .split(',')
            .filter(|key| !key.is_empty())
            .map(|key| match key.strip_prefix('-') {
                Some(stripped) => SortKey {
                    key: stripped.to_string(),
                    descending: true,
                },
                None => SortKey {
                    key: key.to_string(),
                    descending: false,
                },
            })
            .collect()
    }

    fn constraint_slot(&mut self, attr: &str) -> &mut Map<String, serde_json::Value> {
        let tree = self
            .where_clause
            .as_object_mut()
            .expect("where clause is always an object");
        let slot = tree
            .entry(attr.to_string())
            .or_insert_with(|| json!({}));
        if !slot.is_object()
            || slot
                .as_object()
                .is_some_and(|m| m.keys().any(|k| !k.starts_with('$')))
        {
            // An equality literal was already set; replace it with a
            // constraint object so further constraints can merge.
            *slot = json!({});
        }
        slot.as_object_mut().expect("slot was just made an object")
    }

    fn add_constraint(mut self, attr: &str, operator: &str, value: serde_json::Value) -> Self {
        self.constraint_slot(attr).insert(operator.into(), value);
        self
    }

    /// Requires `attr` to equal a value.
    pub fn equal_to(mut self, attr: &str, value: impl Into<Value>) -> ValueResult<Self> {
        let encoded = encode(&value.into())?;
        self.where_clause
            .as_object_mut()
            .expect("where clause is always an object")
            .insert(attr.to_string(), encoded);
        Ok(self)
    }

    /// Requires `attr` to differ from a value.
    pub fn not_equal_to(self, attr: &str, value: impl Into<Value>) -> ValueResult<Self> {
        let encoded = encode(&value.into())?;
        Ok(self.add_constraint(attr, "$ne", encoded))
    }

    /// Requires `attr < value`.
    pub fn less_than(self, attr: &str, value: impl Into<Value>) -> ValueResult<Self> {
        let encoded = encode(&value.into())?;
        Ok(self.add_constraint(attr, "$lt", encoded))
    }

    /// Requires `attr <= value`.
    pub fn less_than_or_equal(self, attr: &str, value: impl Into<Value>) -> ValueResult<Self> {
        let encoded = encode(&value.into())?;
        Ok(self.add_constraint(attr, "$lte", encoded))
    }

    /// Requires `attr > value`.
    pub fn greater_than(self, attr: &str, value: impl Into<Value>) -> ValueResult<Self> {
        let encoded = encode(&value.into())?;
        Ok(self.add_constraint(attr, "$gt", encoded))
    }

    /// Requires `attr >= value`.
    pub fn greater_than_or_equal(self, attr: &str, value: impl Into<Value>) -> ValueResult<Self> {
        let encoded = encode(&value.into())?;
        Ok(self.add_constraint(attr, "$gte", encoded))
    }

    /// Requires `attr` to be one of the listed values.
    pub fn contained_in(self, attr: &str, values: Vec<Value>) -> ValueResult<Self> {
        let encoded: ValueResult<Vec<_>> = values.iter().map(encode).collect();
        Ok(self.add_constraint(attr, "$in", json!(encoded?)))
    }

    /// Requires `attr` to be none of the listed values.
    pub fn not_contained_in(self, attr: &str, values: Vec<Value>) -> ValueResult<Self> {
        let encoded: ValueResult<Vec<_>> = values.iter().map(encode).collect();
        Ok(self.add_constraint(attr, "$nin", json!(encoded?)))
    }

    /// Requires the array `attr` to contain every listed value.
    pub fn contains_all(self, attr: &str, values: Vec<Value>) -> ValueResult<Self> {
        let encoded: ValueResult<Vec<_>> = values.iter().map(encode).collect();
        Ok(self.add_constraint(attr, "$all", json!(encoded?)))
    }

    /// Requires the array `attr` to be a subset of the listed values.
    pub fn contained_by(self, attr: &str, values: Vec<Value>) -> ValueResult<Self> {
        let encoded: ValueResult<Vec<_>> = values.iter().map(encode).collect();
        Ok(self.add_constraint(attr, "$containedBy", json!(encoded?)))
    }

    /// Requires `attr` to exist.
    pub fn exists(self, attr: &str) -> Self {
        self.add_constraint(attr, "$exists", json!(true))
    }

    /// Requires `attr` to not exist.
    pub fn does_not_exist(self, attr: &str) -> Self {
        self.add_constraint(attr, "$exists", json!(false))
    }

    /// Requires the string `attr` to match a regex with modifier flags
    /// (`i`, `m`, `x`, `s`).
    pub fn matches(self, attr: &str, pattern: &str, options: &str) -> Self {
        let with_pattern = self.add_constraint(attr, "$regex", json!(pattern));
        if options.is_empty() {
            with_pattern
        } else {
            with_pattern.add_constraint(attr, "$options", json!(options))
        }
    }

    /// Requires the string `attr` to start with a literal prefix.
    pub fn starts_with(self, attr: &str, prefix: &str) -> Self {
        self.add_constraint(attr, "$regex", json!(format!("^{}", regex::escape(prefix))))
    }

    /// Requires the geo point `attr` to lie within `max_distance` radians
    /// of `point`.
    pub fn within_radians(self, attr: &str, point: GeoPoint, max_distance: f64) -> ValueResult<Self> {
        let encoded = encode(&Value::GeoPoint(point))?;
        Ok(self
            .add_constraint(attr, "$nearSphere", encoded)
            .add_constraint(attr, "$maxDistance", json!(max_distance)))
    }

    /// Requires the geo point `attr` to lie within a box.
    pub fn within_box(self, attr: &str, southwest: GeoPoint, northeast: GeoPoint) -> ValueResult<Self> {
        let sw = encode(&Value::GeoPoint(southwest))?;
        let ne = encode(&Value::GeoPoint(northeast))?;
        Ok(self.add_constraint(attr, "$within", json!({"$box": [sw, ne]})))
    }

    /// Requires the geo point `attr` to lie within a polygon of at least
    /// three vertices.
    pub fn within_polygon(self, attr: &str, vertices: Vec<GeoPoint>) -> ValueResult<Self> {
        let encoded: ValueResult<Vec<_>> = vertices
            .into_iter()
            .map(|v| encode(&Value::GeoPoint(v)))
            .collect();
        Ok(self.add_constraint(attr, "$geoWithin", json!({"$polygon": encoded?})))
    }

    /// Requires the pointer `attr` to match an object the sub-query
    /// returns.
    pub fn matches_query(self, attr: &str, sub_query: &QueryDescription) -> Self {
        let encoded = sub_query.to_sub_query_json();
        self.add_constraint(attr, "$inQuery", encoded)
    }

    /// Requires the pointer `attr` to match no object the sub-query
    /// returns.
    pub fn does_not_match_query(self, attr: &str, sub_query: &QueryDescription) -> Self {
        let encoded = sub_query.to_sub_query_json();
        self.add_constraint(attr, "$notInQuery", encoded)
    }

    /// Requires `attr` to equal the value of `key` on some object the
    /// sub-query returns.
    pub fn matches_key_in_query(
        self,
        attr: &str,
        key: &str,
        sub_query: &QueryDescription,
    ) -> Self {
        let encoded = json!({"key": key, "query": sub_query.to_sub_query_json()});
        self.add_constraint(attr, "$select", encoded)
    }

    /// Requires `attr` to equal no value of `key` on any object the
    /// sub-query returns.
    pub fn does_not_match_key_in_query(
        self,
        attr: &str,
        key: &str,
        sub_query: &QueryDescription,
    ) -> Self {
        let encoded = json!({"key": key, "query": sub_query.to_sub_query_json()});
        self.add_constraint(attr, "$dontSelect", encoded)
    }

    fn to_sub_query_json(&self) -> serde_json::Value {
        json!({
            "className": self.class_name,
            "where": self.where_clause,
        })
    }

    fn compound(class_name: &str, operator: &str, queries: &[QueryDescription]) -> Self {
        let clauses: Vec<_> = queries.iter().map(|q| q.where_clause.clone()).collect();
        let mut query = Self::new(class_name);
        query.where_clause = json!({operator: clauses});
        query
    }

    /// Matches objects satisfying any of the given queries.
    pub fn or(class_name: &str, queries: &[QueryDescription]) -> Self {
        Self::compound(class_name, "$or", queries)
    }

    /// Matches objects satisfying all of the given queries.
    pub fn and(class_name: &str, queries: &[QueryDescription]) -> Self {
        Self::compound(class_name, "$and", queries)
    }

    /// Matches objects satisfying none of the given queries.
    pub fn nor(class_name: &str, queries: &[QueryDescription]) -> Self {
        Self::compound(class_name, "$nor", queries)
    }

    /// Appends an ascending sort key.
    pub fn ascending(mut self, key: &str) -> Self {
        self.order.push(SortKey {
            key: key.to_string(),
            descending: false,
        });
        self
    }

    /// Appends a descending sort key.
    pub fn descending(mut self, key: &str) -> Self {
        self.order.push(SortKey {
            key: key.to_string(),
            descending: true,
        });
        self
    }

    /// Caps the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Drops the first `skip` results.
    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Restricts result attributes to the named keys.
    pub fn select(mut self, keys: Vec<String>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Hydrates the pointer at a dot-separated path in results.
    pub fn include(mut self, path: &str) -> Self {
        self.include.push(path.to_string());
        self
    }

    /// Evaluates against every pinned record.
    pub fn from_local_datastore(mut self) -> Self {
        self.source = QuerySource::AllPinned;
        self
    }

    /// Evaluates against the default pin set.
    pub fn from_pin(mut self) -> Self {
        self.source = QuerySource::DefaultPin;
        self
    }

    /// Evaluates against one named pin set.
    pub fn from_pin_with_name(mut self, name: &str) -> Self {
        self.source = QuerySource::NamedPin(name.to_string());
        self
    }
}
