//! Dynamic decoded value type.

use crate::error::{ValueError, ValueResult};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// A decoded attribute value.
///
/// This type represents any value an attribute of a remote object can hold,
/// after the tagged wire JSON has been decoded. Plain containers
/// (`Array`/`Object`) hold further `Value`s recursively.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Numeric value. The wire format does not distinguish integers from
    /// floats, so neither does this type.
    Number(f64),
    /// Text string (UTF-8).
    String(String),
    /// Binary payload (base64 on the wire).
    Bytes(Vec<u8>),
    /// Timestamp with millisecond precision, UTC.
    Date(DateTime<Utc>),
    /// Reference to another persisted object.
    Pointer(Pointer),
    /// Geographic coordinate.
    GeoPoint(GeoPoint),
    /// Lazy many-to-many edge. Holds only the target class; membership is
    /// expressed through operations, never materialized client-side.
    Relation(Relation),
    /// Array of values.
    Array(Vec<Value>),
    /// Plain JSON object (not a typed wrapper).
    Object(BTreeMap<String, Value>),
    /// A fully nested decoded object (`__type: "Object"` on the wire).
    NestedObject(Box<ObjectData>),
}

/// A reference to a persisted object: class name plus server id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pointer {
    /// Class of the referenced object.
    pub class_name: String,
    /// Server-assigned object id.
    pub object_id: String,
}

impl Pointer {
    /// Creates a pointer.
    pub fn new(class_name: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            object_id: object_id.into(),
        }
    }

    /// Returns the flat identity key (`ClassName_objectId`) for this pointer.
    pub fn identity_key(&self) -> String {
        format!("{}_{}", self.class_name, self.object_id)
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}${}", self.class_name, self.object_id)
    }
}

/// A geographic coordinate, validated to ±90 / ±180 degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

impl GeoPoint {
    /// Creates a geo point, validating the coordinate ranges.
    pub fn new(latitude: f64, longitude: f64) -> ValueResult<Self> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(ValueError::invalid_geo_point(format!(
                "latitude {latitude} out of range [-90, 90]"
            )));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(ValueError::invalid_geo_point(format!(
                "longitude {longitude} out of range [-180, 180]"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Latitude in degrees.
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Longitude in degrees.
    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Great-circle distance to `other` in radians (haversine).
    pub fn radians_to(&self, other: &GeoPoint) -> f64 {
        let d2r = std::f64::consts::PI / 180.0;
        let lat1 = self.latitude * d2r;
        let lat2 = other.latitude * d2r;
        let dlat = lat2 - lat1;
        let dlng = (other.longitude - self.longitude) * d2r;
        let sin_dlat = (dlat / 2.0).sin();
        let sin_dlng = (dlng / 2.0).sin();
        let a = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlng * sin_dlng;
        2.0 * a.sqrt().min(1.0).asin()
    }
}

/// A lazy relation edge: only the target class is known client-side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// Class of the objects on the far side of the relation, once known.
    pub target_class_name: Option<String>,
}

impl Relation {
    /// Creates a relation with a known target class.
    pub fn new(target_class_name: impl Into<String>) -> Self {
        Self {
            target_class_name: Some(target_class_name.into()),
        }
    }

    /// Creates a relation whose target class is not yet known.
    pub fn unknown() -> Self {
        Self {
            target_class_name: None,
        }
    }
}

/// A fully decoded object: class, optional id, and attributes.
///
/// This is the shape nested `__type: "Object"` payloads decode into, and
/// the shape the local datastore stores.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectData {
    /// Class name.
    pub class_name: String,
    /// Server id, absent for objects never saved.
    pub object_id: Option<String>,
    /// Attribute map.
    pub attributes: BTreeMap<String, Value>,
}

impl ObjectData {
    /// Creates an empty object of the given class.
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            object_id: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Returns the flat identity key, if the object has a server id.
    pub fn identity_key(&self) -> Option<String> {
        self.object_id
            .as_ref()
            .map(|id| format!("{}_{}", self.class_name, id))
    }

    /// Returns a bare pointer to this object, if it has a server id.
    pub fn to_pointer(&self) -> Option<Pointer> {
        self.object_id
            .as_ref()
            .map(|id| Pointer::new(self.class_name.clone(), id.clone()))
    }
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as a number, if it is one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as a date, if it is one.
    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a plain object map, if it is one.
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    /// Get this value as a pointer, if it is one.
    pub fn as_pointer(&self) -> Option<&Pointer> {
        match self {
            Value::Pointer(p) => Some(p),
            _ => None,
        }
    }

    /// True if this value is a plain mutable container (array or object),
    /// as opposed to a typed wrapper. Containers obtained via `get` can be
    /// mutated in place without going through the operation algebra, so
    /// they participate in snapshot-based dirty detection.
    pub fn is_plain_container(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Object(_))
    }

    /// The identity key of this value, if it references a persisted object
    /// (a pointer or a nested object with a server id).
    ///
    /// Used for identity-based element equality in array operations: two
    /// references to the same persisted object are the same element even
    /// when their attribute snapshots differ.
    pub fn identity_key(&self) -> Option<String> {
        match self {
            Value::Pointer(p) => Some(p.identity_key()),
            Value::NestedObject(o) => o.identity_key(),
            _ => None,
        }
    }

    /// Element equality for array operations: identity-key equality for
    /// object-typed elements, plain equality otherwise.
    pub fn same_element(&self, other: &Value) -> bool {
        match (self.identity_key(), other.identity_key()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self == other,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<Pointer> for Value {
    fn from(p: Pointer) -> Self {
        Value::Pointer(p)
    }
}

impl From<GeoPoint> for Value {
    fn from(g: GeoPoint) -> Self {
        Value::GeoPoint(g)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geo_point_validates_ranges() {
        assert!(GeoPoint::new(45.0, 90.0).is_ok());
        assert!(GeoPoint::new(90.0, 180.0).is_ok());
        assert!(GeoPoint::new(90.1, 0.0).is_err());
        assert!(GeoPoint::new(0.0, -180.5).is_err());
    }

    #[test]
    fn geo_point_distance_to_self_is_zero() {
        let p = GeoPoint::new(40.0, -30.0).unwrap();
        assert!(p.radians_to(&p).abs() < 1e-12);
    }

    #[test]
    fn geo_point_quarter_circumference() {
        // Pole to equator is a quarter of a great circle.
        let pole = GeoPoint::new(90.0, 0.0).unwrap();
        let equator = GeoPoint::new(0.0, 0.0).unwrap();
        let d = pole.radians_to(&equator);
        assert!((d - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn pointer_identity_key() {
        let p = Pointer::new("Game", "abc123");
        assert_eq!(p.identity_key(), "Game_abc123");
    }

    #[test]
    fn same_element_compares_pointers_by_identity() {
        let a = Value::Pointer(Pointer::new("Game", "abc"));
        let mut data = ObjectData::new("Game");
        data.object_id = Some("abc".into());
        data.attributes
            .insert("score".into(), Value::Number(10.0));
        let b = Value::NestedObject(Box::new(data));

        assert!(a.same_element(&b));
    }

    #[test]
    fn same_element_compares_primitives_by_value() {
        assert!(Value::from("bar").same_element(&Value::from("bar")));
        assert!(!Value::from("bar").same_element(&Value::from("baz")));
        assert!(!Value::from("bar").same_element(&Value::Pointer(Pointer::new("C", "x"))));
    }

    #[test]
    fn plain_container_detection() {
        assert!(Value::Array(vec![]).is_plain_container());
        assert!(Value::Object(BTreeMap::new()).is_plain_container());
        assert!(!Value::from("s").is_plain_container());
        assert!(!Value::Pointer(Pointer::new("C", "x")).is_plain_container());
    }
}
