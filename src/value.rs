//! The structured value held by every container.
//!
//! State is deliberately dynamic: a container owns one `Value`, usually a
//! `Record` of named fields. Records are what make shallow merging, per-field
//! persistence and watched-key diffing possible. Applications that prefer
//! typed state can round-trip through serde with [`Value::from_serialize`]
//! and [`Value::deserialize_into`].

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::equality::deep_equals;

/// Largest integer an `f64` represents exactly (2^53).
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// A record of named fields.
pub type Record = BTreeMap<String, Value>;

/// An opaque structured value.
///
/// Numbers are IEEE doubles, so `NaN` is representable. Equality is the
/// structural deep equality used by watched-key diffing, under which two
/// `NaN`s are equal.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Record(Record),
}

impl Value {
    /// Builds a record from `(field, value)` pairs.
    pub fn record<K, V, I>(fields: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Record(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_record(&self) -> bool {
        matches!(self, Value::Record(_))
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Looks up a top-level field. Non-records have no fields.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.as_record().and_then(|fields| fields.get(field))
    }

    /// Top-level field names, empty for non-records.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.as_record()
            .into_iter()
            .flat_map(|fields| fields.keys().map(String::as_str))
    }

    /// Applies `patch` on top of `self`.
    ///
    /// A record patch over a record is a shallow merge: fields missing from
    /// the patch keep their current value. Any other patch replaces the value
    /// wholesale.
    pub fn merged(&self, patch: &Value) -> Value {
        match (self, patch) {
            (Value::Record(current), Value::Record(changes)) => {
                let mut next = current.clone();
                next.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
                Value::Record(next)
            }
            _ => patch.clone(),
        }
    }

    /// Converts any serializable value, typically a typed state struct.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Self> {
        serde_json::to_value(value).map(Value::from)
    }

    /// Converts into a typed value, typically a typed state struct.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.to_json())
    }

    /// JSON view of this value. `NaN` and infinities become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Record(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

fn as_safe_integer(n: f64) -> Option<i64> {
    (n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER).then_some(n as i64)
}

fn number_to_json(n: f64) -> serde_json::Value {
    match as_safe_integer(n) {
        Some(i) => serde_json::Value::from(i),
        None => serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        deep_equals(self, other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

// -------------------------------------------------------------------------------------------------
// Serde
// -------------------------------------------------------------------------------------------------

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => match as_safe_integer(*n) {
                Some(i) => serializer.serialize_i64(i),
                None if n.is_finite() => serializer.serialize_f64(*n),
                None => serializer.serialize_unit(),
            },
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => items.serialize(serializer),
            Value::Record(fields) => fields.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

// -------------------------------------------------------------------------------------------------
// Conversions
// -------------------------------------------------------------------------------------------------

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(fields) => Value::Record(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

macro_rules! from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(n: $ty) -> Self {
                    Value::Number(n as f64)
                }
            }
        )*
    };
}

from_number!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64);

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl From<Record> for Value {
    fn from(fields: Record) -> Self {
        Value::Record(fields)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

// -------------------------------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[test]
    fn test_merge_keeps_untouched_fields() {
        let prev = crate::value!({ "a": 0, "b": 2 });
        let next = prev.merged(&crate::value!({ "a": 1 }));
        assert_eq!(next, crate::value!({ "a": 1, "b": 2 }));
    }

    #[test]
    fn test_scalar_patch_replaces() {
        let prev = crate::value!({ "a": 0 });
        assert_eq!(prev.merged(&Value::from(5)), Value::from(5));

        let list = crate::value!([1, 2]);
        assert_eq!(prev.merged(&list), list);
    }

    #[test]
    fn test_record_patch_over_scalar_replaces() {
        let prev = Value::from("plain");
        let patch = crate::value!({ "a": 1 });
        assert_eq!(prev.merged(&patch), patch);
    }

    #[test]
    fn test_integral_numbers_serialize_as_integers() {
        assert_eq!(serde_json::to_string(&Value::from(25)).unwrap(), "25");
        assert_eq!(serde_json::to_string(&Value::from(2.5)).unwrap(), "2.5");
        assert_eq!(serde_json::to_string(&Value::Number(f64::NAN)).unwrap(), "null");
    }

    #[test]
    fn test_deserialize_from_json_text() {
        let value: Value = serde_json::from_str(r#"{"items":["Ball"],"age":3}"#).unwrap();
        assert_eq!(value.get("age"), Some(&Value::from(3)));
        assert_eq!(value.get("items"), Some(&crate::value!(["Ball"])));
    }

    #[test]
    fn test_typed_round_trip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Profile {
            name: String,
            age: u32,
        }

        let profile = Profile {
            name: "Nic".into(),
            age: 25,
        };
        let value = Value::from_serialize(&profile).unwrap();
        assert_eq!(value.get("name"), Some(&Value::from("Nic")));
        assert_eq!(value.deserialize_into::<Profile>().unwrap(), profile);
    }

    #[test]
    fn test_fields_of_non_record_is_empty() {
        assert_eq!(Value::from(1).fields().count(), 0);
        let v = crate::value!({ "x": 1, "y": 2 });
        let names: Vec<_> = v.fields().collect();
        assert_eq!(names, ["x", "y"]);
    }

    #[test]
    fn test_display_is_json() {
        assert_eq!(crate::value!({ "a": [1, true] }).to_string(), r#"{"a":[1,true]}"#);
    }
}
