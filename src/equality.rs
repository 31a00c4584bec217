//! Structural deep equality.

use crate::value::Value;

/// Compares two values structurally.
///
/// Unlike IEEE comparison, two `NaN`s are equal. Arrays compare element-wise
/// in order, records by key set and per-key value. Values of different kinds
/// are never equal, and `Null` only equals `Null`.
pub fn deep_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| deep_equals(x, y))
        }
        (Value::Record(a), Value::Record(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| deep_equals(x, y)))
        }
        _ => false,
    }
}
