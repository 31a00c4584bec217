//! Macros for building state values.

/// Builds a [`Value`](crate::Value) from a JSON literal.
///
/// Accepts everything `serde_json::json!` accepts, including interpolated
/// expressions.
///
/// # Examples
///
/// ```rust
/// use singletn::{value, Value};
///
/// let name = "Nic";
/// let state = value!({ "name": name, "age": 25, "items": ["Ball"] });
///
/// assert_eq!(state.get("age"), Some(&Value::from(25)));
/// assert_eq!(state.get("name"), Some(&Value::from("Nic")));
/// ```
#[macro_export]
macro_rules! value {
    ($($json:tt)+) => {
        $crate::Value::from($crate::__serde_json::json!($($json)+))
    };
}
