//! Tagged option values and structural comparison against backend documents.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::Value;

/// A configuration value pushed to the backend.
///
/// Equality with observed documents is structural: containers compare
/// element by element regardless of how either side was built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// Explicit null, treated as "ensure absent".
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// String scalar.
    String(String),
    /// Ordered sequence.
    Sequence(Vec<OptionValue>),
    /// String-keyed mapping.
    Mapping(BTreeMap<String, OptionValue>),
}

impl OptionValue {
    /// True for [`OptionValue::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Compare against a value observed in a backend document.
    ///
    /// Scalars must have the same kind and value. Sequences must have the
    /// same length and matching elements. Mappings must have the same key
    /// set and matching values for every key.
    #[must_use]
    pub fn matches(&self, observed: &Value) -> bool {
        match (self, observed) {
            (Self::Null, Value::Null) => true,
            (Self::Bool(want), Value::Bool(have)) => want == have,
            (Self::Int(want), Value::Number(have)) => have.as_i64() == Some(*want),
            (Self::String(want), Value::String(have)) => want == have,
            (Self::Sequence(want), Value::Array(have)) => {
                want.len() == have.len() && want.iter().zip(have).all(|(w, h)| w.matches(h))
            }
            (Self::Mapping(want), Value::Object(have)) => {
                want.len() == have.len()
                    && want
                        .iter()
                        .all(|(k, w)| have.get(k).is_some_and(|h| w.matches(h)))
            }
            _ => false,
        }
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for OptionValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for OptionValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<OptionValue>> From<Vec<T>> for OptionValue {
    fn from(v: Vec<T>) -> Self {
        Self::Sequence(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<OptionValue>> From<BTreeMap<String, T>> for OptionValue {
    fn from(v: BTreeMap<String, T>) -> Self {
        Self::Mapping(v.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<OptionValue>> From<HashMap<String, T>> for OptionValue {
    fn from(v: HashMap<String, T>) -> Self {
        Self::Mapping(v.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<OptionValue>> From<Option<T>> for OptionValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<&OptionValue> for Value {
    fn from(v: &OptionValue) -> Self {
        match v {
            OptionValue::Null => Value::Null,
            OptionValue::Bool(b) => Value::Bool(*b),
            OptionValue::Int(i) => Value::from(*i),
            OptionValue::String(s) => Value::String(s.clone()),
            OptionValue::Sequence(items) => Value::Array(items.iter().map(Value::from).collect()),
            OptionValue::Mapping(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_scalars_require_matching_kind() {
        assert!(OptionValue::from("1").matches(&json!("1")));
        assert!(!OptionValue::from("1").matches(&json!(1)));
        assert!(OptionValue::from(1).matches(&json!(1)));
        assert!(!OptionValue::from(1).matches(&json!(1.5)));
        assert!(!OptionValue::from(true).matches(&json!("true")));
        assert!(OptionValue::from(false).matches(&json!(false)));
    }

    #[test]
    fn test_sequences_compare_by_length_then_elements() {
        let desired = OptionValue::from(vec!["a", "b", "c"]);
        assert!(desired.matches(&json!(["a", "b", "c"])));
        assert!(!desired.matches(&json!(["a", "b"])));
        assert!(!desired.matches(&json!(["a", "c", "b"])));
        assert!(!desired.matches(&json!("a,b,c")));
    }

    #[test]
    fn test_mappings_compare_by_key_set() {
        let mut map = HashMap::new();
        map.insert("boot_option".to_string(), "local");
        map.insert("boot_mode".to_string(), "uefi");
        let desired = OptionValue::from(map);

        assert!(desired.matches(&json!({"boot_mode": "uefi", "boot_option": "local"})));
        assert!(!desired.matches(&json!({"boot_mode": "uefi"})));
        assert!(!desired.matches(&json!({
            "boot_mode": "uefi",
            "boot_option": "local",
            "secure_boot": "true"
        })));
        assert!(!desired.matches(&json!({"boot_mode": "bios", "boot_option": "local"})));
    }

    #[test]
    fn test_nested_values() {
        let desired = OptionValue::Mapping(BTreeMap::from([(
            "disks".to_string(),
            OptionValue::from(vec![OptionValue::from(1), OptionValue::from("sda")]),
        )]));
        assert!(desired.matches(&json!({"disks": [1, "sda"]})));
        assert!(!desired.matches(&json!({"disks": ["1", "sda"]})));
    }

    #[test]
    fn test_serializes_as_plain_json() {
        let value = OptionValue::from(vec![OptionValue::from(1), OptionValue::Null]);
        assert_eq!(serde_json::to_value(&value).unwrap(), json!([1, null]));
        assert_eq!(Value::from(&value), json!([1, null]));
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(OptionValue::from(None::<String>), OptionValue::Null);
        assert_eq!(
            OptionValue::from(Some("x".to_string())),
            OptionValue::String("x".into())
        );
    }
}
