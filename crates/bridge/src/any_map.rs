//! The payload format crossing the runtime boundary.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from typed [`AnyMap`] access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnyMapError {
    #[error("missing key '{0}'")]
    MissingKey(String),

    #[error("type mismatch for '{key}': expected {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// A tagged value stored in an [`AnyMap`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnyValue {
    Bool(bool),
    Double(f64),
    String(String),
    Array(Vec<AnyValue>),
    Map(AnyMap),
}

impl AnyValue {
    /// Name of the stored tag, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
        }
    }
}

impl From<bool> for AnyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for AnyValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<String> for AnyValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for AnyValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Vec<AnyValue>> for AnyValue {
    fn from(v: Vec<AnyValue>) -> Self {
        Self::Array(v)
    }
}

impl From<AnyMap> for AnyValue {
    fn from(v: AnyMap) -> Self {
        Self::Map(v)
    }
}

/// Types that can be read out of an [`AnyValue`] by tag.
pub trait FromAnyValue: Sized {
    /// Tag name reported on mismatch.
    const TYPE_NAME: &'static str;

    fn from_any_value(value: &AnyValue) -> Option<Self>;
}

impl FromAnyValue for bool {
    const TYPE_NAME: &'static str = "boolean";

    fn from_any_value(value: &AnyValue) -> Option<Self> {
        match value {
            AnyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromAnyValue for f64 {
    const TYPE_NAME: &'static str = "double";

    fn from_any_value(value: &AnyValue) -> Option<Self> {
        match value {
            AnyValue::Double(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromAnyValue for String {
    const TYPE_NAME: &'static str = "string";

    fn from_any_value(value: &AnyValue) -> Option<Self> {
        match value {
            AnyValue::String(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl FromAnyValue for Vec<AnyValue> {
    const TYPE_NAME: &'static str = "array";

    fn from_any_value(value: &AnyValue) -> Option<Self> {
        match value {
            AnyValue::Array(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl FromAnyValue for AnyMap {
    const TYPE_NAME: &'static str = "map";

    fn from_any_value(value: &AnyValue) -> Option<Self> {
        match value {
            AnyValue::Map(v) => Some(v.clone()),
            _ => None,
        }
    }
}

/// Ordered, string-keyed map of tagged values.
///
/// Insertion order is kept so that re-encoding to JSON is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnyMap {
    entries: IndexMap<String, AnyValue>,
}

impl AnyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous value in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<AnyValue>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AnyValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Read `key` as `T`, failing if it is absent or holds another tag.
    pub fn get<T: FromAnyValue>(&self, key: &str) -> Result<T, AnyMapError> {
        let value = self
            .entries
            .get(key)
            .ok_or_else(|| AnyMapError::MissingKey(key.to_string()))?;
        T::from_any_value(value).ok_or_else(|| AnyMapError::TypeMismatch {
            key: key.to_string(),
            expected: T::TYPE_NAME,
            found: value.type_name(),
        })
    }

    /// Raw access to a stored value.
    pub fn value(&self, key: &str) -> Option<&AnyValue> {
        self.entries.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn remove(&mut self, key: &str) -> Option<AnyValue> {
        self.entries.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AnyValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<AnyValue>> FromIterator<(K, V)> for AnyMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
