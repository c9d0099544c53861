//! Immutable configuration snapshots.
//!
//! A [`Policy`] is built once (from JSON or programmatically), then shared
//! read-only by every formatter constructed with it. Cloning a `Policy` only
//! clones the `Arc`; no snapshot is ever mutated after construction.

use std::path::Path;
use std::sync::Arc;

use crate::property::{PropertyError, PropertySet, PropertyValue};

/// Errors raised while loading or querying a [`Policy`].
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("failed to read policy file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse policy JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("policy document must be a JSON object at the top level")]
    NotAnObject,
    #[error("invalid policy key: {0}")]
    InvalidKey(#[from] PropertyError),
    #[error("required policy key {key:?} is missing")]
    Missing { key: String },
    #[error("policy key {key:?} is not a {expected}")]
    WrongType { key: String, expected: &'static str },
}

/// Immutable, hierarchical configuration snapshot keyed by dotted names.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    root: Arc<PropertySet>,
}

impl PartialEq for Policy {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.root, &other.root) || self.root == other.root
    }
}

fn json_to_value(value: serde_json::Value) -> Result<Option<PropertyValue>, PolicyError> {
    Ok(Some(match value {
        serde_json::Value::Null => return Ok(None),
        serde_json::Value::Bool(b) => PropertyValue::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => PropertyValue::Int(i),
            None => PropertyValue::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => PropertyValue::String(s),
        serde_json::Value::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                if let Some(v) = json_to_value(item)? {
                    values.push(v);
                }
            }
            PropertyValue::Array(values)
        }
        serde_json::Value::Object(map) => PropertyValue::Set(json_object_to_set(map)?),
    }))
}

fn json_object_to_set(
    map: serde_json::Map<String, serde_json::Value>,
) -> Result<PropertySet, PolicyError> {
    let mut set = PropertySet::new();
    for (key, value) in map {
        if let Some(v) = json_to_value(value)? {
            // Dotted keys in the document are nested on purpose.
            set.set(&key, v)?;
        }
    }
    Ok(set)
}

impl Policy {
    /// An empty snapshot. Every lookup misses.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_property_set(root: PropertySet) -> Self {
        Self {
            root: Arc::new(root),
        }
    }

    /// Parses a JSON object into a snapshot. `null` members are dropped;
    /// integral numbers become `Int`, all other numbers `Double`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Parse`] for malformed JSON and
    /// [`PolicyError::NotAnObject`] if the document is not an object.
    pub fn from_json_str(text: &str) -> Result<Self, PolicyError> {
        match serde_json::from_str::<serde_json::Value>(text)? {
            serde_json::Value::Object(map) => Ok(Self::from_property_set(json_object_to_set(map)?)),
            _ => Err(PolicyError::NotAnObject),
        }
    }

    /// Reads and parses a JSON policy file.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Io`] if the file cannot be read, otherwise the
    /// same errors as [`from_json_str`](Self::from_json_str).
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let policy = Self::from_json_str(&text)?;
        tracing::debug!(path = %path.display(), keys = policy.root.len(), "loaded policy file");
        Ok(policy)
    }

    /// Borrow the underlying tree.
    #[must_use]
    pub fn as_property_set(&self) -> &PropertySet {
        &self.root
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.root.contains(key)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.root.get(key)
    }

    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.root.get_string(key)
    }

    #[must_use]
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.root.get_int(key)
    }

    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.root.get_bool(key)
    }

    #[must_use]
    pub fn get_double(&self, key: &str) -> Option<f64> {
        self.root.get_double(key)
    }

    #[must_use]
    pub fn string_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get_string(key).unwrap_or(default)
    }

    #[must_use]
    pub fn int_or(&self, key: &str, default: i64) -> i64 {
        self.get_int(key).unwrap_or(default)
    }

    #[must_use]
    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    /// Required string lookup.
    ///
    /// # Errors
    ///
    /// [`PolicyError::Missing`] if absent, [`PolicyError::WrongType`] if the
    /// value is not a string.
    pub fn require_string(&self, key: &str) -> Result<&str, PolicyError> {
        match self.get(key) {
            None => Err(PolicyError::Missing {
                key: key.to_string(),
            }),
            Some(value) => value.as_str().ok_or_else(|| PolicyError::WrongType {
                key: key.to_string(),
                expected: "string",
            }),
        }
    }

    /// Required integer lookup.
    ///
    /// # Errors
    ///
    /// [`PolicyError::Missing`] if absent, [`PolicyError::WrongType`] if the
    /// value is not an integer.
    pub fn require_int(&self, key: &str) -> Result<i64, PolicyError> {
        match self.get(key) {
            None => Err(PolicyError::Missing {
                key: key.to_string(),
            }),
            Some(value) => value.as_i64().ok_or_else(|| PolicyError::WrongType {
                key: key.to_string(),
                expected: "integer",
            }),
        }
    }

    /// Snapshot of the subtree at `key`. Missing or non-set keys yield an
    /// empty policy so callers can always fall back to defaults.
    #[must_use]
    pub fn sub_policy(&self, key: &str) -> Policy {
        self.root
            .get_set(key)
            .map_or_else(Policy::empty, |set| Policy::from_property_set(set.clone()))
    }

    /// Returns a new snapshot where keys missing from `self` are filled in
    /// from `defaults`. Neither input is modified.
    #[must_use]
    pub fn with_defaults(&self, defaults: &Policy) -> Policy {
        if defaults.is_empty() {
            return self.clone();
        }
        let mut merged = (*defaults.root).clone();
        merged.combine(&self.root);
        Policy::from_property_set(merged)
    }
}
