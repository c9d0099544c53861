//! Ordered, hierarchical property sets.
//!
//! A [`PropertySet`] maps string names to [`PropertyValue`]s. It is used both
//! as a persistable payload in its own right and as the "additional data"
//! side channel handed to every persistence call (table names, item ids,
//! location template fields, and so on).
//!
//! Names are addressed with dotted paths: `"camera.ccd.id"` walks the nested
//! sets `camera` and `ccd` and names the `id` entry inside the last one.
//! Nested sets are owned by their parent, so a property set is always a tree.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Separator between path segments in dotted property names.
pub const PATH_SEPARATOR: char = '.';

/// Errors raised by path-based mutation of a [`PropertySet`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PropertyError {
    #[error("property path is empty or has an empty segment: {path:?}")]
    InvalidPath { path: String },
    #[error("cannot descend into {segment:?} of {path:?}: not a property set")]
    NotASet { path: String, segment: String },
}

/// Discriminant of a [`PropertyValue`], also used as the on-wire kind code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Bool,
    Int,
    Double,
    String,
    Bytes,
    Array,
    Set,
}

impl PropertyKind {
    /// Stable numeric code written by archive encodings.
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            Self::Bool => 0,
            Self::Int => 1,
            Self::Double => 2,
            Self::String => 3,
            Self::Bytes => 4,
            Self::Array => 5,
            Self::Set => 6,
        }
    }

    /// Inverse of [`code`](Self::code). Returns `None` for unknown codes.
    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::Bool,
            1 => Self::Int,
            2 => Self::Double,
            3 => Self::String,
            4 => Self::Bytes,
            5 => Self::Array,
            6 => Self::Set,
            _ => return None,
        })
    }

    /// Whether values of this kind hold no nested values.
    #[must_use]
    pub fn is_scalar(self) -> bool {
        !matches!(self, Self::Array | Self::Set)
    }
}

/// A single value stored in a [`PropertySet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Double(#[serde(with = "crate::archive::float_repr")] f64),
    String(String),
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    /// Multi-valued entry. Built by [`PropertySet::add`].
    Array(Vec<PropertyValue>),
    /// Nested property set.
    Set(PropertySet),
}

impl PropertyValue {
    #[must_use]
    pub fn kind(&self) -> PropertyKind {
        match self {
            Self::Bool(_) => PropertyKind::Bool,
            Self::Int(_) => PropertyKind::Int,
            Self::Double(_) => PropertyKind::Double,
            Self::String(_) => PropertyKind::String,
            Self::Bytes(_) => PropertyKind::Bytes,
            Self::Array(_) => PropertyKind::Array,
            Self::Set(_) => PropertyKind::Set,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as a double. Integers widen losslessly up to 2^53.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(d) => Some(*d),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[PropertyValue]> {
        match self {
            Self::Array(values) => Some(values),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_set(&self) -> Option<&PropertySet> {
        match self {
            Self::Set(set) => Some(set),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<PropertySet> for PropertyValue {
    fn from(value: PropertySet) -> Self {
        Self::Set(value)
    }
}

/// Insertion-ordered mapping from unique names to [`PropertyValue`]s.
///
/// Top-level names never contain [`PATH_SEPARATOR`]; dotted paths passed to
/// the accessors are split into segments and resolved through nested sets.
///
/// Serializes as a map that preserves insertion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertySet {
    entries: Vec<(String, PropertyValue)>,
}

fn split_path(path: &str) -> Result<Vec<&str>, PropertyError> {
    let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(PropertyError::InvalidPath {
            path: path.to_string(),
        });
    }
    Ok(segments)
}

impl PropertySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of top-level entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-level names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Top-level entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }

    fn local(&self, name: &str) -> Option<&PropertyValue> {
        self.position(name).map(|i| &self.entries[i].1)
    }

    fn local_mut(&mut self, name: &str) -> Option<&mut PropertyValue> {
        self.position(name).map(move |i| &mut self.entries[i].1)
    }

    /// Resolves a dotted path. Returns `None` if any segment is missing or an
    /// intermediate segment is not a set.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&PropertyValue> {
        let mut current = self;
        let mut segments = path.split(PATH_SEPARATOR).peekable();
        while let Some(segment) = segments.next() {
            let value = current.local(segment)?;
            if segments.peek().is_none() {
                return Some(value);
            }
            current = value.as_set()?;
        }
        None
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    #[must_use]
    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(PropertyValue::as_bool)
    }

    #[must_use]
    pub fn get_int(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(PropertyValue::as_i64)
    }

    #[must_use]
    pub fn get_double(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(PropertyValue::as_f64)
    }

    #[must_use]
    pub fn get_string(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(PropertyValue::as_str)
    }

    #[must_use]
    pub fn get_set(&self, path: &str) -> Option<&PropertySet> {
        self.get(path).and_then(PropertyValue::as_set)
    }

    /// Walks to the set that owns the last segment of `segments`, creating
    /// missing intermediate sets on the way.
    fn parent_for_insert<'a>(
        &'a mut self,
        path: &str,
        segments: &[&str],
    ) -> Result<&'a mut PropertySet, PropertyError> {
        let mut current = self;
        for segment in &segments[..segments.len() - 1] {
            if current.position(segment).is_none() {
                current
                    .entries
                    .push(((*segment).to_string(), PropertyValue::Set(PropertySet::new())));
            }
            current = match current.local_mut(segment) {
                Some(PropertyValue::Set(set)) => set,
                _ => {
                    return Err(PropertyError::NotASet {
                        path: path.to_string(),
                        segment: (*segment).to_string(),
                    })
                }
            };
        }
        Ok(current)
    }

    /// Sets `path` to `value`, replacing any existing value and creating
    /// intermediate sets as needed. Returns the replaced value.
    ///
    /// # Errors
    ///
    /// Fails if the path is malformed or an intermediate segment names a
    /// non-set value.
    pub fn set(
        &mut self,
        path: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<Option<PropertyValue>, PropertyError> {
        let segments = split_path(path)?;
        let parent = self.parent_for_insert(path, &segments)?;
        let leaf = segments[segments.len() - 1];
        let value = value.into();
        match parent.local_mut(leaf) {
            Some(slot) => Ok(Some(std::mem::replace(slot, value))),
            None => {
                parent.entries.push((leaf.to_string(), value));
                Ok(None)
            }
        }
    }

    /// Appends `value` to the entry at `path`. A missing entry is created as a
    /// plain value; an existing scalar or set is promoted to an array.
    ///
    /// # Errors
    ///
    /// Same conditions as [`set`](Self::set).
    pub fn add(&mut self, path: &str, value: impl Into<PropertyValue>) -> Result<(), PropertyError> {
        let segments = split_path(path)?;
        let parent = self.parent_for_insert(path, &segments)?;
        let leaf = segments[segments.len() - 1];
        let value = value.into();
        match parent.local_mut(leaf) {
            Some(PropertyValue::Array(values)) => values.push(value),
            Some(slot) => {
                let previous = std::mem::replace(slot, PropertyValue::Array(Vec::new()));
                *slot = PropertyValue::Array(vec![previous, value]);
            }
            None => parent.entries.push((leaf.to_string(), value)),
        }
        Ok(())
    }

    /// Removes the entry at `path`, returning it. Empty parents are kept.
    pub fn remove(&mut self, path: &str) -> Option<PropertyValue> {
        let segments = split_path(path).ok()?;
        let mut current = self;
        for segment in &segments[..segments.len() - 1] {
            current = match current.local_mut(segment) {
                Some(PropertyValue::Set(set)) => set,
                _ => return None,
            };
        }
        let index = current.position(segments[segments.len() - 1])?;
        Some(current.entries.remove(index).1)
    }

    /// Lists every non-set value with its full dotted path, depth first in
    /// insertion order. Arrays are reported as a single leaf.
    #[must_use]
    pub fn flatten(&self) -> Vec<(String, &PropertyValue)> {
        let mut out = Vec::new();
        self.flatten_into("", &mut out);
        out
    }

    fn flatten_into<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a PropertyValue)>) {
        for (name, value) in &self.entries {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}{PATH_SEPARATOR}{name}")
            };
            match value {
                PropertyValue::Set(nested) => nested.flatten_into(&path, out),
                other => out.push((path, other)),
            }
        }
    }

    /// Merges `other` into this set. Nested sets merge recursively; any other
    /// collision is won by `other`.
    pub fn combine(&mut self, other: &PropertySet) {
        for (name, value) in &other.entries {
            if let Some(slot) = self.local_mut(name) {
                match (slot, value) {
                    (PropertyValue::Set(mine), PropertyValue::Set(theirs)) => mine.combine(theirs),
                    (slot, _) => *slot = value.clone(),
                }
            } else {
                self.entries.push((name.clone(), value.clone()));
            }
        }
    }
}

impl Serialize for PropertySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

struct PropertySetVisitor;

impl<'de> Visitor<'de> for PropertySetVisitor {
    type Value = PropertySet;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of property names to values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<PropertySet, A::Error> {
        let mut set = PropertySet::new();
        while let Some((name, value)) = access.next_entry::<String, PropertyValue>()? {
            if name.is_empty() || name.contains(PATH_SEPARATOR) {
                return Err(serde::de::Error::custom(format!(
                    "invalid property name {name:?}"
                )));
            }
            if set.position(&name).is_some() {
                return Err(serde::de::Error::custom(format!(
                    "duplicate property name {name:?}"
                )));
            }
            set.entries.push((name, value));
        }
        Ok(set)
    }
}

impl<'de> Deserialize<'de> for PropertySet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(PropertySetVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_top_level() {
        let mut ps = PropertySet::new();
        ps.set("visit", 42).unwrap();
        ps.set("filter", "r").unwrap();
        assert_eq!(ps.get_int("visit"), Some(42));
        assert_eq!(ps.get_string("filter"), Some("r"));
        assert_eq!(ps.len(), 2);
    }

    #[test]
    fn names_keep_insertion_order() {
        let mut ps = PropertySet::new();
        ps.set("zeta", 1).unwrap();
        ps.set("alpha", 2).unwrap();
        ps.set("mid", 3).unwrap();
        assert_eq!(ps.names().collect::<Vec<_>>(), vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn set_replaces_and_returns_previous() {
        let mut ps = PropertySet::new();
        ps.set("a", 1).unwrap();
        let previous = ps.set("a", 2).unwrap();
        assert_eq!(previous, Some(PropertyValue::Int(1)));
        assert_eq!(ps.get_int("a"), Some(2));
        assert_eq!(ps.len(), 1, "keys stay unique");
    }

    #[test]
    fn dotted_set_creates_intermediate_sets() {
        let mut ps = PropertySet::new();
        ps.set("camera.ccd.id", 7).unwrap();
        assert_eq!(ps.get_int("camera.ccd.id"), Some(7));
        assert!(ps.get_set("camera").is_some());
        assert!(ps.get_set("camera.ccd").is_some());
    }

    #[test]
    fn dotted_set_through_scalar_fails() {
        let mut ps = PropertySet::new();
        ps.set("camera", "lsst").unwrap();
        let err = ps.set("camera.ccd", 1).unwrap_err();
        assert_eq!(
            err,
            PropertyError::NotASet {
                path: "camera.ccd".to_string(),
                segment: "camera".to_string(),
            }
        );
    }

    #[test]
    fn empty_segments_are_rejected() {
        let mut ps = PropertySet::new();
        assert!(matches!(ps.set("", 1), Err(PropertyError::InvalidPath { .. })));
        assert!(matches!(ps.set("a..b", 1), Err(PropertyError::InvalidPath { .. })));
        assert!(matches!(ps.add("a.", 1), Err(PropertyError::InvalidPath { .. })));
    }

    #[test]
    fn add_promotes_scalar_to_array() {
        let mut ps = PropertySet::new();
        ps.add("ids", 1).unwrap();
        assert_eq!(ps.get_int("ids"), Some(1));
        ps.add("ids", 2).unwrap();
        ps.add("ids", 3).unwrap();
        assert_eq!(
            ps.get("ids").and_then(PropertyValue::as_array),
            Some(&[PropertyValue::Int(1), PropertyValue::Int(2), PropertyValue::Int(3)][..])
        );
    }

    #[test]
    fn remove_nested_entry() {
        let mut ps = PropertySet::new();
        ps.set("a.b", 1).unwrap();
        ps.set("a.c", 2).unwrap();
        assert_eq!(ps.remove("a.b"), Some(PropertyValue::Int(1)));
        assert!(!ps.contains("a.b"));
        assert!(ps.contains("a.c"));
        assert_eq!(ps.remove("a.missing"), None);
        assert_eq!(ps.remove("x.y"), None);
    }

    #[test]
    fn get_through_non_set_returns_none() {
        let mut ps = PropertySet::new();
        ps.set("a", 1).unwrap();
        assert!(ps.get("a.b").is_none());
    }

    #[test]
    fn flatten_reports_leaf_paths() {
        let mut ps = PropertySet::new();
        ps.set("top", true).unwrap();
        ps.set("a.b", 1).unwrap();
        ps.set("a.c.d", "x").unwrap();
        let paths: Vec<String> = ps.flatten().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["top", "a.b", "a.c.d"]);
    }

    #[test]
    fn combine_merges_nested_sets() {
        let mut base = PropertySet::new();
        base.set("db.host", "localhost").unwrap();
        base.set("db.port", 5432).unwrap();
        let mut overlay = PropertySet::new();
        overlay.set("db.port", 6543).unwrap();
        overlay.set("extra", true).unwrap();

        base.combine(&overlay);
        assert_eq!(base.get_string("db.host"), Some("localhost"));
        assert_eq!(base.get_int("db.port"), Some(6543));
        assert_eq!(base.get_bool("extra"), Some(true));
    }

    #[test]
    fn int_widens_to_double() {
        let mut ps = PropertySet::new();
        ps.set("n", 3).unwrap();
        assert_eq!(ps.get_double("n"), Some(3.0));
    }

    #[test]
    fn kind_codes_round_trip() {
        for kind in [
            PropertyKind::Bool,
            PropertyKind::Int,
            PropertyKind::Double,
            PropertyKind::String,
            PropertyKind::Bytes,
            PropertyKind::Array,
            PropertyKind::Set,
        ] {
            assert_eq!(PropertyKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(PropertyKind::from_code(99), None);
    }

    #[test]
    fn json_keeps_order_and_nesting() {
        let mut ps = PropertySet::new();
        ps.set("zeta", 1).unwrap();
        ps.set("alpha.inner", "x").unwrap();
        let json = serde_json::to_string(&ps).unwrap();
        assert_eq!(json, r#"{"zeta":{"Int":1},"alpha":{"Set":{"inner":{"String":"x"}}}}"#);
        let back: PropertySet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ps);
    }

    #[test]
    fn json_carries_non_finite_doubles() {
        let mut ps = PropertySet::new();
        ps.set("hi", f64::INFINITY).unwrap();
        ps.set("lo", f64::NEG_INFINITY).unwrap();
        ps.set("unset", f64::NAN).unwrap();
        let json = serde_json::to_string(&ps).unwrap();
        assert!(json.contains(r#""hi":{"Double":"inf"}"#));
        assert!(!json.contains("null"));

        let back: PropertySet = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get_double("hi"), Some(f64::INFINITY));
        assert_eq!(back.get_double("lo"), Some(f64::NEG_INFINITY));
        assert!(back.get_double("unset").is_some_and(f64::is_nan));
        assert!(serde_json::from_str::<PropertySet>(r#"{"x":{"Double":"huge"}}"#).is_err());
    }

    #[test]
    fn json_rejects_duplicate_and_dotted_names() {
        assert!(serde_json::from_str::<PropertySet>(r#"{"a":{"Int":1},"a":{"Int":2}}"#).is_err());
        assert!(serde_json::from_str::<PropertySet>(r#"{"a.b":{"Int":1}}"#).is_err());
    }
}
