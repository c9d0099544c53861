//! Logical locations with template substitution.
//!
//! A location template names fields of the call's additional data with
//! `%(name)`, optionally followed by a zero-padded width and a conversion
//! (`%(visit)06d`, `%(filter)s`). Resolving the template against a
//! [`PropertySet`] yields the concrete location string a backend opens.

use std::fmt;
use std::path::{Path, PathBuf};

use strata_core::{PropertySet, PropertyValue};

use crate::error::{PersistenceError, Result};

/// A resolved storage location (file path, table name, vault key).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalLocation {
    location: String,
}

fn render(value: &PropertyValue) -> String {
    match value {
        PropertyValue::Bool(b) => b.to_string(),
        PropertyValue::Int(i) => i.to_string(),
        PropertyValue::Double(d) => d.to_string(),
        PropertyValue::String(s) => s.clone(),
        PropertyValue::Bytes(b) => b.iter().map(|byte| format!("{byte:02x}")).collect(),
        PropertyValue::Array(values) => values.iter().map(render).collect::<Vec<_>>().join(","),
        PropertyValue::Set(_) => String::new(),
    }
}

impl LogicalLocation {
    /// A literal location, used as-is.
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }

    /// Substitutes every `%(name)` field of `template` from `additional_data`.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::MissingMetadata`] if a referenced field is absent.
    pub fn resolve(template: &str, additional_data: &PropertySet) -> Result<Self> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("%(") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(close) = after.find(')') else {
                // Unterminated field: keep the text literally.
                out.push_str(&rest[start..]);
                rest = "";
                break;
            };
            let key = &after[..close];
            let mut tail = &after[close + 1..];

            let zero_pad = tail.starts_with('0');
            let digits = tail.chars().take_while(char::is_ascii_digit).count();
            let width: usize = tail[..digits].parse().unwrap_or(0);
            tail = &tail[digits..];
            if tail.starts_with('d') || tail.starts_with('s') {
                tail = &tail[1..];
            }

            let value = additional_data
                .get(key)
                .ok_or_else(|| PersistenceError::MissingMetadata {
                    key: key.to_string(),
                })?;
            // Zero padding is sign-aware, as in printf: -5 at width 4 is -005.
            let text = match value {
                PropertyValue::Int(i) if zero_pad => format!("{i:0width$}"),
                other => format!("{:>width$}", render(other)),
            };
            out.push_str(&text);
            rest = tail;
        }
        out.push_str(rest);
        Ok(Self { location: out })
    }

    /// Prefixes relative locations with `root`. Absolute locations are kept.
    #[must_use]
    pub fn with_root(self, root: &Path) -> Self {
        if root.as_os_str().is_empty() || Path::new(&self.location).is_absolute() {
            return self;
        }
        Self {
            location: root.join(&self.location).display().to_string(),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.location
    }

    #[must_use]
    pub fn to_path(&self) -> PathBuf {
        PathBuf::from(&self.location)
    }
}

impl fmt::Display for LogicalLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location)
    }
}
