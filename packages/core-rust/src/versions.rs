//! Software version manifests.
//!
//! A [`PackageVersions`] records which version of every package was set up
//! when a process ran, plus free-form info (a path, or revision details for
//! working copies). Processes writing into the same output area persist
//! their manifest and compare it to the one already there, refusing to mix
//! outputs produced by different software.

use std::any::Any;
use std::collections::BTreeMap;

use crate::persistable::Persistable;

/// Width of the product column in the text format.
pub const PRODUCT_WIDTH: usize = 30;
/// Width of the version column in the text format.
pub const VERSION_WIDTH: usize = 16;

/// One product's entry in a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageVersion {
    pub version: String,
    pub info: String,
}

/// Difference between two manifests for one product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionChange {
    Added {
        product: String,
        entry: PackageVersion,
    },
    Removed {
        product: String,
        entry: PackageVersion,
    },
    Changed {
        product: String,
        from: PackageVersion,
        to: PackageVersion,
    },
}

/// Errors from parsing the text manifest format.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    #[error("line {line}: expected at least a product and a version")]
    MissingVersion { line: usize },
    #[error("product {product:?} has no text form: {reason}")]
    Unrepresentable {
        product: String,
        reason: &'static str,
    },
}

/// Product name → version manifest, ordered by product name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackageVersions {
    entries: BTreeMap<String, PackageVersion>,
}

impl PackageVersions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `product`, replacing any earlier entry.
    pub fn insert(
        &mut self,
        product: impl Into<String>,
        version: impl Into<String>,
        info: impl Into<String>,
    ) {
        self.entries.insert(
            product.into(),
            PackageVersion {
                version: version.into(),
                info: info.into().trim().to_string(),
            },
        );
    }

    #[must_use]
    pub fn get(&self, product: &str) -> Option<&PackageVersion> {
        self.entries.get(product)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PackageVersion)> {
        self.entries.iter().map(|(p, v)| (p.as_str(), v))
    }

    /// Parses the whitespace-separated text format: product, version, then
    /// the rest of the line as info. Blank lines are skipped.
    ///
    /// # Errors
    ///
    /// [`ManifestError::MissingVersion`] for a line with a single field.
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let mut manifest = Self::new();
        for (index, line) in text.lines().enumerate() {
            let mut fields = line.split_whitespace();
            let Some(product) = fields.next() else {
                continue;
            };
            let version = fields
                .next()
                .ok_or(ManifestError::MissingVersion { line: index + 1 })?;
            let info = fields.collect::<Vec<_>>().join(" ");
            manifest.insert(product, version, info);
        }
        Ok(manifest)
    }

    /// One fixed-width line per product, sorted by product name. Entries with
    /// an empty product, version or info are left out.
    #[must_use]
    pub fn as_lines(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(product, entry)| {
                !product.is_empty() && !entry.version.is_empty() && !entry.info.is_empty()
            })
            .map(|(product, entry)| {
                format!(
                    "{product:<PRODUCT_WIDTH$} {:<VERSION_WIDTH$} {}",
                    entry.version, entry.info
                )
            })
            .collect()
    }

    /// The text document form: [`as_lines`](Self::as_lines) joined with
    /// trailing newlines.
    #[must_use]
    pub fn to_text(&self) -> String {
        self.as_lines().into_iter().map(|line| line + "\n").collect()
    }

    /// Checks that [`parse`](Self::parse) of [`to_text`](Self::to_text)
    /// gives back this exact manifest: product and version are single
    /// non-empty words, and info is non-empty words joined by single spaces.
    ///
    /// # Errors
    ///
    /// [`ManifestError::Unrepresentable`] naming the first offending product.
    pub fn check_text_form(&self) -> Result<(), ManifestError> {
        let is_word = |s: &str| !s.is_empty() && !s.contains(char::is_whitespace);
        for (product, entry) in &self.entries {
            let reason = if !is_word(product) {
                "product must be a single word"
            } else if !is_word(&entry.version) {
                "version must be a single word"
            } else if entry.info.is_empty() {
                "info is empty"
            } else if entry.info.split_whitespace().collect::<Vec<_>>().join(" ") != entry.info {
                "info words must be separated by single spaces"
            } else {
                continue;
            };
            return Err(ManifestError::Unrepresentable {
                product: product.clone(),
                reason,
            });
        }
        Ok(())
    }

    /// [`to_text`](Self::to_text), refusing manifests the text form would
    /// alter.
    ///
    /// # Errors
    ///
    /// See [`check_text_form`](Self::check_text_form).
    pub fn try_to_text(&self) -> Result<String, ManifestError> {
        self.check_text_form()?;
        Ok(self.to_text())
    }

    /// Per-product changes needed to turn `self` into `other`, ordered by
    /// product name.
    #[must_use]
    pub fn diff(&self, other: &PackageVersions) -> Vec<VersionChange> {
        let mut changes = Vec::new();
        for (product, mine) in &self.entries {
            match other.entries.get(product) {
                None => changes.push(VersionChange::Removed {
                    product: product.clone(),
                    entry: mine.clone(),
                }),
                Some(theirs) if theirs != mine => changes.push(VersionChange::Changed {
                    product: product.clone(),
                    from: mine.clone(),
                    to: theirs.clone(),
                }),
                Some(_) => {}
            }
        }
        for (product, theirs) in &other.entries {
            if !self.entries.contains_key(product) {
                changes.push(VersionChange::Added {
                    product: product.clone(),
                    entry: theirs.clone(),
                });
            }
        }
        changes.sort_by(|a, b| a.product().cmp(b.product()));
        changes
    }

    /// Renders [`diff`](Self::diff) as `-`/`+` prefixed manifest lines.
    #[must_use]
    pub fn diff_text(&self, other: &PackageVersions) -> String {
        let line = |product: &str, entry: &PackageVersion| {
            format!(
                "{product:<PRODUCT_WIDTH$} {:<VERSION_WIDTH$} {}",
                entry.version, entry.info
            )
        };
        let mut out = Vec::new();
        for change in self.diff(other) {
            match change {
                VersionChange::Removed { product, entry } => out.push(format!("-{}", line(&product, &entry))),
                VersionChange::Added { product, entry } => out.push(format!("+{}", line(&product, &entry))),
                VersionChange::Changed { product, from, to } => {
                    out.push(format!("-{}", line(&product, &from)));
                    out.push(format!("+{}", line(&product, &to)));
                }
            }
        }
        out.join("\n")
    }
}

impl VersionChange {
    #[must_use]
    pub fn product(&self) -> &str {
        match self {
            Self::Added { product, .. } | Self::Removed { product, .. } | Self::Changed { product, .. } => {
                product
            }
        }
    }
}

impl Persistable for PackageVersions {
    fn type_tag(&self) -> &'static str {
        crate::PACKAGE_VERSIONS_TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PackageVersions {
        let mut m = PackageVersions::new();
        m.insert("afw", "12.1", "/opt/stack/afw");
        m.insert("daf_base", "LOCAL:main", "rev:1a2b3c4d clean-working-copy");
        m
    }

    #[test]
    fn lines_are_fixed_width_and_sorted() {
        let lines = sample().as_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("afw "));
        assert_eq!(&lines[0][PRODUCT_WIDTH + 1..PRODUCT_WIDTH + 1 + 4], "12.1");
        assert!(lines[1].starts_with("daf_base"));
        assert!(lines[1].ends_with("rev:1a2b3c4d clean-working-copy"));
    }

    #[test]
    fn text_round_trips_through_parse() {
        let manifest = sample();
        let parsed = PackageVersions::parse(&manifest.to_text()).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn parse_rejects_product_without_version() {
        let err = PackageVersions::parse("afw 1.0 path\nlonely\n").unwrap_err();
        assert_eq!(err, ManifestError::MissingVersion { line: 2 });
    }

    #[test]
    fn entries_without_info_are_not_listed() {
        let mut m = PackageVersions::new();
        m.insert("bare", "1.0", "   ");
        assert!(m.as_lines().is_empty());
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn text_form_refuses_entries_it_would_alter() {
        assert!(sample().try_to_text().is_ok());

        let mut m = PackageVersions::new();
        m.insert("afw", "12.1", "");
        assert_eq!(
            m.check_text_form(),
            Err(ManifestError::Unrepresentable {
                product: "afw".to_string(),
                reason: "info is empty",
            })
        );

        let mut m = PackageVersions::new();
        m.insert("base", "1.0", "a   b");
        assert!(matches!(
            m.try_to_text(),
            Err(ManifestError::Unrepresentable { ref product, .. }) if product == "base"
        ));

        let mut m = PackageVersions::new();
        m.insert("two words", "1.0", "x");
        assert!(m.check_text_form().is_err());
        let mut m = PackageVersions::new();
        m.insert("afw", "1 .0", "x");
        assert!(m.check_text_form().is_err());
    }

    #[test]
    fn diff_reports_added_removed_changed() {
        let before = sample();
        let mut after = sample();
        after.insert("afw", "12.2", "/opt/stack/afw");
        after.insert("meas_base", "3.0", "/opt/stack/meas_base");
        let mut dropped = after.clone();
        dropped.entries.remove("daf_base");

        let changes = before.diff(&dropped);
        assert_eq!(changes.len(), 3);
        assert!(matches!(&changes[0], VersionChange::Changed { product, .. } if product == "afw"));
        assert!(matches!(&changes[1], VersionChange::Removed { product, .. } if product == "daf_base"));
        assert!(matches!(&changes[2], VersionChange::Added { product, .. } if product == "meas_base"));
        assert!(before.diff(&before).is_empty());
    }

    proptest::proptest! {
        #[test]
        fn text_form_survives_parse(
            entries in proptest::collection::btree_map(
                "[a-z_]{1,12}",
                ("[0-9][0-9.]{0,6}", "[a-z/:]{1,10}( [a-z0-9]{1,6}){0,2}"),
                0..8,
            )
        ) {
            let mut manifest = PackageVersions::new();
            for (product, (version, info)) in &entries {
                manifest.insert(product.as_str(), version.as_str(), info.as_str());
            }
            let text = manifest.try_to_text().unwrap();
            let parsed = PackageVersions::parse(&text).unwrap();
            proptest::prop_assert!(parsed.diff(&manifest).is_empty());
            proptest::prop_assert_eq!(parsed, manifest);
        }
    }

    #[test]
    fn diff_text_marks_lines() {
        let before = sample();
        let mut after = sample();
        after.insert("afw", "12.2", "/opt/stack/afw");
        let text = before.diff_text(&after);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("-afw"));
        assert!(lines[1].starts_with("+afw"));
        assert!(lines[1].contains("12.2"));
    }
}
