//! `Strata` Core: property sets, policies, persistable objects, and archives.

pub mod archive;
pub mod persistable;
pub mod policy;
pub mod property;
pub mod versions;

pub use archive::{Archive, ArchiveEncoding, ArchiveError, ArchiveMode, ArchiveRecord, Token, TokenArchive};
pub use persistable::Persistable;
pub use policy::{Policy, PolicyError};
pub use property::{PropertyError, PropertyKind, PropertySet, PropertyValue};
pub use versions::{ManifestError, PackageVersion, PackageVersions, VersionChange};

/// Type tag of [`PropertySet`] payloads.
pub const PROPERTY_SET_TYPE: &str = "PropertySet";

/// Type tag of [`PackageVersions`] payloads.
pub const PACKAGE_VERSIONS_TYPE: &str = "PackageVersions";

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
