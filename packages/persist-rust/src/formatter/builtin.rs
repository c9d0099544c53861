use strata_core::{PACKAGE_VERSIONS_TYPE, PROPERTY_SET_TYPE};

use super::package_versions::PackageVersionsFormatter;
use super::property_set::PropertySetFormatter;
use super::FormatterRegistryBuilder;
use crate::error::Result;

/// Registers every formatter shipped with this crate. Call once at startup,
/// before adding application formatters and building the registry.
///
/// # Errors
///
/// [`DuplicateType`](crate::PersistenceError::DuplicateType) if a built-in
/// tag was already registered.
pub fn register_builtin_formatters(builder: &mut FormatterRegistryBuilder) -> Result<()> {
    builder.register(PROPERTY_SET_TYPE, PropertySetFormatter::factory())?;
    builder.register(PACKAGE_VERSIONS_TYPE, PackageVersionsFormatter::factory())?;
    Ok(())
}
