//! Persistence layer configuration.
//!
//! Everything here can be built from a [`Policy`] so a single JSON document
//! configures the storages, the formatters and logging.

use std::path::PathBuf;

use strata_core::{Policy, PolicyError, PropertyValue};

use crate::formatter::property_set::DEFAULT_WIRE_VERSION;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Single-line human readable text.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses `"compact"` or `"json"`/`"jsonl"`, ignoring case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "compact" | "text" => Some(Self::Compact),
            "json" | "jsonl" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Logging configuration consumed by [`crate::logging::init_logging`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Base level directive, e.g. `"info"`.
    pub level: String,
    pub format: LogFormat,
    /// Per-target level overrides as `(target, level)` pairs.
    pub targets: Vec<(String, String)>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            targets: Vec::new(),
        }
    }
}

impl LogConfig {
    /// Reads `level`, `format` and the `targets` set from `policy`.
    ///
    /// # Errors
    ///
    /// [`PolicyError::WrongType`] for values of the wrong kind or an unknown
    /// format name.
    pub fn from_policy(policy: &Policy) -> Result<Self, PolicyError> {
        let mut config = Self::default();
        if let Some(level) = optional_string(policy, "level")? {
            config.level = level.to_string();
        }
        if let Some(name) = optional_string(policy, "format")? {
            config.format = LogFormat::from_name(name).ok_or_else(|| PolicyError::WrongType {
                key: "format".to_string(),
                expected: "log format (compact or json)",
            })?;
        }
        if let Some(targets) = policy.as_property_set().get_set("targets") {
            for (path, value) in targets.flatten() {
                let PropertyValue::String(level) = value else {
                    return Err(PolicyError::WrongType {
                        key: format!("targets.{path}"),
                        expected: "string",
                    });
                };
                config.targets.push((path.replace('.', "::"), level.clone()));
            }
        }
        Ok(config)
    }
}

/// Top-level configuration of a [`Persistence`](crate::Persistence) instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceConfig {
    /// Policy key whose sub-policies configure formatters, one per type tag.
    pub formatter_policy_root: String,
    /// Directory relative file locations are resolved against.
    pub storage_root: PathBuf,
    /// Wire version formatters use when their own policy does not set one.
    pub default_wire_version: u32,
    pub log: LogConfig,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            formatter_policy_root: "formatters".to_string(),
            storage_root: PathBuf::new(),
            default_wire_version: DEFAULT_WIRE_VERSION,
            log: LogConfig::default(),
        }
    }
}

impl PersistenceConfig {
    /// Reads `formatterPolicyRoot`, `storageRoot`, `defaultWireVersion` and
    /// the `log` sub-policy. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// [`PolicyError::WrongType`] for values of the wrong kind.
    pub fn from_policy(policy: &Policy) -> Result<Self, PolicyError> {
        let mut config = Self::default();
        if let Some(root) = optional_string(policy, "formatterPolicyRoot")? {
            config.formatter_policy_root = root.to_string();
        }
        if let Some(root) = optional_string(policy, "storageRoot")? {
            config.storage_root = PathBuf::from(root);
        }
        if policy.contains("defaultWireVersion") {
            let version = policy.require_int("defaultWireVersion")?;
            config.default_wire_version =
                u32::try_from(version).map_err(|_| PolicyError::WrongType {
                    key: "defaultWireVersion".to_string(),
                    expected: "non-negative 32-bit integer",
                })?;
        }
        config.log = LogConfig::from_policy(&policy.sub_policy("log"))?;
        Ok(config)
    }
}

fn optional_string<'a>(policy: &'a Policy, key: &str) -> Result<Option<&'a str>, PolicyError> {
    if policy.contains(key) {
        policy.require_string(key).map(Some)
    } else {
        Ok(None)
    }
}
