//! Error taxonomy for registration, dispatch, and formatter calls.
//!
//! Every variant carries enough context (type tag, storage name, location)
//! to be logged meaningfully by the caller. Nothing in this crate retries or
//! swallows an error.

use strata_core::{ArchiveError, PolicyError};

/// Phase of the read protocol a misuse was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMisuse {
    /// A continuation call (`first = false`) arrived before any first call.
    NotStarted,
    /// A first call arrived while a sequence was already in progress.
    AlreadyStarted,
    /// Any call arrived after the sequence was exhausted.
    Exhausted,
}

impl std::fmt::Display for ReadMisuse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => f.write_str("read continued before the first read"),
            Self::AlreadyStarted => f.write_str("first read issued twice on one storage"),
            Self::Exhausted => f.write_str("read after the last record was returned"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("a formatter is already registered for type {type_tag:?}")]
    DuplicateType { type_tag: String },

    #[error("no formatter registered for type {type_tag:?}")]
    UnknownType { type_tag: String },

    #[error("serialization of {type_tag} failed: {reason}")]
    Serialization {
        type_tag: String,
        reason: String,
        #[source]
        source: Option<ArchiveError>,
    },

    #[error("{storage} storage at {location} failed: {source}")]
    Storage {
        storage: &'static str,
        location: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("no {type_tag} record {key:?} in {storage} storage at {location}")]
    NotFound {
        type_tag: String,
        storage: &'static str,
        location: String,
        key: String,
    },

    #[error("{type_tag} formatter cannot {operation} {storage} storage at {location}")]
    UnsupportedStorage {
        type_tag: String,
        operation: &'static str,
        storage: &'static str,
        location: String,
    },

    #[error("invalid write sequence at {location}: iteration {iteration} of {total} ({reason})")]
    InvalidSequence {
        location: String,
        iteration: usize,
        total: usize,
        reason: &'static str,
    },

    #[error("read protocol misuse on {storage} storage at {location}: {misuse}")]
    ReadProtocol {
        storage: &'static str,
        location: String,
        misuse: ReadMisuse,
    },

    #[error("no storage given to {operation} {type_tag}")]
    NoStorage {
        type_tag: String,
        operation: &'static str,
    },

    #[error("additional data is missing required key {key:?}")]
    MissingMetadata { key: String },

    #[error("no storage registered under name {name:?}")]
    UnknownStorage { name: String },

    #[error("a storage factory is already registered under name {name:?}")]
    DuplicateStorage { name: String },

    #[error("the process-wide formatter registry has not been installed")]
    RegistryNotInstalled,

    #[error("the process-wide formatter registry is already installed")]
    RegistryAlreadyInstalled,

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl PersistenceError {
    /// Builds a [`PersistenceError::Serialization`] without an archive cause.
    pub fn serialization(type_tag: &str, reason: impl Into<String>) -> Self {
        Self::Serialization {
            type_tag: type_tag.to_string(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Wraps an archive failure for `type_tag`.
    #[must_use]
    pub fn archive(type_tag: &str, source: ArchiveError) -> Self {
        Self::Serialization {
            type_tag: type_tag.to_string(),
            reason: source.to_string(),
            source: Some(source),
        }
    }

    /// Whether the failure only affects the current call. Registration and
    /// installation failures are the only fatal ones.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::DuplicateType { .. }
                | Self::DuplicateStorage { .. }
                | Self::RegistryAlreadyInstalled
        )
    }
}

pub type Result<T, E = PersistenceError> = std::result::Result<T, E>;
