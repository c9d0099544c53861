//! The formatter contract.
//!
//! A [`Formatter`] reads, writes and updates one family of persistable types
//! against any [`Storage`]. Instances hold nothing but their [`Policy`], so
//! one instance serves any number of calls; all per-sequence state lives in
//! the storage handle (see [`crate::storage::cursor`]).
//!
//! Formatters are created through a [`FormatterRegistry`] and handed out as
//! [`FormatterHandle`]s; the concrete types have no public constructor.

pub mod builtin;
pub mod package_versions;
pub mod property_set;
pub mod protocol;
pub mod registry;

use std::sync::Arc;

use strata_core::{Archive, Persistable, Policy, PropertySet};

use crate::error::Result;
use crate::storage::Storage;

pub use builtin::register_builtin_formatters;
pub use registry::{
    global_registry, install_global, FormatterFactory, FormatterRegistry,
    FormatterRegistryBuilder,
};

/// Shared handle to a formatter instance.
pub type FormatterHandle = Arc<dyn Formatter>;

/// What a read call says about the records left in its storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadProgress {
    /// More records remain; call `read` again with `first = false`.
    More,
    /// The record just returned was the last one of a multi-record container.
    Exhausted,
    /// The storage format has no notion of multiple records. The one object
    /// it holds has been returned.
    Single,
}

impl ReadProgress {
    /// The done flag: `true` unless more records remain.
    #[must_use]
    pub fn is_done(self) -> bool {
        !matches!(self, Self::More)
    }
}

/// One object produced by [`Formatter::read`].
#[derive(Debug)]
pub struct Retrieved {
    pub object: Box<dyn Persistable>,
    pub progress: ReadProgress,
}

impl Retrieved {
    #[must_use]
    pub fn done(&self) -> bool {
        self.progress.is_done()
    }
}

/// Reads and writes one persistable type family against any storage.
///
/// Implementations are `Send + Sync` and immutable; concurrent calls are
/// safe as long as each uses its own storage handle.
pub trait Formatter: Send + Sync {
    /// Type tag of the objects this formatter handles.
    fn type_tag(&self) -> &'static str;

    /// The configuration snapshot this instance was built with.
    fn policy(&self) -> &Policy;

    /// Writes `object` as record `iteration` of `total` into `storage`.
    ///
    /// Record streams and row stores treat `0..total` as one sequence: the
    /// container is opened at iteration 0 and published after the last one.
    ///
    /// # Errors
    ///
    /// `Serialization` for an object of the wrong type, `Storage` for backend
    /// failures, `InvalidSequence` for out-of-order iterations and
    /// `UnsupportedStorage` when the storage offers no usable capability.
    fn write(
        &self,
        object: &dyn Persistable,
        storage: &mut dyn Storage,
        additional_data: &PropertySet,
        iteration: usize,
        total: usize,
    ) -> Result<()>;

    /// Reads the next object from `storage`. `first` must be `true` on the
    /// first call for a handle and `false` afterwards.
    ///
    /// # Errors
    ///
    /// `ReadProtocol` for calls out of sequence (including any call after
    /// the done flag was reported), `NotFound` for an empty container,
    /// `Serialization` for malformed data and `Storage` for backend failures.
    fn read(
        &self,
        storage: &mut dyn Storage,
        additional_data: &PropertySet,
        first: bool,
    ) -> Result<Retrieved>;

    /// Replaces the stored representation of an already persisted object.
    ///
    /// # Errors
    ///
    /// `NotFound` if nothing matching is stored, `UnsupportedStorage` for
    /// append-only containers, and the `write` errors otherwise.
    fn update(
        &self,
        object: &dyn Persistable,
        storage: &mut dyn Storage,
        additional_data: &PropertySet,
    ) -> Result<()>;

    /// Walks the fields of `object` through `archive`: saves them when the
    /// archive is saving, replaces them when it is loading. `version`
    /// selects the wire revision; every revision ever emitted is accepted.
    ///
    /// # Errors
    ///
    /// `Serialization` for a type mismatch, an unknown version or a
    /// malformed field stream.
    fn delegate_serialize(
        &self,
        archive: &mut dyn Archive,
        version: u32,
        object: &mut dyn Persistable,
    ) -> Result<()>;
}

impl std::fmt::Debug for dyn Formatter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Formatter")
            .field("type_tag", &self.type_tag())
            .field("policy", self.policy())
            .finish()
    }
}
