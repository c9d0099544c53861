//! `Strata` Persist: formatter registry, dispatch, and storage backends.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod formatter;
pub mod logging;
pub mod storage;

pub use config::{LogConfig, LogFormat, PersistenceConfig};
pub use dispatch::Persistence;
pub use error::{PersistenceError, ReadMisuse, Result};
pub use formatter::{
    global_registry, install_global, register_builtin_formatters, Formatter, FormatterFactory,
    FormatterHandle, FormatterRegistry, FormatterRegistryBuilder, ReadProgress, Retrieved,
};
pub use storage::{AccessMode, LogicalLocation, Storage, StorageList, StorageRegistry};
