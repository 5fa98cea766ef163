//! Backends that resolved values are mirrored into.
//!
//! A [`Storage`] is a plain synchronous string key/value store. The manager serializes values to
//! JSON before writing them and parses them again when a queue is looked up for the first time,
//! so values survive as long as the backend does.
//!
//! Two backends are provided:
//!
//! - [`MemoryStorage`] keeps entries in a process-local map. It outlives the managers that use
//!   it, so it can be shared between several managers or handed to a new one.
//! - [`FsStorage`] writes one file per queue name into a directory and survives restarts.

use std::fmt;
use std::io;
use std::sync::Arc;

use crate::config::StorageConfig;

mod fs;
mod memory;

pub use fs::FsStorage;
pub use memory::MemoryStorage;

/// A synchronous string key/value store.
///
/// The store is assumed to always be available once configured. Implementations that can fail
/// are expected to log the failure and behave as if the entry was absent.
pub trait Storage: Send + Sync + fmt::Debug {
    /// Returns the raw entry stored under `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, replacing any previous entry.
    fn set(&self, key: &str, value: &str);
}

/// Opens the backend selected by `config`.
///
/// Returns `None` if values should not be persisted at all.
pub fn from_config(config: &StorageConfig) -> io::Result<Option<Arc<dyn Storage>>> {
    let storage: Arc<dyn Storage> = match config {
        StorageConfig::None => return Ok(None),
        StorageConfig::Memory => Arc::new(MemoryStorage::new()),
        StorageConfig::Filesystem { path } => Arc::new(FsStorage::new(path)?),
    };
    Ok(Some(storage))
}
