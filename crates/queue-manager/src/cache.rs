use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::DeserializeError;
use crate::storage::Storage;

/// Resolved values by queue name, optionally mirrored into a [`Storage`].
///
/// The in-memory map is always checked first and is the source of truth once populated. The
/// storage is only consulted on a memory miss, and a value found there is kept in memory, so it
/// is parsed at most once per queue name.
pub struct ResultCache<T> {
    memory: moka::sync::Cache<String, T>,
    storage: Option<Arc<dyn Storage>>,
}

impl<T> fmt::Debug for ResultCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCache")
            .field("in-memory items", &self.memory.entry_count())
            .field("storage", &self.storage)
            .finish()
    }
}

impl<T> ResultCache<T>
where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    pub fn new(storage: Option<Arc<dyn Storage>>) -> Self {
        // NOTE: no capacity is configured, entries are never evicted
        let memory = moka::sync::Cache::builder().name("queue-results").build();
        Self { memory, storage }
    }

    /// Returns the value for `name` from memory, falling back to the storage.
    pub fn lookup(&self, name: &str) -> Result<Option<T>, DeserializeError> {
        if let Some(value) = self.memory.get(name) {
            metric!(counter("queue.memory.hit") += 1);
            return Ok(Some(value));
        }

        let Some(raw) = self.storage.as_ref().and_then(|storage| storage.get(name)) else {
            return Ok(None);
        };

        let value: T = serde_json::from_str(&raw).map_err(|source| DeserializeError {
            queue: name.to_owned(),
            source,
        })?;
        metric!(counter("queue.storage.hit") += 1);
        tracing::trace!(queue = name, "Loaded value from storage");

        self.memory.insert(name.to_owned(), value.clone());
        Ok(Some(value))
    }

    /// Returns the value for `name` if it is already held in memory.
    pub fn get_in_memory(&self, name: &str) -> Option<T> {
        self.memory.get(name)
    }

    /// Caches `value` for `name`, writing it through to the storage.
    ///
    /// A value that cannot be serialized is only cached in memory.
    pub fn store(&self, name: &str, value: T) {
        if let Some(storage) = &self.storage {
            match serde_json::to_string(&value) {
                Ok(raw) => {
                    storage.set(name, &raw);
                    metric!(counter("queue.storage.write") += 1, "status" => "ok");
                }
                Err(e) => {
                    metric!(counter("queue.storage.write") += 1, "status" => "unserializable");
                    tracing::error!(
                        error = &e as &dyn std::error::Error,
                        queue = name,
                        "Failed to serialize value for storage",
                    );
                }
            }
        }

        self.memory.insert(name.to_owned(), value);
    }
}
