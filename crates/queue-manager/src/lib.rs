//! Coalescing and caching of asynchronous computations keyed by name.
//!
//! A [`QueueManager`] makes sure that at most one operation runs per queue name at any time.
//! Requests for a queue that has an operation in flight attach to it and receive its outcome,
//! and once an operation succeeds its value is cached and served to all later requests without
//! running anything again.
//!
//! ```
//! # async fn example() -> Result<(), queue_manager::QueueError<std::io::Error>> {
//! use queue_manager::{Operation, QueueManager};
//!
//! async fn fetch_user(id: u32) -> Result<String, std::io::Error> {
//!     Ok(format!("user {id}"))
//! }
//!
//! let manager = QueueManager::new();
//! let user = manager
//!     .request("user:1", Some(Operation::with_args(fetch_user, 1)))
//!     .await?;
//!
//! // served from the cache
//! assert_eq!(manager.request("user:1", None).await?, user);
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage
//!
//! Resolved values can be mirrored into a [`Storage`] backend, from which they are restored the
//! first time a queue is looked up by a fresh manager. See the [`storage`] module.
//!
//! ## Metrics
//!
//! The following metrics are emitted once [`metrics::configure_statsd`] has been called:
//!
//! - `queue.request`: All requests.
//! - `queue.memory.hit`: Requests served from memory.
//! - `queue.storage.hit`: Requests served from the storage backend.
//! - `queue.computation`: Operations actually being run.
//! - `queue.waiter`: Requests attached to an operation already in flight.
//! - `queue.settled`: Settled runs, tagged with `status` (`ok`, `error` or `abandoned`).
//! - `queue.in_flight`: A gauge of the operations currently running.
//! - `queue.operation.duration`: How long operations took to settle.
//! - `queue.storage.write`: Values written to the storage backend.

#[macro_use]
pub mod metrics;

pub mod config;
pub mod logging;
pub mod storage;

mod cache;
mod error;
mod inflight;
mod manager;
mod operation;

pub use cache::ResultCache;
pub use config::{Config, StorageConfig};
pub use error::{DeserializeError, QueueError};
pub use inflight::{Generation, InFlightRegistry, Settled};
pub use manager::QueueManager;
pub use operation::Operation;
pub use storage::{FsStorage, MemoryStorage, Storage};

/// Sets up logging and metrics as described by `config`.
///
/// Failing to set up metrics is logged, but does not prevent the manager from being used.
pub fn init(config: &Config) {
    logging::init_logging(config);

    if let Some(statsd) = &config.metrics.statsd {
        if let Err(err) = metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        ) {
            logging::ensure_log_error(&err);
        }
    }
}
