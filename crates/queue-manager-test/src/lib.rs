//! Helpers for testing the queue manager.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test. The filesystem storage recreates its directory lazily, so a
//!    handle dropped too early silently leaks the directory. Assign it to a variable in the test
//!    function (e.g. `let _storage_dir = test::tempdir()`).
//!
//!  - Operations under test should be built from [`CallCounter`] and the `*_after` helpers, so
//!    assertions can check how often an operation actually ran.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `queue_manager` crate and mutes
///    all other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("queue_manager=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped, unless
/// [`into_path`](TempDir::into_path) is called. Use it as a guard to automatically clean up after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Counts how many times an operation has been invoked.
///
/// Clones share the same counter, so one clone can be moved into an operation while the test
/// keeps another for assertions.
#[derive(Clone, Debug, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one invocation and returns the number of invocations before it.
    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    /// The number of recorded invocations.
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// An error produced by failing test operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestFailure(pub String);

impl TestFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "test operation failed: {}", self.0)
    }
}

impl std::error::Error for TestFailure {}

/// Resolves to `value` after `delay`.
///
/// Combine with `tokio::time::pause` to make the interleaving of concurrent requests
/// deterministic.
pub async fn resolve_after<T>(delay: Duration, value: T) -> Result<T, TestFailure> {
    tokio::time::sleep(delay).await;
    Ok(value)
}

/// Fails with a [`TestFailure`] carrying `reason` after `delay`.
pub async fn reject_after<T>(delay: Duration, reason: &str) -> Result<T, TestFailure> {
    tokio::time::sleep(delay).await;
    Err(TestFailure::new(reason))
}
