//! The [`QueueManager`] façade.
//!
//! A request goes through the following steps:
//!
//! - First, it looks the queue name up in the [`ResultCache`], which consults the configured
//!   [`Storage`] if the value is not in memory yet. A hit is returned right away and the supplied
//!   operation is dropped without being called.
//! - Without an operation there is nothing left to do, and the request fails with
//!   [`QueueError::InvalidUsage`].
//! - If a run for the queue name is already in flight, the request is attached to it as a waiter.
//! - Otherwise the request starts a new run: the operation is invoked and driven to completion on
//!   the Tokio runtime, independently of the caller.
//!
//! Once a run settles, a successful value is written to the cache, every waiter is released in
//! arrival order with the same outcome, followed by the caller that started the run. Failures are
//! never cached, so the next request starts a fresh run.

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tracing::Instrument;

use crate::cache::ResultCache;
use crate::config::StorageConfig;
use crate::error::{DeserializeError, QueueError};
use crate::inflight::{Generation, InFlightRegistry};
use crate::operation::Operation;
use crate::storage::{self, Storage};


/// The outcome of a run, shared by all of its callers.
type Outcome<T, E> = Result<T, Arc<E>>;

type Waiter<T, E> = oneshot::Sender<Outcome<T, E>>;

struct Inner<T, E> {
    cache: ResultCache<T>,
    registry: Mutex<InFlightRegistry<Waiter<T, E>>>,
}

impl<T, E> Inner<T, E> {
    fn registry(&self) -> MutexGuard<'_, InFlightRegistry<Waiter<T, E>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Coalesces and caches asynchronous computations by queue name.
///
/// At most one operation runs per queue name at a time. Requests arriving while it runs wait for
/// its outcome instead of starting their own, and once it succeeds its value is served to every
/// later request.
///
/// Cloning a manager is cheap and yields a handle to the same state. Separately constructed
/// managers share nothing, unless they are handed the same [`Storage`].
pub struct QueueManager<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for QueueManager<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for QueueManager<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let in_flight = self
            .inner
            .registry
            .try_lock()
            .map(|r| r.len())
            .unwrap_or_default();
        f.debug_struct("QueueManager")
            .field("cache", &self.inner.cache)
            .field("in-flight runs", &in_flight)
            .finish()
    }
}

/// How a request got hold of its value.
enum Joined<T, E> {
    /// The value was cached by the time the registry was locked.
    Cached(T),
    /// The request waits for the outcome of a run.
    Waiting(oneshot::Receiver<Outcome<T, E>>),
}

impl<T, E> QueueManager<T, E>
where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    E: Send + Sync + 'static,
{
    /// Creates a manager that keeps values in memory only.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a manager that mirrors values into `storage`.
    ///
    /// Values already present in `storage` are served without running any operation.
    pub fn with_storage(storage: Arc<dyn Storage>) -> Self {
        Self::build(Some(storage))
    }

    /// Creates a manager with the storage backend selected by `config`.
    pub fn from_config(config: &StorageConfig) -> io::Result<Self> {
        Ok(Self::build(storage::from_config(config)?))
    }

    fn build(storage: Option<Arc<dyn Storage>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache: ResultCache::new(storage),
                registry: Mutex::new(InFlightRegistry::new()),
            }),
        }
    }

    /// Returns the value of the queue `name`, running `operation` to produce it if necessary.
    ///
    /// See the [module docs](self) for the order in which the cache, the running operations and
    /// the supplied operation are considered.
    ///
    /// # Errors
    ///
    /// - [`QueueError::InvalidUsage`] if nothing is cached and no operation was supplied.
    /// - [`QueueError::Operation`] with the error of the run this request took part in. All
    ///   callers of that run receive the very same error.
    /// - [`QueueError::Deserialization`] if the stored value for `name` cannot be parsed.
    /// - [`QueueError::Abandoned`] if the operation panicked.
    ///
    /// # Panics
    ///
    /// Panics when a new run has to be started outside of a Tokio runtime.
    pub async fn request(
        &self,
        name: &str,
        operation: Option<Operation<T, E>>,
    ) -> Result<T, QueueError<E>> {
        metric!(counter("queue.request") += 1);

        if let Some(value) = self.inner.cache.lookup(name)? {
            tracing::trace!(queue = name, "Serving cached value");
            return Ok(value);
        }

        let Some(operation) = operation else {
            return Err(QueueError::InvalidUsage(name.to_owned()));
        };

        let receiver = match self.join(name, operation) {
            Joined::Cached(value) => return Ok(value),
            Joined::Waiting(receiver) => receiver,
        };

        match receiver.await {
            Ok(outcome) => outcome.map_err(QueueError::Operation),
            Err(_) => Err(QueueError::Abandoned(name.to_owned())),
        }
    }

    /// Attaches to the run in flight for `name`, or starts a new one with `operation`.
    fn join(&self, name: &str, operation: Operation<T, E>) -> Joined<T, E> {
        let (sender, receiver) = oneshot::channel();

        let mut registry = self.inner.registry();

        // A run might have settled since the lookup, in which case its value is cached by now.
        if let Some(value) = self.inner.cache.get_in_memory(name) {
            return Joined::Cached(value);
        }

        let sender = match registry.enqueue_waiter(name, sender) {
            Ok(position) => {
                metric!(counter("queue.waiter") += 1);
                tracing::trace!(queue = name, position, "Waiting for in-flight operation");
                return Joined::Waiting(receiver);
            }
            Err(sender) => sender,
        };

        // The registry is locked and nothing is in flight, so this cannot fail. Should it anyway,
        // the sender is dropped and the request reports the run as abandoned.
        let Ok(generation) = registry.begin(name, sender) else {
            return Joined::Waiting(receiver);
        };
        metric!(gauge("queue.in_flight") = registry.len() as u64);
        drop(registry);

        self.spawn_run(name, generation, operation);
        Joined::Waiting(receiver)
    }

    /// Invokes `operation` and drives it to completion in a background task.
    ///
    /// The run settles even if every caller has stopped waiting for it.
    fn spawn_run(&self, name: &str, generation: Generation, operation: Operation<T, E>) {
        metric!(counter("queue.computation") += 1);
        tracing::debug!(queue = name, generation, "Starting operation");

        // Created before the operation is invoked, so a panicking operation still retires its run.
        let guard = SettleGuard {
            inner: Arc::clone(&self.inner),
            name: name.to_owned(),
            generation,
            settled: false,
        };

        let future = operation.invoke();
        let span = tracing::debug_span!("queue_operation", queue = name, generation);

        tokio::spawn(
            async move {
                let start = Instant::now();
                let outcome = future.await.map_err(Arc::new);
                metric!(timer("queue.operation.duration") = start.elapsed());
                guard.settle(outcome);
            }
            .instrument(span),
        );
    }

    /// Returns the cached value of the queue `name`, without running anything.
    ///
    /// This consults the storage if the value is not in memory yet, but ignores any run in flight.
    pub fn peek(&self, name: &str) -> Result<Option<T>, DeserializeError> {
        self.inner.cache.lookup(name)
    }
}

impl<T, E> QueueManager<T, E> {
    /// Whether an operation for the queue `name` is currently running.
    pub fn is_in_flight(&self, name: &str) -> bool {
        self.inner.registry().is_active(name)
    }

    /// The number of queue names with an operation currently running.
    pub fn in_flight_count(&self) -> usize {
        self.inner.registry().len()
    }
}

impl<T, E> Default for QueueManager<T, E>
where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Retires a run from the registry once it has an outcome.
///
/// If the guard is dropped without [`settle`](Self::settle) being called, the operation
/// panicked or its task was torn down. The run is then retired without an outcome, which
/// drops all waiters and reports the run as abandoned to them.
struct SettleGuard<T, E> {
    inner: Arc<Inner<T, E>>,
    name: String,
    generation: Generation,
    settled: bool,
}

impl<T, E> SettleGuard<T, E>
where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    E: Send + Sync + 'static,
{
    fn settle(mut self, outcome: Outcome<T, E>) {
        self.settled = true;
        let name = self.name.as_str();

        let settled = {
            let mut registry = self.inner.registry();
            // Written while the registry is locked, so a request never finds the queue both
            // uncached and idle in between.
            if let Ok(value) = &outcome {
                self.inner.cache.store(name, value.clone());
            }
            let settled = registry.settle(name, self.generation);
            metric!(gauge("queue.in_flight") = registry.len() as u64);
            settled
        };

        metric!(
            counter("queue.settled") += 1,
            "status" => if outcome.is_ok() { "ok" } else { "error" },
        );

        let Some(settled) = settled else {
            tracing::error!(
                queue = name,
                generation = self.generation,
                "Settled a run that was no longer in flight",
            );
            return;
        };

        tracing::debug!(
            queue = name,
            generation = settled.generation,
            waiters = settled.waiters.len(),
            ok = outcome.is_ok(),
            "Operation settled",
        );

        for sender in settled.into_release_order() {
            // the caller may have stopped waiting, which is fine
            let _ = sender.send(outcome.clone());
        }
    }
}

impl<T, E> Drop for SettleGuard<T, E> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        metric!(counter("queue.settled") += 1, "status" => "abandoned");
        tracing::warn!(
            queue = %self.name,
            generation = self.generation,
            "Operation was abandoned before it settled",
        );
        // dropping the waiters lets every caller know
        drop(self.inner.registry().settle(&self.name, self.generation));
    }
}
