use std::fmt;
use std::future::Future;

use futures::FutureExt;
use futures::future::BoxFuture;

type Invoke<T, E> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, E>> + Send>;

/// An asynchronous computation producing the value for a queue.
///
/// The operation is invoked at most once, and only when the queue has neither a cached value nor
/// a run in flight. Operations handed to a request that is served from the cache or attached to
/// a running operation are dropped without being called.
pub struct Operation<T, E> {
    invoke: Invoke<T, E>,
}

impl<T, E> Operation<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Creates an operation from a closure returning the future to run.
    ///
    /// Arguments are captured by the closure:
    ///
    /// ```
    /// # use queue_manager::Operation;
    /// async fn fetch_user(id: u32) -> Result<String, std::io::Error> {
    ///     Ok(format!("user {id}"))
    /// }
    ///
    /// let operation = Operation::new(move || fetch_user(1));
    /// ```
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            invoke: Box::new(move || f().boxed()),
        }
    }

    /// Creates an operation that calls `f` with `args` once it runs.
    ///
    /// Multiple arguments are passed as a tuple.
    pub fn with_args<A, F, Fut>(f: F, args: A) -> Self
    where
        A: Send + 'static,
        F: FnOnce(A) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self::new(move || f(args))
    }

    /// Invokes the operation, returning the future that produces its outcome.
    pub(crate) fn invoke(self) -> BoxFuture<'static, Result<T, E>> {
        (self.invoke)()
    }
}

impl<T, E> fmt::Debug for Operation<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation").finish_non_exhaustive()
    }
}
