use std::sync::Arc;

use thiserror::Error;

/// A value read back from the storage backend could not be parsed.
///
/// The in-memory cache is left unpopulated for the queue, so the payload is parsed again on the
/// next lookup.
#[derive(Debug, Error)]
#[error("failed to deserialize stored value for queue `{queue}`")]
pub struct DeserializeError {
    /// The queue whose stored value is malformed.
    pub queue: String,
    #[source]
    pub source: serde_json::Error,
}

/// An error returned from [`QueueManager::request`](crate::QueueManager::request).
///
/// `E` is the error type of the operation. Operation errors are shared between every caller of
/// the same run, so they are handed out as an [`Arc`] pointing at the one error value the
/// operation produced.
#[derive(Debug, Error)]
pub enum QueueError<E> {
    /// There is no cached value and no operation was supplied to produce one.
    ///
    /// This is a misuse of the API by the caller and is never retried.
    #[error("no operation to run and nothing cached for queue `{0}`")]
    InvalidUsage(String),
    /// The operation failed. Nothing was cached, so a later request may run it again.
    #[error("operation failed")]
    Operation(#[source] Arc<E>),
    /// The stored value for the queue could not be read back.
    #[error(transparent)]
    Deserialization(#[from] DeserializeError),
    /// The operation panicked before producing an outcome.
    #[error("operation for queue `{0}` was abandoned before it settled")]
    Abandoned(String),
}

impl<E> QueueError<E> {
    /// Returns the operation's error, if this is an [`Operation`](Self::Operation) error.
    pub fn operation_error(&self) -> Option<&Arc<E>> {
        match self {
            QueueError::Operation(err) => Some(err),
            _ => None,
        }
    }
}
