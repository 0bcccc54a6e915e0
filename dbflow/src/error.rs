//! Error types surfaced by the engine.
//!
//! Every fallible public operation returns [`Result`]. No operator or
//! subsystem aborts the process; failures are reported to the caller and, in
//! the runtime's case, recorded so later steps can refuse to run.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// The crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong, by subsystem.
#[derive(Debug, Error)]
pub enum Error {
    /// Building a circuit failed: duplicate ids, dangling edges, cycles.
    #[error("circuit construction: {0}")]
    Construction(String),

    /// An optimizer rule found or produced a malformed circuit.
    #[error("circuit validation: {0}")]
    Validation(String),

    /// The runtime was driven outside its contract or an operator failed.
    #[error("runtime: {0}")]
    Runtime(String),

    /// A step ran against a runtime already in the failed state.
    #[error("runtime previously failed: {0}")]
    Failed(Arc<Error>),

    /// A storage backend rejected or lost an operation.
    #[error("storage: {0}")]
    Storage(String),

    /// Durable state is damaged: bad magic, CRC mismatch, truncation.
    #[error("persistence: {0}")]
    Persistence(String),

    /// The step or runtime was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// A parallel step exceeded its deadline.
    #[error("step timed out after {0:?}")]
    Timeout(Duration),

    /// Encoding or decoding through a codec failed.
    #[error("codec: {0}")]
    Codec(String),

    /// An underlying I/O operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wraps an error as the stored cause of a failed runtime.
    pub fn into_failed(self) -> (Arc<Error>, Error) {
        let cause = Arc::new(self);
        (Arc::clone(&cause), Error::Failed(cause))
    }
}
