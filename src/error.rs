use std::io;

use thiserror::Error;

/// Errors reported by the event loop mutator API.
///
/// The loop never aborts the process on caller error; every entry point
/// validates its arguments and reports failures through this type.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller-supplied argument was rejected before touching any state
    /// (negative file descriptor, out-of-horizon timeout).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The handle refers to an object that has been destroyed and possibly
    /// recycled. Distinct from [`Error::InvalidArgument`] so callers can
    /// tell their own lifetime bug from a benign race with a destroy.
    #[error("stale handle: the object was destroyed")]
    Stale,

    /// A kernel operation failed. Registration failures are recoverable:
    /// the operation fails and the object is left unchanged.
    #[error("kernel operation failed: {0}")]
    Io(#[from] io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
