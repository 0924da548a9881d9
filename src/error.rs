//! Error taxonomy shared by every component of the crate.
//!
//! A single tagged enum keeps the surface small: callers pattern-match on the
//! kind, and `Display` gives a stable human-readable description for each.
//! `Ok(..)` plays the role of a success code.

use std::collections::TryReserveError;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong inside the library.
///
/// The split between `InvalidArguments` and `InvalidInput` matters for
/// callers: the former is a caller bug (bad shapes, out-of-range SH degree,
/// zero counts) and should not be retried, while the latter is data-dependent
/// (corrupt or truncated containers, incompatible sets).
#[derive(Debug, Error)]
pub enum Error {
    /// A function was called with arguments that can never be valid.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The provided memory or file input was in an invalid format.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An allocation failed while building a Gaussian set.
    #[error("out of memory while allocating gaussian buffers")]
    OutOfMemory,

    /// Failed to open a file for reading or writing.
    #[error("failed to open file")]
    FileOpen(#[source] std::io::Error),

    /// Failed to finalize a file after writing.
    #[error("failed to close file")]
    FileClose(#[source] std::io::Error),

    /// A read returned fewer bytes than requested.
    #[error("failed to read from file")]
    FileRead(#[source] std::io::Error),

    /// A write could not complete.
    #[error("failed to write to file")]
    FileWrite(#[source] std::io::Error),
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Error::OutOfMemory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptions_are_stable() {
        let e = Error::InvalidInput("mismatched magic word".into());
        assert_eq!(e.to_string(), "invalid input: mismatched magic word");

        let e = Error::OutOfMemory;
        assert!(e.to_string().contains("out of memory"));
    }

    #[test]
    fn io_source_is_preserved() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        let e = Error::FileOpen(io);
        assert!(e.source().is_some());
    }
}
