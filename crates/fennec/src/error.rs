//! Error and Result types for fennec operations.

use std::io;
use thiserror::Error;

/// A convenience `Result` type for fennec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type surfaced at the persistence API boundary.
///
/// In-memory codec and kernel operations are total functions on well-formed
/// input and do not return errors; everything here originates in the
/// persistence layer or from invalid caller input.
#[derive(Debug, Error)]
pub enum Error {
    /// Null/empty input where forbidden, or an out-of-range index.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Underlying read/write/sync/truncate failed, propagated verbatim.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Magic, version, header checksum, footer checksum, or count/dataLen
    /// verification failed while reading a snapshot.
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// A WAL entry failed framing, length, or checksum verification, or
    /// carried an unknown operation tag.
    #[error("corrupt WAL entry: {0}")]
    CorruptWalEntry(String),

    /// Snapshot or WAL structType differs from the registered ops type.
    #[error("structure type mismatch: expected {expected}, got {found}")]
    TypeMismatch {
        /// The type tag the registered ops expect.
        expected: u32,
        /// The type tag found in the file header.
        found: u32,
    },

    /// A buffer could not be grown to the required size.
    #[error("allocation failure: {0}")]
    AllocationFailure(String),

    /// `apply_op` rejected an operation during WAL replay.
    #[error("apply callback failed: {0}")]
    CallbackFailure(String),
}
