//! DaError: unified error type for halo-da public APIs
//!
//! Configuration problems are detected locally at creation time and reported
//! as [`DaError::ArgumentOutOfRange`]. Communication failures surface as
//! [`DaError::CommError`] / [`DaError::BufferSizeMismatch`]; callers running
//! SPMD should treat those as fatal.

use thiserror::Error;

/// Unified error type for halo-da operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DaError {
    /// A grid or partition parameter is outside its valid range.
    #[error("Argument out of range: {0}")]
    ArgumentOutOfRange(String),
    /// An index fell outside the extent of the object it addresses.
    #[error("Index {index} out of range (len = {len})")]
    IndexOutOfRange { index: usize, len: usize },
    /// A buffer handed to a plan or vector operation has the wrong length.
    #[error("Vector length mismatch: expected {expected}, got {got}")]
    VectorLengthMismatch { expected: usize, got: usize },
    /// Insert and add values were mixed before the vector was assembled.
    #[error("Cannot mix insert and add values before assembly")]
    InsertModeConflict,
    /// The communicator failed to deliver a message.
    #[error("Communication error with rank {neighbor}: {message}")]
    CommError { neighbor: usize, message: String },
    /// A received message had an unexpected byte length.
    #[error("Buffer size mismatch from rank {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// Ranks disagree on the grid configuration.
    #[error("Grid configuration differs on rank {rank}")]
    InconsistentConfig { rank: usize },
    /// Writing a viewer report failed.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for DaError {
    fn from(err: std::io::Error) -> Self {
        DaError::Io(err.to_string())
    }
}
