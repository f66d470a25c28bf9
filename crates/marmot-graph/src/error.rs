//! Error types for model loading and saving

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for graph-model operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, loading, or saving graph models
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Container (de)serialization failed
    #[error("Invalid model container: {0}")]
    Json(#[from] serde_json::Error),

    /// Tensor payload length does not match the declared dimensions
    #[error("Tensor '{name}': data length {actual} does not match dims {dims:?} ({expected} elements)")]
    DataLength {
        name: String,
        dims: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    /// A tensor references external data but the sidecar file is missing
    #[error("External tensor data file not found: {0}")]
    MissingExternalData(PathBuf),

    /// An external-data record points outside the sidecar file
    #[error("Tensor '{name}': external data range {offset}+{len} exceeds sidecar size {available}")]
    ExternalDataRange {
        name: String,
        offset: u64,
        len: u64,
        available: u64,
    },
}
