//! Error types for quantization and graph rewriting

use thiserror::Error;

/// Result type alias for quantization operations
pub type Result<T> = std::result::Result<T, QuantError>;

/// Errors that can occur during quantization or graph rewriting
#[derive(Error, Debug)]
pub enum QuantError {
    /// The input matrix is not rank-2
    #[error("Blockwise 4-bit quantization only supports 2-D matrices, got rank {0}")]
    UnsupportedRank(usize),

    /// The flat data length does not match the declared matrix shape
    #[error("Matrix data length {actual} does not match shape {rows}x{cols}")]
    DataShapeMismatch {
        rows: usize,
        cols: usize,
        actual: usize,
    },

    /// A matrix-multiply node is missing a required input or output
    #[error("Malformed matrix-multiply node '{0}': missing operand or output")]
    MalformedNode(String),

    /// Error raised by the graph layer while registering rewritten tensors
    #[error("Graph error: {0}")]
    Graph(#[from] marmot_graph::Error),
}
