//! Blockwise 4-bit weight quantization for graph models
//!
//! Two layers: a pure block quantization codec that packs a 2-D fp32 weight
//! matrix into per-column 4-bit blocks with per-block scale/zero-point
//! parameters, and a graph rewrite pass that finds `MatMul` nodes over
//! constant weights (including inside nested subgraphs) and replaces them
//! with the fused `MatMulQ4` operator consuming the packed form.

pub mod error;
pub mod quantizer;
pub mod rewriter;

pub use error::{QuantError, Result};
pub use quantizer::{
    dequantize_matrix, quantize_matrix, quantized_buffer_size, BlkQuantType, QuantizedWeight,
    BLOB_SIZE, BLOCK_SIZE,
};
pub use rewriter::{quantize_model, GraphRewriter, FUSED_DOMAIN, FUSED_OP};
