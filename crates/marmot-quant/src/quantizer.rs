//! Blockwise 4-bit quantization codec
//!
//! A weight matrix is partitioned into blocks, each block a contiguous run
//! of [`BLOCK_SIZE`] row-elements within a single column. Each block is
//! quantized independently into 4-bit integers packed two per byte, with a
//! per-block scale and zero-point. Columns are independent, so the codec
//! fans them out over a worker pool; every worker writes only its own
//! column's output slices, which keeps the result bit-identical for any
//! worker count.

use ndarray::{ArrayView1, ArrayView2};
use rayon::prelude::*;
use tracing::debug;

use crate::error::{QuantError, Result};

/// Number of elements per quantization block
pub const BLOCK_SIZE: usize = 32;

/// Packed bytes per block (two 4-bit values per byte)
pub const BLOB_SIZE: usize = BLOCK_SIZE / 2;

/// Block quantization variants
///
/// The discriminants are stable across versions; native execution kernels
/// dispatch on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BlkQuantType {
    /// 32-element blocks, symmetric, zero-point implicitly 8
    Q4Sym = 0,
    /// 32-element blocks, asymmetric, explicit 8-bit zero-point
    Q4Zp8 = 1,
}

impl BlkQuantType {
    /// Returns true for the symmetric variant
    pub fn is_symmetric(self) -> bool {
        matches!(self, Self::Q4Sym)
    }
}

/// Total packed-blob buffer size for a matrix of the given shape
pub fn quantized_buffer_size(rows: usize, cols: usize) -> usize {
    let k_blocks = (rows + BLOCK_SIZE - 1) / BLOCK_SIZE;
    cols * k_blocks * BLOB_SIZE
}

/// A quantized weight matrix
///
/// `packed` is laid out as `(cols, k_blocks, BLOB_SIZE)` and `scales` /
/// `zero_points` as `(cols, k_blocks)`, flattened row-major in column-outer
/// traversal order.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedWeight {
    /// Packed 4-bit payload
    pub packed: Vec<u8>,
    /// Per-block scales
    pub scales: Vec<f32>,
    /// Per-block zero-points (always 8 in symmetric mode)
    pub zero_points: Vec<u8>,
    /// Original (unpadded) row count of the source matrix
    pub rows: usize,
    /// Column count of the source matrix
    pub cols: usize,
    /// Blocks per column
    pub k_blocks: usize,
}

impl QuantizedWeight {
    /// Logical dimensions of the packed payload
    pub fn packed_dims(&self) -> [usize; 3] {
        [self.cols, self.k_blocks, BLOB_SIZE]
    }

    /// Logical dimensions of the scale and zero-point arrays
    pub fn param_dims(&self) -> [usize; 2] {
        [self.cols, self.k_blocks]
    }
}

/// Quantizes a 2-D fp32 matrix into packed 4-bit blocks
///
/// `dims` must describe a rank-2 shape `[rows, cols]` with rows as the
/// reduction dimension; any other rank is a usage error. Columns whose
/// length is not a multiple of [`BLOCK_SIZE`] are zero-padded at the end;
/// the padding participates in each final block's scale computation but is
/// never part of the logical output.
pub fn quantize_matrix(data: &[f32], dims: &[usize], qtype: BlkQuantType) -> Result<QuantizedWeight> {
    let (rows, cols) = match dims {
        &[rows, cols] => (rows, cols),
        _ => return Err(QuantError::UnsupportedRank(dims.len())),
    };
    if data.len() != rows * cols {
        return Err(QuantError::DataShapeMismatch {
            rows,
            cols,
            actual: data.len(),
        });
    }

    let k_blocks = (rows + BLOCK_SIZE - 1) / BLOCK_SIZE;
    debug!(rows, cols, k_blocks, symmetric = qtype.is_symmetric(), "blockwise 4-bit quantization");

    if rows == 0 || cols == 0 {
        return Ok(QuantizedWeight {
            packed: Vec::new(),
            scales: Vec::new(),
            zero_points: Vec::new(),
            rows,
            cols,
            k_blocks,
        });
    }

    // Validated above, so the view construction cannot fail.
    let matrix = ArrayView2::from_shape((rows, cols), data).map_err(|_| {
        QuantError::DataShapeMismatch {
            rows,
            cols,
            actual: data.len(),
        }
    })?;

    let mut packed = vec![0u8; quantized_buffer_size(rows, cols)];
    let mut scales = vec![0f32; cols * k_blocks];
    let mut zero_points = vec![0u8; cols * k_blocks];

    let symmetric = qtype.is_symmetric();
    packed
        .par_chunks_mut(k_blocks * BLOB_SIZE)
        .zip(scales.par_chunks_mut(k_blocks))
        .zip(zero_points.par_chunks_mut(k_blocks))
        .enumerate()
        .for_each(|(n, ((col_packed, col_scales), col_zps))| {
            quantize_column(matrix.column(n), symmetric, col_packed, col_scales, col_zps);
        });

    Ok(QuantizedWeight {
        packed,
        scales,
        zero_points,
        rows,
        cols,
        k_blocks,
    })
}

/// Quantizes one column into its pre-allocated output slices
fn quantize_column(
    column: ArrayView1<'_, f32>,
    symmetric: bool,
    col_packed: &mut [u8],
    col_scales: &mut [f32],
    col_zps: &mut [u8],
) {
    let k_blocks = col_scales.len();
    let mut block = [0f32; BLOCK_SIZE];

    for b in 0..k_blocks {
        let start = b * BLOCK_SIZE;
        let avail = (column.len() - start).min(BLOCK_SIZE);
        block.fill(0.0);
        for i in 0..avail {
            block[i] = column[start + i];
        }

        let (scale, zp) = if symmetric {
            symmetric_params(&block)
        } else {
            asymmetric_params(&block)
        };
        col_scales[b] = scale;
        col_zps[b] = zp;

        let recip = if scale != 0.0 { 1.0 / scale } else { 0.0 };
        let blob = &mut col_packed[b * BLOB_SIZE..(b + 1) * BLOB_SIZE];
        for i in (0..BLOCK_SIZE).step_by(2) {
            let lo = quantize_value(block[i], recip, zp);
            let hi = quantize_value(block[i + 1], recip, zp);
            blob[i / 2] = lo | (hi << 4);
        }
    }
}

/// Scale and zero-point for one block, symmetric mode
///
/// The scale is derived from the element of largest magnitude; ties keep
/// the lowest index. The zero-point is fixed at the 4-bit midpoint.
fn symmetric_params(block: &[f32; BLOCK_SIZE]) -> (f32, u8) {
    let mut bmax = block[0];
    for &v in &block[1..] {
        if v.abs() > bmax.abs() {
            bmax = v;
        }
    }
    (bmax / -8.0, 8)
}

/// Scale and zero-point for one block, asymmetric mode
///
/// Zero is always included in the representable range so an exact 0.0 in
/// the source stays exact after dequantization.
fn asymmetric_params(block: &[f32; BLOCK_SIZE]) -> (f32, u8) {
    let mut vmin = 0f32;
    let mut vmax = 0f32;
    for &v in block {
        vmin = vmin.min(v);
        vmax = vmax.max(v);
    }
    let scale = (vmax - vmin) / 15.0;
    let zp_fp = if scale != 0.0 { -vmin / scale } else { vmin };
    (scale, zp_fp.round().clamp(0.0, 15.0) as u8)
}

fn quantize_value(x: f32, recip: f32, zp: u8) -> u8 {
    (x * recip + zp as f32).round().clamp(0.0, 15.0) as u8
}

/// Reconstructs the logical fp32 matrix from its quantized form
///
/// Applies `x' = (q - zero_point) * scale` per element and drops padding
/// rows. Intended for verification; numeric execution of the fused
/// operator belongs to native kernels.
pub fn dequantize_matrix(qw: &QuantizedWeight) -> Vec<f32> {
    let mut out = vec![0f32; qw.rows * qw.cols];
    for n in 0..qw.cols {
        for b in 0..qw.k_blocks {
            let idx = n * qw.k_blocks + b;
            let scale = qw.scales[idx];
            let zp = qw.zero_points[idx] as i32;
            let blob = &qw.packed[idx * BLOB_SIZE..(idx + 1) * BLOB_SIZE];
            for (i, &byte) in blob.iter().enumerate() {
                let r = b * BLOCK_SIZE + 2 * i;
                if r < qw.rows {
                    out[r * qw.cols + n] = ((byte & 0x0F) as i32 - zp) as f32 * scale;
                }
                if r + 1 < qw.rows {
                    out[(r + 1) * qw.cols + n] = ((byte >> 4) as i32 - zp) as f32 * scale;
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_shape_law() {
        let data = vec![0.25f32; 64 * 4];
        let qw = quantize_matrix(&data, &[64, 4], BlkQuantType::Q4Sym).unwrap();
        assert_eq!(qw.packed_dims(), [4, 2, 16]);
        assert_eq!(qw.param_dims(), [4, 2]);
        assert_eq!(qw.packed.len(), quantized_buffer_size(64, 4));
        assert_eq!(qw.scales.len(), 8);
        assert_eq!(qw.zero_points.len(), 8);
    }

    #[test]
    fn test_all_ones_symmetric() {
        // 64x4 of ones: every block has bmax = 1, scale = -0.125, and every
        // element packs to clamp(round(1 / -0.125) + 8) = 0.
        let data = vec![1.0f32; 64 * 4];
        let qw = quantize_matrix(&data, &[64, 4], BlkQuantType::Q4Sym).unwrap();
        assert_eq!(qw.k_blocks, 2);
        assert!(qw.scales.iter().all(|&s| s == -0.125));
        assert!(qw.zero_points.iter().all(|&z| z == 8));
        assert!(qw.packed.iter().all(|&b| b == 0x00));

        let restored = dequantize_matrix(&qw);
        for &x in &restored {
            assert_relative_eq!(x, 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_non_2d_rejected() {
        let data = vec![0.0f32; 8];
        assert!(matches!(
            quantize_matrix(&data, &[2, 2, 2], BlkQuantType::Q4Sym),
            Err(QuantError::UnsupportedRank(3))
        ));
        assert!(matches!(
            quantize_matrix(&data, &[8], BlkQuantType::Q4Sym),
            Err(QuantError::UnsupportedRank(1))
        ));
    }

    #[test]
    fn test_data_length_mismatch() {
        let data = vec![0.0f32; 7];
        assert!(matches!(
            quantize_matrix(&data, &[2, 4], BlkQuantType::Q4Sym),
            Err(QuantError::DataShapeMismatch { actual: 7, .. })
        ));
    }

    #[test]
    fn test_row_padding() {
        // 40 rows: second block of the single column is 8 real elements
        // plus 24 padding zeros.
        let data = vec![2.0f32; 40];
        let qw = quantize_matrix(&data, &[40, 1], BlkQuantType::Q4Sym).unwrap();
        assert_eq!(qw.k_blocks, 2);
        assert_eq!(qw.packed.len(), 32);
        // Padding does not change the second block's bmax.
        assert_eq!(qw.scales[1], 2.0 / -8.0);

        let restored = dequantize_matrix(&qw);
        assert_eq!(restored.len(), 40);
        for &x in &restored {
            assert_relative_eq!(x, 2.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_zero_block_symmetric() {
        let data = vec![0.0f32; 32];
        let qw = quantize_matrix(&data, &[32, 1], BlkQuantType::Q4Sym).unwrap();
        assert_eq!(qw.scales[0], 0.0);
        assert_eq!(qw.zero_points[0], 8);
        // Every nibble equals the zero-point.
        assert!(qw.packed.iter().all(|&b| b == 0x88));
        assert!(dequantize_matrix(&qw).iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_zero_block_asymmetric() {
        let data = vec![0.0f32; 32];
        let qw = quantize_matrix(&data, &[32, 1], BlkQuantType::Q4Zp8).unwrap();
        assert_eq!(qw.scales[0], 0.0);
        assert_eq!(qw.zero_points[0], 0);
        assert!(qw.packed.iter().all(|&b| b == 0x00));
        assert!(dequantize_matrix(&qw).iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_constant_block_asymmetric() {
        // All elements equal and positive: range is [0, 5], zero-point 0,
        // every element lands on the top code.
        let data = vec![5.0f32; 32];
        let qw = quantize_matrix(&data, &[32, 1], BlkQuantType::Q4Zp8).unwrap();
        assert_relative_eq!(qw.scales[0], 5.0 / 15.0, epsilon = 1e-7);
        assert_eq!(qw.zero_points[0], 0);
        assert!(qw.packed.iter().all(|&b| b == 0xFF));
        for &x in &dequantize_matrix(&qw) {
            assert_relative_eq!(x, 5.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_negative_constant_asymmetric() {
        let data = vec![-6.0f32; 32];
        let qw = quantize_matrix(&data, &[32, 1], BlkQuantType::Q4Zp8).unwrap();
        assert_eq!(qw.zero_points[0], 15);
        for &x in &dequantize_matrix(&qw) {
            assert_relative_eq!(x, -6.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_bmax_recovers_exactly() {
        // Powers of two keep the scale arithmetic exact in either sign.
        let mut data = vec![0.5f32; 32];
        data[7] = 4.0;
        let qw = quantize_matrix(&data, &[32, 1], BlkQuantType::Q4Sym).unwrap();
        assert_eq!(qw.scales[0], -0.5);
        assert_eq!(dequantize_matrix(&qw)[7], 4.0);

        let mut data = vec![0.5f32; 32];
        data[3] = -4.0;
        let qw = quantize_matrix(&data, &[32, 1], BlkQuantType::Q4Sym).unwrap();
        assert_eq!(qw.scales[0], 0.5);
        assert_eq!(dequantize_matrix(&qw)[3], -4.0);
    }

    #[test]
    fn test_argmax_tie_keeps_lowest_index() {
        let mut data = vec![0.0f32; 32];
        data[0] = 2.0;
        data[1] = -2.0;
        let qw = quantize_matrix(&data, &[32, 1], BlkQuantType::Q4Sym).unwrap();
        // The positive element at index 0 wins the tie, so the scale keeps
        // its sign flipped by the -8 divisor.
        assert_eq!(qw.scales[0], -0.25);
    }

    #[test]
    fn test_round_trip_bound_positive_block() {
        // All-positive block: no code clamps, so every element stays within
        // half a quantization step.
        let data: Vec<f32> = (0..32).map(|i| 0.1 + 0.05 * i as f32).collect();
        let qw = quantize_matrix(&data, &[32, 1], BlkQuantType::Q4Sym).unwrap();
        let restored = dequantize_matrix(&qw);
        let half_step = qw.scales[0].abs() / 2.0;
        for (x, y) in data.iter().zip(&restored) {
            assert!((x - y).abs() <= half_step + 1e-6, "{x} vs {y}");
        }
    }

    #[test]
    fn test_empty_matrix() {
        let qw = quantize_matrix(&[], &[0, 4], BlkQuantType::Q4Sym).unwrap();
        assert_eq!(qw.k_blocks, 0);
        assert!(qw.packed.is_empty());
        assert!(dequantize_matrix(&qw).is_empty());
    }

    #[test]
    fn test_pack_nibble_order() {
        // Distinct adjacent values: element 2i in the low nibble, 2i+1 in
        // the high nibble.
        let mut data = vec![0.0f32; 32];
        data[0] = -8.0; // quantizes to 0 with scale 1
        data[1] = 7.0; // quantizes to 15
        let qw = quantize_matrix(&data, &[32, 1], BlkQuantType::Q4Sym).unwrap();
        assert_eq!(qw.scales[0], 1.0);
        assert_eq!(qw.packed[0] & 0x0F, 0);
        assert_eq!(qw.packed[0] >> 4, 15);
    }
}
