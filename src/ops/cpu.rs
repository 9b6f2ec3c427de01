//! Parallel CPU engine.
//!
//! The default engine. Kernels are plain loops over the output index space,
//! parallelised with [`rayon`](https://docs.rs/rayon); every output position
//! is computed from the same index mapping the GPU engine uses, so both
//! engines agree up to floating-point associativity.
//!
//! Kernels take raw value slices plus their [`Shape`]s and return the result
//! data with its shape; the dispatch layer wraps results into buffers.
//! Shape/rank precondition violations panic here, at the call site.

use rayon::prelude::*;

use crate::ops::{BinaryOp, ReduceOp, UnaryOp};
use crate::shape::{Shape, resolve_broadcast};

#[cfg(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2"))]
use std::arch::x86_64::*;

/// Broadcasting elementwise binary op over the larger operand's index space.
///
/// # Panics
/// Panics if the shapes are broadcast-incompatible under the restricted
/// suffix/scalar rule.
pub fn binary(
    op: BinaryOp,
    lhs: &[f64],
    lhs_shape: &Shape,
    rhs: &[f64],
    rhs_shape: &Shape,
) -> (Vec<f64>, Shape) {
    let layout = resolve_broadcast(lhs_shape, rhs_shape);
    let n = layout.output.count();
    let (lc, rc) = (layout.lhs_count, layout.rhs_count);

    let out = (0..n)
        .into_par_iter()
        .map(|i| op.apply(lhs[i % lc], rhs[i % rc]))
        .collect();
    (out, layout.output)
}

/// Pure position-wise unary op.
pub fn unary(op: UnaryOp, input: &[f64]) -> Vec<f64> {
    input.par_iter().map(|&x| op.apply(x)).collect()
}

/// Position-wise local derivative of a unary op, for backward chain rules.
pub fn unary_derivative(op: UnaryOp, input: &[f64]) -> Vec<f64> {
    input.par_iter().map(|&x| op.derivative(x)).collect()
}

/// Splits a shape into (outer, axis length, inner) around `axis`.
pub(crate) fn axis_strides(shape: &Shape, axis: usize) -> (usize, usize, usize) {
    assert!(
        axis < shape.rank(),
        "reduction axis {axis} out of range for shape {shape}"
    );
    let dims = shape.dims();
    let outer: usize = dims[..axis].iter().product();
    let inner: usize = dims[axis + 1..].iter().product();
    (outer, dims[axis], inner)
}

/// Reduces `input` along `axis`; the axis is removed from the result shape.
///
/// # Panics
/// Panics if `axis >= rank`.
pub fn reduce(op: ReduceOp, input: &[f64], shape: &Shape, axis: usize) -> (Vec<f64>, Shape) {
    let (outer, len, inner) = axis_strides(shape, axis);
    let mut out_dims = shape.dims().to_vec();
    out_dims.remove(axis);
    let out_shape = Shape::from(out_dims);

    let out = (0..outer * inner)
        .into_par_iter()
        .map(|oi| {
            let (o, i) = (oi / inner, oi % inner);
            let at = |a: usize| input[o * len * inner + a * inner + i];
            let sum: f64 = (0..len).map(at).sum();
            match op {
                ReduceOp::Sum => sum,
                ReduceOp::Mean => sum / len as f64,
                ReduceOp::Variance => {
                    let mean = sum / len as f64;
                    (0..len).map(|a| (at(a) - mean).powi(2)).sum::<f64>() / len as f64
                }
            }
        })
        .collect();
    (out, out_shape)
}

/// Batch layout of a (possibly batched) matrix multiply.
pub(crate) struct MatmulLayout {
    pub batches: usize,
    pub lhs_batches: usize,
    pub rhs_batches: usize,
    pub m: usize,
    pub k: usize,
    pub n: usize,
    pub out_shape: Shape,
}

pub(crate) fn matmul_layout(lhs_shape: &Shape, rhs_shape: &Shape) -> MatmulLayout {
    let (lr, rr) = (lhs_shape.rank(), rhs_shape.rank());
    assert!(lr >= 2 && rr >= 2, "matmul requires rank >= 2 operands");

    let (m, k) = (lhs_shape[lr - 2], lhs_shape[lr - 1]);
    let (k2, n) = (rhs_shape[rr - 2], rhs_shape[rr - 1]);
    assert_eq!(k, k2, "matmul inner dimension mismatch: {lhs_shape} x {rhs_shape}");

    // Leading batch axes broadcast with the same restricted rule as binary ops.
    let lhs_batch = Shape::from(&lhs_shape.dims()[..lr - 2]);
    let rhs_batch = Shape::from(&rhs_shape.dims()[..rr - 2]);
    let batch = resolve_broadcast(&lhs_batch, &rhs_batch);

    let mut out_dims = batch.output.dims().to_vec();
    out_dims.push(m);
    out_dims.push(n);
    MatmulLayout {
        batches: batch.output.count(),
        lhs_batches: batch.lhs_count,
        rhs_batches: batch.rhs_count,
        m,
        k,
        n,
        out_shape: Shape::from(out_dims),
    }
}

/// Matrix multiply `lhs[.., m, k] @ rhs[.., k, n]`, one parallel row at a
/// time like the elementwise kernels, with an optional AVX2 inner loop.
///
/// # Panics
/// Panics on rank < 2, inner-dimension mismatch, or broadcast-incompatible
/// batch axes.
pub fn matmul(lhs: &[f64], lhs_shape: &Shape, rhs: &[f64], rhs_shape: &Shape) -> (Vec<f64>, Shape) {
    let l = matmul_layout(lhs_shape, rhs_shape);
    let (m, k, n) = (l.m, l.k, l.n);

    let mut out = vec![0.0; l.batches * m * n];
    if n == 0 {
        return (out, l.out_shape);
    }
    out.par_chunks_mut(n).enumerate().for_each(|(chunk, row)| {
        let (batch, i) = (chunk / m, chunk % m);
        let a = &lhs[(batch % l.lhs_batches) * m * k..][..m * k];
        let b = &rhs[(batch % l.rhs_batches) * k * n..][..k * n];
        for (j, slot) in row.iter_mut().enumerate() {
            *slot = dot_stride(&a[i * k..i * k + k], b, j, n);
        }
    });
    (out, l.out_shape)
}

/// Dot product of a contiguous row with a strided column.
fn dot_stride(row: &[f64], b: &[f64], col: usize, stride: usize) -> f64 {
    #[cfg(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2"))]
    {
        let k = row.len();
        let mut acc = unsafe { _mm256_setzero_pd() };
        let mut idx = 0;
        while idx + 4 <= k {
            unsafe {
                let a_chunk = _mm256_loadu_pd(row.as_ptr().add(idx));
                let b_chunk = _mm256_set_pd(
                    b[(idx + 3) * stride + col],
                    b[(idx + 2) * stride + col],
                    b[(idx + 1) * stride + col],
                    b[idx * stride + col],
                );
                acc = _mm256_fmadd_pd(a_chunk, b_chunk, acc);
            }
            idx += 4;
        }
        let mut temp = [0.0; 4];
        unsafe { _mm256_storeu_pd(temp.as_mut_ptr(), acc) };
        let mut sum: f64 = temp.iter().sum();
        for l in idx..k {
            sum += row[l] * b[l * stride + col];
        }
        sum
    }

    #[cfg(not(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2")))]
    {
        row.iter()
            .enumerate()
            .map(|(l, &a)| a * b[l * stride + col])
            .sum()
    }
}

/// Swaps the last two axes (batched over any leading axes).
///
/// # Panics
/// Panics on rank < 2.
pub fn transpose(input: &[f64], shape: &Shape) -> (Vec<f64>, Shape) {
    let r = shape.rank();
    assert!(r >= 2, "transpose requires rank >= 2, got {shape}");
    let (rows, cols) = (shape[r - 2], shape[r - 1]);
    let mut out_dims = shape.dims().to_vec();
    out_dims.swap(r - 2, r - 1);

    if rows * cols == 0 {
        return (Vec::new(), Shape::from(out_dims));
    }
    let mut out = vec![0.0; input.len()];
    out.par_chunks_mut(rows * cols).enumerate().for_each(|(batch, chunk)| {
        let src = &input[batch * rows * cols..][..rows * cols];
        for i in 0..rows {
            for j in 0..cols {
                chunk[j * rows + i] = src[i * cols + j];
            }
        }
    });
    (out, Shape::from(out_dims))
}

/// Constant fill.
pub fn fill(shape: &Shape, value: f64) -> Vec<f64> {
    vec![value; shape.count()]
}

/// Linear ramp from `lower` (inclusive) towards `upper` (exclusive) by
/// `stride`. Result is a vector.
///
/// # Panics
/// Panics if `stride` is zero or does not point from `lower` to `upper`.
pub fn arange(lower: f64, upper: f64, stride: f64) -> (Vec<f64>, Shape) {
    assert!(stride != 0.0, "arange stride must be nonzero");
    let steps = (upper - lower) / stride;
    assert!(steps >= 0.0, "arange stride points away from the upper bound");
    let count = steps.ceil() as usize;
    let out: Vec<f64> = (0..count).map(|i| lower + i as f64 * stride).collect();
    (out, Shape::from(vec![count]))
}

/// Reverses the order of sub-tensors along axis 0.
pub fn reverse(input: &[f64], shape: &Shape) -> Vec<f64> {
    if shape.rank() == 0 || input.is_empty() {
        return input.to_vec();
    }
    let rows = shape[0];
    let row_len = shape.count() / rows.max(1);
    let mut out = vec![0.0; input.len()];
    out.par_chunks_mut(row_len).enumerate().for_each(|(r, chunk)| {
        let src = (rows - 1 - r) * row_len;
        chunk.copy_from_slice(&input[src..src + row_len]);
    });
    out
}

/// Extracts the main diagonal of a 2-D matrix.
///
/// # Panics
/// Panics if `shape` is not rank 2.
pub fn diagonal_elements(input: &[f64], shape: &Shape) -> (Vec<f64>, Shape) {
    assert_eq!(shape.rank(), 2, "diagonal extraction requires a matrix, got {shape}");
    let (rows, cols) = (shape[0], shape[1]);
    let d = rows.min(cols);
    let out: Vec<f64> = (0..d).map(|i| input[i * cols + i]).collect();
    (out, Shape::from(vec![d]))
}

/// Builds a square matrix with `diag` on the main diagonal, zero elsewhere.
///
/// # Panics
/// Panics if `shape` is not rank 1.
pub fn diagonal_matrix(diag: &[f64], shape: &Shape) -> (Vec<f64>, Shape) {
    assert_eq!(shape.rank(), 1, "diagonal insertion requires a vector, got {shape}");
    let d = shape[0];
    let mut out = vec![0.0; d * d];
    for (i, &v) in diag.iter().enumerate() {
        out[i * d + i] = v;
    }
    (out, Shape::from(vec![d, d]))
}

/// Extracts the diagonals within a band into a `[below + above + 1, d]`
/// matrix, `d = min(rows, cols)`.
///
/// Row `t` holds the diagonal at offset `t - below`, from the lowest
/// subdiagonal up to the highest superdiagonal; positions where a diagonal
/// leaves the matrix are zero.
///
/// # Panics
/// Panics if `shape` is not rank 2.
pub fn diagonal_band(
    input: &[f64],
    shape: &Shape,
    below: usize,
    above: usize,
) -> (Vec<f64>, Shape) {
    assert_eq!(shape.rank(), 2, "diagonal extraction requires a matrix, got {shape}");
    let (rows, cols) = (shape[0], shape[1]);
    let d = rows.min(cols);
    let bands = below + above + 1;

    let mut out = vec![0.0; bands * d];
    for t in 0..bands {
        let o = t as i64 - below as i64;
        for j in 0..d {
            let r = (j as i64 - o.min(0)) as usize;
            let c = (j as i64 + o.max(0)) as usize;
            if r < rows && c < cols {
                out[t * d + j] = input[r * cols + c];
            }
        }
    }
    (out, Shape::from(vec![bands, d]))
}

/// Scatters a `[below + above + 1, d]` band (as produced by
/// [`diagonal_band`]) back into a `[d, d]` matrix, zero outside the band.
///
/// # Panics
/// Panics if `shape` is not rank 2 or its first dimension is not the band
/// count.
pub fn diagonal_band_matrix(
    input: &[f64],
    shape: &Shape,
    below: usize,
    above: usize,
) -> (Vec<f64>, Shape) {
    assert_eq!(shape.rank(), 2, "diagonal insertion requires banded input, got {shape}");
    let bands = below + above + 1;
    assert_eq!(
        shape[0], bands,
        "banded input {shape} does not match band widths ({below}, {above})"
    );
    let d = shape[1];

    let mut out = vec![0.0; d * d];
    for t in 0..bands {
        let o = t as i64 - below as i64;
        for j in 0..d {
            let r = (j as i64 - o.min(0)) as usize;
            let c = (j as i64 + o.max(0)) as usize;
            if r < d && c < d {
                out[r * d + c] = input[t * d + j];
            }
        }
    }
    (out, Shape::from(vec![d, d]))
}

/// Zeros matrix elements outside a diagonal band.
///
/// `below`/`above` are the band widths kept under and over the main
/// diagonal; a negative width keeps that whole side.
///
/// # Panics
/// Panics if `shape` is not rank 2.
pub fn band_mask(input: &[f64], shape: &Shape, below: i64, above: i64) -> Vec<f64> {
    assert_eq!(shape.rank(), 2, "band mask requires a matrix, got {shape}");
    let cols = shape[1];
    input
        .par_iter()
        .enumerate()
        .map(|(idx, &v)| {
            let (r, c) = ((idx / cols) as i64, (idx % cols) as i64);
            let in_band = (below < 0 || r - c <= below) && (above < 0 || c - r <= above);
            if in_band { v } else { 0.0 }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_suffix_broadcast() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [10.0, 20.0, 30.0];
        let (out, shape) = binary(
            BinaryOp::Add,
            &a,
            &Shape::from(vec![2, 3]),
            &b,
            &Shape::from(vec![3]),
        );
        assert_eq!(shape, Shape::from(vec![2, 3]));
        assert_eq!(out, vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
    }

    #[test]
    fn binary_scalar_broadcast() {
        let a = [1.0, 2.0];
        let (out, shape) = binary(
            BinaryOp::Mul,
            &a,
            &Shape::from(vec![2]),
            &[3.0],
            &Shape::scalar(),
        );
        assert_eq!(shape, Shape::from(vec![2]));
        assert_eq!(out, vec![3.0, 6.0]);
    }

    #[test]
    fn reduce_axis_variants() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let shape = Shape::from(vec![2, 3]);

        let (sum, s) = reduce(ReduceOp::Sum, &data, &shape, 0);
        assert_eq!(s, Shape::from(vec![3]));
        assert_eq!(sum, vec![5.0, 7.0, 9.0]);

        let (mean, _) = reduce(ReduceOp::Mean, &data, &shape, 1);
        assert_eq!(mean, vec![2.0, 5.0]);

        let (var, _) = reduce(ReduceOp::Variance, &data, &shape, 1);
        assert!((var[0] - 2.0 / 3.0).abs() < 1e-12);
        assert!((var[1] - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn matmul_known_values() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        let (out, shape) = matmul(&a, &Shape::from(vec![2, 3]), &b, &Shape::from(vec![3, 2]));
        assert_eq!(shape, Shape::from(vec![2, 2]));
        assert_eq!(out, vec![58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn matmul_batched_broadcast() {
        // lhs has 2 batches, rhs is unbatched and tiles across them.
        let a = [1.0, 0.0, 0.0, 1.0, 2.0, 0.0, 0.0, 2.0];
        let b = [1.0, 2.0, 3.0, 4.0];
        let (out, shape) = matmul(
            &a,
            &Shape::from(vec![2, 2, 2]),
            &b,
            &Shape::from(vec![2, 2]),
        );
        assert_eq!(shape, Shape::from(vec![2, 2, 2]));
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0, 2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn arange_and_reverse() {
        let (ramp, shape) = arange(0.0, 5.0, 2.0);
        assert_eq!(shape, Shape::from(vec![3]));
        assert_eq!(ramp, vec![0.0, 2.0, 4.0]);

        let rev = reverse(&ramp, &shape);
        assert_eq!(rev, vec![4.0, 2.0, 0.0]);
        assert_eq!(reverse(&rev, &shape), ramp);
    }

    #[test]
    fn band_mask_widths() {
        let m = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let shape = Shape::from(vec![3, 3]);
        let kept = band_mask(&m, &shape, 0, 1);
        assert_eq!(kept, vec![1.0, 2.0, 0.0, 0.0, 5.0, 6.0, 0.0, 0.0, 9.0]);

        let all = band_mask(&m, &shape, -1, -1);
        assert_eq!(all.as_slice(), m.as_slice());
    }
}
