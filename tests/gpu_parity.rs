//! CPU/GPU engine parity. Every check is skipped when no adapter is
//! available, since the GPU entry points then return `None`.
#![cfg(feature = "wgpu")]

use nabla::ops::wgpu::{
    gpu_arange, gpu_band_mask, gpu_binary, gpu_diagonal_band, gpu_diagonal_band_matrix,
    gpu_diagonal_elements, gpu_diagonal_matrix, gpu_fill, gpu_matmul, gpu_reduce, gpu_reverse,
    gpu_unary, gpu_unary_derivative,
};
use nabla::ops::{BinaryOp, ReduceOp, UnaryOp};
use nabla::shape::Shape;
use nabla::tensors::Buffer;

// f32 staging on the GPU side costs precision against the f64 CPU kernels.
const TOL: f64 = 1e-4;

fn assert_close(actual: &Buffer, expected: &[f64]) {
    assert_eq!(actual.count(), expected.len());
    for (a, e) in actual.as_slice().iter().zip(expected) {
        assert!((a - e).abs() < TOL, "{a} != {e}");
    }
}

#[test]
fn test_gpu_binary_matches_cpu() {
    let lhs = Buffer::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let rhs = Buffer::new(vec![3], vec![10.0, 20.0, 30.0]);
    let Some(out) = gpu_binary(BinaryOp::Add, &lhs, &rhs) else {
        return;
    };
    assert_eq!(out.shape().dims(), &[2, 3]);
    assert_close(&out, &[11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
}

#[test]
fn test_gpu_unary_matches_cpu() {
    let input = Buffer::new(vec![4], vec![-1.0, 0.0, 0.5, 2.0]);
    let Some(out) = gpu_unary(UnaryOp::Relu, &input) else {
        return;
    };
    assert_close(&out, &[0.0, 0.0, 0.5, 2.0]);

    let Some(out) = gpu_unary(UnaryOp::Tanh, &input) else {
        return;
    };
    let expected: Vec<f64> = input.as_slice().iter().map(|v| v.tanh()).collect();
    assert_close(&out, &expected);
}

#[test]
fn test_gpu_unary_derivative_matches_cpu() {
    let input = Buffer::new(vec![4], vec![-1.0, 0.0, 0.5, 2.0]);
    let Some(out) = gpu_unary_derivative(UnaryOp::Square, &input) else {
        return;
    };
    assert_close(&out, &[-2.0, 0.0, 1.0, 4.0]);

    let Some(out) = gpu_unary_derivative(UnaryOp::Tanh, &input) else {
        return;
    };
    let expected: Vec<f64> = input
        .as_slice()
        .iter()
        .map(|v| 1.0 - v.tanh() * v.tanh())
        .collect();
    assert_close(&out, &expected);
}

#[test]
fn test_gpu_reduce_matches_cpu() {
    let input = Buffer::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let Some(out) = gpu_reduce(ReduceOp::Sum, &input, 1) else {
        return;
    };
    assert_eq!(out.shape().dims(), &[2]);
    assert_close(&out, &[6.0, 15.0]);

    let Some(out) = gpu_reduce(ReduceOp::Variance, &input, 1) else {
        return;
    };
    assert_close(&out, &[2.0 / 3.0, 2.0 / 3.0]);
}

#[test]
fn test_gpu_matmul_matches_cpu() {
    let a = Buffer::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let b = Buffer::new(vec![3, 2], vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
    let Some(out) = gpu_matmul(&a, &b) else {
        return;
    };
    assert_eq!(out.shape().dims(), &[2, 2]);
    assert_close(&out, &[58.0, 64.0, 139.0, 154.0]);
}

#[test]
fn test_gpu_generators() {
    let Some(out) = gpu_fill(&Shape::from(vec![2, 2]), 3.5) else {
        return;
    };
    assert_close(&out, &[3.5; 4]);

    let Some(out) = gpu_arange(0.0, 1.0, 0.25) else {
        return;
    };
    assert_eq!(out.shape().dims(), &[4]);
    assert_close(&out, &[0.0, 0.25, 0.5, 0.75]);
}

#[test]
fn test_gpu_structural_kernels() {
    let m = Buffer::new(vec![3, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let Some(out) = gpu_reverse(&m) else {
        return;
    };
    assert_close(&out, &[5.0, 6.0, 3.0, 4.0, 1.0, 2.0]);

    let sq = Buffer::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]);
    let Some(out) = gpu_diagonal_elements(&sq) else {
        return;
    };
    assert_close(&out, &[1.0, 4.0]);

    let v = Buffer::new(vec![2], vec![7.0, 8.0]);
    let Some(out) = gpu_diagonal_matrix(&v) else {
        return;
    };
    assert_close(&out, &[7.0, 0.0, 0.0, 8.0]);

    let Some(out) = gpu_band_mask(&sq, 0, 0) else {
        return;
    };
    assert_close(&out, &[1.0, 0.0, 0.0, 4.0]);
}

#[test]
fn test_gpu_band_kernels() {
    let m = Buffer::new(
        vec![3, 3],
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
    );
    let Some(band) = gpu_diagonal_band(&m, 1, 1) else {
        return;
    };
    assert_eq!(band.shape().dims(), &[3, 3]);
    assert_close(&band, &[4.0, 8.0, 0.0, 1.0, 5.0, 9.0, 2.0, 6.0, 0.0]);

    let Some(rebuilt) = gpu_diagonal_band_matrix(&band, 1, 1) else {
        return;
    };
    assert_eq!(rebuilt.shape().dims(), &[3, 3]);
    assert_close(&rebuilt, &[1.0, 2.0, 0.0, 4.0, 5.0, 6.0, 0.0, 8.0, 9.0]);
}
