use nabla::tensor;
use nabla::tensors::Tensor;

#[test]
fn test_elementwise_arithmetic() {
    let a = tensor!([1.0, 2.0, 3.0]);
    let b = tensor!([4.0, 5.0, 6.0]);
    assert_eq!((&a + &b).data(), &[5.0, 7.0, 9.0]);
    assert_eq!((&a - &b).data(), &[-3.0, -3.0, -3.0]);
    assert_eq!((&a * &b).data(), &[4.0, 10.0, 18.0]);
    assert_eq!((&b / &a).data(), &[4.0, 2.5, 2.0]);
}

#[test]
fn test_suffix_broadcast_add() {
    let m = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    let v = tensor!([10.0, 20.0, 30.0]);
    let out = &m + &v;
    assert_eq!(out.shape().dims(), &[2, 3]);
    assert_eq!(out.data(), &[11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);

    // broadcasting commutes on the data, with the same output shape
    let flipped = &v + &m;
    assert_eq!(flipped.shape().dims(), &[2, 3]);
    assert_eq!(flipped.data(), out.data());
}

#[test]
fn test_scalar_broadcast() {
    let m = tensor!([[1.0, 2.0], [3.0, 4.0]]);
    let s = Tensor::scalar(10.0);
    assert_eq!((&m * &s).data(), &[10.0, 20.0, 30.0, 40.0]);
    assert_eq!(m.scale(10.0).data(), &[10.0, 20.0, 30.0, 40.0]);
    assert_eq!(m.offset(1.0).data(), &[2.0, 3.0, 4.0, 5.0]);
}

#[test]
fn test_incompatible_broadcast_panics() {
    let a = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    let b = tensor!([1.0, 2.0]);
    let result = std::panic::catch_unwind(|| &a + &b);
    assert!(result.is_err());
}

#[test]
fn test_unary_math() {
    let x = tensor!([0.0, 1.0]);
    assert_eq!(x.exp().data(), &[1.0, 1.0f64.exp()]);
    assert_eq!(x.square().data(), &[0.0, 1.0]);
    assert_eq!(x.cos().data()[0], 1.0);
    assert!((x.tanh().data()[1] - 1.0f64.tanh()).abs() < 1e-12);
    assert!((x.sinh().data()[1] - 1.0f64.sinh()).abs() < 1e-12);
    assert!((x.cosh().data()[0] - 1.0).abs() < 1e-12);
}

#[test]
fn test_relu_and_step() {
    let x = tensor!([-2.0, 0.0, 3.0]);
    assert_eq!(x.relu().data(), &[0.0, 0.0, 3.0]);
    assert_eq!(x.step().data(), &[0.0, 0.0, 1.0]);
}

#[test]
fn test_reductions_along_axis() {
    let m = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);

    let rows = m.sum(1);
    assert_eq!(rows.shape().dims(), &[2]);
    assert_eq!(rows.data(), &[6.0, 15.0]);

    let cols = m.sum(0);
    assert_eq!(cols.shape().dims(), &[3]);
    assert_eq!(cols.data(), &[5.0, 7.0, 9.0]);

    assert_eq!(m.mean(1).data(), &[2.0, 5.0]);

    // population variance of [1, 2, 3] is 2/3
    let var = m.variance(1);
    assert!((var.data()[0] - 2.0 / 3.0).abs() < 1e-12);
    assert!((var.data()[1] - 2.0 / 3.0).abs() < 1e-12);
}

#[test]
fn test_reduce_axis_out_of_range_panics() {
    let m = tensor!([[1.0, 2.0], [3.0, 4.0]]);
    let result = std::panic::catch_unwind(|| m.sum(2));
    assert!(result.is_err());
}

#[test]
fn test_sum_all() {
    let m = tensor!([[1.0, 2.0], [3.0, 4.0]]);
    let total = m.sum_all();
    assert_eq!(total.shape().rank(), 0);
    assert_eq!(total.data(), &[10.0]);
}

#[test]
fn test_matmul_known_values() {
    let a = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    let b = tensor!([[7.0, 8.0], [9.0, 10.0], [11.0, 12.0]]);
    let c = a.matmul(&b);
    assert_eq!(c.shape().dims(), &[2, 2]);
    assert_eq!(c.data(), &[58.0, 64.0, 139.0, 154.0]);
}

#[test]
fn test_matmul_inner_mismatch_panics() {
    let a = tensor!([[1.0, 2.0], [3.0, 4.0]]);
    let b = tensor!([[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
    let result = std::panic::catch_unwind(|| a.matmul(&b));
    assert!(result.is_err());
}

#[test]
fn test_batched_matmul_broadcast() {
    // two stacked 2x2 matrices against one shared rhs
    let a = tensor!([
        [[1.0, 0.0], [0.0, 1.0]],
        [[2.0, 0.0], [0.0, 2.0]],
    ]);
    let b = tensor!([[1.0, 2.0], [3.0, 4.0]]);
    let c = a.matmul(&b);
    assert_eq!(c.shape().dims(), &[2, 2, 2]);
    assert_eq!(c.data(), &[1.0, 2.0, 3.0, 4.0, 2.0, 4.0, 6.0, 8.0]);
}

#[test]
fn test_transpose() {
    let m = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    let t = m.transposed();
    assert_eq!(t.shape().dims(), &[3, 2]);
    assert_eq!(t.data(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
}

#[test]
fn test_reverse_is_involution() {
    let m = tensor!([[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
    let r = m.reversed();
    assert_eq!(r.data(), &[5.0, 6.0, 3.0, 4.0, 1.0, 2.0]);
    assert_eq!(r.reversed().data(), m.data());
}

#[test]
fn test_diagonal_round_trip() {
    let v = tensor!([1.0, 2.0, 3.0]);
    let m = v.diagonal_matrix();
    assert_eq!(m.shape().dims(), &[3, 3]);
    assert_eq!(m.data(), &[1.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 3.0]);
    assert_eq!(m.diagonal_elements().data(), v.data());
}

#[test]
fn test_diagonal_of_rectangular_matrix() {
    let m = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    let d = m.diagonal_elements();
    assert_eq!(d.shape().dims(), &[2]);
    assert_eq!(d.data(), &[1.0, 5.0]);
}

#[test]
fn test_reverse_of_zero_sized_tensor() {
    let empty = Tensor::arange(0.0, 0.0, 1.0);
    assert_eq!(empty.shape().dims(), &[0]);
    let r = empty.reversed();
    assert_eq!(r.shape().dims(), &[0]);
    assert!(r.data().is_empty());
}

#[test]
fn test_transpose_of_zero_sized_axis() {
    let m = Tensor::zeros([2, 0]);
    let t = m.transposed();
    assert_eq!(t.shape().dims(), &[0, 2]);
    assert!(t.data().is_empty());
}

#[test]
fn test_matmul_with_zero_columns() {
    let a = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    let b = Tensor::zeros([3, 0]);
    let c = a.matmul(&b);
    assert_eq!(c.shape().dims(), &[2, 0]);
    assert!(c.data().is_empty());
}

#[test]
fn test_diagonal_band_of_square_matrix() {
    let m = tensor!([
        [1.0, 2.0, 3.0],
        [4.0, 5.0, 6.0],
        [7.0, 8.0, 9.0],
    ]);

    // rows are the diagonals at offsets -1, 0, +1, zero-padded at the end
    let band = m.diagonal_band(1, 1);
    assert_eq!(band.shape().dims(), &[3, 3]);
    assert_eq!(band.data(), &[4.0, 8.0, 0.0, 1.0, 5.0, 9.0, 2.0, 6.0, 0.0]);

    // width (0, 0) degenerates to the main diagonal
    let main = m.diagonal_band(0, 0);
    assert_eq!(main.shape().dims(), &[1, 3]);
    assert_eq!(main.data(), m.diagonal_elements().data());
}

#[test]
fn test_diagonal_band_of_rectangular_matrix() {
    let m = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    let band = m.diagonal_band(0, 1);
    assert_eq!(band.shape().dims(), &[2, 2]);
    assert_eq!(band.data(), &[1.0, 5.0, 2.0, 6.0]);
}

#[test]
fn test_diagonal_band_round_trip_equals_band_mask() {
    let m = tensor!([
        [1.0, 2.0, 3.0],
        [4.0, 5.0, 6.0],
        [7.0, 8.0, 9.0],
    ]);
    let rebuilt = m.diagonal_band(1, 1).diagonal_band_matrix(1, 1);
    assert_eq!(rebuilt.shape().dims(), &[3, 3]);
    assert_eq!(rebuilt.data(), m.band_mask(1, 1).data());
}

#[test]
fn test_diagonal_band_matrix_scatter() {
    // offsets -1 and 0 of a 3x3 matrix
    let band = tensor!([[4.0, 8.0, 0.0], [1.0, 5.0, 9.0]]);
    let m = band.diagonal_band_matrix(1, 0);
    assert_eq!(m.shape().dims(), &[3, 3]);
    assert_eq!(m.data(), &[1.0, 0.0, 0.0, 4.0, 5.0, 0.0, 0.0, 8.0, 9.0]);
}

#[test]
fn test_band_mask_widths() {
    let m = tensor!([
        [1.0, 2.0, 3.0],
        [4.0, 5.0, 6.0],
        [7.0, 8.0, 9.0],
    ]);

    let diag_only = m.band_mask(0, 0);
    assert_eq!(diag_only.data(), &[1.0, 0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 9.0]);

    let lower = m.band_mask(-1, 0);
    assert_eq!(lower.data(), &[1.0, 0.0, 0.0, 4.0, 5.0, 0.0, 7.0, 8.0, 9.0]);

    let tri = m.band_mask(1, 1);
    assert_eq!(tri.data(), &[1.0, 2.0, 0.0, 4.0, 5.0, 6.0, 0.0, 8.0, 9.0]);

    let all = m.band_mask(-1, -1);
    assert_eq!(all.data(), m.data());
}

#[test]
fn test_untracked_ops_record_nothing() {
    let a = tensor!([1.0, 2.0]);
    let b = tensor!([3.0, 4.0]);
    let c = &a * &b;
    assert!(!c.requires_grad());
    assert_eq!(c.op_tag(), None);
}

#[test]
fn test_tracked_ops_record_their_tag() {
    let a = tensor!([1.0, 2.0]).with_grad();
    let b = tensor!([3.0, 4.0]);
    let c = &a * &b;
    assert!(c.requires_grad());
    assert_eq!(c.op_tag(), Some("mul"));
    assert_eq!(c.exp().op_tag(), Some("exp"));
}
