//! Core tensor data structures.
//!
//! A [`Buffer`] is a device-resident, reference-counted block of `f64`
//! elements plus the [`Shape`] describing how the flat storage is indexed.
//! Buffers are shared by every tensor that reads them and are only written
//! in place through [`Buffer::write_range`], which performs copy-on-write
//! when the storage is shared.
//!
//! A [`Tensor`] is a buffer reference plus a `requires_grad` flag, an
//! optional [`GraphContext`] recording the operation that produced it, and
//! the [`Device`] it lives on. Tensors behave like values to callers while
//! sharing storage underneath.
//!
//! Arithmetic on tensors resolves broadcasting, dispatches to the device
//! engine, and — only when some source is tracked — attaches a graph context
//! so [`crate::graph::gradients`] can walk the recording backwards. Untracked
//! expressions carry zero bookkeeping.

use std::sync::Arc;

use crate::backend::{Device, default_device};
use crate::graph::{BackwardRule, GraphContext};
use crate::ops::{BinaryOp, ReduceOp, UnaryOp, dispatch};
use crate::shape::Shape;

/// Shared, device-resident flat storage with its logical shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    data: Arc<Vec<f64>>,
    shape: Shape,
}

impl Buffer {
    /// Creates a buffer from flat row-major data.
    ///
    /// # Panics
    /// Panics if the element count does not match the shape product.
    pub fn new(shape: impl Into<Shape>, data: Vec<f64>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.count(),
            data.len(),
            "shape {} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self { data: Arc::new(data), shape }
    }

    pub fn filled(shape: impl Into<Shape>, value: f64) -> Self {
        let shape = shape.into();
        let data = vec![value; shape.count()];
        Self { data: Arc::new(data), shape }
    }

    pub fn zeros(shape: impl Into<Shape>) -> Self {
        Self::filled(shape, 0.0)
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn count(&self) -> usize {
        self.shape.count()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Stable identity of the underlying storage, used to key graph
    /// traversal state.
    pub fn ptr_id(&self) -> usize {
        Arc::as_ptr(&self.data) as *const f64 as usize
    }

    /// True if more than one tensor currently references this storage.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.data) > 1
    }

    /// Writes `values` into the flat range starting at `offset`.
    ///
    /// The sole in-place mutation path: if the storage is shared, it is
    /// copied first so published tensors never observe the write.
    ///
    /// # Panics
    /// Panics if the range extends past the end of the buffer.
    pub fn write_range(&mut self, offset: usize, values: &[f64]) {
        assert!(
            offset + values.len() <= self.count(),
            "write of {} elements at offset {offset} overruns buffer of {}",
            values.len(),
            self.count()
        );
        let data = Arc::make_mut(&mut self.data);
        data[offset..offset + values.len()].copy_from_slice(values);
    }
}

/// An N-dimensional value on a device, optionally recorded for
/// differentiation.
#[derive(Debug, Clone)]
pub struct Tensor {
    buffer: Buffer,
    requires_grad: bool,
    context: Option<Arc<GraphContext>>,
    device: Device,
}

impl Tensor {
    /// Creates a tensor on the default device.
    ///
    /// # Panics
    /// Panics if the element count does not match the shape product.
    pub fn new(shape: impl Into<Shape>, data: Vec<f64>) -> Self {
        Self::from_buffer(Buffer::new(shape, data), default_device())
    }

    /// Creates a tensor on an explicit device.
    pub fn new_on(device: Device, shape: impl Into<Shape>, data: Vec<f64>) -> Self {
        Self::from_buffer(Buffer::new(shape, data), device)
    }

    pub(crate) fn from_buffer(buffer: Buffer, device: Device) -> Self {
        Self { buffer, requires_grad: false, context: None, device }
    }

    pub(crate) fn from_op(
        buffer: Buffer,
        device: Device,
        context: Option<Arc<GraphContext>>,
    ) -> Self {
        let requires_grad = context.is_some();
        Self { buffer, requires_grad, context, device }
    }

    /// A rank-0 tensor holding a single value.
    pub fn scalar(value: f64) -> Self {
        Self::new(Shape::scalar(), vec![value])
    }

    pub fn filled(shape: impl Into<Shape>, value: f64) -> Self {
        let device = default_device();
        let shape = shape.into();
        Self::from_buffer(dispatch::fill(device, &shape, value), device)
    }

    pub fn zeros(shape: impl Into<Shape>) -> Self {
        Self::filled(shape, 0.0)
    }

    pub fn ones(shape: impl Into<Shape>) -> Self {
        Self::filled(shape, 1.0)
    }

    pub fn zeros_like(other: &Tensor) -> Self {
        Self::from_buffer(
            dispatch::fill(other.device, other.shape(), 0.0),
            other.device,
        )
    }

    pub fn ones_like(other: &Tensor) -> Self {
        Self::from_buffer(
            dispatch::fill(other.device, other.shape(), 1.0),
            other.device,
        )
    }

    /// Linear ramp from `lower` (inclusive) towards `upper` (exclusive) by
    /// `stride`.
    ///
    /// # Panics
    /// Panics if `stride` is zero or points away from `upper`.
    pub fn arange(lower: f64, upper: f64, stride: f64) -> Self {
        let device = default_device();
        Self::from_buffer(dispatch::arange(device, lower, upper, stride), device)
    }

    /// Marks this tensor as a differentiation leaf.
    pub fn with_grad(mut self) -> Self {
        self.requires_grad = true;
        self
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    pub fn shape(&self) -> &Shape {
        self.buffer.shape()
    }

    pub fn data(&self) -> &[f64] {
        self.buffer.as_slice()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut Buffer {
        &mut self.buffer
    }

    pub(crate) fn context(&self) -> Option<&Arc<GraphContext>> {
        self.context.as_ref()
    }

    /// Tag of the operation that produced this tensor, if it was recorded.
    pub fn op_tag(&self) -> Option<&'static str> {
        self.context.as_ref().map(|c| c.tag())
    }

    /// Writes `values` into the flat range starting at `offset`, copying the
    /// storage first if it is shared.
    pub fn write_range(&mut self, offset: usize, values: &[f64]) {
        self.buffer.write_range(offset, values);
    }

    fn assert_same_device(&self, other: &Tensor) {
        assert_eq!(
            self.device, other.device,
            "tensors from different devices cannot be mixed in one operation"
        );
    }

    // ── Broadcasting binary ops ─────────────────────────────────────────

    fn binary_op(&self, rhs: &Tensor, op: BinaryOp) -> Tensor {
        self.assert_same_device(rhs);
        let out = dispatch::binary(self.device, op, &self.buffer, &rhs.buffer);

        let tracked = self.requires_grad || rhs.requires_grad;
        let context = tracked.then(|| {
            let (lhs_rule, rhs_rule) = match op {
                BinaryOp::Add => (
                    BackwardRule::Spread { shape: self.shape().clone() },
                    BackwardRule::Spread { shape: rhs.shape().clone() },
                ),
                BinaryOp::Sub => (
                    BackwardRule::Spread { shape: self.shape().clone() },
                    BackwardRule::NegSpread { shape: rhs.shape().clone() },
                ),
                BinaryOp::Mul => (
                    BackwardRule::MulBy {
                        operand: rhs.buffer.clone(),
                        shape: self.shape().clone(),
                    },
                    BackwardRule::MulBy {
                        operand: self.buffer.clone(),
                        shape: rhs.shape().clone(),
                    },
                ),
                BinaryOp::Div => (
                    BackwardRule::DivBy {
                        rhs: rhs.buffer.clone(),
                        shape: self.shape().clone(),
                    },
                    BackwardRule::DivRhs {
                        lhs: self.buffer.clone(),
                        rhs: rhs.buffer.clone(),
                        shape: rhs.shape().clone(),
                    },
                ),
            };
            Arc::new(GraphContext::new(
                op.tag(),
                vec![self.clone(), rhs.clone()],
                vec![lhs_rule, rhs_rule],
            ))
        });

        Tensor::from_op(out, self.device, context)
    }

    pub fn add(&self, rhs: &Tensor) -> Tensor {
        self.binary_op(rhs, BinaryOp::Add)
    }

    pub fn sub(&self, rhs: &Tensor) -> Tensor {
        self.binary_op(rhs, BinaryOp::Sub)
    }

    pub fn mul(&self, rhs: &Tensor) -> Tensor {
        self.binary_op(rhs, BinaryOp::Mul)
    }

    pub fn div(&self, rhs: &Tensor) -> Tensor {
        self.binary_op(rhs, BinaryOp::Div)
    }

    /// Multiplies every element by a constant.
    pub fn scale(&self, factor: f64) -> Tensor {
        let factor = Tensor::new_on(self.device, Shape::scalar(), vec![factor]);
        self.mul(&factor)
    }

    /// Adds a constant to every element.
    pub fn offset(&self, amount: f64) -> Tensor {
        let amount = Tensor::new_on(self.device, Shape::scalar(), vec![amount]);
        self.add(&amount)
    }

    // ── Unary ops ───────────────────────────────────────────────────────

    fn unary_op(&self, op: UnaryOp) -> Tensor {
        let out = dispatch::unary(self.device, op, &self.buffer);
        let context = self.requires_grad.then(|| {
            Arc::new(GraphContext::new(
                op.tag(),
                vec![self.clone()],
                vec![BackwardRule::UnaryChain { op, input: self.buffer.clone() }],
            ))
        });
        Tensor::from_op(out, self.device, context)
    }

    pub fn exp(&self) -> Tensor {
        self.unary_op(UnaryOp::Exp)
    }

    pub fn log(&self) -> Tensor {
        self.unary_op(UnaryOp::Log)
    }

    pub fn sqrt(&self) -> Tensor {
        self.unary_op(UnaryOp::Sqrt)
    }

    pub fn sin(&self) -> Tensor {
        self.unary_op(UnaryOp::Sin)
    }

    pub fn cos(&self) -> Tensor {
        self.unary_op(UnaryOp::Cos)
    }

    pub fn tan(&self) -> Tensor {
        self.unary_op(UnaryOp::Tan)
    }

    pub fn sinh(&self) -> Tensor {
        self.unary_op(UnaryOp::Sinh)
    }

    pub fn cosh(&self) -> Tensor {
        self.unary_op(UnaryOp::Cosh)
    }

    pub fn tanh(&self) -> Tensor {
        self.unary_op(UnaryOp::Tanh)
    }

    pub fn square(&self) -> Tensor {
        self.unary_op(UnaryOp::Square)
    }

    pub fn relu(&self) -> Tensor {
        self.unary_op(UnaryOp::Relu)
    }

    /// Positive indicator: `x > 0 ? 1 : 0`.
    pub fn step(&self) -> Tensor {
        self.unary_op(UnaryOp::Step)
    }

    // ── Reductions ──────────────────────────────────────────────────────

    fn reduce_op(&self, op: ReduceOp, axis: usize) -> Tensor {
        let out = dispatch::reduce(self.device, op, &self.buffer, axis);
        let context = self.requires_grad.then(|| {
            let rule = match op {
                ReduceOp::Sum => {
                    BackwardRule::SumSpread { input_shape: self.shape().clone(), axis }
                }
                ReduceOp::Mean => {
                    BackwardRule::MeanSpread { input_shape: self.shape().clone(), axis }
                }
                ReduceOp::Variance => {
                    BackwardRule::VarianceChain { input: self.buffer.clone(), axis }
                }
            };
            Arc::new(GraphContext::new(op.tag(), vec![self.clone()], vec![rule]))
        });
        Tensor::from_op(out, self.device, context)
    }

    /// Sums along `axis`; the axis is removed from the result shape.
    pub fn sum(&self, axis: usize) -> Tensor {
        self.reduce_op(ReduceOp::Sum, axis)
    }

    pub fn mean(&self, axis: usize) -> Tensor {
        self.reduce_op(ReduceOp::Mean, axis)
    }

    /// Population variance along `axis`.
    pub fn variance(&self, axis: usize) -> Tensor {
        self.reduce_op(ReduceOp::Variance, axis)
    }

    /// Reduces every axis, yielding a scalar.
    pub fn sum_all(&self) -> Tensor {
        let mut t = self.clone();
        while t.shape().rank() > 0 {
            t = t.sum(0);
        }
        t
    }

    // ── Matrix multiply ─────────────────────────────────────────────────

    /// Matrix product; leading batch axes broadcast with the restricted
    /// suffix/scalar rule.
    ///
    /// # Panics
    /// Panics on rank < 2 operands, mismatched inner dimensions, or
    /// broadcast-incompatible batch axes.
    pub fn matmul(&self, rhs: &Tensor) -> Tensor {
        self.assert_same_device(rhs);
        let out = dispatch::matmul(self.device, &self.buffer, &rhs.buffer);

        let tracked = self.requires_grad || rhs.requires_grad;
        let context = tracked.then(|| {
            Arc::new(GraphContext::new(
                "matmul",
                vec![self.clone(), rhs.clone()],
                vec![
                    BackwardRule::MatmulLhs {
                        rhs: rhs.buffer.clone(),
                        shape: self.shape().clone(),
                    },
                    BackwardRule::MatmulRhs {
                        lhs: self.buffer.clone(),
                        shape: rhs.shape().clone(),
                    },
                ],
            ))
        });
        Tensor::from_op(out, self.device, context)
    }

    /// Swaps the last two axes.
    ///
    /// # Panics
    /// Panics on rank < 2.
    pub fn transposed(&self) -> Tensor {
        let out = dispatch::transpose(self.device, &self.buffer);
        let context = self.requires_grad.then(|| {
            Arc::new(GraphContext::new(
                "transpose",
                vec![self.clone()],
                vec![BackwardRule::Transpose],
            ))
        });
        Tensor::from_op(out, self.device, context)
    }

    // ── Utility ops ─────────────────────────────────────────────────────

    /// Reverses the order of sub-tensors along axis 0.
    pub fn reversed(&self) -> Tensor {
        let out = dispatch::reverse(self.device, &self.buffer);
        let context = self.requires_grad.then(|| {
            Arc::new(GraphContext::new(
                "reverse",
                vec![self.clone()],
                vec![BackwardRule::Reverse],
            ))
        });
        Tensor::from_op(out, self.device, context)
    }

    /// Extracts the main diagonal of a matrix into a vector.
    pub fn diagonal_elements(&self) -> Tensor {
        let out = dispatch::diagonal_elements(self.device, &self.buffer);
        let context = self.requires_grad.then(|| {
            Arc::new(GraphContext::new(
                "diagonal",
                vec![self.clone()],
                vec![BackwardRule::DiagonalScatter { input_shape: self.shape().clone() }],
            ))
        });
        Tensor::from_op(out, self.device, context)
    }

    /// Extracts the diagonals within a band into a
    /// `[below + above + 1, min(rows, cols)]` matrix, ordered from the
    /// lowest subdiagonal up; positions where a diagonal leaves the matrix
    /// are zero.
    pub fn diagonal_band(&self, below: usize, above: usize) -> Tensor {
        let out = dispatch::diagonal_band(self.device, &self.buffer, below, above);
        let context = self.requires_grad.then(|| {
            Arc::new(GraphContext::new(
                "diagonal_band",
                vec![self.clone()],
                vec![BackwardRule::DiagonalBandScatter {
                    input_shape: self.shape().clone(),
                    below,
                    above,
                }],
            ))
        });
        Tensor::from_op(out, self.device, context)
    }

    /// Builds a square matrix from a banded extraction (the inverse of
    /// [`Tensor::diagonal_band`] for square sources), zero outside the band.
    pub fn diagonal_band_matrix(&self, below: usize, above: usize) -> Tensor {
        let out = dispatch::diagonal_band_matrix(self.device, &self.buffer, below, above);
        let context = self.requires_grad.then(|| {
            Arc::new(GraphContext::new(
                "diagonal_band_matrix",
                vec![self.clone()],
                vec![BackwardRule::DiagonalBandGather { below, above }],
            ))
        });
        Tensor::from_op(out, self.device, context)
    }

    /// Builds a square matrix with this vector on the main diagonal.
    pub fn diagonal_matrix(&self) -> Tensor {
        let out = dispatch::diagonal_matrix(self.device, &self.buffer);
        let context = self.requires_grad.then(|| {
            Arc::new(GraphContext::new(
                "diagonal_matrix",
                vec![self.clone()],
                vec![BackwardRule::DiagonalGather],
            ))
        });
        Tensor::from_op(out, self.device, context)
    }

    /// Zeros elements outside a diagonal band. `below`/`above` are band
    /// widths; a negative width keeps that whole side.
    pub fn band_mask(&self, below: i64, above: i64) -> Tensor {
        let out = dispatch::band_mask(self.device, &self.buffer, below, above);
        let context = self.requires_grad.then(|| {
            Arc::new(GraphContext::new(
                "band_mask",
                vec![self.clone()],
                vec![BackwardRule::BandMask { below, above }],
            ))
        });
        Tensor::from_op(out, self.device, context)
    }
}

macro_rules! tensor_binop {
    ($trait:ident, $method:ident) => {
        impl std::ops::$trait for &Tensor {
            type Output = Tensor;
            fn $method(self, rhs: &Tensor) -> Tensor {
                Tensor::$method(self, rhs)
            }
        }

        impl std::ops::$trait for Tensor {
            type Output = Tensor;
            fn $method(self, rhs: Tensor) -> Tensor {
                Tensor::$method(&self, &rhs)
            }
        }
    };
}

tensor_binop!(Add, add);
tensor_binop!(Sub, sub);
tensor_binop!(Mul, mul);
tensor_binop!(Div, div);

/// Defines a tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in
/// shape.
///
/// # Example
/// ```
/// use nabla::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape().dims(), &[2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($lit:literal) => {
        $crate::tensors::Tensor::new(Vec::<usize>::new(), vec![$lit])
    };

    ([ $( [ $($inner:tt)* ] ),+ $(,)? ]) => {{
        let children = vec![ $( tensor!([ $($inner)* ]) ),+ ];
        let first_shape = children[0].shape().clone();
        assert!(children.iter().all(|c| *c.shape() == first_shape),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(first_shape.dims());
        let mut data = Vec::with_capacity(children.len() * children[0].data().len());
        for c in children { data.extend_from_slice(c.data()); }
        $crate::tensors::Tensor::new(shape, data)
    }};

    ([ $( $elem:expr ),+ $(,)? ]) => {{
        let data = vec![ $( $elem ),+ ];
        let shape = vec![data.len()];
        $crate::tensors::Tensor::new(shape, data)
    }};
}
