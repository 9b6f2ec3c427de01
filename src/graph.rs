//! Graph contexts and the reverse-mode autodiff executor.
//!
//! Every tracked operation attaches a [`GraphContext`] to its result: an
//! operation tag, the ordered source tensors, and one [`BackwardRule`] per
//! source. Rules are plain data rather than capturing closures — each variant
//! stores the operand buffers and axis it needs plus a dispatch tag, so the
//! recorded graph can be inspected and carries no borrowed state.
//!
//! [`gradients`] walks the recording from a root tensor in strict
//! reverse-topological order (each node before any of its sources),
//! accumulating partial gradients additively. The walk is single-threaded;
//! only the engine kernels invoked by the rules run in parallel, which keeps
//! the floating-point summation order reproducible.
//!
//! Contexts are `Arc`-owned by the tensors they describe, so the backward
//! graph lives exactly as long as some live tensor can reach it and a second
//! `gradients` call over the same forward pass needs no retain flag.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::backend::Device;
use crate::ops::{BinaryOp, UnaryOp, dispatch};
use crate::shape::Shape;
use crate::tensors::{Buffer, Tensor};

/// Per-tensor record of the operation that produced it.
#[derive(Debug)]
pub struct GraphContext {
    tag: &'static str,
    sources: Vec<Tensor>,
    rules: Vec<BackwardRule>,
}

impl GraphContext {
    /// # Panics
    /// Panics unless `sources` and `rules` have equal length.
    pub fn new(tag: &'static str, sources: Vec<Tensor>, rules: Vec<BackwardRule>) -> Self {
        assert_eq!(
            sources.len(),
            rules.len(),
            "graph context '{tag}' needs one backward rule per source"
        );
        Self { tag, sources, rules }
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }

    pub fn sources(&self) -> &[Tensor] {
        &self.sources
    }

    pub fn rules(&self) -> &[BackwardRule] {
        &self.rules
    }
}

/// Local partial-derivative rule for one source of an operation.
///
/// `apply` maps the gradient of the operation's result to the partial
/// gradient of that source, including the reduction of broadcast axes back
/// down to the source shape.
#[derive(Debug, Clone)]
pub enum BackwardRule {
    /// `d(a ± b)/da`: pass the gradient through, folded to the source shape.
    Spread { shape: Shape },
    /// `d(a - b)/db`: negated pass-through.
    NegSpread { shape: Shape },
    /// `d(a * b)` w.r.t. either factor: multiply by the other operand.
    MulBy { operand: Buffer, shape: Shape },
    /// `d(a / b)/da = 1/b`.
    DivBy { rhs: Buffer, shape: Shape },
    /// `d(a / b)/db = -a / b²`.
    DivRhs { lhs: Buffer, rhs: Buffer, shape: Shape },
    /// Chain rule for a unary op: `grad * f'(input)`.
    UnaryChain { op: UnaryOp, input: Buffer },
    /// `d(a @ b)/da = grad @ bᵀ`.
    MatmulLhs { rhs: Buffer, shape: Shape },
    /// `d(a @ b)/db = aᵀ @ grad`.
    MatmulRhs { lhs: Buffer, shape: Shape },
    /// Sum reduction: the gradient repeats along the removed axis.
    SumSpread { input_shape: Shape, axis: usize },
    /// Mean reduction: repeated gradient divided by the axis length.
    MeanSpread { input_shape: Shape, axis: usize },
    /// Variance reduction: `2 (x - mean) / n` times the spread gradient.
    VarianceChain { input: Buffer, axis: usize },
    /// Transpose is its own adjoint.
    Transpose,
    /// Reversal is its own adjoint.
    Reverse,
    /// Diagonal extraction: scatter the gradient vector back onto the
    /// matrix diagonal.
    DiagonalScatter { input_shape: Shape },
    /// Diagonal insertion: gather the gradient matrix's diagonal.
    DiagonalGather,
    /// Banded extraction: scatter the gradient band back onto the source
    /// matrix's diagonals.
    DiagonalBandScatter { input_shape: Shape, below: usize, above: usize },
    /// Banded insertion: gather the gradient matrix's band.
    DiagonalBandGather { below: usize, above: usize },
    /// Band mask is a fixed linear mask, so it masks the gradient too.
    BandMask { below: i64, above: i64 },
}

impl BackwardRule {
    /// Computes the partial gradient for the rule's source.
    pub fn apply(&self, grad: &Buffer, device: Device) -> Buffer {
        match self {
            Self::Spread { shape } => fold_to_shape(grad, shape),
            Self::NegSpread { shape } => {
                let negated = negate(grad);
                fold_to_shape(&negated, shape)
            }
            Self::MulBy { operand, shape } => {
                let product = dispatch::binary(device, BinaryOp::Mul, grad, operand);
                fold_to_shape(&product, shape)
            }
            Self::DivBy { rhs, shape } => {
                let quotient = dispatch::binary(device, BinaryOp::Div, grad, rhs);
                fold_to_shape(&quotient, shape)
            }
            Self::DivRhs { lhs, rhs, shape } => {
                let scaled = dispatch::binary(device, BinaryOp::Mul, grad, lhs);
                let denom = dispatch::binary(device, BinaryOp::Mul, rhs, rhs);
                let quotient = dispatch::binary(device, BinaryOp::Div, &scaled, &denom);
                let negated = negate(&quotient);
                fold_to_shape(&negated, shape)
            }
            Self::UnaryChain { op, input } => {
                let deriv = dispatch::unary_derivative(device, *op, input);
                dispatch::binary(device, BinaryOp::Mul, grad, &deriv)
            }
            Self::MatmulLhs { rhs, shape } => {
                let rhs_t = dispatch::transpose(device, rhs);
                let partial = dispatch::matmul(device, grad, &rhs_t);
                fold_to_shape(&partial, shape)
            }
            Self::MatmulRhs { lhs, shape } => {
                let lhs_t = dispatch::transpose(device, lhs);
                let partial = dispatch::matmul(device, &lhs_t, grad);
                fold_to_shape(&partial, shape)
            }
            Self::SumSpread { input_shape, axis } => spread_axis(grad, input_shape, *axis, 1.0),
            Self::MeanSpread { input_shape, axis } => {
                let len = input_shape[*axis] as f64;
                spread_axis(grad, input_shape, *axis, 1.0 / len)
            }
            Self::VarianceChain { input, axis } => variance_backward(grad, input, *axis),
            Self::Transpose => dispatch::transpose(device, grad),
            Self::Reverse => dispatch::reverse(device, grad),
            Self::DiagonalScatter { input_shape } => {
                let (rows, cols) = (input_shape[0], input_shape[1]);
                let mut out = vec![0.0; rows * cols];
                for (i, &g) in grad.as_slice().iter().enumerate() {
                    out[i * cols + i] = g;
                }
                Buffer::new(input_shape.clone(), out)
            }
            Self::DiagonalGather => dispatch::diagonal_elements(device, grad),
            Self::DiagonalBandScatter { input_shape, below, above } => {
                let (rows, cols) = (input_shape[0], input_shape[1]);
                let d = rows.min(cols);
                let g = grad.as_slice();
                let mut out = vec![0.0; rows * cols];
                for t in 0..(below + above + 1) {
                    let o = t as i64 - *below as i64;
                    for j in 0..d {
                        let r = (j as i64 - o.min(0)) as usize;
                        let c = (j as i64 + o.max(0)) as usize;
                        if r < rows && c < cols {
                            out[r * cols + c] = g[t * d + j];
                        }
                    }
                }
                Buffer::new(input_shape.clone(), out)
            }
            Self::DiagonalBandGather { below, above } => {
                dispatch::diagonal_band(device, grad, *below, *above)
            }
            Self::BandMask { below, above } => dispatch::band_mask(device, grad, *below, *above),
        }
    }
}

fn negate(buffer: &Buffer) -> Buffer {
    let data = buffer.as_slice().iter().map(|&v| -v).collect();
    Buffer::new(buffer.shape().clone(), data)
}

/// Reduces a gradient over broadcast axes by periodic folding: positions map
/// onto the source via `index % count(source)`, so the adjoint of the tiling
/// is summation with that period.
fn fold_to_shape(grad: &Buffer, target: &Shape) -> Buffer {
    if grad.shape() == target {
        return grad.clone();
    }
    let tc = target.count();
    let mut acc = vec![0.0; tc];
    for (i, &v) in grad.as_slice().iter().enumerate() {
        acc[i % tc] += v;
    }
    Buffer::new(target.clone(), acc)
}

/// Broadcasts a reduced gradient back along the removed axis, scaled.
fn spread_axis(grad: &Buffer, input_shape: &Shape, axis: usize, scale: f64) -> Buffer {
    let dims = input_shape.dims();
    let outer: usize = dims[..axis].iter().product();
    let len = dims[axis];
    let inner: usize = dims[axis + 1..].iter().product();

    let g = grad.as_slice();
    let mut out = vec![0.0; input_shape.count()];
    for o in 0..outer {
        for a in 0..len {
            for i in 0..inner {
                out[o * len * inner + a * inner + i] = g[o * inner + i] * scale;
            }
        }
    }
    Buffer::new(input_shape.clone(), out)
}

fn variance_backward(grad: &Buffer, input: &Buffer, axis: usize) -> Buffer {
    let shape = input.shape();
    let dims = shape.dims();
    let outer: usize = dims[..axis].iter().product();
    let len = dims[axis];
    let inner: usize = dims[axis + 1..].iter().product();

    let x = input.as_slice();
    let g = grad.as_slice();
    let mut out = vec![0.0; shape.count()];
    for o in 0..outer {
        for i in 0..inner {
            let at = |a: usize| o * len * inner + a * inner + i;
            let mean: f64 = (0..len).map(|a| x[at(a)]).sum::<f64>() / len as f64;
            let go = g[o * inner + i];
            for a in 0..len {
                out[at(a)] = go * 2.0 * (x[at(a)] - mean) / len as f64;
            }
        }
    }
    Buffer::new(shape.clone(), out)
}

/// Identity of a tensor within one recorded graph: storage pointer plus
/// context pointer (value equality is irrelevant here).
type NodeId = (usize, usize);

fn node_id(t: &Tensor) -> NodeId {
    let ctx = t.context().map_or(0, |c| Arc::as_ptr(c) as usize);
    (t.buffer().ptr_id(), ctx)
}

/// Builds a topological ordering (sources before dependents) of every node
/// reachable from `root`, visiting each distinct tensor identity once.
fn topological_order(root: &Tensor) -> Vec<Tensor> {
    let mut order = Vec::new();
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut stack: Vec<(Tensor, bool)> = vec![(root.clone(), false)];

    while let Some((tensor, expanded)) = stack.pop() {
        if expanded {
            order.push(tensor);
            continue;
        }
        if !visited.insert(node_id(&tensor)) {
            continue;
        }
        stack.push((tensor.clone(), true));
        if let Some(ctx) = tensor.context() {
            for source in ctx.sources() {
                stack.push((source.clone(), false));
            }
        }
    }
    order
}

/// Accumulated gradients of `targets` with respect to `root`, seeded with a
/// tensor of ones matching the root's shape.
///
/// A target never reached from the root yields a zero tensor of its shape.
pub fn gradients(root: &Tensor, targets: &[&Tensor]) -> Vec<Tensor> {
    gradients_seeded(root, &Tensor::ones_like(root), targets)
}

/// Like [`gradients`], but with a caller-supplied seed gradient for the root
/// (for multi-output or externally weighted differentiation).
///
/// # Panics
/// Panics if the seed's shape differs from the root's.
pub fn gradients_seeded(root: &Tensor, seed: &Tensor, targets: &[&Tensor]) -> Vec<Tensor> {
    assert_eq!(
        seed.shape(),
        root.shape(),
        "seed gradient shape {} does not match root shape {}",
        seed.shape(),
        root.shape()
    );

    let order = topological_order(root);
    let mut accumulated: HashMap<NodeId, Buffer> = HashMap::new();
    accumulated.insert(node_id(root), seed.buffer().clone());

    // Reverse-topological walk: every node's gradient is complete before its
    // rules fire, so each source sees the full accumulated contribution.
    for node in order.iter().rev() {
        let Some(grad) = accumulated.get(&node_id(node)).cloned() else {
            continue;
        };
        let Some(ctx) = node.context() else {
            continue;
        };
        for (source, rule) in ctx.sources().iter().zip(ctx.rules()) {
            // untracked operands take no gradient
            if !source.requires_grad() {
                continue;
            }
            let partial = rule.apply(&grad, node.device());
            accumulate(&mut accumulated, node_id(source), partial);
        }
    }

    targets
        .iter()
        .map(|target| match accumulated.get(&node_id(target)) {
            Some(buffer) => Tensor::from_buffer(buffer.clone(), target.device()),
            None => Tensor::zeros_like(target),
        })
        .collect()
}

fn accumulate(map: &mut HashMap<NodeId, Buffer>, id: NodeId, partial: Buffer) {
    match map.get(&id) {
        Some(existing) => {
            assert_eq!(
                existing.shape(),
                partial.shape(),
                "conflicting gradient shapes for one tensor"
            );
            let sum: Vec<f64> = existing
                .as_slice()
                .iter()
                .zip(partial.as_slice())
                .map(|(a, b)| a + b)
                .collect();
            map.insert(id, Buffer::new(partial.shape().clone(), sum));
        }
        None => {
            map.insert(id, partial);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_arity_mismatch_panics() {
        let x = Tensor::scalar(1.0);
        let result = std::panic::catch_unwind(|| {
            GraphContext::new("bad", vec![x], vec![])
        });
        assert!(result.is_err());
    }

    #[test]
    fn fold_is_periodic_summation() {
        let grad = Buffer::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let folded = fold_to_shape(&grad, &Shape::from(vec![3]));
        assert_eq!(folded.as_slice(), &[5.0, 7.0, 9.0]);

        let scalar = fold_to_shape(&grad, &Shape::scalar());
        assert_eq!(scalar.as_slice(), &[21.0]);
    }

    #[test]
    fn spread_reverses_sum() {
        let grad = Buffer::new(vec![3], vec![1.0, 2.0, 3.0]);
        let spread = spread_axis(&grad, &Shape::from(vec![2, 3]), 0, 1.0);
        assert_eq!(spread.as_slice(), &[1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
    }
}
