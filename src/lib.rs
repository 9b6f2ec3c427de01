//! nabla: a tensor compute engine with reverse-mode automatic
//! differentiation.
//!
//! The crate provides the dynamic computation graph, restricted broadcasting,
//! and dual CPU/GPU execution backends that neural-network layers, optimizers
//! and training loops are built on top of. Higher layers interact with it
//! only through tensor creation and arithmetic, the `requires_grad` flag, and
//! the [`graph::gradients`] query.
//!
//! # Features
//!
//! - Shared, reference-counted tensor buffers with copy-on-write in-place
//!   writes.
//! - Broadcasting elementwise arithmetic, unary math, axis reductions,
//!   (batched) matrix multiply, and utility kernels on two interchangeable
//!   engines: a rayon-parallel CPU engine and a `wgpu` compute engine
//!   (feature `wgpu`).
//! - Operation recording pruned to the differentiated subgraph, and a
//!   reverse-topological gradient executor with additive accumulation.
//!
//! # Broadcasting
//!
//! The broadcast rule is deliberately restricted: a smaller operand must be
//! a trailing suffix of the larger one (or a scalar), so its storage repeats
//! as an exact tile of the output and the index mapping is a single modulo.
//! General per-axis NumPy broadcasting is out of scope by design.
//!
//! # Example
//!
//! ```
//! use nabla::tensor;
//! use nabla::graph::gradients;
//!
//! let x = tensor!([3.0]).with_grad();
//! let y = &(&x * &x) + &x; // y = x² + x
//! let grad = gradients(&y, &[&x]);
//! assert_eq!(grad[0].data(), &[7.0]); // dy/dx at 3 is 2·3 + 1
//! ```

pub mod backend;
pub mod graph;
pub mod ops;
pub mod shape;
pub mod tensors;
