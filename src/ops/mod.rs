//! Device engine kernels and dispatch.
//!
//! Kernels come in two interchangeable implementations with identical
//! per-position semantics: [`cpu`] (rayon-parallel loops) and, behind the
//! `wgpu` feature, [`wgpu`] (one unit of parallel work per output element).
//! [`dispatch`] selects the implementation from a tensor's device and falls
//! back to the CPU engine when the GPU is unavailable.

pub mod cpu;
pub mod dispatch;
#[cfg(feature = "wgpu")]
pub mod wgpu;

/// Broadcasting elementwise binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
        }
    }

    /// Op selector passed to the GPU kernel.
    pub fn code(self) -> u32 {
        match self {
            Self::Add => 0,
            Self::Sub => 1,
            Self::Mul => 2,
            Self::Div => 3,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
        }
    }
}

/// Pure position-wise unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Exp,
    Log,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Sinh,
    Cosh,
    Tanh,
    Square,
    Relu,
    /// Positive indicator: `x > 0 ? 1 : 0`.
    Step,
}

impl UnaryOp {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Self::Exp => x.exp(),
            Self::Log => x.ln(),
            Self::Sqrt => x.sqrt(),
            Self::Sin => x.sin(),
            Self::Cos => x.cos(),
            Self::Tan => x.tan(),
            Self::Sinh => x.sinh(),
            Self::Cosh => x.cosh(),
            Self::Tanh => x.tanh(),
            Self::Square => x * x,
            Self::Relu => x.max(0.0),
            Self::Step => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Local derivative at `x`, used by the backward chain rule.
    pub fn derivative(self, x: f64) -> f64 {
        match self {
            Self::Exp => x.exp(),
            Self::Log => 1.0 / x,
            Self::Sqrt => 0.5 / x.sqrt(),
            Self::Sin => x.cos(),
            Self::Cos => -x.sin(),
            Self::Tan => {
                let t = x.tan();
                1.0 + t * t
            }
            Self::Sinh => x.cosh(),
            Self::Cosh => x.sinh(),
            Self::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
            Self::Square => 2.0 * x,
            Self::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Step => 0.0,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Exp => 0,
            Self::Log => 1,
            Self::Sqrt => 2,
            Self::Sin => 3,
            Self::Cos => 4,
            Self::Tan => 5,
            Self::Sinh => 6,
            Self::Cosh => 7,
            Self::Tanh => 8,
            Self::Square => 9,
            Self::Relu => 10,
            Self::Step => 11,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Exp => "exp",
            Self::Log => "log",
            Self::Sqrt => "sqrt",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Sinh => "sinh",
            Self::Cosh => "cosh",
            Self::Tanh => "tanh",
            Self::Square => "square",
            Self::Relu => "relu",
            Self::Step => "step",
        }
    }
}

/// Axis reductions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Mean,
    Variance,
}

impl ReduceOp {
    pub fn code(self) -> u32 {
        match self {
            Self::Sum => 0,
            Self::Mean => 1,
            Self::Variance => 2,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Variance => "variance",
        }
    }
}
