//! Operation dispatch layer.
//!
//! Selects the engine implementing each operation from the tensor's
//! [`Device`]. GPU attempts return `Option` and fall back to the CPU engine
//! when the `wgpu` feature is off or no adapter is usable, so a graph built
//! for the GPU still computes everywhere — the CPU engine is the semantic
//! reference, the GPU engine an accelerator with the same mapping.
//!
//! Shape/rank precondition violations panic inside the engines regardless of
//! the device taken.

use crate::backend::Device;
use crate::ops::{BinaryOp, ReduceOp, UnaryOp, cpu};
use crate::shape::Shape;
use crate::tensors::Buffer;

/// Broadcasting elementwise binary op.
pub fn binary(device: Device, op: BinaryOp, lhs: &Buffer, rhs: &Buffer) -> Buffer {
    if device == Device::Gpu {
        #[cfg(feature = "wgpu")]
        if let Some(out) = super::wgpu::gpu_binary(op, lhs, rhs) {
            return out;
        }
    }
    let (data, shape) = cpu::binary(op, lhs.as_slice(), lhs.shape(), rhs.as_slice(), rhs.shape());
    Buffer::new(shape, data)
}

/// Pure position-wise unary op.
pub fn unary(device: Device, op: UnaryOp, input: &Buffer) -> Buffer {
    if device == Device::Gpu {
        #[cfg(feature = "wgpu")]
        if let Some(out) = super::wgpu::gpu_unary(op, input) {
            return out;
        }
    }
    Buffer::new(input.shape().clone(), cpu::unary(op, input.as_slice()))
}

/// Position-wise local derivative of a unary op, used by backward chain
/// rules.
pub fn unary_derivative(device: Device, op: UnaryOp, input: &Buffer) -> Buffer {
    if device == Device::Gpu {
        #[cfg(feature = "wgpu")]
        if let Some(out) = super::wgpu::gpu_unary_derivative(op, input) {
            return out;
        }
    }
    Buffer::new(
        input.shape().clone(),
        cpu::unary_derivative(op, input.as_slice()),
    )
}

/// Axis reduction; the reduced axis is removed from the result shape.
pub fn reduce(device: Device, op: ReduceOp, input: &Buffer, axis: usize) -> Buffer {
    if device == Device::Gpu {
        #[cfg(feature = "wgpu")]
        if let Some(out) = super::wgpu::gpu_reduce(op, input, axis) {
            return out;
        }
    }
    let (data, shape) = cpu::reduce(op, input.as_slice(), input.shape(), axis);
    Buffer::new(shape, data)
}

/// Matrix multiply with restricted leading-batch broadcasting.
pub fn matmul(device: Device, lhs: &Buffer, rhs: &Buffer) -> Buffer {
    if device == Device::Gpu {
        #[cfg(feature = "wgpu")]
        if let Some(out) = super::wgpu::gpu_matmul(lhs, rhs) {
            return out;
        }
    }
    let (data, shape) = cpu::matmul(lhs.as_slice(), lhs.shape(), rhs.as_slice(), rhs.shape());
    Buffer::new(shape, data)
}

/// Swap of the last two axes. Runs on the CPU for every device; it is a
/// pure data movement feeding the matmul kernels.
pub fn transpose(_device: Device, input: &Buffer) -> Buffer {
    let (data, shape) = cpu::transpose(input.as_slice(), input.shape());
    Buffer::new(shape, data)
}

/// Constant fill.
pub fn fill(device: Device, shape: &Shape, value: f64) -> Buffer {
    if device == Device::Gpu {
        #[cfg(feature = "wgpu")]
        if let Some(out) = super::wgpu::gpu_fill(shape, value) {
            return out;
        }
    }
    Buffer::new(shape.clone(), cpu::fill(shape, value))
}

/// Linear ramp from `lower` towards `upper` by `stride`.
pub fn arange(device: Device, lower: f64, upper: f64, stride: f64) -> Buffer {
    if device == Device::Gpu {
        #[cfg(feature = "wgpu")]
        if let Some(out) = super::wgpu::gpu_arange(lower, upper, stride) {
            return out;
        }
    }
    let (data, shape) = cpu::arange(lower, upper, stride);
    Buffer::new(shape, data)
}

/// Reversal along axis 0.
pub fn reverse(device: Device, input: &Buffer) -> Buffer {
    if device == Device::Gpu {
        #[cfg(feature = "wgpu")]
        if let Some(out) = super::wgpu::gpu_reverse(input) {
            return out;
        }
    }
    Buffer::new(input.shape().clone(), cpu::reverse(input.as_slice(), input.shape()))
}

/// Main-diagonal extraction.
pub fn diagonal_elements(device: Device, input: &Buffer) -> Buffer {
    if device == Device::Gpu {
        #[cfg(feature = "wgpu")]
        if let Some(out) = super::wgpu::gpu_diagonal_elements(input) {
            return out;
        }
    }
    let (data, shape) = cpu::diagonal_elements(input.as_slice(), input.shape());
    Buffer::new(shape, data)
}

/// Main-diagonal insertion into a zero matrix.
pub fn diagonal_matrix(device: Device, input: &Buffer) -> Buffer {
    if device == Device::Gpu {
        #[cfg(feature = "wgpu")]
        if let Some(out) = super::wgpu::gpu_diagonal_matrix(input) {
            return out;
        }
    }
    let (data, shape) = cpu::diagonal_matrix(input.as_slice(), input.shape());
    Buffer::new(shape, data)
}

/// Banded diagonal extraction into a `[below + above + 1, d]` matrix.
pub fn diagonal_band(device: Device, input: &Buffer, below: usize, above: usize) -> Buffer {
    if device == Device::Gpu {
        #[cfg(feature = "wgpu")]
        if let Some(out) = super::wgpu::gpu_diagonal_band(input, below, above) {
            return out;
        }
    }
    let (data, shape) = cpu::diagonal_band(input.as_slice(), input.shape(), below, above);
    Buffer::new(shape, data)
}

/// Banded diagonal insertion into a zero matrix.
pub fn diagonal_band_matrix(device: Device, input: &Buffer, below: usize, above: usize) -> Buffer {
    if device == Device::Gpu {
        #[cfg(feature = "wgpu")]
        if let Some(out) = super::wgpu::gpu_diagonal_band_matrix(input, below, above) {
            return out;
        }
    }
    let (data, shape) = cpu::diagonal_band_matrix(input.as_slice(), input.shape(), below, above);
    Buffer::new(shape, data)
}

/// Zeroing outside a diagonal band.
pub fn band_mask(device: Device, input: &Buffer, below: i64, above: i64) -> Buffer {
    if device == Device::Gpu {
        #[cfg(feature = "wgpu")]
        if let Some(out) = super::wgpu::gpu_band_mask(input, below, above) {
            return out;
        }
    }
    Buffer::new(
        input.shape().clone(),
        cpu::band_mask(input.as_slice(), input.shape(), below, above),
    )
}
