//! Device selection module.
//!
//! A [`Device`] bundles the engine and memory a tensor lives on. Every tensor
//! records its device at creation, and all tensors interoperating in one
//! expression must share the same device; mixing is a precondition violation.
//!
//! # Supported Devices
//!
//! - `Cpu` — sequential-semantics engine parallelised with `rayon` (default).
//! - `Gpu` — `wgpu` compute engine (requires the `wgpu` feature; operations
//!   fall back to the CPU engine when no adapter is available).
//!
//! The default device for newly created tensors is stored globally in an
//! `AtomicU8`, so it can be switched at runtime before building a graph.

use briny::traits::{RawConvert, StableLayout, Unaligned};
use core::convert::TryFrom;
use core::sync::atomic::{AtomicU8, Ordering};

/// Capability bundle a tensor graph executes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Device {
    /// Sequential CPU engine (default).
    #[default]
    Cpu = 0,
    /// Parallel GPU engine using `wgpu`.
    Gpu,
}

unsafe impl StableLayout for Device {}
unsafe impl RawConvert for Device {}
unsafe impl Unaligned for Device {}
impl TryFrom<u8> for Device {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Cpu),
            1 => Ok(Self::Gpu),
            _ => Err(()),
        }
    }
}

/// Internal global state for the default device.
///
/// The device is switched rarely and never mid-traversal, so a plain atomic
/// with acquire/release ordering is all the synchronisation needed.
static GLOBAL_DEFAULT_DEVICE: AtomicU8 = AtomicU8::new(Device::Cpu as u8);

/// Sets the device newly created tensors are placed on.
///
/// # Example
///
/// ```
/// use nabla::backend::{set_default_device, Device};
/// set_default_device(Device::Gpu);
/// # set_default_device(Device::Cpu);
/// ```
pub fn set_default_device(d: Device) {
    GLOBAL_DEFAULT_DEVICE.store(d as u8, Ordering::Release);
}

/// Returns the device newly created tensors are placed on.
///
/// Falls back to [`Device::Cpu`] if the stored value is invalid.
pub fn default_device() -> Device {
    Device::try_from(GLOBAL_DEFAULT_DEVICE.load(Ordering::Acquire)).unwrap_or_default()
}
