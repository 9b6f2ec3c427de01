//! GPU engine built on WGPU compute shaders.
//!
//! Mirrors the CPU engine kernel for kernel: broadcasting binary ops, unary
//! math, axis reductions, batched matmul, and the utility kernels. Shaders
//! are validated and compiled once at first use (via `lazy_static`) and every
//! kernel assigns one unit of parallel work per output element.
//!
//! Elementwise and matmul kernels receive each operand as a value buffer
//! plus a rank scalar and a shape-dimensions buffer (matmul additionally the
//! result's rank/shape), and fold element counts on the device; utility
//! kernels take scalar parameters in the uniform block.
//!
//! Tensor data lives in f64 on the host; storage buffers are staged through
//! f32 because WGSL storage arrays are 32-bit. Results are widened back to
//! f64 on readback. Every entry point returns `Option<Buffer>` so dispatch
//! can fall back to the CPU engine when no adapter is usable.

use briny02::prelude::*;
use wgpu::util::DeviceExt;

use crate::ops::{BinaryOp, ReduceOp, UnaryOp, cpu};
use crate::shape::{Shape, resolve_broadcast};
use crate::tensors::Buffer;

const BINARY: &str = include_str!("shaders/binary.wgsl");
const UNARY: &str = include_str!("shaders/unary.wgsl");
const REDUCE: &str = include_str!("shaders/reduce.wgsl");
const MATMUL: &str = include_str!("shaders/matmul.wgsl");
const UTILITY: &str = include_str!("shaders/utility.wgsl");

/// Basic wrapper for common GPU errors.
#[derive(Debug)]
pub enum GpuError {
    /// An error in requesting the adapter.
    Adapter(wgpu::RequestAdapterError),
    /// An error in requesting the GPU (device).
    Device(wgpu::RequestDeviceError),
}

impl std::fmt::Display for GpuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuError::Adapter(e) => write!(f, "Adapter error: {e}"),
            GpuError::Device(e) => write!(f, "Device error: {e}"),
        }
    }
}

/// Wrapper for a `GpuError` or `ValidationError` depending on how it fails.
#[derive(Debug)]
pub enum GpuFailureKind {
    /// An error resulting from the GPU.
    Gpu(GpuError),
    /// An error resulting from validating data.
    Validation(ValidationError),
}

impl std::fmt::Display for GpuFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuFailureKind::Gpu(err) => write!(f, "GPU error: {err}"),
            GpuFailureKind::Validation(err) => write!(f, "Validation error: {err}"),
        }
    }
}

/// A type of error closely related to the GPU.
#[derive(Debug)]
pub struct GpuFailure {
    /// The optional type of failure that occured.
    pub kind: Option<GpuFailureKind>,
    /// The optional message explaining the failure.
    pub message: Option<String>,
}

impl From<GpuError> for GpuFailure {
    fn from(kind: GpuError) -> Self {
        Self { kind: Some(GpuFailureKind::Gpu(kind)), message: None }
    }
}

impl From<ValidationError> for GpuFailure {
    fn from(kind: ValidationError) -> Self {
        Self { kind: Some(GpuFailureKind::Validation(kind)), message: None }
    }
}

impl From<&str> for GpuFailure {
    fn from(msg: &str) -> Self {
        Self { kind: None, message: Some(msg.to_string()) }
    }
}

impl std::fmt::Display for GpuFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if let Some(kind) = &self.kind {
            write!(f, "GPU failure: {kind}")
        } else if let Some(msg) = &self.message {
            write!(f, "GPU failure: {msg}")
        } else {
            write!(f, "Unknown GPU failure")
        }
    }
}

impl std::error::Error for GpuFailure {}

/// Holds the WGPU device and queue used for executing compute pipelines.
///
/// Initialized once globally and reused for all operations via `lazy_static`.
pub struct GpuContext {
    /// The actual GPU device.
    pub device: wgpu::Device,
    /// A queue for submitting work to the device.
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Selects the default adapter and creates a device + queue.
    ///
    /// Uses `pollster::block_on` to wait for the async WGPU calls; default
    /// limits and no extra features, for broad compatibility.
    pub fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                .map_err(GpuError::Adapter)?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: None,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .map_err(GpuError::Device)?;

        Ok(Self { device, queue })
    }
}

/// Secure wrapper for WGSL source code extracted from files.
pub struct WgslSource<'a>(pub &'a str);

impl<'a> Validate for WgslSource<'a> {
    fn validate(&self) -> Result<(), ValidationError> {
        let src = self.0;

        if src.len() > 65536 {
            return Err(ValidationError);
        }

        // Modules carry several entry points, so require the attribute
        // rather than a particular function name.
        if !src.contains("@compute") {
            return Err(ValidationError);
        }

        if src.contains("import") || src.contains("#include") {
            return Err(ValidationError); // Disallow source inclusion
        }

        let forbidden = ["asm", "unsafe", "std::"];
        if forbidden.iter().any(|bad| src.contains(bad)) {
            return Err(ValidationError);
        }

        Ok(())
    }
}

/// Validates a WGSL module and compiles it on `device` under `label`.
pub fn load_shader(
    device: &wgpu::Device,
    label: &str,
    source: &str,
) -> Result<wgpu::ShaderModule, GpuFailure> {
    WgslSource(source).validate()?; // briny-based check

    Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    }))
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Layout shared by kernels reading `inputs` storage buffers and writing one.
/// Binding 0 is always the kernel parameter uniform.
fn kernel_layout(device: &wgpu::Device, label: &str, inputs: u32) -> wgpu::BindGroupLayout {
    let mut entries = vec![uniform_entry(0)];
    for i in 0..inputs {
        entries.push(storage_entry(i + 1, true));
    }
    entries.push(storage_entry(inputs + 1, false));
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &entries,
    })
}

fn kernel_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    module: &wgpu::ShaderModule,
    entry_point: &str,
) -> wgpu::ComputePipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module,
        entry_point: Some(entry_point),
        cache: None,
        compilation_options: wgpu::PipelineCompilationOptions::default(),
    })
}

lazy_static::lazy_static! {
    static ref GPU_CONTEXT: Result<GpuContext, GpuError> = GpuContext::new();
    static ref BINARY_SHADER: wgpu::ShaderModule = {
        let ctx = GPU_CONTEXT.as_ref().expect("GPU context unavailable");
        load_shader(&ctx.device, "binary", BINARY).expect("binary shader failed validation")
    };
    static ref UNARY_SHADER: wgpu::ShaderModule = {
        let ctx = GPU_CONTEXT.as_ref().expect("GPU context unavailable");
        load_shader(&ctx.device, "unary", UNARY).expect("unary shader failed validation")
    };
    static ref REDUCE_SHADER: wgpu::ShaderModule = {
        let ctx = GPU_CONTEXT.as_ref().expect("GPU context unavailable");
        load_shader(&ctx.device, "reduce", REDUCE).expect("reduce shader failed validation")
    };
    static ref MATMUL_SHADER: wgpu::ShaderModule = {
        let ctx = GPU_CONTEXT.as_ref().expect("GPU context unavailable");
        load_shader(&ctx.device, "matmul", MATMUL).expect("matmul shader failed validation")
    };
    static ref UTILITY_SHADER: wgpu::ShaderModule = {
        let ctx = GPU_CONTEXT.as_ref().expect("GPU context unavailable");
        load_shader(&ctx.device, "utility", UTILITY).expect("utility shader failed validation")
    };
    static ref ONE_INPUT_LAYOUT: wgpu::BindGroupLayout = {
        let ctx = GPU_CONTEXT.as_ref().expect("GPU context unavailable");
        kernel_layout(&ctx.device, "one_input_bgl", 1)
    };
    static ref TWO_INPUT_LAYOUT: wgpu::BindGroupLayout = {
        let ctx = GPU_CONTEXT.as_ref().expect("GPU context unavailable");
        kernel_layout(&ctx.device, "two_input_bgl", 2)
    };
    static ref FOUR_INPUT_LAYOUT: wgpu::BindGroupLayout = {
        let ctx = GPU_CONTEXT.as_ref().expect("GPU context unavailable");
        kernel_layout(&ctx.device, "four_input_bgl", 4)
    };
    static ref FIVE_INPUT_LAYOUT: wgpu::BindGroupLayout = {
        let ctx = GPU_CONTEXT.as_ref().expect("GPU context unavailable");
        kernel_layout(&ctx.device, "five_input_bgl", 5)
    };
    static ref BINARY_PIPELINE: wgpu::ComputePipeline = {
        let ctx = GPU_CONTEXT.as_ref().expect("GPU context unavailable");
        kernel_pipeline(&ctx.device, "binary_pipeline", &FOUR_INPUT_LAYOUT, &BINARY_SHADER, "main")
    };
    static ref UNARY_PIPELINE: wgpu::ComputePipeline = {
        let ctx = GPU_CONTEXT.as_ref().expect("GPU context unavailable");
        kernel_pipeline(&ctx.device, "unary_pipeline", &TWO_INPUT_LAYOUT, &UNARY_SHADER, "main")
    };
    static ref UNARY_DERIV_PIPELINE: wgpu::ComputePipeline = {
        let ctx = GPU_CONTEXT.as_ref().expect("GPU context unavailable");
        kernel_pipeline(&ctx.device, "unary_deriv_pipeline", &TWO_INPUT_LAYOUT, &UNARY_SHADER, "deriv_main")
    };
    static ref REDUCE_PIPELINE: wgpu::ComputePipeline = {
        let ctx = GPU_CONTEXT.as_ref().expect("GPU context unavailable");
        kernel_pipeline(&ctx.device, "reduce_pipeline", &ONE_INPUT_LAYOUT, &REDUCE_SHADER, "main")
    };
    static ref MATMUL_PIPELINE: wgpu::ComputePipeline = {
        let ctx = GPU_CONTEXT.as_ref().expect("GPU context unavailable");
        kernel_pipeline(&ctx.device, "matmul_pipeline", &FIVE_INPUT_LAYOUT, &MATMUL_SHADER, "main")
    };
    static ref FILL_PIPELINE: wgpu::ComputePipeline = {
        let ctx = GPU_CONTEXT.as_ref().expect("GPU context unavailable");
        kernel_pipeline(&ctx.device, "fill_pipeline", &ONE_INPUT_LAYOUT, &UTILITY_SHADER, "fill_main")
    };
    static ref ARANGE_PIPELINE: wgpu::ComputePipeline = {
        let ctx = GPU_CONTEXT.as_ref().expect("GPU context unavailable");
        kernel_pipeline(&ctx.device, "arange_pipeline", &ONE_INPUT_LAYOUT, &UTILITY_SHADER, "arange_main")
    };
    static ref REVERSE_PIPELINE: wgpu::ComputePipeline = {
        let ctx = GPU_CONTEXT.as_ref().expect("GPU context unavailable");
        kernel_pipeline(&ctx.device, "reverse_pipeline", &ONE_INPUT_LAYOUT, &UTILITY_SHADER, "reverse_main")
    };
    static ref DIAG_EXTRACT_PIPELINE: wgpu::ComputePipeline = {
        let ctx = GPU_CONTEXT.as_ref().expect("GPU context unavailable");
        kernel_pipeline(&ctx.device, "diag_extract_pipeline", &ONE_INPUT_LAYOUT, &UTILITY_SHADER, "diag_extract_main")
    };
    static ref DIAG_INSERT_PIPELINE: wgpu::ComputePipeline = {
        let ctx = GPU_CONTEXT.as_ref().expect("GPU context unavailable");
        kernel_pipeline(&ctx.device, "diag_insert_pipeline", &ONE_INPUT_LAYOUT, &UTILITY_SHADER, "diag_insert_main")
    };
    static ref DIAG_BAND_EXTRACT_PIPELINE: wgpu::ComputePipeline = {
        let ctx = GPU_CONTEXT.as_ref().expect("GPU context unavailable");
        kernel_pipeline(&ctx.device, "diag_band_extract_pipeline", &ONE_INPUT_LAYOUT, &UTILITY_SHADER, "diag_band_extract_main")
    };
    static ref DIAG_BAND_INSERT_PIPELINE: wgpu::ComputePipeline = {
        let ctx = GPU_CONTEXT.as_ref().expect("GPU context unavailable");
        kernel_pipeline(&ctx.device, "diag_band_insert_pipeline", &ONE_INPUT_LAYOUT, &UTILITY_SHADER, "diag_band_insert_main")
    };
    static ref BAND_MASK_PIPELINE: wgpu::ComputePipeline = {
        let ctx = GPU_CONTEXT.as_ref().expect("GPU context unavailable");
        kernel_pipeline(&ctx.device, "band_mask_pipeline", &ONE_INPUT_LAYOUT, &UTILITY_SHADER, "band_mask_main")
    };
}

/// Kernel parameter block bound at binding 0 of every pipeline.
///
/// Matches the `Params` uniform struct in the shaders: two integer vec4s and
/// one float vec4, so reductions and masks fit in a single layout.
#[repr(C)]
#[derive(Clone, Copy)]
struct KernelParams {
    words_a: [u32; 4],
    words_b: [u32; 4],
    scalars: [f32; 4],
}

impl KernelParams {
    fn new() -> Self {
        Self { words_a: [0; 4], words_b: [0; 4], scalars: [0.0; 4] }
    }

    fn words_a(mut self, w: [u32; 4]) -> Self {
        self.words_a = w;
        self
    }

    fn words_b(mut self, w: [u32; 4]) -> Self {
        self.words_b = w;
        self
    }

    fn scalars(mut self, s: [f32; 4]) -> Self {
        self.scalars = s;
        self
    }
}

fn as_bytes<T: Copy>(data: &[T]) -> &[u8] {
    let len = std::mem::size_of_val(data);
    unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, len) }
}

fn bytes_to_f32_slice(data: &[u8]) -> Result<&[f32], &'static str> {
    use std::mem::{align_of, size_of};

    if data.as_ptr() as usize % align_of::<f32>() != 0 {
        return Err("unaligned buffer");
    }

    if data.len() % size_of::<f32>() != 0 {
        return Err("buffer length is not a multiple of f32");
    }

    let len = data.len() / size_of::<f32>();
    let ptr = data.as_ptr() as *const f32;
    unsafe { Ok(std::slice::from_raw_parts(ptr, len)) }
}

fn narrow(data: &[f64]) -> Vec<f32> {
    data.iter().map(|&v| v as f32).collect()
}

fn widen(data: &[f32]) -> Vec<f64> {
    data.iter().map(|&v| v as f64).collect()
}

fn dims_u32(shape: &Shape) -> Vec<u32> {
    shape.dims().iter().map(|&d| d as u32).collect()
}

fn groups_1d(count: usize) -> [u32; 3] {
    [(count as u32).div_ceil(64), 1, 1]
}

/// The pipeline statics panic when initialized without an adapter, so every
/// entry point checks this before touching them.
fn gpu_available() -> bool {
    GPU_CONTEXT.is_ok()
}

/// Uploads inputs, dispatches `pipeline`, and reads back `out_len` floats.
///
/// Binding 0 is the parameter uniform, bindings 1..=inputs.len() the input
/// storage buffers (raw bytes, so value and shape-dims buffers mix), and the
/// next binding the output. Empty inputs bind a one-element placeholder so
/// every pipeline shares a layout.
fn run_kernel(
    pipeline: &wgpu::ComputePipeline,
    layout: &wgpu::BindGroupLayout,
    params: KernelParams,
    inputs: &[&[u8]],
    out_len: usize,
    workgroups: [u32; 3],
) -> Result<Vec<f32>, GpuFailure> {
    let ctx = GPU_CONTEXT.as_ref().map_err(|_| "GPU context unavailable")?;
    let device = &ctx.device;
    let queue = &ctx.queue;

    let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("params"),
        contents: as_bytes(std::slice::from_ref(&params)),
        usage: wgpu::BufferUsages::UNIFORM,
    });

    let placeholder = [0u8; 4];
    let input_bufs: Vec<wgpu::Buffer> = inputs
        .iter()
        .map(|data| {
            let contents: &[u8] = if data.is_empty() { &placeholder } else { data };
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("input"),
                contents,
                usage: wgpu::BufferUsages::STORAGE,
            })
        })
        .collect();

    let out_size = (out_len * 4) as u64;
    let out_buf = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("output"),
        size: out_size,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    });

    let mut entries = vec![wgpu::BindGroupEntry {
        binding: 0,
        resource: params_buf.as_entire_binding(),
    }];
    for (i, buf) in input_bufs.iter().enumerate() {
        entries.push(wgpu::BindGroupEntry {
            binding: (i + 1) as u32,
            resource: buf.as_entire_binding(),
        });
    }
    entries.push(wgpu::BindGroupEntry {
        binding: (input_bufs.len() + 1) as u32,
        resource: out_buf.as_entire_binding(),
    });

    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("kernel_bind_group"),
        layout,
        entries: &entries,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("kernel_encoder"),
    });

    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("kernel_pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
    }

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("staging"),
        size: out_size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    encoder.copy_buffer_to_buffer(&out_buf, 0, &staging, 0, out_size);
    queue.submit(Some(encoder.finish()));

    staging.slice(..).map_async(wgpu::MapMode::Read, |result| {
        assert!(result.is_ok());
    });
    device
        .poll(wgpu::PollType::Wait)
        .map_err(|_| "device poll failed")?;

    let view = staging.slice(..).get_mapped_range();
    let out = bytes_to_f32_slice(&view)?.to_vec();
    drop(view);
    staging.unmap();

    Ok(out)
}

/// Broadcasting elementwise binary op on the GPU. Each operand is passed as
/// a value buffer plus rank and shape dims; the kernel folds the counts.
///
/// Panics on broadcast-incompatible shapes, the same as the CPU engine; a
/// GPU failure after the precondition check returns `None` instead.
pub fn gpu_binary(op: BinaryOp, lhs: &Buffer, rhs: &Buffer) -> Option<Buffer> {
    if !gpu_available() {
        return None;
    }
    let layout = resolve_broadcast(lhs.shape(), rhs.shape());
    let count = layout.output.count();
    if count == 0 {
        return None;
    }

    let lhs_f32 = narrow(lhs.as_slice());
    let lhs_dims = dims_u32(lhs.shape());
    let rhs_f32 = narrow(rhs.as_slice());
    let rhs_dims = dims_u32(rhs.shape());

    let params = KernelParams::new().words_a([
        lhs.shape().rank() as u32,
        rhs.shape().rank() as u32,
        op.code(),
        0,
    ]);
    let out = run_kernel(
        &BINARY_PIPELINE,
        &FOUR_INPUT_LAYOUT,
        params,
        &[
            as_bytes(&lhs_f32),
            as_bytes(&lhs_dims),
            as_bytes(&rhs_f32),
            as_bytes(&rhs_dims),
        ],
        count,
        groups_1d(count),
    )
    .ok()?;
    Some(Buffer::new(layout.output, widen(&out)))
}

fn gpu_unary_kernel(
    pipeline: &wgpu::ComputePipeline,
    op: UnaryOp,
    input: &Buffer,
) -> Option<Buffer> {
    let count = input.count();
    if count == 0 {
        return None;
    }

    let values = narrow(input.as_slice());
    let dims = dims_u32(input.shape());
    let params = KernelParams::new().words_a([input.shape().rank() as u32, op.code(), 0, 0]);
    let out = run_kernel(
        pipeline,
        &TWO_INPUT_LAYOUT,
        params,
        &[as_bytes(&values), as_bytes(&dims)],
        count,
        groups_1d(count),
    )
    .ok()?;
    Some(Buffer::new(input.shape().clone(), widen(&out)))
}

/// Pure position-wise unary op on the GPU.
pub fn gpu_unary(op: UnaryOp, input: &Buffer) -> Option<Buffer> {
    if !gpu_available() {
        return None;
    }
    gpu_unary_kernel(&UNARY_PIPELINE, op, input)
}

/// Position-wise local derivative table on the GPU, for backward chain
/// rules.
pub fn gpu_unary_derivative(op: UnaryOp, input: &Buffer) -> Option<Buffer> {
    if !gpu_available() {
        return None;
    }
    gpu_unary_kernel(&UNARY_DERIV_PIPELINE, op, input)
}

/// Axis reduction on the GPU; one thread per surviving element walks the
/// reduced axis.
pub fn gpu_reduce(op: ReduceOp, input: &Buffer, axis: usize) -> Option<Buffer> {
    if !gpu_available() {
        return None;
    }
    let (outer, len, inner) = cpu::axis_strides(input.shape(), axis);
    let out_count = outer * inner;
    if out_count == 0 || len == 0 {
        return None;
    }
    let mut out_dims = input.shape().dims().to_vec();
    out_dims.remove(axis);

    let values = narrow(input.as_slice());
    let params = KernelParams::new().words_a([
        outer as u32,
        len as u32,
        inner as u32,
        op.code(),
    ]);
    let out = run_kernel(
        &REDUCE_PIPELINE,
        &ONE_INPUT_LAYOUT,
        params,
        &[as_bytes(&values)],
        out_count,
        groups_1d(out_count),
    )
    .ok()?;
    Some(Buffer::new(Shape::from(out_dims), widen(&out)))
}

/// Batched matrix multiply on the GPU: a 2-D grid of (column, row) threads
/// with one layer of workgroups per broadcast batch. Operands and the result
/// are passed as rank + shape dims; the kernel derives the problem sizes and
/// the destination row stride from them.
pub fn gpu_matmul(lhs: &Buffer, rhs: &Buffer) -> Option<Buffer> {
    if !gpu_available() {
        return None;
    }
    let l = cpu::matmul_layout(lhs.shape(), rhs.shape());
    let out_count = l.batches * l.m * l.n;
    if out_count == 0 {
        return None;
    }

    let lhs_f32 = narrow(lhs.as_slice());
    let lhs_dims = dims_u32(lhs.shape());
    let rhs_f32 = narrow(rhs.as_slice());
    let rhs_dims = dims_u32(rhs.shape());
    let out_dims = dims_u32(&l.out_shape);

    let params = KernelParams::new().words_a([
        lhs.shape().rank() as u32,
        rhs.shape().rank() as u32,
        l.out_shape.rank() as u32,
        0,
    ]);
    let out = run_kernel(
        &MATMUL_PIPELINE,
        &FIVE_INPUT_LAYOUT,
        params,
        &[
            as_bytes(&lhs_f32),
            as_bytes(&lhs_dims),
            as_bytes(&rhs_f32),
            as_bytes(&rhs_dims),
            as_bytes(&out_dims),
        ],
        out_count,
        [
            (l.n as u32).div_ceil(16),
            (l.m as u32).div_ceil(16),
            l.batches as u32,
        ],
    )
    .ok()?;
    Some(Buffer::new(l.out_shape, widen(&out)))
}

/// Constant fill on the GPU.
pub fn gpu_fill(shape: &Shape, value: f64) -> Option<Buffer> {
    if !gpu_available() {
        return None;
    }
    let count = shape.count();
    if count == 0 {
        return None;
    }

    let params = KernelParams::new()
        .words_a([count as u32, 0, 0, 0])
        .scalars([value as f32, 0.0, 0.0, 0.0]);
    let out = run_kernel(&FILL_PIPELINE, &ONE_INPUT_LAYOUT, params, &[&[]], count, groups_1d(count))
        .ok()?;
    Some(Buffer::new(shape.clone(), widen(&out)))
}

/// Linear ramp on the GPU.
pub fn gpu_arange(lower: f64, upper: f64, stride: f64) -> Option<Buffer> {
    if !gpu_available() {
        return None;
    }
    assert!(stride != 0.0, "arange stride must be nonzero");
    let steps = (upper - lower) / stride;
    assert!(steps >= 0.0, "arange stride points away from the upper bound");
    let count = steps.ceil() as usize;
    if count == 0 {
        return None;
    }

    let params = KernelParams::new()
        .words_a([count as u32, 0, 0, 0])
        .scalars([lower as f32, stride as f32, 0.0, 0.0]);
    let out =
        run_kernel(&ARANGE_PIPELINE, &ONE_INPUT_LAYOUT, params, &[&[]], count, groups_1d(count))
            .ok()?;
    Some(Buffer::new(Shape::from(vec![count]), widen(&out)))
}

/// Reversal along axis 0 on the GPU.
pub fn gpu_reverse(input: &Buffer) -> Option<Buffer> {
    if !gpu_available() {
        return None;
    }
    let count = input.count();
    if count == 0 || input.shape().rank() == 0 {
        return None;
    }
    let dim0 = input.shape()[0];
    let block = count / dim0;

    let values = narrow(input.as_slice());
    let params = KernelParams::new().words_a([count as u32, dim0 as u32, block as u32, 0]);
    let out = run_kernel(
        &REVERSE_PIPELINE,
        &ONE_INPUT_LAYOUT,
        params,
        &[as_bytes(&values)],
        count,
        groups_1d(count),
    )
    .ok()?;
    Some(Buffer::new(input.shape().clone(), widen(&out)))
}

/// Main-diagonal extraction on the GPU.
pub fn gpu_diagonal_elements(input: &Buffer) -> Option<Buffer> {
    if !gpu_available() {
        return None;
    }
    let shape = input.shape();
    assert_eq!(shape.rank(), 2, "diagonal extraction requires a matrix, got {shape}");
    let (rows, cols) = (shape[0], shape[1]);
    let d = rows.min(cols);
    if d == 0 {
        return None;
    }

    let values = narrow(input.as_slice());
    let params = KernelParams::new().words_a([d as u32, cols as u32, 0, 0]);
    let out = run_kernel(
        &DIAG_EXTRACT_PIPELINE,
        &ONE_INPUT_LAYOUT,
        params,
        &[as_bytes(&values)],
        d,
        groups_1d(d),
    )
    .ok()?;
    Some(Buffer::new(Shape::from(vec![d]), widen(&out)))
}

/// Main-diagonal insertion on the GPU.
pub fn gpu_diagonal_matrix(input: &Buffer) -> Option<Buffer> {
    if !gpu_available() {
        return None;
    }
    let shape = input.shape();
    assert_eq!(shape.rank(), 1, "diagonal insertion requires a vector, got {shape}");
    let d = shape[0];
    if d == 0 {
        return None;
    }

    let values = narrow(input.as_slice());
    let params = KernelParams::new().words_a([(d * d) as u32, d as u32, 0, 0]);
    let out = run_kernel(
        &DIAG_INSERT_PIPELINE,
        &ONE_INPUT_LAYOUT,
        params,
        &[as_bytes(&values)],
        d * d,
        groups_1d(d * d),
    )
    .ok()?;
    Some(Buffer::new(Shape::from(vec![d, d]), widen(&out)))
}

/// Banded diagonal extraction on the GPU.
pub fn gpu_diagonal_band(input: &Buffer, below: usize, above: usize) -> Option<Buffer> {
    if !gpu_available() {
        return None;
    }
    let shape = input.shape();
    assert_eq!(shape.rank(), 2, "diagonal extraction requires a matrix, got {shape}");
    let (rows, cols) = (shape[0], shape[1]);
    let d = rows.min(cols);
    let bands = below + above + 1;
    let count = bands * d;
    if count == 0 {
        return None;
    }

    let values = narrow(input.as_slice());
    let params = KernelParams::new()
        .words_a([count as u32, d as u32, rows as u32, cols as u32])
        .words_b([below as u32, above as u32, 0, 0]);
    let out = run_kernel(
        &DIAG_BAND_EXTRACT_PIPELINE,
        &ONE_INPUT_LAYOUT,
        params,
        &[as_bytes(&values)],
        count,
        groups_1d(count),
    )
    .ok()?;
    Some(Buffer::new(Shape::from(vec![bands, d]), widen(&out)))
}

/// Banded diagonal insertion on the GPU.
pub fn gpu_diagonal_band_matrix(input: &Buffer, below: usize, above: usize) -> Option<Buffer> {
    if !gpu_available() {
        return None;
    }
    let shape = input.shape();
    assert_eq!(shape.rank(), 2, "diagonal insertion requires banded input, got {shape}");
    let bands = below + above + 1;
    assert_eq!(
        shape[0], bands,
        "banded input {shape} does not match band widths ({below}, {above})"
    );
    let d = shape[1];
    if d == 0 {
        return None;
    }

    let values = narrow(input.as_slice());
    let params = KernelParams::new()
        .words_a([(d * d) as u32, d as u32, 0, 0])
        .words_b([below as u32, above as u32, 0, 0]);
    let out = run_kernel(
        &DIAG_BAND_INSERT_PIPELINE,
        &ONE_INPUT_LAYOUT,
        params,
        &[as_bytes(&values)],
        d * d,
        groups_1d(d * d),
    )
    .ok()?;
    Some(Buffer::new(Shape::from(vec![d, d]), widen(&out)))
}

/// Diagonal band mask on the GPU. Negative bounds leave that side unbounded,
/// encoded as bit-cast i32s in the parameter block.
pub fn gpu_band_mask(input: &Buffer, below: i64, above: i64) -> Option<Buffer> {
    if !gpu_available() {
        return None;
    }
    let shape = input.shape();
    assert_eq!(shape.rank(), 2, "band mask requires a matrix, got {shape}");
    let count = input.count();
    if count == 0 {
        return None;
    }

    let values = narrow(input.as_slice());
    let params = KernelParams::new()
        .words_a([count as u32, shape[0] as u32, shape[1] as u32, 0])
        .words_b([below as i32 as u32, above as i32 as u32, 0, 0]);
    let out = run_kernel(
        &BAND_MASK_PIPELINE,
        &ONE_INPUT_LAYOUT,
        params,
        &[as_bytes(&values)],
        count,
        groups_1d(count),
    )
    .ok()?;
    Some(Buffer::new(shape.clone(), widen(&out)))
}
