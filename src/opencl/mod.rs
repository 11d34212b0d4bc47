//! OpenCL backend for the pyramid benchmark.
//!
//! [`ClBackend`] owns the device, context and two in-order command
//! queues and exposes the handful of primitives the pyramid code needs:
//! program compilation, kernel enqueue with a work shape and a wait
//! list, image/buffer allocation and host↔device transfers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │ Controller   │──▶│ FilterEngine │──▶│ ClBackend        │
//! │ images/cubes │   │ (x and y)    │   │ queues, program, │
//! │ /buffer      │   │ Surface args │   │ memory objects   │
//! └──────────────┘   └──────────────┘   └──────────────────┘
//! ```
//!
//! # Feature Gate
//!
//! This module is only available when compiled with the `opencl` feature:
//! ```bash
//! cargo build --features opencl
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! # #[cfg(feature = "opencl")]
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use std::rc::Rc;
//! use pyrcl::controller::PyramidController;
//! use pyrcl::host_image::HostImage;
//! use pyrcl::method::Method;
//! use pyrcl::opencl::{ClBackend, ImagesController};
//!
//! let backend = Rc::new(ClBackend::new()?);
//! let mut controller = ImagesController::new(backend);
//! controller.init(&HostImage::synthetic(640, 480))?;
//! controller.set_configuration(Method::SingleLocal, 2)?;
//! println!("{:?}", controller.run_method()?);
//! # Ok(())
//! # }
//! ```

use crate::{PyrError, PyrResult};

use opencl3::command_queue::{CommandQueue, CL_QUEUE_PROFILING_ENABLE};
use opencl3::context::Context;
use opencl3::device::{get_all_devices, Device, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_GPU};
use opencl3::error_codes::ClError;
use opencl3::event::Event;
use opencl3::kernel::{ExecuteKernel, Kernel};
use opencl3::memory::{
    Buffer, ClMem, Image, CL_FLOAT, CL_MEM_OBJECT_IMAGE2D, CL_MEM_OBJECT_IMAGE2D_ARRAY,
    CL_MEM_READ_WRITE, CL_R,
};
use opencl3::program::Program;
use opencl3::types::{
    cl_device_type, cl_image_desc, cl_image_format, cl_int, cl_mem, CL_BLOCKING,
};

use std::ffi::c_void;
use std::ptr;

use crate::controller::Layout;
use crate::filter::TILE;

/// Minimal program compiled on each candidate device to reject drivers
/// that create contexts but cannot build OpenCL C 2.0.
const SMOKE_TEST_SOURCE: &str = "kernel void smoke(read_write image2d_t img) { }";

/// Which of the two command queues a launch goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueId {
    #[default]
    Primary,
    Secondary,
}

/// One positional kernel argument.
#[derive(Debug, Clone, Copy)]
pub enum KernelArg {
    /// Buffer or image handle.
    Mem(cl_mem),
    Int(cl_int),
}

/// Global work shape of a launch, 2D or 3D, with an optional offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkShape {
    pub global: [usize; 3],
    pub offset: [usize; 3],
    pub dims: usize,
}

impl WorkShape {
    /// `(cols, rows)`.
    pub fn d2(cols: usize, rows: usize) -> Self {
        Self {
            global: [cols, rows, 1],
            offset: [0; 3],
            dims: 2,
        }
    }

    /// `(cols, rows, depth)` starting at slice `z_offset`.
    pub fn d3(cols: usize, rows: usize, depth: usize, z_offset: usize) -> Self {
        Self {
            global: [cols, rows, depth],
            offset: [0, 0, z_offset],
            dims: 3,
        }
    }

    pub fn cols(&self) -> usize {
        self.global[0]
    }

    pub fn rows(&self) -> usize {
        self.global[1]
    }

    /// The 16×16 tile, with depth 1 for 3D shapes.
    pub fn tile(&self) -> [usize; 3] {
        [TILE, TILE, 1]
    }
}

/// Information about a discovered OpenCL device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Human-readable device name.
    pub name: String,
    pub vendor: String,
    /// Whether this is a GPU device (vs CPU or accelerator).
    pub is_gpu: bool,
    pub max_work_group_size: usize,
    /// Global memory size in bytes.
    pub global_mem_size: u64,
}

/// Probe all available OpenCL devices without creating a backend.
///
/// Returns an empty vec if no OpenCL runtime is installed.
pub fn probe_devices() -> Vec<DeviceInfo> {
    let device_ids = match get_all_devices(CL_DEVICE_TYPE_ALL) {
        Ok(ids) => ids,
        Err(_) => return Vec::new(),
    };

    device_ids
        .into_iter()
        .map(|id| {
            let dev = Device::new(id);
            let dev_type: cl_device_type = dev.dev_type().unwrap_or(0);
            DeviceInfo {
                name: dev.name().unwrap_or_default().trim().to_string(),
                vendor: dev.vendor().unwrap_or_default().trim().to_string(),
                is_gpu: (dev_type & CL_DEVICE_TYPE_GPU) != 0,
                max_work_group_size: dev.max_work_group_size().unwrap_or(1),
                global_mem_size: dev.global_mem_size().unwrap_or(0),
            }
        })
        .collect()
}

/// Return the number of available OpenCL devices, 0 without a runtime.
pub fn device_count() -> usize {
    get_all_devices(CL_DEVICE_TYPE_ALL)
        .map(|ids| ids.len())
        .unwrap_or(0)
}

/// Map an opencl3 error to [`PyrError::Backend`], logging the code.
pub(crate) fn cl_err(op: &'static str) -> impl FnOnce(ClError) -> PyrError {
    move |e| {
        log::error!("{op} failed: {e}");
        PyrError::Backend { op, code: e.0 }
    }
}

/// Device, context and the two command queues.
///
/// Note: `Debug` is implemented manually because the OpenCL handle
/// types from `opencl3` don't implement `Debug`.
pub struct ClBackend {
    _device: Device,
    context: Context,
    primary: CommandQueue,
    secondary: CommandQueue,
    device_name: String,
    max_work_group_size: usize,
    profiling: bool,
}

impl std::fmt::Debug for ClBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClBackend")
            .field("device_name", &self.device_name)
            .field("max_work_group_size", &self.max_work_group_size)
            .field("profiling", &self.profiling)
            .finish_non_exhaustive()
    }
}

impl ClBackend {
    /// Select the best available GPU (falling back to any device).
    pub fn new() -> PyrResult<Self> {
        Self::create(true, false)
    }

    /// Explicit GPU preference and queue profiling.
    ///
    /// With profiling on, `CL_QUEUE_PROFILING_ENABLE` is set on both
    /// queues and [`ClBackend::profile_event`] logs device times.
    pub fn with_options(prefer_gpu: bool, profiling: bool) -> PyrResult<Self> {
        Self::create(prefer_gpu, profiling)
    }

    fn create(prefer_gpu: bool, profiling: bool) -> PyrResult<Self> {
        let all_ids = get_all_devices(CL_DEVICE_TYPE_ALL).map_err(|_| PyrError::Unsupported)?;
        if all_ids.is_empty() {
            return Err(PyrError::Unsupported);
        }

        // Discrete GPUs report the most global memory; try those first.
        let gpu_ids = if prefer_gpu {
            let mut ids = get_all_devices(CL_DEVICE_TYPE_GPU).unwrap_or_default();
            ids.sort_by(|a, b| {
                let mem_a = Device::new(*a).global_mem_size().unwrap_or(0);
                let mem_b = Device::new(*b).global_mem_size().unwrap_or(0);
                mem_b.cmp(&mem_a)
            });
            ids
        } else {
            Vec::new()
        };

        let mut candidates = gpu_ids;
        for id in all_ids {
            if !candidates.contains(&id) {
                candidates.push(id);
            }
        }

        let queue_props = if profiling {
            CL_QUEUE_PROFILING_ENABLE
        } else {
            0
        };

        for &id in &candidates {
            let dev = Device::new(id);
            let name = dev.name().unwrap_or_default().trim().to_string();
            let Ok(context) = Context::from_device(&dev) else {
                log::debug!("{name}: context creation failed");
                continue;
            };
            #[allow(deprecated)]
            let Ok(primary) = CommandQueue::create_default(&context, queue_props) else {
                continue;
            };
            #[allow(deprecated)]
            let Ok(secondary) = CommandQueue::create_default(&context, queue_props) else {
                continue;
            };
            if Program::create_and_build_from_source(&context, SMOKE_TEST_SOURCE, program::BUILD_OPTIONS)
                .is_err()
            {
                log::debug!("{name}: no OpenCL C 2.0 support, skipping");
                continue;
            }

            let max_work_group_size = dev.max_work_group_size().unwrap_or(1);
            log::info!("using OpenCL device {name} (max work-group {max_work_group_size})");
            return Ok(Self {
                _device: dev,
                context,
                primary,
                secondary,
                device_name: name,
                max_work_group_size,
                profiling,
            });
        }
        Err(PyrError::Unsupported)
    }

    /// Return the name of the selected compute device.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn max_work_group_size(&self) -> usize {
        self.max_work_group_size
    }

    /// Whether profiling is enabled on the queues.
    pub fn profiling(&self) -> bool {
        self.profiling
    }

    pub fn queue(&self, id: QueueId) -> &CommandQueue {
        match id {
            QueueId::Primary => &self.primary,
            QueueId::Secondary => &self.secondary,
        }
    }

    /// Compile the program for `layout`. Compiler diagnostics are logged
    /// line by line and returned in [`PyrError::BuildFailure`].
    pub fn compile_program(&self, layout: Layout, debug: bool) -> PyrResult<program::ClProgram> {
        let source = program::program_source(layout)?;
        let options = program::build_options(debug);
        log::debug!("building {} with '{options}'", layout.kernel_file());
        let program = Program::create_and_build_from_source(&self.context, &source, &options)
            .map_err(|log| {
                for line in log.lines().filter(|l| !l.trim().is_empty()) {
                    log::error!("{}: {line}", layout.kernel_file());
                }
                PyrError::BuildFailure { log }
            })?;
        Ok(program::ClProgram::new(program, layout))
    }

    /// Enqueue `kernel` with positional `args` over `shape`. With `tiled`
    /// the launch uses a 16×16 work-group. The launch waits on every
    /// event in `wait`.
    pub fn enqueue(
        &self,
        queue: QueueId,
        kernel: &Kernel,
        args: &[KernelArg],
        shape: &WorkShape,
        tiled: bool,
        wait: &[Event],
    ) -> PyrResult<Event> {
        let expected = kernel.num_args().map_err(cl_err("clGetKernelInfo"))? as usize;
        crate::contract!(
            args.len() == expected,
            "kernel expects {expected} arguments, got {}",
            args.len()
        );
        let dims = shape.dims;
        let tile = shape.tile();
        // SAFETY: every Mem argument is a live buffer or image owned by
        // the caller for at least the duration of this call; the runtime
        // retains it for the enqueued command.
        unsafe {
            let mut exec = ExecuteKernel::new(kernel);
            for arg in args {
                match arg {
                    KernelArg::Mem(mem) => exec.set_arg(mem),
                    KernelArg::Int(value) => exec.set_arg(value),
                };
            }
            exec.set_global_work_sizes(&shape.global[..dims]);
            if shape.offset.iter().any(|&o| o != 0) {
                exec.set_global_work_offsets(&shape.offset[..dims]);
            }
            if tiled {
                exec.set_local_work_sizes(&tile[..dims]);
            }
            for evt in wait {
                exec.set_wait_event(evt);
            }
            exec.enqueue_nd_range(self.queue(queue))
                .map_err(cl_err("clEnqueueNDRangeKernel"))
        }
    }

    /// Uninitialised device buffer of `len` elements.
    pub fn alloc_buffer<T>(&self, len: usize) -> PyrResult<Buffer<T>> {
        // SAFETY: no host pointer is passed.
        unsafe {
            Buffer::<T>::create(&self.context, CL_MEM_READ_WRITE, len.max(1), ptr::null_mut())
                .map_err(cl_err("clCreateBuffer"))
        }
    }

    /// Single-channel f32 2D image.
    pub fn alloc_image2d(&self, width: usize, height: usize) -> PyrResult<Image> {
        self.alloc_image(CL_MEM_OBJECT_IMAGE2D, width, height, 0)
    }

    /// Single-channel f32 2D image array with `depth` slices.
    pub fn alloc_image_array(&self, width: usize, height: usize, depth: usize) -> PyrResult<Image> {
        self.alloc_image(CL_MEM_OBJECT_IMAGE2D_ARRAY, width, height, depth)
    }

    fn alloc_image(
        &self,
        image_type: u32,
        width: usize,
        height: usize,
        array_size: usize,
    ) -> PyrResult<Image> {
        let format = cl_image_format {
            image_channel_order: CL_R,
            image_channel_data_type: CL_FLOAT,
        };
        let desc = cl_image_desc {
            image_type,
            image_width: width,
            image_height: height,
            image_depth: 0,
            image_array_size: array_size,
            image_row_pitch: 0,
            image_slice_pitch: 0,
            num_mip_levels: 0,
            num_samples: 0,
            buffer: ptr::null_mut(),
        };
        // SAFETY: format and desc outlive the call; no host pointer.
        unsafe {
            Image::create(
                &self.context,
                CL_MEM_READ_WRITE,
                &format,
                &desc,
                ptr::null_mut(),
            )
            .map_err(cl_err("clCreateImage"))
        }
    }

    /// Blocking upload of `data` into `buffer` at element `offset`.
    pub fn write_buffer<T>(
        &self,
        queue: QueueId,
        buffer: &mut Buffer<T>,
        offset: usize,
        data: &[T],
    ) -> PyrResult<Event> {
        // SAFETY: blocking write, so `data` outlives the transfer.
        unsafe {
            self.queue(queue)
                .enqueue_write_buffer(
                    buffer,
                    CL_BLOCKING,
                    offset * std::mem::size_of::<T>(),
                    data,
                    &[],
                )
                .map_err(cl_err("clEnqueueWriteBuffer"))
        }
    }

    /// Blocking read of `len` elements starting at element `offset`.
    pub fn read_buffer<T: Clone + Default>(
        &self,
        queue: QueueId,
        buffer: &Buffer<T>,
        offset: usize,
        len: usize,
    ) -> PyrResult<Vec<T>> {
        let mut out = vec![T::default(); len];
        // SAFETY: blocking read into a host slice of exactly `len` elements.
        unsafe {
            self.queue(queue)
                .enqueue_read_buffer(
                    buffer,
                    CL_BLOCKING,
                    offset * std::mem::size_of::<T>(),
                    &mut out,
                    &[],
                )
                .map_err(cl_err("clEnqueueReadBuffer"))?;
        }
        Ok(out)
    }

    /// Blocking upload of `data` (`width × height`, row-major) into slice
    /// `slice` of a 2D image (`slice` 0) or image array.
    pub fn write_image(
        &self,
        queue: QueueId,
        image: &mut Image,
        slice: usize,
        width: usize,
        height: usize,
        data: &[f32],
    ) -> PyrResult<Event> {
        crate::contract!(
            data.len() == width * height,
            "image upload of {} pixels into {width}x{height}",
            data.len()
        );
        let origin = [0usize, 0, slice];
        let region = [width, height, 1];
        // SAFETY: blocking write; `data` covers the full region.
        unsafe {
            self.queue(queue)
                .enqueue_write_image(
                    image,
                    CL_BLOCKING,
                    origin.as_ptr(),
                    region.as_ptr(),
                    0,
                    0,
                    data.as_ptr() as *mut c_void,
                    &[],
                )
                .map_err(cl_err("clEnqueueWriteImage"))
        }
    }

    /// Blocking read of slice `slice` of a 2D image or image array.
    pub fn read_image(
        &self,
        queue: QueueId,
        image: &Image,
        slice: usize,
        width: usize,
        height: usize,
    ) -> PyrResult<Vec<f32>> {
        let mut out = vec![0.0f32; width * height];
        let origin = [0usize, 0, slice];
        let region = [width, height, 1];
        // SAFETY: blocking read; `out` covers the full region.
        unsafe {
            self.queue(queue)
                .enqueue_read_image(
                    image,
                    CL_BLOCKING,
                    origin.as_ptr(),
                    region.as_ptr(),
                    0,
                    0,
                    out.as_mut_ptr() as *mut c_void,
                    &[],
                )
                .map_err(cl_err("clEnqueueReadImage"))?;
        }
        Ok(out)
    }

    /// Device-side copy of a whole 2D image, after `wait`.
    pub fn copy_image(
        &self,
        queue: QueueId,
        src: &Image,
        dst: &mut Image,
        width: usize,
        height: usize,
        wait: &[Event],
    ) -> PyrResult<Event> {
        let origin = [0usize; 3];
        let region = [width, height, 1];
        let wait_list: Vec<_> = wait.iter().map(|e| e.get()).collect();
        // SAFETY: both images are live for the call; the runtime retains them.
        unsafe {
            self.queue(queue)
                .enqueue_copy_image(
                    src,
                    dst,
                    origin.as_ptr(),
                    origin.as_ptr(),
                    region.as_ptr(),
                    &wait_list,
                )
                .map_err(cl_err("clEnqueueCopyImage"))
        }
    }

    /// Block until everything enqueued on `queue` has completed.
    pub fn finish(&self, queue: QueueId) -> PyrResult<()> {
        self.queue(queue).finish().map_err(cl_err("clFinish"))
    }

    /// [`ClBackend::finish`] on both queues.
    pub fn finish_all(&self) -> PyrResult<()> {
        self.finish(QueueId::Primary)?;
        self.finish(QueueId::Secondary)
    }

    /// Elapsed device time in milliseconds of a completed event.
    ///
    /// `None` when profiling is disabled or the event has no timing data.
    pub fn event_elapsed_ms(event: &Event) -> Option<f64> {
        let start = event.profiling_command_start().ok()?;
        let end = event.profiling_command_end().ok()?;
        Some((end - start) as f64 / 1_000_000.0)
    }

    /// Log the device time of `event` when profiling is enabled. Blocks
    /// until the event completes.
    pub fn profile_event(&self, label: &str, event: &Event) {
        if self.profiling && event.wait().is_ok() {
            if let Some(ms) = Self::event_elapsed_ms(event) {
                log::debug!("[pyrcl-gpu] {label}: {ms:.3} ms");
            }
        }
    }
}

/// Raw handle of a buffer or image for kernel arguments.
pub(crate) fn mem_of<M: ClMem>(m: &M) -> cl_mem {
    m.get()
}

mod cubes;
mod engine;
mod flat;
mod images;
pub mod program;
mod surface;

pub use cubes::CubesController;
pub use engine::FilterEngine;
pub use flat::FlatController;
pub use images::ImagesController;
pub use surface::{
    CubeSurface, FlatSurface, ImageSurface, ScratchKey, ScratchPool, StorageKind, Surface,
};

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
