//! Filter dispatch engine.
//!
//! A [`FilterEngine`] holds the coefficients of one derivative axis (and
//! of the second axis for double methods), picks the entry point for a
//! method and kernel shape and binds its positional arguments:
//!
//! ```text
//! filter_single[_local]            handles, filter, rowsHalf, cols, colsHalf, border
//! filter_single[_local]_{R}x{C}    handles, filter, border
//! filter_double[_local]            handles, filter1, filter2, rowsHalf, cols, colsHalf, border
//! filter_double[_local]_{R}x{C}    handles, filter1, filter2, border
//! filter_single[_local]_{G}_{N}xN  handles, border
//! filter_double[_local]_GxGy_{N}xN handles, border
//! ```
//!
//! where *handles* are the source arguments of the input surface
//! followed by one argument per output surface.

use std::rc::Rc;

use super::program::ClProgram;
use super::surface::{ScratchPool, ScratchSurface, StorageKind, Surface};
use super::*;
use crate::contract;
use crate::derivative::{DerivativeKernels, GX, GXGY, GY};
use crate::filter::{BorderMode, FilterKernel, SeparableKernel, UNROLLED_SIZES};
use crate::method::Method;
use crate::pyramid::LookupEntry;

/// A kernel and its coefficients on the device.
struct Coefficients {
    kernel: FilterKernel,
    buffer: Buffer<f32>,
}

struct SeparableCoefficients {
    pair: SeparableKernel,
    a: Coefficients,
    b: Coefficients,
}

impl SeparableCoefficients {
    fn vertical(&self) -> &Coefficients {
        if self.pair.a().cols() == 1 {
            &self.a
        } else {
            &self.b
        }
    }

    fn horizontal(&self) -> &Coefficients {
        if self.pair.a().rows() == 1 {
            &self.a
        } else {
            &self.b
        }
    }
}

/// A validated launch, ready to enqueue.
struct Launch {
    name: String,
    args: Vec<KernelArg>,
    shape: WorkShape,
    tiled: bool,
}

/// Issues filter and pyramid-construction launches on one queue.
///
/// Dependencies added with [`FilterEngine::add_dependency`] are waited
/// on by the first launch of the next operation and then dropped. An
/// operation rejected before enqueueing leaves them pending.
pub struct FilterEngine {
    backend: Rc<ClBackend>,
    program: Rc<ClProgram>,
    kernel1: Option<Coefficients>,
    kernel2: Option<Coefficients>,
    separation1: Option<SeparableCoefficients>,
    separation2: Option<SeparableCoefficients>,
    border: BorderMode,
    queue: QueueId,
    deps: Vec<Event>,
    scratch: ScratchPool,
}

impl std::fmt::Debug for FilterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterEngine")
            .field("layout", &self.program.layout())
            .field("border", &self.border)
            .field("queue", &self.queue)
            .field("pending_dependencies", &self.deps.len())
            .field("scratch", &self.scratch)
            .finish_non_exhaustive()
    }
}

impl FilterEngine {
    pub fn new(backend: Rc<ClBackend>, program: Rc<ClProgram>) -> Self {
        Self {
            backend,
            program,
            kernel1: None,
            kernel2: None,
            separation1: None,
            separation2: None,
            border: BorderMode::default(),
            queue: QueueId::Primary,
            deps: Vec::new(),
            scratch: ScratchPool::default(),
        }
    }

    pub fn backend(&self) -> &ClBackend {
        &self.backend
    }

    pub fn border(&self) -> BorderMode {
        self.border
    }

    pub fn set_border(&mut self, border: BorderMode) {
        self.border = border;
    }

    pub fn queue(&self) -> QueueId {
        self.queue
    }

    /// Route later launches to `queue`. Ordering against work on the
    /// other queue is only kept through explicit dependencies.
    pub fn set_queue(&mut self, queue: QueueId) {
        self.queue = queue;
    }

    /// Kernel for single methods and the first axis of double methods.
    pub fn set_kernel1(&mut self, kernel: &FilterKernel) -> PyrResult<()> {
        self.kernel1 = Some(self.upload(kernel)?);
        Ok(())
    }

    /// Second axis of double methods.
    pub fn set_kernel2(&mut self, kernel: &FilterKernel) -> PyrResult<()> {
        self.kernel2 = Some(self.upload(kernel)?);
        Ok(())
    }

    pub fn set_separation1(&mut self, pair: &SeparableKernel) -> PyrResult<()> {
        self.separation1 = Some(self.upload_pair(pair)?);
        Ok(())
    }

    pub fn set_separation2(&mut self, pair: &SeparableKernel) -> PyrResult<()> {
        self.separation2 = Some(self.upload_pair(pair)?);
        Ok(())
    }

    pub fn add_dependency(&mut self, event: Event) {
        self.deps.push(event);
    }

    pub fn pending_dependencies(&self) -> usize {
        self.deps.len()
    }

    /// Remove and return the pending dependencies.
    pub fn take_dependencies(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.deps)
    }

    pub fn scratch(&self) -> &ScratchPool {
        &self.scratch
    }

    fn upload(&self, kernel: &FilterKernel) -> PyrResult<Coefficients> {
        let mut buffer = self.backend.alloc_buffer::<f32>(kernel.len())?;
        self.backend
            .write_buffer(self.queue, &mut buffer, 0, kernel.coefficients())?;
        Ok(Coefficients {
            kernel: kernel.clone(),
            buffer,
        })
    }

    fn upload_pair(&self, pair: &SeparableKernel) -> PyrResult<SeparableCoefficients> {
        Ok(SeparableCoefficients {
            pair: pair.clone(),
            a: self.upload(pair.a())?,
            b: self.upload(pair.b())?,
        })
    }

    fn border_arg(&self) -> KernelArg {
        KernelArg::Int(self.border.as_raw())
    }

    fn kernel1(&self) -> PyrResult<&Coefficients> {
        self.kernel1
            .as_ref()
            .ok_or_else(|| PyrError::Contract("no kernel bound in slot 1".into()))
    }

    fn kernel2(&self) -> PyrResult<&Coefficients> {
        self.kernel2
            .as_ref()
            .ok_or_else(|| PyrError::Contract("no kernel bound in slot 2".into()))
    }

    fn separation1(&self) -> PyrResult<&SeparableCoefficients> {
        self.separation1
            .as_ref()
            .ok_or_else(|| PyrError::Contract("no separable pair bound in slot 1".into()))
    }

    fn separation2(&self) -> PyrResult<&SeparableCoefficients> {
        self.separation2
            .as_ref()
            .ok_or_else(|| PyrError::Contract("no separable pair bound in slot 2".into()))
    }

    /// Enqueue `launch` after `wait`.
    fn submit(&self, launch: &Launch, wait: &[Event]) -> PyrResult<Event> {
        let kernel = self.program.kernel(&launch.name)?;
        let event = self.backend.enqueue(
            self.queue,
            &kernel,
            &launch.args,
            &launch.shape,
            launch.tiled,
            wait,
        )?;
        self.backend.profile_event(&launch.name, &event);
        Ok(event)
    }

    /// Enqueue `launch` after the pending dependencies. They are dropped
    /// only once the launch is on the queue.
    fn submit_after_dependencies(&mut self, launch: &Launch) -> PyrResult<Event> {
        let mut wait = self.take_dependencies();
        match self.submit(launch, &wait) {
            Ok(event) => Ok(event),
            Err(e) => {
                wait.append(&mut self.deps);
                self.deps = wait;
                Err(e)
            }
        }
    }

    /// One complete kernel from `src` into `dst`.
    fn single_launch(
        &self,
        c: &Coefficients,
        src: &dyn Surface,
        dst: &dyn Surface,
        tiled: bool,
    ) -> PyrResult<Launch> {
        let k = &c.kernel;
        if tiled {
            check_local_tile(k)?;
        }
        let base = if tiled {
            "filter_single_local"
        } else {
            "filter_single"
        };
        let mut args = src.source_args();
        args.push(dst.destination_arg());
        args.push(KernelArg::Mem(mem_of(&c.buffer)));
        let name = if k.is_unrolled() || k.is_unrolled_vector() {
            format!("{base}_{}", k.size_name())
        } else {
            args.extend(extent_args(k));
            base.to_string()
        };
        args.push(self.border_arg());
        Ok(Launch {
            name,
            args,
            shape: dst.work_shape(),
            tiled,
        })
    }

    /// Two kernels of one shape sharing every source load.
    fn double_launch(
        &self,
        c1: &Coefficients,
        c2: &Coefficients,
        src: &dyn Surface,
        (dst1, dst2): (&dyn Surface, &dyn Surface),
        tiled: bool,
    ) -> PyrResult<Launch> {
        let (k1, k2) = (&c1.kernel, &c2.kernel);
        contract!(
            k1.rows() == k2.rows() && k1.cols() == k2.cols(),
            "double dispatch needs two kernels of one shape, got {} and {}",
            k1.size_name(),
            k2.size_name()
        );
        if tiled {
            check_local_tile(k1)?;
        }
        let base = if tiled {
            "filter_double_local"
        } else {
            "filter_double"
        };
        // Tiled double variants are only unrolled for squares.
        let unrolled = k1.is_unrolled() || (!tiled && k1.is_unrolled_vector());
        let mut args = src.source_args();
        args.push(dst1.destination_arg());
        args.push(dst2.destination_arg());
        args.push(KernelArg::Mem(mem_of(&c1.buffer)));
        args.push(KernelArg::Mem(mem_of(&c2.buffer)));
        let name = if unrolled {
            format!("{base}_{}", k1.size_name())
        } else {
            args.extend(extent_args(k1));
            base.to_string()
        };
        args.push(self.border_arg());
        Ok(Launch {
            name,
            args,
            shape: dst1.work_shape(),
            tiled,
        })
    }

    fn single(&mut self, src: &dyn Surface, dst: &dyn Surface, tiled: bool) -> PyrResult<Event> {
        check_same_shape(src, &[dst])?;
        let launch = self.single_launch(self.kernel1()?, src, dst, tiled)?;
        self.submit_after_dependencies(&launch)
    }

    /// `a` into a pooled temporary, then `b` into `dst`. The second
    /// pass waits only on the first.
    fn separation(
        &mut self,
        src: &dyn Surface,
        dst: &dyn Surface,
        tiled: bool,
    ) -> PyrResult<Event> {
        check_same_shape(src, &[dst])?;
        self.separation1()?;
        let tmp_mem = self.scratch.acquire(&self.backend, src.scratch_key(0))?;
        let tmp = ScratchSurface::like(src, tmp_mem, 0);
        let sep = self.separation1()?;
        let first = self.single_launch(&sep.a, src, &tmp, tiled)?;
        let second = self.single_launch(&sep.b, &tmp, dst, tiled)?;
        let event = self.submit_after_dependencies(&first)?;
        self.submit(&second, std::slice::from_ref(&event))
    }

    fn double(
        &mut self,
        src: &dyn Surface,
        dst1: &dyn Surface,
        dst2: &dyn Surface,
        tiled: bool,
    ) -> PyrResult<Event> {
        check_same_shape(src, &[dst1, dst2])?;
        let launch =
            self.double_launch(self.kernel1()?, self.kernel2()?, src, (dst1, dst2), tiled)?;
        self.submit_after_dependencies(&launch)
    }

    /// Untiled single launch with the slot 1 kernel. Uses the unrolled
    /// entry point for squares 3..9 and vectors, the generic one otherwise.
    pub fn run_single(&mut self, src: &dyn Surface, dst: &dyn Surface) -> PyrResult<Event> {
        self.single(src, dst, false)
    }

    /// [`FilterEngine::run_single`] with a 16×16 work-group.
    pub fn run_single_local(&mut self, src: &dyn Surface, dst: &dyn Surface) -> PyrResult<Event> {
        self.single(src, dst, true)
    }

    pub fn run_single_separation(
        &mut self,
        src: &dyn Surface,
        dst: &dyn Surface,
    ) -> PyrResult<Event> {
        self.separation(src, dst, false)
    }

    pub fn run_single_separation_local(
        &mut self,
        src: &dyn Surface,
        dst: &dyn Surface,
    ) -> PyrResult<Event> {
        self.separation(src, dst, true)
    }

    /// Both passes of the slot 1 pair in one tiled launch. 2D images only.
    pub fn run_single_local_one_pass(
        &mut self,
        src: &dyn Surface,
        dst: &dyn Surface,
    ) -> PyrResult<Event> {
        contract!(
            src.kind() == StorageKind::Image2d && dst.kind() == StorageKind::Image2d,
            "the fused separable pass is only exported for 2D images"
        );
        check_same_shape(src, &[dst])?;
        let sep = self.separation1()?;
        let (vertical, horizontal) = (sep.vertical(), sep.horizontal());
        let (n_v, n_h) = (vertical.kernel.len(), horizontal.kernel.len());
        contract!(
            n_v / 2 <= crate::filter::MAX_LOCAL_HALF && n_h / 2 <= crate::filter::MAX_LOCAL_HALF,
            "separable pair {n_v}/{n_h} does not fit the local tile"
        );
        let mut args = src.source_args();
        args.push(dst.destination_arg());
        args.push(KernelArg::Mem(mem_of(&vertical.buffer)));
        args.push(KernelArg::Mem(mem_of(&horizontal.buffer)));
        let name = if n_v == n_h && UNROLLED_SIZES.contains(&n_v) {
            format!("filter_single_local_onePass_{n_v}x{n_h}")
        } else {
            args.push(KernelArg::Int((n_v / 2) as cl_int));
            args.push(KernelArg::Int((n_h / 2) as cl_int));
            "filter_single_local_onePass".to_string()
        };
        args.push(self.border_arg());
        let launch = Launch {
            name,
            args,
            shape: dst.work_shape(),
            tiled: true,
        };
        self.submit_after_dependencies(&launch)
    }

    /// Slot 1 into `dst1` and slot 2 into `dst2` in one launch.
    pub fn run_double(
        &mut self,
        src: &dyn Surface,
        dst1: &dyn Surface,
        dst2: &dyn Surface,
    ) -> PyrResult<Event> {
        self.double(src, dst1, dst2, false)
    }

    pub fn run_double_local(
        &mut self,
        src: &dyn Surface,
        dst1: &dyn Surface,
        dst2: &dyn Surface,
    ) -> PyrResult<Event> {
        self.double(src, dst1, dst2, true)
    }

    /// Both `a` operands in one double launch into two temporaries, then
    /// each `b` operand in its own single launch. The returned event
    /// completes after both outputs are written.
    pub fn run_double_separation(
        &mut self,
        src: &dyn Surface,
        dst1: &dyn Surface,
        dst2: &dyn Surface,
    ) -> PyrResult<Event> {
        check_same_shape(src, &[dst1, dst2])?;
        self.separation1()?;
        self.separation2()?;
        let mem1 = self.scratch.acquire(&self.backend, src.scratch_key(0))?;
        let mem2 = self.scratch.acquire(&self.backend, src.scratch_key(1))?;
        let tmp1 = ScratchSurface::like(src, mem1, 0);
        let tmp2 = ScratchSurface::like(src, mem2, 1);
        let (sep1, sep2) = (self.separation1()?, self.separation2()?);
        let temps = (&tmp1 as &dyn Surface, &tmp2 as &dyn Surface);
        let first = self.double_launch(&sep1.a, &sep2.a, src, temps, false)?;
        let second_x = self.single_launch(&sep1.b, &tmp1, dst1, false)?;
        let second_y = self.single_launch(&sep2.b, &tmp2, dst2, false)?;

        let first = self.submit_after_dependencies(&first)?;
        let x_done = self.submit(&second_x, std::slice::from_ref(&first))?;
        self.submit(&second_y, &[first, x_done])
    }

    fn predefined_single(
        &mut self,
        src: &dyn Surface,
        dst: &dyn Surface,
        name: &str,
        size: usize,
        tiled: bool,
    ) -> PyrResult<Event> {
        contract!(
            name == GX || name == GY,
            "no predefined single kernel named '{name}'"
        );
        check_predefined_size(size)?;
        check_same_shape(src, &[dst])?;
        let base = if tiled {
            "filter_single_local"
        } else {
            "filter_single"
        };
        let mut args = src.source_args();
        args.push(dst.destination_arg());
        args.push(self.border_arg());
        let launch = Launch {
            name: format!("{base}_{name}_{size}x{size}"),
            args,
            shape: dst.work_shape(),
            tiled,
        };
        self.submit_after_dependencies(&launch)
    }

    fn predefined_double(
        &mut self,
        src: &dyn Surface,
        dst1: &dyn Surface,
        dst2: &dyn Surface,
        size: usize,
        tiled: bool,
    ) -> PyrResult<Event> {
        check_predefined_size(size)?;
        check_same_shape(src, &[dst1, dst2])?;
        let base = if tiled {
            "filter_double_local"
        } else {
            "filter_double"
        };
        let mut args = src.source_args();
        args.push(dst1.destination_arg());
        args.push(dst2.destination_arg());
        args.push(self.border_arg());
        let launch = Launch {
            name: format!("{base}_{GXGY}_{size}x{size}"),
            args,
            shape: dst1.work_shape(),
            tiled,
        };
        self.submit_after_dependencies(&launch)
    }

    /// Baked-in `name` (`Gx` or `Gy`) kernel of edge `size`.
    pub fn run_single_predefined(
        &mut self,
        src: &dyn Surface,
        dst: &dyn Surface,
        name: &str,
        size: usize,
    ) -> PyrResult<Event> {
        self.predefined_single(src, dst, name, size, false)
    }

    pub fn run_single_predefined_local(
        &mut self,
        src: &dyn Surface,
        dst: &dyn Surface,
        name: &str,
        size: usize,
    ) -> PyrResult<Event> {
        self.predefined_single(src, dst, name, size, true)
    }

    /// Baked-in Gx into `dst1` and Gy into `dst2`.
    pub fn run_double_predefined(
        &mut self,
        src: &dyn Surface,
        dst1: &dyn Surface,
        dst2: &dyn Surface,
        size: usize,
    ) -> PyrResult<Event> {
        self.predefined_double(src, dst1, dst2, size, false)
    }

    pub fn run_double_predefined_local(
        &mut self,
        src: &dyn Surface,
        dst1: &dyn Surface,
        dst2: &dyn Surface,
        size: usize,
    ) -> PyrResult<Event> {
        self.predefined_double(src, dst1, dst2, size, true)
    }

    fn structural(&mut self, name: &str, args: Vec<KernelArg>, shape: WorkShape) -> PyrResult<Event> {
        contract!(
            shape.cols() > 0 && shape.rows() > 0,
            "{name} over an empty level"
        );
        let launch = Launch {
            name: name.to_string(),
            args,
            shape,
            tiled: false,
        };
        self.submit_after_dependencies(&launch)
    }

    /// 2×2 average into `dst` of `size`. For 2D images `src` is the
    /// previous level; for image arrays the last slice of the previous
    /// cube is read and slice 0 of `dst` written.
    pub fn run_halfsample_image(
        &mut self,
        src: &Image,
        dst: &Image,
        (width, height): (usize, usize),
    ) -> PyrResult<Event> {
        self.structural(
            "fed_resize",
            vec![KernelArg::Mem(mem_of(src)), KernelArg::Mem(mem_of(dst))],
            WorkShape::d2(width, height),
        )
    }

    /// Level `src_level` of a flat pyramid into level `src_level + 1`,
    /// which has `size`.
    pub fn run_halfsample_flat(
        &mut self,
        buffer: &Buffer<f32>,
        lookup: &Buffer<LookupEntry>,
        src_level: usize,
        (width, height): (usize, usize),
    ) -> PyrResult<Event> {
        self.structural(
            "fed_resize",
            vec![
                KernelArg::Mem(mem_of(buffer)),
                KernelArg::Mem(mem_of(lookup)),
                KernelArg::Int(src_level as cl_int),
            ],
            WorkShape::d2(width, height),
        )
    }

    /// Slice 0 of `cube` into every other slice.
    pub fn run_copy_inside_cube(
        &mut self,
        cube: &Image,
        (width, height): (usize, usize),
    ) -> PyrResult<Event> {
        self.structural(
            "copy_inside_cube",
            vec![KernelArg::Mem(mem_of(cube))],
            WorkShape::d3(
                width,
                height,
                crate::pyramid::LEVELS_PER_OCTAVE - 1,
                1,
            ),
        )
    }

    /// Level `base` of a flat pyramid into the rest of its octave.
    pub fn run_copy_inside_flat(
        &mut self,
        buffer: &Buffer<f32>,
        lookup: &Buffer<LookupEntry>,
        base: usize,
        (width, height): (usize, usize),
    ) -> PyrResult<Event> {
        self.structural(
            "copy_inside_cube",
            vec![
                KernelArg::Mem(mem_of(buffer)),
                KernelArg::Mem(mem_of(lookup)),
                KernelArg::Int(base as cl_int),
            ],
            WorkShape::d3(
                width,
                height,
                crate::pyramid::LEVELS_PER_OCTAVE - 1,
                base + 1,
            ),
        )
    }
}

fn extent_args(k: &FilterKernel) -> [KernelArg; 3] {
    [
        KernelArg::Int(k.rows_half() as cl_int),
        KernelArg::Int(k.cols() as cl_int),
        KernelArg::Int(k.cols_half() as cl_int),
    ]
}

fn check_local_tile(k: &FilterKernel) -> PyrResult<()> {
    contract!(
        k.fits_local_tile(),
        "{} kernel does not fit the local tile",
        k.size_name()
    );
    Ok(())
}

fn check_predefined_size(size: usize) -> PyrResult<()> {
    contract!(
        UNROLLED_SIZES.contains(&size),
        "no predefined kernels of size {size}"
    );
    Ok(())
}

fn check_same_shape(src: &dyn Surface, dsts: &[&dyn Surface]) -> PyrResult<()> {
    let shape = src.work_shape();
    for dst in dsts {
        contract!(
            dst.kind() == src.kind() && dst.work_shape() == shape,
            "destination {:?} {:?} does not match source {:?} {:?}",
            dst.kind(),
            dst.work_shape().global,
            src.kind(),
            shape.global
        );
    }
    Ok(())
}

/// The x and y engines of one controller, sharing one program.
///
/// `x` carries both axes for the double methods.
#[derive(Debug)]
pub(crate) struct AxisEngines {
    pub x: FilterEngine,
    pub y: FilterEngine,
    kernels: Option<DerivativeKernels>,
    method: Option<Method>,
}

impl AxisEngines {
    pub fn new(backend: &Rc<ClBackend>, program: &Rc<ClProgram>, border: BorderMode) -> Self {
        let mut x = FilterEngine::new(Rc::clone(backend), Rc::clone(program));
        let mut y = FilterEngine::new(Rc::clone(backend), Rc::clone(program));
        x.set_border(border);
        y.set_border(border);
        Self {
            x,
            y,
            kernels: None,
            method: None,
        }
    }

    /// Bind the coefficients for `sigma_size` and select `method`.
    pub fn configure(&mut self, method: Method, sigma_size: usize) -> PyrResult<()> {
        let kernels = DerivativeKernels::for_sigma_size(sigma_size)?;
        if method.is_predefined() && !kernels.has_predefined() {
            return Err(PyrError::UnsupportedMethod {
                layout: self.x.program.layout().to_string(),
                method: format!("{method} at sigma size {sigma_size}"),
            });
        }
        if method.is_local() {
            check_local_tile(&kernels.gx)?;
        }
        // Predefined methods read their coefficients from the program.
        if !method.is_predefined() {
            match (method.is_double(), method.is_separated()) {
                (true, false) => {
                    self.x.set_kernel1(&kernels.gx)?;
                    self.x.set_kernel2(&kernels.gy)?;
                }
                (true, true) => {
                    self.x.set_separation1(&kernels.gx_separable)?;
                    self.x.set_separation2(&kernels.gy_separable)?;
                }
                (false, false) => {
                    self.x.set_kernel1(&kernels.gx)?;
                    self.y.set_kernel1(&kernels.gy)?;
                }
                (false, true) => {
                    self.x.set_separation1(&kernels.gx_separable)?;
                    self.y.set_separation1(&kernels.gy_separable)?;
                }
            }
        }
        log::debug!(
            "{}: {method} with {} derivative kernels",
            self.x.program.layout(),
            kernels.size_name()
        );
        self.kernels = Some(kernels);
        self.method = Some(method);
        Ok(())
    }

    /// Run the configured method from `src` into `gx` and `gy`.
    pub fn dispatch(
        &mut self,
        src: &dyn Surface,
        gx: &dyn Surface,
        gy: &dyn Surface,
    ) -> PyrResult<()> {
        let (Some(method), Some(kernels)) = (self.method, self.kernels.as_ref()) else {
            return Err(PyrError::Contract("dispatch before configure".into()));
        };
        let size = kernels.size();
        match method {
            Method::Single => {
                self.x.run_single(src, gx)?;
                self.y.run_single(src, gy)?;
            }
            Method::SingleLocal => {
                self.x.run_single_local(src, gx)?;
                self.y.run_single_local(src, gy)?;
            }
            Method::SingleSeparation => {
                self.x.run_single_separation(src, gx)?;
                self.y.run_single_separation(src, gy)?;
            }
            Method::SingleSeparationLocal => {
                self.x.run_single_separation_local(src, gx)?;
                self.y.run_single_separation_local(src, gy)?;
            }
            Method::Double => {
                self.x.run_double(src, gx, gy)?;
            }
            Method::DoubleLocal => {
                self.x.run_double_local(src, gx, gy)?;
            }
            Method::DoubleSeparation => {
                self.x.run_double_separation(src, gx, gy)?;
            }
            Method::SinglePredefined => {
                self.x.run_single_predefined(src, gx, GX, size)?;
                self.y.run_single_predefined(src, gy, GY, size)?;
            }
            Method::SinglePredefinedLocal => {
                self.x.run_single_predefined_local(src, gx, GX, size)?;
                self.y.run_single_predefined_local(src, gy, GY, size)?;
            }
            Method::DoublePredefined => {
                self.x.run_double_predefined(src, gx, gy, size)?;
            }
            Method::DoublePredefinedLocal => {
                self.x.run_double_predefined_local(src, gx, gy, size)?;
            }
        }
        Ok(())
    }
}
