//! Flat buffer layout: every level in one float buffer, addressed
//! through a lookup table of `(previousPixels, width, height)`.

use std::rc::Rc;
use std::time::{Duration, Instant};

use super::engine::AxisEngines;
use super::surface::FlatSurface;
use super::*;
use crate::controller::{ControllerState, Layout, PyramidController, PyramidReadback};
use crate::filter::BorderMode;
use crate::host_image::HostImage;
use crate::method::Method;
use crate::pyramid::{octave_base, LookupEntry, PyramidShape, NUMBER_LEVELS, NUMBER_OCTAVES};

struct Pyramid {
    shape: PyramidShape,
    table: Vec<LookupEntry>,
    lookup: Buffer<LookupEntry>,
    levels: Buffer<f32>,
    gx: Buffer<f32>,
    gy: Buffer<f32>,
    engines: AxisEngines,
}

/// Pyramid controller for the flat buffer layout.
pub struct FlatController {
    backend: Rc<ClBackend>,
    border: BorderMode,
    debug_build: bool,
    state: ControllerState,
    pyramid: Option<Pyramid>,
}

impl std::fmt::Debug for FlatController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlatController")
            .field("border", &self.border)
            .field("state", &self.state)
            .field("shape", &self.pyramid.as_ref().map(|p| p.shape))
            .finish_non_exhaustive()
    }
}

impl FlatController {
    pub fn new(backend: Rc<ClBackend>) -> Self {
        Self::with_options(backend, BorderMode::default(), false)
    }

    pub fn with_options(backend: Rc<ClBackend>, border: BorderMode, debug_build: bool) -> Self {
        Self {
            backend,
            border,
            debug_build,
            state: ControllerState::Uninitialized,
            pyramid: None,
        }
    }

    fn build(&self, source: &HostImage) -> PyrResult<Pyramid> {
        let shape = PyramidShape::new(source.width(), source.height())?;
        let program = Rc::new(self.backend.compile_program(Layout::Buffer, self.debug_build)?);
        let mut engines = AxisEngines::new(&self.backend, &program, self.border);
        let queue = engines.x.queue();

        let table = shape.lookup_table();
        let total = shape.total_pixels();
        let mut lookup = self.backend.alloc_buffer::<LookupEntry>(table.len())?;
        self.backend.write_buffer(queue, &mut lookup, 0, &table)?;
        let mut levels = self.backend.alloc_buffer::<f32>(total)?;
        let gx = self.backend.alloc_buffer::<f32>(total)?;
        let gy = self.backend.alloc_buffer::<f32>(total)?;

        let upload = self
            .backend
            .write_buffer(queue, &mut levels, 0, source.as_slice())?;
        engines.x.add_dependency(upload);

        for o in 0..NUMBER_OCTAVES {
            let base = octave_base(o);
            let size = shape.octave_size(o);
            if o > 0 {
                let event = engines
                    .x
                    .run_halfsample_flat(&levels, &lookup, base - 1, size)?;
                engines.x.add_dependency(event);
            }
            let event = engines.x.run_copy_inside_flat(&levels, &lookup, base, size)?;
            log::debug!("buffer: octave {o} filled at {}x{}", size.0, size.1);
            engines.x.add_dependency(event);
        }
        self.backend.finish(queue)?;
        engines.x.take_dependencies();

        Ok(Pyramid {
            shape,
            table,
            lookup,
            levels,
            gx,
            gy,
            engines,
        })
    }

    fn pyramid(&self) -> PyrResult<&Pyramid> {
        self.pyramid
            .as_ref()
            .ok_or_else(|| PyrError::Contract("flat pyramid is not built".into()))
    }

    fn dispatch_all(&mut self) -> PyrResult<()> {
        let p = self
            .pyramid
            .as_mut()
            .ok_or_else(|| PyrError::Contract("flat pyramid is not built".into()))?;
        let total = p.shape.total_pixels();
        for o in 0..NUMBER_OCTAVES {
            let size = p.shape.octave_size(o);
            let src = FlatSurface::new(&p.levels, &p.lookup, size, o, total)?;
            let gx = FlatSurface::new(&p.gx, &p.lookup, size, o, total)?;
            let gy = FlatSurface::new(&p.gy, &p.lookup, size, o, total)?;
            p.engines.dispatch(&src, &gx, &gy)?;
        }
        Ok(())
    }

    fn read_all(&self, buffer: &Buffer<f32>, table: &[LookupEntry]) -> PyrResult<Vec<HostImage>> {
        let all = self
            .backend
            .read_buffer(QueueId::Primary, buffer, 0, self.pyramid()?.shape.total_pixels())?;
        (0..NUMBER_LEVELS)
            .map(|i| {
                let e = table[i];
                let start = e.previous_pixels as usize;
                let (w, h) = (e.img_width as usize, e.img_height as usize);
                HostImage::from_vec(w, h, all[start..start + w * h].to_vec())
            })
            .collect()
    }
}

impl PyramidController for FlatController {
    fn layout(&self) -> Layout {
        Layout::Buffer
    }

    fn state(&self) -> ControllerState {
        self.state
    }

    fn init(&mut self, source: &HostImage) -> PyrResult<()> {
        self.state.check_init()?;
        self.pyramid = Some(self.build(source)?);
        log::info!(
            "buffer: built {NUMBER_LEVELS} levels from {}x{}",
            source.width(),
            source.height()
        );
        self.state = ControllerState::Initialized;
        Ok(())
    }

    fn set_configuration(&mut self, method: Method, sigma_size: usize) -> PyrResult<()> {
        self.state.check_configure()?;
        let p = self
            .pyramid
            .as_mut()
            .ok_or_else(|| PyrError::Contract("flat pyramid is not built".into()))?;
        p.engines.configure(method, sigma_size)?;
        self.state = ControllerState::ConfigurationSet;
        Ok(())
    }

    fn run_method(&mut self) -> PyrResult<Duration> {
        self.state.check_run()?;
        self.state = ControllerState::Running;
        let start = Instant::now();
        if let Err(e) = self.dispatch_all().and_then(|_| self.backend.finish_all()) {
            self.state = ControllerState::ConfigurationSet;
            return Err(e);
        }
        self.state = ControllerState::ResultsReady;
        Ok(start.elapsed())
    }

    fn read_levels(&mut self) -> PyrResult<Vec<HostImage>> {
        self.state.check_levels()?;
        let p = self.pyramid()?;
        self.read_all(&p.levels, &p.table)
    }

    fn read_images(&mut self) -> PyrResult<PyramidReadback> {
        self.state.check_results()?;
        let p = self.pyramid()?;
        Ok(PyramidReadback {
            levels: self.read_all(&p.levels, &p.table)?,
            gx: self.read_all(&p.gx, &p.table)?,
            gy: self.read_all(&p.gy, &p.table)?,
        })
    }
}
