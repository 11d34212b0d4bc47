//! Cube layout: one 2D image array per octave, one slice per level.

use std::rc::Rc;
use std::time::{Duration, Instant};

use super::engine::AxisEngines;
use super::surface::CubeSurface;
use super::*;
use crate::controller::{ControllerState, Layout, PyramidController, PyramidReadback};
use crate::filter::BorderMode;
use crate::host_image::HostImage;
use crate::method::Method;
use crate::pyramid::{PyramidShape, LEVELS_PER_OCTAVE, NUMBER_OCTAVES};

struct Pyramid {
    shape: PyramidShape,
    cubes: Vec<Image>,
    gx: Vec<Image>,
    gy: Vec<Image>,
    engines: AxisEngines,
}

/// Pyramid controller for the image-array layout.
pub struct CubesController {
    backend: Rc<ClBackend>,
    border: BorderMode,
    debug_build: bool,
    state: ControllerState,
    pyramid: Option<Pyramid>,
}

impl std::fmt::Debug for CubesController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CubesController")
            .field("border", &self.border)
            .field("state", &self.state)
            .field("shape", &self.pyramid.as_ref().map(|p| p.shape))
            .finish_non_exhaustive()
    }
}

impl CubesController {
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
        let program = Rc::new(self.backend.compile_program(Layout::Cubes, self.debug_build)?);
        let mut engines = AxisEngines::new(&self.backend, &program, self.border);

        let alloc_all = || -> PyrResult<Vec<Image>> {
            (0..NUMBER_OCTAVES)
                .map(|o| {
                    let (w, h) = shape.octave_size(o);
                    self.backend.alloc_image_array(w, h, LEVELS_PER_OCTAVE)
                })
                .collect()
        };
        let mut cubes = alloc_all()?;
        let gx = alloc_all()?;
        let gy = alloc_all()?;

        let queue = engines.x.queue();
        let upload = self.backend.write_image(
            queue,
            &mut cubes[0],
            0,
            shape.width(),
            shape.height(),
            source.as_slice(),
        )?;
        engines.x.add_dependency(upload);

        for o in 0..NUMBER_OCTAVES {
            let size = shape.octave_size(o);
            if o > 0 {
                let event = engines.x.run_halfsample_image(&cubes[o - 1], &cubes[o], size)?;
                engines.x.add_dependency(event);
            }
            let event = engines.x.run_copy_inside_cube(&cubes[o], size)?;
            log::debug!("cubes: octave {o} filled at {}x{}", size.0, size.1);
            engines.x.add_dependency(event);
        }
        self.backend.finish(queue)?;
        engines.x.take_dependencies();

        Ok(Pyramid {
            shape,
            cubes,
            gx,
            gy,
            engines,
        })
    }

    fn pyramid(&self) -> PyrResult<&Pyramid> {
        self.pyramid
            .as_ref()
            .ok_or_else(|| PyrError::Contract("cube pyramid is not built".into()))
    }

    fn dispatch_all(&mut self) -> PyrResult<()> {
        let p = self
            .pyramid
            .as_mut()
            .ok_or_else(|| PyrError::Contract("cube pyramid is not built".into()))?;
        for o in 0..NUMBER_OCTAVES {
            let (w, h) = p.shape.octave_size(o);
            let src = CubeSurface::new(&p.cubes[o], w, h)?;
            let gx = CubeSurface::new(&p.gx[o], w, h)?;
            let gy = CubeSurface::new(&p.gy[o], w, h)?;
            p.engines.dispatch(&src, &gx, &gy)?;
        }
        Ok(())
    }

    /// Every slice of every cube in level order.
    fn read_all(&self, cubes: &[Image], shape: &PyramidShape) -> PyrResult<Vec<HostImage>> {
        let mut out = Vec::with_capacity(NUMBER_OCTAVES * LEVELS_PER_OCTAVE);
        for (o, cube) in cubes.iter().enumerate() {
            let (w, h) = shape.octave_size(o);
            for slice in 0..LEVELS_PER_OCTAVE {
                let data = self.backend.read_image(QueueId::Primary, cube, slice, w, h)?;
                out.push(HostImage::from_vec(w, h, data)?);
            }
        }
        Ok(out)
    }
}

impl PyramidController for CubesController {
    fn layout(&self) -> Layout {
        Layout::Cubes
    }

    fn state(&self) -> ControllerState {
        self.state
    }

    fn init(&mut self, source: &HostImage) -> PyrResult<()> {
        self.state.check_init()?;
        self.pyramid = Some(self.build(source)?);
        log::info!(
            "cubes: built {NUMBER_OCTAVES} octaves from {}x{}",
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
            .ok_or_else(|| PyrError::Contract("cube pyramid is not built".into()))?;
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
        self.read_all(&p.cubes, &p.shape)
    }

    fn read_images(&mut self) -> PyrResult<PyramidReadback> {
        self.state.check_results()?;
        let p = self.pyramid()?;
        Ok(PyramidReadback {
            levels: self.read_all(&p.cubes, &p.shape)?,
            gx: self.read_all(&p.gx, &p.shape)?,
            gy: self.read_all(&p.gy, &p.shape)?,
        })
    }
}
