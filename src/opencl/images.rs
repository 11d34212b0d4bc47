//! Per-level image layout: every pyramid level is its own 2D image.

use std::rc::Rc;
use std::time::{Duration, Instant};

use super::engine::AxisEngines;
use super::surface::ImageSurface;
use super::*;
use crate::controller::{ControllerState, Layout, PyramidController, PyramidReadback};
use crate::filter::BorderMode;
use crate::host_image::HostImage;
use crate::method::Method;
use crate::pyramid::{starts_octave, PyramidShape, NUMBER_LEVELS};

struct Pyramid {
    shape: PyramidShape,
    levels: Vec<Image>,
    gx: Vec<Image>,
    gy: Vec<Image>,
    engines: AxisEngines,
}

/// Pyramid controller for the per-level image layout.
pub struct ImagesController {
    backend: Rc<ClBackend>,
    border: BorderMode,
    debug_build: bool,
    state: ControllerState,
    pyramid: Option<Pyramid>,
}

impl std::fmt::Debug for ImagesController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagesController")
            .field("border", &self.border)
            .field("state", &self.state)
            .field("shape", &self.pyramid.as_ref().map(|p| p.shape))
            .finish_non_exhaustive()
    }
}

impl ImagesController {
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
        let program = Rc::new(self.backend.compile_program(Layout::Images, self.debug_build)?);
        let mut engines = AxisEngines::new(&self.backend, &program, self.border);

        let alloc_all = || -> PyrResult<Vec<Image>> {
            (0..NUMBER_LEVELS)
                .map(|i| {
                    let (w, h) = shape.level_size(i);
                    self.backend.alloc_image2d(w, h)
                })
                .collect()
        };
        let mut levels = alloc_all()?;
        let gx = alloc_all()?;
        let gy = alloc_all()?;

        let queue = engines.x.queue();
        let upload = self.backend.write_image(
            queue,
            &mut levels[0],
            0,
            shape.width(),
            shape.height(),
            source.as_slice(),
        )?;
        engines.x.add_dependency(upload);

        for i in 1..NUMBER_LEVELS {
            let size = shape.level_size(i);
            let (done, rest) = levels.split_at_mut(i);
            let (prev, cur) = (&done[i - 1], &mut rest[0]);
            let event = if starts_octave(i) {
                log::debug!("images: level {i} halfsampled to {}x{}", size.0, size.1);
                engines.x.run_halfsample_image(prev, cur, size)?
            } else {
                let wait = engines.x.take_dependencies();
                self.backend
                    .copy_image(queue, prev, cur, size.0, size.1, &wait)?
            };
            engines.x.add_dependency(event);
        }
        self.backend.finish(queue)?;
        engines.x.take_dependencies();

        Ok(Pyramid {
            shape,
            levels,
            gx,
            gy,
            engines,
        })
    }

    fn pyramid(&self) -> PyrResult<&Pyramid> {
        self.pyramid
            .as_ref()
            .ok_or_else(|| PyrError::Contract("images pyramid is not built".into()))
    }

    fn pyramid_mut(&mut self) -> PyrResult<&mut Pyramid> {
        self.pyramid
            .as_mut()
            .ok_or_else(|| PyrError::Contract("images pyramid is not built".into()))
    }

    fn dispatch_all(&mut self) -> PyrResult<()> {
        let p = self.pyramid_mut()?;
        for i in 0..NUMBER_LEVELS {
            let (w, h) = p.shape.level_size(i);
            let src = ImageSurface::new(&p.levels[i], w, h)?;
            let gx = ImageSurface::new(&p.gx[i], w, h)?;
            let gy = ImageSurface::new(&p.gy[i], w, h)?;
            p.engines.dispatch(&src, &gx, &gy)?;
        }
        Ok(())
    }

    fn read_all(&self, images: &[Image], shape: &PyramidShape) -> PyrResult<Vec<HostImage>> {
        images
            .iter()
            .enumerate()
            .map(|(i, img)| {
                let (w, h) = shape.level_size(i);
                let data = self.backend.read_image(QueueId::Primary, img, 0, w, h)?;
                HostImage::from_vec(w, h, data)
            })
            .collect()
    }

    fn one_pass_all(&mut self) -> PyrResult<()> {
        let p = self.pyramid_mut()?;
        for i in 0..NUMBER_LEVELS {
            let (w, h) = p.shape.level_size(i);
            let src = ImageSurface::new(&p.levels[i], w, h)?;
            let gx = ImageSurface::new(&p.gx[i], w, h)?;
            p.engines.x.run_single_local_one_pass(&src, &gx)?;
        }
        Ok(())
    }

    /// Time `run` up to device completion. Success leaves results ready,
    /// failure returns to `ConfigurationSet`.
    fn run_timed(&mut self, run: fn(&mut Self) -> PyrResult<()>) -> PyrResult<Duration> {
        self.state.check_run()?;
        self.state = ControllerState::Running;
        let start = Instant::now();
        match run(self).and_then(|_| self.backend.finish_all()) {
            Ok(()) => {
                self.state = ControllerState::ResultsReady;
                Ok(start.elapsed())
            }
            Err(e) => {
                self.state = ControllerState::ConfigurationSet;
                Err(e)
            }
        }
    }

    /// Fused separable pass of the configured x pair on every level into
    /// the gx images. Needs a separated method to be configured; only
    /// this layout exports the fused kernel.
    pub fn run_one_pass(&mut self) -> PyrResult<Duration> {
        self.run_timed(Self::one_pass_all)
    }
}

impl PyramidController for ImagesController {
    fn layout(&self) -> Layout {
        Layout::Images
    }

    fn state(&self) -> ControllerState {
        self.state
    }

    fn init(&mut self, source: &HostImage) -> PyrResult<()> {
        self.state.check_init()?;
        let pyramid = self.build(source)?;
        log::info!(
            "images: built {} levels from {}x{}",
            NUMBER_LEVELS,
            source.width(),
            source.height()
        );
        self.pyramid = Some(pyramid);
        self.state = ControllerState::Initialized;
        Ok(())
    }

    fn set_configuration(&mut self, method: Method, sigma_size: usize) -> PyrResult<()> {
        self.state.check_configure()?;
        self.pyramid_mut()?.engines.configure(method, sigma_size)?;
        self.state = ControllerState::ConfigurationSet;
        Ok(())
    }

    fn run_method(&mut self) -> PyrResult<Duration> {
        self.run_timed(Self::dispatch_all)
    }

    fn read_levels(&mut self) -> PyrResult<Vec<HostImage>> {
        self.state.check_levels()?;
        let p = self.pyramid()?;
        self.read_all(&p.levels, &p.shape)
    }

    fn read_images(&mut self) -> PyrResult<PyramidReadback> {
        self.state.check_results()?;
        let p = self.pyramid()?;
        Ok(PyramidReadback {
            levels: self.read_all(&p.levels, &p.shape)?,
            gx: self.read_all(&p.gx, &p.shape)?,
            gy: self.read_all(&p.gy, &p.shape)?,
        })
    }
}
