//! Pyramid controller interface shared by the three storage layouts.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::host_image::HostImage;
use crate::method::Method;
use crate::{PyrError, PyrResult};

/// Device storage layout of the pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// One 2D image per level.
    #[default]
    Images,
    /// One 2D image array per octave, one slice per level.
    Cubes,
    /// All levels in one buffer, addressed through the lookup table.
    Buffer,
}

impl Layout {
    pub const ALL: [Layout; 3] = [Layout::Images, Layout::Cubes, Layout::Buffer];

    pub fn name(self) -> &'static str {
        match self {
            Layout::Images => "images",
            Layout::Cubes => "cubes",
            Layout::Buffer => "buffer",
        }
    }

    /// Kernel source file that defines this layout's entry points.
    pub fn kernel_file(self) -> &'static str {
        match self {
            Layout::Images => "filter_images.cl",
            Layout::Cubes => "filter_cubes.cl",
            Layout::Buffer => "filter_buffer.cl",
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Layout {
    type Err = PyrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Layout::ALL
            .into_iter()
            .find(|l| l.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| PyrError::Config(format!("unknown layout '{s}'")))
    }
}

/// Lifecycle of a controller.
///
/// `Uninitialized → Initialized → ConfigurationSet → Running → ResultsReady`;
/// configuring and running may repeat from `ConfigurationSet` or
/// `ResultsReady` without rebuilding the pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerState {
    #[default]
    Uninitialized,
    Initialized,
    ConfigurationSet,
    Running,
    ResultsReady,
}

impl ControllerState {
    fn reject(self, op: &str) -> PyrError {
        PyrError::Contract(format!("{op} is not allowed in state {self:?}"))
    }

    /// `init` runs exactly once per controller.
    pub fn check_init(self) -> PyrResult<()> {
        match self {
            ControllerState::Uninitialized => Ok(()),
            _ => Err(self.reject("init")),
        }
    }

    pub fn check_configure(self) -> PyrResult<()> {
        match self {
            ControllerState::Initialized
            | ControllerState::ConfigurationSet
            | ControllerState::ResultsReady => Ok(()),
            _ => Err(self.reject("set_configuration")),
        }
    }

    pub fn check_run(self) -> PyrResult<()> {
        match self {
            ControllerState::ConfigurationSet | ControllerState::ResultsReady => Ok(()),
            _ => Err(self.reject("run_method")),
        }
    }

    /// The pyramid exists on the device.
    pub fn check_levels(self) -> PyrResult<()> {
        match self {
            ControllerState::Uninitialized => Err(self.reject("read_levels")),
            _ => Ok(()),
        }
    }

    pub fn check_results(self) -> PyrResult<()> {
        match self {
            ControllerState::ResultsReady => Ok(()),
            _ => Err(self.reject("read_images")),
        }
    }
}

/// Host copies of every level and its derivatives.
#[derive(Debug, Clone, Default)]
pub struct PyramidReadback {
    pub levels: Vec<HostImage>,
    pub gx: Vec<HostImage>,
    pub gy: Vec<HostImage>,
}

/// Builds a pyramid in one storage layout and times derivative methods
/// over all of its levels.
pub trait PyramidController {
    fn layout(&self) -> Layout;

    fn state(&self) -> ControllerState;

    /// Whether `method` can be configured on this layout. Every layout
    /// program exports the same filter entry points.
    fn supports(&self, method: Method) -> bool {
        Method::ALL.contains(&method)
    }

    /// Compile the layout's program, upload `source` and build the pyramid.
    fn init(&mut self, source: &HostImage) -> PyrResult<()>;

    /// Select the method and derivative kernel size for the next runs.
    fn set_configuration(&mut self, method: Method, sigma_size: usize) -> PyrResult<()>;

    /// Run the configured method on every level; the returned time
    /// includes device completion.
    fn run_method(&mut self) -> PyrResult<Duration>;

    /// Blocking read-back of the pyramid levels.
    fn read_levels(&mut self) -> PyrResult<Vec<HostImage>>;

    /// Blocking read-back of the levels and the last derivative results.
    fn read_images(&mut self) -> PyrResult<PyramidReadback>;
}
