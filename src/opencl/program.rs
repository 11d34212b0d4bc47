//! Program source assembly and the compiled-program handle.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::*;
use crate::controller::Layout;
use crate::derivative::predefined_tables_source;

/// Helpers shared by all layouts: border extrapolation, lookup struct,
/// correlation and tile-staging macros.
const COMMON_SOURCE: &str = include_str!("../../kernels/common.cl");

/// Filter entry points, expanded once per layout.
const FILTER_CORE_SOURCE: &str = include_str!("../../kernels/filter_core.cl");

const FILTER_IMAGES_SOURCE: &str = include_str!("../../kernels/filter_images.cl");
const FILTER_CUBES_SOURCE: &str = include_str!("../../kernels/filter_cubes.cl");
const FILTER_BUFFER_SOURCE: &str = include_str!("../../kernels/filter_buffer.cl");

/// Compiler flags for every build.
pub const BUILD_OPTIONS: &str = "-cl-std=CL2.0";

/// Extra flags for debug builds.
pub const DEBUG_BUILD_OPTIONS: &str = "-Werror -g";

/// Layout-specific accessor file.
pub fn layout_source(layout: Layout) -> &'static str {
    match layout {
        Layout::Images => FILTER_IMAGES_SOURCE,
        Layout::Cubes => FILTER_CUBES_SOURCE,
        Layout::Buffer => FILTER_BUFFER_SOURCE,
    }
}

/// Complete program text for `layout`: shared header, generated
/// coefficient tables, layout accessors and structural kernels, then
/// the filter entry points.
pub fn program_source(layout: Layout) -> PyrResult<String> {
    let tables = predefined_tables_source()?;
    let layout_src = layout_source(layout);
    let mut src = String::with_capacity(
        COMMON_SOURCE.len() + tables.len() + layout_src.len() + FILTER_CORE_SOURCE.len() + 256,
    );
    src.push_str(COMMON_SOURCE);
    src.push('\n');
    src.push_str(&tables);
    src.push('\n');
    src.push_str(&format!("// {}\n", layout.kernel_file()));
    src.push_str(layout_src);
    src.push('\n');
    src.push_str(FILTER_CORE_SOURCE);
    Ok(src)
}

/// Build options string for a release or debug build.
pub fn build_options(debug: bool) -> String {
    if debug {
        format!("{BUILD_OPTIONS} {DEBUG_BUILD_OPTIONS}")
    } else {
        BUILD_OPTIONS.to_string()
    }
}

/// A compiled layout program with a per-name kernel cache.
pub struct ClProgram {
    program: Program,
    layout: Layout,
    kernels: RefCell<HashMap<String, Rc<Kernel>>>,
}

impl std::fmt::Debug for ClProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClProgram")
            .field("layout", &self.layout)
            .field("cached_kernels", &self.kernels.borrow().len())
            .finish_non_exhaustive()
    }
}

impl ClProgram {
    pub(crate) fn new(program: Program, layout: Layout) -> Self {
        Self {
            program,
            layout,
            kernels: RefCell::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Kernel object for entry point `name`, created on first use.
    pub fn kernel(&self, name: &str) -> PyrResult<Rc<Kernel>> {
        if let Some(k) = self.kernels.borrow().get(name) {
            return Ok(Rc::clone(k));
        }
        let kernel = Kernel::create(&self.program, name).map_err(|e| {
            log::error!("{}: no kernel named {name}", self.layout.kernel_file());
            PyrError::Backend {
                op: "clCreateKernel",
                code: e.0,
            }
        })?;
        let kernel = Rc::new(kernel);
        self.kernels
            .borrow_mut()
            .insert(name.to_string(), Rc::clone(&kernel));
        Ok(kernel)
    }
}
