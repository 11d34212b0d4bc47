//! pyrcl: an OpenCL image-pyramid benchmark.
//!
//! Builds a 4-octave × 4-level scale-space pyramid in one of three
//! device storage layouts (flat buffer, per-level images, per-octave
//! image arrays) and times eleven strategies for computing the x/y
//! derivative of every level.
//!
//! Device-independent pieces (filter descriptors, derivative
//! coefficients, pyramid topology, CPU reference, benchmark driver)
//! always build. The OpenCL backend is gated behind the `opencl`
//! feature:
//! ```bash
//! cargo build --features opencl
//! ```

pub mod bench;
pub mod config;
pub mod controller;
pub mod derivative;
pub mod filter;
pub mod host_image;
pub mod method;
pub mod pyramid;
pub mod reference;

#[cfg(feature = "opencl")]
pub mod opencl;

/// Error types for pyrcl operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PyrError {
    /// A precondition of the caller was violated (bad kernel shape,
    /// zero-sized image, call out of order, ...). Programmer error.
    #[error("contract violation: {0}")]
    Contract(String),
    /// No OpenCL runtime or no usable device.
    #[error("no usable OpenCL device")]
    Unsupported,
    /// Program compilation failed; `log` holds the compiler output.
    #[error("program build failed:\n{log}")]
    BuildFailure { log: String },
    /// A device call failed at runtime.
    #[error("OpenCL {op} failed with error code {code}")]
    Backend { op: &'static str, code: i32 },
    /// The layout has no kernels for the requested method.
    #[error("method {method} is not available for the {layout} layout")]
    UnsupportedMethod { layout: String, method: String },
    /// Host image decoding failed.
    #[error("image: {0}")]
    Image(#[from] ::image::ImageError),
    /// Invalid benchmark configuration.
    #[error("config: {0}")]
    Config(String),
}

pub type PyrResult<T> = Result<T, PyrError>;

/// Return early with [`PyrError::Contract`] unless `cond` holds.
#[macro_export]
macro_rules! contract {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::PyrError::Contract(format!($($arg)+)));
        }
    };
}
