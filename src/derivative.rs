//! Derivative filter coefficients for each sigma size.
//!
//! Sigma size 1 uses the 3×3 Scharr operator. Larger sizes use a
//! `(2s+1)`-tap family whose smoothing vector keeps the Scharr 3:10:3
//! ratio spread over the outer and centre taps.

use std::fmt::Write as _;

use crate::filter::{FilterKernel, Matrix, SeparableKernel, UNROLLED_SIZES};
use crate::{contract, PyrResult};

/// Largest sigma size with predefined device kernels (9×9).
pub const MAX_SIGMA_SIZE: usize = 4;

/// Predefined entry-point name for the x derivative.
pub const GX: &str = "Gx";
/// Predefined entry-point name for the y derivative.
pub const GY: &str = "Gy";
/// Predefined entry-point name for the fused x/y derivative.
pub const GXGY: &str = "GxGy";

/// Complete and separable x/y derivative kernels for one sigma size.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivativeKernels {
    pub sigma_size: usize,
    pub gx: FilterKernel,
    pub gy: FilterKernel,
    /// `(smoothing column, derivative row)`
    pub gx_separable: SeparableKernel,
    /// `(derivative column, smoothing row)`
    pub gy_separable: SeparableKernel,
}

impl DerivativeKernels {
    pub fn for_sigma_size(sigma_size: usize) -> PyrResult<Self> {
        contract!(sigma_size >= 1, "sigma size must be at least 1");
        let (smooth, deriv) = if sigma_size == 1 {
            (vec![3.0, 10.0, 3.0], vec![-1.0, 0.0, 1.0])
        } else {
            (
                derivative_vector(0, sigma_size),
                derivative_vector(1, sigma_size),
            )
        };
        let (gx_a, gx_b) = (Matrix::column(smooth), Matrix::row(deriv));
        // The y pair is the x pair transposed with its operands swapped.
        let gx_separable = SeparableKernel::new(&gx_a, &gx_b)?;
        let gy_separable = SeparableKernel::new(&gx_b.transpose(), &gx_a.transpose())?;
        Ok(Self {
            sigma_size,
            gx: gx_separable.to_complete(),
            gy: gy_separable.to_complete(),
            gx_separable,
            gy_separable,
        })
    }

    /// Edge length of the complete kernels.
    pub fn size(&self) -> usize {
        self.gx.rows()
    }

    /// `{n}x{n}` suffix of the predefined entry points.
    pub fn size_name(&self) -> String {
        self.gx.size_name()
    }

    /// Whether predefined entry points exist for this size.
    pub fn has_predefined(&self) -> bool {
        UNROLLED_SIZES.contains(&self.size())
    }
}

/// One 1D derivative vector of order 0 (smoothing) or 1 for `scale > 1`.
///
/// Length is `3 + 2(scale - 1)`. Only the end taps and the centre tap
/// are non-zero.
pub fn derivative_vector(order: u8, scale: usize) -> Vec<f32> {
    let ksize = 3 + 2 * (scale - 1);
    let mut k = vec![0.0f32; ksize];
    let mid = ksize / 2;
    if order == 0 {
        let w = 10.0f32 / 3.0;
        let norm = 1.0 / (2.0 * scale as f32 * (w + 2.0));
        k[0] = norm;
        k[mid] = w * norm;
        k[ksize - 1] = norm;
    } else {
        k[0] = -1.0;
        k[mid] = 0.0;
        k[ksize - 1] = 1.0;
    }
    k
}

/// OpenCL declarations of every predefined coefficient table
/// (`constant float Gx_5x5[25] = {...};`).
///
/// Emitted once per program so predefined kernels can reference the
/// tables by name.
pub fn predefined_tables_source() -> PyrResult<String> {
    let mut src = String::from("// generated derivative tables\n");
    for sigma_size in 1..=MAX_SIGMA_SIZE {
        let k = DerivativeKernels::for_sigma_size(sigma_size)?;
        for (name, kernel) in [(GX, &k.gx), (GY, &k.gy)] {
            let values: Vec<String> = kernel
                .coefficients()
                .iter()
                .map(|v| format!("{v:e}f"))
                .collect();
            // Writing to a String cannot fail.
            let _ = writeln!(
                src,
                "constant float {name}_{}[{}] = {{{}}};",
                kernel.size_name(),
                kernel.len(),
                values.join(", ")
            );
        }
    }
    Ok(src)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scharr_size_one() {
        let k = DerivativeKernels::for_sigma_size(1).unwrap();
        assert_eq!(k.size(), 3);
        assert_eq!(
            k.gx.coefficients(),
            &[-3.0, 0.0, 3.0, -10.0, 0.0, 10.0, -3.0, 0.0, 3.0]
        );
        assert_eq!(
            k.gy.coefficients(),
            &[-3.0, -10.0, -3.0, 0.0, 0.0, 0.0, 3.0, 10.0, 3.0]
        );
    }

    #[test]
    fn test_generated_sizes() {
        for s in 2..=MAX_SIGMA_SIZE {
            let k = DerivativeKernels::for_sigma_size(s).unwrap();
            assert_eq!(k.size(), 2 * s + 1);
            assert!(k.has_predefined());
            assert!(k.gx_separable.is_unrolled());
        }
    }

    #[test]
    fn test_smoothing_vector() {
        let v = derivative_vector(0, 2);
        let w = 10.0f32 / 3.0;
        let norm = 1.0 / (4.0 * (w + 2.0));
        assert_eq!(v.len(), 5);
        assert!((v[0] - norm).abs() < 1e-7);
        assert!((v[2] - w * norm).abs() < 1e-7);
        assert!((v[4] - norm).abs() < 1e-7);
        assert_eq!(v[1], 0.0);
        assert_eq!(v[3], 0.0);
    }

    #[test]
    fn test_derivative_vector() {
        assert_eq!(derivative_vector(1, 3), vec![-1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_gx_is_transpose_of_gy() {
        let k = DerivativeKernels::for_sigma_size(3).unwrap();
        let n = k.size();
        for r in 0..n {
            for c in 0..n {
                assert_eq!(k.gx.coefficients()[r * n + c], k.gy.coefficients()[c * n + r]);
            }
        }
    }

    #[test]
    fn test_zero_sigma_rejected() {
        assert!(DerivativeKernels::for_sigma_size(0).is_err());
    }

    #[test]
    fn test_predefined_tables_cover_all_sizes() {
        let src = predefined_tables_source().unwrap();
        for n in UNROLLED_SIZES {
            assert!(src.contains(&format!("Gx_{n}x{n}[{}]", n * n)));
            assert!(src.contains(&format!("Gy_{n}x{n}[{}]", n * n)));
        }
    }
}
