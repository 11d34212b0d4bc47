//! CPU reference implementations of the device kernels.
//!
//! Straightforward loops with the same border extrapolation and the
//! same correlation convention as `kernels/filter_core.cl`. Used to
//! verify device read-backs.

use crate::filter::{BorderMode, FilterKernel, SeparableKernel};
use crate::host_image::HostImage;
use crate::pyramid::{starts_octave, PyramidShape, NUMBER_LEVELS};
use crate::PyrResult;

/// 2D correlation with border extrapolation.
pub fn correlate(src: &HostImage, kernel: &FilterKernel, border: BorderMode) -> HostImage {
    let (w, h) = (src.width(), src.height());
    let (rh, ch) = (kernel.rows_half() as isize, kernel.cols_half() as isize);
    let cols = kernel.cols();
    let k = kernel.coefficients();
    let mut dst = HostImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for i in -rh..=rh {
                let yy = border.index(y as isize + i, h);
                for j in -ch..=ch {
                    let xx = border.index(x as isize + j, w);
                    acc += k[((i + rh) as usize) * cols + (j + ch) as usize] * src.get(xx, yy);
                }
            }
            dst.set(x, y, acc);
        }
    }
    dst
}

/// Apply `a` then `b`, each with border extrapolation.
pub fn correlate_separable(
    src: &HostImage,
    kernel: &SeparableKernel,
    border: BorderMode,
) -> HostImage {
    let tmp = correlate(src, kernel.a(), border);
    correlate(&tmp, kernel.b(), border)
}

/// 2×2 box average into a `w/2 × h/2` image, the `fed_resize` kernel.
pub fn halfsample(src: &HostImage) -> HostImage {
    let (w, h) = (src.width() / 2, src.height() / 2);
    let mut dst = HostImage::new(w, h);
    let clamp_x = |x: usize| x.min(src.width() - 1);
    let clamp_y = |y: usize| y.min(src.height() - 1);
    for y in 0..h {
        for x in 0..w {
            let (sx, sy) = (2 * x, 2 * y);
            let sum = src.get(sx, sy)
                + src.get(clamp_x(sx + 1), sy)
                + src.get(sx, clamp_y(sy + 1))
                + src.get(clamp_x(sx + 1), clamp_y(sy + 1));
            dst.set(x, y, 0.25 * sum);
        }
    }
    dst
}

/// Every level of the pyramid built from `src`.
pub fn build_pyramid(src: &HostImage) -> PyrResult<Vec<HostImage>> {
    PyramidShape::new(src.width(), src.height())?;
    let mut levels: Vec<HostImage> = Vec::with_capacity(NUMBER_LEVELS);
    levels.push(src.clone());
    for i in 1..NUMBER_LEVELS {
        let prev = &levels[i - 1];
        let next = if starts_octave(i) {
            halfsample(prev)
        } else {
            prev.clone()
        };
        levels.push(next);
    }
    Ok(levels)
}
