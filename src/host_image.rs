//! Host-side single-channel f32 images.
//!
//! Row-major, contiguous, no padding: the layout the device transfers
//! assume.

use std::path::Path;

use crate::{contract, PyrResult};

/// Single-channel f32 image on the host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostImage {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl HostImage {
    /// Zero-filled image.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    /// Wrap existing row-major pixels.
    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> PyrResult<Self> {
        contract!(
            data.len() == width * height,
            "image data has {} pixels, expected {width}x{height}",
            data.len()
        );
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Constant-valued image.
    pub fn filled(width: usize, height: usize, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    /// Deterministic test pattern: a diagonal ramp with a checkerboard
    /// overlay, values in [0, 1].
    pub fn synthetic(width: usize, height: usize) -> Self {
        let mut img = Self::new(width, height);
        let span = (width + height).max(1) as f32;
        for y in 0..height {
            for x in 0..width {
                let ramp = (x + y) as f32 / span;
                let check = if ((x / 8) + (y / 8)) % 2 == 0 { 0.25 } else { 0.0 };
                img.set(x, y, (0.75 * ramp + check).min(1.0));
            }
        }
        img
    }

    /// Decode any format the `image` crate reads, converted to luma and
    /// normalised to [0, 1].
    pub fn load(path: &Path) -> PyrResult<Self> {
        let luma = ::image::open(path)?.to_luma32f();
        let (w, h) = luma.dimensions();
        log::debug!("loaded {} ({w}x{h})", path.display());
        Self::from_vec(w as usize, h as usize, luma.into_raw())
    }

    /// Write as 8-bit grayscale, rescaling `[min, max]` to `[0, 255]`.
    pub fn save_normalized(&self, path: &Path) -> PyrResult<()> {
        let (lo, hi) = self
            .data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let scale = if hi > lo { 255.0 / (hi - lo) } else { 0.0 };
        let bytes: Vec<u8> = self
            .data
            .iter()
            .map(|&v| ((v - lo) * scale).round().clamp(0.0, 255.0) as u8)
            .collect();
        let buf = ::image::GrayImage::from_raw(self.width as u32, self.height as u32, bytes)
            .ok_or_else(|| crate::PyrError::Contract("image buffer size mismatch".into()))?;
        buf.save(path)?;
        Ok(())
    }

    /// Largest rectangle with both sides a multiple of `align`, anchored
    /// at the origin.
    pub fn crop_aligned(&self, align: usize) -> Self {
        let w = self.width - self.width % align;
        let h = self.height - self.height % align;
        if (w, h) == (self.width, self.height) {
            return self.clone();
        }
        let mut out = Self::new(w, h);
        for y in 0..h {
            out.data[y * w..(y + 1) * w].copy_from_slice(&self.data[y * self.width..y * self.width + w]);
        }
        out
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: f32) {
        self.data[y * self.width + x] = v;
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Largest absolute per-pixel difference. Dimensions must match.
    /// A NaN on either side yields `f32::INFINITY`.
    pub fn max_abs_diff(&self, other: &HostImage) -> PyrResult<f32> {
        contract!(
            self.width == other.width && self.height == other.height,
            "cannot compare {}x{} with {}x{}",
            self.width,
            self.height,
            other.width,
            other.height
        );
        Ok(self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| {
                let d = (a - b).abs();
                if d.is_nan() {
                    f32::INFINITY
                } else {
                    d
                }
            })
            .fold(0.0, f32::max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_checks_len() {
        assert!(HostImage::from_vec(4, 4, vec![0.0; 15]).is_err());
        assert!(HostImage::from_vec(4, 4, vec![0.0; 16]).is_ok());
    }

    #[test]
    fn test_synthetic_range() {
        let img = HostImage::synthetic(64, 32);
        assert!(img.as_slice().iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert_ne!(img.get(0, 0), img.get(8, 0));
    }

    #[test]
    fn test_crop_aligned() {
        let img = HostImage::synthetic(37, 20);
        let c = img.crop_aligned(8);
        assert_eq!((c.width(), c.height()), (32, 16));
        assert_eq!(c.get(31, 15), img.get(31, 15));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.png");
        let mut img = HostImage::new(16, 8);
        for x in 0..16 {
            for y in 0..8 {
                img.set(x, y, x as f32 / 15.0);
            }
        }
        img.save_normalized(&path).unwrap();
        let back = HostImage::load(&path).unwrap();
        assert_eq!((back.width(), back.height()), (16, 8));
        assert!(img.max_abs_diff(&back).unwrap() < 1.0 / 255.0 + 1e-6);
    }

    #[test]
    fn test_max_abs_diff_shape_mismatch() {
        let a = HostImage::new(4, 4);
        let b = HostImage::new(4, 2);
        assert!(a.max_abs_diff(&b).is_err());
    }

    #[test]
    fn test_max_abs_diff_nan_is_infinite() {
        let good = HostImage::from_vec(2, 1, vec![0.5, 0.5]).unwrap();
        let bad = HostImage::from_vec(2, 1, vec![f32::NAN, 0.5]).unwrap();
        assert_eq!(good.max_abs_diff(&bad).unwrap(), f32::INFINITY);
        assert_eq!(bad.max_abs_diff(&good).unwrap(), f32::INFINITY);
        assert_eq!(good.max_abs_diff(&good).unwrap(), 0.0);
    }
}
