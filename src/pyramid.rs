//! Pyramid topology: 4 octaves × 4 levels.
//!
//! Every level of octave `o` is `width / 2^o × height / 2^o`. The flat
//! buffer layout addresses levels through a [`LookupEntry`] table of
//! cumulative pixel offsets.

use crate::{contract, PyrResult};

/// Octaves in every pyramid.
pub const NUMBER_OCTAVES: usize = 4;
/// Levels per octave (also the depth of a cube).
pub const LEVELS_PER_OCTAVE: usize = 4;
/// Total levels.
pub const NUMBER_LEVELS: usize = NUMBER_OCTAVES * LEVELS_PER_OCTAVE;

/// Per-level addressing record for the flat-buffer layout.
///
/// Must match `struct Lookup` in `kernels/common.cl` exactly.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupEntry {
    /// Pixels in all earlier levels.
    pub previous_pixels: i32,
    pub img_width: i32,
    pub img_height: i32,
}

/// Validated base dimensions of a pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PyramidShape {
    width: usize,
    height: usize,
}

impl PyramidShape {
    /// Both dimensions must be non-zero and divisible by
    /// `2^(NUMBER_OCTAVES - 1)` so every halfsample source is even.
    pub fn new(width: usize, height: usize) -> PyrResult<Self> {
        contract!(
            width > 0 && height > 0,
            "pyramid source must be non-empty, got {width}x{height}"
        );
        let align = 1 << (NUMBER_OCTAVES - 1);
        contract!(
            width % align == 0 && height % align == 0,
            "pyramid source {width}x{height} must be divisible by {align} so every octave halves evenly"
        );
        let bound = width
            .checked_mul(height)
            .and_then(|p| p.checked_mul(NUMBER_LEVELS));
        contract!(
            bound.is_some_and(|b| b <= i32::MAX as usize),
            "pyramid source {width}x{height} overflows the 32-bit lookup table"
        );
        Ok(Self { width, height })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// `(width, height)` shared by all levels of octave `o`.
    pub fn octave_size(&self, octave: usize) -> (usize, usize) {
        (self.width >> octave, self.height >> octave)
    }

    /// `(width, height)` of level `i`.
    pub fn level_size(&self, level: usize) -> (usize, usize) {
        self.octave_size(octave_of(level))
    }

    /// Pixels in level `i`.
    pub fn level_pixels(&self, level: usize) -> usize {
        let (w, h) = self.level_size(level);
        w * h
    }

    /// Pixels in the whole pyramid.
    pub fn total_pixels(&self) -> usize {
        (0..NUMBER_LEVELS).map(|i| self.level_pixels(i)).sum()
    }

    /// Addressing table, one entry per level. Offsets stay below
    /// `width * height * NUMBER_LEVELS`, which `new` bounds by `i32::MAX`.
    pub fn lookup_table(&self) -> Vec<LookupEntry> {
        let mut previous = 0usize;
        (0..NUMBER_LEVELS)
            .map(|i| {
                let (w, h) = self.level_size(i);
                let entry = LookupEntry {
                    previous_pixels: previous as i32,
                    img_width: w as i32,
                    img_height: h as i32,
                };
                previous += w * h;
                entry
            })
            .collect()
    }
}

/// Octave that contains level `i`.
pub fn octave_of(level: usize) -> usize {
    level / LEVELS_PER_OCTAVE
}

/// First level of octave `o`.
pub fn octave_base(octave: usize) -> usize {
    octave * LEVELS_PER_OCTAVE
}

/// Level `i` is produced by halfsampling rather than copying.
pub fn starts_octave(level: usize) -> bool {
    level % LEVELS_PER_OCTAVE == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_entry_layout() {
        assert_eq!(std::mem::size_of::<LookupEntry>(), 12);
        assert_eq!(std::mem::align_of::<LookupEntry>(), 4);
    }

    #[test]
    fn test_256_scenario() {
        let shape = PyramidShape::new(256, 256).unwrap();
        let expected = [256, 128, 64, 32];
        for level in 0..NUMBER_LEVELS {
            let e = expected[octave_of(level)];
            assert_eq!(shape.level_size(level), (e, e), "level {level}");
        }
        let table = shape.lookup_table();
        assert_eq!(table.len(), NUMBER_LEVELS);
        assert_eq!(table[0].previous_pixels, 0);
        assert_eq!(table[1].previous_pixels, 256 * 256);
        assert_eq!(table[4].previous_pixels, 4 * 256 * 256);
        assert_eq!(table[5].previous_pixels, 4 * 256 * 256 + 128 * 128);
    }

    #[test]
    fn test_lookup_is_cumulative() {
        let shape = PyramidShape::new(640, 480).unwrap();
        let table = shape.lookup_table();
        for i in 1..NUMBER_LEVELS {
            let prev = table[i - 1];
            assert_eq!(
                table[i].previous_pixels,
                prev.previous_pixels + prev.img_width * prev.img_height
            );
        }
        let last = table[NUMBER_LEVELS - 1];
        assert_eq!(
            (last.previous_pixels + last.img_width * last.img_height) as usize,
            shape.total_pixels()
        );
    }

    #[test]
    fn test_floor_division_per_octave() {
        let shape = PyramidShape::new(648, 488).unwrap();
        for o in 0..NUMBER_OCTAVES {
            assert_eq!(shape.octave_size(o), (648 / (1 << o), 488 / (1 << o)));
        }
    }

    #[test]
    fn test_rejects_empty_and_odd() {
        assert!(PyramidShape::new(0, 256).is_err());
        assert!(PyramidShape::new(256, 0).is_err());
        assert!(PyramidShape::new(252, 256).is_err());
        assert!(PyramidShape::new(256, 250).is_err());
    }

    #[test]
    fn test_rejects_oversized() {
        assert!(matches!(
            PyramidShape::new(1 << 40, 1 << 40),
            Err(crate::PyrError::Contract(_))
        ));
        assert!(PyramidShape::new(usize::MAX - 7, 8).is_err());
        // 16 levels of 8192x8192 exceed i32::MAX; 8192x4096 fits.
        assert!(PyramidShape::new(8192, 16384).is_err());
        assert!(PyramidShape::new(8192, 4096).is_ok());
    }

    #[test]
    fn test_octave_helpers() {
        assert_eq!(octave_of(7), 1);
        assert_eq!(octave_base(3), 12);
        assert!(starts_octave(8));
        assert!(!starts_octave(9));
    }
}
