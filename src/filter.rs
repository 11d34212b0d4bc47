//! Filter kernel descriptors.
//!
//! A filter is either a *complete* 2D coefficient matrix or a
//! *separable* pair of 1D vectors whose outer product is the complete
//! matrix. Descriptors are validated once at construction so the
//! dispatch engine can trust their shape.
//!
//! Coefficients are applied as a correlation (no kernel flip), the
//! convention shared by the device kernels and [`crate::reference`].

use crate::{contract, PyrResult};

use serde::{Deserialize, Serialize};

/// Kernel sizes that have a size-specialized ("unrolled") device entry point.
pub const UNROLLED_SIZES: [usize; 4] = [3, 5, 7, 9];

/// Largest half extent a local (tiled) kernel can stage. Must match
/// `MAX_HALF` in `kernels/common.cl`.
pub const MAX_LOCAL_HALF: usize = 8;

/// Work-group edge used by every tiled dispatch. Must match `TILE` in
/// `kernels/common.cl`.
pub const TILE: usize = 16;

/// Border extrapolation mode passed to every filter kernel.
///
/// The discriminants are the values the device kernels test against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum BorderMode {
    /// `aaaa|abcd|dddd`
    Replicate = 1,
    /// `dcb|abcd|cba`
    #[default]
    Reflect101 = 4,
}

impl BorderMode {
    /// Decode a raw border value, rejecting anything but the two
    /// supported modes.
    pub fn from_raw(raw: i32) -> PyrResult<Self> {
        match raw {
            1 => Ok(Self::Replicate),
            4 => Ok(Self::Reflect101),
            other => Err(crate::PyrError::Contract(format!(
                "unsupported border mode {other} (expected REPLICATE=1 or REFLECT101=4)"
            ))),
        }
    }

    /// Value bound as the trailing kernel argument.
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Map an out-of-range coordinate back into `0..n`.
    pub fn index(self, p: isize, n: usize) -> usize {
        let n = n as isize;
        match self {
            Self::Replicate => p.clamp(0, n - 1) as usize,
            Self::Reflect101 => {
                if n == 1 {
                    return 0;
                }
                let mut p = p;
                while p < 0 || p >= n {
                    if p < 0 {
                        p = -p;
                    }
                    if p >= n {
                        p = 2 * n - 2 - p;
                    }
                }
                p as usize
            }
        }
    }
}

impl std::str::FromStr for BorderMode {
    type Err = crate::PyrError;

    fn from_str(s: &str) -> PyrResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "replicate" => Ok(Self::Replicate),
            "reflect101" | "default" => Ok(Self::Reflect101),
            other => Err(crate::PyrError::Config(format!("unknown border mode '{other}'"))),
        }
    }
}

/// Element storage of a host [`Matrix`].
#[derive(Debug, Clone, PartialEq)]
pub enum MatrixData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
}

impl MatrixData {
    fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
            Self::I32(v) => v.len(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::I32(_) => "i32",
        }
    }
}

/// Row-major host matrix with a runtime element type.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: MatrixData,
}

impl Matrix {
    /// Wrap row-major data. Fails if the element count does not match.
    pub fn new(rows: usize, cols: usize, data: MatrixData) -> PyrResult<Self> {
        contract!(
            data.len() == rows * cols,
            "matrix data has {} elements, expected {rows}x{cols}",
            data.len()
        );
        Ok(Self { rows, cols, data })
    }

    /// `rows × cols` f32 matrix.
    pub fn from_f32(rows: usize, cols: usize, data: Vec<f32>) -> PyrResult<Self> {
        Self::new(rows, cols, MatrixData::F32(data))
    }

    /// Column vector (`len × 1`).
    pub fn column(data: Vec<f32>) -> Self {
        Self {
            rows: data.len(),
            cols: 1,
            data: MatrixData::F32(data),
        }
    }

    /// Row vector (`1 × len`).
    pub fn row(data: Vec<f32>) -> Self {
        Self {
            rows: 1,
            cols: data.len(),
            data: MatrixData::F32(data),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> &MatrixData {
        &self.data
    }

    /// f32 coefficients, or `None` for any other element type.
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            MatrixData::F32(v) => Some(v),
            _ => None,
        }
    }

    /// Swap rows and columns.
    pub fn transpose(&self) -> Self {
        fn flip<T: Copy>(v: &[T], rows: usize, cols: usize) -> Vec<T> {
            let mut out = Vec::with_capacity(v.len());
            for c in 0..cols {
                for r in 0..rows {
                    out.push(v[r * cols + c]);
                }
            }
            out
        }
        let data = match &self.data {
            MatrixData::F32(v) => MatrixData::F32(flip(v, self.rows, self.cols)),
            MatrixData::F64(v) => MatrixData::F64(flip(v, self.rows, self.cols)),
            MatrixData::I32(v) => MatrixData::I32(flip(v, self.rows, self.cols)),
        };
        Self {
            rows: self.cols,
            cols: self.rows,
            data,
        }
    }

    pub fn is_column(&self) -> bool {
        self.cols == 1
    }

    pub fn is_row(&self) -> bool {
        self.rows == 1
    }
}

fn is_odd_extent(n: usize) -> bool {
    n % 2 == 1
}

fn require_f32<'a>(m: &'a Matrix, what: &str) -> PyrResult<&'a [f32]> {
    contract!(!m.is_empty(), "{what}: empty kernel");
    m.as_f32().ok_or_else(|| {
        crate::PyrError::Contract(format!(
            "{what}: kernel must be single-channel f32, got {}",
            m.data.type_name()
        ))
    })
}

/// Validated non-separable kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterKernel {
    rows: usize,
    cols: usize,
    coefficients: Vec<f32>,
}

impl FilterKernel {
    /// Validate a complete kernel: f32, odd extents, larger than 1×1.
    pub fn new(m: &Matrix) -> PyrResult<Self> {
        let coefficients = require_f32(m, "complete kernel")?.to_vec();
        contract!(
            is_odd_extent(m.rows) && is_odd_extent(m.cols) && m.len() > 1,
            "complete kernel must have odd extents larger than 1x1, got {}x{}",
            m.rows,
            m.cols
        );
        Ok(Self {
            rows: m.rows,
            cols: m.cols,
            coefficients,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    pub fn rows_half(&self) -> usize {
        self.rows / 2
    }

    pub fn cols_half(&self) -> usize {
        self.cols / 2
    }

    pub fn coefficients(&self) -> &[f32] {
        &self.coefficients
    }

    /// `{rows}x{cols}` suffix of the size-specialized entry point.
    pub fn size_name(&self) -> String {
        format!("{}x{}", self.rows, self.cols)
    }

    /// Square kernel of a size that has an unrolled entry point.
    pub fn is_unrolled(&self) -> bool {
        self.rows == self.cols && UNROLLED_SIZES.contains(&self.rows)
    }

    /// Vector kernel (one axis of a separable pair) with an unrolled entry point.
    pub(crate) fn is_unrolled_vector(&self) -> bool {
        (self.rows == 1 && UNROLLED_SIZES.contains(&self.cols))
            || (self.cols == 1 && UNROLLED_SIZES.contains(&self.rows))
    }

    /// Whether the halo fits the local tile.
    pub fn fits_local_tile(&self) -> bool {
        self.rows_half() <= MAX_LOCAL_HALF && self.cols_half() <= MAX_LOCAL_HALF
    }
}

/// Validated separable pair; `a` is applied first, then `b`.
#[derive(Debug, Clone, PartialEq)]
pub struct SeparableKernel {
    a: FilterKernel,
    b: FilterKernel,
}

impl SeparableKernel {
    /// Validate a pair: each operand a pure f32 vector of odd length > 1,
    /// one a column and the other a row.
    pub fn new(a: &Matrix, b: &Matrix) -> PyrResult<Self> {
        let a_coeffs = require_f32(a, "separable operand A")?;
        let b_coeffs = require_f32(b, "separable operand B")?;
        contract!(
            (a.is_column() && b.is_row()) || (a.is_row() && b.is_column()),
            "separable pair needs one column and one row vector, got {}x{} and {}x{}",
            a.rows,
            a.cols,
            b.rows,
            b.cols
        );
        for (m, name) in [(a, "A"), (b, "B")] {
            contract!(
                m.len() > 1 && is_odd_extent(m.len()),
                "separable operand {name} must have odd length > 1, got {}",
                m.len()
            );
        }
        Ok(Self {
            a: FilterKernel {
                rows: a.rows,
                cols: a.cols,
                coefficients: a_coeffs.to_vec(),
            },
            b: FilterKernel {
                rows: b.rows,
                cols: b.cols,
                coefficients: b_coeffs.to_vec(),
            },
        })
    }

    pub fn a(&self) -> &FilterKernel {
        &self.a
    }

    pub fn b(&self) -> &FilterKernel {
        &self.b
    }

    /// The column operand (vertical pass).
    pub fn vertical(&self) -> &FilterKernel {
        if self.a.cols == 1 {
            &self.a
        } else {
            &self.b
        }
    }

    /// The row operand (horizontal pass).
    pub fn horizontal(&self) -> &FilterKernel {
        if self.a.rows == 1 {
            &self.a
        } else {
            &self.b
        }
    }

    /// Outer product of the column and row operands.
    pub fn to_complete(&self) -> FilterKernel {
        let col = self.vertical();
        let row = self.horizontal();
        let mut coefficients = Vec::with_capacity(col.len() * row.len());
        for &c in col.coefficients() {
            for &r in row.coefficients() {
                coefficients.push(c * r);
            }
        }
        FilterKernel {
            rows: col.len(),
            cols: row.len(),
            coefficients,
        }
    }

    /// Both passes have unrolled vector entry points.
    pub fn is_unrolled(&self) -> bool {
        self.a.is_unrolled_vector() && self.b.is_unrolled_vector()
    }

    /// Both operands have the same shapes as `other`'s.
    pub fn same_shape(&self, other: &Self) -> bool {
        self.a.rows == other.a.rows
            && self.a.cols == other.a.cols
            && self.b.rows == other.b.rows
            && self.b.cols == other.b.cols
    }
}
