//! Per-code-block parameters and coding-session state.
//!
//! The flag grid carries one `u32` per coefficient with a one-cell sentinel
//! border, so neighbor lookups during context modeling never branch on
//! bounds. Significance and sign of a coefficient are mirrored into all 8
//! neighbors' cells the moment it becomes significant.

use crate::context::{
    Orientation, SIG, SIGN, SIGN_E, SIGN_N, SIGN_S, SIGN_W, SIG_E, SIG_N, SIG_NE,
    SIG_NEIGHBORS, SIG_NW, SIG_S, SIG_SE, SIG_SW, SIG_W, VISITED,
};
use crate::error::CodingError;

/// Code-block style: bypass the arithmetic coder (raw bits) for the
/// significance and refinement passes of the lower bit-planes
/// (ISO/IEC 15444-1 Table A.18).
pub const STYLE_LAZY: u8 = 0x01;
/// Code-block style: reset context states after every coding pass.
pub const STYLE_RESET: u8 = 0x02;
/// Code-block style: terminate the arithmetic coder after every pass, so
/// every pass boundary is byte-aligned and independently truncatable.
pub const STYLE_TERMALL: u8 = 0x04;
/// Code-block style: flush terminated passes with predictable termination
/// instead of the plain flush, so a decoder can detect corruption at pass
/// boundaries.
pub const STYLE_PTERM: u8 = 0x10;
/// Code-block style: code a four-symbol segmentation marker in the uniform
/// context at the end of each cleanup pass.
pub const STYLE_SEGSYM: u8 = 0x20;

/// Largest code-block side length permitted by the codestream syntax.
const MAX_DIMENSION: usize = 1 << 10;

/// Magnitudes must fit in an `i32` with headroom for the ROI up-shift.
pub(crate) const MAX_MAGNITUDE_BITS: u32 = 30;

/// Static per-code-block coding parameters, shared by the encoder and
/// decoder of the same block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeBlockParams {
    pub(crate) width: usize,
    pub(crate) height: usize,
    pub(crate) orientation: Orientation,
    pub(crate) style: u8,
    pub(crate) roi_shift: u32,
}

impl CodeBlockParams {
    pub fn new(width: usize, height: usize, orientation: Orientation) -> Result<Self, CodingError> {
        if width == 0 || width > MAX_DIMENSION {
            return Err(CodingError::InvalidWidth);
        }
        if height == 0 || height > MAX_DIMENSION {
            return Err(CodingError::InvalidHeight);
        }
        Ok(Self {
            width,
            height,
            orientation,
            style: 0,
            roi_shift: 0,
        })
    }

    /// Set the code-block style bits ([`STYLE_LAZY`] | [`STYLE_RESET`] |
    /// [`STYLE_TERMALL`] | [`STYLE_PTERM`] | [`STYLE_SEGSYM`]).
    pub fn with_style(mut self, style: u8) -> Self {
        self.style = style;
        self
    }

    /// Set the ROI MaxShift value. Coefficients outside the region of
    /// interest are up-shifted by the caller before encoding; the decoder
    /// reverses the shift for any magnitude that reaches `1 << shift`.
    pub fn with_roi_shift(mut self, shift: u32) -> Result<Self, CodingError> {
        if shift >= MAX_MAGNITUDE_BITS {
            return Err(CodingError::InvalidRoiShift);
        }
        self.roi_shift = shift;
        Ok(self)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub(crate) fn lazy(&self) -> bool {
        self.style & STYLE_LAZY != 0
    }

    pub(crate) fn termall(&self) -> bool {
        self.style & STYLE_TERMALL != 0
    }

    pub(crate) fn predictable_termination(&self) -> bool {
        self.style & STYLE_PTERM != 0
    }

    pub(crate) fn reset_contexts(&self) -> bool {
        self.style & STYLE_RESET != 0
    }

    pub(crate) fn segmentation_symbols(&self) -> bool {
        self.style & STYLE_SEGSYM != 0
    }
}

/// Mutable state of one code-block coding session: the sentinel-bordered
/// flag and coefficient grids.
///
/// `Significant`/`Sign` are monotonic for the session lifetime; `Visited`
/// is per-bit-plane scratch.
pub(crate) struct CodeBlockState {
    width: usize,
    height: usize,
    /// Padded row stride (`width + 2`).
    stride: usize,
    flags: Vec<u32>,
    data: Vec<i32>,
}

impl CodeBlockState {
    pub(crate) fn width(&self) -> usize {
        self.width
    }

    pub(crate) fn height(&self) -> usize {
        self.height
    }

    pub(crate) fn new(width: usize, height: usize) -> Self {
        let stride = width + 2;
        let cells = stride * (height + 2);
        Self {
            width,
            height,
            stride,
            flags: vec![0; cells],
            data: vec![0; cells],
        }
    }

    /// Grid index for the coefficient at `(x, y)` in block coordinates.
    #[inline]
    pub(crate) fn idx(&self, x: usize, y: usize) -> usize {
        (y + 1) * self.stride + (x + 1)
    }

    #[inline]
    pub(crate) fn flags(&self, idx: usize) -> u32 {
        self.flags[idx]
    }

    #[inline]
    pub(crate) fn set_flag(&mut self, idx: usize, flag: u32) {
        self.flags[idx] |= flag;
    }

    #[inline]
    pub(crate) fn clear_flag(&mut self, idx: usize, flag: u32) {
        self.flags[idx] &= !flag;
    }

    #[inline]
    pub(crate) fn value(&self, idx: usize) -> i32 {
        self.data[idx]
    }

    #[inline]
    pub(crate) fn set_value(&mut self, idx: usize, value: i32) {
        self.data[idx] = value;
    }

    /// Magnitude bit of the coefficient at `idx` in the given bit-plane.
    #[inline]
    pub(crate) fn magnitude_bit(&self, idx: usize, plane: u32) -> u32 {
        (self.data[idx].unsigned_abs() >> plane) & 1
    }

    /// Load coefficients into the interior of the padded grid.
    pub(crate) fn load(&mut self, coeffs: &[i32]) -> Result<(), CodingError> {
        if coeffs.len() != self.width * self.height {
            return Err(CodingError::DataSizeMismatch);
        }
        for y in 0..self.height {
            for x in 0..self.width {
                let idx = self.idx(x, y);
                self.data[idx] = coeffs[y * self.width + x];
            }
        }
        Ok(())
    }

    /// Copy the interior of the padded grid back out, row-major.
    pub(crate) fn extract(&self) -> Vec<i32> {
        let mut out = Vec::with_capacity(self.width * self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                out.push(self.data[self.idx(x, y)]);
            }
        }
        out
    }

    /// Clear the visited bit on every cell. Runs at the start of each
    /// bit-plane.
    pub(crate) fn clear_visited(&mut self) {
        for f in &mut self.flags {
            *f &= !VISITED;
        }
    }

    /// Mark the coefficient at `(x, y)` significant and mirror its
    /// significance (and sign) into the 8 neighbor cells. The sentinel
    /// border absorbs edge writes.
    pub(crate) fn set_significant(&mut self, x: usize, y: usize, negative: bool) {
        let idx = self.idx(x, y);
        self.flags[idx] |= SIG;
        if negative {
            self.flags[idx] |= SIGN;
        }

        let north = idx - self.stride;
        let south = idx + self.stride;

        self.flags[north] |= SIG_S;
        self.flags[south] |= SIG_N;
        self.flags[idx - 1] |= SIG_E;
        self.flags[idx + 1] |= SIG_W;
        if negative {
            self.flags[north] |= SIGN_S;
            self.flags[south] |= SIGN_N;
            self.flags[idx - 1] |= SIGN_E;
            self.flags[idx + 1] |= SIGN_W;
        }

        self.flags[north - 1] |= SIG_SE;
        self.flags[north + 1] |= SIG_SW;
        self.flags[south - 1] |= SIG_NE;
        self.flags[south + 1] |= SIG_NW;
    }

    /// Whether the 4-sample column starting at `(x, k)` can use run-length
    /// coding in a cleanup pass: nothing in it visited or significant, and
    /// no significant neighbor anywhere along it.
    pub(crate) fn run_eligible(&self, x: usize, k: usize) -> bool {
        (0..4).all(|dy| {
            let flags = self.flags[self.idx(x, k + dy)];
            flags & (VISITED | SIG | SIG_NEIGHBORS) == 0
        })
    }

    /// Index of the most significant non-zero bit-plane across all loaded
    /// coefficients, or `None` when every coefficient is zero.
    pub(crate) fn max_bit_plane(&self) -> Option<u32> {
        let max_abs = self.data.iter().map(|v| v.unsigned_abs()).max().unwrap_or(0);
        if max_abs == 0 {
            None
        } else {
            Some(31 - max_abs.leading_zeros())
        }
    }
}
