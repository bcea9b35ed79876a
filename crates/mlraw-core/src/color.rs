//! Sensor calibration: black/white levels and the camera color matrix.
//!
//! The matrix is carried through untouched for the renderer; no color
//! science happens here.

use glam::Mat3;
use serde::{Deserialize, Serialize};

/// Black and white sample levels of the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorLevels {
    pub black: u32,
    pub white: u32,
}

impl SensorLevels {
    #[inline]
    pub const fn new(black: u32, white: u32) -> Self {
        Self { black, white }
    }

    /// Usable signal range.
    #[inline]
    pub fn range(self) -> u32 {
        self.white.saturating_sub(self.black)
    }

    /// Defaults for a sample depth: zero black, full-scale white.
    pub fn for_bits(bits_per_sample: u32) -> Self {
        let white = if bits_per_sample >= 32 {
            u32::MAX
        } else {
            (1u32 << bits_per_sample) - 1
        };
        Self { black: 0, white }
    }
}

impl Default for SensorLevels {
    fn default() -> Self {
        Self::for_bits(14)
    }
}

/// 3x3 camera color matrix, stored row-major on disk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorMatrix(pub Mat3);

impl ColorMatrix {
    pub const IDENTITY: Self = Self(Mat3::IDENTITY);

    /// Build from 9 row-major `(numerator, denominator)` rationals. Zero
    /// denominators count as 1.
    pub fn from_rationals(values: &[(i32, i32); 9]) -> Self {
        let mut rows = [0f32; 9];
        for (dst, &(num, den)) in rows.iter_mut().zip(values.iter()) {
            let den = if den == 0 { 1 } else { den };
            *dst = num as f32 / den as f32;
        }
        Self::from_row_major(&rows)
    }

    /// Build from 9 row-major floats.
    pub fn from_row_major(rows: &[f32; 9]) -> Self {
        // glam is column-major.
        Self(Mat3::from_cols_array(rows).transpose())
    }

    /// Row-major element access.
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.0.col(col)[row]
    }

    /// Row-major flat copy.
    pub fn to_row_major(&self) -> [f32; 9] {
        self.0.transpose().to_cols_array()
    }

    /// True when every element is zero (a camera that wrote no matrix).
    pub fn is_zero(&self) -> bool {
        self.to_row_major().iter().all(|v| *v == 0.0)
    }
}

impl Default for ColorMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}
