//! Frame rates.
//!
//! Kept as rationals so fractional camera rates (23.976, 29.97) survive
//! exactly.

use num_rational::Rational64;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Frame rate as a rational number (e.g., 24000/1001 for 23.976 fps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    #[inline]
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Build from a rate stored as fps × 1000, the footer encoding.
    /// Non-positive values fall back to the default rate.
    pub fn from_millis(fps_x1000: i32) -> Self {
        if fps_x1000 <= 0 {
            return Self::default();
        }
        let rate = Rational64::new(fps_x1000 as i64, 1000);
        Self::new(*rate.numer() as u32, *rate.denom() as u32)
    }

    /// Build from numerator/denominator read from a file, rejecting zeros.
    pub fn from_parts(numerator: u32, denominator: u32) -> Self {
        if numerator == 0 || denominator == 0 {
            Self::default()
        } else {
            Self::new(numerator, denominator)
        }
    }

    #[inline]
    pub fn to_fps_f64(self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    pub const FPS_23_976: Self = Self::new(24000, 1001);
    pub const FPS_24: Self = Self::new(24, 1);
    pub const FPS_25: Self = Self::new(25, 1);
    pub const FPS_29_97: Self = Self::new(30000, 1001);
    pub const FPS_30: Self = Self::new(30, 1);
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::FPS_25
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fps = self.to_fps_f64();
        if (fps - fps.round()).abs() < 0.001 {
            write!(f, "{} fps", fps.round() as u32)
        } else {
            write!(f, "{:.3} fps", fps)
        }
    }
}
