//! Sensor geometry: image size, crop window and active area.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in sensor pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Create a new rectangle.
    #[inline]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a rectangle from `(top, left, bottom, right)` edges, the order
    /// sensor active areas are stored in. Inverted edges give an empty rect.
    pub fn from_edges(top: i32, left: i32, bottom: i32, right: i32) -> Self {
        let clamp = |v: i32| v.max(0) as u32;
        let (x, y) = (clamp(left), clamp(top));
        Self {
            x,
            y,
            width: clamp(right).saturating_sub(x),
            height: clamp(bottom).saturating_sub(y),
        }
    }

    /// Origin as `(x, y)`.
    #[inline]
    pub fn origin(self) -> (u32, u32) {
        (self.x, self.y)
    }

    /// Size as `(width, height)`.
    #[inline]
    pub fn size(self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Exclusive right edge.
    #[inline]
    pub fn right(self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    #[inline]
    pub fn bottom(self) -> u32 {
        self.y + self.height
    }

    /// Area in pixels.
    #[inline]
    pub fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Check if a pixel lies inside the rectangle.
    #[inline]
    pub fn contains(self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }
}

/// Fixed geometry of one clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SensorGeometry {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Bits per stored sample (14 for packed camera data, 16 or 8 otherwise).
    pub bits_per_sample: u32,
    /// Crop window the image was recorded from.
    pub crop: Rect,
    /// Sensor area carrying valid image data.
    pub active_area: Rect,
}

impl SensorGeometry {
    /// Geometry without crop information; crop and active area cover the image.
    pub fn new(width: u32, height: u32, bits_per_sample: u32) -> Self {
        let full = Rect::new(0, 0, width, height);
        Self {
            width,
            height,
            bits_per_sample,
            crop: full,
            active_area: full,
        }
    }

    /// Number of samples in one frame.
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Bytes one frame occupies in its stored bit depth.
    pub fn packed_frame_size(&self) -> usize {
        self.pixel_count() * self.bits_per_sample as usize / 8
    }
}
