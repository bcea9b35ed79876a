//! The 40-word sensor description shared by the footer and `RAWI` blocks.

use mlraw_core::{ColorMatrix, Rect, RawError, Result, SensorLevels};
use serde::{Deserialize, Serialize};

/// Size of the sensor description on disk.
pub const SENSOR_INFO_SIZE: usize = 40 * 4;

/// Sensor description as written by the camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorInfo {
    pub api_version: i32,
    /// Full sensor buffer height, before cropping.
    pub buffer_height: i32,
    /// Full sensor buffer width, before cropping.
    pub buffer_width: i32,
    pub pitch: i32,
    pub frame_size: i32,
    pub bits_per_pixel: i32,
    pub black_level: i32,
    pub white_level: i32,
    pub crop: Rect,
    pub active_area: Rect,
    pub exposure_bias: [i32; 2],
    pub cfa_pattern: i32,
    pub calibration_illuminant: i32,
    pub color_matrix: ColorMatrix,
    pub dynamic_range: i32,
}

impl SensorInfo {
    /// Parse from the little-endian 40-word layout.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < SENSOR_INFO_SIZE {
            return Err(RawError::corrupt(format!(
                "sensor info needs {} bytes, have {}",
                SENSOR_INFO_SIZE,
                data.len()
            )));
        }
        let word = |i: usize| {
            i32::from_le_bytes([data[i * 4], data[i * 4 + 1], data[i * 4 + 2], data[i * 4 + 3]])
        };

        let mut rationals = [(0i32, 1i32); 9];
        for (i, r) in rationals.iter_mut().enumerate() {
            *r = (word(21 + 2 * i), word(22 + 2 * i));
        }

        let non_neg = |v: i32| v.max(0) as u32;
        Ok(Self {
            api_version: word(0),
            // word 1 is a camera memory address
            buffer_height: word(2),
            buffer_width: word(3),
            pitch: word(4),
            frame_size: word(5),
            bits_per_pixel: word(6),
            black_level: word(7),
            white_level: word(8),
            crop: Rect::new(
                non_neg(word(9)),
                non_neg(word(10)),
                non_neg(word(11)),
                non_neg(word(12)),
            ),
            active_area: Rect::from_edges(word(13), word(14), word(15), word(16)),
            exposure_bias: [word(17), word(18)],
            cfa_pattern: word(19),
            calibration_illuminant: word(20),
            color_matrix: ColorMatrix::from_rationals(&rationals),
            dynamic_range: word(39),
        })
    }

    /// Black/white levels; a white level of zero means full 14-bit scale.
    pub fn levels(&self) -> SensorLevels {
        let white = if self.white_level > 0 {
            self.white_level as u32
        } else {
            16383
        };
        SensorLevels::new(self.black_level.max(0) as u32, white)
    }

    /// Stored sample depth, 14 when the camera left it unset.
    pub fn bits_per_sample(&self) -> u32 {
        if self.bits_per_pixel > 0 {
            self.bits_per_pixel as u32
        } else {
            14
        }
    }

    /// Serialize back to the 40-word layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut words = [0i32; 40];
        words[0] = self.api_version;
        words[2] = self.buffer_height;
        words[3] = self.buffer_width;
        words[4] = self.pitch;
        words[5] = self.frame_size;
        words[6] = self.bits_per_pixel;
        words[7] = self.black_level;
        words[8] = self.white_level;
        words[9] = self.crop.x as i32;
        words[10] = self.crop.y as i32;
        words[11] = self.crop.width as i32;
        words[12] = self.crop.height as i32;
        words[13] = self.active_area.y as i32;
        words[14] = self.active_area.x as i32;
        words[15] = self.active_area.bottom() as i32;
        words[16] = self.active_area.right() as i32;
        words[17] = self.exposure_bias[0];
        words[18] = self.exposure_bias[1];
        words[19] = self.cfa_pattern;
        words[20] = self.calibration_illuminant;
        for (i, v) in self.color_matrix.to_row_major().iter().enumerate() {
            words[21 + 2 * i] = (v * 10000.0).round() as i32;
            words[22 + 2 * i] = 10000;
        }
        words[39] = self.dynamic_range;
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}
