//! Minimal TIFF/DNG reader for uncompressed raw frames.
//!
//! Reads just the tags a single-frame DNG needs for playback: dimensions,
//! sample depth, strip layout, levels, the color matrix, the active area and
//! the frame rate. Only uncompressed, strip-organised images are supported.

use mlraw_core::{ColorMatrix, FrameRate, RawError, Rect, Result};
use std::collections::HashMap;

mod tag {
    pub const NEW_SUBFILE_TYPE: u16 = 254;
    pub const IMAGE_WIDTH: u16 = 256;
    pub const IMAGE_LENGTH: u16 = 257;
    pub const BITS_PER_SAMPLE: u16 = 258;
    pub const COMPRESSION: u16 = 259;
    pub const PHOTOMETRIC: u16 = 262;
    pub const STRIP_OFFSETS: u16 = 273;
    pub const SAMPLES_PER_PIXEL: u16 = 277;
    pub const STRIP_BYTE_COUNTS: u16 = 279;
    pub const TILE_OFFSETS: u16 = 324;
    pub const SUB_IFDS: u16 = 330;
    pub const BLACK_LEVEL: u16 = 50714;
    pub const WHITE_LEVEL: u16 = 50717;
    pub const COLOR_MATRIX_1: u16 = 50721;
    pub const COLOR_MATRIX_2: u16 = 50722;
    pub const ACTIVE_AREA: u16 = 50829;
    pub const FRAME_RATE: u16 = 51044;
}

/// Photometric interpretation of Bayer data.
pub const PHOTOMETRIC_CFA: u32 = 32803;
/// Photometric interpretation of linear (demosaiced) raw data.
pub const PHOTOMETRIC_LINEAR_RAW: u32 = 34892;

#[derive(Debug, Clone, Copy)]
struct Entry {
    field_type: u16,
    count: u32,
    /// Offset of the value bytes within the file.
    value_at: usize,
}

type Ifd = HashMap<u16, Entry>;

#[derive(Clone, Copy)]
struct Reader<'a> {
    data: &'a [u8],
    big_endian: bool,
}

impl<'a> Reader<'a> {
    fn bytes<const N: usize>(&self, at: usize) -> Result<[u8; N]> {
        self.data
            .get(at..at + N)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| RawError::corrupt(format!("TIFF read past end at {at}")))
    }

    fn u16(&self, at: usize) -> Result<u16> {
        let b = self.bytes::<2>(at)?;
        Ok(if self.big_endian {
            u16::from_be_bytes(b)
        } else {
            u16::from_le_bytes(b)
        })
    }

    fn u32(&self, at: usize) -> Result<u32> {
        let b = self.bytes::<4>(at)?;
        Ok(if self.big_endian {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        })
    }

    fn ifd(&self, offset: usize) -> Result<Ifd> {
        let count = self.u16(offset)? as usize;
        let mut ifd = HashMap::with_capacity(count);
        for i in 0..count {
            let at = offset + 2 + i * 12;
            let tag = self.u16(at)?;
            let field_type = self.u16(at + 2)?;
            let count = self.u32(at + 4)?;
            let size = type_size(field_type) * count as usize;
            let value_at = if size <= 4 {
                at + 8
            } else {
                self.u32(at + 8)? as usize
            };
            ifd.insert(
                tag,
                Entry {
                    field_type,
                    count,
                    value_at,
                },
            );
        }
        Ok(ifd)
    }

    /// Integer values of a BYTE/SHORT/LONG field.
    fn integers(&self, entry: &Entry) -> Result<Vec<u32>> {
        (0..entry.count as usize)
            .map(|i| match entry.field_type {
                1 | 7 => self
                    .data
                    .get(entry.value_at + i)
                    .map(|&b| b as u32)
                    .ok_or_else(|| RawError::corrupt("TIFF byte value past end")),
                3 | 8 => self.u16(entry.value_at + i * 2).map(u32::from),
                4 | 9 => self.u32(entry.value_at + i * 4),
                other => Err(RawError::UnsupportedFormat(format!(
                    "TIFF field type {other} where an integer was expected"
                ))),
            })
            .collect()
    }

    /// Numeric values of any integer or rational field.
    fn numbers(&self, entry: &Entry) -> Result<Vec<f64>> {
        match entry.field_type {
            5 | 10 => (0..entry.count as usize)
                .map(|i| {
                    let at = entry.value_at + i * 8;
                    let (n, d) = (self.u32(at)?, self.u32(at + 4)?);
                    Ok(if entry.field_type == 10 {
                        ratio(n as i32 as f64, d as i32 as f64)
                    } else {
                        ratio(n as f64, d as f64)
                    })
                })
                .collect(),
            _ => Ok(self
                .integers(entry)?
                .into_iter()
                .map(f64::from)
                .collect()),
        }
    }
}

fn ratio(n: f64, d: f64) -> f64 {
    if d == 0.0 {
        0.0
    } else {
        n / d
    }
}

fn type_size(field_type: u16) -> usize {
    match field_type {
        1 | 2 | 6 | 7 => 1,
        3 | 8 => 2,
        4 | 9 | 11 => 4,
        5 | 10 | 12 => 8,
        _ => 1,
    }
}

/// Layout and calibration of the raw image in a TIFF/DNG file.
#[derive(Debug, Clone, PartialEq)]
pub struct TiffRaw {
    pub width: u32,
    pub height: u32,
    pub bits_per_sample: u32,
    pub samples_per_pixel: u32,
    pub photometric: u32,
    pub big_endian: bool,
    pub black_level: Option<u32>,
    pub white_level: Option<u32>,
    pub color_matrix: Option<ColorMatrix>,
    pub active_area: Option<Rect>,
    pub frame_rate: Option<FrameRate>,
    strips: Vec<(usize, usize)>,
}

impl TiffRaw {
    /// Parse the tags of the full-resolution image.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let big_endian = match data.get(..2) {
            Some(b"II") => false,
            Some(b"MM") => true,
            _ => return Err(RawError::UnsupportedFormat("not a TIFF file".into())),
        };
        let r = Reader { data, big_endian };
        if r.u16(2)? != 42 {
            return Err(RawError::UnsupportedFormat("not a classic TIFF file".into()));
        }
        let ifd0 = r.ifd(r.u32(4)? as usize)?;

        let mut candidates = vec![ifd0.clone()];
        if let Some(sub) = ifd0.get(&tag::SUB_IFDS) {
            for offset in r.integers(sub)? {
                candidates.push(r.ifd(offset as usize)?);
            }
        }
        let raw = candidates
            .iter()
            .find(|ifd| {
                let subfile = ifd
                    .get(&tag::NEW_SUBFILE_TYPE)
                    .and_then(|e| r.integers(e).ok())
                    .and_then(|v| v.first().copied())
                    .unwrap_or(0);
                subfile == 0 && ifd.contains_key(&tag::IMAGE_WIDTH)
            })
            .ok_or_else(|| RawError::corrupt("TIFF has no full-resolution image"))?;

        // Calibration may live in IFD0 rather than the raw IFD.
        let field = |t: u16| raw.get(&t).or_else(|| ifd0.get(&t));
        let first_int = |t: u16| -> Result<Option<u32>> {
            Ok(match field(t) {
                Some(e) => r.numbers(e)?.first().map(|v| v.round() as u32),
                None => None,
            })
        };

        if raw.contains_key(&tag::TILE_OFFSETS) {
            return Err(RawError::UnsupportedFormat("tiled TIFF images".into()));
        }
        let compression = first_int(tag::COMPRESSION)?.unwrap_or(1);
        if compression != 1 {
            return Err(RawError::UnsupportedFormat(format!(
                "TIFF compression {compression}"
            )));
        }

        let width = first_int(tag::IMAGE_WIDTH)?.unwrap_or(0);
        let height = first_int(tag::IMAGE_LENGTH)?.unwrap_or(0);
        if width == 0 || height == 0 {
            return Err(RawError::corrupt("TIFF image has no dimensions"));
        }

        let offsets = match raw.get(&tag::STRIP_OFFSETS) {
            Some(e) => r.integers(e)?,
            None => return Err(RawError::corrupt("TIFF image has no strips")),
        };
        let counts = match raw.get(&tag::STRIP_BYTE_COUNTS) {
            Some(e) => r.integers(e)?,
            None => return Err(RawError::corrupt("TIFF image has no strip sizes")),
        };
        let strips = offsets
            .into_iter()
            .zip(counts)
            .map(|(o, c)| (o as usize, c as usize))
            .collect();

        let color_matrix = match field(tag::COLOR_MATRIX_2).or_else(|| field(tag::COLOR_MATRIX_1)) {
            Some(e) => {
                let values = r.numbers(e)?;
                let rows: Option<[f32; 9]> = values
                    .iter()
                    .map(|&v| v as f32)
                    .collect::<Vec<_>>()
                    .try_into()
                    .ok();
                rows.map(|m| ColorMatrix::from_row_major(&m))
            }
            None => None,
        };

        let active_area = match field(tag::ACTIVE_AREA) {
            Some(e) => {
                let v = r.integers(e)?;
                (v.len() == 4).then(|| {
                    Rect::from_edges(v[0] as i32, v[1] as i32, v[2] as i32, v[3] as i32)
                })
            }
            None => None,
        };

        let frame_rate = match field(tag::FRAME_RATE) {
            Some(e) if e.field_type == 10 || e.field_type == 5 => {
                let n = r.u32(e.value_at)?;
                let d = r.u32(e.value_at + 4)?;
                Some(FrameRate::from_parts(n, d))
            }
            _ => None,
        };

        Ok(Self {
            width,
            height,
            bits_per_sample: first_int(tag::BITS_PER_SAMPLE)?.unwrap_or(1),
            samples_per_pixel: first_int(tag::SAMPLES_PER_PIXEL)?.unwrap_or(1),
            photometric: first_int(tag::PHOTOMETRIC)?.unwrap_or(0),
            big_endian,
            black_level: first_int(tag::BLACK_LEVEL)?,
            white_level: first_int(tag::WHITE_LEVEL)?,
            color_matrix,
            active_area,
            frame_rate,
            strips,
        })
    }

    /// Whether this holds single-channel sensor data.
    pub fn is_raw(&self) -> bool {
        self.samples_per_pixel == 1
            && (self.photometric == PHOTOMETRIC_CFA || self.photometric == PHOTOMETRIC_LINEAR_RAW)
    }

    /// The image bytes, strips concatenated.
    pub fn image_data(&self, data: &[u8]) -> Result<Vec<u8>> {
        let total = self
            .strips
            .iter()
            .fold(0usize, |sum, &(_, count)| sum.saturating_add(count));
        // strip sizes come from the file; never reserve more than it holds
        let mut out = Vec::with_capacity(total.min(data.len()));
        for &(offset, count) in &self.strips {
            if offset > data.len() {
                return Err(RawError::corrupt(format!(
                    "strip offset {offset} past end of {} byte file",
                    data.len()
                )));
            }
            let Some(strip) = data.get(offset..offset.saturating_add(count)) else {
                return Err(RawError::Truncated {
                    expected: total,
                    available: out.len() + (data.len() - offset),
                });
            };
            out.extend_from_slice(strip);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{frame_samples, patch_dng_strip, write_dng, TEST_BLACK, TEST_WHITE};
    use mlraw_core::bitunpack::unpack14to16;

    #[test]
    fn test_parse_packed_dng() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("f.dng");
        let samples = frame_samples(1, 16, 4);
        write_dng(&path, 16, 4, &samples, true);
        let data = std::fs::read(&path).unwrap();
        let t = TiffRaw::parse(&data).unwrap();
        assert_eq!((t.width, t.height, t.bits_per_sample), (16, 4, 14));
        assert_eq!(t.black_level, Some(TEST_BLACK));
        assert_eq!(t.white_level, Some(TEST_WHITE));
        assert_eq!(t.frame_rate, Some(FrameRate::FPS_23_976));
        assert!(t.is_raw());
        assert!(!t.big_endian);

        let bytes = t.image_data(&data).unwrap();
        let (unpacked, _) = unpack14to16(&bytes, true).unwrap();
        assert_eq!(unpacked, samples);
    }

    #[test]
    fn test_truncated_strip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("f.dng");
        write_dng(&path, 16, 4, &frame_samples(0, 16, 4), false);
        let mut data = std::fs::read(&path).unwrap();
        let t = TiffRaw::parse(&data).unwrap();
        data.truncate(data.len() - 10);
        assert!(matches!(
            t.image_data(&data),
            Err(RawError::Truncated { .. })
        ));
    }

    #[test]
    fn test_strip_past_end_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("f.dng");
        write_dng(&path, 16, 4, &frame_samples(0, 16, 4), true);
        patch_dng_strip(&path, 0xFFFF_FF00, 0);
        let data = std::fs::read(&path).unwrap();
        let t = TiffRaw::parse(&data).unwrap();
        assert!(matches!(t.image_data(&data), Err(RawError::Corrupt(_))));

        patch_dng_strip(&path, 8, u32::MAX);
        let data = std::fs::read(&path).unwrap();
        let t = TiffRaw::parse(&data).unwrap();
        assert!(matches!(
            t.image_data(&data),
            Err(RawError::Truncated { .. })
        ));
    }

    #[test]
    fn test_not_tiff() {
        assert!(matches!(
            TiffRaw::parse(b"GIF89a......"),
            Err(RawError::UnsupportedFormat(_))
        ));
    }
}
