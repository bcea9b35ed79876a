//! Raw frames in CPU memory.
//!
//! A [`Frame`] holds whatever the container produced for one index (packed
//! 14-bit bytes, 16-bit samples, a demosaiced RGB image, or nothing at all)
//! and converts it to 16-bit samples lazily, once, on first demand.

use crate::bitunpack;
use crate::camera::FrameSideData;
use crate::color::SensorLevels;
use crate::error::{RawError, Result};
use crate::geometry::SensorGeometry;
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};
use tracing::warn;

/// Thumbnail downscale factor (must be even to keep Bayer quads aligned).
pub const THUMB_SCALE: u32 = 8;

/// Source data handed to a frame by its container.
#[derive(Debug)]
pub enum FrameData {
    /// Packed 14-bit samples; `byte_swap` selects the big-endian TIFF layout.
    Packed14 { bytes: Vec<u8>, byte_swap: bool },
    /// Plain 16-bit Bayer samples.
    Samples16(Vec<u16>),
    /// Demosaiced interleaved RGB, normalized to 0..1.
    Rgb(Vec<f32>),
    /// No data: synthesize a black frame.
    Black,
}

#[derive(Debug)]
enum Source {
    Packed { bytes: Vec<u8>, byte_swap: bool },
    Samples,
    Demosaiced,
    Black,
}

/// RGB8 preview image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    /// Interleaved RGB, 3 bytes per pixel.
    pub rgb: Vec<u8>,
}

/// One frame of a clip.
///
/// `convert` is safe to call from any number of threads: the first caller
/// unpacks, the others block until the result is ready.
#[derive(Debug)]
pub struct Frame {
    index: usize,
    geometry: SensorGeometry,
    levels: SensorLevels,
    source: Source,
    raw_image: OnceLock<Vec<u16>>,
    rgb_image: RwLock<Option<Arc<[f32]>>>,
    side_data: Option<FrameSideData>,
}

/// Arc-wrapped frame for sharing between the cache, preloader and renderer.
pub type SharedFrame = Arc<Frame>;

impl Frame {
    /// Create a frame from container data.
    pub fn new(
        index: usize,
        geometry: SensorGeometry,
        levels: SensorLevels,
        data: FrameData,
    ) -> Self {
        let raw_image = OnceLock::new();
        let rgb_image = RwLock::new(None);
        let source = match data {
            FrameData::Packed14 { bytes, byte_swap } => Source::Packed { bytes, byte_swap },
            FrameData::Samples16(samples) => {
                let _ = raw_image.set(fit_to(samples, geometry.pixel_count(), levels.black));
                Source::Samples
            }
            FrameData::Rgb(rgb) => {
                *rgb_image.write() = Some(Arc::from(rgb));
                Source::Demosaiced
            }
            FrameData::Black => Source::Black,
        };
        Self {
            index,
            geometry,
            levels,
            source,
            raw_image,
            rgb_image,
            side_data: None,
        }
    }

    /// A synthesized black frame with the clip's geometry.
    pub fn black(index: usize, geometry: SensorGeometry, levels: SensorLevels) -> Self {
        Self::new(index, geometry, levels, FrameData::Black)
    }

    /// Attach the camera state in effect for this frame.
    pub fn with_side_data(mut self, side_data: FrameSideData) -> Self {
        self.side_data = Some(side_data);
        self
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.geometry.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.geometry.height
    }

    #[inline]
    pub fn geometry(&self) -> &SensorGeometry {
        &self.geometry
    }

    #[inline]
    pub fn black_level(&self) -> u32 {
        self.levels.black
    }

    #[inline]
    pub fn white_level(&self) -> u32 {
        self.levels.white
    }

    #[inline]
    pub fn bits_per_sample(&self) -> u32 {
        self.geometry.bits_per_sample
    }

    /// Whether the source bytes use the big-endian TIFF packing.
    pub fn byte_swap(&self) -> bool {
        matches!(self.source, Source::Packed { byte_swap: true, .. })
    }

    /// True for frames synthesized because no data was available.
    pub fn is_black(&self) -> bool {
        matches!(self.source, Source::Black)
    }

    pub fn side_data(&self) -> Option<&FrameSideData> {
        self.side_data.as_ref()
    }

    /// Unpack to 16-bit samples if not done already.
    ///
    /// Returns `None` for frames that arrived demosaiced and have no raw
    /// samples.
    pub fn convert(&self) -> Option<&[u16]> {
        if matches!(self.source, Source::Demosaiced) {
            return None;
        }
        Some(self.raw_image.get_or_init(|| self.decode_raw()).as_slice())
    }

    /// 16-bit samples, if already converted.
    pub fn raw_image(&self) -> Option<&[u16]> {
        self.raw_image.get().map(Vec::as_slice)
    }

    /// Converted samples as a native-endian byte view, for raw writers.
    pub fn raw_bytes(&self) -> Option<&[u8]> {
        self.convert().map(bytemuck::cast_slice)
    }

    /// Demosaic-ready float buffer normalized to the black/white levels.
    pub fn float_image(&self) -> Option<Vec<f32>> {
        self.convert()
            .map(|raw| bitunpack::expand_to_float(raw, self.levels.black, self.levels.white))
    }

    /// Demosaiced RGB image, if the renderer has produced one.
    pub fn rgb_image(&self) -> Option<Arc<[f32]>> {
        self.rgb_image.read().clone()
    }

    /// Store the renderer's demosaiced output (3 floats per pixel).
    pub fn set_rgb_image(&self, rgb: Vec<f32>) -> Result<()> {
        let expected = self.geometry.pixel_count() * 3;
        if rgb.len() != expected {
            return Err(RawError::InvalidParameter(format!(
                "RGB image has {} values, expected {}",
                rgb.len(),
                expected
            )));
        }
        *self.rgb_image.write() = Some(Arc::from(rgb));
        Ok(())
    }

    /// Approximate memory held by this frame in bytes.
    pub fn memory_size(&self) -> usize {
        let packed = match &self.source {
            Source::Packed { bytes, .. } => bytes.len(),
            _ => 0,
        };
        let raw = self.raw_image.get().map_or(0, |r| r.len() * 2);
        let rgb = self.rgb_image.read().as_ref().map_or(0, |r| r.len() * 4);
        packed + raw + rgb
    }

    fn decode_raw(&self) -> Vec<u16> {
        let pixels = self.geometry.pixel_count();
        match &self.source {
            Source::Packed { bytes, byte_swap } => {
                let unit = bitunpack::packed_unit_bytes(*byte_swap);
                let usable = bytes.len() / unit * unit;
                match bitunpack::unpack14to16(&bytes[..usable], *byte_swap) {
                    Ok((samples, _)) => fit_to(samples, pixels, self.levels.black),
                    Err(e) => {
                        warn!(frame = self.index, error = %e, "Unpack failed, using black frame");
                        vec![self.levels.black as u16; pixels]
                    }
                }
            }
            _ => vec![self.levels.black as u16; pixels],
        }
    }

    /// Best-effort low resolution RGB8 preview.
    ///
    /// Uses the RGB image when the renderer has produced one, otherwise the
    /// raw Bayer samples (RGGB), otherwise black. Returns `None` when the
    /// geometry is too small to hold a Bayer quad.
    pub fn thumb(&self) -> Option<Thumbnail> {
        let (w, h) = (self.geometry.width, self.geometry.height);
        if w < 2 || h < 2 {
            return None;
        }
        let tw = (w / THUMB_SCALE).max(1);
        let th = (h / THUMB_SCALE).max(1);

        if let Some(rgb) = self.rgb_image() {
            if rgb.len() < self.geometry.pixel_count() * 3 {
                return None;
            }
            return Some(downsample(tw, th, |tx, ty| {
                let (x, y) = (tx * THUMB_SCALE, ty * THUMB_SCALE);
                let i = (y as usize * w as usize + x as usize) * 3;
                [rgb[i], rgb[i + 1], rgb[i + 2]]
            }));
        }

        if self.is_black() && self.raw_image.get().is_none() {
            return Some(Thumbnail {
                width: tw,
                height: th,
                rgb: vec![0; (tw * th * 3) as usize],
            });
        }

        let raw = self.convert()?;
        let range = self.levels.range().max(1) as f32;
        let black = self.levels.black as f32;
        let norm = |v: u16| ((v as f32 - black) / range).max(0.0);
        Some(downsample(tw, th, |tx, ty| {
            let x = (tx * THUMB_SCALE).min(w - 2) as usize & !1;
            let y = (ty * THUMB_SCALE).min(h - 2) as usize & !1;
            let stride = w as usize;
            let r = raw[y * stride + x];
            let g1 = raw[y * stride + x + 1];
            let g2 = raw[(y + 1) * stride + x];
            let b = raw[(y + 1) * stride + x + 1];
            [norm(r), (norm(g1) + norm(g2)) * 0.5, norm(b)]
        }))
    }
}

fn downsample(tw: u32, th: u32, sample: impl Fn(u32, u32) -> [f32; 3]) -> Thumbnail {
    let mut rgb = Vec::with_capacity((tw * th * 3) as usize);
    for ty in 0..th {
        for tx in 0..tw {
            // sqrt as a cheap display gamma
            rgb.extend(
                sample(tx, ty)
                    .iter()
                    .map(|c| (c.clamp(0.0, 1.0).sqrt() * 255.0) as u8),
            );
        }
    }
    Thumbnail {
        width: tw,
        height: th,
        rgb,
    }
}

/// Trim or pad a sample buffer to exactly `pixels` entries.
fn fit_to(mut samples: Vec<u16>, pixels: usize, black: u32) -> Vec<u16> {
    samples.resize(pixels, black as u16);
    samples
}
