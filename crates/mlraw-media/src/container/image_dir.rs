//! Directories of single-frame DNG/TIFF files.

use super::{ContainerFormat, ContainerKind};
use crate::series::directory_frames;
use crate::tiff::TiffRaw;
use mlraw_core::bitunpack::unpack16;
use mlraw_core::{
    ColorMatrix, Frame, FrameData, FrameRate, RawError, Result, SensorGeometry, SensorLevels,
};
use std::path::{Path, PathBuf};
use tracing::info;

/// File extensions read as raw frames.
pub const RAW_IMAGE_EXTENSIONS: &[&str] = &["dng", "tif", "tiff"];

/// One raw frame per file, in file name order.
pub struct ImageDirectory {
    source: PathBuf,
    frames: Vec<PathBuf>,
    geometry: SensorGeometry,
    levels: SensorLevels,
    color_matrix: ColorMatrix,
    fps: FrameRate,
}

impl ImageDirectory {
    pub fn open(dir: &Path) -> Result<Self> {
        let frames = directory_frames(dir, RAW_IMAGE_EXTENSIONS)?;
        let Some(first) = frames.first() else {
            return Err(RawError::NotFound(format!(
                "no raw frames in {}",
                dir.display()
            )));
        };
        let data = std::fs::read(first)?;
        let tiff = TiffRaw::parse(&data)?;
        if !tiff.is_raw() {
            return Err(RawError::UnsupportedFormat(format!(
                "{} is not a raw image",
                first.display()
            )));
        }
        if !matches!(tiff.bits_per_sample, 14 | 16) {
            return Err(RawError::UnsupportedFormat(format!(
                "{}-bit raw frames",
                tiff.bits_per_sample
            )));
        }

        let mut geometry = SensorGeometry::new(tiff.width, tiff.height, tiff.bits_per_sample);
        if let Some(active) = tiff.active_area.filter(|a| !a.is_empty()) {
            geometry.active_area = active;
        }
        let defaults = SensorLevels::for_bits(tiff.bits_per_sample);
        let levels = SensorLevels::new(
            tiff.black_level.unwrap_or(defaults.black),
            tiff.white_level.unwrap_or(defaults.white),
        );

        info!(
            path = %dir.display(),
            frames = frames.len(),
            width = tiff.width,
            height = tiff.height,
            bits = tiff.bits_per_sample,
            "Opened raw image sequence"
        );
        Ok(Self {
            source: dir.to_path_buf(),
            geometry,
            levels,
            color_matrix: tiff.color_matrix.unwrap_or(ColorMatrix::IDENTITY),
            fps: tiff.frame_rate.unwrap_or_default(),
            frames,
        })
    }
}

impl ContainerFormat for ImageDirectory {
    fn kind(&self) -> ContainerKind {
        ContainerKind::ImageDirectory
    }

    fn source(&self) -> &Path {
        &self.source
    }

    fn geometry(&self) -> &SensorGeometry {
        &self.geometry
    }

    fn levels(&self) -> SensorLevels {
        self.levels
    }

    fn color_matrix(&self) -> ColorMatrix {
        self.color_matrix
    }

    fn fps(&self) -> FrameRate {
        self.fps
    }

    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn read_frame(&self, index: usize) -> Result<Frame> {
        let path = self.frames.get(index).ok_or(RawError::OutOfRange {
            index,
            count: self.frames.len(),
        })?;
        let data = std::fs::read(path)?;
        let tiff = TiffRaw::parse(&data)?;
        if (tiff.width, tiff.height, tiff.bits_per_sample)
            != (self.geometry.width, self.geometry.height, self.geometry.bits_per_sample)
        {
            return Err(RawError::corrupt(format!(
                "{} is {}x{} {}-bit, clip is {}x{} {}-bit",
                path.display(),
                tiff.width,
                tiff.height,
                tiff.bits_per_sample,
                self.geometry.width,
                self.geometry.height,
                self.geometry.bits_per_sample
            )));
        }
        let bytes = tiff.image_data(&data)?;
        let frame_data = if tiff.bits_per_sample == 14 {
            FrameData::Packed14 {
                bytes,
                byte_swap: true,
            }
        } else {
            FrameData::Samples16(unpack16(&bytes, tiff.big_endian)?)
        };
        Ok(Frame::new(index, self.geometry, self.levels, frame_data))
    }
}
