//! Directories of plain bitmap frames.

use super::{ContainerFormat, ContainerKind};
use crate::series::directory_frames;
use mlraw_core::{
    ColorMatrix, Frame, FrameData, FrameRate, RawError, Result, SensorGeometry, SensorLevels,
};
use std::path::{Path, PathBuf};
use tracing::info;

/// File extensions read as bitmap frames.
pub const BITMAP_EXTENSIONS: &[&str] = &["bmp", "png", "ppm", "pnm", "tif", "tiff"];

fn image_error(e: image::ImageError) -> RawError {
    match e {
        image::ImageError::IoError(io) => RawError::Io(io),
        other => RawError::UnsupportedFormat(other.to_string()),
    }
}

/// One already-developed RGB frame per file, in file name order.
pub struct BitmapDirectory {
    source: PathBuf,
    frames: Vec<PathBuf>,
    geometry: SensorGeometry,
}

impl BitmapDirectory {
    pub fn open(dir: &Path) -> Result<Self> {
        let frames = directory_frames(dir, BITMAP_EXTENSIONS)?;
        let Some(first) = frames.first() else {
            return Err(RawError::NotFound(format!(
                "no bitmap frames in {}",
                dir.display()
            )));
        };
        let (width, height) = image::image_dimensions(first).map_err(image_error)?;
        info!(
            path = %dir.display(),
            frames = frames.len(),
            width,
            height,
            "Opened bitmap sequence"
        );
        Ok(Self {
            source: dir.to_path_buf(),
            frames,
            geometry: SensorGeometry::new(width, height, 8),
        })
    }
}

impl ContainerFormat for BitmapDirectory {
    fn kind(&self) -> ContainerKind {
        ContainerKind::BitmapDirectory
    }

    fn source(&self) -> &Path {
        &self.source
    }

    fn geometry(&self) -> &SensorGeometry {
        &self.geometry
    }

    fn levels(&self) -> SensorLevels {
        SensorLevels::for_bits(8)
    }

    fn color_matrix(&self) -> ColorMatrix {
        ColorMatrix::IDENTITY
    }

    fn fps(&self) -> FrameRate {
        FrameRate::default()
    }

    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn read_frame(&self, index: usize) -> Result<Frame> {
        let path = self.frames.get(index).ok_or(RawError::OutOfRange {
            index,
            count: self.frames.len(),
        })?;
        let rgb = image::open(path).map_err(image_error)?.to_rgb32f();
        if rgb.dimensions() != (self.geometry.width, self.geometry.height) {
            return Err(RawError::corrupt(format!(
                "{} is {}x{}, clip is {}x{}",
                path.display(),
                rgb.width(),
                rgb.height(),
                self.geometry.width,
                self.geometry.height
            )));
        }
        Ok(Frame::new(
            index,
            self.geometry,
            self.levels(),
            FrameData::Rgb(rgb.into_raw()),
        ))
    }
}
