//! Container formats.
//!
//! Every clip kind exposes the same [`ContainerFormat`] surface: fixed
//! geometry and calibration, a frame count, and random access to frame N.

mod bitmap_dir;
mod block_series;
mod footer_series;
mod image_dir;

pub use bitmap_dir::{BitmapDirectory, BITMAP_EXTENSIONS};
pub use block_series::BlockSeries;
pub use footer_series::{FooterSeries, RawFooter};
pub use image_dir::{ImageDirectory, RAW_IMAGE_EXTENSIONS};

use crate::config::ClipOptions;
use crate::metadata::MetadataStore;
use mlraw_core::{ColorMatrix, Frame, FrameRate, Rect, Result, SensorGeometry, SensorLevels};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Kind of clip container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerKind {
    /// `.RAW` with a trailing footer, continued in `.R00`, `.R01`, ...
    FooterSeries,
    /// `.MLV` block container, continued in `.M00`, `.M01`, ...
    BlockSeries,
    /// Directory of DNG/TIFF raw frames.
    ImageDirectory,
    /// Directory of plain bitmaps.
    BitmapDirectory,
}

impl ContainerKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::FooterSeries => "raw",
            Self::BlockSeries => "mlv",
            Self::ImageDirectory => "dng-sequence",
            Self::BitmapDirectory => "bitmap-sequence",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shared inputs for opening a container.
pub struct OpenContext<'a> {
    pub options: &'a ClipOptions,
    /// The clip's sidecar store, if sidecars are enabled.
    pub metadata: Option<Arc<MetadataStore>>,
}

/// One open clip container.
pub trait ContainerFormat: Send + Sync {
    fn kind(&self) -> ContainerKind;

    /// Path the clip was opened from.
    fn source(&self) -> &Path;

    fn geometry(&self) -> &SensorGeometry;

    fn levels(&self) -> SensorLevels;

    fn color_matrix(&self) -> ColorMatrix;

    fn fps(&self) -> FrameRate;

    /// Frames in the clip. Never exceeds what the container reports.
    fn frame_count(&self) -> usize;

    fn audio_frame_count(&self) -> usize {
        0
    }

    /// Read frame `index`. The returned frame may still hold packed data;
    /// call [`Frame::convert`] to unpack it.
    fn read_frame(&self, index: usize) -> Result<Frame>;

    /// Fraction of the container indexed so far.
    fn indexing_status(&self) -> f32 {
        1.0
    }

    /// Block until indexing completes or `timeout` passes. Returns whether
    /// the container is fully indexed.
    fn wait_indexed(&self, _timeout: Duration) -> bool {
        true
    }

    /// Release background work and file handles. Idempotent.
    fn close(&self) {}

    fn width(&self) -> u32 {
        self.geometry().width
    }

    fn height(&self) -> u32 {
        self.geometry().height
    }

    fn bits_per_sample(&self) -> u32 {
        self.geometry().bits_per_sample
    }

    fn crop(&self) -> Rect {
        self.geometry().crop
    }

    fn active_area(&self) -> Rect {
        self.geometry().active_area
    }

    /// A black frame with this container's geometry.
    fn black_frame(&self, index: usize) -> Frame {
        Frame::black(index, *self.geometry(), self.levels())
    }
}

/// Open `path` as a container of the given kind.
pub fn open_container(
    path: &Path,
    kind: ContainerKind,
    ctx: &OpenContext<'_>,
) -> Result<Box<dyn ContainerFormat>> {
    Ok(match kind {
        ContainerKind::FooterSeries => Box::new(FooterSeries::open(path)?),
        ContainerKind::BlockSeries => Box::new(BlockSeries::open(path, ctx)?),
        ContainerKind::ImageDirectory => Box::new(ImageDirectory::open(path)?),
        ContainerKind::BitmapDirectory => Box::new(BitmapDirectory::open(path)?),
    })
}
