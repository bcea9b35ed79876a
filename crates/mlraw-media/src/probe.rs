//! Container detection and clip summaries.

use crate::container::{ContainerFormat, ContainerKind, BITMAP_EXTENSIONS, RAW_IMAGE_EXTENSIONS};
use crate::series::{directory_frames, has_extension};
use crate::tiff::TiffRaw;
use mlraw_core::{FrameRate, RawError, Rect, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

/// Summary of an open clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipInfo {
    pub path: String,
    pub kind: ContainerKind,
    pub width: u32,
    pub height: u32,
    pub frame_count: usize,
    pub audio_frame_count: usize,
    pub fps: FrameRate,
    pub bits_per_sample: u32,
    pub black_level: u32,
    pub white_level: u32,
    pub crop: Rect,
    pub active_area: Rect,
    /// Row-major camera color matrix.
    pub color_matrix: [f32; 9],
    pub indexing_status: f32,
    pub sidecar: Option<String>,
}

impl ClipInfo {
    pub fn from_container(container: &dyn ContainerFormat, sidecar: Option<&Path>) -> Self {
        let levels = container.levels();
        Self {
            path: container.source().to_string_lossy().into_owned(),
            kind: container.kind(),
            width: container.width(),
            height: container.height(),
            frame_count: container.frame_count(),
            audio_frame_count: container.audio_frame_count(),
            fps: container.fps(),
            bits_per_sample: container.bits_per_sample(),
            black_level: levels.black,
            white_level: levels.white,
            crop: container.crop(),
            active_area: container.active_area(),
            color_matrix: container.color_matrix().to_row_major(),
            indexing_status: container.indexing_status(),
            sidecar: sidecar.map(|p| p.to_string_lossy().into_owned()),
        }
    }

    /// Clip length in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.frame_count as f64 / self.fps.to_fps_f64()
    }
}

/// Whether `path` looks like something [`detect_kind`] can open, without
/// reading directories.
pub fn is_clip_file(path: &Path) -> bool {
    kind_from_extension(path).is_some()
}

fn kind_from_extension(path: &Path) -> Option<ContainerKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let numbered = |prefix: char| {
        ext.len() == 3 && ext.starts_with(prefix) && ext[1..].bytes().all(|b| b.is_ascii_digit())
    };
    if ext == "mlv" || numbered('m') {
        Some(ContainerKind::BlockSeries)
    } else if ext == "raw" || numbered('r') {
        Some(ContainerKind::FooterSeries)
    } else {
        None
    }
}

/// Work out which container `path` is.
pub fn detect_kind(path: &Path) -> Result<ContainerKind> {
    if path.is_dir() {
        return detect_directory(path);
    }
    if !path.is_file() {
        return Err(RawError::NotFound(format!(
            "File not found: {}",
            path.display()
        )));
    }
    if let Some(kind) = kind_from_extension(path) {
        return Ok(kind);
    }

    let mut magic = [0u8; 4];
    let mut file = std::fs::File::open(path)?;
    if file.read_exact(&mut magic).is_ok() && &magic == b"MLVI" {
        return Ok(ContainerKind::BlockSeries);
    }
    Err(RawError::UnsupportedFormat(format!(
        "unrecognized clip: {}",
        path.display()
    )))
}

fn detect_directory(dir: &Path) -> Result<ContainerKind> {
    let raw = directory_frames(dir, RAW_IMAGE_EXTENSIONS)?;
    if raw.iter().any(|p| has_extension(p, &["dng"])) {
        return Ok(ContainerKind::ImageDirectory);
    }
    if let Some(first) = raw.first() {
        let data = std::fs::read(first)?;
        if TiffRaw::parse(&data).is_ok_and(|t| t.is_raw()) {
            return Ok(ContainerKind::ImageDirectory);
        }
    }
    if !directory_frames(dir, BITMAP_EXTENSIONS)?.is_empty() {
        return Ok(ContainerKind::BitmapDirectory);
    }
    Err(RawError::UnsupportedFormat(format!(
        "no frames in directory: {}",
        dir.display()
    )))
}
