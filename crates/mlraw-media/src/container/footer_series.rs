//! `.RAW` clips: fixed-size frames back to back, described by a footer.

use super::{ContainerFormat, ContainerKind};
use crate::sensor::{SensorInfo, SENSOR_INFO_SIZE};
use crate::series::file_series;
use crate::span::SpanningByteStore;
use mlraw_core::{
    ColorMatrix, Frame, FrameData, FrameRate, RawError, Result, SensorGeometry, SensorLevels,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Trailing `.RAW` description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFooter {
    pub width: u32,
    pub height: u32,
    pub frame_size: usize,
    pub frame_count: usize,
    pub frame_skip: i32,
    pub fps: FrameRate,
    pub sensor: SensorInfo,
}

impl RawFooter {
    pub const SIZE: usize = 32 + SENSOR_INFO_SIZE;
    pub const MAGIC: &'static [u8; 4] = b"RAWM";

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(RawError::corrupt("footer too short"));
        }
        if &data[..4] != Self::MAGIC {
            return Err(RawError::corrupt("footer magic mismatch"));
        }
        let i16_at = |o: usize| i16::from_le_bytes([data[o], data[o + 1]]);
        let i32_at =
            |o: usize| i32::from_le_bytes([data[o], data[o + 1], data[o + 2], data[o + 3]]);

        let width = i16_at(4);
        let height = i16_at(6);
        if width <= 0 || height <= 0 {
            return Err(RawError::corrupt(format!(
                "footer resolution {width}x{height}"
            )));
        }
        let (width, height) = (width as u32, height as u32);
        let frame_size = match i32_at(8) {
            n if n > 0 => n as usize,
            _ => SensorGeometry::new(width, height, 14).packed_frame_size(),
        };

        Ok(Self {
            width,
            height,
            frame_size,
            frame_count: i32_at(12).max(0) as usize,
            frame_skip: i32_at(16),
            fps: FrameRate::from_millis(i32_at(20)),
            sensor: SensorInfo::parse(&data[32..])?,
        })
    }
}

/// Footer-described frame series over one or more files.
pub struct FooterSeries {
    source: PathBuf,
    store: SpanningByteStore,
    footer: RawFooter,
    geometry: SensorGeometry,
    levels: SensorLevels,
}

impl FooterSeries {
    pub fn open(path: &Path) -> Result<Self> {
        let paths = file_series(path)?;
        let store = SpanningByteStore::open(&paths)?;
        let footer = read_footer(&store)?;

        let mut geometry = SensorGeometry::new(footer.width, footer.height, 14);
        if !footer.sensor.crop.is_empty() {
            geometry.crop = footer.sensor.crop;
        }
        if !footer.sensor.active_area.is_empty() {
            geometry.active_area = footer.sensor.active_area;
        }
        let levels = footer.sensor.levels();

        info!(
            path = %path.display(),
            files = store.file_count(),
            width = footer.width,
            height = footer.height,
            frames = footer.frame_count,
            "Opened RAW clip"
        );
        Ok(Self {
            source: path.to_path_buf(),
            store,
            footer,
            geometry,
            levels,
        })
    }

    pub fn footer(&self) -> &RawFooter {
        &self.footer
    }
}

/// The footer sits at the end of the first file, or for series written
/// across chunks, at the end of the last one.
fn read_footer(store: &SpanningByteStore) -> Result<RawFooter> {
    let size = RawFooter::SIZE as u64;
    if let Some((_, first_len)) = store.file(0) {
        if first_len >= size {
            let tail = store.read_at(first_len - size, RawFooter::SIZE)?;
            if tail.starts_with(RawFooter::MAGIC) {
                return RawFooter::parse(&tail);
            }
        }
    }
    if store.file_count() > 1 && store.len() >= size {
        let tail = store.read_at(store.len() - size, RawFooter::SIZE)?;
        if tail.starts_with(RawFooter::MAGIC) {
            debug!("Footer found in last file of series");
            return RawFooter::parse(&tail);
        }
    }
    Err(RawError::corrupt("no RAWM footer"))
}

impl ContainerFormat for FooterSeries {
    fn kind(&self) -> ContainerKind {
        ContainerKind::FooterSeries
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
        self.footer.sensor.color_matrix
    }

    fn fps(&self) -> FrameRate {
        self.footer.fps
    }

    fn frame_count(&self) -> usize {
        self.footer.frame_count
    }

    fn read_frame(&self, index: usize) -> Result<Frame> {
        let bytes =
            self.store
                .read_frame_bytes(index, self.footer.frame_size, self.footer.frame_count)?;
        Ok(Frame::new(
            index,
            self.geometry,
            self.levels,
            FrameData::Packed14 {
                bytes,
                byte_swap: false,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{frame_samples, raw_footer, write_raw_series, TEST_BLACK};

    #[test]
    fn test_single_file_clip() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = write_raw_series(tmp.path(), "S", 16, 4, 5, usize::MAX);
        assert_eq!(paths.len(), 1);
        let clip = FooterSeries::open(&paths[0]).unwrap();
        assert_eq!(clip.frame_count(), 5);
        assert_eq!((clip.width(), clip.height()), (16, 4));
        assert_eq!(clip.levels().black, TEST_BLACK);
        assert_eq!(clip.fps(), FrameRate::FPS_25);
        assert_eq!(clip.indexing_status(), 1.0);

        let frame = clip.read_frame(3).unwrap();
        assert_eq!(frame.convert().unwrap(), frame_samples(3, 16, 4).as_slice());
        assert!(matches!(
            clip.read_frame(5),
            Err(RawError::OutOfRange { index: 5, count: 5 })
        ));
    }

    #[test]
    fn test_chunked_series_footer_in_last_file() {
        let tmp = tempfile::tempdir().unwrap();
        // 112-byte frames, chunks split mid-frame
        let paths = write_raw_series(tmp.path(), "C", 16, 4, 10, 300);
        assert!(paths.len() > 2);
        let clip = FooterSeries::open(&paths[0]).unwrap();
        assert_eq!(clip.frame_count(), 10);
        for i in [0, 2, 7, 9] {
            let frame = clip.read_frame(i).unwrap();
            assert_eq!(frame.convert().unwrap(), frame_samples(i, 16, 4).as_slice());
        }
    }

    #[test]
    fn test_truncated_frame() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("T.RAW");
        // footer claims 4 frames of 112 bytes, the file holds far less
        let mut short = vec![0u8; 100];
        short.extend(raw_footer(16, 4, 4, 24_000));
        std::fs::write(&path, short).unwrap();
        let clip = FooterSeries::open(&path).unwrap();
        assert!(clip.read_frame(0).is_ok());
        assert!(matches!(
            clip.read_frame(3),
            Err(RawError::Truncated { .. })
        ));
    }

    #[test]
    fn test_missing_footer_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("X.RAW");
        std::fs::write(&path, vec![0u8; 1000]).unwrap();
        assert!(matches!(
            FooterSeries::open(&path),
            Err(RawError::Corrupt(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            FooterSeries::open(Path::new("/nonexistent/A.RAW")),
            Err(RawError::NotFound(_))
        ));
    }
}
