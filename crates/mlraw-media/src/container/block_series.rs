//! `.MLV` clips: interleaved video, audio and camera state blocks.

use super::{ContainerFormat, ContainerKind, OpenContext};
use crate::audio::{side_file_present, wav_path};
use crate::block::{FileHeader, RawInfo, WavInfo};
use crate::indexer::{Indexer, PersistedIndex, Scanner};
use crate::metadata::{FRAME_INDEX_KEY, SIDE_RECORDS_KEY};
use crate::series::file_series;
use crate::span::SpanningByteStore;
use mlraw_core::{
    ColorMatrix, Frame, FrameData, FrameRate, RawError, Result, SensorGeometry, SensorLevels,
    SideRecord,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Block container over one or more files.
///
/// Geometry comes from the first file's header blocks and the frame total is
/// the sum of every file's reported count; frame positions are discovered by
/// the [`Indexer`] while the clip is in use.
pub struct BlockSeries {
    source: PathBuf,
    store: SpanningByteStore,
    indexer: Indexer,
    header: FileHeader,
    /// Video frames reported by all file headers together, 0 if unknown.
    video_frames: u32,
    audio_frames: u32,
    raw_info: RawInfo,
    wav_info: Option<WavInfo>,
    geometry: SensorGeometry,
    levels: SensorLevels,
    frame_size: usize,
}

impl BlockSeries {
    pub fn open(path: &Path, ctx: &OpenContext<'_>) -> Result<Self> {
        let paths = file_series(path)?;
        let mut scanner = Scanner::open(&paths)?;
        let (header, raw_info) = scanner.scan_header()?;
        let store = SpanningByteStore::open(&paths)?;

        let sensor = &raw_info.sensor;
        if sensor.bits_per_sample() != 14 {
            warn!(
                bits = sensor.bits_per_sample(),
                "Unexpected sample depth, decoding as 14-bit"
            );
        }
        let mut geometry =
            SensorGeometry::new(raw_info.width as u32, raw_info.height as u32, 14);
        if !sensor.crop.is_empty() {
            geometry.crop = sensor.crop;
        }
        if !sensor.active_area.is_empty() {
            geometry.active_area = sensor.active_area;
        }
        let levels = sensor.levels();
        let frame_size = geometry.packed_frame_size();

        let (video_frames, audio_frames) = scanner.series_frame_counts();
        scanner.set_frame_limit((video_frames > 0).then_some(video_frames));

        let audio_path = wav_path(&paths[0]);
        let wants_audio = ctx.options.extract_audio && (header.has_audio() || audio_frames > 0);
        let persisted = ctx.metadata.as_ref().and_then(|store| {
            let index: PersistedIndex = store.get_meta_as(FRAME_INDEX_KEY)?;
            let records: Vec<SideRecord> = store.get_meta_as(SIDE_RECORDS_KEY)?;
            Some((index, records))
        });
        let reusable = persisted.filter(|(index, _)| {
            index.covers(scanner.total_bytes(), video_frames)
                && (!wants_audio || side_file_present(&audio_path))
        });

        let wav_info = scanner.wav_info();
        let files = scanner.file_count();
        let indexer = match reusable {
            Some((index, records)) => {
                info!(
                    path = %path.display(),
                    frames = index.frames.len(),
                    "Reusing persisted frame index"
                );
                Indexer::completed(index, records)
            }
            None => {
                scanner.set_metadata(ctx.metadata.clone());
                scanner.set_audio_output(wants_audio.then(|| audio_path.clone()));
                Indexer::spawn(scanner, ctx.options.index_quantum_blocks)?
            }
        };

        info!(
            path = %path.display(),
            files,
            width = geometry.width,
            height = geometry.height,
            frames = video_frames,
            audio_frames,
            "Opened MLV clip"
        );
        Ok(Self {
            source: path.to_path_buf(),
            store,
            indexer,
            header,
            video_frames,
            audio_frames,
            raw_info,
            wav_info,
            geometry,
            levels,
            frame_size,
        })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn raw_info(&self) -> &RawInfo {
        &self.raw_info
    }

    /// Audio format, if it was seen in the header blocks.
    pub fn wav_info(&self) -> Option<&WavInfo> {
        self.wav_info.as_ref()
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }
}

impl ContainerFormat for BlockSeries {
    fn kind(&self) -> ContainerKind {
        ContainerKind::BlockSeries
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
        self.raw_info.sensor.color_matrix
    }

    fn fps(&self) -> FrameRate {
        self.header.fps
    }

    fn frame_count(&self) -> usize {
        if self.video_frames > 0 {
            self.video_frames as usize
        } else {
            self.indexer.indexed_frames()
        }
    }

    fn audio_frame_count(&self) -> usize {
        self.audio_frames as usize
    }

    fn read_frame(&self, index: usize) -> Result<Frame> {
        let count = self.frame_count();
        // without a reported total the count grows until indexing completes
        if index >= count && (self.video_frames > 0 || self.indexer.is_complete()) {
            return Err(RawError::OutOfRange { index, count });
        }
        let location = self.indexer.locate(index as u32)?;
        let len = (location.size as usize).min(self.frame_size);
        let bytes = self
            .store
            .read_in_file(location.file_index, location.offset, len)?;
        let side = self.indexer.side_data(&location.snapshot);
        Ok(Frame::new(
            index,
            self.geometry,
            self.levels,
            FrameData::Packed14 {
                bytes,
                byte_swap: false,
            },
        )
        .with_side_data(side))
    }

    fn indexing_status(&self) -> f32 {
        self.indexer.status()
    }

    fn wait_indexed(&self, timeout: Duration) -> bool {
        self.indexer.wait_complete(timeout)
    }

    fn close(&self) {
        self.indexer.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClipOptions;
    use crate::metadata::MetadataStore;
    use crate::testing::{frame_samples, write_mlv_series, MlvSeriesSpec};
    use std::sync::Arc;

    fn open(path: &Path, store: Option<Arc<MetadataStore>>) -> BlockSeries {
        let options = ClipOptions::default();
        let ctx = OpenContext {
            options: &options,
            metadata: store,
        };
        BlockSeries::open(path, &ctx).unwrap()
    }

    #[test]
    fn test_geometry_known_before_indexing() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = MlvSeriesSpec {
            files: 2,
            frames_per_file: 50,
            ..Default::default()
        };
        let paths = write_mlv_series(tmp.path(), "G", &spec);
        let clip = open(&paths[0], None);
        assert_eq!((clip.width(), clip.height()), (16, 4));
        assert_eq!(clip.frame_count(), 100);
        assert_eq!(clip.fps(), FrameRate::FPS_25);
        assert!(clip.indexing_status() <= 1.0);
        clip.close();
    }

    #[test]
    fn test_frame_total_sums_file_headers() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = MlvSeriesSpec {
            files: 3,
            frames_per_file: 10,
            audio: true,
            ..Default::default()
        };
        let paths = write_mlv_series(tmp.path(), "T", &spec);
        let clip = open(&paths[0], None);
        assert_eq!(clip.header().video_frame_count, 10);
        assert_eq!(clip.frame_count(), 30);
        assert_eq!(clip.audio_frame_count(), 30);
        let frame = clip.read_frame(25).unwrap();
        assert_eq!(frame.convert().unwrap(), frame_samples(25, 16, 4).as_slice());
        assert!(matches!(
            clip.read_frame(30),
            Err(RawError::OutOfRange { .. })
        ));
        clip.close();
    }

    #[test]
    fn test_read_frames_with_side_data() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = MlvSeriesSpec {
            files: 2,
            frames_per_file: 6,
            iso_per_file: vec![160, 3200],
            ..Default::default()
        };
        let paths = write_mlv_series(tmp.path(), "H", &spec);
        let clip = open(&paths[0], None);
        let frame = clip.read_frame(9).unwrap();
        assert_eq!(frame.convert().unwrap(), frame_samples(9, 16, 4).as_slice());
        let side = frame.side_data().unwrap();
        assert_eq!(side.exposure.as_ref().map(|e| e.iso), Some(3200));
        assert!(side.white_balance.is_some());

        let first = clip.read_frame(0).unwrap();
        assert_eq!(
            first.side_data().and_then(|s| s.exposure.as_ref()).map(|e| e.iso),
            Some(160)
        );
        assert!(matches!(
            clip.read_frame(12),
            Err(RawError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_reopen_uses_persisted_index() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = write_mlv_series(tmp.path(), "P", &MlvSeriesSpec::default());
        {
            let store = Arc::new(MetadataStore::open(&paths[0]));
            let clip = open(&paths[0], Some(store));
            assert!(clip.indexer().wait_complete(Duration::from_secs(10)));
            clip.close();
        }
        let store = Arc::new(MetadataStore::open(&paths[0]));
        let clip = open(&paths[0], Some(store));
        assert_eq!(clip.indexing_status(), 1.0);
        assert!(clip.indexer().is_complete());
        let frame = clip.read_frame(2).unwrap();
        assert_eq!(frame.convert().unwrap(), frame_samples(2, 16, 4).as_slice());
        assert!(frame.side_data().and_then(|s| s.lens.as_ref()).is_some());
    }

    #[test]
    fn test_missing_audio_side_file_forces_rescan() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = MlvSeriesSpec {
            audio: true,
            ..Default::default()
        };
        let paths = write_mlv_series(tmp.path(), "W", &spec);
        {
            let store = Arc::new(MetadataStore::open(&paths[0]));
            let clip = open(&paths[0], Some(store));
            assert!(clip.indexer().wait_complete(Duration::from_secs(10)));
            clip.close();
        }
        let wav = tmp.path().join("W.wav");
        assert!(side_file_present(&wav));
        std::fs::remove_file(&wav).unwrap();

        let store = Arc::new(MetadataStore::open(&paths[0]));
        let clip = open(&paths[0], Some(store));
        assert!(clip.indexer().wait_complete(Duration::from_secs(10)));
        clip.close();
        assert!(side_file_present(&wav));
    }
}
