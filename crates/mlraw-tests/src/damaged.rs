//! Integration tests for damaged and unusual recordings.
//!
//! Broken blocks, missing data and unknown block types must never stop
//! playback: unreadable frames come back black.

use mlraw_core::{
    ColorMatrix, Frame, FrameData, FrameRate, RawError, Result, SensorGeometry, SensorLevels,
};
use mlraw_media::container::{ContainerFormat, ContainerKind};
use mlraw_media::testing::{
    frame_samples, packed_frame, patch_dng_strip, raw_footer, write_dng_dir, MlvBuilder,
    TEST_BLACK,
};
use mlraw_media::{ClipOptions, FramePreloader, RawClip};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

// ── Helpers ────────────────────────────────────────────────────

const W: u16 = 16;
const H: u16 = 4;

fn options() -> ClipOptions {
    ClipOptions {
        sidecar: false,
        ..Default::default()
    }
}

fn write(dir: &Path, name: &str, builder: MlvBuilder) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, builder.into_bytes()).unwrap();
    path
}

fn header(total: u32) -> MlvBuilder {
    let mut b = MlvBuilder::new();
    b.file_header(total, 0, 25, 1).raw_info(W, H);
    b
}

fn frame_data(n: usize) -> Vec<u8> {
    packed_frame(n, W as u32, H as u32)
}

fn assert_frame(clip: &RawClip, n: usize) {
    let frame = clip.frame(n).unwrap();
    assert!(!frame.is_black(), "frame {n} is black");
    assert_eq!(
        frame.raw_image().unwrap(),
        frame_samples(n, W as u32, H as u32).as_slice()
    );
}

fn assert_black(clip: &RawClip, n: usize) {
    let frame = clip.frame(n).unwrap();
    assert!(frame.is_black(), "frame {n} should be black");
    assert!(frame
        .convert()
        .unwrap()
        .iter()
        .all(|&v| v as u32 == TEST_BLACK));
}

// ── Block containers ───────────────────────────────────────────

#[test]
fn unknown_blocks_are_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    let mut b = header(4);
    b.unknown(*b"ZZZZ", 40).exposure(640);
    for n in 0..4 {
        b.video_frame(n as u32, &frame_data(n));
        b.unknown(*b"QQ01", 3);
        b.block(*b"MARK", &[0u8; 12]);
    }
    let path = write(tmp.path(), "U.MLV", b);

    let clip = RawClip::open_with(&path, options()).unwrap();
    for n in 0..4 {
        assert_frame(&clip, n);
    }
    let side = clip.frame(3).unwrap().side_data().cloned().unwrap();
    assert_eq!(side.exposure.map(|e| e.iso), Some(640));
}

#[test]
fn corrupt_block_ends_file_but_not_series() {
    let tmp = tempfile::tempdir().unwrap();
    let mut first = header(3);
    first
        .video_frame(0, &frame_data(0))
        .video_frame(1, &frame_data(1));
    // length below the block header size
    first.raw_header(*b"VIDF", 4);
    first.video_frame(2, &frame_data(2));
    let path = write(tmp.path(), "C.MLV", first);

    let mut second = MlvBuilder::new();
    second.file_header(3, 0, 25, 1);
    for n in 3..6 {
        second.video_frame(n as u32, &frame_data(n));
    }
    write(tmp.path(), "C.M00", second);

    let clip = RawClip::open_with(&path, options()).unwrap();
    assert_eq!(clip.frames(), 6);
    assert!(clip.wait_indexed(Duration::from_secs(20)));
    for n in [0, 1, 3, 4, 5] {
        assert_frame(&clip, n);
    }
    assert_black(&clip, 2);
    // asked again: still black, no rescan
    assert_black(&clip, 2);
}

#[test]
fn chunk_headers_count_only_their_own_frames() {
    let tmp = tempfile::tempdir().unwrap();
    let mut paths = Vec::new();
    for (chunk, name) in ["P.MLV", "P.M00", "P.M01"].into_iter().enumerate() {
        let mut b = if chunk == 0 {
            header(10)
        } else {
            let mut b = MlvBuilder::new();
            b.file_header(10, 0, 25, 1);
            b
        };
        for n in chunk * 10..(chunk + 1) * 10 {
            b.video_frame(n as u32, &frame_data(n));
        }
        paths.push(write(tmp.path(), name, b));
    }

    let clip = RawClip::open_with(&paths[0], options()).unwrap();
    assert_eq!(clip.frames(), 30);
    assert_frame(&clip, 25);
    assert_frame(&clip, 29);
    assert!(matches!(clip.frame(30), Err(RawError::OutOfRange { .. })));
    assert!(clip.wait_indexed(Duration::from_secs(20)));
    assert_frame(&clip, 11);
}

#[test]
fn truncated_last_frame_is_black() {
    let tmp = tempfile::tempdir().unwrap();
    let mut b = header(3);
    b.video_frame(0, &frame_data(0)).video_frame(1, &frame_data(1));
    let mut bytes = b.into_bytes();
    let full = frame_data(2);
    let mut cut = MlvBuilder::new();
    cut.raw_header(*b"VIDF", (8 + 24 + full.len()) as u32);
    bytes.extend(cut.into_bytes());
    bytes.extend_from_slice(&[0u8; 24]);
    bytes.extend_from_slice(&full[..30]);
    let path = tmp.path().join("T.MLV");
    std::fs::write(&path, bytes).unwrap();

    let clip = RawClip::open_with(&path, options()).unwrap();
    assert_frame(&clip, 0);
    assert_frame(&clip, 1);
    assert_black(&clip, 2);
}

#[test]
fn frames_missing_from_recording_are_black() {
    let tmp = tempfile::tempdir().unwrap();
    let mut b = header(5);
    for n in 0..3 {
        b.video_frame(n as u32, &frame_data(n));
    }
    let path = write(tmp.path(), "S.MLV", b);

    let clip = RawClip::open_with(&path, options()).unwrap();
    assert_eq!(clip.frames(), 5);
    assert_black(&clip, 4);
    assert_frame(&clip, 2);
    assert_black(&clip, 3);
    assert!(matches!(clip.frame(5), Err(RawError::OutOfRange { .. })));
}

#[test]
fn wrong_magic_fails_open() {
    let tmp = tempfile::tempdir().unwrap();
    let mut b = MlvBuilder::new();
    b.null(32);
    let path = write(tmp.path(), "X.MLV", b);
    assert!(matches!(
        RawClip::open_with(&path, options()),
        Err(RawError::Corrupt(_))
    ));
}

#[test]
fn missing_clip_fails_open() {
    let tmp = tempfile::tempdir().unwrap();
    assert!(matches!(
        RawClip::open(tmp.path().join("gone.MLV")),
        Err(RawError::NotFound(_))
    ));
}

// ── Footer series ──────────────────────────────────────────────

#[test]
fn footer_series_short_data_is_black() {
    let tmp = tempfile::tempdir().unwrap();
    let mut bytes = Vec::new();
    for n in 0..2 {
        bytes.extend(frame_data(n));
    }
    // footer claims four frames, only two were written
    bytes.extend(raw_footer(W as u32, H as u32, 4, 25_000));
    let path = tmp.path().join("F.RAW");
    std::fs::write(&path, bytes).unwrap();

    let clip = RawClip::open_with(&path, options()).unwrap();
    assert_eq!(clip.frames(), 4);
    assert_frame(&clip, 0);
    assert_frame(&clip, 1);
    assert_black(&clip, 3);
}

// ── Image directories ──────────────────────────────────────────

#[test]
fn strip_table_past_end_of_file_is_black() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("dng");
    std::fs::create_dir_all(&dir).unwrap();
    write_dng_dir(&dir, W as u32, H as u32, 3, true);
    patch_dng_strip(&dir.join("frame_000001.dng"), 0xFFFF_FF00, 0);

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let clip = RawClip::open_with(&dir, options()).unwrap();
        assert_frame(&clip, 0);
        assert_black(&clip, 1);
        assert_frame(&clip, 2);
        tx.send(()).unwrap();
    });
    rx.recv_timeout(Duration::from_secs(30))
        .expect("corrupt strip table stalled playback");
}

// ── Preloading ─────────────────────────────────────────────────

/// Source whose reader panics on one frame.
struct Faulty {
    geometry: SensorGeometry,
    bad: usize,
}

impl ContainerFormat for Faulty {
    fn kind(&self) -> ContainerKind {
        ContainerKind::ImageDirectory
    }
    fn source(&self) -> &Path {
        Path::new("faulty")
    }
    fn geometry(&self) -> &SensorGeometry {
        &self.geometry
    }
    fn levels(&self) -> SensorLevels {
        SensorLevels::new(TEST_BLACK, 16383)
    }
    fn color_matrix(&self) -> ColorMatrix {
        ColorMatrix::IDENTITY
    }
    fn fps(&self) -> FrameRate {
        FrameRate::FPS_25
    }
    fn frame_count(&self) -> usize {
        4
    }
    fn read_frame(&self, index: usize) -> Result<Frame> {
        if index == self.bad {
            panic!("strip table points past end of frame {index}");
        }
        Ok(Frame::new(
            index,
            self.geometry,
            self.levels(),
            FrameData::Samples16(frame_samples(index, W as u32, H as u32)),
        ))
    }
}

#[test]
fn panicking_reader_yields_black_frame() {
    let source = Arc::new(Faulty {
        geometry: SensorGeometry::new(W as u32, H as u32, 14),
        bad: 2,
    });
    let preloader = FramePreloader::start(source, 4).unwrap();
    for i in 0..4 {
        assert!(preloader.request(i));
    }
    let mut got = Vec::new();
    while got.len() < 4 {
        match preloader.recv_timeout(Duration::from_secs(10)).unwrap() {
            Some(result) => got.push(result),
            None => panic!("preload worker stopped delivering"),
        }
    }
    for (index, frame) in got {
        assert_eq!(frame.is_black(), index == 2, "frame {index}");
    }
    preloader.shutdown();
    assert!(preloader.recv_timeout(Duration::from_secs(1)).is_err());
}
