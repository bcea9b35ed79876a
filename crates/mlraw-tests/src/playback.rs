//! Integration tests for clip playback.
//!
//! Exercises series spanning, background indexing, preloading and the
//! frame cache together through `RawClip`.

use mlraw_core::RawError;
use mlraw_media::container::{BlockSeries, OpenContext};
use mlraw_media::testing::{frame_samples, write_mlv_series, write_raw_series, MlvSeriesSpec};
use mlraw_media::{ClipOptions, ContainerFormat, ContainerKind, RawClip, SpanningByteStore};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

// ── Helpers ────────────────────────────────────────────────────

fn no_sidecar() -> ClipOptions {
    ClipOptions {
        sidecar: false,
        ..Default::default()
    }
}

fn three_file_series(dir: &std::path::Path) -> Vec<PathBuf> {
    let spec = MlvSeriesSpec {
        files: 3,
        frames_per_file: 100,
        iso_per_file: vec![100, 200, 400],
        ..Default::default()
    };
    write_mlv_series(dir, "M19-1200", &spec)
}

// ── Series spanning ────────────────────────────────────────────

#[test]
fn frame_250_lands_in_third_file() {
    let tmp = tempfile::tempdir().unwrap();
    let paths = three_file_series(tmp.path());
    assert_eq!(paths.len(), 3);

    let options = no_sidecar();
    let ctx = OpenContext {
        options: &options,
        metadata: None,
    };
    let series = BlockSeries::open(&paths[0], &ctx).unwrap();
    assert_eq!(series.frame_count(), 300);

    let location = series.indexer().locate(250).unwrap();
    assert_eq!(location.file_index, 2);

    let frame = series.read_frame(250).unwrap();
    assert_eq!(frame.convert().unwrap(), frame_samples(250, 16, 4).as_slice());
    let side = frame.side_data().unwrap();
    assert_eq!(side.exposure.as_ref().map(|e| e.iso), Some(400));
    // state recorded only in the first file still applies
    assert_eq!(side.lens.as_ref().map(|l| l.name.as_str()), Some("Synthetic 35mm"));
    assert_eq!(side.white_balance.as_ref().map(|w| w.kelvin), Some(5600));

    let early = series.read_frame(150).unwrap();
    assert_eq!(
        early.side_data().and_then(|s| s.exposure.as_ref()).map(|e| e.iso),
        Some(200)
    );
    series.close();
}

#[test]
fn read_spans_two_files() {
    let tmp = tempfile::tempdir().unwrap();
    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let a = tmp.path().join("S.RAW");
    let b = tmp.path().join("S.R00");
    std::fs::write(&a, &data[..6000]).unwrap();
    std::fs::write(&b, &data[6000..]).unwrap();

    let store = SpanningByteStore::open(&[a, b]).unwrap();
    assert_eq!(store.len(), 10_000);
    assert_eq!(store.read_at(5990, 20).unwrap(), &data[5990..6010]);
    assert_eq!(store.read_at(9990, 100).unwrap(), &data[9990..]);
    assert!(matches!(
        store.read_exact_at(9990, 100),
        Err(RawError::Truncated { .. })
    ));
}

#[test]
fn chunked_footer_series_plays_through() {
    let tmp = tempfile::tempdir().unwrap();
    let paths = write_raw_series(tmp.path(), "C", 16, 4, 12, 250);
    assert!(paths.len() > 2);

    let clip = RawClip::open_with(&paths[0], no_sidecar()).unwrap();
    assert_eq!(clip.kind(), ContainerKind::FooterSeries);
    assert_eq!(clip.frames(), 12);
    for i in 0..12 {
        let frame = clip.frame(i).unwrap();
        assert_eq!(frame.raw_image().unwrap(), frame_samples(i, 16, 4).as_slice());
    }
}

// ── Indexing ───────────────────────────────────────────────────

#[test]
fn geometry_known_before_indexing_completes() {
    let tmp = tempfile::tempdir().unwrap();
    let paths = three_file_series(tmp.path());
    let options = ClipOptions {
        index_quantum_blocks: 1,
        ..no_sidecar()
    };
    let clip = RawClip::open_with(&paths[0], options).unwrap();
    assert_eq!((clip.width(), clip.height()), (16, 4));
    assert_eq!(clip.frames(), 300);
    assert!(clip.indexing_status() <= 1.0);

    let mut last = 0.0;
    let deadline = Instant::now() + Duration::from_secs(20);
    while clip.indexing_status() < 1.0 && Instant::now() < deadline {
        let status = clip.indexing_status();
        assert!(status >= last, "status went backwards");
        last = status;
        thread::sleep(Duration::from_millis(1));
    }
    assert!(clip.wait_indexed(Duration::from_secs(20)));
    assert_eq!(clip.indexing_status(), 1.0);
}

#[test]
fn random_jumps_never_hang() {
    let tmp = tempfile::tempdir().unwrap();
    let paths = three_file_series(tmp.path());
    let path = paths[0].clone();

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let clip = RawClip::open_with(&path, no_sidecar()).unwrap();
        for i in [299, 0, 173, 174, 50, 250, 1, 298] {
            let frame = clip.frame(i).unwrap();
            assert_eq!(frame.index(), i);
            assert_eq!(frame.raw_image().unwrap(), frame_samples(i, 16, 4).as_slice());
        }
        tx.send(()).unwrap();
    });
    rx.recv_timeout(Duration::from_secs(30))
        .expect("random access did not finish");
}

// ── Preloading and cache ───────────────────────────────────────

#[test]
fn forward_playback_with_preload() {
    let tmp = tempfile::tempdir().unwrap();
    let spec = MlvSeriesSpec {
        files: 2,
        frames_per_file: 30,
        ..Default::default()
    };
    let paths = write_mlv_series(tmp.path(), "F", &spec);
    let clip = RawClip::open_with(&paths[0], no_sidecar()).unwrap();

    for i in 0..clip.frames() {
        for ahead in 1..=5 {
            clip.preload_frame(i + ahead);
        }
        let frame = clip.frame(i).unwrap();
        assert_eq!(frame.index(), i);
        assert!(!frame.is_black());
        assert!(clip.cached_indices().len() <= clip.options().cache_capacity);
        assert!(clip.cached_frame(i).is_some());
    }
}

#[test]
fn cache_keeps_last_ten_when_playing_forward() {
    let tmp = tempfile::tempdir().unwrap();
    let paths = write_raw_series(tmp.path(), "E", 16, 4, 20, usize::MAX);
    let clip = RawClip::open_with(&paths[0], no_sidecar()).unwrap();
    assert_eq!(clip.options().cache_capacity, 10);

    for i in 0..15 {
        clip.frame(i).unwrap();
    }
    assert_eq!(clip.cached_indices(), (5..15).collect::<Vec<_>>());
}

#[test]
fn closed_clip_rejects_frames() {
    let tmp = tempfile::tempdir().unwrap();
    let paths = write_raw_series(tmp.path(), "Z", 16, 4, 3, usize::MAX);
    let clip = RawClip::open_with(&paths[0], no_sidecar()).unwrap();
    clip.frame(0).unwrap();
    clip.close();
    assert!(clip.is_closed());
    assert!(matches!(clip.frame(1), Err(RawError::InvalidParameter(_))));
    assert!(clip.cached_indices().is_empty());
}
