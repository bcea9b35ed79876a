//! Integration tests for sidecar persistence.
//!
//! User state, the persisted frame index and the audio side-file across
//! close and reopen.

use mlraw_media::metadata::{sidecar_path, FRAME_INDEX_KEY, SIDE_RECORDS_KEY};
use mlraw_media::testing::{
    frame_samples, write_dng_dir, write_mlv_series, write_raw_series, MlvSeriesSpec,
};
use mlraw_media::{ClipOptions, ContainerFormat, ContainerKind, RawClip};
use serde_json::json;
use std::time::Duration;

// ── Helpers ────────────────────────────────────────────────────

fn index_fully(path: &std::path::Path) {
    let clip = RawClip::open(path).unwrap();
    assert!(clip.wait_indexed(Duration::from_secs(20)));
    clip.close();
}

// ── User state ─────────────────────────────────────────────────

#[test]
fn set_meta_survives_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let paths = write_raw_series(tmp.path(), "U", 16, 4, 3, usize::MAX);
    {
        let clip = RawClip::open(&paths[0]).unwrap();
        assert!(clip.set_meta("grade", &json!({"exposure": 0.5, "lut": "rec709"})).unwrap());
        assert!(clip
            .set_meta_values([
                ("in_point".to_string(), json!(1)),
                ("out_point".to_string(), json!(2)),
            ])
            .unwrap());
        assert!(clip.remove_meta("out_point").unwrap());
    }
    assert!(sidecar_path(&paths[0]).exists());

    let clip = RawClip::open(&paths[0]).unwrap();
    assert_eq!(
        clip.get_meta("grade"),
        Some(json!({"exposure": 0.5, "lut": "rec709"}))
    );
    assert_eq!(clip.get_meta("in_point"), Some(json!(1)));
    assert_eq!(clip.get_meta("out_point"), None);
}

#[test]
fn directory_sidecar_sits_next_to_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("shot_010");
    std::fs::create_dir_all(&dir).unwrap();
    write_dng_dir(&dir, 8, 2, 3, true);

    let clip = RawClip::open(&dir).unwrap();
    assert_eq!(clip.kind(), ContainerKind::ImageDirectory);
    clip.set_meta("rating", &5).unwrap();
    clip.close();

    assert!(tmp.path().join("shot_010.mrx").exists());
    assert!(!dir.join("shot_010.mrx").exists());
}

#[test]
fn unreadable_sidecar_treated_as_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let paths = write_raw_series(tmp.path(), "B", 16, 4, 2, usize::MAX);
    std::fs::write(sidecar_path(&paths[0]), b"{ not json").unwrap();

    let clip = RawClip::open(&paths[0]).unwrap();
    assert_eq!(clip.get_meta("anything"), None);
    assert!(clip.set_meta("rating", &1).unwrap());
    clip.close();

    let clip = RawClip::open(&paths[0]).unwrap();
    assert_eq!(clip.get_meta("rating"), Some(json!(1)));
}

// ── Persisted index ────────────────────────────────────────────

#[test]
fn reopen_skips_indexing() {
    let tmp = tempfile::tempdir().unwrap();
    let spec = MlvSeriesSpec {
        files: 2,
        frames_per_file: 20,
        iso_per_file: vec![800, 1600],
        ..Default::default()
    };
    let paths = write_mlv_series(tmp.path(), "I", &spec);
    index_fully(&paths[0]);

    let clip = RawClip::open(&paths[0]).unwrap();
    assert_eq!(clip.indexing_status(), 1.0);
    assert!(clip.get_meta(FRAME_INDEX_KEY).is_some());
    assert!(clip.get_meta(SIDE_RECORDS_KEY).is_some());

    let frame = clip.frame(33).unwrap();
    assert_eq!(frame.raw_image().unwrap(), frame_samples(33, 16, 4).as_slice());
    assert_eq!(
        frame.side_data().and_then(|s| s.exposure.as_ref()).map(|e| e.iso),
        Some(1600)
    );
}

#[test]
fn changed_files_invalidate_index() {
    let tmp = tempfile::tempdir().unwrap();
    let spec = MlvSeriesSpec {
        files: 1,
        frames_per_file: 6,
        ..Default::default()
    };
    let paths = write_mlv_series(tmp.path(), "K", &spec);
    index_fully(&paths[0]);

    // recording replaced by a longer one under the same name
    let longer = MlvSeriesSpec {
        frames_per_file: 9,
        ..spec
    };
    write_mlv_series(tmp.path(), "K", &longer);

    let clip = RawClip::open(&paths[0]).unwrap();
    assert_eq!(clip.frames(), 9);
    let frame = clip.frame(8).unwrap();
    assert_eq!(frame.raw_image().unwrap(), frame_samples(8, 16, 4).as_slice());
}

#[test]
fn sidecar_disabled_leaves_no_files() {
    let tmp = tempfile::tempdir().unwrap();
    let paths = write_mlv_series(tmp.path(), "N", &MlvSeriesSpec::default());
    let options = ClipOptions {
        sidecar: false,
        extract_audio: false,
        ..Default::default()
    };
    let clip = RawClip::open_with(&paths[0], options).unwrap();
    assert!(clip.wait_indexed(Duration::from_secs(20)));
    clip.set_meta("rating", &3).unwrap();
    clip.close();
    assert!(!sidecar_path(&paths[0]).exists());
}

// ── Audio side-file ────────────────────────────────────────────

#[test]
fn audio_extracted_once() {
    let tmp = tempfile::tempdir().unwrap();
    let spec = MlvSeriesSpec {
        files: 2,
        frames_per_file: 5,
        audio: true,
        ..Default::default()
    };
    let paths = write_mlv_series(tmp.path(), "A", &spec);
    index_fully(&paths[0]);

    let wav = tmp.path().join("A.wav");
    let first = std::fs::metadata(&wav).unwrap();
    // 10 audio frames of 64 PCM bytes plus the header
    assert!(first.len() >= 10 * 64 + 44);

    let clip = RawClip::open(&paths[0]).unwrap();
    assert_eq!(clip.indexing_status(), 1.0);
    assert_eq!(clip.format().audio_frame_count(), 10);
    clip.close();
    let second = std::fs::metadata(&wav).unwrap();
    assert_eq!(first.modified().unwrap(), second.modified().unwrap());
}

#[test]
fn audio_extraction_can_be_disabled() {
    let tmp = tempfile::tempdir().unwrap();
    let spec = MlvSeriesSpec {
        audio: true,
        ..Default::default()
    };
    let paths = write_mlv_series(tmp.path(), "Q", &spec);
    let options = ClipOptions {
        extract_audio: false,
        ..Default::default()
    };
    let clip = RawClip::open_with(&paths[0], options).unwrap();
    assert!(clip.wait_indexed(Duration::from_secs(20)));
    clip.close();
    assert!(!tmp.path().join("Q.wav").exists());
}
