//! Synthetic clip writers for tests.
//!
//! Builds small but structurally faithful containers of every supported kind
//! so tests can exercise the real parsing paths without camera footage.

use crate::sensor::SensorInfo;
use mlraw_core::{pack16to14, ColorMatrix, Rect};
use std::path::{Path, PathBuf};

pub const TEST_BLACK: u32 = 2047;
pub const TEST_WHITE: u32 = 15000;

/// Sensor description for a `width` x `height` 14-bit clip.
pub fn sensor_info(width: u32, height: u32) -> SensorInfo {
    let pitch = width as i32 * 14 / 8;
    SensorInfo {
        api_version: 1,
        buffer_height: height as i32,
        buffer_width: width as i32,
        pitch,
        frame_size: pitch * height as i32,
        bits_per_pixel: 14,
        black_level: TEST_BLACK as i32,
        white_level: TEST_WHITE as i32,
        crop: Rect::new(0, 0, width, height),
        active_area: Rect::new(0, 0, width, height),
        exposure_bias: [0, 0],
        cfa_pattern: 0x02010100,
        calibration_illuminant: 21,
        color_matrix: ColorMatrix::from_row_major(&[
            0.6722, -0.0635, -0.0963, -0.4287, 1.246, 0.2028, -0.0908, 0.2162, 0.5668,
        ]),
        dynamic_range: 1100,
    }
}

/// Deterministic 14-bit samples for frame `index`.
pub fn frame_samples(index: usize, width: u32, height: u32) -> Vec<u16> {
    (0..width as usize * height as usize)
        .map(|i| (TEST_BLACK as usize + (index * 131 + i * 7) % 12000) as u16)
        .collect()
}

/// Frame `index` packed in the camera-native 14-bit layout.
pub fn packed_frame(index: usize, width: u32, height: u32) -> Vec<u8> {
    pack16to14(&frame_samples(index, width, height), false)
        .unwrap_or_default()
}

/// Appends `.MLV` blocks to an in-memory buffer.
#[derive(Debug, Default)]
pub struct MlvBuilder {
    buf: Vec<u8>,
}

impl MlvBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// A complete block with the given payload.
    pub fn block(&mut self, tag: [u8; 4], payload: &[u8]) -> &mut Self {
        self.raw_header(tag, (payload.len() + 8) as u32);
        self.buf.extend_from_slice(payload);
        self
    }

    /// Only a block header, with an arbitrary length field.
    pub fn raw_header(&mut self, tag: [u8; 4], length: u32) -> &mut Self {
        self.buf.extend_from_slice(&tag);
        self.buf.extend_from_slice(&length.to_le_bytes());
        self
    }

    pub fn file_header(
        &mut self,
        video_frames: u32,
        audio_frames: u32,
        fps_num: u32,
        fps_den: u32,
    ) -> &mut Self {
        let mut p = Vec::with_capacity(44);
        p.extend_from_slice(b"v2.0\0\0\0\0");
        p.extend_from_slice(&0x1234_5678_u64.to_le_bytes());
        p.extend_from_slice(&0u16.to_le_bytes());
        p.extend_from_slice(&1u16.to_le_bytes());
        p.extend_from_slice(&0u32.to_le_bytes());
        p.extend_from_slice(&1u16.to_le_bytes());
        p.extend_from_slice(&u16::from(audio_frames > 0).to_le_bytes());
        p.extend_from_slice(&video_frames.to_le_bytes());
        p.extend_from_slice(&audio_frames.to_le_bytes());
        p.extend_from_slice(&fps_num.to_le_bytes());
        p.extend_from_slice(&fps_den.to_le_bytes());
        self.block(*b"MLVI", &p)
    }

    pub fn raw_info(&mut self, width: u16, height: u16) -> &mut Self {
        let mut p = Vec::with_capacity(172);
        p.extend_from_slice(&0u64.to_le_bytes());
        p.extend_from_slice(&width.to_le_bytes());
        p.extend_from_slice(&height.to_le_bytes());
        p.extend(sensor_info(width as u32, height as u32).to_bytes());
        self.block(*b"RAWI", &p)
    }

    pub fn wav_info(&mut self, sample_rate: u32, channels: u16, bits: u16) -> &mut Self {
        let align = channels * bits / 8;
        let mut p = Vec::with_capacity(24);
        p.extend_from_slice(&0u64.to_le_bytes());
        p.extend_from_slice(&1u16.to_le_bytes());
        p.extend_from_slice(&channels.to_le_bytes());
        p.extend_from_slice(&sample_rate.to_le_bytes());
        p.extend_from_slice(&(sample_rate * align as u32).to_le_bytes());
        p.extend_from_slice(&align.to_le_bytes());
        p.extend_from_slice(&bits.to_le_bytes());
        self.block(*b"WAVI", &p)
    }

    pub fn video_frame(&mut self, frame_number: u32, data: &[u8]) -> &mut Self {
        self.video_frame_with_space(frame_number, data, 0)
    }

    /// A video frame whose samples follow `frame_space` padding bytes.
    pub fn video_frame_with_space(
        &mut self,
        frame_number: u32,
        data: &[u8],
        frame_space: u32,
    ) -> &mut Self {
        let mut p = Vec::with_capacity(24 + frame_space as usize + data.len());
        p.extend_from_slice(&(frame_number as u64 * 40_000).to_le_bytes());
        p.extend_from_slice(&frame_number.to_le_bytes());
        p.extend_from_slice(&[0u8; 8]);
        p.extend_from_slice(&frame_space.to_le_bytes());
        p.resize(p.len() + frame_space as usize, 0);
        p.extend_from_slice(data);
        self.block(*b"VIDF", &p)
    }

    pub fn audio_frame(&mut self, frame_number: u32, pcm: &[u8]) -> &mut Self {
        let mut p = Vec::with_capacity(16 + pcm.len());
        p.extend_from_slice(&0u64.to_le_bytes());
        p.extend_from_slice(&frame_number.to_le_bytes());
        p.extend_from_slice(&0u32.to_le_bytes());
        p.extend_from_slice(pcm);
        self.block(*b"AUDF", &p)
    }

    pub fn rtc(&mut self, year: u16, month: u16, day: u16) -> &mut Self {
        let mut p = Vec::with_capacity(36);
        p.extend_from_slice(&0u64.to_le_bytes());
        for v in [0u16, 0, 0, day, month, year, 0, 0, 0, 0] {
            p.extend_from_slice(&v.to_le_bytes());
        }
        p.extend_from_slice(b"UTC\0\0\0\0\0");
        self.block(*b"RTCI", &p)
    }

    pub fn exposure(&mut self, iso: u32) -> &mut Self {
        let mut p = Vec::with_capacity(32);
        p.extend_from_slice(&0u64.to_le_bytes());
        for v in [0u32, iso, iso, 0] {
            p.extend_from_slice(&v.to_le_bytes());
        }
        p.extend_from_slice(&20_000u64.to_le_bytes());
        self.block(*b"EXPO", &p)
    }

    pub fn lens(&mut self, name: &str) -> &mut Self {
        let mut p = Vec::with_capacity(88);
        p.extend_from_slice(&0u64.to_le_bytes());
        for v in [50u16, 3000, 180] {
            p.extend_from_slice(&v.to_le_bytes());
        }
        p.extend_from_slice(&[0, 1]);
        p.extend_from_slice(&0u32.to_le_bytes());
        p.extend_from_slice(&61u32.to_le_bytes());
        let mut field = [0u8; 32];
        let n = name.len().min(31);
        field[..n].copy_from_slice(&name.as_bytes()[..n]);
        p.extend_from_slice(&field);
        p.extend_from_slice(&[0u8; 32]);
        self.block(*b"LENS", &p)
    }

    pub fn white_balance(&mut self, kelvin: u32) -> &mut Self {
        let mut p = Vec::with_capacity(36);
        p.extend_from_slice(&0u64.to_le_bytes());
        for v in [9u32, kelvin, 2048, 1024, 1600, 0, 0] {
            p.extend_from_slice(&v.to_le_bytes());
        }
        self.block(*b"WBAL", &p)
    }

    pub fn null(&mut self, payload_len: usize) -> &mut Self {
        self.block(*b"NULL", &vec![0u8; payload_len])
    }

    pub fn unknown(&mut self, tag: [u8; 4], payload_len: usize) -> &mut Self {
        self.block(tag, &vec![0xAAu8; payload_len])
    }
}

/// Layout of a synthetic `.MLV` series.
#[derive(Debug, Clone)]
pub struct MlvSeriesSpec {
    pub width: u16,
    pub height: u16,
    pub files: usize,
    pub frames_per_file: usize,
    /// Exposure record (ISO) written before the first frame of each file.
    pub iso_per_file: Vec<u32>,
    /// Audio frames interleaved one per video frame.
    pub audio: bool,
}

impl Default for MlvSeriesSpec {
    fn default() -> Self {
        Self {
            width: 16,
            height: 4,
            files: 1,
            frames_per_file: 4,
            iso_per_file: Vec::new(),
            audio: false,
        }
    }
}

/// 16-bit stereo PCM written for audio frame `index`.
pub fn audio_pcm(index: usize) -> Vec<u8> {
    (0..32u16)
        .flat_map(|i| (index as u16 * 100 + i).to_le_bytes())
        .collect()
}

/// Write a `.MLV` series named `<stem>.MLV`, `<stem>.M00`, ... and return
/// the paths in series order.
pub fn write_mlv_series(dir: &Path, stem: &str, spec: &MlvSeriesSpec) -> Vec<PathBuf> {
    // each file's header counts only the frames stored in that file
    let video_frames = spec.frames_per_file as u32;
    let audio_frames = if spec.audio { video_frames } else { 0 };
    let mut paths = Vec::with_capacity(spec.files);
    for file in 0..spec.files {
        let mut b = MlvBuilder::new();
        b.file_header(video_frames, audio_frames, 25, 1);
        if file == 0 {
            b.raw_info(spec.width, spec.height);
            if spec.audio {
                b.wav_info(48000, 2, 16);
            }
            b.lens("Synthetic 35mm").rtc(124, 5, 17).white_balance(5600);
        }
        if let Some(&iso) = spec.iso_per_file.get(file) {
            b.exposure(iso);
        }
        b.null(12);
        for i in 0..spec.frames_per_file {
            let n = file * spec.frames_per_file + i;
            b.video_frame(
                n as u32,
                &packed_frame(n, spec.width as u32, spec.height as u32),
            );
            if spec.audio {
                b.audio_frame(n as u32, &audio_pcm(n));
            }
        }
        let name = if file == 0 {
            format!("{stem}.MLV")
        } else {
            format!("{stem}.M{:02}", file - 1)
        };
        let path = dir.join(name);
        std::fs::write(&path, b.into_bytes()).unwrap_or_else(|e| panic!("write fixture: {e}"));
        paths.push(path);
    }
    paths
}

/// The 192-byte `.RAW` footer.
pub fn raw_footer(width: u32, height: u32, frame_count: u32, fps_x1000: i32) -> Vec<u8> {
    let frame_size = (width * height * 14 / 8) as i32;
    let mut f = Vec::with_capacity(192);
    f.extend_from_slice(b"RAWM");
    f.extend_from_slice(&(width as i16).to_le_bytes());
    f.extend_from_slice(&(height as i16).to_le_bytes());
    for v in [frame_size, frame_count as i32, 1, fps_x1000, 0, 0] {
        f.extend_from_slice(&v.to_le_bytes());
    }
    f.extend(sensor_info(width, height).to_bytes());
    f
}

/// Write a `.RAW` series: frames back to back followed by the footer, split
/// into chunks of at most `chunk_size` bytes named `<stem>.RAW`,
/// `<stem>.R00`, ...
pub fn write_raw_series(
    dir: &Path,
    stem: &str,
    width: u32,
    height: u32,
    frame_count: usize,
    chunk_size: usize,
) -> Vec<PathBuf> {
    let mut data = Vec::new();
    for i in 0..frame_count {
        data.extend(packed_frame(i, width, height));
    }
    data.extend(raw_footer(width, height, frame_count as u32, 25_000));

    data.chunks(chunk_size.max(1))
        .enumerate()
        .map(|(i, chunk)| {
            let name = if i == 0 {
                format!("{stem}.RAW")
            } else {
                format!("{stem}.R{:02}", i - 1)
            };
            let path = dir.join(name);
            std::fs::write(&path, chunk).unwrap_or_else(|e| panic!("write fixture: {e}"));
            path
        })
        .collect()
}

/// Write a single-image little-endian DNG holding `samples`, either packed
/// 14-bit (big-endian TIFF packing) or plain 16-bit.
pub fn write_dng(path: &Path, width: u32, height: u32, samples: &[u16], packed14: bool) {
    let (bits, data) = if packed14 {
        (14u16, pack16to14(samples, true).unwrap_or_default())
    } else {
        (
            16u16,
            samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
        )
    };

    // header, IFD at 8
    let entries: Vec<(u16, u16, u32, u32)> = vec![
        (254, 4, 1, 0),
        (256, 4, 1, width),
        (257, 4, 1, height),
        (258, 3, 1, bits as u32),
        (259, 3, 1, 1),
        (262, 3, 1, 32803),
        (273, 4, 1, 0), // patched below
        (277, 3, 1, 1),
        (278, 4, 1, height),
        (279, 4, 1, data.len() as u32),
        (50714, 4, 1, TEST_BLACK),
        (50717, 4, 1, TEST_WHITE),
        (51044, 10, 1, 0), // patched below
    ];
    let ifd_size = 2 + entries.len() * 12 + 4;
    let rational_offset = 8 + ifd_size as u32;
    let data_offset = rational_offset + 8;

    let mut out = Vec::with_capacity(data_offset as usize + data.len());
    out.extend_from_slice(b"II");
    out.extend_from_slice(&42u16.to_le_bytes());
    out.extend_from_slice(&8u32.to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for (tag, ty, count, value) in entries {
        let value = match tag {
            273 => data_offset,
            51044 => rational_offset,
            _ => value,
        };
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&ty.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        if ty == 3 {
            out.extend_from_slice(&(value as u16).to_le_bytes());
            out.extend_from_slice(&[0, 0]);
        } else {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&24000i32.to_le_bytes());
    out.extend_from_slice(&1001i32.to_le_bytes());
    out.extend_from_slice(&data);
    std::fs::write(path, out).unwrap_or_else(|e| panic!("write fixture: {e}"));
}

/// Overwrite the strip offset and byte count of a file written by
/// [`write_dng`].
pub fn patch_dng_strip(path: &Path, offset: u32, count: u32) {
    let mut data = std::fs::read(path).unwrap_or_else(|e| panic!("read fixture: {e}"));
    let entries = u16::from_le_bytes([data[8], data[9]]) as usize;
    for i in 0..entries {
        let at = 10 + i * 12;
        let value = match u16::from_le_bytes([data[at], data[at + 1]]) {
            273 => offset,
            279 => count,
            _ => continue,
        };
        data[at + 8..at + 12].copy_from_slice(&value.to_le_bytes());
    }
    std::fs::write(path, data).unwrap_or_else(|e| panic!("write fixture: {e}"));
}

/// Write `count` frames of `frame_NNNNNN.dng` into `dir`.
pub fn write_dng_dir(dir: &Path, width: u32, height: u32, count: usize, packed14: bool) {
    for i in 0..count {
        let path = dir.join(format!("frame_{i:06}.dng"));
        write_dng(&path, width, height, &frame_samples(i, width, height), packed14);
    }
}

/// Write `count` solid-color BMP frames into `dir`; frame `i` has red = `i`.
pub fn write_bitmap_dir(dir: &Path, width: u32, height: u32, count: usize) {
    for i in 0..count {
        let img = image::RgbImage::from_fn(width, height, |x, _| {
            image::Rgb([i as u8, (x % 256) as u8, 200])
        });
        img.save(dir.join(format!("frame_{i:04}.bmp")))
            .unwrap_or_else(|e| panic!("write fixture: {e}"));
    }
}
