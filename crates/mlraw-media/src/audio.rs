//! WAV side-file for clips that carry audio.
//!
//! Audio blocks are appended in block order as the indexer meets them; the
//! file is finalized once indexing completes or the clip is closed.

use crate::block::WavInfo;
use mlraw_core::{RawError, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// `<dir>/<stem>.wav` next to the clip's first file.
pub fn wav_path(first_file: &Path) -> PathBuf {
    first_file.with_extension("wav")
}

/// Whether a usable side-file from a previous run exists.
pub fn side_file_present(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0)
}

fn wav_error(e: hound::Error) -> RawError {
    match e {
        hound::Error::IoError(io) => RawError::Io(io),
        other => RawError::UnsupportedFormat(format!("WAV: {other}")),
    }
}

/// Streaming WAV writer fed with raw PCM block payloads.
pub struct AudioSideFile {
    path: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    bits_per_sample: u16,
    frames_written: u64,
}

impl AudioSideFile {
    /// Create (or truncate) the side-file for the given format.
    pub fn create(path: &Path, format: &WavInfo) -> Result<Self> {
        if format.format != 1 {
            return Err(RawError::UnsupportedFormat(format!(
                "audio format tag {} (only PCM is supported)",
                format.format
            )));
        }
        if !matches!(format.bits_per_sample, 8 | 16 | 24 | 32) || format.channels == 0 {
            return Err(RawError::UnsupportedFormat(format!(
                "{} channel {}-bit audio",
                format.channels, format.bits_per_sample
            )));
        }
        let spec = hound::WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: format.bits_per_sample,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec).map_err(wav_error)?;
        debug!(path = %path.display(), rate = format.sample_rate, channels = format.channels, "Audio side-file created");
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            bits_per_sample: format.bits_per_sample,
            frames_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Audio blocks appended so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Append one block of little-endian PCM. A trailing partial sample is
    /// dropped.
    pub fn append(&mut self, pcm: &[u8]) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(RawError::Internal("audio side-file already finalized".into()));
        };
        match self.bits_per_sample {
            8 => {
                for &b in pcm {
                    writer
                        .write_sample((b as i16 - 128) as i8)
                        .map_err(wav_error)?;
                }
            }
            16 => {
                for c in pcm.chunks_exact(2) {
                    writer
                        .write_sample(i16::from_le_bytes([c[0], c[1]]))
                        .map_err(wav_error)?;
                }
            }
            24 => {
                for c in pcm.chunks_exact(3) {
                    let v = i32::from_le_bytes([0, c[0], c[1], c[2]]) >> 8;
                    writer.write_sample(v).map_err(wav_error)?;
                }
            }
            _ => {
                for c in pcm.chunks_exact(4) {
                    writer
                        .write_sample(i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                        .map_err(wav_error)?;
                }
            }
        }
        self.frames_written += 1;
        Ok(())
    }

    /// Write the final header. Safe to call more than once.
    pub fn finalize(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(wav_error)?;
            info!(path = %self.path.display(), blocks = self.frames_written, "Audio side-file finalized");
        }
        Ok(())
    }
}

impl Drop for AudioSideFile {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            warn!(path = %self.path.display(), error = %e, "Failed to finalize audio side-file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(bits: u16) -> WavInfo {
        WavInfo {
            timestamp: 0,
            format: 1,
            channels: 2,
            sample_rate: 48000,
            bytes_per_second: 48000 * 2 * bits as u32 / 8,
            block_align: 2 * bits / 8,
            bits_per_sample: bits,
        }
    }

    #[test]
    fn test_wav_path() {
        assert_eq!(
            wav_path(Path::new("/clips/M1234.MLV")),
            PathBuf::from("/clips/M1234.wav")
        );
    }

    #[test]
    fn test_append_and_finalize() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.wav");
        let mut wav = AudioSideFile::create(&path, &format(16)).unwrap();
        wav.append(&[1, 0, 2, 0, 3, 0, 4, 0]).unwrap();
        wav.append(&[5, 0, 6, 0, 0xff]).unwrap();
        wav.finalize().unwrap();
        wav.finalize().unwrap();
        assert_eq!(wav.frames_written(), 2);

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, 2, 3, 4, 5, 6]);
        assert!(side_file_present(&path));
    }

    #[test]
    fn test_rejects_compressed_audio() {
        let tmp = tempfile::tempdir().unwrap();
        let mut f = format(16);
        f.format = 0x55;
        assert!(matches!(
            AudioSideFile::create(&tmp.path().join("a.wav"), &f),
            Err(RawError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_missing_side_file() {
        assert!(!side_file_present(Path::new("/nonexistent/clip.wav")));
    }
}
