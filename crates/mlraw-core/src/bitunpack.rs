//! Packed 14-bit sample unpacking.
//!
//! Raw sensor data is stored as a continuous MSB-first stream of 14-bit
//! samples. The camera writes that stream as little-endian 16-bit words, so
//! one self-contained unit is 7 words (14 bytes) holding 8 samples. TIFF/DNG
//! files written big-endian keep the stream in byte order, where the unit is
//! 7 bytes holding 4 samples.
//!
//! Unpacking runs once per frame on every playback tick, so it is split on
//! unit boundaries and spread over the rayon pool.

use crate::error::{RawError, Result};
use rayon::prelude::*;

/// Number of packed units handed to one rayon task.
const UNITS_PER_TASK: usize = 2048;

const MASK_14: u16 = 0x3FFF;

/// Byte layout of a packed 14-bit buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PackedLayout {
    /// Stream stored as little-endian u16 words (camera native).
    LittleEndianWords,
    /// Stream stored in byte order (TIFF big-endian packing).
    BigEndianBytes,
}

impl PackedLayout {
    fn from_byte_swap(byte_swap: bool) -> Self {
        if byte_swap {
            Self::BigEndianBytes
        } else {
            Self::LittleEndianWords
        }
    }

    /// Packed bytes per self-contained unit.
    fn unit_bytes(self) -> usize {
        match self {
            Self::LittleEndianWords => 14,
            Self::BigEndianBytes => 7,
        }
    }

    /// Samples per self-contained unit.
    fn unit_samples(self) -> usize {
        match self {
            Self::LittleEndianWords => 8,
            Self::BigEndianBytes => 4,
        }
    }
}

/// Minimum and maximum sample value seen while unpacking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnpackStats {
    pub min: u16,
    pub max: u16,
}

impl UnpackStats {
    const EMPTY: Self = Self {
        min: u16::MAX,
        max: 0,
    };

    fn merge(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    fn finish(self) -> Self {
        if self.min > self.max {
            Self { min: 0, max: 0 }
        } else {
            self
        }
    }
}

/// Packed bytes in one self-contained unit for the given layout.
pub fn packed_unit_bytes(byte_swap: bool) -> usize {
    PackedLayout::from_byte_swap(byte_swap).unit_bytes()
}

/// Unpack a buffer of packed 14-bit samples into 16-bit samples.
///
/// With `byte_swap == false` the input is in camera-native layout and its
/// length must be a multiple of 14 bytes. With `byte_swap == true` the input
/// is big-endian TIFF packing and its length must be a multiple of 7 bytes.
/// A trailing partial unit is rejected.
pub fn unpack14to16(packed: &[u8], byte_swap: bool) -> Result<(Vec<u16>, UnpackStats)> {
    let layout = PackedLayout::from_byte_swap(byte_swap);
    let unit_bytes = layout.unit_bytes();
    if packed.len() % unit_bytes != 0 {
        return Err(RawError::InvalidParameter(format!(
            "packed length {} is not a multiple of {} bytes",
            packed.len(),
            unit_bytes
        )));
    }

    let units = packed.len() / unit_bytes;
    let mut samples = vec![0u16; units * layout.unit_samples()];

    let stats = packed
        .par_chunks(unit_bytes * UNITS_PER_TASK)
        .zip(samples.par_chunks_mut(layout.unit_samples() * UNITS_PER_TASK))
        .map(|(src, dst)| unpack_chunk(src, dst, layout))
        .reduce(|| UnpackStats::EMPTY, UnpackStats::merge);

    Ok((samples, stats.finish()))
}

fn unpack_chunk(src: &[u8], dst: &mut [u16], layout: PackedLayout) -> UnpackStats {
    let mut stats = UnpackStats::EMPTY;
    match layout {
        PackedLayout::LittleEndianWords => {
            for (unit, out) in src.chunks_exact(14).zip(dst.chunks_exact_mut(8)) {
                let w = |i: usize| u16::from_le_bytes([unit[2 * i], unit[2 * i + 1]]);
                let (w0, w1, w2, w3, w4, w5, w6) = (w(0), w(1), w(2), w(3), w(4), w(5), w(6));
                out[0] = w0 >> 2;
                out[1] = ((w0 & 0x3) << 12) | (w1 >> 4);
                out[2] = ((w1 & 0xF) << 10) | (w2 >> 6);
                out[3] = ((w2 & 0x3F) << 8) | (w3 >> 8);
                out[4] = ((w3 & 0xFF) << 6) | (w4 >> 10);
                out[5] = ((w4 & 0x3FF) << 4) | (w5 >> 12);
                out[6] = ((w5 & 0xFFF) << 2) | (w6 >> 14);
                out[7] = w6 & MASK_14;
                stats = out.iter().fold(stats, accumulate);
            }
        }
        PackedLayout::BigEndianBytes => {
            for (unit, out) in src.chunks_exact(7).zip(dst.chunks_exact_mut(4)) {
                let v = unit.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
                out[0] = ((v >> 42) as u16) & MASK_14;
                out[1] = ((v >> 28) as u16) & MASK_14;
                out[2] = ((v >> 14) as u16) & MASK_14;
                out[3] = (v as u16) & MASK_14;
                stats = out.iter().fold(stats, accumulate);
            }
        }
    }
    stats
}

#[inline]
fn accumulate(stats: UnpackStats, &sample: &u16) -> UnpackStats {
    UnpackStats {
        min: stats.min.min(sample),
        max: stats.max.max(sample),
    }
}

/// Pack 16-bit samples (each below 2^14) into the 14-bit layout.
///
/// Inverse of [`unpack14to16`] for the same `byte_swap` flag.
pub fn pack16to14(samples: &[u16], byte_swap: bool) -> Result<Vec<u8>> {
    let layout = PackedLayout::from_byte_swap(byte_swap);
    let unit_samples = layout.unit_samples();
    if samples.len() % unit_samples != 0 {
        return Err(RawError::InvalidParameter(format!(
            "sample count {} is not a multiple of {}",
            samples.len(),
            unit_samples
        )));
    }
    if let Some(bad) = samples.iter().find(|&&s| s > MASK_14) {
        return Err(RawError::InvalidParameter(format!(
            "sample value {bad} does not fit in 14 bits"
        )));
    }

    let mut packed = Vec::with_capacity(samples.len() / unit_samples * layout.unit_bytes());
    for unit in samples.chunks_exact(unit_samples) {
        // Build the MSB-first stream for this unit.
        let mut acc: u128 = 0;
        for &s in unit {
            acc = (acc << 14) | s as u128;
        }
        let stream_bytes = layout.unit_bytes();
        let bytes: Vec<u8> = (0..stream_bytes)
            .map(|i| (acc >> (8 * (stream_bytes - 1 - i))) as u8)
            .collect();
        match layout {
            PackedLayout::BigEndianBytes => packed.extend_from_slice(&bytes),
            PackedLayout::LittleEndianWords => {
                for pair in bytes.chunks_exact(2) {
                    packed.extend_from_slice(&[pair[1], pair[0]]);
                }
            }
        }
    }
    Ok(packed)
}

/// Interpret a buffer of plain 16-bit samples.
pub fn unpack16(bytes: &[u8], big_endian: bool) -> Result<Vec<u16>> {
    if bytes.len() % 2 != 0 {
        return Err(RawError::InvalidParameter(format!(
            "16-bit buffer has odd length {}",
            bytes.len()
        )));
    }
    let samples = bytes
        .par_chunks_exact(2)
        .map(|b| {
            if big_endian {
                u16::from_be_bytes([b[0], b[1]])
            } else {
                u16::from_le_bytes([b[0], b[1]])
            }
        })
        .collect();
    Ok(samples)
}

/// Expand samples to a black/white normalized float buffer for demosaicing.
///
/// Values below `black` clamp to zero; values above `white` exceed 1.0.
pub fn expand_to_float(samples: &[u16], black: u32, white: u32) -> Vec<f32> {
    let range = white.saturating_sub(black).max(1) as f32;
    let black = black as f32;
    samples
        .par_iter()
        .map(|&s| ((s as f32 - black) / range).max(0.0))
        .collect()
}
