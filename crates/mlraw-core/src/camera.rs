//! Per-frame camera state carried by side-channel blocks.
//!
//! Clock, exposure, lens and white-balance records are appended to one
//! sequence per clip as they are discovered. A frame refers to the latest
//! record of each kind preceding it through a [`MetadataSnapshot`] of
//! indices, so thousands of frames share a handful of records.

use serde::{Deserialize, Serialize};

/// Real-time clock reading (broken-down `struct tm` as the camera stores it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcInfo {
    pub timestamp: u64,
    pub second: u16,
    pub minute: u16,
    pub hour: u16,
    pub day: u16,
    /// Months since January.
    pub month: u16,
    /// Years since 1900.
    pub year: u16,
    pub weekday: u16,
    pub yearday: u16,
    pub is_dst: u16,
    pub gmt_offset: u16,
    pub zone: String,
}

impl RtcInfo {
    /// `YYYY-MM-DD HH:MM:SS` in camera local time.
    pub fn datetime_string(&self) -> String {
        format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            1900 + self.year as u32,
            self.month + 1,
            self.day,
            self.hour,
            self.minute,
            self.second
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureInfo {
    pub timestamp: u64,
    pub iso_mode: u32,
    pub iso: u32,
    pub iso_analog: u32,
    pub digital_gain: u32,
    /// Shutter time in microseconds.
    pub shutter_us: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LensInfo {
    pub timestamp: u64,
    pub focal_length_mm: u16,
    pub focal_distance: u16,
    /// f-number × 100.
    pub aperture: u16,
    pub stabilizer_mode: u8,
    pub autofocus_mode: u8,
    pub flags: u32,
    pub lens_id: u32,
    pub name: String,
    pub serial: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhiteBalanceInfo {
    pub timestamp: u64,
    pub mode: u32,
    pub kelvin: u32,
    pub gain_r: u32,
    pub gain_g: u32,
    pub gain_b: u32,
    pub shift_gm: u32,
    pub shift_ba: u32,
}

/// Kind of side-channel record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SideKind {
    Rtc,
    Exposure,
    Lens,
    WhiteBalance,
}

/// One side-channel record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SideRecord {
    Rtc(RtcInfo),
    Exposure(ExposureInfo),
    Lens(LensInfo),
    WhiteBalance(WhiteBalanceInfo),
}

impl SideRecord {
    pub fn kind(&self) -> SideKind {
        match self {
            Self::Rtc(_) => SideKind::Rtc,
            Self::Exposure(_) => SideKind::Exposure,
            Self::Lens(_) => SideKind::Lens,
            Self::WhiteBalance(_) => SideKind::WhiteBalance,
        }
    }
}

/// Indices of the most recent record of each kind, by position in the
/// clip's record sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    pub rtc: Option<u32>,
    pub exposure: Option<u32>,
    pub lens: Option<u32>,
    pub white_balance: Option<u32>,
}

impl MetadataSnapshot {
    /// Point the slot for `kind` at record `index`.
    pub fn update(&mut self, kind: SideKind, index: u32) {
        let slot = match kind {
            SideKind::Rtc => &mut self.rtc,
            SideKind::Exposure => &mut self.exposure,
            SideKind::Lens => &mut self.lens,
            SideKind::WhiteBalance => &mut self.white_balance,
        };
        *slot = Some(index);
    }

    /// Resolve indices against the record sequence. Out-of-range indices and
    /// mismatched kinds resolve to `None`.
    pub fn resolve(&self, records: &[SideRecord]) -> FrameSideData {
        let get = |idx: Option<u32>| idx.and_then(|i| records.get(i as usize));
        FrameSideData {
            rtc: match get(self.rtc) {
                Some(SideRecord::Rtc(r)) => Some(r.clone()),
                _ => None,
            },
            exposure: match get(self.exposure) {
                Some(SideRecord::Exposure(r)) => Some(r.clone()),
                _ => None,
            },
            lens: match get(self.lens) {
                Some(SideRecord::Lens(r)) => Some(r.clone()),
                _ => None,
            },
            white_balance: match get(self.white_balance) {
                Some(SideRecord::WhiteBalance(r)) => Some(r.clone()),
                _ => None,
            },
        }
    }
}

/// Camera state in effect for one frame.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameSideData {
    pub rtc: Option<RtcInfo>,
    pub exposure: Option<ExposureInfo>,
    pub lens: Option<LensInfo>,
    pub white_balance: Option<WhiteBalanceInfo>,
}
