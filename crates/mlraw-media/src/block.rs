//! Block-structured container parsing.
//!
//! An `.MLV` file is a flat sequence of blocks, each starting with a
//! little-endian `(u32 type, u32 length)` header where `length` includes the
//! header itself. Video and audio blocks point at their payload; the small
//! metadata blocks are decoded in full. Camera state blocks (clock,
//! exposure, lens, white balance) are appended to a shared record list and
//! every following video frame refers to them through a
//! [`MetadataSnapshot`].
//!
//! Parsing never fails hard: a block with an impossible length or one that
//! runs past the end of the file ends the stream, and everything parsed
//! before that point stays usable.

use crate::sensor::{SensorInfo, SENSOR_INFO_SIZE};
use mlraw_core::{
    ExposureInfo, FrameRate, LensInfo, MetadataSnapshot, Result, RtcInfo, SideRecord,
    WhiteBalanceInfo,
};
use serde::{Deserialize, Serialize};
use std::io::{Read, Seek, SeekFrom};
use tracing::{debug, trace, warn};

/// Size of the common block header.
pub const BLOCK_HEADER_SIZE: u64 = 8;

/// Bytes between the start of a `VIDF` block and its frame space.
pub const VIDEO_FRAME_HEADER_SIZE: u64 = 32;

/// Bytes between the start of an `AUDF` block and its frame space.
pub const AUDIO_FRAME_HEADER_SIZE: u64 = 24;

const fn fourcc(tag: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*tag)
}

/// Block type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    FileHeader,
    RawInfo,
    VideoFrame,
    AudioFrame,
    WavInfo,
    RealTimeClock,
    Exposure,
    Lens,
    WhiteBalance,
    Identity,
    CrossReference,
    Info,
    DigitalIso,
    Mark,
    ElectronicLevel,
    Style,
    Vignetting,
    Null,
    Unknown(u32),
}

impl BlockType {
    const TAGS: [(BlockType, u32); 18] = [
        (Self::FileHeader, fourcc(b"MLVI")),
        (Self::RawInfo, fourcc(b"RAWI")),
        (Self::VideoFrame, fourcc(b"VIDF")),
        (Self::AudioFrame, fourcc(b"AUDF")),
        (Self::WavInfo, fourcc(b"WAVI")),
        (Self::RealTimeClock, fourcc(b"RTCI")),
        (Self::Exposure, fourcc(b"EXPO")),
        (Self::Lens, fourcc(b"LENS")),
        (Self::WhiteBalance, fourcc(b"WBAL")),
        (Self::Identity, fourcc(b"IDNT")),
        (Self::CrossReference, fourcc(b"XREF")),
        (Self::Info, fourcc(b"INFO")),
        (Self::DigitalIso, fourcc(b"DISO")),
        (Self::Mark, fourcc(b"MARK")),
        (Self::ElectronicLevel, fourcc(b"ELVL")),
        (Self::Style, fourcc(b"STYL")),
        (Self::Vignetting, fourcc(b"VIGN")),
        (Self::Null, fourcc(b"NULL")),
    ];

    pub fn from_tag(tag: u32) -> Self {
        Self::TAGS
            .iter()
            .find(|(_, t)| *t == tag)
            .map_or(Self::Unknown(tag), |(ty, _)| *ty)
    }

    pub fn tag(self) -> u32 {
        match self {
            Self::Unknown(tag) => tag,
            known => Self::TAGS
                .iter()
                .find(|(ty, _)| *ty == known)
                .map_or(0, |(_, t)| *t),
        }
    }

    /// Four-character name, with non-printable bytes replaced.
    pub fn name(self) -> String {
        self.tag()
            .to_le_bytes()
            .iter()
            .map(|&b| if b.is_ascii_graphic() { b as char } else { '?' })
            .collect()
    }
}

/// `MLVI` file header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub version: String,
    pub guid: u64,
    pub file_number: u16,
    pub file_count: u16,
    pub flags: u32,
    pub video_class: u16,
    pub audio_class: u16,
    pub video_frame_count: u32,
    pub audio_frame_count: u32,
    pub fps: FrameRate,
}

impl FileHeader {
    pub const SIZE: usize = 44;

    fn parse(p: &[u8]) -> Option<Self> {
        let mut r = LeReader::new(p);
        Some(Self {
            version: r.string(8)?,
            guid: r.u64()?,
            file_number: r.u16()?,
            file_count: r.u16()?,
            flags: r.u32()?,
            video_class: r.u16()?,
            audio_class: r.u16()?,
            video_frame_count: r.u32()?,
            audio_frame_count: r.u32()?,
            fps: {
                let num = r.u32()?;
                let den = r.u32()?;
                FrameRate::from_parts(num, den)
            },
        })
    }

    pub fn has_audio(&self) -> bool {
        self.audio_class != 0 || self.audio_frame_count > 0
    }
}

/// `RAWI` raw image description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawInfo {
    pub timestamp: u64,
    pub width: u16,
    pub height: u16,
    pub sensor: SensorInfo,
}

impl RawInfo {
    pub const SIZE: usize = 12 + SENSOR_INFO_SIZE;

    fn parse(p: &[u8]) -> Option<Self> {
        let mut r = LeReader::new(p);
        let timestamp = r.u64()?;
        let width = r.u16()?;
        let height = r.u16()?;
        let sensor = SensorInfo::parse(r.bytes(SENSOR_INFO_SIZE)?).ok()?;
        Some(Self {
            timestamp,
            width,
            height,
            sensor,
        })
    }
}

/// `WAVI` audio format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WavInfo {
    pub timestamp: u64,
    pub format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bytes_per_second: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

impl WavInfo {
    pub const SIZE: usize = 24;

    fn parse(p: &[u8]) -> Option<Self> {
        let mut r = LeReader::new(p);
        Some(Self {
            timestamp: r.u64()?,
            format: r.u16()?,
            channels: r.u16()?,
            sample_rate: r.u32()?,
            bytes_per_second: r.u32()?,
            block_align: r.u16()?,
            bits_per_sample: r.u16()?,
        })
    }
}

/// Where a video frame's samples live within its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFrameRef {
    pub frame_number: u32,
    /// Absolute file offset of the first sample byte.
    pub data_offset: u64,
    pub data_size: u64,
    pub crop_x: u16,
    pub crop_y: u16,
    pub pan_x: u16,
    pub pan_y: u16,
    /// Camera state in effect for this frame.
    pub snapshot: MetadataSnapshot,
}

/// Where an audio frame's PCM data lives within its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFrameRef {
    pub frame_number: u32,
    pub data_offset: u64,
    pub data_size: u64,
}

/// One parsed block.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    FileHeader(FileHeader),
    RawInfo(RawInfo),
    WavInfo(WavInfo),
    VideoFrame(VideoFrameRef),
    AudioFrame(AudioFrameRef),
    /// A camera state record, appended to the shared record list at `index`.
    Side { index: u32 },
    /// A block that carries nothing the player needs.
    Skipped(BlockType),
}

/// Sequential block reader over one physical file.
pub struct BlockStream<R> {
    reader: R,
    pos: u64,
    size: u64,
    exhausted: bool,
    snapshot: MetadataSnapshot,
    blocks_read: u64,
}

impl<R: Read + Seek> BlockStream<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let size = reader.seek(SeekFrom::End(0))?;
        Ok(Self {
            reader,
            pos: 0,
            size,
            exhausted: false,
            snapshot: MetadataSnapshot::default(),
            blocks_read: 0,
        })
    }

    /// Start from the camera state a previous file ended with.
    pub fn with_snapshot(mut self, snapshot: MetadataSnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn set_snapshot(&mut self, snapshot: MetadataSnapshot) {
        self.snapshot = snapshot;
    }

    pub fn snapshot(&self) -> MetadataSnapshot {
        self.snapshot
    }

    /// Offset of the next block header.
    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes accounted for: the read position, or the whole file once the
    /// stream has ended (a corrupt tail is never going to be parsed).
    pub fn parsed_bytes(&self) -> u64 {
        if self.exhausted {
            self.size
        } else {
            self.pos
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn blocks_read(&self) -> u64 {
        self.blocks_read
    }

    /// Parse the next block. Camera state records are appended to `records`.
    /// Returns `None` once the stream has ended.
    pub fn next_block(&mut self, records: &mut Vec<SideRecord>) -> Option<Block> {
        if self.exhausted {
            return None;
        }
        match self.read_block(records) {
            Ok(block) => block,
            Err(e) => {
                warn!(pos = self.pos, error = %e, "Block read failed, ending stream");
                self.exhausted = true;
                None
            }
        }
    }

    /// The `MLVI` block at the start of the file, if there is one. The block
    /// position is not affected.
    pub fn file_header(&mut self) -> Option<FileHeader> {
        let head = self
            .read_bytes(0, BLOCK_HEADER_SIZE as usize + FileHeader::SIZE)
            .ok()?;
        let mut r = LeReader::new(&head);
        let tag = r.u32()?;
        let length = r.u32()? as usize;
        if BlockType::from_tag(tag) != BlockType::FileHeader
            || length < BLOCK_HEADER_SIZE as usize + FileHeader::SIZE
        {
            return None;
        }
        FileHeader::parse(r.bytes(FileHeader::SIZE)?)
    }

    /// Read `len` bytes at an absolute offset. The block position is not
    /// affected.
    pub fn read_bytes(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.reader.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity(len);
        self.reader.by_ref().take(len as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn read_block(&mut self, records: &mut Vec<SideRecord>) -> Result<Option<Block>> {
        if self.size.saturating_sub(self.pos) < BLOCK_HEADER_SIZE {
            self.exhausted = true;
            return Ok(None);
        }

        let header = self.read_bytes(self.pos, BLOCK_HEADER_SIZE as usize)?;
        let mut r = LeReader::new(&header);
        let (Some(tag), Some(length)) = (r.u32(), r.u32()) else {
            self.exhausted = true;
            return Ok(None);
        };
        let ty = BlockType::from_tag(tag);
        let length = length as u64;

        if length < BLOCK_HEADER_SIZE {
            warn!(pos = self.pos, block = %ty.name(), length, "Corrupt block length, ending stream");
            self.exhausted = true;
            return Ok(None);
        }
        if self.pos + length > self.size {
            debug!(pos = self.pos, block = %ty.name(), length, size = self.size, "Partial final block");
            self.exhausted = true;
            return Ok(None);
        }

        let start = self.pos;
        let payload_len = (length - BLOCK_HEADER_SIZE) as usize;
        let block = self.decode(ty, start, length, payload_len, records)?;
        trace!(pos = start, block = %ty.name(), length, "Block");

        self.pos += length;
        self.blocks_read += 1;
        Ok(Some(block))
    }

    fn decode(
        &mut self,
        ty: BlockType,
        start: u64,
        length: u64,
        payload_len: usize,
        records: &mut Vec<SideRecord>,
    ) -> Result<Block> {
        let payload_start = start + BLOCK_HEADER_SIZE;
        let wanted = match ty {
            BlockType::FileHeader => FileHeader::SIZE,
            BlockType::RawInfo => RawInfo::SIZE,
            BlockType::VideoFrame => 24,
            BlockType::AudioFrame => 16,
            BlockType::WavInfo => WavInfo::SIZE,
            BlockType::RealTimeClock => 36,
            BlockType::Exposure => 32,
            BlockType::Lens => 88,
            BlockType::WhiteBalance => 36,
            other => return Ok(Block::Skipped(other)),
        };
        if payload_len < wanted {
            warn!(pos = start, block = %ty.name(), payload_len, wanted, "Short block payload, skipping");
            return Ok(Block::Skipped(ty));
        }
        let p = self.read_bytes(payload_start, wanted)?;

        let block = match ty {
            BlockType::FileHeader => FileHeader::parse(&p).map(Block::FileHeader),
            BlockType::RawInfo => RawInfo::parse(&p).map(Block::RawInfo),
            BlockType::WavInfo => WavInfo::parse(&p).map(Block::WavInfo),
            BlockType::VideoFrame => self.video_frame(&p, start, length),
            BlockType::AudioFrame => audio_frame(&p, start, length),
            _ => parse_side_record(ty, &p).map(|record| {
                let kind = record.kind();
                let index = records.len() as u32;
                records.push(record);
                self.snapshot.update(kind, index);
                Block::Side { index }
            }),
        };
        Ok(block.unwrap_or(Block::Skipped(ty)))
    }

    fn video_frame(&self, p: &[u8], start: u64, length: u64) -> Option<Block> {
        let mut r = LeReader::new(p);
        let _timestamp = r.u64()?;
        let frame_number = r.u32()?;
        let crop_x = r.u16()?;
        let crop_y = r.u16()?;
        let pan_x = r.u16()?;
        let pan_y = r.u16()?;
        let frame_space = r.u32()? as u64;
        let skip = VIDEO_FRAME_HEADER_SIZE + frame_space;
        if skip > length {
            warn!(pos = start, frame_number, frame_space, "Frame space exceeds block");
            return None;
        }
        Some(Block::VideoFrame(VideoFrameRef {
            frame_number,
            data_offset: start + skip,
            data_size: length - skip,
            crop_x,
            crop_y,
            pan_x,
            pan_y,
            snapshot: self.snapshot,
        }))
    }
}

fn audio_frame(p: &[u8], start: u64, length: u64) -> Option<Block> {
    let mut r = LeReader::new(p);
    let _timestamp = r.u64()?;
    let frame_number = r.u32()?;
    let frame_space = r.u32()? as u64;
    let skip = AUDIO_FRAME_HEADER_SIZE + frame_space;
    if skip > length {
        return None;
    }
    Some(Block::AudioFrame(AudioFrameRef {
        frame_number,
        data_offset: start + skip,
        data_size: length - skip,
    }))
}

fn parse_side_record(ty: BlockType, p: &[u8]) -> Option<SideRecord> {
    let mut r = LeReader::new(p);
    let timestamp = r.u64()?;
    let record = match ty {
        BlockType::RealTimeClock => SideRecord::Rtc(RtcInfo {
            timestamp,
            second: r.u16()?,
            minute: r.u16()?,
            hour: r.u16()?,
            day: r.u16()?,
            month: r.u16()?,
            year: r.u16()?,
            weekday: r.u16()?,
            yearday: r.u16()?,
            is_dst: r.u16()?,
            gmt_offset: r.u16()?,
            zone: r.string(8)?,
        }),
        BlockType::Exposure => SideRecord::Exposure(ExposureInfo {
            timestamp,
            iso_mode: r.u32()?,
            iso: r.u32()?,
            iso_analog: r.u32()?,
            digital_gain: r.u32()?,
            shutter_us: r.u64()?,
        }),
        BlockType::Lens => SideRecord::Lens(LensInfo {
            timestamp,
            focal_length_mm: r.u16()?,
            focal_distance: r.u16()?,
            aperture: r.u16()?,
            stabilizer_mode: r.u8()?,
            autofocus_mode: r.u8()?,
            flags: r.u32()?,
            lens_id: r.u32()?,
            name: r.string(32)?,
            serial: r.string(32)?,
        }),
        BlockType::WhiteBalance => SideRecord::WhiteBalance(WhiteBalanceInfo {
            timestamp,
            mode: r.u32()?,
            kelvin: r.u32()?,
            gain_r: r.u32()?,
            gain_g: r.u32()?,
            gain_b: r.u32()?,
            shift_gm: r.u32()?,
            shift_ba: r.u32()?,
        }),
        _ => return None,
    };
    Some(record)
}

/// Bounds-checked little-endian field reader.
struct LeReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> LeReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        let out = self.buf.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(out)
    }

    fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.bytes(N)?.try_into().ok()
    }

    fn u8(&mut self) -> Option<u8> {
        Some(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.array().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Option<u32> {
        self.array().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Option<u64> {
        self.array().map(u64::from_le_bytes)
    }

    /// NUL-padded fixed-width text field.
    fn string(&mut self, n: usize) -> Option<String> {
        let raw = self.bytes(n)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Some(String::from_utf8_lossy(&raw[..end]).into_owned())
    }
}
