//! MlRaw Core - foundation types for raw clip playback
//!
//! This crate provides the types shared by every container format:
//! - Packed 14-bit sample unpacking
//! - Frames with lazy conversion and thumbnails
//! - Sensor geometry, levels and color matrix
//! - Side-channel camera records and per-frame snapshots
//! - Frame rates

pub mod bitunpack;
pub mod camera;
pub mod color;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod time;

pub use bitunpack::{pack16to14, unpack14to16, UnpackStats};
pub use camera::{
    ExposureInfo, FrameSideData, LensInfo, MetadataSnapshot, RtcInfo, SideKind, SideRecord,
    WhiteBalanceInfo,
};
pub use color::{ColorMatrix, SensorLevels};
pub use error::{RawError, Result};
pub use frame::{Frame, FrameData, SharedFrame, Thumbnail};
pub use geometry::{Rect, SensorGeometry};
pub use time::FrameRate;

/// Playback tuning defaults.
pub mod limits {
    /// Decoded frames kept in the per-clip frame cache.
    pub const FRAME_CACHE_CAPACITY: usize = 10;

    /// Pending preload requests kept before the oldest is dropped.
    pub const PRELOAD_QUEUE_DEPTH: usize = 10;

    /// Blocks the background indexer parses before checking for lookups.
    pub const INDEX_QUANTUM_BLOCKS: usize = 10;

    /// How long `frame()` waits on the result channel before re-checking
    /// that its request is still queued (milliseconds).
    pub const FRAME_WAIT_POLL_MS: u64 = 50;
}
