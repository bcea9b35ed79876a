//! Per-clip playback options.

use mlraw_core::limits;
use mlraw_core::{RawError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Options used when opening a [`RawClip`](crate::RawClip).
///
/// Missing fields in a JSON config fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipOptions {
    /// Decoded frames kept in memory.
    pub cache_capacity: usize,
    /// Pending preload requests kept before the oldest is dropped.
    pub preload_queue_depth: usize,
    /// Blocks the background indexer parses between lookups.
    pub index_quantum_blocks: usize,
    /// Read and write the `.mrx` sidecar next to the clip.
    pub sidecar: bool,
    /// Extract block container audio into a `.wav` side-file.
    pub extract_audio: bool,
    /// Result poll interval of `frame()` in milliseconds.
    pub frame_wait_poll_ms: u64,
}

impl Default for ClipOptions {
    fn default() -> Self {
        Self {
            cache_capacity: limits::FRAME_CACHE_CAPACITY,
            preload_queue_depth: limits::PRELOAD_QUEUE_DEPTH,
            index_quantum_blocks: limits::INDEX_QUANTUM_BLOCKS,
            sidecar: true,
            extract_audio: true,
            frame_wait_poll_ms: limits::FRAME_WAIT_POLL_MS,
        }
    }
}

impl ClipOptions {
    /// Load options from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let options: Self =
            serde_json::from_str(text).map_err(|e| RawError::Serialization(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Reject values that would stall playback.
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(RawError::InvalidParameter(
                "cache_capacity must be at least 1".into(),
            ));
        }
        if self.preload_queue_depth == 0 {
            return Err(RawError::InvalidParameter(
                "preload_queue_depth must be at least 1".into(),
            ));
        }
        if self.index_quantum_blocks == 0 {
            return Err(RawError::InvalidParameter(
                "index_quantum_blocks must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
